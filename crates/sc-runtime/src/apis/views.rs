//! View-scoped facades for operator pages.
//!
//! A view facade wraps the AppState keys and the command key of one operator
//! page, so scripts read like the page they drive:
//!
//! ```ignore
//! let pack = ctx.views().packaging();
//! if let Some(cmd) = pack.consume_cmd() {
//!     match cmd.as_str() {
//!         "pack" => { /* ... */ }
//!         _ => {}
//!     }
//! }
//! ```

use std::ops::Deref;

use serde_json::{json, Value};

use sc_common::{topics, Payload};

use crate::apis::ui::UiApi;
use crate::context::ChainContext;

pub struct ViewsApi<'a> {
    pub(crate) ctx: &'a ChainContext,
}

impl<'a> ViewsApi<'a> {
    pub fn packaging(&self) -> PackagingView<'a> {
        PackagingView {
            view: ViewApi::new(self.ctx, "packaging", "packaging.cmd"),
        }
    }

    pub fn container_management(&self) -> ContainerManagementView<'a> {
        ContainerManagementView {
            view: ViewApi::new(self.ctx, "container_management", "container_management.cmd"),
        }
    }

    /// Facade for a custom view id and command key.
    pub fn named(&self, view_id: &str, cmd_key: &str) -> ViewApi<'a> {
        ViewApi::new(self.ctx, view_id, cmd_key)
    }
}

/// Generic view operations: state access, command consumption, button
/// states, device panel, wait dialog.
pub struct ViewApi<'a> {
    ctx: &'a ChainContext,
    view_id: String,
    cmd_key: String,
}

impl<'a> ViewApi<'a> {
    fn new(ctx: &'a ChainContext, view_id: &str, cmd_key: &str) -> Self {
        Self {
            ctx,
            view_id: view_id.to_string(),
            cmd_key: cmd_key.to_string(),
        }
    }

    fn ui(&self) -> UiApi<'a> {
        UiApi { ctx: self.ctx }
    }

    pub fn view_id(&self) -> &str {
        &self.view_id
    }

    pub fn set_state(&self, key: &str, value: Value) {
        self.ui().set_state(key, value);
    }

    pub fn set_state_many(&self, values: Payload) {
        self.ui().set_state_many(values);
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.ctx.app_state.lock().get(key).cloned()
    }

    /// Consume this view's command once (deduped by event id).
    pub fn consume_cmd(&self) -> Option<String> {
        self.ui().consume_command(&self.cmd_key)
    }

    pub fn consume_payload(&self) -> Option<Payload> {
        self.ui().consume_payload(&self.cmd_key)
    }

    /// Consume a command, optionally restricted to an expected set. While
    /// nothing (acceptable) arrives, the step description shows the wait.
    pub fn wait_cmd(&self, expected: &[&str], step_desc: &str) -> Option<String> {
        match self.consume_cmd() {
            None => {
                if !step_desc.is_empty() {
                    self.ctx.flow.lock().step_desc = step_desc.to_string();
                }
                None
            }
            Some(cmd) => {
                if expected.is_empty() || expected.iter().any(|e| e.eq_ignore_ascii_case(&cmd)) {
                    Some(cmd)
                } else {
                    None
                }
            }
        }
    }

    // ----- button states -----

    fn resolve_button_key(&self, button_key: &str) -> String {
        let raw = button_key
            .trim()
            .strip_prefix("view.button.")
            .unwrap_or(button_key.trim());
        if raw.is_empty() {
            return String::new();
        }
        if raw.contains('.') {
            raw.to_string()
        } else {
            format!("{}.{}", self.view_id, raw)
        }
    }

    pub fn set_button_enabled(&self, button_key: &str, enabled: bool) {
        let resolved = self.resolve_button_key(button_key);
        if resolved.is_empty() {
            return;
        }
        let mut states = match self.get_state("view_button_states") {
            Some(Value::Object(map)) => map,
            _ => Payload::new(),
        };
        states.insert(resolved, json!(enabled));
        self.set_state("view_button_states", Value::Object(states));
    }

    pub fn set_buttons_enabled(&self, mapping: &[(&str, bool)]) {
        let mut states = match self.get_state("view_button_states") {
            Some(Value::Object(map)) => map,
            _ => Payload::new(),
        };
        for (key, enabled) in mapping {
            let resolved = self.resolve_button_key(key);
            if resolved.is_empty() {
                continue;
            }
            states.insert(resolved, json!(*enabled));
        }
        self.set_state("view_button_states", Value::Object(states));
    }

    // ----- operator device panel -----

    pub fn set_device_panel_visible(&self, visible: bool) {
        self.set_state("operator_show_device_panel", json!(visible));
    }

    pub fn upsert_device_state(&self, name: &str, status: &str, state: &str, connected: bool) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let mut items = match self.get_state("operator_device_panel_items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let entry = json!({
            "name": name,
            "status": status,
            "state": state,
            "connected": connected,
        });
        match items.iter_mut().find(|item| {
            item.get("name").and_then(Value::as_str).map(str::trim) == Some(name)
        }) {
            Some(slot) => *slot = entry,
            None => items.push(entry),
        }
        self.set_state("operator_device_panel_items", Value::Array(items));
    }

    pub fn clear_device_states(&self) {
        self.set_state("operator_device_panel_items", json!([]));
    }

    // ----- wait dialog -----

    /// Open this view's wait dialog (spinner) on the UI side.
    pub fn open_wait(&self, title: &str, message: &str) {
        self.ui()
            .popup_wait_open(&topics::view_wait_key(&self.view_id), title, message);
    }

    pub fn close_wait(&self) {
        self.ui()
            .popup_wait_close(&topics::view_wait_key(&self.view_id));
    }
}

/// Packaging page facade.
pub struct PackagingView<'a> {
    view: ViewApi<'a>,
}

impl<'a> Deref for PackagingView<'a> {
    type Target = ViewApi<'a>;

    fn deref(&self) -> &Self::Target {
        &self.view
    }
}

impl PackagingView<'_> {
    pub fn set_container_number(&self, value: &str) {
        self.view.set_state("container_number", json!(value));
    }

    pub fn set_part_number(&self, value: &str) {
        self.view.set_state("part_number", json!(value));
    }

    pub fn set_last_serial_number(&self, value: &str) {
        self.view.set_state("last_serial_number", json!(value));
    }

    /// Update the packaging form in one patch set; `None` fields keep their
    /// current value.
    pub fn set_form(
        &self,
        container_number: Option<&str>,
        part_number: Option<&str>,
        description: Option<&str>,
        current_qty: Option<Value>,
        max_qty: Option<Value>,
    ) {
        let mut patch = Payload::new();
        if let Some(v) = container_number {
            patch.insert("container_number".to_string(), json!(v));
        }
        if let Some(v) = part_number {
            patch.insert("part_number".to_string(), json!(v));
        }
        if let Some(v) = description {
            patch.insert("description".to_string(), json!(v));
        }
        if let Some(v) = current_qty {
            patch.insert("current_container_qty".to_string(), v);
        }
        if let Some(v) = max_qty {
            patch.insert("max_container_qty".to_string(), v);
        }
        if !patch.is_empty() {
            self.view.set_state_many(patch);
        }
    }

    pub fn set_container_rows(&self, rows: Vec<Value>) {
        self.view
            .set_state("packaging_container_rows", Value::Array(rows));
    }

    pub fn set_serial_rows(&self, rows: Vec<Value>) {
        self.view
            .set_state("packaging_serial_rows", Value::Array(rows));
    }
}

/// Container-management page facade.
pub struct ContainerManagementView<'a> {
    view: ViewApi<'a>,
}

impl<'a> Deref for ContainerManagementView<'a> {
    type Target = ViewApi<'a>;

    fn deref(&self) -> &Self::Target {
        &self.view
    }
}

impl ContainerManagementView<'_> {
    pub fn set_selected_container(&self, value: &str) {
        self.view
            .set_state("container_mgmt_container_selected", json!(value));
    }

    pub fn set_active_container(&self, value: &str) {
        self.view
            .set_state("container_mgmt_active_container", json!(value));
    }

    pub fn set_container_rows(&self, rows: Vec<Value>) {
        self.view
            .set_state("container_mgmt_container_rows", Value::Array(rows));
    }

    pub fn set_serial_rows(&self, rows: Vec<Value>) {
        self.view
            .set_state("container_mgmt_serial_rows", Value::Array(rows));
    }
}
