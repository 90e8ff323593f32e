//! The UI-visible application state record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sc_common::convert::{to_i64, to_string_lossy, truthy};
use sc_common::Payload;

/// Flat record of the station's UI-facing attributes.
///
/// Exactly one `AppState` exists per session, owned by the UI thread and
/// mutated only through [`crate::UiBridge::flush`]. Workers and chains see it
/// via mirrored snapshots.
///
/// Fields the framework itself reads are declared; everything else (script-
/// or device-specific diagnostic keys) lands in the `extra` map and is served
/// through the same keyed [`AppState::get`]/[`AppState::set`] API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    // ---- device / job workers ----
    pub device_status: String,
    pub device_last_seen: String,
    pub job_status: String,

    // ---- errors (ui-facing summary) ----
    pub error_count: i64,

    // ---- part counters ----
    pub part_good: i64,
    pub part_bad: i64,
    pub part_total: i64,

    // ---- operator instructions ----
    pub work_instruction: String,
    pub work_feedback: String,
    pub work_instruction_state: i64,
    pub work_feedback_state: i64,

    // ---- packaging ----
    pub container_number: String,
    pub part_number: String,
    pub description: String,
    pub current_container_qty: String,
    pub max_container_qty: String,
    pub last_serial_number: String,
    pub current_serialnumber: String,
    pub packaging_search_query: String,
    pub packaging_container_selected: String,
    pub packaging_active_container: String,
    pub packaging_container_rows: Vec<Value>,
    pub packaging_serial_rows: Vec<Value>,

    // ---- container management ----
    pub container_mgmt_search_query: String,
    pub container_mgmt_container_selected: String,
    pub container_mgmt_active_container: String,
    pub container_mgmt_container_rows: Vec<Value>,
    pub container_mgmt_serial_rows: Vec<Value>,

    // ---- view chrome driven by scripts ----
    pub view_button_states: Payload,
    pub operator_show_device_panel: bool,
    pub operator_device_panel_items: Vec<Value>,

    /// Dynamic extension keys (diagnostics, script scratch state).
    pub extra: Payload,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            device_status: "Disconnected".to_string(),
            device_last_seen: "-".to_string(),
            job_status: "Idle".to_string(),
            error_count: 0,
            part_good: 0,
            part_bad: 0,
            part_total: 0,
            work_instruction: "Work instruction goes here".to_string(),
            work_feedback: "Work feedback goes here".to_string(),
            work_instruction_state: 5,
            work_feedback_state: 5,
            container_number: String::new(),
            part_number: String::new(),
            description: String::new(),
            current_container_qty: String::new(),
            max_container_qty: String::new(),
            last_serial_number: String::new(),
            current_serialnumber: String::new(),
            packaging_search_query: String::new(),
            packaging_container_selected: String::new(),
            packaging_active_container: String::new(),
            packaging_container_rows: Vec::new(),
            packaging_serial_rows: Vec::new(),
            container_mgmt_search_query: String::new(),
            container_mgmt_container_selected: String::new(),
            container_mgmt_active_container: String::new(),
            container_mgmt_container_rows: Vec::new(),
            container_mgmt_serial_rows: Vec::new(),
            view_button_states: Payload::new(),
            operator_show_device_panel: false,
            operator_device_panel_items: Vec::new(),
            extra: Payload::new(),
        }
    }
}

macro_rules! string_fields {
    ($self:ident) => {
        [
            ("device_status", &mut $self.device_status),
            ("device_last_seen", &mut $self.device_last_seen),
            ("job_status", &mut $self.job_status),
            ("work_instruction", &mut $self.work_instruction),
            ("work_feedback", &mut $self.work_feedback),
            ("container_number", &mut $self.container_number),
            ("part_number", &mut $self.part_number),
            ("description", &mut $self.description),
            ("current_container_qty", &mut $self.current_container_qty),
            ("max_container_qty", &mut $self.max_container_qty),
            ("last_serial_number", &mut $self.last_serial_number),
            ("current_serialnumber", &mut $self.current_serialnumber),
            ("packaging_search_query", &mut $self.packaging_search_query),
            (
                "packaging_container_selected",
                &mut $self.packaging_container_selected,
            ),
            (
                "packaging_active_container",
                &mut $self.packaging_active_container,
            ),
            (
                "container_mgmt_search_query",
                &mut $self.container_mgmt_search_query,
            ),
            (
                "container_mgmt_container_selected",
                &mut $self.container_mgmt_container_selected,
            ),
            (
                "container_mgmt_active_container",
                &mut $self.container_mgmt_active_container,
            ),
        ]
    };
}

impl AppState {
    /// Set one attribute by key. Unknown keys go to the `extra` map.
    pub fn set(&mut self, key: &str, value: Value) {
        for (name, slot) in string_fields!(self) {
            if name == key {
                *slot = to_string_lossy(&value);
                return;
            }
        }

        match key {
            "error_count" => self.error_count = to_i64(&value, 0),
            "part_good" => self.part_good = to_i64(&value, 0),
            "part_bad" => self.part_bad = to_i64(&value, 0),
            "part_total" => self.part_total = to_i64(&value, 0),
            "work_instruction_state" => self.work_instruction_state = to_i64(&value, 5),
            "work_feedback_state" => self.work_feedback_state = to_i64(&value, 5),
            "packaging_container_rows" => self.packaging_container_rows = as_list(value),
            "packaging_serial_rows" => self.packaging_serial_rows = as_list(value),
            "container_mgmt_container_rows" => self.container_mgmt_container_rows = as_list(value),
            "container_mgmt_serial_rows" => self.container_mgmt_serial_rows = as_list(value),
            "view_button_states" => self.view_button_states = as_map(value),
            "operator_show_device_panel" => self.operator_show_device_panel = truthy(&value),
            "operator_device_panel_items" => self.operator_device_panel_items = as_list(value),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    /// Read one attribute by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.snapshot().remove(key)
    }

    /// Full snapshot of every declared field plus the `extra` map.
    pub fn snapshot(&self) -> Payload {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        };
        if let Some(Value::Object(extra)) = map.remove("extra") {
            for (k, v) in extra {
                map.entry(k).or_insert(v);
            }
        }
        map
    }
}

fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn as_map(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_routes_declared_fields() {
        let mut state = AppState::default();
        state.set("container_number", json!("C-100"));
        state.set("part_good", json!("12"));
        state.set("operator_show_device_panel", json!(1));
        assert_eq!(state.container_number, "C-100");
        assert_eq!(state.part_good, 12);
        assert!(state.operator_show_device_panel);
    }

    #[test]
    fn unknown_keys_land_in_extra() {
        let mut state = AppState::default();
        state.set("pnxs_diag_temp", json!(41.5));
        assert_eq!(state.get("pnxs_diag_temp"), Some(json!(41.5)));
        assert_eq!(state.snapshot()["pnxs_diag_temp"], json!(41.5));
    }

    #[test]
    fn declared_fields_shadow_extra_in_snapshot() {
        let mut state = AppState::default();
        state.set("job_status", json!("Running"));
        let snap = state.snapshot();
        assert_eq!(snap["job_status"], json!("Running"));
        assert_eq!(snap["device_status"], json!("Disconnected"));
        assert!(!snap.contains_key("extra"));
    }
}
