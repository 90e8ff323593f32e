//! UI/log/event helpers exposed to scripts.
//!
//! Two kinds of state live here: the chain-local scratch map (`set`/`merge`)
//! and AppState writes (`set_state`), which go through the UiBridge as
//! patches and come back via the mirrored snapshot. Modal popups follow the
//! idle → pending → resolved machine per popup key; calls never block, a
//! script polls until the operator answers.

use serde_json::{json, Value};

use sc_bus::TopicFilter;
use sc_common::commands::script;
use sc_common::convert::{to_i64, truthy};
use sc_common::{topics, Payload};

use crate::context::ChainContext;

// 1=Green, 2=Yellow, 3=Red, 4=Blue, 5=Grey
fn state_name_to_code(name: &str) -> Option<i64> {
    match name {
        "ok" | "green" => Some(1),
        "warn" | "warning" | "yellow" => Some(2),
        "error" | "red" => Some(3),
        "info" | "blue" => Some(4),
        "idle" | "grey" | "gray" => Some(5),
        _ => None,
    }
}

fn normalize_state_code(value: &Value) -> i64 {
    match value {
        Value::Number(_) => to_i64(value, 5),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            if s.is_empty() {
                5
            } else if s.chars().all(|c| c.is_ascii_digit()) {
                s.parse().unwrap_or(5)
            } else {
                state_name_to_code(&s).unwrap_or(5)
            }
        }
        _ => 5,
    }
}

/// Common operator-panel update in one call. States accept 1..5 or
/// `"ok"/"warn"/"error"/"info"/"idle"` (and their color aliases).
#[derive(Debug, Default, Clone)]
pub struct OperatorDisplay {
    pub instruction: Option<String>,
    pub feedback: Option<String>,
    pub instruction_state: Option<Value>,
    pub feedback_state: Option<Value>,
}

/// Optional filters for [`UiApi::consume_view_cmd`].
#[derive(Debug, Default, Clone)]
pub struct ViewCmdFilter {
    pub commands: Vec<String>,
    pub events: Vec<String>,
}

impl ViewCmdFilter {
    fn normalized(list: &[String]) -> Vec<String> {
        list.iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn signature(&self) -> String {
        let fmt = |list: &[String]| {
            let mut items = Self::normalized(list);
            items.sort();
            if items.is_empty() {
                "*".to_string()
            } else {
                items.join(",")
            }
        };
        format!("{}|{}", fmt(&self.commands), fmt(&self.events))
    }
}

pub struct UiApi<'a> {
    pub(crate) ctx: &'a ChainContext,
}

impl UiApi<'_> {
    // ----- chain-local scratch state -----

    pub fn set(&self, key: &str, value: Value) {
        self.ctx.ui_state.lock().insert(key.to_string(), value);
    }

    pub fn merge(&self, patch: Payload) {
        let mut state = self.ctx.ui_state.lock();
        for (key, value) in patch {
            state.insert(key, value);
        }
    }

    pub fn clear(&self) {
        self.ctx.ui_state.lock().clear();
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.ctx.ui_state.lock().get(key).cloned()
    }

    // ----- AppState bridge helpers (persisted UI variables) -----

    /// Write one value into AppState via a bridge patch. The local mirror is
    /// updated immediately so the same tick can read it back.
    pub fn set_state(&self, key: &str, value: Value) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        self.ctx.update_app_state(key, value.clone());
        self.ctx.bridge.emit_patch(key, value);
    }

    /// Write multiple AppState keys, patch-per-key to avoid a full-state
    /// replacement.
    pub fn set_state_many(&self, values: Payload) {
        for (key, value) in values {
            self.set_state(&key, value);
        }
    }

    /// Increment an AppState key interpreted as int. Returns the new value.
    pub fn inc_state_int(&self, key: &str, amount: i64) -> i64 {
        let current = self
            .ctx
            .app_state
            .lock()
            .get(key)
            .map(|v| to_i64(v, 0))
            .unwrap_or(0);
        let next = current + amount;
        self.set_state(key, json!(next));
        next
    }

    /// Update the operator instruction/feedback panel.
    pub fn show(&self, display: OperatorDisplay) {
        let mut patch = Payload::new();
        if let Some(instruction) = display.instruction {
            patch.insert("work_instruction".to_string(), json!(instruction));
        }
        if let Some(feedback) = display.feedback {
            patch.insert("work_feedback".to_string(), json!(feedback));
        }
        if let Some(state) = display.instruction_state {
            patch.insert(
                "work_instruction_state".to_string(),
                json!(normalize_state_code(&state)),
            );
        }
        if let Some(state) = display.feedback_state {
            patch.insert(
                "work_feedback_state".to_string(),
                json!(normalize_state_code(&state)),
            );
        }
        if !patch.is_empty() {
            self.set_state_many(patch);
        }
    }

    // ----- notifications / log / events -----

    pub fn notify(&self, message: &str, kind: sc_bridge::NotifyKind) {
        self.ctx.bridge.emit_notify(message, kind);
    }

    /// Publish an operator-log line for this chain.
    pub fn log(&self, message: &str, level: &str) {
        let (step, step_desc) = {
            let flow = self.ctx.flow.lock();
            (flow.step, flow.step_desc.clone())
        };
        let payload = json!({
            "chain_key": self.ctx.chain_id(),
            "step": step,
            "step_desc": step_desc,
            "level": level,
            "message": message,
        });
        self.publish_value(script::UPDATE_LOG, payload);
    }

    /// Publish a named script event as a bus value
    /// (`key = script.event.<name>`).
    pub fn event(&self, name: &str, payload: Payload) {
        let key = format!("script.event.{}", if name.is_empty() { "unnamed" } else { name });
        self.publish_value(&key, Value::Object(payload));
    }

    fn publish_value(&self, key: &str, value: Value) {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("value".to_string(), value);
        self.ctx.publish_bus(topics::VALUE_CHANGED, payload);
    }

    // ----- command consumption (dedupe by event id) -----

    /// Read a command-style bus value once. Payloads carry a monotonic
    /// `event_id`; the last consumed id is kept in chain vars so repeated
    /// reads of the same event return `None`. Payloads without an id fall
    /// back to dedupe by value.
    pub fn consume_command(&self, key: &str) -> Option<String> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let raw = self.ctx.values().by_key(key)?;

        let (cmd, event_id) = match &raw {
            Value::Object(map) => {
                let cmd = match map.get("action") {
                    Some(Value::Object(action)) => action
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    _ => map
                        .get("cmd")
                        .map(sc_common::convert::to_string_lossy)
                        .unwrap_or_default(),
                };
                (cmd, map.get("event_id").cloned())
            }
            other => (sc_common::convert::to_string_lossy(other), None),
        };

        let cmd = cmd.trim().to_ascii_lowercase();
        if cmd.is_empty() {
            return None;
        }

        let event_key = format!("__ui_cmd_last_event_id:{key}");
        let fallback_key = format!("__ui_cmd_last_fallback:{key}");
        let mut vars = self.ctx.vars.lock();

        match event_id {
            Some(event_id) => {
                if vars.get(&event_key) == Some(&event_id) {
                    return None;
                }
                vars.insert(event_key, event_id);
                Some(cmd)
            }
            None => {
                if vars.get(&fallback_key).and_then(Value::as_str) == Some(cmd.as_str()) {
                    return None;
                }
                vars.insert(fallback_key, json!(cmd));
                Some(cmd)
            }
        }
    }

    /// Read a raw command payload once, deduped like [`Self::consume_command`].
    pub fn consume_payload(&self, key: &str) -> Option<Payload> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let raw = self.ctx.values().by_key(key)?;

        let payload = match raw {
            Value::Object(map) => map,
            other => {
                let mut map = Payload::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let event_id = payload.get("event_id").cloned();

        let event_key = format!("__ui_payload_last_event_id:{key}");
        let fallback_key = format!("__ui_payload_last_fallback:{key}");
        let mut vars = self.ctx.vars.lock();

        match event_id {
            Some(event_id) => {
                if vars.get(&event_key) == Some(&event_id) {
                    return None;
                }
                vars.insert(event_key, event_id);
                Some(payload)
            }
            None => {
                let signature = Value::Object(payload.clone()).to_string();
                if vars.get(&fallback_key).and_then(Value::as_str) == Some(signature.as_str()) {
                    return None;
                }
                vars.insert(fallback_key, json!(signature));
                Some(payload)
            }
        }
    }

    /// Latest view command whose topic matches `pattern`
    /// (e.g. `view.cmd.container_management`), deduped by event id.
    pub fn consume_view_cmd(&self, pattern: &str, filter: &ViewCmdFilter) -> Option<Payload> {
        let pattern = if pattern.trim().is_empty() {
            topics::VIEW_CMD_ALL
        } else {
            pattern.trim()
        };
        let topic_filter = TopicFilter::parse(pattern);
        let command_filter = ViewCmdFilter::normalized(&filter.commands);
        let event_filter = ViewCmdFilter::normalized(&filter.events);

        let best = {
            let data = self.ctx.data.lock();
            let mut best: Option<(String, String, Payload, u64)> = None;
            for (source_id, entry) in &data.bus_last {
                if !topic_filter.matches(&entry.topic) {
                    continue;
                }

                let action = entry.payload.get("action").and_then(Value::as_object);
                let name = action
                    .and_then(|a| a.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                let event = action
                    .and_then(|a| a.get("event"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_lowercase();

                if !command_filter.is_empty() && !command_filter.contains(&name) {
                    continue;
                }
                if !event_filter.is_empty() && !event_filter.contains(&event) {
                    continue;
                }

                if best.as_ref().map(|(_, _, _, seq)| entry.seq > *seq).unwrap_or(true) {
                    best = Some((
                        entry.topic.clone(),
                        source_id.clone(),
                        entry.payload.clone(),
                        entry.seq,
                    ));
                }
            }
            best
        };

        let (topic, source_id, payload, seq) = best?;

        let last_key = format!(
            "__view_cmd_last:{}:{}:{}",
            topic,
            source_id,
            filter.signature()
        );
        let marker = payload.get("event_id").cloned().unwrap_or(json!(seq));
        {
            let mut vars = self.ctx.vars.lock();
            if vars.get(&last_key) == Some(&marker) {
                return None;
            }
            vars.insert(last_key, marker);
        }

        let mut out = payload;
        out.insert(
            "_meta".to_string(),
            json!({ "topic": topic, "source_id": source_id, "seq": seq }),
        );
        Some(out)
    }

    // ----- modal popups -----

    /// Non-blocking confirm popup.
    ///
    /// - `None`: waiting (request published once, no answer yet)
    /// - `Some(true)` / `Some(false)`: confirmed / cancelled
    ///
    /// Panics on an empty key; the chain crashes visibly instead of waiting
    /// on a popup that can never resolve.
    pub fn popup_confirm(&self, key: &str, message: &str) -> Option<bool> {
        let key = key.trim();
        assert!(!key.is_empty(), "popup_confirm requires a non-empty key");

        if let Some(result) = self.ctx.modal.lock().result(key) {
            return Some(truthy(&result));
        }

        if self.ctx.modal.lock().is_pending(key) {
            self.ctx.flow.lock().step_desc = "Waiting for confirmation...".to_string();
            return None;
        }

        self.request_modal(
            key,
            json!({
                "type": "confirm",
                "title": "Confirm",
                "message": message,
                "ok_text": "OK",
                "cancel_text": "Cancel",
            }),
            "Waiting for confirmation...",
        );
        None
    }

    /// Sticky message popup with buttons.
    ///
    /// - `None`: still waiting
    /// - `Some({"clicked": ...})`: operator pressed a button
    /// - `Some({"closed": true})`: closed via `popup_close(key, false)`
    ///
    /// Panics on an empty key.
    pub fn popup_message(
        &self,
        key: &str,
        message: &str,
        status: &str,
        buttons: &[&str],
    ) -> Option<Payload> {
        let key = key.trim();
        assert!(!key.is_empty(), "popup_message requires a non-empty key");

        if let Some(result) = self.ctx.modal.lock().result(key) {
            return Some(result_as_map(result, "result"));
        }

        if self.ctx.modal.lock().is_pending(key) {
            self.ctx.flow.lock().step_desc = "Waiting for operator...".to_string();
            return None;
        }

        let status = match status {
            "error" | "success" => status,
            _ => "info",
        };
        self.request_modal(
            key,
            json!({
                "type": "message",
                "title": "Message",
                "message": message,
                "status": status,
                "buttons": buttons,
            }),
            "Waiting for operator...",
        );
        None
    }

    /// Text input popup. Resolves to `{"ok": bool, "value": ...}`.
    /// Panics on an empty key.
    pub fn popup_input_text(&self, key: &str, message: &str, placeholder: &str) -> Option<Payload> {
        self.popup_input(key, message, "text", placeholder, Value::Null, Value::Null)
    }

    /// Number input popup. Resolves to `{"ok": bool, "value": ...}`.
    /// Panics on an empty key.
    pub fn popup_input_number(
        &self,
        key: &str,
        message: &str,
        default: Option<f64>,
    ) -> Option<Payload> {
        let default = default.map(|d| json!(d)).unwrap_or(Value::Null);
        self.popup_input(key, message, "number", "", default, Value::Null)
    }

    /// Selection popup over fixed options. Panics on an empty key.
    pub fn popup_choose(&self, key: &str, message: &str, options: &[&str]) -> Option<Payload> {
        self.popup_input(key, message, "select", "", Value::Null, json!(options))
    }

    fn popup_input(
        &self,
        key: &str,
        message: &str,
        kind: &str,
        placeholder: &str,
        default: Value,
        options: Value,
    ) -> Option<Payload> {
        let key = key.trim();
        assert!(!key.is_empty(), "popup input requires a non-empty key");

        if let Some(result) = self.ctx.modal.lock().result(key) {
            return Some(match result {
                Value::Object(map) => map,
                other => {
                    let mut map = Payload::new();
                    map.insert("ok".to_string(), json!(true));
                    map.insert("value".to_string(), other);
                    map
                }
            });
        }

        if self.ctx.modal.lock().is_pending(key) {
            self.ctx.flow.lock().step_desc = "Waiting for input...".to_string();
            return None;
        }

        self.request_modal(
            key,
            json!({
                "type": "input",
                "kind": kind,
                "title": "Input",
                "message": message,
                "ok_text": "OK",
                "cancel_text": "Cancel",
                "placeholder": placeholder,
                "default": default,
                "options": options,
            }),
            "Waiting for input...",
        );
        None
    }

    fn request_modal(&self, key: &str, extra: Value, wait_step_desc: &str) {
        let request_id = self.ctx.create_id();
        self.ctx.modal.lock().mark_pending(key, &request_id);

        let mut payload = match extra {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        payload.insert("request_id".to_string(), json!(request_id));
        payload.insert("chain_id".to_string(), json!(self.ctx.chain_id()));
        payload.insert("instance_id".to_string(), json!(self.ctx.instance_id()));
        payload.insert("key".to_string(), json!(key));

        self.ctx.publish_bus(topics::MODAL_REQUEST, payload);
        self.ctx.flow.lock().step_desc = wait_step_desc.to_string();
    }

    /// Close a popup by key. With `clear = true` (the default behavior) the
    /// local modal state resets so the key can be reused immediately; with
    /// `clear = false` a pending `popup_message` resolves to
    /// `{"closed": true}`.
    pub fn popup_close(&self, key: &str, clear: bool) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }

        {
            let mut modal = self.ctx.modal.lock();
            if clear {
                modal.clear_key(key);
            } else if modal.is_pending(key) {
                modal.set_result(key, json!({ "closed": true }));
                modal.clear_pending(key);
            }
        }

        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        self.ctx.publish_bus(topics::MODAL_CLOSE, payload);
    }

    /// Reset one popup key so it can be created again immediately.
    pub fn popup_clear(&self, key: &str) {
        self.ctx.modal.lock().clear_key(key.trim());
    }

    /// Close all active popups and reset local modal state.
    pub fn popup_close_all(&self) {
        self.ctx.modal.lock().clear_all();
        let mut payload = Payload::new();
        payload.insert("close_active".to_string(), json!(true));
        self.ctx.publish_bus(topics::MODAL_CLOSE, payload);
    }

    /// Open a view's wait dialog (spinner) on the UI side.
    pub fn popup_wait_open(&self, key: &str, title: &str, message: &str) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        let event_id = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        self.publish_value(
            key,
            json!({
                "action": "open",
                "title": title,
                "message": message,
                "event_id": event_id,
            }),
        );
    }

    /// Close a wait dialog by key.
    pub fn popup_wait_close(&self, key: &str) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        self.ctx.publish_bus(topics::MODAL_CLOSE, payload);
    }
}

fn result_as_map(result: Value, wrap_key: &str) -> Payload {
    match result {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert(wrap_key.to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sc_bridge::UiBridge;
    use sc_bus::{BusMessage, WorkerBus};
    use sc_common::{topics, Payload};
    use serde_json::json;

    use super::*;

    fn ctx_with_bus() -> (ChainContext, Arc<WorkerBus>) {
        let bus = Arc::new(WorkerBus::new());
        let ctx = ChainContext::new(
            "demo",
            "default",
            Arc::clone(&bus),
            Arc::new(UiBridge::new()),
            Arc::new(|_, _, _| {}),
        );
        (ctx, bus)
    }

    fn push_value(ctx: &ChainContext, key: &str, value: serde_json::Value) {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("value".to_string(), value);
        ctx.apply_bus_message(&BusMessage {
            topic: topics::VALUE_CHANGED.to_string(),
            source: "ui".to_string(),
            source_id: "view".to_string(),
            payload,
        });
    }

    #[test]
    fn consume_command_dedupes_by_event_id() {
        let (ctx, _bus) = ctx_with_bus();
        push_value(&ctx, "packaging.cmd", json!({"cmd": "Start", "event_id": 1}));

        assert_eq!(ctx.ui().consume_command("packaging.cmd"), Some("start".to_string()));
        assert_eq!(ctx.ui().consume_command("packaging.cmd"), None);

        push_value(&ctx, "packaging.cmd", json!({"cmd": "start", "event_id": 2}));
        assert_eq!(ctx.ui().consume_command("packaging.cmd"), Some("start".to_string()));
    }

    #[test]
    fn consume_command_falls_back_to_value_dedupe() {
        let (ctx, _bus) = ctx_with_bus();
        push_value(&ctx, "packaging.cmd", json!("pack"));
        assert_eq!(ctx.ui().consume_command("packaging.cmd"), Some("pack".to_string()));
        assert_eq!(ctx.ui().consume_command("packaging.cmd"), None);

        push_value(&ctx, "packaging.cmd", json!("unpack"));
        assert_eq!(ctx.ui().consume_command("packaging.cmd"), Some("unpack".to_string()));
    }

    #[test]
    fn popup_confirm_state_machine() {
        let (ctx, bus) = ctx_with_bus();
        let sub = bus.subscribe(topics::MODAL_REQUEST);

        // idle -> pending: one request published, returns None
        assert_eq!(ctx.ui().popup_confirm("delete", "Delete container?"), None);
        let request = sub.try_recv().expect("missing MODAL_REQUEST");
        let request_id = request.payload["request_id"].as_str().unwrap().to_string();

        // pending: no second request
        assert_eq!(ctx.ui().popup_confirm("delete", "Delete container?"), None);
        assert!(sub.try_recv().is_none());

        // resolved by matching request id
        assert!(ctx.resolve_modal(&request_id, json!(true)));
        assert_eq!(ctx.ui().popup_confirm("delete", "Delete container?"), Some(true));
        // re-read until cleared
        assert_eq!(ctx.ui().popup_confirm("delete", "Delete container?"), Some(true));

        // close with clear: key reusable, MODAL_CLOSE published
        let close_sub = bus.subscribe(topics::MODAL_CLOSE);
        ctx.ui().popup_close("delete", true);
        assert!(close_sub.try_recv().is_some());
        assert_eq!(ctx.ui().popup_confirm("delete", "Again?"), None);
    }

    #[test]
    #[should_panic(expected = "non-empty key")]
    fn popup_confirm_rejects_empty_key() {
        let (ctx, _bus) = ctx_with_bus();
        ctx.ui().popup_confirm("  ", "Sure?");
    }

    #[test]
    fn popup_message_close_without_clear_resolves_closed() {
        let (ctx, _bus) = ctx_with_bus();
        assert_eq!(ctx.ui().popup_message("hint", "Check the fixture", "info", &[]), None);
        ctx.ui().popup_close("hint", false);
        let result = ctx.ui().popup_message("hint", "Check the fixture", "info", &[]);
        assert_eq!(result, Some(result_as_map(json!({"closed": true}), "result")));
    }

    #[test]
    fn show_normalizes_state_names() {
        let (ctx, _bus) = ctx_with_bus();
        ctx.ui().show(OperatorDisplay {
            instruction: Some("Scan part".to_string()),
            instruction_state: Some(json!("ok")),
            feedback_state: Some(json!("red")),
            ..Default::default()
        });
        assert_eq!(ctx.values().state("work_instruction"), Some(json!("Scan part")));
        assert_eq!(ctx.values().state("work_instruction_state"), Some(json!(1)));
        assert_eq!(ctx.values().state("work_feedback_state"), Some(json!(3)));
    }

    #[test]
    fn consume_view_cmd_matches_wildcard_and_dedupes() {
        let (ctx, _bus) = ctx_with_bus();
        let mut payload = Payload::new();
        payload.insert("cmd".to_string(), json!("refresh"));
        payload.insert("event_id".to_string(), json!(41));
        ctx.apply_bus_message(&BusMessage {
            topic: "view.cmd.container_management".to_string(),
            source: "ui".to_string(),
            source_id: "cm".to_string(),
            payload,
        });

        let filter = ViewCmdFilter::default();
        let cmd = ctx.ui().consume_view_cmd("view.cmd.*", &filter).expect("missing view cmd");
        assert_eq!(cmd["cmd"], json!("refresh"));
        assert_eq!(cmd["_meta"]["topic"], json!("view.cmd.container_management"));

        assert!(ctx.ui().consume_view_cmd("view.cmd.*", &filter).is_none());
    }

    #[test]
    fn inc_state_int_reads_mirror() {
        let (ctx, _bus) = ctx_with_bus();
        assert_eq!(ctx.ui().inc_state_int("part_total", 1), 1);
        assert_eq!(ctx.ui().inc_state_int("part_total", 2), 3);
        assert_eq!(ctx.values().state("part_total"), Some(json!(3)));
    }
}
