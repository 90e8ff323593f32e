//! Bus topics shared by all workers and the runtime.
//!
//! Payload contracts:
//!
//! `ERROR`: `{ "key": str|null, "action": str, "error": str }`
//!
//! `CLIENT_CONNECTED`: `{}`
//!
//! `CLIENT_DISCONNECTED`: `{ "reason": str }`
//!
//! `VALUE_CHANGED`: `{ "key": str, "value": any }`
//!
//! `WRITE_FINISHED`: `{ "key": str }`
//!
//! `WRITE_ERROR`: `{ "key": str|null, "error": str, "action": "write" }`
//!
//! `MODAL_REQUEST`: `{ "type", "request_id", "chain_id", "key", "title",
//! "message", ... }` (fields depend on the popup kind)
//!
//! `MODAL_RESPONSE`: `{ "request_id", "chain_id", "key", "type", "result" }`
//!
//! `MODAL_CLOSE`: `{ "key": str }` or `{ "close_active": true }`

pub const ERROR: &str = "ERROR";
pub const CLIENT_CONNECTED: &str = "CLIENT_CONNECTED";
pub const CLIENT_DISCONNECTED: &str = "CLIENT_DISCONNECTED";
pub const VALUE_CHANGED: &str = "VALUE_CHANGED";
pub const WORKER_STATUS_CHANGED: &str = "WORKER_STATUS_CHANGED";
pub const WRITE_FINISHED: &str = "WRITE_FINISHED";
pub const WRITE_ERROR: &str = "WRITE_ERROR";

pub const MODAL_REQUEST: &str = "MODAL_REQUEST";
pub const MODAL_RESPONSE: &str = "MODAL_RESPONSE";
pub const MODAL_CLOSE: &str = "MODAL_CLOSE";

/// Wildcard pattern covering all view command topics.
pub const VIEW_CMD_ALL: &str = "view.cmd.*";

/// Topic for UI-originated commands of a single view.
pub fn view_cmd(view: &str) -> String {
    format!("view.cmd.{}", view.trim())
}

/// `VALUE_CHANGED` key that drives a view's wait dialog.
pub fn view_wait_key(view: &str) -> String {
    format!("view.wait.{}", view.trim())
}

/// UiBridge topic for a single AppState key change.
pub fn state_key(key: &str) -> String {
    format!("state.{key}")
}

/// UiBridge topic carrying full or partial AppState snapshots.
pub const STATE: &str = "state";
/// Wildcard pattern covering per-key AppState change topics.
pub const STATE_ALL: &str = "state.*";

/// UiBridge topic published when a notification is shown.
pub const UI_NOTIFY: &str = "ui.notify";
/// UiBridge topics for the active-error collection.
pub const ERRORS_UPSERT: &str = "errors.upsert";
pub const ERRORS_RESOLVED: &str = "errors.resolved";
