//! Worker → UI outbox messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sc_common::Payload;

/// Notification severity, mapped to the UI toolkit's notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Positive,
    Negative,
    Warning,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Info => "info",
            NotifyKind::Positive => "positive",
            NotifyKind::Negative => "negative",
            NotifyKind::Warning => "warning",
        }
    }
}

/// One queued UI operation.
///
/// This is a closed set: UI-driven actions travel over the bus instead of
/// scheduling arbitrary callables on the UI thread.
#[derive(Debug, Clone)]
pub enum UiMsg {
    /// Set one attribute on AppState.
    Patch { key: String, value: Value },
    /// Set many AppState attributes (initial sync / resync).
    ReplaceState { values: Payload },
    /// Show a notification.
    Notify { message: String, kind: NotifyKind },
    /// Record an active error.
    ErrorEvent {
        error_id: String,
        source: String,
        message: String,
        details: String,
    },
    /// Remove a previously recorded error.
    ErrorResolved { error_id: String },
    /// Ask the UI thread to publish a full AppState snapshot.
    RequestUiState,
}
