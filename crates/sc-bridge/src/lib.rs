//! StepChain UI Bridge
//!
//! Thread-safe bridge between background worker threads and the UI thread:
//! - Outbox: workers enqueue state patches, notifications and error events;
//!   the UI thread applies them via [`UiBridge::flush`]
//! - AppState: the declared-field record mirrored into chain contexts
//! - UI-side subscriptions with the same topic model as the worker bus
//!
//! Workers never touch [`AppState`] directly. `flush()` mutates the state
//! first and publishes the derived event second, so subscribers always
//! observe a state that already contains the change.

mod app_state;
mod bridge;
mod errors;
mod outbox;

pub use app_state::AppState;
pub use bridge::{LogNotificationSink, NotificationSink, SendCmd, UiBridge, UiBusMessage};
pub use errors::ActiveError;
pub use outbox::{NotifyKind, UiMsg};
