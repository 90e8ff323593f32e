//! The bridge itself: outbox, flush, UI-side subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, trace, warn};

use sc_bus::registry::{MultiSubscription, Subscription, TopicRegistry};
use sc_bus::Result;
use sc_common::{topics, Payload};

use crate::app_state::AppState;
use crate::errors::ActiveErrors;
use crate::outbox::{NotifyKind, UiMsg};
use crate::ActiveError;

/// Event delivered to UI-side subscribers.
#[derive(Debug, Clone)]
pub struct UiBusMessage {
    pub topic: String,
    pub payload: Payload,
}

/// Where notifications end up. The UI layer installs a sink that renders
/// toasts; headless setups keep the logging default.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, kind: NotifyKind);
}

/// Default sink: notifications go to the log.
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, message: &str, kind: NotifyKind) {
        info!(kind = kind.as_str(), message, "ui notification");
    }
}

/// Hook used to forward worker commands; the bridge does not interpret them.
pub type SendCmd = Arc<dyn Fn(&str, &str, Payload) + Send + Sync>;

/// Thread-safe bridge between background worker threads and the UI thread.
///
/// Worker API (any thread): `emit_patch`, `emit_replace_state`,
/// `emit_notify`, `emit_error`, `emit_error_resolved`, `request_ui_state`,
/// `send_cmd`.
///
/// UI API (UI thread only): [`UiBridge::flush`], `subscribe`,
/// `subscribe_many`, `ui_publish_event`.
pub struct UiBridge {
    outbox_tx: Sender<UiMsg>,
    outbox_rx: Receiver<UiMsg>,
    dirty: AtomicBool,
    stop: AtomicBool,
    registry: Arc<TopicRegistry<UiBusMessage>>,
    errors: ActiveErrors,
    notifier: Mutex<Arc<dyn NotificationSink>>,
    command_router: Mutex<Option<SendCmd>>,
}

impl Default for UiBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl UiBridge {
    pub fn new() -> Self {
        let (outbox_tx, outbox_rx) = crossbeam_channel::unbounded();
        Self {
            outbox_tx,
            outbox_rx,
            dirty: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            registry: Arc::new(TopicRegistry::new()),
            errors: ActiveErrors::default(),
            notifier: Mutex::new(Arc::new(LogNotificationSink)),
            command_router: Mutex::new(None),
        }
    }

    /// Install the sink that renders notifications on the UI thread.
    pub fn set_notification_sink(&self, sink: Arc<dyn NotificationSink>) {
        *self.notifier.lock() = sink;
    }

    /// Install the closure that routes worker commands to their workers.
    pub fn set_command_router(&self, router: SendCmd) {
        *self.command_router.lock() = Some(router);
    }

    /// Forward a command to a named worker. Not interpreted by the bridge.
    pub fn send_cmd(&self, worker: &str, command: &str, payload: Payload) {
        let router = self.command_router.lock().clone();
        match router {
            Some(router) => router(worker, command, payload),
            None => warn!(worker, command, "send_cmd dropped: no command router installed"),
        }
    }

    // ----- worker → UI (thread-safe enqueue) -----

    pub fn emit_patch(&self, key: &str, value: Value) {
        self.enqueue(UiMsg::Patch {
            key: key.to_string(),
            value,
        });
    }

    pub fn emit_replace_state(&self, values: Payload) {
        self.enqueue(UiMsg::ReplaceState { values });
    }

    pub fn emit_notify(&self, message: &str, kind: NotifyKind) {
        self.enqueue(UiMsg::Notify {
            message: message.to_string(),
            kind,
        });
    }

    pub fn emit_error(&self, error_id: &str, source: &str, message: &str, details: &str) {
        self.enqueue(UiMsg::ErrorEvent {
            error_id: error_id.to_string(),
            source: source.to_string(),
            message: message.to_string(),
            details: details.to_string(),
        });
    }

    pub fn emit_error_resolved(&self, error_id: &str) {
        self.enqueue(UiMsg::ErrorResolved {
            error_id: error_id.to_string(),
        });
    }

    /// Ask the UI thread to publish a full AppState snapshot.
    pub fn request_ui_state(&self) {
        self.enqueue(UiMsg::RequestUiState);
    }

    fn enqueue(&self, msg: UiMsg) {
        // Unbounded outbox; send only fails if the bridge itself is gone.
        let _ = self.outbox_tx.send(msg);
        self.dirty.store(true, Ordering::SeqCst);
    }

    // ----- lifecycle -----

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    // ----- active errors -----

    pub fn active_errors(&self) -> Vec<ActiveError> {
        self.errors.list()
    }

    pub fn active_error_count(&self) -> usize {
        self.errors.count()
    }

    // ----- UI-side subscriptions -----

    pub fn subscribe(&self, topic: &str) -> Subscription<UiBusMessage> {
        TopicRegistry::subscribe(&self.registry, topic)
    }

    pub fn subscribe_many(&self, topics: &[&str]) -> Result<MultiSubscription<UiBusMessage>> {
        TopicRegistry::subscribe_many(&self.registry, topics)
    }

    /// UI thread: publish an event to bridge subscribers immediately.
    /// Intended for UI → workers signalling.
    pub fn ui_publish_event(&self, topic: &str, payload: Payload) {
        self.deliver(topic.to_string(), payload);
    }

    // ----- UI thread flush -----

    /// Apply queued messages to the state. Cheap when idle (dirty flag);
    /// processes at most `max_items` per call and re-flags itself when
    /// messages remain, so the next UI tick resumes the drain.
    ///
    /// Always mutates `state` first, then publishes the derived event.
    pub fn flush(&self, state: &mut AppState, max_items: usize) -> usize {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return 0;
        }

        let mut processed = 0;
        while processed < max_items {
            let msg = match self.outbox_rx.try_recv() {
                Ok(msg) => msg,
                Err(_) => break,
            };

            match msg {
                UiMsg::Patch { key, value } => self.apply_patch(state, &key, value),
                UiMsg::ReplaceState { values } => self.apply_replace_state(state, values),
                UiMsg::Notify { message, kind } => {
                    self.notifier.lock().notify(&message, kind);
                    self.deliver(
                        topics::UI_NOTIFY.to_string(),
                        payload_of(json!({ "message": message, "type": kind.as_str() })),
                    );
                }
                UiMsg::ErrorEvent {
                    error_id,
                    source,
                    message,
                    details,
                } => {
                    self.errors.upsert(&error_id, &source, &message, &details);
                    self.deliver(
                        topics::ERRORS_UPSERT.to_string(),
                        payload_of(json!({
                            "error_id": error_id,
                            "source": source,
                            "message": message,
                            "details": details,
                        })),
                    );
                    self.sync_error_count(state);
                }
                UiMsg::ErrorResolved { error_id } => {
                    self.errors.resolve(&error_id);
                    self.deliver(
                        topics::ERRORS_RESOLVED.to_string(),
                        payload_of(json!({ "error_id": error_id })),
                    );
                    self.sync_error_count(state);
                }
                UiMsg::RequestUiState => {
                    self.deliver(topics::STATE.to_string(), state.snapshot());
                }
            }

            processed += 1;
        }

        if !self.outbox_rx.is_empty() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        processed
    }

    // ----- helpers: apply state then publish events -----

    fn apply_patch(&self, state: &mut AppState, key: &str, value: Value) {
        state.set(key, value.clone());
        let mut payload = Payload::new();
        payload.insert(key.to_string(), value);
        self.deliver(topics::state_key(key), payload);
    }

    fn apply_replace_state(&self, state: &mut AppState, values: Payload) {
        for (key, value) in &values {
            state.set(key, value.clone());
        }
        self.deliver(topics::STATE.to_string(), values);
    }

    fn sync_error_count(&self, state: &mut AppState) {
        let count = self.errors.count() as i64;
        state.set("error_count", json!(count));
        self.deliver(
            topics::state_key("error_count"),
            payload_of(json!({ "error_count": count })),
        );
    }

    fn deliver(&self, topic: String, payload: Payload) {
        let delivered = self.registry.deliver(
            &topic,
            &UiBusMessage {
                topic: topic.clone(),
                payload,
            },
        );
        trace!(topic = %topic, delivered, "ui bridge event");
    }
}

fn payload_of(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}
