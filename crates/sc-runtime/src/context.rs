//! Per-chain execution environment.
//!
//! A [`ChainContext`] is the only surface a running script sees. It owns the
//! chain's step machine, persistent vars, the mirrored bus/app-state views
//! and the modal bookkeeping. The supervisor thread writes the mirrors while
//! the chain's tick thread reads them, so every mutable cell is a small
//! dedicated mutex held only for short operations; a long tick never blocks a
//! drain and a drain never delays a tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};

use sc_bridge::{SendCmd, UiBridge};
use sc_bus::{BusMessage, WorkerBus};
use sc_common::commands::workers::SCRIPT_RUNTIME;
use sc_common::{topics, Payload};

use crate::apis::flow::FlowApi;
use crate::apis::timing::TimingApi;
use crate::apis::ui::UiApi;
use crate::apis::values::ValuesApi;
use crate::apis::vars::VarsApi;
use crate::apis::views::ViewsApi;
use crate::apis::workers::WorkersApi;

/// Step machine and tick bookkeeping. Locked briefly by the tick thread at
/// tick boundaries and by the supervisor for pause/retry/snapshot.
pub(crate) struct FlowState {
    pub step: i64,
    pub next_step: i64,
    pub step_desc: String,
    pub step_started: Instant,
    pub cycle_count: u64,
    pub cycle_time_s: f64,
    pub step_time_ms: f64,
    pub paused: bool,
    pub error_flag: bool,
    pub error_message: String,
}

impl FlowState {
    fn new() -> Self {
        Self {
            step: 0,
            next_step: 0,
            step_desc: "-".to_string(),
            step_started: Instant::now(),
            cycle_count: 0,
            cycle_time_s: 0.1,
            step_time_ms: 0.0,
            paused: false,
            error_flag: false,
            error_message: String::new(),
        }
    }

    pub fn step_elapsed_s(&self) -> f64 {
        self.step_started.elapsed().as_secs_f64()
    }
}

/// Latest message per source id, any topic. Drives view-command consumption.
pub(crate) struct LastBusEntry {
    pub topic: String,
    pub payload: Payload,
    pub seq: u64,
}

/// Mirror of bus traffic, keyed the way scripts query it.
#[derive(Default)]
pub(crate) struct BusMirror {
    /// Latest `VALUE_CHANGED` payload per (source, source_id).
    pub values: HashMap<String, HashMap<String, Payload>>,
    /// Latest payload per (source_id, topic) for non-value topics.
    pub events: HashMap<String, HashMap<String, Payload>>,
    /// Which source_id last reported per source.
    pub last_seen_by_source: HashMap<String, String>,
    /// Latest message per source_id regardless of topic.
    pub bus_last: HashMap<String, LastBusEntry>,
}

impl BusMirror {
    /// Most recent `VALUE_CHANGED` payload for a source, any source_id.
    pub fn last_payload(&self, source: &str) -> Option<&Payload> {
        let by_id = self.values.get(source)?;
        if let Some(last_id) = self.last_seen_by_source.get(source) {
            if let Some(payload) = by_id.get(last_id) {
                return Some(payload);
            }
        }
        by_id.values().next()
    }
}

/// Modal popup bookkeeping, one slot per popup key.
#[derive(Default)]
pub(crate) struct ModalState {
    pending: HashMap<String, String>,
    results: HashMap<String, Value>,
    key_by_request: HashMap<String, String>,
}

impl ModalState {
    pub fn mark_pending(&mut self, key: &str, request_id: &str) {
        self.pending.insert(key.to_string(), request_id.to_string());
        self.key_by_request
            .insert(request_id.to_string(), key.to_string());
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn clear_pending(&mut self, key: &str) {
        if let Some(request_id) = self.pending.remove(key) {
            self.key_by_request.remove(&request_id);
        }
    }

    /// Stored result for a key; stays readable until cleared.
    pub fn result(&self, key: &str) -> Option<Value> {
        self.results.get(key).cloned()
    }

    pub fn set_result(&mut self, key: &str, result: Value) {
        self.results.insert(key.to_string(), result);
    }

    /// Route a response by request id. Responses whose id is not the pending
    /// one for any key are ignored.
    pub fn resolve_request(&mut self, request_id: &str, result: Value) -> bool {
        match self.key_by_request.remove(request_id) {
            Some(key) => {
                self.pending.remove(&key);
                self.results.insert(key, result);
                true
            }
            None => false,
        }
    }

    /// Reset one key so it can be reused immediately.
    pub fn clear_key(&mut self, key: &str) {
        self.clear_pending(key);
        self.results.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.pending.clear();
        self.results.clear();
        self.key_by_request.clear();
    }
}

/// The execution environment handed to a chain's entry function.
pub struct ChainContext {
    chain_id: String,
    script_name: String,
    instance_id: String,
    pub(crate) bus: Arc<WorkerBus>,
    pub(crate) bridge: Arc<UiBridge>,
    pub(crate) send_cmd: SendCmd,

    pub(crate) flow: Mutex<FlowState>,
    pub(crate) vars: Mutex<Payload>,
    pub(crate) ui_state: Mutex<Payload>,
    pub(crate) data: Mutex<BusMirror>,
    pub(crate) app_state: Mutex<Payload>,
    pub(crate) modal: Mutex<ModalState>,

    pub(crate) suppress_slow_tick_once: AtomicBool,
    bus_seq: AtomicU64,
}

impl ChainContext {
    pub fn new(
        script_name: &str,
        instance_id: &str,
        bus: Arc<WorkerBus>,
        bridge: Arc<UiBridge>,
        send_cmd: SendCmd,
    ) -> Self {
        Self {
            chain_id: format!("{script_name}:{instance_id}"),
            script_name: script_name.to_string(),
            instance_id: instance_id.to_string(),
            bus,
            bridge,
            send_cmd,
            flow: Mutex::new(FlowState::new()),
            vars: Mutex::new(Payload::new()),
            ui_state: Mutex::new(Payload::new()),
            data: Mutex::new(BusMirror::default()),
            app_state: Mutex::new(Payload::new()),
            modal: Mutex::new(ModalState::default()),
            suppress_slow_tick_once: AtomicBool::new(false),
            bus_seq: AtomicU64::new(1),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Fresh correlation id for request/response interactions.
    pub fn create_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    // ----- sub-APIs -----

    pub fn flow(&self) -> FlowApi<'_> {
        FlowApi { ctx: self }
    }

    pub fn timing(&self) -> TimingApi<'_> {
        TimingApi { ctx: self }
    }

    pub fn vars(&self) -> VarsApi<'_> {
        VarsApi { ctx: self }
    }

    pub fn values(&self) -> ValuesApi<'_> {
        ValuesApi { ctx: self }
    }

    pub fn ui(&self) -> UiApi<'_> {
        UiApi { ctx: self }
    }

    pub fn workers(&self) -> WorkersApi<'_> {
        WorkersApi { ctx: self }
    }

    pub fn views(&self) -> ViewsApi<'_> {
        ViewsApi { ctx: self }
    }

    // ----- supervisor-side mirror updates -----

    pub(crate) fn apply_bus_message(&self, msg: &BusMessage) {
        let seq = self.bus_seq.fetch_add(1, Ordering::Relaxed);
        let mut data = self.data.lock();
        data.bus_last.insert(
            msg.source_id.clone(),
            LastBusEntry {
                topic: msg.topic.clone(),
                payload: msg.payload.clone(),
                seq,
            },
        );

        if msg.topic == topics::VALUE_CHANGED {
            data.values
                .entry(msg.source.clone())
                .or_default()
                .insert(msg.source_id.clone(), msg.payload.clone());
            data.last_seen_by_source
                .insert(msg.source.clone(), msg.source_id.clone());
        } else {
            data.events
                .entry(msg.source_id.clone())
                .or_default()
                .insert(msg.topic.clone(), msg.payload.clone());
        }
    }

    pub(crate) fn replace_app_state(&self, values: Payload) {
        *self.app_state.lock() = values;
    }

    pub(crate) fn update_app_state(&self, key: &str, value: Value) {
        self.app_state.lock().insert(key.to_string(), value);
    }

    /// Deliver a modal response. Returns false for unknown request ids.
    pub(crate) fn resolve_modal(&self, request_id: &str, result: Value) -> bool {
        self.modal.lock().resolve_request(request_id, result)
    }

    pub(crate) fn take_suppress_slow_tick(&self) -> bool {
        self.suppress_slow_tick_once.swap(false, Ordering::SeqCst)
    }

    /// Publish on the bus as this chain.
    pub(crate) fn publish_bus(&self, topic: &str, payload: Payload) {
        self.bus.publish(topic, SCRIPT_RUNTIME, &self.chain_id, payload);
    }

    /// Operator-facing snapshot for `UPDATE_CHAIN_STATE`. The `data` entry
    /// carries the chain vars, which is where scripts put their visible
    /// outputs.
    pub(crate) fn state_snapshot(&self) -> Payload {
        let (step, step_desc, step_time, step_elapsed, cycle_count, error_flag, error_message, paused) = {
            let flow = self.flow.lock();
            (
                flow.step,
                flow.step_desc.clone(),
                flow.step_time_ms,
                flow.step_elapsed_s(),
                flow.cycle_count,
                flow.error_flag,
                flow.error_message.clone(),
                flow.paused,
            )
        };
        let vars = self.vars.lock().clone();

        let mut map = Payload::new();
        map.insert("chain_id".to_string(), json!(self.chain_id));
        map.insert("step".to_string(), json!(step));
        map.insert("step_desc".to_string(), json!(step_desc));
        map.insert("step_time".to_string(), json!(step_time));
        map.insert("step_elapsed_s".to_string(), json!(step_elapsed));
        map.insert("cycle_count".to_string(), json!(cycle_count));
        map.insert("error_flag".to_string(), json!(error_flag));
        map.insert("error_message".to_string(), json!(error_message));
        map.insert("paused".to_string(), json!(paused));
        map.insert("data".to_string(), Value::Object(vars));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_bridge::UiBridge;
    use sc_bus::WorkerBus;

    fn test_context() -> ChainContext {
        ChainContext::new(
            "demo",
            "default",
            Arc::new(WorkerBus::new()),
            Arc::new(UiBridge::new()),
            Arc::new(|_, _, _| {}),
        )
    }

    fn value_changed(source: &str, source_id: &str, key: &str, value: Value) -> BusMessage {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("value".to_string(), value);
        BusMessage {
            topic: topics::VALUE_CHANGED.to_string(),
            source: source.to_string(),
            source_id: source_id.to_string(),
            payload,
        }
    }

    #[test]
    fn value_changed_lands_in_values_mirror() {
        let ctx = test_context();
        ctx.apply_bus_message(&value_changed("tcp_client", "s1", "message", json!("HELLO")));

        let data = ctx.data.lock();
        assert_eq!(data.values["tcp_client"]["s1"]["value"], json!("HELLO"));
        assert_eq!(data.last_seen_by_source["tcp_client"], "s1");
        assert_eq!(data.bus_last["s1"].topic, topics::VALUE_CHANGED);
    }

    #[test]
    fn other_topics_land_in_events_mirror() {
        let ctx = test_context();
        let mut payload = Payload::new();
        payload.insert("reason".to_string(), json!("cable pulled"));
        ctx.apply_bus_message(&BusMessage {
            topic: topics::CLIENT_DISCONNECTED.to_string(),
            source: "tcp_client".to_string(),
            source_id: "s1".to_string(),
            payload,
        });

        let data = ctx.data.lock();
        assert!(data.events["s1"].contains_key(topics::CLIENT_DISCONNECTED));
        assert!(data.values.is_empty());
    }

    #[test]
    fn modal_resolution_requires_matching_request_id() {
        let ctx = test_context();
        {
            let mut modal = ctx.modal.lock();
            modal.mark_pending("delete", "req-1");
        }

        assert!(!ctx.resolve_modal("stale-id", json!(true)));
        assert!(ctx.modal.lock().result("delete").is_none());

        assert!(ctx.resolve_modal("req-1", json!(true)));
        assert!(!ctx.modal.lock().is_pending("delete"));
        assert_eq!(ctx.modal.lock().result("delete"), Some(json!(true)));

        // Result survives re-reads until cleared.
        assert_eq!(ctx.modal.lock().result("delete"), Some(json!(true)));
        ctx.modal.lock().clear_key("delete");
        assert!(ctx.modal.lock().result("delete").is_none());
    }
}
