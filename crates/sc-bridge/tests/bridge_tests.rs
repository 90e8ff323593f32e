//! UiBridge behavior tests
//!
//! - Flush applies state before publishing the derived event
//! - Per-key and bulk state events
//! - Notification delivery through the sink
//! - Active-error bookkeeping and error_count resync
//! - max_items budget with dirty-flag carryover

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use sc_bridge::{AppState, NotificationSink, NotifyKind, UiBridge};
use sc_common::Payload;

struct CountingSink {
    count: AtomicUsize,
}

impl NotificationSink for CountingSink {
    fn notify(&self, _message: &str, _kind: NotifyKind) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn payload_of(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[test]
fn patch_updates_state_then_publishes_event() {
    let bridge = UiBridge::new();
    let mut state = AppState::default();
    let sub = bridge.subscribe("state.job_status");

    bridge.emit_patch("job_status", json!("Running"));
    let processed = bridge.flush(&mut state, 200);

    assert_eq!(processed, 1);
    assert_eq!(state.job_status, "Running");
    let event = sub.try_recv().expect("missing state.job_status event");
    assert_eq!(event.payload["job_status"], json!("Running"));
}

#[test]
fn replace_state_publishes_the_mutated_map() {
    let bridge = UiBridge::new();
    let mut state = AppState::default();
    let sub = bridge.subscribe("state");

    bridge.emit_replace_state(payload_of(json!({
        "part_good": 3,
        "part_bad": 1,
        "station_mode": "setup",
    })));
    bridge.flush(&mut state, 200);

    assert_eq!(state.part_good, 3);
    assert_eq!(state.part_bad, 1);
    assert_eq!(state.get("station_mode"), Some(json!("setup")));

    let event = sub.try_recv().expect("missing state event");
    assert_eq!(event.payload.len(), 3);
    assert_eq!(event.payload["station_mode"], json!("setup"));
}

#[test]
fn wildcard_state_subscription_sees_every_key() {
    let bridge = UiBridge::new();
    let mut state = AppState::default();
    let sub = bridge.subscribe("state.*");

    bridge.emit_patch("part_total", json!(9));
    bridge.emit_patch("work_feedback", json!("OK"));
    bridge.flush(&mut state, 200);

    let first = sub.try_recv().unwrap();
    let second = sub.try_recv().unwrap();
    assert_eq!(first.topic, "state.part_total");
    assert_eq!(second.topic, "state.work_feedback");
}

#[test]
fn notify_goes_through_sink_and_topic() {
    let bridge = UiBridge::new();
    let sink = Arc::new(CountingSink {
        count: AtomicUsize::new(0),
    });
    bridge.set_notification_sink(sink.clone());
    let sub = bridge.subscribe("ui.notify");
    let mut state = AppState::default();

    bridge.emit_notify("Scan the next part", NotifyKind::Warning);
    bridge.flush(&mut state, 200);

    assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    let event = sub.try_recv().unwrap();
    assert_eq!(event.payload["type"], json!("warning"));
}

#[test]
fn errors_upsert_resolve_and_resync_count() {
    let bridge = UiBridge::new();
    let mut state = AppState::default();
    let sub = bridge
        .subscribe_many(&["errors.upsert", "errors.resolved", "state.error_count"])
        .unwrap();

    bridge.emit_error("e1", "tcp_client", "link down", "socket reset");
    bridge.flush(&mut state, 200);
    assert_eq!(state.error_count, 1);
    assert_eq!(bridge.active_error_count(), 1);

    let upsert = sub.try_recv().unwrap();
    assert_eq!(upsert.topic, "errors.upsert");
    let count_event = sub.try_recv().unwrap();
    assert_eq!(count_event.topic, "state.error_count");
    assert_eq!(count_event.payload["error_count"], json!(1));

    bridge.emit_error_resolved("e1");
    bridge.flush(&mut state, 200);
    assert_eq!(state.error_count, 0);
    assert_eq!(bridge.active_error_count(), 0);
    assert_eq!(sub.try_recv().unwrap().topic, "errors.resolved");
}

#[test]
fn request_ui_state_publishes_full_snapshot() {
    let bridge = UiBridge::new();
    let mut state = AppState::default();
    state.set("container_number", json!("C-7"));
    let sub = bridge.subscribe("state");

    bridge.request_ui_state();
    bridge.flush(&mut state, 200);

    let event = sub.try_recv().unwrap();
    assert_eq!(event.payload["container_number"], json!("C-7"));
    assert_eq!(event.payload["device_status"], json!("Disconnected"));
}

#[test]
fn flush_respects_max_items_and_redirties() {
    let bridge = UiBridge::new();
    let mut state = AppState::default();

    for i in 0..10 {
        bridge.emit_patch("part_total", json!(i));
    }

    assert_eq!(bridge.flush(&mut state, 4), 4);
    assert_eq!(state.part_total, 3);

    // Remaining messages are picked up by the next tick.
    assert_eq!(bridge.flush(&mut state, 200), 6);
    assert_eq!(state.part_total, 9);

    // Idle flush is a no-op.
    assert_eq!(bridge.flush(&mut state, 200), 0);
}

#[test]
fn send_cmd_routes_through_installed_hook() {
    let bridge = UiBridge::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::<(String, String)>::new()));
    let seen_in_hook = Arc::clone(&seen);
    bridge.set_command_router(Arc::new(move |worker, command, _payload| {
        seen_in_hook
            .lock()
            .push((worker.to_string(), command.to_string()));
    }));

    bridge.send_cmd("tcp_client", "tcp.send", Payload::new());

    let seen = seen.lock();
    assert_eq!(seen.as_slice(), &[("tcp_client".to_string(), "tcp.send".to_string())]);
}

#[test]
fn stop_flag_is_visible_to_pollers() {
    let bridge = UiBridge::new();
    assert!(!bridge.stopped());
    bridge.stop();
    assert!(bridge.stopped());
}
