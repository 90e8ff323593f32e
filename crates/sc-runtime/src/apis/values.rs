//! Read-only access to the mirrored bus values and AppState.

use std::collections::HashMap;

use serde_json::Value;

use sc_common::Payload;

use crate::context::ChainContext;

pub struct ValuesApi<'a> {
    pub(crate) ctx: &'a ChainContext,
}

impl ValuesApi<'_> {
    /// Latest `VALUE_CHANGED` payload for one (source, source_id).
    pub fn payload(&self, source: &str, source_id: &str) -> Option<Payload> {
        self.ctx
            .data
            .lock()
            .values
            .get(source)
            .and_then(|by_id| by_id.get(source_id))
            .cloned()
    }

    /// Latest reported value for one (source, source_id).
    pub fn latest(&self, source: &str, source_id: &str) -> Option<Value> {
        self.payload(source, source_id)
            .and_then(|p| p.get("value").cloned())
    }

    /// Value for a key on one (source, source_id). Checks the latest payload
    /// first, then scans the source's cache.
    pub fn get(&self, source: &str, source_id: &str, key: &str) -> Option<Value> {
        let data = self.ctx.data.lock();
        let by_id = data.values.get(source)?;

        if let Some(payload) = by_id.get(source_id) {
            if payload.get("key").and_then(Value::as_str) == Some(key) {
                return payload.get("value").cloned();
            }
        }

        by_id
            .values()
            .find(|payload| payload.get("key").and_then(Value::as_str) == Some(key))
            .and_then(|payload| payload.get("value").cloned())
    }

    /// Find a value by key across all sources: most recent payload per
    /// source first, then a full scan.
    pub fn by_key(&self, key: &str) -> Option<Value> {
        let data = self.ctx.data.lock();

        for source in data.values.keys() {
            if let Some(payload) = data.last_payload(source) {
                if payload.get("key").and_then(Value::as_str) == Some(key) {
                    return payload.get("value").cloned();
                }
            }
        }

        for by_id in data.values.values() {
            for payload in by_id.values() {
                if payload.get("key").and_then(Value::as_str) == Some(key) {
                    return payload.get("value").cloned();
                }
            }
        }

        None
    }

    /// All cached payloads for one source.
    pub fn source(&self, source: &str) -> HashMap<String, Payload> {
        self.ctx
            .data
            .lock()
            .values
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Full copy of the value mirror.
    pub fn all(&self) -> HashMap<String, HashMap<String, Payload>> {
        self.ctx.data.lock().values.clone()
    }

    /// One AppState value mirrored into this chain.
    pub fn state(&self, key: &str) -> Option<Value> {
        self.ctx.app_state.lock().get(key).cloned()
    }

    /// Full mirrored AppState snapshot.
    pub fn state_all(&self) -> Payload {
        self.ctx.app_state.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sc_bridge::UiBridge;
    use sc_bus::{BusMessage, WorkerBus};
    use sc_common::{topics, Payload};
    use serde_json::json;

    use crate::context::ChainContext;

    fn ctx() -> ChainContext {
        ChainContext::new(
            "demo",
            "default",
            Arc::new(WorkerBus::new()),
            Arc::new(UiBridge::new()),
            Arc::new(|_, _, _| {}),
        )
    }

    fn push_value(ctx: &ChainContext, source: &str, source_id: &str, key: &str, value: serde_json::Value) {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("value".to_string(), value);
        ctx.apply_bus_message(&BusMessage {
            topic: topics::VALUE_CHANGED.to_string(),
            source: source.to_string(),
            source_id: source_id.to_string(),
            payload,
        });
    }

    #[test]
    fn get_matches_latest_payload_then_scans() {
        let ctx = ctx();
        push_value(&ctx, "twincat", "plc1", "temp", json!(21.5));
        push_value(&ctx, "twincat", "plc2", "pressure", json!(3));

        assert_eq!(ctx.values().get("twincat", "plc1", "temp"), Some(json!(21.5)));
        // Key lives on another source_id of the same worker: scan finds it.
        assert_eq!(ctx.values().get("twincat", "plc1", "pressure"), Some(json!(3)));
        assert_eq!(ctx.values().get("twincat", "plc1", "missing"), None);
        assert_eq!(ctx.values().get("opcua", "plc1", "temp"), None);
    }

    #[test]
    fn by_key_prefers_most_recent_per_source() {
        let ctx = ctx();
        push_value(&ctx, "ui", "packaging", "packaging.cmd", json!({"cmd": "old"}));
        push_value(&ctx, "ui", "packaging", "packaging.cmd", json!({"cmd": "new"}));

        assert_eq!(
            ctx.values().by_key("packaging.cmd"),
            Some(json!({"cmd": "new"}))
        );
        assert_eq!(ctx.values().by_key("nothing"), None);
    }

    #[test]
    fn state_reads_the_mirror() {
        let ctx = ctx();
        ctx.update_app_state("part_total", json!(12));
        assert_eq!(ctx.values().state("part_total"), Some(json!(12)));
        assert_eq!(ctx.values().state_all()["part_total"], json!(12));
        assert_eq!(ctx.values().state("unset"), None);
    }

    #[test]
    fn latest_returns_value_field() {
        let ctx = ctx();
        push_value(&ctx, "tcp_client", "s1", "message", json!("HELLO"));
        assert_eq!(ctx.values().latest("tcp_client", "s1"), Some(json!("HELLO")));
        assert_eq!(ctx.values().latest("tcp_client", "s2"), None);
    }
}
