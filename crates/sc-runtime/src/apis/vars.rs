//! Persistent per-chain variables for scripts.
//!
//! Vars live as long as the chain instance; reloads keep them, STOP_CHAIN
//! discards them. The runtime also publishes them as the chain's `data` in
//! `UPDATE_CHAIN_STATE`, so anything a script sets here is visible to
//! operators.

use serde_json::{json, Value};

use sc_common::convert::to_f64;

use crate::context::ChainContext;

pub struct VarsApi<'a> {
    pub(crate) ctx: &'a ChainContext,
}

impl VarsApi<'_> {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.ctx.vars.lock().get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn set(&self, key: &str, value: Value) {
        self.ctx.vars.lock().insert(key.to_string(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.ctx.vars.lock().contains_key(key)
    }

    pub fn pop(&self, key: &str) -> Option<Value> {
        self.ctx.vars.lock().remove(key)
    }

    pub fn delete(&self, key: &str) {
        self.ctx.vars.lock().remove(key);
    }

    pub fn clear(&self) {
        self.ctx.vars.lock().clear();
    }

    /// Add `amount` to a numeric var (missing or non-numeric counts as 0).
    /// Returns the new value.
    pub fn inc(&self, key: &str, amount: f64) -> f64 {
        let mut vars = self.ctx.vars.lock();
        let current = vars.get(key).map(|v| to_f64(v, 0.0)).unwrap_or(0.0);
        let next = current + amount;
        vars.insert(key.to_string(), json!(next));
        next
    }

    pub fn as_dict(&self) -> sc_common::Payload {
        self.ctx.vars.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sc_bridge::UiBridge;
    use sc_bus::WorkerBus;
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

    #[test]
    fn set_get_roundtrip() {
        let ctx = ctx();
        ctx.vars().set("serial", json!("SN-1"));
        assert_eq!(ctx.vars().get("serial"), Some(json!("SN-1")));
        assert_eq!(ctx.vars().get_or("missing", json!(0)), json!(0));
        assert!(ctx.vars().has("serial"));
    }

    #[test]
    fn pop_and_clear() {
        let ctx = ctx();
        ctx.vars().set("a", json!(1));
        ctx.vars().set("b", json!(2));
        assert_eq!(ctx.vars().pop("a"), Some(json!(1)));
        assert_eq!(ctx.vars().pop("a"), None);
        ctx.vars().clear();
        assert!(ctx.vars().as_dict().is_empty());
    }

    #[test]
    fn inc_counts_from_zero_and_strings() {
        let ctx = ctx();
        assert_eq!(ctx.vars().inc("count", 1.0), 1.0);
        assert_eq!(ctx.vars().inc("count", 2.0), 3.0);
        ctx.vars().set("count", json!("4"));
        assert_eq!(ctx.vars().inc("count", 1.0), 5.0);
    }
}
