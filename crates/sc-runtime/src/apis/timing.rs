//! Cycle and timeout helpers.

use crate::context::ChainContext;

/// Smallest allowed cycle time. Anything at or below zero is clamped here.
const MIN_CYCLE_TIME_S: f64 = 0.001;

pub struct TimingApi<'a> {
    pub(crate) ctx: &'a ChainContext,
}

impl TimingApi<'_> {
    /// Set the minimum wall-time between ticks of this chain.
    pub fn set_cycle_time(&self, seconds: f64) {
        let value = if !seconds.is_finite() {
            0.1
        } else if seconds <= 0.0 {
            MIN_CYCLE_TIME_S
        } else {
            seconds
        };
        self.ctx.flow.lock().cycle_time_s = value;
    }

    pub fn cycle_time(&self) -> f64 {
        self.ctx.flow.lock().cycle_time_s
    }

    /// Seconds spent in the current step.
    pub fn step_seconds(&self) -> f64 {
        self.ctx.flow.lock().step_elapsed_s().max(0.0)
    }

    /// True once the current step has run for at least `seconds`.
    pub fn timeout(&self, seconds: f64) -> bool {
        if !seconds.is_finite() {
            return false;
        }
        if seconds <= 0.0 {
            return true;
        }
        self.step_seconds() >= seconds
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sc_bridge::UiBridge;
    use sc_bus::WorkerBus;

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
    fn cycle_time_is_clamped() {
        let ctx = ctx();
        ctx.timing().set_cycle_time(0.0);
        assert_eq!(ctx.timing().cycle_time(), 0.001);
        ctx.timing().set_cycle_time(-5.0);
        assert_eq!(ctx.timing().cycle_time(), 0.001);
        ctx.timing().set_cycle_time(f64::NAN);
        assert_eq!(ctx.timing().cycle_time(), 0.1);
        ctx.timing().set_cycle_time(2.0);
        assert_eq!(ctx.timing().cycle_time(), 2.0);
    }

    #[test]
    fn timeout_semantics() {
        let ctx = ctx();
        assert!(ctx.timing().timeout(0.0));
        assert!(!ctx.timing().timeout(60.0));
        assert!(!ctx.timing().timeout(f64::NAN));
        assert!(ctx.timing().step_seconds() >= 0.0);
    }
}
