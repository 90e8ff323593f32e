//! Step-flow operations (goto/fail/pause).

use crate::context::ChainContext;

pub struct FlowApi<'a> {
    pub(crate) ctx: &'a ChainContext,
}

impl FlowApi<'_> {
    /// Current step number.
    pub fn step(&self) -> i64 {
        self.ctx.flow.lock().step
    }

    /// Step the chain will enter at the end of this tick.
    pub fn next_step(&self) -> i64 {
        self.ctx.flow.lock().next_step
    }

    pub fn step_desc(&self) -> String {
        self.ctx.flow.lock().step_desc.clone()
    }

    pub fn set_step_desc(&self, desc: &str) {
        self.ctx.flow.lock().step_desc = desc.to_string();
    }

    pub fn cycle_count(&self) -> u64 {
        self.ctx.flow.lock().cycle_count
    }

    /// Request a step transition. Takes effect at the end of the tick; the
    /// step timer resets only if the target differs from the current step.
    pub fn goto(&self, step: i64, desc: &str) {
        let mut flow = self.ctx.flow.lock();
        flow.next_step = step;
        if !desc.is_empty() {
            flow.step_desc = desc.to_string();
        }
    }

    pub fn fail(&self, message: &str) {
        let mut flow = self.ctx.flow.lock();
        flow.error_flag = true;
        flow.error_message = message.to_string();
    }

    pub fn clear_error(&self) {
        let mut flow = self.ctx.flow.lock();
        flow.error_flag = false;
        flow.error_message.clear();
    }

    pub fn error_flag(&self) -> bool {
        self.ctx.flow.lock().error_flag
    }

    pub fn pause(&self) {
        self.ctx.flow.lock().paused = true;
    }

    pub fn resume(&self) {
        self.ctx.flow.lock().paused = false;
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
    fn goto_sets_next_step_and_desc() {
        let ctx = ctx();
        ctx.flow().goto(20, "waiting");
        assert_eq!(ctx.flow().step(), 0);
        assert_eq!(ctx.flow().next_step(), 20);
        assert_eq!(ctx.flow().step_desc(), "waiting");

        // Empty desc keeps the previous one.
        ctx.flow().goto(30, "");
        assert_eq!(ctx.flow().step_desc(), "waiting");
    }

    #[test]
    fn fail_and_clear_error() {
        let ctx = ctx();
        ctx.flow().fail("fixture blocked");
        assert!(ctx.flow().error_flag());
        ctx.flow().clear_error();
        assert!(!ctx.flow().error_flag());
        assert_eq!(ctx.flow.lock().error_message, "");
    }
}
