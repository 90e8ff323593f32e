//! StepChain Worker Bus
//!
//! In-process topic-based pub/sub between I/O workers and the script runtime:
//! - Exact and wildcard (`prefix.*`) subscriptions
//! - One unbounded FIFO mailbox per subscription
//! - Multi-topic subscriptions sharing a single mailbox
//! - Publish-time dedupe so a shared mailbox sees each message at most once
//!
//! The subscriber table is also exposed as a generic [`TopicRegistry`] so the
//! UI bridge can reuse the same topic model for UI-bound events.

pub mod registry;
pub mod topic;

mod bus;

pub use bus::{BusMessage, WorkerBus};
pub use registry::{MultiSubscription, Subscription, TopicRegistry};
pub use topic::TopicFilter;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("subscribe_many requires at least one topic")]
    NoTopics,
}

pub type Result<T> = std::result::Result<T, BusError>;
