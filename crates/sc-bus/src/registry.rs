//! Generic subscriber table shared by the worker bus and the UI bridge.
//!
//! Locking discipline: the table lock is held only to register/remove
//! subscriptions and to snapshot the matching senders during delivery.
//! Enqueueing happens outside the lock; mailboxes are unbounded crossbeam
//! channels, so delivery never blocks on a slow subscriber.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::topic::TopicFilter;
use crate::{BusError, Result};

struct SubEntry<M> {
    mailbox_id: u64,
    filter: TopicFilter,
    sender: Sender<M>,
}

/// Topic-keyed subscriber table with exact and prefix filters.
pub struct TopicRegistry<M> {
    entries: Mutex<Vec<SubEntry<M>>>,
    next_mailbox_id: AtomicU64,
}

impl<M> Default for TopicRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> TopicRegistry<M> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_mailbox_id: AtomicU64::new(1),
        }
    }

    fn register(&self, filter: TopicFilter, mailbox_id: u64, sender: Sender<M>) {
        self.entries.lock().push(SubEntry {
            mailbox_id,
            filter,
            sender,
        });
    }

    fn remove(&self, mailbox_id: u64, filter: &TopicFilter) {
        self.entries
            .lock()
            .retain(|e| !(e.mailbox_id == mailbox_id && &e.filter == filter));
    }

    /// Number of currently registered subscription entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<M: Clone> TopicRegistry<M> {
    /// Subscribe to one exact topic or wildcard pattern.
    pub fn subscribe(registry: &Arc<Self>, topic: &str) -> Subscription<M> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mailbox_id = registry.next_mailbox_id.fetch_add(1, Ordering::Relaxed);
        let filter = TopicFilter::parse(topic);
        registry.register(filter.clone(), mailbox_id, sender);
        Subscription {
            registry: Arc::clone(registry),
            filter,
            mailbox_id,
            receiver,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to several topics sharing one mailbox.
    pub fn subscribe_many(registry: &Arc<Self>, topics: &[&str]) -> Result<MultiSubscription<M>> {
        if topics.is_empty() {
            return Err(BusError::NoTopics);
        }
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mailbox_id = registry.next_mailbox_id.fetch_add(1, Ordering::Relaxed);
        let filters: Vec<TopicFilter> = topics.iter().map(|t| TopicFilter::parse(t)).collect();
        for filter in &filters {
            registry.register(filter.clone(), mailbox_id, sender.clone());
        }
        Ok(MultiSubscription {
            registry: Arc::clone(registry),
            filters,
            mailbox_id,
            receiver,
            closed: AtomicBool::new(false),
        })
    }

    /// Deliver a message to every subscription whose filter matches `topic`.
    ///
    /// A mailbox registered under several matching filters receives the
    /// message once. Returns the number of mailboxes reached.
    pub fn deliver(&self, topic: &str, message: &M) -> usize {
        let targets: Vec<Sender<M>> = {
            let entries = self.entries.lock();
            let mut seen: HashSet<u64> = HashSet::new();
            entries
                .iter()
                .filter(|e| e.filter.matches(topic))
                .filter(|e| seen.insert(e.mailbox_id))
                .map(|e| e.sender.clone())
                .collect()
        };

        let mut delivered = 0;
        for sender in targets {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Handle for a single-topic subscription; closing detaches its mailbox.
pub struct Subscription<M> {
    registry: Arc<TopicRegistry<M>>,
    filter: TopicFilter,
    mailbox_id: u64,
    receiver: Receiver<M>,
    closed: AtomicBool,
}

impl<M> Subscription<M> {
    pub fn topic(&self) -> String {
        self.filter.as_topic()
    }

    /// Non-blocking dequeue.
    pub fn try_recv(&self) -> Option<M> {
        self.receiver.try_recv().ok()
    }

    /// Blocking dequeue with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<M> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Unsubscribe. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.remove(self.mailbox_id, &self.filter);
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle for multiple topic subscriptions sharing one mailbox.
pub struct MultiSubscription<M> {
    registry: Arc<TopicRegistry<M>>,
    filters: Vec<TopicFilter>,
    mailbox_id: u64,
    receiver: Receiver<M>,
    closed: AtomicBool,
}

impl<M> MultiSubscription<M> {
    pub fn topics(&self) -> Vec<String> {
        self.filters.iter().map(TopicFilter::as_topic).collect()
    }

    pub fn try_recv(&self) -> Option<M> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<M> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Close all member subscriptions. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for filter in &self.filters {
            self.registry.remove(self.mailbox_id, filter);
        }
    }
}

impl<M> Drop for MultiSubscription<M> {
    fn drop(&mut self) {
        self.close();
    }
}
