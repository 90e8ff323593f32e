//! Active-error collection maintained by the bridge.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One unresolved error reported by a worker or the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveError {
    pub error_id: String,
    pub source: String,
    pub message: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Insertion-ordered store of unresolved errors, keyed by error id.
#[derive(Default)]
pub(crate) struct ActiveErrors {
    entries: Mutex<IndexMap<String, ActiveError>>,
}

impl ActiveErrors {
    pub(crate) fn upsert(&self, error_id: &str, source: &str, message: &str, details: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(error_id.to_string())
            .or_insert_with(|| ActiveError {
                error_id: error_id.to_string(),
                source: source.to_string(),
                message: message.to_string(),
                details: details.to_string(),
                created_at: Utc::now(),
            });
        entry.source = source.to_string();
        entry.message = message.to_string();
        entry.details = details.to_string();
    }

    pub(crate) fn resolve(&self, error_id: &str) -> bool {
        self.entries.lock().shift_remove(error_id).is_some()
    }

    pub(crate) fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn list(&self) -> Vec<ActiveError> {
        self.entries.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_resolve() {
        let errors = ActiveErrors::default();
        errors.upsert("e1", "tcp_client", "link down", "");
        errors.upsert("e1", "tcp_client", "link still down", "");
        errors.upsert("e2", "opcua", "endpoint lost", "details");
        assert_eq!(errors.count(), 2);
        assert_eq!(errors.list()[0].message, "link still down");

        assert!(errors.resolve("e1"));
        assert!(!errors.resolve("e1"));
        assert_eq!(errors.count(), 1);
    }
}
