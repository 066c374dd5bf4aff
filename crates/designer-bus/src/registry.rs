//! # Subscription Registry
//!
//! Tracks every live subject binding owned by a connection so that none can
//! outlive it: the connection releases them all on close or link loss.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::transport::TransportSid;

/// Unique (per connection) subscription id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// A registered binding.
#[derive(Debug)]
pub(crate) struct SubscriptionRecord {
    pub(crate) id: SubscriptionId,
    pub(crate) subject: String,
    pub(crate) queue: Option<String>,
    pub(crate) sid: TransportSid,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) created_at: Instant,
}

/// Read-only view of a registered binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub subject: String,
    pub queue: Option<String>,
    pub age_ms: u128,
}

/// Registry of active subscriptions for one connection.
pub struct SubscriptionRegistry {
    /// Active subscriptions by id.
    records: DashMap<SubscriptionId, SubscriptionRecord>,
    /// Active subscription count by subject.
    by_subject: DashMap<String, usize>,
    /// Counter for generating subscription ids.
    id_counter: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            by_subject: DashMap::new(),
            id_counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.id_counter.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn insert(&self, record: SubscriptionRecord) {
        *self.by_subject.entry(record.subject.clone()).or_insert(0) += 1;
        debug!(
            subscription_id = %record.id,
            subject = %record.subject,
            queue = ?record.queue,
            "Registered subscription"
        );
        self.records.insert(record.id, record);
    }

    /// Remove a binding and mark it inactive.
    ///
    /// Returns `None` if it was already released.
    pub(crate) fn release(&self, id: SubscriptionId) -> Option<SubscriptionRecord> {
        let (_, record) = self.records.remove(&id)?;
        record.active.store(false, Ordering::SeqCst);

        let now_empty = match self.by_subject.get_mut(&record.subject) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if now_empty {
            self.by_subject.remove_if(&record.subject, |_, count| *count == 0);
        }

        debug!(subscription_id = %id, subject = %record.subject, "Released subscription");
        Some(record)
    }

    /// Release every binding.
    pub(crate) fn release_all(&self) -> Vec<SubscriptionRecord> {
        let ids: Vec<SubscriptionId> = self.records.iter().map(|r| *r.key()).collect();
        ids.into_iter().filter_map(|id| self.release(id)).collect()
    }

    /// Number of active bindings.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records.len()
    }

    /// Number of active bindings on exactly `subject`.
    #[must_use]
    pub fn subject_count(&self, subject: &str) -> usize {
        self.by_subject.get(subject).map(|c| *c).unwrap_or(0)
    }

    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.records.contains_key(&id)
    }

    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.records.get(&id).map(|r| SubscriptionInfo {
            id: r.id,
            subject: r.subject.clone(),
            queue: r.queue.clone(),
            age_ms: r.created_at.elapsed().as_millis(),
        })
    }

    /// Subjects with at least one active binding, sorted.
    #[must_use]
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.by_subject.iter().map(|e| e.key().clone()).collect();
        subjects.sort();
        subjects
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(registry: &SubscriptionRegistry, subject: &str, sid: TransportSid) -> SubscriptionId {
        let id = registry.next_id();
        registry.insert(SubscriptionRecord {
            id,
            subject: subject.to_string(),
            queue: None,
            sid,
            active: Arc::new(AtomicBool::new(true)),
            created_at: Instant::now(),
        });
        id
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SubscriptionRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "0x1");
    }

    #[test]
    fn test_insert_and_release() {
        let registry = SubscriptionRegistry::new();
        let id1 = record(&registry, "workflow.logs.stream", 10);
        let id2 = record(&registry, "workflow.logs.stream", 11);
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.subject_count("workflow.logs.stream"), 2);

        let released = registry.release(id1).unwrap();
        assert_eq!(released.sid, 10);
        assert!(!released.active.load(Ordering::SeqCst));
        assert_eq!(registry.subject_count("workflow.logs.stream"), 1);

        assert!(registry.release(id1).is_none());
        registry.release(id2);
        assert_eq!(registry.subject_count("workflow.logs.stream"), 0);
        assert!(registry.subjects().is_empty());
    }

    #[test]
    fn test_release_all() {
        let registry = SubscriptionRegistry::new();
        record(&registry, "a", 1);
        record(&registry, "b", 2);
        record(&registry, "c", 3);
        assert_eq!(registry.subjects(), vec!["a", "b", "c"]);

        let released = registry.release_all();
        assert_eq!(released.len(), 3);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_get_info() {
        let registry = SubscriptionRegistry::new();
        let id = record(&registry, "designer.inbox.s.r", 7);
        let info = registry.get(id).unwrap();
        assert_eq!(info.subject, "designer.inbox.s.r");
        assert!(registry.contains(id));
    }
}
