//! Short-lived admission response cache.
//!
//! A caller that resubmits the same (identity, resource) pair inside the
//! idempotency window gets the original admission response back unchanged
//! instead of being re-evaluated for payment. This coalesces accidental
//! double-submits without touching any other ledger.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::AgentId;

/// Default idempotency window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct Cached<T> {
    value: T,
    stored_at: Instant,
}

/// Cache of admission responses keyed by `(identity, resource)`.
#[derive(Debug)]
pub struct IdempotencyCache<T> {
    entries: DashMap<String, Cached<T>>,
    ttl: Duration,
}

impl<T: Clone> IdempotencyCache<T> {
    /// Creates a cache with the given window.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn key(agent: &AgentId, resource: &str) -> String {
        format!("{agent}:{resource}")
    }

    /// Returns the cached response for a duplicate resubmission, if any.
    #[must_use]
    pub fn get(&self, agent: &AgentId, resource: &str) -> Option<T> {
        let key = Self::key(agent, resource);
        let entry = self.entries.get(&key)?;
        if entry.stored_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Records the admission response for this `(identity, resource)` pair.
    pub fn put(&self, agent: &AgentId, resource: &str, value: T) {
        self.entries.insert(
            Self::key(agent, resource),
            Cached {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops entries past the window.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| cached.stored_at.elapsed() <= self.ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for IdempotencyCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
