//! Replay protection for consumed transaction references.
//!
//! A reference that bought one unit of work must never buy a second one.
//! Consumption is a single atomic insert-if-absent: two racing requests for
//! the same reference cannot both observe "not yet consumed", because the
//! losing request finds the entry the winner just inserted.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;

use crate::types::{AgentId, ServiceKind, TxReference};

/// Default retention for consumed references. The chain freshness window is
/// five minutes, so anything older than this can no longer verify anyway.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Context recorded with a consumed reference, for audit logging.
#[derive(Debug, Clone)]
pub struct ConsumeContext {
    /// The caller that spent the reference.
    pub agent: AgentId,
    /// The operation it paid for.
    pub kind: ServiceKind,
    /// The verified amount.
    pub amount: Decimal,
}

#[derive(Debug)]
struct ConsumedReference {
    context: ConsumeContext,
    recorded_at: Instant,
}

fn log_consumed(reference: &TxReference, context: &ConsumeContext) {
    tracing::debug!(
        reference = %reference,
        agent = %context.agent,
        kind = %context.kind,
        amount = %context.amount,
        "transaction reference recorded as consumed"
    );
}

/// Global ledger of consumed transaction references.
#[derive(Debug)]
pub struct ReplayLedger {
    entries: DashMap<TxReference, ConsumedReference>,
    retention: Duration,
}

impl Default for ReplayLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl ReplayLedger {
    /// Creates a ledger with the given retention window.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    /// Atomically consumes a reference. Returns `true` if this call was the
    /// first to consume it, `false` if it was already spent.
    ///
    /// An entry past its retention window counts as absent: the freshness
    /// check in verification already rejects transactions that old, so
    /// re-consuming an expired slot cannot double-spend.
    pub fn try_consume(&self, reference: &TxReference, context: ConsumeContext) -> bool {
        let record = ConsumedReference {
            context,
            recorded_at: Instant::now(),
        };
        match self.entries.entry(reference.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().recorded_at.elapsed() > self.retention {
                    log_consumed(reference, &record.context);
                    occupied.insert(record);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                log_consumed(reference, &record.context);
                vacant.insert(record);
                true
            }
        }
    }

    /// Whether a reference is currently recorded as consumed.
    #[must_use]
    pub fn contains(&self, reference: &TxReference) -> bool {
        self.entries
            .get(reference)
            .is_some_and(|e| e.recorded_at.elapsed() <= self.retention)
    }

    /// Removes entries past the retention window. Returns how many were
    /// dropped. Called from the background eviction task.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|reference, entry| {
            let keep = entry.recorded_at.elapsed() <= self.retention;
            if !keep {
                tracing::debug!(
                    reference = %reference,
                    agent = %entry.context.agent,
                    kind = %entry.context.kind,
                    amount = %entry.context.amount,
                    "expired replay entry evicted"
                );
            }
            keep
        });
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            tracing::debug!(dropped, "evicted expired replay entries");
        }
        dropped
    }

    /// Number of references currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn context() -> ConsumeContext {
        ConsumeContext {
            agent: "agent_a".parse().unwrap(),
            kind: ServiceKind::Standard,
            amount: Decimal::new(25, 2),
        }
    }

    #[test]
    fn consumes_at_most_once() {
        let ledger = ReplayLedger::default();
        let reference = TxReference::new("sig1");
        assert!(ledger.try_consume(&reference, context()));
        assert!(!ledger.try_consume(&reference, context()));
        assert!(ledger.contains(&reference));
    }

    #[test]
    fn expired_entry_counts_as_absent() {
        let ledger = ReplayLedger::new(Duration::ZERO);
        let reference = TxReference::new("sig2");
        assert!(ledger.try_consume(&reference, context()));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!ledger.contains(&reference));
        assert!(ledger.try_consume(&reference, context()));
    }

    #[test]
    fn eviction_drops_only_expired() {
        let ledger = ReplayLedger::new(Duration::from_millis(20));
        ledger.try_consume(&TxReference::new("old"), context());
        std::thread::sleep(Duration::from_millis(40));
        ledger.try_consume(&TxReference::new("fresh"), context());
        assert_eq!(ledger.evict_expired(), 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(&TxReference::new("fresh")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_consumption_has_exactly_one_winner() {
        let ledger = Arc::new(ReplayLedger::default());
        let reference = TxReference::new("contested");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = Arc::clone(&ledger);
            let reference = reference.clone();
            handles.push(tokio::spawn(async move {
                ledger.try_consume(&reference, context())
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
