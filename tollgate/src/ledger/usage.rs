//! Free-tier usage tracking.

use dashmap::DashMap;

use crate::types::AgentId;

/// Per-identity counter of free-tier operations consumed.
///
/// The counter only moves through [`UsageLedger::try_consume_free`], which
/// grants and increments in one atomic step, so the entitlement can never
/// be handed out past the cap even under concurrent requests.
#[derive(Debug)]
pub struct UsageLedger {
    counts: DashMap<AgentId, u32>,
    cap: u32,
}

impl UsageLedger {
    /// Creates a ledger granting `cap` free operations per identity.
    #[must_use]
    pub fn new(cap: u32) -> Self {
        Self {
            counts: DashMap::new(),
            cap,
        }
    }

    /// The configured free-tier cap.
    #[must_use]
    pub const fn cap(&self) -> u32 {
        self.cap
    }

    /// Attempts to consume one free-tier operation. Returns the remaining
    /// allowance on success, or `None` when the identity has exhausted its
    /// free tier (the counter is left untouched).
    pub fn try_consume_free(&self, agent: &AgentId) -> Option<u32> {
        let mut used = self.counts.entry(agent.clone()).or_insert(0);
        if *used < self.cap {
            *used += 1;
            Some(self.cap - *used)
        } else {
            None
        }
    }

    /// Free-tier operations already consumed by the identity.
    #[must_use]
    pub fn used(&self, agent: &AgentId) -> u32 {
        self.counts.get(agent).map_or(0, |c| *c)
    }

    /// Number of identities with recorded usage.
    #[must_use]
    pub fn tracked_identities(&self) -> usize {
        self.counts.len()
    }
}
