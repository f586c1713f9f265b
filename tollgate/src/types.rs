//! Domain types for payment claims and verified payments.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::timestamp::UnixTimestamp;

/// Maximum accepted length for a caller-supplied agent identity.
pub const MAX_AGENT_ID_LEN: usize = 100;

/// Caller identity. Opaque to the service; used as the key for free-tier
/// usage and per-identity rate windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AgentId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::new("agent_id is required"));
        }
        if s.len() > MAX_AGENT_ID_LEN {
            return Err(ValidationError::new(format!(
                "agent_id too long (max {MAX_AGENT_ID_LEN} chars)"
            )));
        }
        Ok(Self(s.to_owned()))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier naming one on-chain transaction (a base58 signature
/// on Solana). The service never interprets it beyond chain lookup and
/// replay bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxReference(String);

impl TxReference {
    /// Wraps a raw reference string.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The priced operations the service offers. A priority job skips the
/// queue and carries a higher price tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Standard processing.
    Standard,
    /// Priority processing at the elevated tier.
    Priority,
}

impl ServiceKind {
    /// Pricing-table key for the operation.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Standard => "process",
            Self::Priority => "process_priority",
        }
    }

    /// All priced operations, in display order.
    #[must_use]
    pub const fn all() -> [Self; 2] {
        [Self::Standard, Self::Priority]
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A caller's claim that a payment was made. Transient, created per
/// request; carries no proof until verified against chain state.
#[derive(Debug, Clone)]
pub struct PaymentClaim {
    /// The claimed transaction reference.
    pub reference: TxReference,
    /// The operation the payment is claimed to cover.
    pub kind: ServiceKind,
    /// The paying caller.
    pub agent: AgentId,
}

/// A payment confirmed against chain state. Produced once per successful
/// verification; immutable thereafter.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPayment {
    /// The consumed transaction reference.
    pub reference: TxReference,
    /// Token amount received by the service account.
    pub amount: Decimal,
    /// Mint of the received token.
    pub mint: String,
    /// The service's receiving account.
    pub recipient: String,
    /// Best-effort payer identification. Inferred from fee-balance
    /// movement, unreliable when a third party sponsors fees; never used
    /// for authorization.
    pub payer: Option<String>,
    /// Chain timestamp of the transaction.
    pub block_time: UnixTimestamp,
    /// Chain sequence number (slot).
    pub slot: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_rejects_empty_and_oversized() {
        assert!("".parse::<AgentId>().is_err());
        assert!("a".repeat(MAX_AGENT_ID_LEN + 1).parse::<AgentId>().is_err());
        let ok: AgentId = "agent_7".parse().unwrap();
        assert_eq!(ok.as_str(), "agent_7");
    }

    #[test]
    fn service_kind_keys() {
        assert_eq!(ServiceKind::Standard.key(), "process");
        assert_eq!(ServiceKind::Priority.key(), "process_priority");
    }
}
