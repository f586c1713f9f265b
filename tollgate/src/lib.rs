//! Core types and ledgers for the tollgate payment-gated job service.
//!
//! This crate holds everything that is chain- and transport-agnostic:
//!
//! - the error taxonomy returned to callers ([`error`])
//! - domain types for payment claims and verified payments ([`types`])
//! - the process-wide ledgers: replay protection, free-tier usage,
//!   rate windows and the idempotency cache ([`ledger`])
//! - pricing strategies and the acceptance-band check ([`pricing`])
//!
//! Chain access lives in `tollgate-svm`; the HTTP service and the
//! request orchestrator live in `tollgate-server`.

pub mod error;
pub mod ledger;
pub mod pricing;
pub mod timestamp;
pub mod types;

pub use error::{GateError, PaymentError, RateLimitError, ValidationError};
pub use timestamp::UnixTimestamp;
pub use types::{AgentId, PaymentClaim, ServiceKind, TxReference, VerifiedPayment};
