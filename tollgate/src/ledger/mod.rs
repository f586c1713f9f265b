//! Process-wide ledgers backing the admission pipeline.
//!
//! All four ledgers are in-memory by design: state is intentionally lost on
//! restart (a documented limitation of the reference deployment, not
//! something this crate papers over). Each ledger owns its map and routes
//! every mutation through its own methods, so swapping a ledger for an
//! external store later means replacing one type, not chasing call sites.
//!
//! Maps are [`dashmap::DashMap`]s and every read-modify-write goes through
//! the entry API, so checks and updates are a single atomic step even when
//! request handlers interleave.

pub mod idempotency;
pub mod rate;
pub mod replay;
pub mod usage;

pub use idempotency::IdempotencyCache;
pub use rate::{FixedWindowLimiter, RateDecision};
pub use replay::{ConsumeContext, ReplayLedger};
pub use usage::UsageLedger;
