//! Payment-gated job admission HTTP service.
//!
//! Callers pay with an on-chain stablecoin transfer (or spend a bounded
//! free tier) before work is admitted. The admission pipeline lives in
//! [`orchestrator`]; results are pushed to caller callbacks with bounded
//! retry and stay pollable as a fallback ([`dispatch`]).
//!
//! All ledgers are in-memory and reset on restart — a documented
//! limitation of this deployment shape, not an accident.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod rate_source;
pub mod validate;
pub mod worker;
