//! Error taxonomy for the payment-gated request pipeline.
//!
//! Every rejection a caller can observe maps to exactly one variant here,
//! and every variant carries a stable machine-readable code. Gate failures
//! (validation, rate limit, payment) are returned synchronously and never
//! retried by the service; upstream and delivery failures are retried
//! transparently and only surfaced through the stored result.

use std::time::Duration;

use rust_decimal::Decimal;

/// Top-level error type for admission and delivery operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Unknown job or transaction reference.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Payment missing, invalid, expired or already consumed.
    #[error("{0}")]
    Payment(#[from] PaymentError),

    /// Per-identity or per-origin quota exceeded.
    #[error("{0}")]
    RateLimit(#[from] RateLimitError),

    /// All chain endpoints or the pricing source failed.
    #[error("{0}")]
    Upstream(#[from] UpstreamUnavailable),

    /// Callback unreachable after all retries. Non-fatal to the job.
    #[error("{0}")]
    Delivery(#[from] DeliveryError),
}

impl GateError {
    /// Stable machine-readable code for the error, suitable for API bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Payment(e) => e.code(),
            Self::RateLimit(_) => "RATE_LIMITED",
            Self::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            Self::Delivery(_) => "DELIVERY_FAILED",
        }
    }
}

/// Malformed or missing request input.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid request: {}", errors.join("; "))]
pub struct ValidationError {
    /// One message per failed check.
    pub errors: Vec<String>,
}

impl ValidationError {
    /// Creates a validation error from a single message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }

    /// Creates a validation error from a list of failed checks.
    #[must_use]
    pub const fn from_errors(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

/// A referenced entity does not exist.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotFoundError {
    /// No job with the given id is known (or it aged out of retention).
    #[error("job not found: {0}")]
    Job(String),
}

/// Payment gate failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    /// Free tier exhausted and no payment reference was supplied.
    #[error("free tier exhausted, payment required")]
    Required {
        /// Free-tier operations already consumed by this identity.
        free_tier_used: u32,
    },

    /// The claimed transaction does not exist on chain (yet).
    #[error("transaction not found on chain")]
    TxNotFound,

    /// The transaction is older than the freshness window.
    #[error("transaction is {age_secs}s old, exceeds freshness window")]
    Expired {
        /// Age of the transaction at verification time.
        age_secs: u64,
    },

    /// No transfer of the expected token to the receiving account.
    #[error("no transfer of token {mint} to the receiving account")]
    NoTransferFound {
        /// The expected token mint.
        mint: String,
    },

    /// The transferred amount is below the acceptance band.
    #[error("insufficient payment: received {received}, required {required}")]
    Insufficient {
        /// Minimum acceptable amount (target minus tolerance).
        required: Decimal,
        /// Amount actually received.
        received: Decimal,
    },

    /// The transaction reference was already consumed.
    #[error("transaction already used for a previous request")]
    Duplicate,
}

impl PaymentError {
    /// Stable machine-readable code for the payment failure.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Required { .. } => "PAYMENT_REQUIRED",
            Self::TxNotFound => "TRANSACTION_NOT_FOUND",
            Self::Expired { .. } => "TRANSACTION_EXPIRED",
            Self::NoTransferFound { .. } => "NO_TRANSFER_FOUND",
            Self::Insufficient { .. } => "INSUFFICIENT_PAYMENT",
            Self::Duplicate => "DUPLICATE_PAYMENT",
        }
    }
}

/// Request volume quota exceeded.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
pub struct RateLimitError {
    /// How long the caller must wait before the window rolls over.
    pub retry_after: Duration,
    /// Requests allowed per window, surfaced in rate-limit headers.
    pub limit: u32,
}

/// All configured upstream endpoints failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream unavailable after {attempts} attempts: {message}")]
pub struct UpstreamUnavailable {
    /// Total attempts made across retries.
    pub attempts: usize,
    /// Last observed failure.
    pub message: String,
}

/// Callback delivery exhausted its retry budget.
#[derive(Debug, Clone, thiserror::Error)]
#[error("delivery failed after {attempts} attempts: {last_error}")]
pub struct DeliveryError {
    /// Delivery attempts made.
    pub attempts: u32,
    /// Last observed delivery failure.
    pub last_error: String,
}
