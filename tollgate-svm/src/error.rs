//! Error types for chain access.

use tollgate::error::{GateError, UpstreamUnavailable};

/// Failures talking to the chain's read interface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Every configured endpoint failed its health probe.
    #[error("no healthy RPC endpoint available")]
    NoHealthyEndpoint,

    /// An RPC call failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The RPC response could not be normalized into a transaction record.
    /// Not retried: the same response would fail the same way.
    #[error("malformed transaction record: {0}")]
    MalformedRecord(String),

    /// All attempts across all endpoints were exhausted.
    #[error("upstream unavailable after {attempts} attempts: {message}")]
    Unavailable {
        /// Attempts made before giving up.
        attempts: usize,
        /// Last observed failure.
        message: String,
    },
}

impl ChainError {
    /// Whether the retry loop should try again after this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NoHealthyEndpoint | Self::Rpc(_) => true,
            Self::MalformedRecord(_) | Self::Unavailable { .. } => false,
        }
    }
}

impl From<ChainError> for GateError {
    fn from(e: ChainError) -> Self {
        let attempts = match e {
            ChainError::Unavailable { attempts, .. } => attempts,
            _ => 1,
        };
        Self::Upstream(UpstreamUnavailable {
            attempts,
            message: e.to_string(),
        })
    }
}
