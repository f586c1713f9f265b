//! Payment verification against chain state.
//!
//! Verification is deliberately side-effect free: it fetches the claimed
//! transaction, checks freshness, computes the token delta for the
//! receiving account and compares it to the acceptance band. Registering
//! the reference in the replay ledger is the caller's job — that split
//! makes a failed or repeated verification safe to retry.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use tollgate::error::{GateError, PaymentError};
use tollgate::timestamp::UnixTimestamp;
use tollgate::types::{TxReference, VerifiedPayment};

use crate::error::ChainError;
use crate::record::TransactionRecord;

/// Read access to confirmed transactions. Implemented by
/// [`crate::rpc::RpcGateway`] in production and by fixtures in tests.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Fetches a transaction by reference. `Ok(None)` means the chain does
    /// not know the reference (yet).
    async fn fetch_transaction(
        &self,
        reference: &TxReference,
    ) -> Result<Option<TransactionRecord>, ChainError>;
}

/// Verifier parameters.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// The service's receiving wallet address.
    pub recipient: String,
    /// Mint of the accepted settlement token.
    pub mint: String,
    /// Maximum accepted transaction age. Stale references are rejected
    /// even before the replay ledger is consulted.
    pub freshness: Duration,
}

impl VerifierConfig {
    /// Creates a config with the standard five-minute freshness window.
    #[must_use]
    pub fn new(recipient: impl Into<String>, mint: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            mint: mint.into(),
            freshness: Duration::from_secs(5 * 60),
        }
    }
}

/// Confirms that a claimed transaction paid the service.
#[derive(Debug)]
pub struct PaymentVerifier<S> {
    source: S,
    config: VerifierConfig,
}

impl<S: TransactionSource> PaymentVerifier<S> {
    /// Creates a verifier over a transaction source.
    pub const fn new(source: S, config: VerifierConfig) -> Self {
        Self { source, config }
    }

    /// The verifier's receiving account.
    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.config.recipient
    }

    /// Mint of the accepted settlement token.
    #[must_use]
    pub fn mint(&self) -> &str {
        &self.config.mint
    }

    /// Verifies that `reference` contains a qualifying transfer of at
    /// least `min_accepted` (the target amount minus tolerance, re-derived
    /// by the caller at verification time) to the receiving account.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::TxNotFound`] — unknown reference, or no chain
    ///   timestamp yet
    /// - [`PaymentError::Expired`] — older than the freshness window
    /// - [`PaymentError::NoTransferFound`] — no positive delta of the
    ///   expected token to the receiving account
    /// - [`PaymentError::Insufficient`] — delta below the band
    /// - [`GateError::Upstream`] — chain access failed after retries
    pub async fn verify(
        &self,
        reference: &TxReference,
        min_accepted: Decimal,
    ) -> Result<VerifiedPayment, GateError> {
        let record = self
            .source
            .fetch_transaction(reference)
            .await?
            .ok_or(PaymentError::TxNotFound)?;

        // No block time means the transaction hasn't settled into a
        // confirmed block yet; the caller should retry shortly.
        let block_time = record.block_time.ok_or(PaymentError::TxNotFound)?;
        let age_secs = block_time.saturating_age(UnixTimestamp::now());
        if age_secs > self.config.freshness.as_secs() {
            return Err(PaymentError::Expired { age_secs }.into());
        }

        if !record.succeeded {
            return Err(PaymentError::NoTransferFound {
                mint: self.config.mint.clone(),
            }
            .into());
        }

        let received = record.token_delta(&self.config.recipient, &self.config.mint);
        if received <= Decimal::ZERO {
            tracing::debug!(
                reference = %reference,
                mint_present = record.mentions_mint(&self.config.mint),
                "no qualifying transfer to receiving account"
            );
            return Err(PaymentError::NoTransferFound {
                mint: self.config.mint.clone(),
            }
            .into());
        }

        if received < min_accepted {
            return Err(PaymentError::Insufficient {
                required: min_accepted,
                received,
            }
            .into());
        }

        Ok(VerifiedPayment {
            reference: reference.clone(),
            amount: received,
            mint: self.config.mint.clone(),
            recipient: self.config.recipient.clone(),
            payer: record.infer_payer(),
            block_time,
            slot: record.slot,
        })
    }
}
