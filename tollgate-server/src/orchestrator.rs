//! The admission pipeline.
//!
//! Every submission walks the same gauntlet, in order: validation, the
//! per-origin and per-agent rate windows, the idempotency cache, then the
//! free tier, and only when that is exhausted payment verification (with
//! atomic replay consumption). Only a submission that clears all of it
//! becomes a job.
//!
//! Payment consumption happens strictly after verification succeeds, and
//! verification itself has no side effects, so a submission that fails
//! anywhere before consumption leaves every ledger untouched and is safe
//! to resubmit as-is.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use tollgate::error::PaymentError;
use tollgate::ledger::{ConsumeContext, FixedWindowLimiter, IdempotencyCache, ReplayLedger, UsageLedger};
use tollgate::pricing::PricingResolver;
use tollgate::types::ServiceKind;
use tollgate_svm::verify::{PaymentVerifier, TransactionSource};

use crate::config::LimitsConfig;
use crate::dispatch::ResultDispatcher;
use crate::error::ApiError;
use crate::validate::{JobRequest, RequestValidator, ValidRequest};
use crate::worker::{JobContext, MediaProcessor};

/// Rate windows are per minute.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Successful admission, returned to the caller and cached for
/// idempotent resubmission.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionResponse {
    /// Identifier for polling and callback correlation.
    pub job_id: String,
    /// Always `"queued"`; jobs are accepted before they run.
    pub status: &'static str,
    /// The admitted operation.
    pub kind: ServiceKind,
    /// Whether the free tier covered this job.
    pub free_tier: bool,
    /// Free operations left, when the free tier was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_free: Option<u32>,
    /// Verified token amount, when a payment was consumed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charged: Option<Decimal>,
    /// Set on responses replayed from the idempotency cache.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
    /// Requests left in the agent's rate window, surfaced as a header.
    #[serde(skip)]
    pub rate_remaining: u32,
    /// The agent window's request cap, surfaced as a header.
    #[serde(skip)]
    pub rate_limit: u32,
    /// Time until the agent's window rolls over, surfaced as a header.
    #[serde(skip)]
    pub rate_resets_in: Duration,
}

/// Counters for the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GateStats {
    /// Transaction references currently held against replay.
    pub consumed_references: usize,
    /// Identities with recorded free-tier usage.
    pub free_tier_identities: usize,
    /// Live rate windows across both limiters.
    pub rate_windows: usize,
    /// Cached admission responses.
    pub idempotency_entries: usize,
}

/// Owns every gate component and runs submissions through them.
pub struct Orchestrator<S> {
    validator: RequestValidator,
    verifier: PaymentVerifier<S>,
    resolver: PricingResolver,
    replay: ReplayLedger,
    usage: UsageLedger,
    agent_limiter: FixedWindowLimiter,
    origin_limiter: FixedWindowLimiter,
    idempotency: IdempotencyCache<AdmissionResponse>,
    dispatcher: Arc<ResultDispatcher>,
    processor: Arc<dyn MediaProcessor>,
}

impl<S> std::fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl<S: TransactionSource> Orchestrator<S> {
    /// Assembles the pipeline.
    #[must_use]
    pub fn new(
        limits: &LimitsConfig,
        verifier: PaymentVerifier<S>,
        resolver: PricingResolver,
        dispatcher: Arc<ResultDispatcher>,
        processor: Arc<dyn MediaProcessor>,
    ) -> Self {
        Self {
            validator: RequestValidator::new(limits.allow_insecure_callbacks),
            verifier,
            resolver,
            replay: ReplayLedger::default(),
            usage: UsageLedger::new(limits.free_tier),
            agent_limiter: FixedWindowLimiter::new(limits.agent_per_minute, RATE_WINDOW),
            origin_limiter: FixedWindowLimiter::new(limits.origin_per_minute, RATE_WINDOW),
            idempotency: IdempotencyCache::default(),
            dispatcher,
            processor,
        }
    }

    /// The pricing resolver, for the pricing endpoint.
    #[must_use]
    pub const fn resolver(&self) -> &PricingResolver {
        &self.resolver
    }

    /// The result store, for the polling endpoint.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<ResultDispatcher> {
        &self.dispatcher
    }

    /// The receiving wallet, for the pricing endpoint.
    #[must_use]
    pub fn recipient(&self) -> &str {
        self.verifier.recipient()
    }

    /// The accepted settlement mint, for the pricing endpoint.
    #[must_use]
    pub fn mint(&self) -> &str {
        self.verifier.mint()
    }

    /// Runs one submission through the gate.
    ///
    /// # Errors
    ///
    /// Every rejection maps to one entry of the error taxonomy; see
    /// [`ApiError`] for the HTTP mapping.
    pub async fn admit(
        &self,
        request: &JobRequest,
        origin: &str,
    ) -> Result<AdmissionResponse, ApiError> {
        let valid = self.validator.validate(request)?;

        let origin_decision = self.origin_limiter.check(origin);
        if !origin_decision.allowed {
            tracing::warn!(origin, "origin rate window exhausted");
            return Err(origin_decision.as_error().into());
        }
        let agent_decision = self.agent_limiter.check(valid.agent.as_str());
        if !agent_decision.allowed {
            tracing::warn!(agent = %valid.agent, "agent rate window exhausted");
            return Err(agent_decision.as_error().into());
        }

        // A resubmission of the same (identity, resource) inside the
        // idempotency window gets the original response back; nothing
        // below this line runs twice for it.
        if let Some(mut cached) = self
            .idempotency
            .get(&valid.agent, valid.resource_url.as_str())
        {
            tracing::info!(agent = %valid.agent, job_id = %cached.job_id, "idempotent resubmission");
            cached.idempotent = true;
            cached.rate_remaining = agent_decision.remaining;
            cached.rate_limit = agent_decision.limit;
            cached.rate_resets_in = agent_decision.resets_in;
            return Ok(cached);
        }

        let quote = self.resolver.quote(valid.kind).await?;

        // The free tier is spent before any supplied payment is looked at,
        // so a caller who attaches a signature while still entitled keeps
        // the reference unspent for later.
        let (free_tier, remaining_free, charged) = if let Some(remaining) =
            self.usage.try_consume_free(&valid.agent)
        {
            if valid.reference.is_some() {
                tracing::info!(
                    agent = %valid.agent,
                    "free tier still available, supplied payment left unconsumed"
                );
            }
            tracing::info!(agent = %valid.agent, remaining, "free tier consumed");
            (true, Some(remaining), None)
        } else if let Some(reference) = &valid.reference {
            // Cheap pre-check; the authoritative answer is the atomic
            // consume after verification.
            if self.replay.contains(reference) {
                return Err(PaymentError::Duplicate.into());
            }

            let min_accepted = self.resolver.tolerance().min_accepted(quote.amount);
            let payment = self.verifier.verify(reference, min_accepted).await?;

            let consumed = self.replay.try_consume(
                reference,
                ConsumeContext {
                    agent: valid.agent.clone(),
                    kind: valid.kind,
                    amount: payment.amount,
                },
            );
            if !consumed {
                // A racing submission spent the reference between the
                // pre-check and here.
                return Err(PaymentError::Duplicate.into());
            }

            tracing::info!(
                agent = %valid.agent,
                reference = %reference,
                amount = %payment.amount,
                slot = payment.slot,
                "payment verified and consumed"
            );
            (false, None, Some(payment.amount))
        } else {
            return Err(ApiError::payment_required(
                self.usage.used(&valid.agent),
                quote,
                self.verifier.recipient().to_owned(),
                self.verifier.mint().to_owned(),
            ));
        };

        let job_id = Uuid::new_v4().to_string();
        self.enqueue(&job_id, &valid);

        let response = AdmissionResponse {
            job_id,
            status: "queued",
            kind: valid.kind,
            free_tier,
            remaining_free,
            charged,
            idempotent: false,
            rate_remaining: agent_decision.remaining,
            rate_limit: agent_decision.limit,
            rate_resets_in: agent_decision.resets_in,
        };
        self.idempotency
            .put(&valid.agent, valid.resource_url.as_str(), response.clone());
        Ok(response)
    }

    /// Spawns the processing task. The result, success or failure, goes
    /// through the dispatcher so it is both pushed and pollable.
    fn enqueue(&self, job_id: &str, valid: &ValidRequest) {
        let job = JobContext {
            job_id: job_id.to_owned(),
            agent: valid.agent.clone(),
            resource_url: valid.resource_url.clone(),
            kind: valid.kind,
        };
        let callback_url = valid.callback_url.clone();
        let processor = Arc::clone(&self.processor);
        let dispatcher = Arc::clone(&self.dispatcher);

        tokio::spawn(async move {
            let payload = match processor.process(&job).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, error = %e, "processing failed");
                    json!({
                        "job_id": job.job_id.clone(),
                        "status": "processing_failed",
                        "error": e.to_string(),
                    })
                }
            };
            dispatcher.store_and_deliver(job.job_id, job.agent, callback_url, payload);
        });
    }

    /// Counters for the health endpoint.
    #[must_use]
    pub fn stats(&self) -> GateStats {
        GateStats {
            consumed_references: self.replay.len(),
            free_tier_identities: self.usage.tracked_identities(),
            rate_windows: self.agent_limiter.tracked_identities()
                + self.origin_limiter.tracked_identities(),
            idempotency_entries: self.idempotency.len(),
        }
    }

    /// One pass of ledger housekeeping, run from the background sweep.
    pub fn sweep(&self) {
        self.replay.evict_expired();
        self.agent_limiter.evict_expired();
        self.origin_limiter.evict_expired();
        self.idempotency.purge_expired();
        self.dispatcher.purge_expired();
    }
}
