//! Pricing strategies and the payment acceptance band.
//!
//! Two strategies exist, selected per deployment:
//!
//! - **Fixed** — the token is stable-valued, so the charged amount equals
//!   the USD target one-to-one and the tolerance is a small absolute value.
//! - **Oracle-backed** — the token is volatile; a periodically refreshed
//!   exchange rate converts USD targets to token amounts, cached for a TTL
//!   with a hard-coded fallback when the refresh fails, and the tolerance
//!   is a percentage band to absorb drift between quote and payment.
//!
//! The acceptance band is re-derived at verification time, not at quote
//! time, so a payment made against a slightly stale quote still clears.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{UpstreamUnavailable, ValidationError};
use crate::timestamp::UnixTimestamp;
use crate::types::ServiceKind;

/// Token amounts are quoted to this many decimal places.
pub const AMOUNT_SCALE: u32 = 6;

/// Source of the token/USD exchange rate for the oracle-backed strategy.
///
/// The server provides an HTTP implementation; tests substitute fixtures.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fetches the current USD price of one token unit.
    async fn usd_rate(&self) -> Result<Decimal, UpstreamUnavailable>;
}

/// Acceptable deviation between a received amount and the target price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// Flat amount in token units (stable-valued token).
    Absolute(Decimal),
    /// Fraction of the target, e.g. `0.05` for a 5% band (volatile token).
    Percent(Decimal),
}

impl Tolerance {
    /// The minimum amount accepted for a given target.
    #[must_use]
    pub fn min_accepted(&self, target: Decimal) -> Decimal {
        match *self {
            Self::Absolute(abs) => (target - abs).max(Decimal::ZERO),
            Self::Percent(pct) => target * (Decimal::ONE - pct),
        }
    }
}

/// How prices are derived for this deployment.
#[derive(Debug, Clone)]
pub enum PricingStrategy {
    /// Table lookup; token amount equals the USD target.
    Fixed {
        /// USD target per operation, charged one-to-one in the token.
        prices: HashMap<ServiceKind, Decimal>,
        /// Display name of the settlement token.
        currency: String,
        /// Absolute tolerance in token units.
        tolerance: Decimal,
    },
    /// USD targets converted through a cached external exchange rate.
    OracleBacked {
        /// USD target per operation.
        targets_usd: HashMap<ServiceKind, Decimal>,
        /// Display name of the settlement token.
        currency: String,
        /// How long a fetched rate stays fresh.
        cache_ttl: Duration,
        /// Rate used until the first successful fetch, and after failures.
        fallback_rate: Decimal,
        /// Percentage band, e.g. `0.05`.
        tolerance_pct: Decimal,
    },
}

/// A priced operation at a point in time. Returned to callers so the
/// acceptance band applied later is reproducible.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    /// The priced operation.
    pub kind: ServiceKind,
    /// Amount due, in token units.
    pub amount: Decimal,
    /// Settlement token.
    pub currency: String,
    /// USD value the amount was derived from.
    pub usd_equiv: Decimal,
    /// Exchange rate used, when the oracle strategy is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<Decimal>,
    /// When the quote was produced.
    pub at: UnixTimestamp,
}

/// Result of re-deriving the acceptance band against a received amount.
#[derive(Debug, Clone, Copy)]
pub struct PaymentCheck {
    /// Whether the received amount clears the band.
    pub valid: bool,
    /// Target amount in token units at verification time.
    pub target: Decimal,
    /// Amount actually received.
    pub received: Decimal,
    /// Lower edge of the band (`target − tolerance`).
    pub min_accepted: Decimal,
}

#[derive(Debug)]
struct RateCache {
    rate: Decimal,
    fetched_at: Option<Instant>,
}

/// Resolves the currently required payment amount for an operation.
pub struct PricingResolver {
    strategy: PricingStrategy,
    source: Option<Arc<dyn RateSource>>,
    cache: RwLock<RateCache>,
}

impl fmt::Debug for PricingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PricingResolver")
            .field("strategy", &self.strategy)
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl PricingResolver {
    /// Creates a fixed-price resolver for a stable-valued token.
    #[must_use]
    pub fn fixed(
        prices: HashMap<ServiceKind, Decimal>,
        currency: impl Into<String>,
        tolerance: Decimal,
    ) -> Self {
        Self {
            strategy: PricingStrategy::Fixed {
                prices,
                currency: currency.into(),
                tolerance,
            },
            source: None,
            cache: RwLock::new(RateCache {
                rate: Decimal::ONE,
                fetched_at: None,
            }),
        }
    }

    /// Creates an oracle-backed resolver for a volatile token.
    #[must_use]
    pub fn oracle_backed(
        targets_usd: HashMap<ServiceKind, Decimal>,
        currency: impl Into<String>,
        cache_ttl: Duration,
        fallback_rate: Decimal,
        tolerance_pct: Decimal,
        source: Arc<dyn RateSource>,
    ) -> Self {
        Self {
            strategy: PricingStrategy::OracleBacked {
                targets_usd,
                currency: currency.into(),
                cache_ttl,
                fallback_rate,
                tolerance_pct,
            },
            source: Some(source),
            cache: RwLock::new(RateCache {
                rate: fallback_rate,
                fetched_at: None,
            }),
        }
    }

    /// The tolerance applied by the active strategy.
    #[must_use]
    pub fn tolerance(&self) -> Tolerance {
        match &self.strategy {
            PricingStrategy::Fixed { tolerance, .. } => Tolerance::Absolute(*tolerance),
            PricingStrategy::OracleBacked { tolerance_pct, .. } => {
                Tolerance::Percent(*tolerance_pct)
            }
        }
    }

    fn currency(&self) -> &str {
        match &self.strategy {
            PricingStrategy::Fixed { currency, .. }
            | PricingStrategy::OracleBacked { currency, .. } => currency,
        }
    }

    fn usd_target(&self, kind: ServiceKind) -> Result<Decimal, ValidationError> {
        let table = match &self.strategy {
            PricingStrategy::Fixed { prices, .. } => prices,
            PricingStrategy::OracleBacked { targets_usd, .. } => targets_usd,
        };
        table
            .get(&kind)
            .copied()
            .ok_or_else(|| ValidationError::new(format!("no price configured for {kind}")))
    }

    /// The current exchange rate: cached while fresh, refreshed otherwise,
    /// falling back to the last known (or hard-coded) rate when the source
    /// fails. Never errors — pricing must stay available when the rate
    /// source is down.
    async fn current_rate(&self, cache_ttl: Duration) -> Decimal {
        {
            let cache = self.cache.read().await;
            if let Some(fetched_at) = cache.fetched_at {
                if fetched_at.elapsed() < cache_ttl {
                    return cache.rate;
                }
            }
        }

        let Some(source) = &self.source else {
            return self.cache.read().await.rate;
        };

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(fetched_at) = cache.fetched_at {
            if fetched_at.elapsed() < cache_ttl {
                return cache.rate;
            }
        }

        match source.usd_rate().await {
            Ok(rate) if rate > Decimal::ZERO => {
                cache.rate = rate;
                cache.fetched_at = Some(Instant::now());
                rate
            }
            Ok(rate) => {
                tracing::warn!(%rate, "rate source returned a non-positive rate, keeping cached");
                cache.rate
            }
            Err(e) => {
                tracing::warn!(error = %e, cached = %cache.rate, "rate refresh failed, keeping cached");
                cache.rate
            }
        }
    }

    /// Resolves the required payment amount for an operation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when no price is configured for `kind`.
    pub async fn quote(&self, kind: ServiceKind) -> Result<Quote, ValidationError> {
        let usd = self.usd_target(kind)?;
        let (amount, rate) = match &self.strategy {
            PricingStrategy::Fixed { .. } => (usd, None),
            PricingStrategy::OracleBacked { cache_ttl, .. } => {
                let rate = self.current_rate(*cache_ttl).await;
                ((usd / rate).round_dp(AMOUNT_SCALE), Some(rate))
            }
        };
        Ok(Quote {
            kind,
            amount,
            currency: self.currency().to_owned(),
            usd_equiv: usd,
            rate,
            at: UnixTimestamp::now(),
        })
    }

    /// Quotes every priced operation, for the pricing endpoint.
    pub async fn all_quotes(&self) -> Vec<Quote> {
        let mut quotes = Vec::new();
        for kind in ServiceKind::all() {
            if let Ok(quote) = self.quote(kind).await {
                quotes.push(quote);
            }
        }
        quotes
    }

    /// Re-derives the acceptance band for `kind` and checks `received`
    /// against it. Called at verification time so rate drift between quote
    /// and payment is absorbed by the current band, not the quoted one.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when no price is configured for `kind`.
    pub async fn check_payment(
        &self,
        received: Decimal,
        kind: ServiceKind,
    ) -> Result<PaymentCheck, ValidationError> {
        let quote = self.quote(kind).await?;
        let min_accepted = self.tolerance().min_accepted(quote.amount);
        Ok(PaymentCheck {
            valid: received >= min_accepted,
            target: quote.amount,
            received,
            min_accepted,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::UpstreamUnavailable;

    fn usdc_prices() -> HashMap<ServiceKind, Decimal> {
        HashMap::from([
            (ServiceKind::Standard, Decimal::new(25, 2)),
            (ServiceKind::Priority, Decimal::new(50, 2)),
        ])
    }

    struct StaticRate(Decimal);

    #[async_trait]
    impl RateSource for StaticRate {
        async fn usd_rate(&self) -> Result<Decimal, UpstreamUnavailable> {
            Ok(self.0)
        }
    }

    struct FailingRate;

    #[async_trait]
    impl RateSource for FailingRate {
        async fn usd_rate(&self) -> Result<Decimal, UpstreamUnavailable> {
            Err(UpstreamUnavailable {
                attempts: 1,
                message: "rate source down".to_owned(),
            })
        }
    }

    struct CountingRate {
        rate: Decimal,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateSource for CountingRate {
        async fn usd_rate(&self) -> Result<Decimal, UpstreamUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rate)
        }
    }

    #[tokio::test]
    async fn fixed_quote_is_one_to_one() {
        let resolver = PricingResolver::fixed(usdc_prices(), "USDC", Decimal::ZERO);
        let quote = resolver.quote(ServiceKind::Standard).await.unwrap();
        assert_eq!(quote.amount, Decimal::new(25, 2));
        assert_eq!(quote.usd_equiv, Decimal::new(25, 2));
        assert_eq!(quote.rate, None);
    }

    #[tokio::test]
    async fn fixed_band_boundary() {
        let tolerance = Decimal::new(1, 2); // 0.01
        let resolver = PricingResolver::fixed(usdc_prices(), "USDC", tolerance);

        // 0.24 is exactly target - tolerance: accepted.
        let at_edge = resolver
            .check_payment(Decimal::new(24, 2), ServiceKind::Standard)
            .await
            .unwrap();
        assert!(at_edge.valid);

        // 0.2399... is strictly below: rejected.
        let below = resolver
            .check_payment(Decimal::new(2399, 4), ServiceKind::Standard)
            .await
            .unwrap();
        assert!(!below.valid);
        assert_eq!(below.min_accepted, Decimal::new(24, 2));

        // Overpayment is accepted.
        let above = resolver
            .check_payment(Decimal::ONE, ServiceKind::Standard)
            .await
            .unwrap();
        assert!(above.valid);
    }

    #[tokio::test]
    async fn oracle_quote_divides_by_rate() {
        let resolver = PricingResolver::oracle_backed(
            usdc_prices(),
            "SOL",
            Duration::from_secs(300),
            Decimal::new(200, 0),
            Decimal::new(5, 2),
            Arc::new(StaticRate(Decimal::new(250, 0))),
        );
        let quote = resolver.quote(ServiceKind::Standard).await.unwrap();
        // 0.25 USD at 250 USD/SOL = 0.001 SOL
        assert_eq!(quote.amount, Decimal::new(1, 3));
        assert_eq!(quote.rate, Some(Decimal::new(250, 0)));
    }

    #[tokio::test]
    async fn oracle_band_boundary() {
        let resolver = PricingResolver::oracle_backed(
            usdc_prices(),
            "SOL",
            Duration::from_secs(300),
            Decimal::new(200, 0),
            Decimal::new(5, 2), // 5%
            Arc::new(StaticRate(Decimal::new(250, 0))),
        );
        // target 0.001 SOL, min accepted 0.00095
        let at_edge = resolver
            .check_payment(Decimal::new(95, 5), ServiceKind::Standard)
            .await
            .unwrap();
        assert!(at_edge.valid);

        let below = resolver
            .check_payment(Decimal::new(94, 5), ServiceKind::Standard)
            .await
            .unwrap();
        assert!(!below.valid);
    }

    #[tokio::test]
    async fn failed_refresh_falls_back() {
        let resolver = PricingResolver::oracle_backed(
            usdc_prices(),
            "SOL",
            Duration::from_secs(300),
            Decimal::new(200, 0),
            Decimal::new(5, 2),
            Arc::new(FailingRate),
        );
        let quote = resolver.quote(ServiceKind::Standard).await.unwrap();
        // 0.25 USD at the 200 fallback = 0.00125 SOL
        assert_eq!(quote.amount, Decimal::new(125, 5));
        assert_eq!(quote.rate, Some(Decimal::new(200, 0)));
    }

    #[tokio::test]
    async fn rate_is_cached_within_ttl() {
        let source = Arc::new(CountingRate {
            rate: Decimal::new(250, 0),
            calls: AtomicUsize::new(0),
        });
        let resolver = PricingResolver::oracle_backed(
            usdc_prices(),
            "SOL",
            Duration::from_secs(300),
            Decimal::new(200, 0),
            Decimal::new(5, 2),
            Arc::clone(&source) as Arc<dyn RateSource>,
        );
        resolver.quote(ServiceKind::Standard).await.unwrap();
        resolver.quote(ServiceKind::Priority).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_quotes_covers_every_kind() {
        let resolver = PricingResolver::fixed(usdc_prices(), "USDC", Decimal::ZERO);
        let quotes = resolver.all_quotes().await;
        assert_eq!(quotes.len(), 2);
    }
}
