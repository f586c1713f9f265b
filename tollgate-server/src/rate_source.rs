//! HTTP exchange-rate source for oracle-backed pricing.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use tollgate::error::UpstreamUnavailable;
use tollgate::pricing::RateSource;

/// Fetches a USD rate from a CoinGecko-style simple-price endpoint, i.e.
/// a JSON body of the shape `{"<asset>": {"usd": <rate>}}`.
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: reqwest::Client,
    url: String,
    asset: String,
}

impl HttpRateSource {
    /// Creates a source for `asset` at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into(),
            asset: asset.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> UpstreamUnavailable {
        UpstreamUnavailable {
            attempts: 1,
            message: message.into(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn usd_rate(&self) -> Result<Decimal, UpstreamUnavailable> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("rate fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(format!(
                "rate source returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Self::unavailable(format!("rate body unreadable: {e}")))?;

        // Rates arrive as JSON numbers; go through the string form so
        // float representation never leaks into the decimal.
        let rate = body
            .get(&self.asset)
            .and_then(|a| a.get("usd"))
            .and_then(Value::as_f64)
            .ok_or_else(|| Self::unavailable(format!("no usd rate for {} in body", self.asset)))?;

        rate.to_string()
            .parse::<Decimal>()
            .map_err(|e| Self::unavailable(format!("unparseable rate {rate}: {e}")))
    }
}
