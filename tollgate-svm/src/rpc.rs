//! Prioritized-endpoint RPC gateway with health caching and retry/backoff.
//!
//! Free and public RPC endpoints are unreliable. The gateway keeps a ranked
//! endpoint list (paid providers first, public fallbacks last), probes for
//! a healthy one with a bounded chain-state query, caches the winner for a
//! short grace period, and wraps every operation in an exponential-backoff
//! retry loop. Operations either return their result or fail — callers
//! must never assume a side effect occurred on error.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_signature::Signature;
use solana_transaction_status_client_types::UiTransactionEncoding;
use url::Url;

use tollgate::types::TxReference;

use crate::error::ChainError;
use crate::record::TransactionRecord;
use crate::verify::TransactionSource;

/// Gateway tuning knobs.
#[derive(Debug, Clone)]
pub struct RpcGatewayConfig {
    /// Endpoints in priority order.
    pub endpoints: Vec<String>,
    /// How long a probed endpoint stays "healthy" without re-probing.
    pub healthy_ttl: Duration,
    /// Budget for the health-probe chain-state query.
    pub probe_timeout: Duration,
    /// First backoff delay; doubles per attempt.
    pub base_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Attempts before reporting the upstream unavailable.
    pub max_retries: usize,
}

impl Default for RpcGatewayConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://api.mainnet-beta.solana.com".to_owned(),
                "https://rpc.ankr.com/solana".to_owned(),
            ],
            healthy_ttl: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

/// Backoff before retry `attempt` (zero-based): base doubled per attempt,
/// capped.
#[must_use]
pub fn backoff_delay(attempt: usize, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32 << attempt.min(31) as u32;
    base.saturating_mul(factor).min(cap)
}

/// Masks API keys in an endpoint URL for logging.
#[must_use]
pub fn mask_endpoint(endpoint: &str) -> String {
    let Ok(url) = Url::parse(endpoint) else {
        return endpoint.to_owned();
    };
    let host = url.host_str().unwrap_or_default();
    if url.query().is_some_and(|q| q.contains("api-key=")) {
        return format!("{}://{host}/?api-key=***", url.scheme());
    }
    // Some providers put the token in the path.
    if url.path().len() > 1 {
        return format!("{}://{host}/***", url.scheme());
    }
    endpoint.to_owned()
}

#[derive(Debug, Clone, Copy)]
struct HealthyEntry {
    index: usize,
    since: Instant,
}

/// Shared handle to the chain's read interface.
pub struct RpcGateway {
    config: RpcGatewayConfig,
    clients: Vec<Arc<RpcClient>>,
    healthy: Mutex<Option<HealthyEntry>>,
}

impl fmt::Debug for RpcGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcGateway")
            .field("endpoints", &self.config.endpoints.len())
            .finish_non_exhaustive()
    }
}

impl RpcGateway {
    /// Creates a gateway over the configured endpoint list. Clients are
    /// constructed eagerly but connect lazily; nothing is probed until the
    /// first operation.
    #[must_use]
    pub fn new(config: RpcGatewayConfig) -> Self {
        let clients = config
            .endpoints
            .iter()
            .map(|endpoint| {
                Arc::new(RpcClient::new_with_commitment(
                    endpoint.clone(),
                    CommitmentConfig::confirmed(),
                ))
            })
            .collect();
        Self {
            config,
            clients,
            healthy: Mutex::new(None),
        }
    }

    fn cached_healthy(&self) -> Option<usize> {
        let guard = self.healthy.lock().expect("healthy cache lock poisoned");
        guard
            .filter(|entry| entry.since.elapsed() < self.config.healthy_ttl)
            .map(|entry| entry.index)
    }

    fn mark_healthy(&self, index: usize) {
        let mut guard = self.healthy.lock().expect("healthy cache lock poisoned");
        *guard = Some(HealthyEntry {
            index,
            since: Instant::now(),
        });
    }

    fn invalidate(&self) {
        let mut guard = self.healthy.lock().expect("healthy cache lock poisoned");
        *guard = None;
    }

    /// Returns a healthy connection, probing endpoints in priority order
    /// when the cache has lapsed.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NoHealthyEndpoint`] when every endpoint fails
    /// its probe.
    pub async fn connection(&self) -> Result<Arc<RpcClient>, ChainError> {
        if let Some(index) = self.cached_healthy() {
            return Ok(Arc::clone(&self.clients[index]));
        }

        for (index, client) in self.clients.iter().enumerate() {
            let masked = mask_endpoint(&self.config.endpoints[index]);
            match tokio::time::timeout(self.config.probe_timeout, client.get_slot()).await {
                Ok(Ok(slot)) => {
                    tracing::debug!(endpoint = %masked, slot, "RPC endpoint healthy");
                    self.mark_healthy(index);
                    return Ok(Arc::clone(client));
                }
                Ok(Err(e)) => {
                    tracing::warn!(endpoint = %masked, error = %e, "RPC endpoint failed probe");
                }
                Err(_) => {
                    tracing::warn!(endpoint = %masked, "RPC endpoint probe timed out");
                }
            }
        }

        Err(ChainError::NoHealthyEndpoint)
    }

    /// Runs `op` against a healthy connection, retrying with exponential
    /// backoff and endpoint failover up to the configured attempt budget.
    ///
    /// # Errors
    ///
    /// Returns the operation's own non-retryable error unchanged, or
    /// [`ChainError::Unavailable`] once all attempts are exhausted.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut last = ChainError::NoHealthyEndpoint;
        for attempt in 0..self.config.max_retries {
            let result = match self.connection().await {
                Ok(client) => op(client).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    self.invalidate();
                    let delay = backoff_delay(
                        attempt,
                        self.config.base_backoff,
                        self.config.max_backoff,
                    );
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "RPC operation failed, backing off"
                    );
                    last = e;
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(ChainError::Unavailable {
            attempts: self.config.max_retries,
            message: last.to_string(),
        })
    }
}

fn is_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("invalid param")
}

#[async_trait::async_trait]
impl TransactionSource for RpcGateway {
    async fn fetch_transaction(
        &self,
        reference: &TxReference,
    ) -> Result<Option<TransactionRecord>, ChainError> {
        // A reference that isn't a well-formed signature can't exist on
        // chain; report it as absent rather than hammering the endpoints.
        let Ok(signature) = Signature::from_str(reference.as_str()) else {
            return Ok(None);
        };

        self.execute(move |client| {
            let signature = signature;
            async move {
                let request_config = RpcTransactionConfig {
                    encoding: Some(UiTransactionEncoding::Base64),
                    commitment: Some(CommitmentConfig::confirmed()),
                    max_supported_transaction_version: Some(0),
                };
                match client
                    .get_transaction_with_config(&signature, request_config)
                    .await
                {
                    Ok(tx) => TransactionRecord::try_from(tx).map(Some),
                    Err(e) if is_not_found(&e.to_string()) => Ok(None),
                    Err(e) => Err(ChainError::Rpc(e.to_string())),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(5);
        assert_eq!(backoff_delay(0, base, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, base, cap), Duration::from_secs(5));
        assert_eq!(backoff_delay(10, base, cap), Duration::from_secs(5));
    }

    #[test]
    fn backoff_is_monotone() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(5);
        let delays: Vec<_> = (0..8).map(|a| backoff_delay(a, base, cap)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn masks_api_keys() {
        assert_eq!(
            mask_endpoint("https://mainnet.helius-rpc.com/?api-key=secret123"),
            "https://mainnet.helius-rpc.com/?api-key=***"
        );
        assert_eq!(
            mask_endpoint("https://example.quiknode.pro/token456/"),
            "https://example.quiknode.pro/***"
        );
        assert_eq!(
            mask_endpoint("https://api.mainnet-beta.solana.com"),
            "https://api.mainnet-beta.solana.com"
        );
    }

    /// Answers any JSON-RPC request with a fixed `getSlot`-style result,
    /// echoing the request id so the client accepts the response.
    struct SlotResponder;

    impl Respond for SlotResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value =
                serde_json::from_slice(&request.body).unwrap_or_default();
            let id = body.get("id").cloned().unwrap_or(serde_json::json!(1));
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "result": 1234,
                "id": id,
            }))
        }
    }

    fn fast_config(endpoints: Vec<String>) -> RpcGatewayConfig {
        RpcGatewayConfig {
            endpoints,
            healthy_ttl: Duration::from_secs(60),
            probe_timeout: Duration::from_millis(500),
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn execute_exhausts_exactly_max_retries() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::method("POST"))
            .respond_with(SlotResponder)
            .mount(&server)
            .await;

        let gateway = RpcGateway::new(fast_config(vec![server.uri()]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = gateway
            .execute(move |_client| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ChainError::Rpc("boom".to_owned()))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(ChainError::Unavailable { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn execute_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::method("POST"))
            .respond_with(SlotResponder)
            .mount(&server)
            .await;

        let gateway = RpcGateway::new(fast_config(vec![server.uri()]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = gateway
            .execute(move |_client| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ChainError::Rpc("flaky".to_owned()))
                    } else {
                        Ok(7u64)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_short_circuit() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::method("POST"))
            .respond_with(SlotResponder)
            .mount(&server)
            .await;

        let gateway = RpcGateway::new(fast_config(vec![server.uri()]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = gateway
            .execute(move |_client| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ChainError::MalformedRecord("bad meta".to_owned()))
                }
            })
            .await;

        assert!(matches!(result, Err(ChainError::MalformedRecord(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_endpoints_fail_without_running_op() {
        let gateway = RpcGateway::new(fast_config(vec!["http://127.0.0.1:9".to_owned()]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = gateway
            .execute(move |_client| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(ChainError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
