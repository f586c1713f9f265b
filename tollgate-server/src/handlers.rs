//! Axum route handlers for the admission service.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::json;

use tollgate::error::NotFoundError;
use tollgate::timestamp::UnixTimestamp;
use tollgate_svm::verify::TransactionSource;

use crate::dispatch::ResultView;
use crate::error::ApiError;
use crate::orchestrator::Orchestrator;
use crate::validate::{JobRequest, client_origin};

/// Shared application state: the whole pipeline behind one Arc.
pub type AppState<S> = Arc<Orchestrator<S>>;

/// `POST /v1/jobs` — Submits a job through the admission gate.
///
/// Admitted jobs return `202 Accepted` with the job id; every rejection
/// maps to the error taxonomy (402 for payment problems, 429 for rate
/// windows, 400 for malformed bodies).
pub async fn submit_job<S: TransactionSource>(
    State(gate): State<AppState<S>>,
    headers: HeaderMap,
    Json(body): Json<JobRequest>,
) -> Result<Response, ApiError> {
    let origin = client_origin(&headers);
    let admission = gate.admit(&body, &origin).await?;

    let limit = admission.rate_limit;
    let remaining = admission.rate_remaining;
    let reset = UnixTimestamp::now()
        .as_secs()
        .saturating_add(admission.rate_resets_in.as_secs());
    let mut response = (StatusCode::ACCEPTED, Json(admission)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&reset.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
    Ok(response)
}

/// `GET /v1/jobs/{job_id}` — Polls a job result.
///
/// The polling fallback for callers whose callback receiver is down;
/// results stay here for the retention window regardless of delivery
/// fate.
pub async fn job_status<S: TransactionSource>(
    State(gate): State<AppState<S>>,
    Path(job_id): Path<String>,
) -> Result<Json<ResultView>, ApiError> {
    gate.dispatcher()
        .result(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::new(NotFoundError::Job(job_id)))
}

/// `GET /v1/pricing` — Current quotes for every operation, plus the
/// settlement details a payer needs.
pub async fn pricing<S: TransactionSource>(
    State(gate): State<AppState<S>>,
) -> Json<serde_json::Value> {
    let quotes = gate.resolver().all_quotes().await;
    Json(json!({
        "operations": quotes,
        "network": "solana",
        "recipient": gate.recipient(),
        "mint": gate.mint(),
    }))
}

/// `GET /health` — Liveness plus ledger counters.
pub async fn health<S: TransactionSource>(
    State(gate): State<AppState<S>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "ledgers": gate.stats(),
        "delivery": gate.dispatcher().stats(),
    }))
}

/// Creates an Axum [`Router`] with all service endpoints.
///
/// Endpoints:
/// - `POST /v1/jobs` — submit a job through the gate
/// - `GET /v1/jobs/{job_id}` — poll a job result
/// - `GET /v1/pricing` — current quotes and settlement details
/// - `GET /health` — liveness and ledger counters
pub fn app_router<S: TransactionSource + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/v1/jobs", routing::post(submit_job::<S>))
        .route("/v1/jobs/{job_id}", routing::get(job_status::<S>))
        .route("/v1/pricing", routing::get(pricing::<S>))
        .route("/health", routing::get(health::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tower::util::ServiceExt;

    use tollgate::pricing::PricingResolver;
    use tollgate::types::{ServiceKind, TxReference};
    use tollgate_svm::error::ChainError;
    use tollgate_svm::record::TransactionRecord;
    use tollgate_svm::verify::{PaymentVerifier, VerifierConfig};

    use crate::config::LimitsConfig;
    use crate::dispatch::{DispatcherConfig, ResultDispatcher};
    use crate::worker::CannedProcessor;

    use super::*;

    struct EmptyChain;

    #[async_trait]
    impl TransactionSource for EmptyChain {
        async fn fetch_transaction(
            &self,
            _reference: &TxReference,
        ) -> Result<Option<TransactionRecord>, ChainError> {
            Ok(None)
        }
    }

    fn router() -> Router {
        let verifier = PaymentVerifier::new(
            EmptyChain,
            VerifierConfig::new("SvcWa11et", "USDCmint"),
        );
        let resolver = PricingResolver::fixed(
            HashMap::from([(ServiceKind::Standard, Decimal::new(25, 2))]),
            "USDC",
            Decimal::ZERO,
        );
        let dispatcher = Arc::new(ResultDispatcher::new(DispatcherConfig {
            retry_delays: vec![Duration::from_millis(1)],
            timeout: Duration::from_secs(1),
            retention: Duration::from_secs(60),
        }));
        let limits = LimitsConfig {
            free_tier: 1,
            agent_per_minute: 10,
            origin_per_minute: 60,
            allow_insecure_callbacks: true,
        };
        app_router(Arc::new(Orchestrator::new(
            &limits,
            verifier,
            resolver,
            dispatcher,
            Arc::new(CannedProcessor),
        )))
    }

    fn submit_body(agent: &str) -> String {
        json!({
            "agent_id": agent,
            "resource_url": "https://cdn.example.com/a.mp3",
            "callback_url": "http://127.0.0.1:9/hook",
        })
        .to_string()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_returns_202_with_job_id() {
        let response = router()
            .oneshot(
                axum::http::Request::post("/v1/jobs")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(submit_body("agent-h1")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "10");
        assert_eq!(
            response.headers().get("x-ratelimit-remaining").unwrap(),
            "9"
        );
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        let body = body_json(response).await;
        assert_eq!(body["status"], "queued");
        assert!(body["job_id"].is_string());
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let response = router()
            .oneshot(
                axum::http::Request::get("/v1/jobs/nope")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn pricing_lists_operations_and_settlement_details() {
        let response = router()
            .oneshot(
                axum::http::Request::get("/v1/pricing")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["recipient"], "SvcWa11et");
        assert_eq!(body["operations"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let response = router()
            .oneshot(
                axum::http::Request::get("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["ledgers"]["consumed_references"].is_number());
    }

    #[tokio::test]
    async fn second_free_request_is_402_with_instructions() {
        let app = router();
        for expected in [StatusCode::ACCEPTED, StatusCode::PAYMENT_REQUIRED] {
            // Same agent, different resources, so idempotency stays out
            // of the way.
            let resource = format!("https://cdn.example.com/{expected}.mp3");
            let body = json!({
                "agent_id": "agent-h2",
                "resource_url": resource,
                "callback_url": "http://127.0.0.1:9/hook",
            })
            .to_string();
            let response = app
                .clone()
                .oneshot(
                    axum::http::Request::post("/v1/jobs")
                        .header("content-type", "application/json")
                        .body(axum::body::Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
            if expected == StatusCode::PAYMENT_REQUIRED {
                let body = body_json(response).await;
                assert_eq!(body["error"], "PAYMENT_REQUIRED");
                assert_eq!(body["payment_instructions"]["recipient"], "SvcWa11et");
            }
        }
    }
}
