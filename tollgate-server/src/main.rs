//! Payment-gated job admission server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p tollgate-server --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p tollgate-server
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p tollgate-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `3000`)
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::Method;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tollgate::pricing::PricingResolver;
use tollgate_svm::rpc::{RpcGateway, RpcGatewayConfig, mask_endpoint};
use tollgate_svm::verify::{PaymentVerifier, VerifierConfig};

use tollgate_server::config::{PricingConfig, ServerConfig};
use tollgate_server::dispatch::{DispatcherConfig, ResultDispatcher};
use tollgate_server::handlers::app_router;
use tollgate_server::orchestrator::Orchestrator;
use tollgate_server::rate_source::HttpRateSource;
use tollgate_server::worker::CannedProcessor;

/// Interval between ledger housekeeping passes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // .env is optional; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        endpoints = config.chain.endpoints.len(),
        "Loaded configuration"
    );
    for endpoint in &config.chain.endpoints {
        tracing::info!(endpoint = %mask_endpoint(endpoint), "Chain endpoint configured");
    }

    let gateway = RpcGateway::new(RpcGatewayConfig {
        endpoints: config.chain.endpoints.clone(),
        ..RpcGatewayConfig::default()
    });
    let verifier = PaymentVerifier::new(
        gateway,
        VerifierConfig {
            recipient: config.chain.recipient.clone(),
            mint: config.chain.mint.clone(),
            freshness: Duration::from_secs(config.chain.freshness_secs),
        },
    );

    let price_table = config.pricing.price_table()?;
    let resolver = match &config.pricing {
        PricingConfig::Fixed {
            currency,
            tolerance,
            ..
        } => {
            tracing::info!(%currency, "Fixed pricing active");
            PricingResolver::fixed(price_table, currency.clone(), *tolerance)
        }
        PricingConfig::Oracle {
            currency,
            rate_url,
            rate_asset,
            fallback_rate,
            tolerance_pct,
            cache_ttl_secs,
            ..
        } => {
            tracing::info!(%currency, %rate_asset, "Oracle-backed pricing active");
            PricingResolver::oracle_backed(
                price_table,
                currency.clone(),
                Duration::from_secs(*cache_ttl_secs),
                *fallback_rate,
                *tolerance_pct,
                Arc::new(HttpRateSource::new(rate_url.clone(), rate_asset.clone())),
            )
        }
    };

    let dispatcher = Arc::new(ResultDispatcher::new(DispatcherConfig {
        retry_delays: config.delivery.retry_delays(),
        timeout: Duration::from_secs(config.delivery.timeout_secs),
        retention: Duration::from_secs(config.delivery.retention_secs),
    }));

    let orchestrator = Arc::new(Orchestrator::new(
        &config.limits,
        verifier,
        resolver,
        dispatcher,
        Arc::new(CannedProcessor),
    ));

    // Periodic housekeeping: expired replay entries, idle rate windows,
    // stale idempotency entries and aged-out results.
    let sweeper = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            sweeper.sweep();
        }
    });

    let app: Router = app_router(orchestrator)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
