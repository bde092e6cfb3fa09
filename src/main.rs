//! x402 payment gateway HTTP entrypoint.
//!
//! Endpoints:
//! - `GET /health` – Liveness and pending settlement count
//! - `GET /supported` – Supported payment kinds (version/scheme/network)
//! - `GET|POST /verify` – Verify a payment against requirements issued for a configured route
//! - `GET|POST /settle` – Settle such a payment on-chain and record it
//! - every route under `routes` in the config, gated behind an x402 payment
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON config, `HOST`/`PORT`/`APP_ENV`/`DATABASE_PATH` fill its gaps
//! - `OTEL_*` variables enable OTLP export of traces and metrics

use axum::Router;
use axum::http::{HeaderName, Method};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use x402_paygate::chain::NetworkRouter;
use x402_paygate::codec::{PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER};
use x402_paygate::config::Config;
use x402_paygate::engine::{EngineConfig, PaymentEngine};
use x402_paygate::handlers::{self, FacilitatorState};
use x402_paygate::store::{PaymentStore, SqlitePaymentStore};
use x402_paygate::util::{SigDown, Telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let environment = config.environment();
    tracing::info!(%environment, database = config.database(), "Loaded configuration");

    let store = Arc::new(SqlitePaymentStore::open(config.database())?);
    for record in store.pending_records().await? {
        tracing::warn!(
            payment_id = %record.id,
            network = %record.network,
            nonce = %record.nonce,
            created_at = %record.created_at,
            "Payment from a previous run has no settlement outcome, reconcile on-chain"
        );
    }

    let router = NetworkRouter::from_config(config.networks(), environment)?;
    let policy = Arc::new(config.policy().thresholds.clone());
    let engine = PaymentEngine::new(
        store,
        policy,
        Arc::new(router),
        EngineConfig {
            org_id: config.policy().org_id.clone(),
            settlement_timeout: config.settlement_timeout(),
            requirement_ttl: config.requirement_ttl(),
        },
    );

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(FacilitatorState::new(
            engine.clone(),
            handlers::price_tags(&config),
        )))
        .merge(handlers::paid_routes(&engine, &config))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any)
                .expose_headers([
                    HeaderName::from_bytes(PAYMENT_REQUIRED_HEADER.as_bytes())?,
                    HeaderName::from_bytes(PAYMENT_RESPONSE_HEADER.as_bytes())?,
                ]),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    engine.shutdown().await;
    tracing::info!("Shut down");
    Ok(())
}
