//! HTTP endpoints of the payment gateway.
//!
//! Facilitator-style endpoints let a separate resource server delegate verification and
//! settlement (`/verify`, `/settle`) and discover what can be paid (`/supported`). Gated
//! resources configured under `routes` are served behind the [`X402Layer`].
//!
//! All bodies use the wire types from [`crate::types`]. `/verify` and `/settle` only accept
//! requirements matching a price tag this server issues; anything else is refused before the
//! engine sees it.

use axum::extract::{FromRef, State};
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::{Extension, Json, Router, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::config::Config;
use crate::engine::PaymentEngine;
use crate::gate::{PaymentContext, PriceTag, X402Layer};
use crate::types::{
    PaymentRequest, PaymentRequirements, Scheme, SettleResponse, SupportedPaymentKind,
    VerifyResponse, X402Version,
};

const REQUIREMENT_NOT_OFFERED: &str = "requirement_not_offered";

/// State shared by the facilitator endpoints.
#[derive(Clone)]
pub struct FacilitatorState {
    pub engine: PaymentEngine,
    /// Price tags of the gated routes; the only terms `/verify` and `/settle` accept.
    pub offers: Arc<Vec<PriceTag>>,
}

impl FacilitatorState {
    pub fn new(engine: PaymentEngine, offers: Vec<PriceTag>) -> Self {
        Self {
            engine,
            offers: Arc::new(offers),
        }
    }

    fn offers(&self, requirements: &PaymentRequirements) -> bool {
        self.offers.iter().any(|tag| tag.matches(requirements))
    }
}

impl FromRef<FacilitatorState> for PaymentEngine {
    fn from_ref(state: &FacilitatorState) -> Self {
        state.engine.clone()
    }
}

/// Price tags of every configured route.
pub fn price_tags(config: &Config) -> Vec<PriceTag> {
    config
        .routes()
        .iter()
        .filter_map(|route| {
            let pay_to = config.route_pay_to(route)?;
            Some(PriceTag::new(pay_to, route.price, route.network))
        })
        .collect()
}

/// Facilitator endpoints.
pub fn routes() -> Router<FacilitatorState> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/supported", get(get_supported))
        .route("/verify", get(get_verify_info).post(post_verify))
        .route("/settle", get(get_settle_info).post(post_settle))
}

/// One gated route per configured resource.
pub fn paid_routes(engine: &PaymentEngine, config: &Config) -> Router {
    config.routes().iter().fold(Router::new(), |router, route| {
        let Some(pay_to) = config.route_pay_to(route) else {
            // Rejected by config validation.
            return router;
        };
        let mut gate = X402Layer::new(engine.clone())
            .with_mime_type("application/json")
            .with_price_tag(PriceTag::new(pay_to, route.price, route.network));
        if let Some(description) = &route.description {
            gate = gate.with_description(description.clone());
        }
        tracing::info!(
            path = %route.path,
            price = %route.price,
            network = %route.network,
            %pay_to,
            "Gated route"
        );
        router.route(&route.path, get(get_paid_resource).layer(gate))
    })
}

#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health`: liveness, plus how many settlements still await an outcome.
#[instrument(skip_all)]
pub async fn get_health(State(engine): State<PaymentEngine>) -> impl IntoResponse {
    match engine.pending_records().await {
        Ok(pending) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "environment": engine.router().environment(),
                "pendingSettlements": pending.len(),
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Payment store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "error": e.to_string() })),
            )
        }
    }
}

/// `GET /verify`: describes the body `POST /verify` expects.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: describes the body `POST /settle` expects.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: the (version, scheme, network) triples this server settles.
///
/// In development every known network is listed, since unconfigured ones settle through the
/// simulated route.
#[instrument(skip_all)]
pub async fn get_supported(State(engine): State<PaymentEngine>) -> impl IntoResponse {
    let kinds = engine
        .router()
        .networks()
        .into_iter()
        .map(|network| SupportedPaymentKind {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network,
        })
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(kinds))
}

/// `POST /verify`: checks a payment against its requirements without settling it.
///
/// Always `200 OK`; an invalid payment is reported in the body with its reason.
#[instrument(skip_all)]
pub async fn post_verify(
    State(state): State<FacilitatorState>,
    Json(body): Json<PaymentRequest>,
) -> impl IntoResponse {
    let response = if state.offers(&body.payment_requirements) {
        state
            .engine
            .verify_response(&body.payment_payload, &body.payment_requirements)
    } else {
        VerifyResponse::invalid(
            Some(body.payment_payload.payload.authorization.from),
            REQUIREMENT_NOT_OFFERED,
        )
    };
    (StatusCode::OK, Json(response))
}

/// `POST /settle`: verifies, records and settles a payment on-chain.
#[instrument(skip_all)]
pub async fn post_settle(
    State(state): State<FacilitatorState>,
    Json(body): Json<PaymentRequest>,
) -> impl IntoResponse {
    let payload = &body.payment_payload;
    let requirements = &body.payment_requirements;
    if !state.offers(requirements) {
        tracing::warn!(
            network = %requirements.network,
            pay_to = %requirements.pay_to,
            amount = %requirements.max_amount_required,
            "Refusing to settle requirements this server did not issue"
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(SettleResponse {
                success: false,
                transaction_hash: None,
                network: payload.network,
                payer: Some(payload.payload.authorization.from),
                error_reason: Some(REQUIREMENT_NOT_OFFERED.to_string()),
            }),
        );
    }
    match state.engine.settle(payload, requirements).await {
        Ok(settlement) => (StatusCode::OK, Json(SettleResponse::from(&settlement))),
        Err(error) => {
            tracing::warn!(
                error = %error,
                reason = error.reason(),
                network = %payload.network,
                "Settlement failed"
            );
            (
                error.status_code(),
                Json(SettleResponse {
                    success: false,
                    transaction_hash: None,
                    network: payload.network,
                    payer: Some(payload.payload.authorization.from),
                    error_reason: Some(error.reason().to_string()),
                }),
            )
        }
    }
}

/// The gated resource itself: reached only after a settled payment.
#[instrument(skip_all, fields(payer = %payment.payer))]
pub async fn get_paid_resource(
    Extension(payment): Extension<PaymentContext>,
    uri: Uri,
) -> impl IntoResponse {
    Json(json!({
        "resource": uri.path(),
        "paymentId": payment.payment_id,
        "payer": payment.payer,
        "transactionHash": payment.tx_hash,
        "network": payment.network,
        "simulated": payment.simulated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, address};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::chain::router::test_support::FakeChain;
    use crate::chain::{ChainRoute, NetworkRouter};
    use crate::codec::{PAYMENT_HEADER, PAYMENT_REQUIRED_HEADER, decode_payment_required, encode_payment_payload};
    use crate::config::Environment;
    use crate::crypto::AuthorizationSigner;
    use crate::engine::EngineConfig;
    use crate::network::Network;
    use crate::policy::AllowAllPolicy;
    use crate::store::InMemoryPaymentStore;
    use crate::timestamp::UnixTimestamp;
    use crate::util::MoneyAmount;

    fn engine(environment: Environment) -> PaymentEngine {
        let router = NetworkRouter::new(environment).with_route(
            Network::BaseSepolia,
            ChainRoute::Evm(Arc::new(FakeChain::default())),
        );
        PaymentEngine::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(AllowAllPolicy),
            Arc::new(router),
            EngineConfig::default(),
        )
    }

    const PAY_TO: Address = address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C");

    fn one_cent() -> MoneyAmount {
        MoneyAmount::parse("0.01").unwrap()
    }

    fn facilitator(engine: PaymentEngine) -> Router {
        let offers = vec![PriceTag::new(PAY_TO, one_cent(), Network::BaseSepolia)];
        routes().with_state(FacilitatorState::new(engine, offers))
    }

    fn requirements(engine: &PaymentEngine) -> PaymentRequirements {
        engine
            .create_requirement("/report", one_cent(), None, Network::BaseSepolia, PAY_TO)
            .unwrap()
    }

    fn post(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn supported_lists_configured_networks_in_production() {
        let app = facilitator(engine(Environment::Production));
        let request = Request::builder()
            .uri("/supported")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(request).await.unwrap()).await;
        assert_eq!(
            body,
            json!([{ "x402Version": 1, "scheme": "exact", "network": "base-sepolia" }])
        );
    }

    #[tokio::test]
    async fn supported_lists_every_network_in_development() {
        let app = facilitator(engine(Environment::Development));
        let request = Request::builder()
            .uri("/supported")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(request).await.unwrap()).await;
        assert_eq!(body.as_array().unwrap().len(), Network::variants().len());
    }

    #[tokio::test]
    async fn verify_then_settle_then_replay() {
        let engine = engine(Environment::Production);
        let app = facilitator(engine.clone());
        let requirements = requirements(&engine);
        let signer = AuthorizationSigner::random();
        let payload = signer.pay(&requirements, UnixTimestamp::now()).unwrap();
        let request = PaymentRequest {
            payment_payload: payload,
            payment_requirements: requirements,
        };

        let verified = app.clone().oneshot(post("/verify", &request)).await.unwrap();
        assert_eq!(verified.status(), StatusCode::OK);
        let verified = json_body(verified).await;
        assert_eq!(verified["isValid"], true);
        assert_eq!(verified["payer"], json!(signer.address()));

        let settled = app.clone().oneshot(post("/settle", &request)).await.unwrap();
        assert_eq!(settled.status(), StatusCode::OK);
        let settled = json_body(settled).await;
        assert_eq!(settled["success"], true);
        assert!(settled["transactionHash"].is_string());

        let replayed = app.clone().oneshot(post("/settle", &request)).await.unwrap();
        assert_eq!(replayed.status(), StatusCode::BAD_REQUEST);
        let replayed = json_body(replayed).await;
        assert_eq!(replayed["success"], false);
        assert_eq!(replayed["errorReason"], "nonce_already_used");
    }

    #[tokio::test]
    async fn verify_reports_the_failing_check() {
        let engine = engine(Environment::Production);
        let app = facilitator(engine.clone());
        let requirements = requirements(&engine);
        let mut payload = AuthorizationSigner::random()
            .pay(&requirements, UnixTimestamp::now())
            .unwrap();
        payload.payload.authorization.value = 1u64.into();
        let request = PaymentRequest {
            payment_payload: payload,
            payment_requirements: requirements,
        };

        let response = app.oneshot(post("/verify", &request)).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["isValid"], false);
        assert_eq!(body["invalidReason"], "insufficient_amount");
    }

    #[tokio::test]
    async fn health_reports_pending_settlements() {
        let app = facilitator(engine(Environment::Development));
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(request).await.unwrap()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["environment"], "development");
        assert_eq!(body["pendingSettlements"], 0);
    }

    #[tokio::test]
    async fn only_issued_terms_are_settled_on_the_home_chain() {
        let chain = Arc::new(FakeChain::default());
        let router = NetworkRouter::new(Environment::Production)
            .with_route(Network::ArcTestnet, ChainRoute::Native(chain.clone()));
        let engine = PaymentEngine::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(AllowAllPolicy),
            Arc::new(router),
            EngineConfig::default(),
        );
        let offers = vec![PriceTag::new(PAY_TO, one_cent(), Network::ArcTestnet)];
        let app = routes().with_state(FacilitatorState::new(engine.clone(), offers));

        let thief = address!("0xbadbadbadbadbadbadbadbadbadbadbadbadbad0");
        let forged = engine
            .create_requirement(
                "/report",
                MoneyAmount::parse("1000000").unwrap(),
                None,
                Network::ArcTestnet,
                thief,
            )
            .unwrap();
        let request = PaymentRequest {
            payment_payload: AuthorizationSigner::random()
                .pay(&forged, UnixTimestamp::now())
                .unwrap(),
            payment_requirements: forged,
        };

        let verified = json_body(app.clone().oneshot(post("/verify", &request)).await.unwrap()).await;
        assert_eq!(verified["isValid"], false);
        assert_eq!(verified["invalidReason"], "requirement_not_offered");

        let settled = app.clone().oneshot(post("/settle", &request)).await.unwrap();
        assert_eq!(settled.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(settled).await["errorReason"], "requirement_not_offered");
        assert!(chain.native_calls.lock().is_empty());

        let issued = engine
            .create_requirement("/report", one_cent(), None, Network::ArcTestnet, PAY_TO)
            .unwrap();
        let request = PaymentRequest {
            payment_payload: AuthorizationSigner::random()
                .pay(&issued, UnixTimestamp::now())
                .unwrap(),
            payment_requirements: issued,
        };
        let settled = app.oneshot(post("/settle", &request)).await.unwrap();
        assert_eq!(settled.status(), StatusCode::OK);
        assert_eq!(
            chain.native_calls.lock().as_slice(),
            [(PAY_TO, crate::types::TokenAmount::from(10_000u64))]
        );
    }

    #[test]
    fn price_tags_follow_configured_routes() {
        let config = Config::from_json(
            r#"{
                "pay_to": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                "routes": [{ "path": "/report", "price": "$0.01", "network": "base-sepolia" }]
            }"#,
        )
        .unwrap();
        assert_eq!(
            price_tags(&config),
            vec![PriceTag::new(PAY_TO, one_cent(), Network::BaseSepolia)]
        );
    }

    #[tokio::test]
    async fn configured_routes_are_gated() {
        let engine = engine(Environment::Production);
        let config = Config::from_json(
            r#"{
                "pay_to": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                "routes": [{ "path": "/report", "price": "$0.01", "network": "base-sepolia",
                             "description": "Daily report" }]
            }"#,
        )
        .unwrap();
        let app = paid_routes(&engine, &config);

        let unpaid = app
            .clone()
            .oneshot(Request::builder().uri("/report").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(unpaid.status(), StatusCode::PAYMENT_REQUIRED);
        let challenge =
            decode_payment_required(unpaid.headers()[PAYMENT_REQUIRED_HEADER].as_bytes()).unwrap();
        let requirements = &challenge.accepts[0];
        assert_eq!(requirements.description.as_deref(), Some("Daily report"));

        let signer = AuthorizationSigner::random();
        let payload = signer.pay(requirements, UnixTimestamp::now()).unwrap();
        let paid = app
            .oneshot(
                Request::builder()
                    .uri("/report")
                    .header(PAYMENT_HEADER, encode_payment_payload(&payload).unwrap())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(paid.status(), StatusCode::OK);
        let body = json_body(paid).await;
        assert_eq!(body["resource"], "/report");
        assert_eq!(body["payer"], json!(signer.address()));
        assert_eq!(body["simulated"], false);
    }
}
