//! Axum middleware that puts a price on a route.
//!
//! A request without an `X-PAYMENT` header is answered with `402 Payment Required`, the
//! accepted payment options in the `X-PAYMENT-REQUIRED` header and the same challenge as the
//! JSON body. A request with a payment is decoded, verified and settled through the
//! [`PaymentEngine`] before the protected handler runs; the handler can read the payer and
//! transaction hash from the [`PaymentContext`] request extension, and the response carries an
//! `X-PAYMENT-RESPONSE` header.
//!
//! ```rust,ignore
//! let gate = X402Layer::new(engine)
//!     .with_description("Quarterly report")
//!     .with_price_tag(PriceTag::new(pay_to, MoneyAmount::parse("0.01")?, Network::BaseSepolia));
//! let app: Router = Router::new().route("/report", get(report).layer(gate));
//! ```
//!
//! Every rejection still carries the challenge, so a client can tell "pay differently" from
//! "not allowed at all" by status code and `reason`.

mod paygate;

pub use paygate::{GateError, PaymentContext, Paygate};

use alloy_primitives::Address;
use axum::extract::Request;
use axum::response::Response;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use crate::engine::PaymentEngine;
use crate::network::Network;
use crate::types::{PaymentRequirements, Scheme, TokenAmount};
use crate::util::MoneyAmount;

/// One accepted way to pay for a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTag {
    pub pay_to: Address,
    pub amount: MoneyAmount,
    pub network: Network,
}

impl PriceTag {
    pub fn new(pay_to: Address, amount: MoneyAmount, network: Network) -> Self {
        Self {
            pay_to,
            amount,
            network,
        }
    }

    /// Whether `requirements` are the terms this price tag issues: same network, recipient,
    /// price in smallest units and the network's USDC.
    pub fn matches(&self, requirements: &PaymentRequirements) -> bool {
        let Ok(units) = self.amount.to_token_units(self.network.decimals()) else {
            return false;
        };
        requirements.scheme == Scheme::Exact
            && requirements.network == self.network
            && requirements.pay_to == self.pay_to
            && requirements.asset == self.network.usdc()
            && requirements.max_amount_required == TokenAmount(units)
    }
}

/// What the payer is buying.
#[derive(Debug, Clone, Default)]
pub struct ResourceInfo {
    pub description: Option<String>,
    pub mime_type: Option<String>,
    /// Fixed resource identifier. When unset the request path is used.
    pub resource: Option<String>,
}

/// Layer enforcing payment on the wrapped route.
#[derive(Clone)]
pub struct X402Layer {
    engine: PaymentEngine,
    accepts: Arc<Vec<PriceTag>>,
    resource: Arc<ResourceInfo>,
}

impl X402Layer {
    pub fn new(engine: PaymentEngine) -> Self {
        Self {
            engine,
            accepts: Arc::new(Vec::new()),
            resource: Arc::new(ResourceInfo::default()),
        }
    }

    /// Adds a payment option, typically another network.
    pub fn with_price_tag(mut self, price_tag: PriceTag) -> Self {
        let mut accepts = (*self.accepts).clone();
        accepts.push(price_tag);
        self.accepts = Arc::new(accepts);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let mut resource = (*self.resource).clone();
        resource.description = Some(description.into());
        self.resource = Arc::new(resource);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        let mut resource = (*self.resource).clone();
        resource.mime_type = Some(mime_type.into());
        self.resource = Arc::new(resource);
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        let mut resource = (*self.resource).clone();
        resource.resource = Some(resource_id.into());
        self.resource = Arc::new(resource);
        self
    }
}

impl<S> Layer<S> for X402Layer
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = X402Service;

    fn layer(&self, inner: S) -> Self::Service {
        X402Service {
            engine: self.engine.clone(),
            accepts: self.accepts.clone(),
            resource: self.resource.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

#[derive(Clone)]
pub struct X402Service {
    engine: PaymentEngine,
    accepts: Arc<Vec<PriceTag>>,
    resource: Arc<ResourceInfo>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for X402Service {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let resource = self
            .resource
            .resource
            .clone()
            .unwrap_or_else(|| req.uri().path().to_string());
        let gate = Paygate {
            engine: self.engine.clone(),
            accepts: self.accepts.clone(),
            info: self.resource.clone(),
            resource,
        };
        Box::pin(gate.handle_request(self.inner.clone(), req))
    }
}
