use alloy_primitives::Address;
use axum::Json;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower::{Service, ServiceExt};
use tracing::instrument;
use uuid::Uuid;

use crate::codec::{
    PAYMENT_HEADER, PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, decode_payment_payload,
    encode_payment_required,
};
use crate::engine::{PaymentEngine, PaymentError, Settlement};
use crate::gate::{PriceTag, ResourceInfo};
use crate::network::Network;
use crate::types::{PaymentRequired, PaymentRequirements, Scheme, SettleResponse, TransactionHash};
use crate::util::MoneyAmountParseError;

/// Settled payment, available to the protected handler as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentContext {
    pub payment_id: Uuid,
    pub payer: Address,
    pub network: Network,
    pub tx_hash: TransactionHash,
    pub simulated: bool,
}

impl From<&Settlement> for PaymentContext {
    fn from(settlement: &Settlement) -> Self {
        Self {
            payment_id: settlement.payment_id,
            payer: settlement.payer,
            network: settlement.network,
            tx_hash: settlement.tx_hash,
            simulated: settlement.simulated,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("{0} header is required")]
    PaymentRequired(&'static str),
    #[error("No accepted payment option for scheme {scheme} on {network}")]
    NoMatchingRequirement { scheme: Scheme, network: Network },
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error("Route price cannot be paid in token units: {0}")]
    Pricing(#[from] MoneyAmountParseError),
}

impl GateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            GateError::NoMatchingRequirement { .. } => StatusCode::BAD_REQUEST,
            GateError::Payment(e) => e.status_code(),
            GateError::Pricing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GateError::PaymentRequired(_) => "payment_required",
            GateError::NoMatchingRequirement { .. } => "no_matching_requirements",
            GateError::Payment(e) => e.reason(),
            GateError::Pricing(_) => "invalid_price",
        }
    }
}

/// JSON body of every rejection: the challenge plus why the payment was refused.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Rejection<'a> {
    #[serde(flatten)]
    required: &'a PaymentRequired,
    reason: &'static str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    violations: &'a [String],
    retryable: bool,
}

/// Payment enforcement for a single request.
pub struct Paygate {
    pub engine: PaymentEngine,
    pub accepts: Arc<Vec<PriceTag>>,
    pub info: Arc<ResourceInfo>,
    /// Identifier of the resource being bought.
    pub resource: String,
}

impl Paygate {
    /// Requirements for this request, one per price tag.
    pub fn requirements(&self) -> Result<Vec<PaymentRequirements>, MoneyAmountParseError> {
        self.accepts
            .iter()
            .map(|tag| {
                let mut requirements = self.engine.create_requirement(
                    &self.resource,
                    tag.amount,
                    self.info.description.clone(),
                    tag.network,
                    tag.pay_to,
                )?;
                requirements.mime_type = self.info.mime_type.clone();
                Ok(requirements)
            })
            .collect()
    }

    /// Handles a request, answering any failure with the payment challenge.
    #[instrument(name = "x402.handle_request", skip_all, fields(resource = %self.resource))]
    pub async fn handle_request<S>(self, inner: S, req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
    {
        let accepts = match self.requirements() {
            Ok(accepts) => accepts,
            Err(e) => {
                tracing::error!(error = %e, "Route is priced below the token's smallest unit");
                return Ok(error_response(GateError::from(e), Vec::new()));
            }
        };
        match self.handle_request_fallible(inner, req, &accepts).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(error_response(err, accepts)),
        }
    }

    /// Like [`Paygate::handle_request`], but returns the failure instead of a response.
    pub async fn handle_request_fallible<S>(
        &self,
        inner: S,
        mut req: Request,
        accepts: &[PaymentRequirements],
    ) -> Result<Response, GateError>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
    {
        let header = req
            .headers()
            .get(PAYMENT_HEADER)
            .ok_or(GateError::PaymentRequired(PAYMENT_HEADER))?;
        let payload = decode_payment_payload(header.as_bytes()).map_err(PaymentError::from)?;
        let requirements = accepts
            .iter()
            .find(|requirements| {
                requirements.scheme == payload.scheme && requirements.network == payload.network
            })
            .ok_or(GateError::NoMatchingRequirement {
                scheme: payload.scheme,
                network: payload.network,
            })?;

        let settlement = self.engine.settle(&payload, requirements).await?;
        req.extensions_mut().insert(PaymentContext::from(&settlement));

        let Ok(mut response) = inner.oneshot(req).await;
        attach_settlement(&mut response, &settlement);
        Ok(response)
    }
}

/// Inserts a header, normalising the upper-case wire name.
fn insert_header(response: &mut Response, name: &str, value: &str) -> Result<(), String> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
    response.headers_mut().insert(name, value);
    Ok(())
}

fn attach_settlement(response: &mut Response, settlement: &Settlement) {
    let result = serde_json::to_string(&SettleResponse::from(settlement))
        .map_err(|e| e.to_string())
        .and_then(|json| insert_header(response, PAYMENT_RESPONSE_HEADER, &json));
    if let Err(e) = result {
        // The payment is settled either way; only the receipt header is lost.
        tracing::error!(payment_id = %settlement.payment_id, error = %e, "Could not attach payment response header");
    }
}

fn error_response(err: GateError, accepts: Vec<PaymentRequirements>) -> Response {
    let status = err.status_code();
    let reason = err.reason();
    if status.is_server_error() {
        tracing::warn!(%status, reason, "Payment failed: {err}");
    } else {
        tracing::info!(%status, reason, "Payment rejected: {err}");
    }

    let (violations, retryable) = match &err {
        GateError::Payment(e) => (e.violations(), e.is_retryable()),
        _ => (&[][..], false),
    };
    let required = PaymentRequired::new(accepts).with_error(err.to_string());
    let body = Rejection {
        required: &required,
        reason,
        violations,
        retryable,
    };
    let mut response = (status, Json(&body)).into_response();
    let challenge = encode_payment_required(&required)
        .map_err(|e| e.to_string())
        .and_then(|header| insert_header(&mut response, PAYMENT_REQUIRED_HEADER, &header));
    if let Err(e) = challenge {
        tracing::error!(error = %e, "Could not attach payment challenge header");
    }
    response
}
