//! Header codec: JSON bodies wrapped in base64 for the x402 headers.
//!
//! Decoding never panics on client input. Every failure is a [`DecodeError`], which callers
//! answer with `400 Bad Request`; it is a different outcome from a well-formed payment that
//! fails verification.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::{PaymentPayload, PaymentRequired};
use crate::util::Base64Bytes;

/// Header carrying the server's payment challenge.
pub const PAYMENT_REQUIRED_HEADER: &str = "X-PAYMENT-REQUIRED";
/// Header carrying the client's signed payment.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";
/// Header carrying the settlement result.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Payment header is empty")]
    EmptyHeader,
    #[error("Payment header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Payment header is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Payment header is not a valid payload: {0}")]
    Json(#[from] serde_json::Error),
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64Bytes::encode(json).to_string())
}

fn decode_json<T: DeserializeOwned>(header: Base64Bytes<'_>) -> Result<T, DecodeError> {
    if header.is_empty() {
        return Err(DecodeError::EmptyHeader);
    }
    let bytes = header.decode()?;
    let text = std::str::from_utf8(&bytes)?;
    Ok(serde_json::from_str(text)?)
}

/// Encodes a challenge for the `X-PAYMENT-REQUIRED` header.
pub fn encode_payment_required(required: &PaymentRequired) -> Result<String, serde_json::Error> {
    encode_json(required)
}

/// Decodes an `X-PAYMENT-REQUIRED` header value.
pub fn decode_payment_required<'a>(
    header: impl Into<Base64Bytes<'a>>,
) -> Result<PaymentRequired, DecodeError> {
    decode_json(header.into())
}

/// Encodes a signed payment for the `X-PAYMENT` header.
pub fn encode_payment_payload(payload: &PaymentPayload) -> Result<String, serde_json::Error> {
    encode_json(payload)
}

/// Decodes an `X-PAYMENT` header value.
pub fn decode_payment_payload<'a>(
    header: impl Into<Base64Bytes<'a>>,
) -> Result<PaymentPayload, DecodeError> {
    decode_json(header.into())
}

impl TryFrom<Base64Bytes<'_>> for PaymentPayload {
    type Error = DecodeError;

    fn try_from(value: Base64Bytes<'_>) -> Result<Self, Self::Error> {
        decode_json(value)
    }
}
