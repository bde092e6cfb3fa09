use axum::http::StatusCode;
use std::time::Duration;
use uuid::Uuid;

use crate::chain::ChainError;
use crate::codec::DecodeError;
use crate::engine::VerificationFailure;
use crate::network::Network;
use crate::types::HexEncodedNonce;

/// Why settlement did not produce a confirmed transaction.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The caller stopped waiting. Settlement continues in the background and the record
    /// is finalized once the chain answers.
    #[error("Settlement of payment {payment_id} did not finish within {after:?}")]
    Timeout { payment_id: Uuid, after: Duration },
    #[error("Settlement unavailable: {0}")]
    Unavailable(String),
    #[error("Internal settlement error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Whether paying again with a new authorization may succeed.
    ///
    /// Never a license to resubmit the same nonce.
    pub fn is_retryable(&self) -> bool {
        match self {
            SettlementError::Chain(ChainError::Transport(_))
            | SettlementError::Chain(ChainError::Unconfirmed { .. }) => true,
            SettlementError::Chain(_) => false,
            SettlementError::Timeout { .. } | SettlementError::Unavailable(_) => true,
            SettlementError::Internal(_) => false,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            SettlementError::Chain(ChainError::UnsupportedNetwork(_)) => "unsupported_network",
            SettlementError::Chain(ChainError::Reverted(_)) => "transaction_reverted",
            SettlementError::Chain(ChainError::Unconfirmed { .. }) => "transaction_unconfirmed",
            SettlementError::Chain(_) => "chain_error",
            SettlementError::Timeout { .. } => "settlement_timeout",
            SettlementError::Unavailable(_) => "settlement_unavailable",
            SettlementError::Internal(_) => "internal_error",
        }
    }
}

/// Every way a payment can be refused, classified by who can fix it.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Malformed payment: {0}")]
    Decode(#[from] DecodeError),
    #[error("Payment verification failed: {0}")]
    Verification(#[from] VerificationFailure),
    #[error("Payment denied by policy: {}", violations.join("; "))]
    PolicyDenied { violations: Vec<String> },
    #[error("Nonce already used: {nonce} on {network}")]
    ReplayRejected {
        nonce: HexEncodedNonce,
        network: Network,
    },
    #[error("Settlement failed: {0}")]
    Settlement(#[from] SettlementError),
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Decode(_) => StatusCode::BAD_REQUEST,
            PaymentError::Verification(_) => StatusCode::BAD_REQUEST,
            PaymentError::PolicyDenied { .. } => StatusCode::FORBIDDEN,
            PaymentError::ReplayRejected { .. } => StatusCode::BAD_REQUEST,
            PaymentError::Settlement(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            PaymentError::Decode(_) => "invalid_payment_header",
            PaymentError::Verification(failure) => failure.reason(),
            PaymentError::PolicyDenied { .. } => "policy_denied",
            PaymentError::ReplayRejected { .. } => "nonce_already_used",
            PaymentError::Settlement(e) => e.reason(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Settlement(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn violations(&self) -> &[String] {
        match self {
            PaymentError::PolicyDenied { violations } => violations,
            _ => &[],
        }
    }
}
