//! Verification of a payment against the requirement it claims to satisfy.
//!
//! Pure and side-effect free. Checks run in a fixed order and the first failure is returned.

use alloy_primitives::Address;

use crate::crypto::eip712::TokenDomain;
use crate::crypto::signer::is_dev_signer;
use crate::crypto::verifier::{self, SignatureError};
use crate::network::Network;
use crate::timestamp::UnixTimestamp;
use crate::types::{PaymentPayload, PaymentRequirements, Scheme, TokenAmount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationFailure {
    #[error("Payment requirement expired at {expires_at}")]
    RequirementExpired { expires_at: UnixTimestamp },
    #[error("Scheme mismatch: expected {expected}, got {got}")]
    SchemeMismatch { expected: Scheme, got: Scheme },
    #[error("Network mismatch: expected {expected}, got {got}")]
    NetworkMismatch { expected: Network, got: Network },
    #[error("Asset mismatch: expected {expected}, got {got}")]
    AssetMismatch { expected: Address, got: Address },
    #[error("Recipient mismatch: expected {expected}, got {got}")]
    RecipientMismatch { expected: Address, got: Address },
    #[error("Insufficient amount: required {required}, authorized {authorized}")]
    InsufficientAmount {
        required: TokenAmount,
        authorized: TokenAmount,
    },
    #[error("validBefore {valid_before} is not after validAfter {valid_after}")]
    InvalidValidityWindow {
        valid_after: UnixTimestamp,
        valid_before: UnixTimestamp,
    },
    #[error("Authorization not valid until {valid_after}")]
    NotYetValid { valid_after: UnixTimestamp },
    #[error("Authorization expired at {valid_before}")]
    AuthorizationExpired { valid_before: UnixTimestamp },
    #[error("Missing signature")]
    MissingSignature,
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("Payment signed with the public development key on value-bearing network {0}")]
    TestKeyOnMainnet(Network),
}

impl VerificationFailure {
    /// Stable machine-readable reason, sent as `invalidReason`.
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationFailure::RequirementExpired { .. } => "requirement_expired",
            VerificationFailure::SchemeMismatch { .. } => "scheme_mismatch",
            VerificationFailure::NetworkMismatch { .. } => "network_mismatch",
            VerificationFailure::AssetMismatch { .. } => "asset_mismatch",
            VerificationFailure::RecipientMismatch { .. } => "recipient_mismatch",
            VerificationFailure::InsufficientAmount { .. } => "insufficient_amount",
            VerificationFailure::InvalidValidityWindow { .. } => "invalid_validity_window",
            VerificationFailure::NotYetValid { .. } => "authorization_not_yet_valid",
            VerificationFailure::AuthorizationExpired { .. } => "authorization_expired",
            VerificationFailure::MissingSignature => "missing_signature",
            VerificationFailure::InvalidSignature(e) => e.reason(),
            VerificationFailure::TestKeyOnMainnet(_) => "test_key_on_mainnet",
        }
    }

    /// Payer, when verification got far enough to know it.
    pub fn payer(&self) -> Option<Address> {
        match self {
            VerificationFailure::InvalidSignature(SignatureError::AddressMismatch {
                expected,
                ..
            }) => Some(*expected),
            _ => None,
        }
    }
}

/// Checks `payload` against `requirements` at time `now` and returns the payer.
pub fn verify_payment(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
    now: UnixTimestamp,
) -> Result<Address, VerificationFailure> {
    if payload.scheme != requirements.scheme {
        return Err(VerificationFailure::SchemeMismatch {
            expected: requirements.scheme,
            got: payload.scheme,
        });
    }
    if payload.network != requirements.network {
        return Err(VerificationFailure::NetworkMismatch {
            expected: requirements.network,
            got: payload.network,
        });
    }
    if requirements.asset != requirements.network.usdc() {
        return Err(VerificationFailure::AssetMismatch {
            expected: requirements.network.usdc(),
            got: requirements.asset,
        });
    }

    let authorization = &payload.payload.authorization;
    if authorization.to != requirements.pay_to {
        return Err(VerificationFailure::RecipientMismatch {
            expected: requirements.pay_to,
            got: authorization.to,
        });
    }
    if authorization.value < requirements.max_amount_required {
        return Err(VerificationFailure::InsufficientAmount {
            required: requirements.max_amount_required,
            authorized: authorization.value,
        });
    }
    if let Some(expires_at) = requirements.expires_at() {
        if now > expires_at {
            return Err(VerificationFailure::RequirementExpired { expires_at });
        }
    }
    if authorization.valid_before <= authorization.valid_after {
        return Err(VerificationFailure::InvalidValidityWindow {
            valid_after: authorization.valid_after,
            valid_before: authorization.valid_before,
        });
    }
    if now < authorization.valid_after {
        return Err(VerificationFailure::NotYetValid {
            valid_after: authorization.valid_after,
        });
    }
    if now > authorization.valid_before {
        return Err(VerificationFailure::AuthorizationExpired {
            valid_before: authorization.valid_before,
        });
    }

    let signature = payload.payload.signature.trim();
    if signature.is_empty() {
        return Err(VerificationFailure::MissingSignature);
    }
    let domain = TokenDomain::for_token(requirements.network, requirements.asset);
    let payer = verifier::recover_authorization_signer(authorization, signature, &domain)?;

    if is_dev_signer(payer) && requirements.network.is_mainnet() {
        tracing::error!(
            network = %requirements.network,
            %payer,
            "Rejecting payment signed with the public development key"
        );
        return Err(VerificationFailure::TestKeyOnMainnet(requirements.network));
    }
    Ok(payer)
}
