//! Client-side counterpart of the verifier: signs `TransferWithAuthorization` messages.
//!
//! Used to build payloads for self-tests, simulations and the development flow. The
//! well-known development key is public; payments it signs are refused on networks
//! where real value moves (see [`is_dev_signer`]).

use alloy_primitives::{Address, B256, address};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use std::str::FromStr;

use crate::crypto::eip712::{TokenDomain, signing_hash};
use crate::crypto::verifier::RawSignature;
use crate::network::Network;
use crate::timestamp::UnixTimestamp;
use crate::types::{
    Authorization, ExactEvmPayload, HexEncodedNonce, PaymentPayload, PaymentRequirements,
    X402Version,
};

/// First account of the standard development mnemonic (Anvil/Hardhat account #0).
pub const DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Address of [`DEV_PRIVATE_KEY`].
pub const DEV_SIGNER_ADDRESS: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

/// Clock skew tolerance applied to `validAfter` of freshly signed authorizations.
const VALID_AFTER_SKEW_SECS: u64 = 60;

pub fn is_dev_signer(address: Address) -> bool {
    address == DEV_SIGNER_ADDRESS
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("Signing failed: {0}")]
    Signing(#[from] alloy_signer::Error),
}

/// Signs EIP-3009 authorizations with a local private key.
#[derive(Debug, Clone)]
pub struct AuthorizationSigner {
    inner: PrivateKeySigner,
}

impl AuthorizationSigner {
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        PrivateKeySigner::from_str(key)
            .map(Self::new)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))
    }

    /// A signer holding [`DEV_PRIVATE_KEY`].
    pub fn dev() -> Result<Self, SignerError> {
        Self::from_hex(DEV_PRIVATE_KEY)
    }

    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    pub fn sign_digest(&self, digest: &B256) -> Result<RawSignature, SignerError> {
        let signature = self.inner.sign_hash_sync(digest)?;
        let bytes = signature.as_bytes();
        // alloy encodes v as 27/28, so the parse cannot fail on length or v.
        RawSignature::from_bytes(&bytes)
            .map_err(|e| SignerError::Signing(alloy_signer::Error::other(e)))
    }

    /// Signs under an explicit domain and returns `0x`-prefixed hex of `r ‖ s ‖ v`.
    pub fn sign_for_domain(
        &self,
        authorization: &Authorization,
        domain: &TokenDomain,
    ) -> Result<String, SignerError> {
        let digest = signing_hash(domain, authorization);
        let signature = self.sign_digest(&digest)?;
        Ok(format!("0x{}", hex::encode(signature.to_bytes())))
    }

    /// Signs for the USDC domain of `network`.
    pub fn sign_authorization(
        &self,
        authorization: &Authorization,
        network: Network,
    ) -> Result<String, SignerError> {
        self.sign_for_domain(authorization, &TokenDomain::for_network(network))
    }

    /// Builds and signs a payment that satisfies `requirements` exactly.
    ///
    /// The authorization is valid from shortly before `now` until `now + maxTimeoutSeconds`
    /// and carries a fresh random nonce.
    pub fn pay(
        &self,
        requirements: &PaymentRequirements,
        now: UnixTimestamp,
    ) -> Result<PaymentPayload, SignerError> {
        let authorization = Authorization {
            from: self.address(),
            to: requirements.pay_to,
            value: requirements.max_amount_required,
            valid_after: UnixTimestamp::from_secs(
                now.as_secs().saturating_sub(VALID_AFTER_SKEW_SECS),
            ),
            valid_before: now + requirements.max_timeout_seconds,
            nonce: HexEncodedNonce::random(),
        };
        let mut domain = TokenDomain::for_token(requirements.network, requirements.asset);
        if let Some(extra) = &requirements.extra {
            domain.name = extra.name.clone().into();
            domain.version = extra.version.clone().into();
        }
        let signature = self.sign_for_domain(&authorization, &domain)?;
        Ok(PaymentPayload {
            x402_version: X402Version::V1,
            scheme: requirements.scheme,
            network: requirements.network,
            payload: ExactEvmPayload {
                signature,
                authorization,
            },
        })
    }
}
