//! Signature verification for EIP-3009 authorizations.
//!
//! A signature is 65 bytes, `r ‖ s ‖ v`, sent as hex. The signer's address is recovered
//! from the EIP-712 digest and must equal the authorization's `from`. Each way this can
//! fail is a distinct [`SignatureError`], so a rejection always carries its cause.

use alloy_primitives::{Address, B256, Signature, U256, uint};

use crate::crypto::eip712::{TokenDomain, signing_hash};
use crate::network::Network;
use crate::types::Authorization;

pub const SIGNATURE_LENGTH: usize = 65;

/// Half the secp256k1 group order. Signatures with a larger `s` are rejected on-chain.
const SECP256K1N_HALF: U256 =
    uint!(0x7fffffffffffffffffffffffffffffff5d576e7357a4501ddfe92f46681b20a0_U256);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Signature is not valid hex")]
    MalformedHex,
    #[error("Signature must be {SIGNATURE_LENGTH} bytes, got {0}")]
    InvalidLength(usize),
    #[error("Invalid signature recovery byte v={0}")]
    InvalidRecoveryId(u8),
    #[error("Signature s value is not in the lower half of the curve order")]
    HighS,
    #[error("Could not recover a signer: {0}")]
    RecoveryFailed(String),
    #[error("Signer mismatch: recovered {recovered}, expected {expected}")]
    AddressMismatch { expected: Address, recovered: Address },
}

impl SignatureError {
    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            SignatureError::MalformedHex => "invalid_signature_hex",
            SignatureError::InvalidLength(_) => "invalid_signature_length",
            SignatureError::InvalidRecoveryId(_) => "invalid_signature_v",
            SignatureError::HighS => "invalid_signature_s",
            SignatureError::RecoveryFailed(_) => "signature_recovery_failed",
            SignatureError::AddressMismatch { .. } => "signer_mismatch",
        }
    }
}

/// A parsed `r ‖ s ‖ v` signature with `v` normalized to 27 or 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub r: B256,
    pub s: B256,
    pub v: u8,
}

impl RawSignature {
    /// Parses hex, with or without `0x`. A `v` of 0 or 1 is lifted to 27 or 28.
    pub fn parse(hex_signature: &str) -> Result<Self, SignatureError> {
        let digits = hex_signature
            .strip_prefix("0x")
            .or_else(|| hex_signature.strip_prefix("0X"))
            .unwrap_or(hex_signature);
        let bytes = hex::decode(digits).map_err(|_| SignatureError::MalformedHex)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(SignatureError::InvalidLength(bytes.len()));
        }
        let v = match bytes[64] {
            v @ (0 | 1) => v + 27,
            v @ (27 | 28) => v,
            other => return Err(SignatureError::InvalidRecoveryId(other)),
        };
        Ok(Self {
            r: B256::from_slice(&bytes[0..32]),
            s: B256::from_slice(&bytes[32..64]),
            v,
        })
    }

    pub fn y_parity(&self) -> bool {
        self.v == 28
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[0..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    /// Recovers the address that produced this signature over `digest`.
    pub fn recover(&self, digest: &B256) -> Result<Address, SignatureError> {
        let s = U256::from_be_bytes(self.s.0);
        if s > SECP256K1N_HALF {
            return Err(SignatureError::HighS);
        }
        let r = U256::from_be_bytes(self.r.0);
        Signature::new(r, s, self.y_parity())
            .recover_address_from_prehash(digest)
            .map_err(|e| SignatureError::RecoveryFailed(e.to_string()))
    }
}

/// Result of checking one signature: whether it is valid, who signed, and why not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCheck {
    pub valid: bool,
    pub recovered_address: Option<Address>,
    pub error: Option<SignatureError>,
}

impl From<Result<Address, SignatureError>> for SignatureCheck {
    fn from(result: Result<Address, SignatureError>) -> Self {
        match result {
            Ok(address) => SignatureCheck {
                valid: true,
                recovered_address: Some(address),
                error: None,
            },
            Err(error) => {
                let recovered_address = match &error {
                    SignatureError::AddressMismatch { recovered, .. } => Some(*recovered),
                    _ => None,
                };
                SignatureCheck {
                    valid: false,
                    recovered_address,
                    error: Some(error),
                }
            }
        }
    }
}

/// Recovers the signer of `authorization` under `domain` and checks it is `authorization.from`.
pub fn recover_authorization_signer(
    authorization: &Authorization,
    signature: &str,
    domain: &TokenDomain,
) -> Result<Address, SignatureError> {
    let signature = RawSignature::parse(signature)?;
    let digest = signing_hash(domain, authorization);
    let recovered = signature.recover(&digest)?;
    // `Address` equality is byte equality, so hex letter case never matters here.
    if recovered != authorization.from {
        return Err(SignatureError::AddressMismatch {
            expected: authorization.from,
            recovered,
        });
    }
    Ok(recovered)
}

/// Verifies a signature over `authorization` for `token_contract` on `network`.
pub fn verify(
    authorization: &Authorization,
    signature: &str,
    network: Network,
    token_contract: Address,
) -> SignatureCheck {
    let domain = TokenDomain::for_token(network, token_contract);
    recover_authorization_signer(authorization, signature, &domain).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signer::AuthorizationSigner;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{HexEncodedNonce, TokenAmount};
    use alloy_primitives::address;

    const KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn signed() -> (Authorization, String) {
        let signer = AuthorizationSigner::from_hex(KEY).unwrap();
        let authorization = Authorization {
            from: signer.address(),
            to: address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            value: TokenAmount::from(10_000u64),
            valid_after: UnixTimestamp::from_secs(1_700_000_000),
            valid_before: UnixTimestamp::from_secs(1_700_000_300),
            nonce: HexEncodedNonce([7u8; 32]),
        };
        let signature = signer
            .sign_authorization(&authorization, Network::BaseSepolia)
            .unwrap();
        (authorization, signature)
    }

    fn check(authorization: &Authorization, signature: &str) -> SignatureCheck {
        verify(
            authorization,
            signature,
            Network::BaseSepolia,
            Network::BaseSepolia.usdc(),
        )
    }

    #[test]
    fn valid_signature_recovers_sender() {
        let (authorization, signature) = signed();
        let result = check(&authorization, &signature);
        assert!(result.valid);
        assert_eq!(result.recovered_address, Some(authorization.from));
        assert_eq!(result.error, None);
    }

    #[test]
    fn zero_one_recovery_byte_is_normalized() {
        let (authorization, signature) = signed();
        let mut bytes = RawSignature::parse(&signature).unwrap().to_bytes();
        bytes[64] -= 27;
        let lowered = format!("0x{}", hex::encode(bytes));
        assert!(check(&authorization, &lowered).valid);
    }

    #[test]
    fn every_single_bit_flip_in_the_signature_is_rejected() {
        let (authorization, signature) = signed();
        let bytes = RawSignature::parse(&signature).unwrap().to_bytes();
        for index in 0..SIGNATURE_LENGTH {
            for bit in 0..8 {
                let mut mutated = bytes;
                mutated[index] ^= 1 << bit;
                let mutated = format!("0x{}", hex::encode(mutated));
                let result = check(&authorization, &mutated);
                assert!(!result.valid, "byte {index} bit {bit} still verified");
                assert!(result.error.is_some());
            }
        }
    }

    #[test]
    fn every_authorization_field_is_covered() {
        let (authorization, signature) = signed();
        let mut mutations = Vec::new();

        let mut a = authorization;
        a.from = address!("0x0000000000000000000000000000000000000001");
        mutations.push(a);
        let mut a = authorization;
        a.to = address!("0x0000000000000000000000000000000000000002");
        mutations.push(a);
        let mut a = authorization;
        a.value = TokenAmount::from(10_001u64);
        mutations.push(a);
        let mut a = authorization;
        a.valid_after = a.valid_after + 1;
        mutations.push(a);
        let mut a = authorization;
        a.valid_before = a.valid_before + 1;
        mutations.push(a);
        let mut a = authorization;
        a.nonce.0[0] ^= 0x80;
        mutations.push(a);

        for mutated in mutations {
            assert!(!check(&mutated, &signature).valid, "{mutated:?}");
        }
    }

    #[test]
    fn wrong_domain_is_rejected() {
        let (authorization, signature) = signed();
        let result = verify(
            &authorization,
            &signature,
            Network::Base,
            Network::Base.usdc(),
        );
        assert!(!result.valid);
        assert!(matches!(
            result.error,
            Some(SignatureError::AddressMismatch { .. }) | Some(SignatureError::RecoveryFailed(_))
        ));
    }

    #[test]
    fn distinct_errors_for_malformed_input() {
        let (authorization, _) = signed();
        assert_eq!(
            check(&authorization, "0xnothex").error,
            Some(SignatureError::MalformedHex)
        );
        assert_eq!(
            check(&authorization, "0x1234").error,
            Some(SignatureError::InvalidLength(2))
        );
        let bad_v = format!("0x{}{}", "11".repeat(64), "05");
        assert_eq!(
            check(&authorization, &bad_v).error,
            Some(SignatureError::InvalidRecoveryId(5))
        );
    }

    #[test]
    fn mismatch_reports_both_addresses() {
        let (mut authorization, signature) = signed();
        let expected = address!("0x00000000000000000000000000000000000000aa");
        let original_from = authorization.from;
        authorization.from = expected;
        // Changing `from` changes the digest, so the recovered key is unrelated to both.
        let result = check(&authorization, &signature);
        match result.error {
            Some(SignatureError::AddressMismatch {
                expected: e,
                recovered,
            }) => {
                assert_eq!(e, expected);
                assert_ne!(recovered, original_from);
                assert_eq!(result.recovered_address, Some(recovered));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
