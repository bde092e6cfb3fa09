//! EIP-712 hashing of `TransferWithAuthorization` messages.
//!
//! The digest a payer signs is
//! `keccak256(0x1901 ‖ domainSeparator ‖ structHash)` where
//!
//! - `domainSeparator = keccak256(DOMAIN_TYPEHASH ‖ keccak256(name) ‖ keccak256(version) ‖ chainId ‖ verifyingContract)`
//! - `structHash = keccak256(TRANSFER_TYPEHASH ‖ from ‖ to ‖ value ‖ validAfter ‖ validBefore ‖ nonce)`
//!
//! Every member is one 32-byte ABI word: integers big-endian and right-aligned,
//! addresses right-aligned after 12 zero bytes, the nonce as its raw 32 bytes.
//! Only byte operations are involved, so the digest does not depend on platform or locale.

use alloy_primitives::{Address, B256, U256, keccak256};
use once_cell::sync::Lazy;
use std::borrow::Cow;

use crate::network::Network;
use crate::types::Authorization;

pub const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const TRANSFER_WITH_AUTHORIZATION_TYPE: &str = "TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)";

pub static DOMAIN_TYPEHASH: Lazy<B256> = Lazy::new(|| keccak256(EIP712_DOMAIN_TYPE));

pub static TRANSFER_TYPEHASH: Lazy<B256> =
    Lazy::new(|| keccak256(TRANSFER_WITH_AUTHORIZATION_TYPE));

/// The EIP-712 domain of a token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDomain {
    pub name: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl TokenDomain {
    /// The USDC domain on `network`, from the static network table.
    pub fn for_network(network: Network) -> Self {
        let info = network.info();
        Self {
            name: Cow::Borrowed(info.eip712_name),
            version: Cow::Borrowed(info.eip712_version),
            chain_id: info.chain_id,
            verifying_contract: info.usdc,
        }
    }

    /// The domain of `token` on `network`.
    ///
    /// Tokens other than the network's USDC have no registered name/version; the USDC
    /// metadata is used for them and the gap is logged.
    pub fn for_token(network: Network, token: Address) -> Self {
        let mut domain = Self::for_network(network);
        if token != domain.verifying_contract {
            tracing::warn!(
                %network,
                %token,
                "No EIP-712 metadata registered for token, using USDC name/version"
            );
            domain.verifying_contract = token;
        }
        domain
    }

    /// Resolves a domain by network name, falling back to the default network's metadata.
    ///
    /// For tooling and simulation only. The fallback is logged as a configuration gap.
    pub fn for_network_name(name: &str) -> Self {
        Self::for_network(Network::resolve_or_fallback(name))
    }

    pub fn separator(&self) -> B256 {
        let mut buf = [0u8; 32 * 5];
        buf[0..32].copy_from_slice(DOMAIN_TYPEHASH.as_slice());
        buf[32..64].copy_from_slice(keccak256(self.name.as_bytes()).as_slice());
        buf[64..96].copy_from_slice(keccak256(self.version.as_bytes()).as_slice());
        buf[96..128].copy_from_slice(&uint_word(U256::from(self.chain_id)));
        buf[128..160].copy_from_slice(&address_word(self.verifying_contract));
        keccak256(buf)
    }
}

fn uint_word(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// `hashStruct` of a `TransferWithAuthorization`.
pub fn struct_hash(authorization: &Authorization) -> B256 {
    let mut buf = [0u8; 32 * 7];
    buf[0..32].copy_from_slice(TRANSFER_TYPEHASH.as_slice());
    buf[32..64].copy_from_slice(&address_word(authorization.from));
    buf[64..96].copy_from_slice(&address_word(authorization.to));
    buf[96..128].copy_from_slice(&uint_word(authorization.value.0));
    buf[128..160].copy_from_slice(&uint_word(authorization.valid_after.into()));
    buf[160..192].copy_from_slice(&uint_word(authorization.valid_before.into()));
    buf[192..224].copy_from_slice(&authorization.nonce.0);
    keccak256(buf)
}

/// The digest signed by the payer.
pub fn signing_hash(domain: &TokenDomain, authorization: &Authorization) -> B256 {
    let mut buf = [0u8; 2 + 32 + 32];
    buf[0] = 0x19;
    buf[1] = 0x01;
    buf[2..34].copy_from_slice(domain.separator().as_slice());
    buf[34..66].copy_from_slice(struct_hash(authorization).as_slice());
    keccak256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{HexEncodedNonce, TokenAmount};
    use alloy_primitives::{FixedBytes, address, b256};
    use alloy_sol_types::{SolStruct, eip712_domain, sol};

    sol! {
        struct TransferWithAuthorization {
            address from;
            address to;
            uint256 value;
            uint256 validAfter;
            uint256 validBefore;
            bytes32 nonce;
        }
    }

    fn authorization() -> Authorization {
        Authorization {
            from: address!("0x857b06519E91e3A54538791bDbb0E22373e36b66"),
            to: address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            value: TokenAmount::from(10_000u64),
            valid_after: UnixTimestamp::from_secs(1740672089),
            valid_before: UnixTimestamp::from_secs(1740672154),
            nonce: "0xf3746613c2d920b5fdabc0856f2aeb2d4f88ee6037b8cc5d04a71a4462f13480"
                .parse::<HexEncodedNonce>()
                .unwrap(),
        }
    }

    fn as_sol(authorization: &Authorization) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value.0,
            validAfter: authorization.valid_after.into(),
            validBefore: authorization.valid_before.into(),
            nonce: FixedBytes(authorization.nonce.0),
        }
    }

    #[test]
    fn typehashes_match_usdc() {
        assert_eq!(
            *DOMAIN_TYPEHASH,
            b256!("0x8b73c3c69bb8fe3d512ecc4cf759cc79239f7b179b0ffacaa9a75d522b39400f")
        );
        assert_eq!(
            *TRANSFER_TYPEHASH,
            b256!("0x7c7c6cdb67a18743f49ec6fa9b35f50d52ed05cbed4cc592e13b44501c1a2267")
        );
    }

    #[test]
    fn digest_matches_alloy_for_every_network() {
        let authorization = authorization();
        for network in Network::variants() {
            let info = network.info();
            let domain = TokenDomain::for_network(*network);
            let reference = eip712_domain! {
                name: info.eip712_name,
                version: info.eip712_version,
                chain_id: info.chain_id,
                verifying_contract: info.usdc,
            };
            assert_eq!(domain.separator(), reference.separator(), "{network}");
            assert_eq!(
                signing_hash(&domain, &authorization),
                as_sol(&authorization).eip712_signing_hash(&reference),
                "{network}"
            );
        }
    }

    #[test]
    fn struct_hash_matches_alloy() {
        let authorization = authorization();
        assert_eq!(
            struct_hash(&authorization),
            as_sol(&authorization).eip712_hash_struct()
        );
    }

    #[test]
    fn digest_is_deterministic_and_field_sensitive() {
        let domain = TokenDomain::for_network(Network::BaseSepolia);
        let base = authorization();
        let digest = signing_hash(&domain, &base);
        assert_eq!(digest, signing_hash(&domain, &base));

        let mut changed = base;
        changed.value = TokenAmount::from(10_001u64);
        assert_ne!(digest, signing_hash(&domain, &changed));

        let mut changed = base;
        changed.nonce.0[31] ^= 1;
        assert_ne!(digest, signing_hash(&domain, &changed));

        let other_chain = TokenDomain::for_network(Network::Base);
        assert_ne!(digest, signing_hash(&other_chain, &base));
    }

    #[test]
    fn unknown_network_name_uses_fallback_domain() {
        assert_eq!(
            TokenDomain::for_network_name("not-a-chain"),
            TokenDomain::for_network(Network::FALLBACK)
        );
    }
}
