//! Development stand-in for networks without a chain client.
//!
//! Nothing is sent anywhere. The "transaction hash" is derived from the network and the
//! authorization nonce, so it is stable across retries and cannot collide with another
//! authorization's hash.

use alloy_primitives::keccak256;

use crate::network::Network;
use crate::types::{HexEncodedNonce, TransactionHash};

const DOMAIN: &[u8] = b"simulated:";

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedChain;

impl SimulatedChain {
    pub fn transaction_hash(&self, network: Network, nonce: &HexEncodedNonce) -> TransactionHash {
        let name = network.to_string();
        let mut preimage = Vec::with_capacity(DOMAIN.len() + name.len() + 32);
        preimage.extend_from_slice(DOMAIN);
        preimage.extend_from_slice(name.as_bytes());
        preimage.extend_from_slice(&nonce.0);
        TransactionHash(keccak256(preimage))
    }
}
