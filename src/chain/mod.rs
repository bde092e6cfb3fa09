//! Settlement on-chain.
//!
//! The engine hands a verified authorization to the [`NetworkRouter`], which picks a client
//! by network: the home chain pays out with a direct token transfer from the facilitator's
//! wallet ([`NativeTransfer`]), every other configured network redeems the payer's signed
//! authorization through `transferWithAuthorization` ([`AuthorizedTransfer`]). The router only
//! returns a transaction hash or an error; it never touches payment records.

pub mod pending_nonce_manager;
pub mod provider;
pub mod router;
pub mod simulated;

pub use pending_nonce_manager::PendingNonceManager;
pub use provider::EvmChainProvider;
pub use router::{ChainRoute, NetworkRouter, SettlementReceipt, SettlementRequest};
pub use simulated::SimulatedChain;

use alloy_primitives::Address;
use alloy_provider::PendingTransactionError;
use alloy_transport::TransportError;
use async_trait::async_trait;

use crate::crypto::RawSignature;
use crate::network::Network;
use crate::types::{Authorization, TokenAmount, TransactionHash};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("No settlement client configured for {0}")]
    UnsupportedNetwork(Network),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Submitted, but no receipt arrived. The transaction may still be mined.
    #[error("Transaction {tx_hash} submitted but not confirmed: {source}")]
    Unconfirmed {
        tx_hash: TransactionHash,
        #[source]
        source: PendingTransactionError,
    },
    #[error("Transaction {0} reverted")]
    Reverted(TransactionHash),
    #[error("Signer error: {0}")]
    Signer(String),
    #[error("Chain client misconfigured: {0}")]
    Config(String),
}

impl ChainError {
    /// Transaction hash of a submitted transaction whose outcome is not known yet.
    pub fn unconfirmed_hash(&self) -> Option<TransactionHash> {
        match self {
            ChainError::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// An EIP-3009 authorization ready to be redeemed on `token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferWithAuthorization {
    pub token: Address,
    pub authorization: Authorization,
    pub signature: RawSignature,
}

/// Moves the home chain's token directly from the facilitator wallet.
#[async_trait]
pub trait NativeTransfer: Send + Sync {
    async fn send_native_transfer(
        &self,
        to: Address,
        amount: TokenAmount,
    ) -> Result<TransactionHash, ChainError>;
}

/// Redeems a signed `transferWithAuthorization` on an EVM network.
#[async_trait]
pub trait AuthorizedTransfer: Send + Sync {
    async fn execute_transfer_with_authorization(
        &self,
        transfer: &TransferWithAuthorization,
    ) -> Result<TransactionHash, ChainError>;
}
