//! Alloy-backed settlement client for EVM networks.
//!
//! One [`EvmChainProvider`] per configured network. It owns the facilitator wallets for that
//! network, talks to the configured RPC endpoints with per-endpoint throttling and fallback,
//! and submits transactions that are paid for by the facilitator.

use alloy_network::{
    Ethereum as AlloyEthereum, EthereumWallet, NetworkWallet, ReceiptResponse, TransactionBuilder,
};
use alloy_primitives::{Address, Bytes};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, TransactionRequest};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, sol};
use alloy_transport::TransportError;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::{Instrument, instrument};

use crate::chain::{
    AuthorizedTransfer, ChainError, NativeTransfer, PendingNonceManager, TransferWithAuthorization,
};
use crate::config::NetworkConfig;
use crate::network::Network;
use crate::types::{TokenAmount, TransactionHash};

sol! {
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    interface IEIP3009 {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }

    #[allow(missing_docs)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// Gas, blob gas, nonce and chain ID fillers.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// Filled, wallet-signing provider over a fallback set of HTTP transports.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// A transaction the facilitator pays for: target, calldata and confirmations to wait for.
pub struct MetaTransaction {
    pub to: Address,
    pub calldata: Bytes,
    pub confirmations: u64,
}

#[derive(Debug)]
pub struct EvmChainProvider {
    network: Network,
    eip1559: bool,
    receipt_timeout: Duration,
    confirmations: u64,
    inner: InnerProvider,
    signer_addresses: Arc<Vec<Address>>,
    signer_cursor: Arc<AtomicUsize>,
    nonce_manager: PendingNonceManager,
}

impl EvmChainProvider {
    pub fn from_config(network: Network, config: &NetworkConfig) -> Result<Self, ChainError> {
        let chain_id = network.chain_id();

        // 1. Signers
        let signers = config
            .signers
            .iter()
            .map(|key| {
                PrivateKeySigner::from_bytes(key.inner().as_b256())
                    .map(|s| s.with_chain_id(Some(chain_id)))
                    .map_err(|e| ChainError::Signer(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut signers = signers.into_iter();
        let first_signer = signers.next().ok_or_else(|| {
            ChainError::Config(format!("{network}: at least one signer should be provided"))
        })?;
        let mut wallet = EthereumWallet::from(first_signer);
        for signer in signers {
            wallet.register_signer(signer);
        }
        let signer_addresses =
            NetworkWallet::<AlloyEthereum>::signer_addresses(&wallet).collect::<Vec<_>>();

        // 2. Transports
        let transports = config
            .rpc
            .iter()
            .filter(|rpc| matches!(rpc.http.scheme(), "http" | "https"))
            .map(|rpc| {
                tracing::info!(%network, rpc_url = %rpc.http, rate_limit = ?rpc.rate_limit, "Using HTTP transport");
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rpc.rate_limit.unwrap_or(u32::MAX)))
                    .service(Http::new(rpc.http.clone()))
            })
            .collect::<Vec<_>>();
        let transport_count = NonZeroUsize::new(transports.len()).ok_or_else(|| {
            ChainError::Config(format!("{network}: no usable http(s) rpc endpoint"))
        })?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(transport_count))
            .service(transports);
        let client = RpcClient::new(fallback, false);

        // 3. Provider
        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::default(),
                ),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        tracing::info!(%network, signers = ?signer_addresses, "Initialized EVM provider");

        Ok(Self {
            network,
            eip1559: config.eip1559,
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
            confirmations: config.confirmations,
            inner,
            signer_addresses: Arc::new(signer_addresses),
            signer_cursor: Arc::new(AtomicUsize::new(0)),
            nonce_manager,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn signer_addresses(&self) -> &[Address] {
        &self.signer_addresses
    }

    /// Round-robin selection of the wallet paying for the next transaction.
    fn next_signer_address(&self) -> Address {
        let count = self.signer_addresses.len();
        let index = if count == 1 {
            0
        } else {
            self.signer_cursor.fetch_add(1, Ordering::Relaxed) % count
        };
        self.signer_addresses[index]
    }

    /// Signs, submits and waits for `tx`.
    ///
    /// Legacy-gas networks get an explicit gas price. The transaction is signed before it is
    /// sent, so its hash is known even when submission fails. Any failure after the nonce was
    /// allocated resets the sender's cached nonce. A submission that may have reached the
    /// network, or a receipt that does not arrive within the configured timeout, yields
    /// [`ChainError::Unconfirmed`] carrying the hash, since the transaction may still be mined.
    #[instrument(skip_all, err, fields(network = %self.network, to = %tx.to, otel.kind = "client"))]
    pub async fn send_transaction(&self, tx: MetaTransaction) -> Result<TransactionHash, ChainError> {
        let from = self.next_signer_address();
        let mut request = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(from)
            .with_input(tx.calldata);

        if !self.eip1559 {
            let gas_price = self
                .inner
                .get_gas_price()
                .instrument(tracing::info_span!("get_gas_price"))
                .await?;
            request.set_gas_price(gas_price);
        }

        let gas_limit = self
            .inner
            .estimate_gas(request.clone())
            .block(BlockId::pending())
            .await?;
        request.set_gas_limit(gas_limit);

        let signed = match self.inner.fill(request).await {
            Ok(sendable) => sendable
                .try_into_envelope()
                .map_err(|e| ChainError::Signer(e.to_string())),
            Err(e) => Err(ChainError::Transport(e)),
        };
        let envelope = match signed {
            Ok(envelope) => envelope,
            Err(e) => {
                self.nonce_manager.reset_nonce(from).await;
                return Err(e);
            }
        };
        let tx_hash = TransactionHash(*envelope.tx_hash());

        let pending = match self.inner.send_tx_envelope(envelope).await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.reset_nonce(from).await;
                let error = submission_error(tx_hash, e);
                if error.unconfirmed_hash().is_some() {
                    tracing::warn!(network = %self.network, tx = %tx_hash, %from, "Submission outcome unknown: {error}");
                }
                return Err(error);
            }
        };
        tracing::info!(network = %self.network, tx = %tx_hash, %from, "Transaction submitted");

        let receipt = pending
            .with_required_confirmations(tx.confirmations)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await;
        match receipt {
            Ok(receipt) if ReceiptResponse::status(&receipt) => Ok(tx_hash),
            Ok(_) => {
                tracing::warn!(network = %self.network, tx = %tx_hash, "Transaction reverted");
                Err(ChainError::Reverted(tx_hash))
            }
            Err(source) => {
                self.nonce_manager.reset_nonce(from).await;
                Err(ChainError::Unconfirmed { tx_hash, source })
            }
        }
    }
}

/// Maps a failed `eth_sendRawTransaction` for the signed transaction `tx_hash`.
///
/// An error response from the node means it refused the transaction. Anything else, such as
/// a dropped connection or a timeout, may have happened after the node accepted it.
fn submission_error(tx_hash: TransactionHash, error: TransportError) -> ChainError {
    let refused = error
        .as_error_resp()
        .is_some_and(|payload| !payload.message.contains("already known"));
    if refused {
        ChainError::Transport(error)
    } else {
        ChainError::Unconfirmed {
            tx_hash,
            source: PendingTransactionError::from(error),
        }
    }
}

#[async_trait]
impl AuthorizedTransfer for EvmChainProvider {
    async fn execute_transfer_with_authorization(
        &self,
        transfer: &TransferWithAuthorization,
    ) -> Result<TransactionHash, ChainError> {
        let authorization = &transfer.authorization;
        let signature = &transfer.signature;
        let call = IEIP3009::transferWithAuthorizationCall {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value.0,
            validAfter: authorization.valid_after.into(),
            validBefore: authorization.valid_before.into(),
            nonce: authorization.nonce.as_b256(),
            v: signature.v,
            r: signature.r,
            s: signature.s,
        };
        self.send_transaction(MetaTransaction {
            to: transfer.token,
            calldata: call.abi_encode().into(),
            confirmations: self.confirmations,
        })
        .await
    }
}

#[async_trait]
impl NativeTransfer for EvmChainProvider {
    async fn send_native_transfer(
        &self,
        to: Address,
        amount: TokenAmount,
    ) -> Result<TransactionHash, ChainError> {
        let call = IERC20::transferCall {
            to,
            amount: amount.0,
        };
        self.send_transaction(MetaTransaction {
            to: self.network.usdc(),
            calldata: call.abi_encode().into(),
            confirmations: self.confirmations,
        })
        .await
    }
}
