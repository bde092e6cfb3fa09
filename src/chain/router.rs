use alloy_primitives::Address;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::instrument;

use crate::chain::{
    AuthorizedTransfer, ChainError, EvmChainProvider, NativeTransfer, SimulatedChain,
    TransferWithAuthorization,
};
use crate::config::{Environment, NetworkConfig};
use crate::crypto::RawSignature;
use crate::network::Network;
use crate::types::{Authorization, TokenAmount, TransactionHash};

/// How settlement reaches a network.
#[derive(Clone)]
pub enum ChainRoute {
    /// Home chain: the facilitator pays the recipient directly.
    Native(Arc<dyn NativeTransfer>),
    /// Any other EVM network: the payer's authorization is redeemed on the token contract.
    Evm(Arc<dyn AuthorizedTransfer>),
}

impl Debug for ChainRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainRoute::Native(_) => f.write_str("ChainRoute::Native"),
            ChainRoute::Evm(_) => f.write_str("ChainRoute::Evm"),
        }
    }
}

/// A verified payment to be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementRequest {
    pub network: Network,
    pub token: Address,
    /// Price of the requirement. The home chain pays exactly this, never the authorized value.
    pub amount: TokenAmount,
    pub authorization: Authorization,
    pub signature: RawSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub tx_hash: TransactionHash,
    /// Produced by the development-only simulated route; nothing moved on-chain.
    pub simulated: bool,
}

/// Dispatches settlement to the client registered for a network.
#[derive(Debug)]
pub struct NetworkRouter {
    routes: HashMap<Network, ChainRoute>,
    environment: Environment,
    simulated: SimulatedChain,
}

impl NetworkRouter {
    pub fn new(environment: Environment) -> Self {
        Self {
            routes: HashMap::new(),
            environment,
            simulated: SimulatedChain,
        }
    }

    pub fn with_route(mut self, network: Network, route: ChainRoute) -> Self {
        self.routes.insert(network, route);
        self
    }

    /// Builds an alloy client for every configured network.
    ///
    /// The home chain is routed through direct transfers, the rest through
    /// `transferWithAuthorization`.
    pub fn from_config(
        networks: &BTreeMap<Network, NetworkConfig>,
        environment: Environment,
    ) -> Result<Self, ChainError> {
        let mut router = Self::new(environment);
        for (network, config) in networks {
            let provider = Arc::new(EvmChainProvider::from_config(*network, config)?);
            let route = if network.is_home() {
                ChainRoute::Native(provider)
            } else {
                ChainRoute::Evm(provider)
            };
            router = router.with_route(*network, route);
        }
        if !environment.is_development() {
            let missing = Network::variants()
                .iter()
                .filter(|n| !router.routes.contains_key(*n))
                .map(|n| n.to_string())
                .collect::<Vec<_>>();
            tracing::info!(?missing, "Payments on networks without a client will be rejected");
        }
        Ok(router)
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Whether a real client is registered for `network`.
    pub fn supports(&self, network: Network) -> bool {
        self.routes.contains_key(&network)
    }

    /// Networks a payment can be settled on, simulated ones included.
    pub fn networks(&self) -> Vec<Network> {
        if self.environment.is_development() {
            return Network::variants().to_vec();
        }
        let mut networks = self.routes.keys().copied().collect::<Vec<_>>();
        networks.sort();
        networks
    }

    #[instrument(skip_all, err, fields(network = %request.network, nonce = %request.authorization.nonce))]
    pub async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, ChainError> {
        let authorization = &request.authorization;
        let tx_hash = match self.routes.get(&request.network) {
            Some(ChainRoute::Native(client)) => {
                client
                    .send_native_transfer(authorization.to, request.amount)
                    .await?
            }
            Some(ChainRoute::Evm(client)) => {
                let transfer = TransferWithAuthorization {
                    token: request.token,
                    authorization: *authorization,
                    signature: request.signature,
                };
                client.execute_transfer_with_authorization(&transfer).await?
            }
            None if self.environment.is_development() => {
                let tx_hash = self
                    .simulated
                    .transaction_hash(request.network, &authorization.nonce);
                tracing::error!(
                    network = %request.network,
                    tx = %tx_hash,
                    "SIMULATED settlement: no chain client configured, no funds moved"
                );
                return Ok(SettlementReceipt {
                    tx_hash,
                    simulated: true,
                });
            }
            None => {
                tracing::error!(
                    network = %request.network,
                    environment = %self.environment,
                    "Refusing to settle on a network without a chain client"
                );
                return Err(ChainError::UnsupportedNetwork(request.network));
            }
        };
        tracing::info!(network = %request.network, tx = %tx_hash, "Settled");
        Ok(SettlementReceipt {
            tx_hash,
            simulated: false,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeChain;
    use super::*;
    use crate::timestamp::UnixTimestamp;
    use crate::types::HexEncodedNonce;
    use alloy_primitives::{B256, address};

    fn request(network: Network) -> SettlementRequest {
        SettlementRequest {
            network,
            token: network.usdc(),
            amount: TokenAmount::from(10_000u64),
            authorization: Authorization {
                from: address!("0x857b06519E91e3A54538791bDbb0E22373e36b66"),
                to: address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
                value: TokenAmount::from(25_000u64),
                valid_after: UnixTimestamp::from_secs(0),
                valid_before: UnixTimestamp::from_secs(u32::MAX as u64),
                nonce: HexEncodedNonce([1; 32]),
            },
            signature: RawSignature {
                r: B256::repeat_byte(1),
                s: B256::repeat_byte(2),
                v: 27,
            },
        }
    }

    #[tokio::test]
    async fn home_chain_pays_the_price_not_the_authorized_value() {
        let chain = Arc::new(FakeChain::default());
        let router = NetworkRouter::new(Environment::Production)
            .with_route(Network::ArcTestnet, ChainRoute::Native(chain.clone()));
        let receipt = router.settle(&request(Network::ArcTestnet)).await.unwrap();
        assert!(!receipt.simulated);
        let calls = chain.native_calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, TokenAmount::from(10_000u64));
        assert!(chain.authorized_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn evm_networks_redeem_the_authorization() {
        let chain = Arc::new(FakeChain::default());
        let router = NetworkRouter::new(Environment::Production)
            .with_route(Network::Base, ChainRoute::Evm(chain.clone()));
        let req = request(Network::Base);
        let receipt = router.settle(&req).await.unwrap();
        assert_eq!(receipt.tx_hash, FakeChain::hash_for(&[1; 32]));
        let calls = chain.authorized_calls.lock();
        assert_eq!(calls[0].token, Network::Base.usdc());
        assert_eq!(calls[0].signature, req.signature);
    }

    #[tokio::test]
    async fn unconfigured_network_is_simulated_only_in_development() {
        let dev = NetworkRouter::new(Environment::Development);
        let receipt = dev.settle(&request(Network::Polygon)).await.unwrap();
        assert!(receipt.simulated);
        assert_eq!(
            receipt.tx_hash,
            SimulatedChain.transaction_hash(Network::Polygon, &HexEncodedNonce([1; 32]))
        );

        let prod = NetworkRouter::new(Environment::Production);
        assert!(matches!(
            prod.settle(&request(Network::Polygon)).await,
            Err(ChainError::UnsupportedNetwork(Network::Polygon))
        ));
        assert!(prod.networks().is_empty());
        assert!(!prod.supports(Network::Polygon));
    }

    #[tokio::test]
    async fn client_errors_propagate() {
        let chain = Arc::new(FakeChain {
            fail: true,
            ..Default::default()
        });
        let router = NetworkRouter::new(Environment::Development)
            .with_route(Network::Base, ChainRoute::Evm(chain));
        assert!(matches!(
            router.settle(&request(Network::Base)).await,
            Err(ChainError::Reverted(_))
        ));
    }
}
