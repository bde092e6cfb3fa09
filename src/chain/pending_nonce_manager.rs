use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Marks an address whose nonce has not been fetched yet.
const UNFETCHED: u64 = u64::MAX;

/// Transaction nonces of the facilitator wallets, cached per address.
///
/// The first nonce of an address is read with the `pending` block tag, so transactions still
/// in the mempool after a restart are counted. Later nonces are allocated locally. Each
/// address has its own lock; allocations for different wallets do not contend.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        // Clone the slot out so the map shard is not locked across the await below.
        let slot = {
            let entry = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(UNFETCHED)));
            Arc::clone(entry.value())
        };

        let mut nonce = slot.lock().await;
        let next = if *nonce == UNFETCHED {
            tracing::trace!(%address, "fetching pending nonce");
            provider.get_transaction_count(address).pending().await?
        } else {
            tracing::trace!(%address, current_nonce = *nonce, "allocating next nonce");
            *nonce + 1
        };
        *nonce = next;
        Ok(next)
    }
}

impl PendingNonceManager {
    /// Forgets the cached nonce of `address`; the next allocation queries the network.
    ///
    /// Called after a failed submission or a receipt timeout, when it is unknown whether the
    /// transaction reached the mempool.
    pub async fn reset_nonce(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address) {
            let mut nonce = slot.lock().await;
            *nonce = UNFETCHED;
            tracing::debug!(%address, "nonce cache reset");
        }
    }

    /// The last nonce handed out for `address`, if one is cached.
    pub async fn cached_nonce(&self, address: Address) -> Option<u64> {
        let slot = self.nonces.get(&address).map(|s| Arc::clone(s.value()))?;
        let nonce = *slot.lock().await;
        (nonce != UNFETCHED).then_some(nonce)
    }
}
