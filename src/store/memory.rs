use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::network::Network;
use crate::store::{PaymentRecord, PaymentStatus, PaymentStore, RecordOutcome, StoreError};
use crate::types::HexEncodedNonce;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<PaymentRecord>,
    /// `(nonce, network)` of every non-failed record, pointing into `records`.
    live: HashMap<(HexEncodedNonce, Network), usize>,
}

/// Process-local store. Everything sits behind one lock, so the uniqueness check and the
/// insert cannot interleave with another writer.
#[derive(Debug, Default)]
pub struct InMemoryPaymentStore {
    inner: Mutex<Inner>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<PaymentRecord> {
        self.inner.lock().records.clone()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_payment_record(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let key = (record.nonce, record.network);
        if record.status != PaymentStatus::Failed && inner.live.contains_key(&key) {
            return Err(StoreError::DuplicateNonce {
                nonce: record.nonce,
                network: record.network,
            });
        }
        let index = inner.records.len();
        inner.records.push(record.clone());
        if record.status != PaymentStatus::Failed {
            inner.live.insert(key, index);
        }
        Ok(())
    }

    async fn exists_by_nonce_and_network(
        &self,
        nonce: &HexEncodedNonce,
        network: Network,
    ) -> Result<bool, StoreError> {
        Ok(self.inner.lock().live.contains_key(&(*nonce, network)))
    }

    async fn complete_payment_record(
        &self,
        id: Uuid,
        outcome: &RecordOutcome,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError> {
        let mut inner = self.inner.lock();
        let index = inner
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let record = &mut inner.records[index];
        record.complete(outcome, at)?;
        let updated = record.clone();
        if updated.status == PaymentStatus::Failed {
            inner.live.remove(&(updated.nonce, updated.network));
        }
        Ok(updated)
    }

    async fn find_by_nonce_and_network(
        &self,
        nonce: &HexEncodedNonce,
        network: Network,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .live
            .get(&(*nonce, network))
            .and_then(|index| inner.records.get(*index))
            .cloned())
    }

    async fn pending_records(&self) -> Result<Vec<PaymentRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{exercise_store, record};
    use std::sync::Arc;

    #[tokio::test]
    async fn satisfies_store_contract() {
        let store = InMemoryPaymentStore::new();
        exercise_store(&store).await;
        // first, same nonce on Base, the failed Polygon record and its retry
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn concurrent_inserts_of_one_nonce_admit_exactly_one() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_payment_record(&record(9, Network::ArcTestnet))
                    .await
                    .is_ok()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(store.len(), 1);
    }
}
