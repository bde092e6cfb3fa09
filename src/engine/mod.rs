//! The payment engine: issues requirements, verifies payments, settles them and owns the
//! lifecycle of payment records.
//!
//! Settlement is a test-and-set on `(nonce, network)`. The store lookup in
//! [`PaymentEngine::settle`] rejects obvious replays early; the store's uniqueness guard on
//! insert is what makes two concurrent settlements of one nonce impossible.
//!
//! Once a record is inserted the chain call runs in a tracked background task. A caller that
//! times out gets a retryable [`SettlementError::Timeout`] while the task keeps waiting for
//! the chain and writes the definitive outcome. A submitted transaction whose receipt never
//! arrived leaves its record `pending` for reconciliation instead of marking it failed.

mod error;
mod verify;

pub use error::{PaymentError, SettlementError};
pub use verify::{VerificationFailure, verify_payment};

use alloy_primitives::Address;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::instrument;
use uuid::Uuid;

use crate::chain::{ChainError, NetworkRouter, SettlementReceipt, SettlementRequest};
use crate::config::config_defaults;
use crate::crypto::RawSignature;
use crate::network::Network;
use crate::policy::{PolicyCheck, PolicyRequest};
use crate::store::{PaymentRecord, PaymentStatus, PaymentStore, RecordOutcome, StoreError};
use crate::timestamp::UnixTimestamp;
use crate::types::{
    PaymentPayload, PaymentRequirements, RequirementExtra, Scheme, SettleResponse, TokenAmount,
    TransactionHash, VerifyResponse,
};
use crate::util::{MoneyAmount, MoneyAmountParseError};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Passed to the policy check.
    pub org_id: Option<String>,
    /// How long a caller waits for settlement.
    pub settlement_timeout: Duration,
    /// Lifetime of an issued requirement.
    pub requirement_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            org_id: None,
            settlement_timeout: Duration::from_secs(
                config_defaults::DEFAULT_SETTLEMENT_TIMEOUT_SECS,
            ),
            requirement_ttl: Duration::from_secs(config_defaults::DEFAULT_REQUIREMENT_TTL_SECS),
        }
    }
}

/// A settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payment_id: Uuid,
    pub payer: Address,
    pub network: Network,
    pub tx_hash: TransactionHash,
    pub simulated: bool,
}

impl From<&Settlement> for SettleResponse {
    fn from(settlement: &Settlement) -> Self {
        SettleResponse {
            success: true,
            transaction_hash: Some(settlement.tx_hash),
            network: settlement.network,
            payer: Some(settlement.payer),
            error_reason: None,
        }
    }
}

#[derive(Clone)]
pub struct PaymentEngine {
    store: Arc<dyn PaymentStore>,
    policy: Arc<dyn PolicyCheck>,
    router: Arc<NetworkRouter>,
    config: EngineConfig,
    tracker: TaskTracker,
}

impl PaymentEngine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        policy: Arc<dyn PolicyCheck>,
        router: Arc<NetworkRouter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            policy,
            router,
            config,
            tracker: TaskTracker::new(),
        }
    }

    pub fn router(&self) -> &NetworkRouter {
        &self.router
    }

    /// Prices `resource` at `amount` of the network's USDC, payable to `pay_to`.
    ///
    /// The amount is converted to the token's smallest unit by truncation; amounts that
    /// truncate to nothing are refused. The requirement expires after the configured TTL.
    pub fn create_requirement(
        &self,
        resource: &str,
        amount: MoneyAmount,
        description: Option<String>,
        network: Network,
        pay_to: Address,
    ) -> Result<PaymentRequirements, MoneyAmountParseError> {
        self.create_requirement_at(
            resource,
            amount,
            description,
            network,
            pay_to,
            UnixTimestamp::now(),
        )
    }

    pub fn create_requirement_at(
        &self,
        resource: &str,
        amount: MoneyAmount,
        description: Option<String>,
        network: Network,
        pay_to: Address,
        now: UnixTimestamp,
    ) -> Result<PaymentRequirements, MoneyAmountParseError> {
        let units = amount.to_token_units(network.decimals())?;
        let ttl = self.config.requirement_ttl.as_secs();
        let info = network.info();
        Ok(PaymentRequirements {
            scheme: Scheme::Exact,
            network,
            max_amount_required: TokenAmount(units),
            resource: resource.to_string(),
            description,
            mime_type: None,
            pay_to,
            max_timeout_seconds: ttl,
            asset: info.usdc,
            extra: Some(RequirementExtra {
                name: info.eip712_name.to_string(),
                version: info.eip712_version.to_string(),
                expires_at: Some(now + ttl),
            }),
        })
    }

    /// Verifies `payload` against `requirements` now.
    pub fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<Address, VerificationFailure> {
        self.verify_at(payload, requirements, UnixTimestamp::now())
    }

    pub fn verify_at(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        now: UnixTimestamp,
    ) -> Result<Address, VerificationFailure> {
        let result = verify_payment(payload, requirements, now);
        if let Err(failure) = &result {
            tracing::info!(
                reason = failure.reason(),
                network = %requirements.network,
                resource = %requirements.resource,
                "Payment verification failed: {failure}"
            );
        }
        result
    }

    pub fn verify_response(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> VerifyResponse {
        match self.verify(payload, requirements) {
            Ok(payer) => VerifyResponse::valid(payer),
            Err(failure) => VerifyResponse::invalid(
                failure.payer().or(Some(payload.payload.authorization.from)),
                failure.reason(),
            ),
        }
    }

    /// Verifies, checks replay and policy, records and settles a payment.
    #[instrument(skip_all, err, fields(network = %payload.network, nonce = %payload.payload.authorization.nonce))]
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<Settlement, PaymentError> {
        self.settle_at(payload, requirements, UnixTimestamp::now())
            .await
    }

    pub async fn settle_at(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        now: UnixTimestamp,
    ) -> Result<Settlement, PaymentError> {
        let payer = self.verify_at(payload, requirements, now)?;
        let authorization = payload.payload.authorization;
        let network = requirements.network;
        let signature = RawSignature::parse(payload.payload.signature.trim())
            .map_err(VerificationFailure::from)?;

        match self
            .store
            .exists_by_nonce_and_network(&authorization.nonce, network)
            .await
        {
            Ok(true) => {
                tracing::warn!(nonce = %authorization.nonce, %network, "Replay rejected");
                return Err(PaymentError::ReplayRejected {
                    nonce: authorization.nonce,
                    network,
                });
            }
            Ok(false) => {}
            // The insert below still enforces uniqueness.
            Err(e) => tracing::warn!(error = %e, "Replay lookup failed, relying on insert guard"),
        }

        let amount = MoneyAmount::from_token_units(authorization.value.0, network.decimals())
            .ok_or_else(|| {
                SettlementError::Internal(format!(
                    "amount {} does not fit a decimal",
                    authorization.value
                ))
            })?;
        let decision = self
            .policy
            .check_policy(&PolicyRequest {
                org_id: self.config.org_id.clone(),
                payer,
                amount,
                recipient: authorization.to,
            })
            .await
            .map_err(|e| SettlementError::Unavailable(e.to_string()))?;
        if !decision.allowed {
            return Err(PaymentError::PolicyDenied {
                violations: decision.violations,
            });
        }

        let created_at = Utc::now();
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            resource: requirements.resource.clone(),
            network,
            amount: amount.to_string(),
            amount_units: authorization.value,
            payer,
            recipient: authorization.to,
            nonce: authorization.nonce,
            tx_hash: None,
            status: PaymentStatus::Pending,
            error: None,
            simulated: false,
            created_at,
            verified_at: Some(created_at),
            settled_at: None,
        };
        match self.store.insert_payment_record(&record).await {
            Ok(()) => {}
            Err(StoreError::DuplicateNonce { nonce, network }) => {
                tracing::warn!(%nonce, %network, "Replay rejected by store");
                return Err(PaymentError::ReplayRejected { nonce, network });
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not record payment, not settling");
                return Err(SettlementError::Unavailable(e.to_string()).into());
            }
        }

        let payment_id = record.id;
        let request = SettlementRequest {
            network,
            token: requirements.asset,
            amount: requirements.max_amount_required,
            authorization,
            signature,
        };
        let router = Arc::clone(&self.router);
        let store = Arc::clone(&self.store);
        let task = self.tracker.spawn(async move {
            let result = router.settle(&request).await;
            finalize(store.as_ref(), payment_id, &result).await;
            result
        });

        let timeout = self.config.settlement_timeout;
        let receipt = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map_err(SettlementError::from)?,
            Ok(Err(join_error)) => {
                tracing::error!(%payment_id, error = %join_error, "Settlement task aborted");
                return Err(SettlementError::Internal(join_error.to_string()).into());
            }
            Err(_) => {
                tracing::warn!(%payment_id, ?timeout, "Settlement still running after timeout");
                return Err(SettlementError::Timeout {
                    payment_id,
                    after: timeout,
                }
                .into());
            }
        };

        Ok(Settlement {
            payment_id,
            payer,
            network,
            tx_hash: receipt.tx_hash,
            simulated: receipt.simulated,
        })
    }

    /// Records still waiting for a definitive settlement outcome.
    pub async fn pending_records(&self) -> Result<Vec<PaymentRecord>, StoreError> {
        self.store.pending_records().await
    }

    /// Waits for every in-flight settlement to write its outcome.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            tracing::info!(
                in_flight = self.tracker.len(),
                "Waiting for in-flight settlements"
            );
        }
        self.tracker.wait().await;
    }
}

/// Writes the chain's answer to the record. Store failures are logged, never propagated: the
/// settlement outcome stands regardless.
async fn finalize(
    store: &dyn PaymentStore,
    payment_id: Uuid,
    result: &Result<SettlementReceipt, ChainError>,
) {
    let outcome = match result {
        Ok(receipt) => RecordOutcome::Settled {
            tx_hash: receipt.tx_hash,
            simulated: receipt.simulated,
        },
        Err(ChainError::Unconfirmed { tx_hash, source }) => {
            tracing::error!(
                %payment_id,
                tx = %tx_hash,
                error = %source,
                "Transaction submitted but unconfirmed, record left pending for reconciliation"
            );
            return;
        }
        Err(e) => RecordOutcome::Failed {
            error: e.to_string(),
        },
    };
    if let Err(e) = store
        .complete_payment_record(payment_id, &outcome, Utc::now())
        .await
    {
        tracing::error!(%payment_id, error = %e, status = %outcome.status(), "Failed to persist settlement outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use alloy_provider::{PendingTransactionError, WatchTxError};

    use crate::chain::ChainRoute;
    use crate::chain::router::test_support::FakeChain;
    use crate::config::Environment;
    use crate::crypto::AuthorizationSigner;
    use crate::policy::{AllowAllPolicy, ThresholdPolicy};
    use crate::store::InMemoryPaymentStore;

    const PAY_TO: Address = address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C");
    const NOW: UnixTimestamp = UnixTimestamp::from_secs(1_700_000_000);

    struct Harness {
        engine: PaymentEngine,
        store: Arc<InMemoryPaymentStore>,
        chain: Arc<FakeChain>,
    }

    fn harness_with(
        chain: FakeChain,
        policy: Arc<dyn PolicyCheck>,
        settlement_timeout: Duration,
    ) -> Harness {
        let chain = Arc::new(chain);
        let store = Arc::new(InMemoryPaymentStore::new());
        let router = NetworkRouter::new(Environment::Production)
            .with_route(Network::ArcTestnet, ChainRoute::Native(chain.clone()))
            .with_route(Network::BaseSepolia, ChainRoute::Evm(chain.clone()))
            .with_route(Network::Base, ChainRoute::Evm(chain.clone()));
        let engine = PaymentEngine::new(
            store.clone(),
            policy,
            Arc::new(router),
            EngineConfig {
                org_id: Some("acme".to_string()),
                settlement_timeout,
                requirement_ttl: Duration::from_secs(300),
            },
        );
        Harness {
            engine,
            store,
            chain,
        }
    }

    fn harness() -> Harness {
        harness_with(
            FakeChain::default(),
            Arc::new(AllowAllPolicy),
            Duration::from_secs(5),
        )
    }

    fn one_cent(engine: &PaymentEngine, network: Network) -> PaymentRequirements {
        engine
            .create_requirement_at(
                "/api/report",
                MoneyAmount::parse("0.01").unwrap(),
                Some("Quarterly report".to_string()),
                network,
                PAY_TO,
                NOW,
            )
            .unwrap()
    }

    #[test]
    fn requirement_is_priced_in_token_units() {
        let h = harness();
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        assert_eq!(requirements.max_amount_required, TokenAmount::from(10_000u64));
        assert_eq!(requirements.asset, Network::BaseSepolia.usdc());
        assert_eq!(requirements.max_timeout_seconds, 300);
        assert_eq!(requirements.expires_at(), Some(NOW + 300));
        assert_eq!(requirements.extra.unwrap().name, "USDC");

        let too_small = h.engine.create_requirement_at(
            "/api/report",
            MoneyAmount::parse("0.0000001").unwrap(),
            None,
            Network::BaseSepolia,
            PAY_TO,
            NOW,
        );
        assert!(too_small.is_err());
    }

    #[tokio::test]
    async fn one_cent_payment_settles_and_is_recorded() {
        let h = harness();
        let signer = AuthorizationSigner::random();
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let payload = signer.pay(&requirements, NOW).unwrap();

        let settlement = h.engine.settle_at(&payload, &requirements, NOW).await.unwrap();
        assert_eq!(settlement.payer, signer.address());
        assert_eq!(settlement.network, Network::BaseSepolia);
        assert!(!settlement.simulated);
        assert_eq!(
            settlement.tx_hash,
            FakeChain::hash_for(&payload.payload.authorization.nonce.0)
        );

        let records = h.store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, settlement.payment_id);
        assert_eq!(record.status, PaymentStatus::Settled);
        assert_eq!(record.tx_hash, Some(settlement.tx_hash));
        assert_eq!(record.amount, "0.01");
        assert_eq!(record.amount_units, TokenAmount::from(10_000u64));
        assert_eq!(record.recipient, PAY_TO);

        let calls = h.chain.authorized_calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].authorization, payload.payload.authorization);
        drop(calls);

        // The same authorization cannot be spent twice.
        let replay = h.engine.settle_at(&payload, &requirements, NOW).await;
        assert!(matches!(replay, Err(PaymentError::ReplayRejected { .. })));
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn home_chain_is_paid_by_direct_transfer() {
        let h = harness();
        let requirements = one_cent(&h.engine, Network::ArcTestnet);
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();
        h.engine.settle_at(&payload, &requirements, NOW).await.unwrap();
        assert_eq!(
            h.chain.native_calls.lock().as_slice(),
            [(PAY_TO, TokenAmount::from(10_000u64))]
        );
        assert!(h.chain.authorized_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn home_chain_pays_the_price_when_more_is_authorized() {
        let h = harness();
        let requirements = one_cent(&h.engine, Network::ArcTestnet);
        let signer = AuthorizationSigner::random();
        let mut payload = signer.pay(&requirements, NOW).unwrap();
        payload.payload.authorization.value = TokenAmount::from(1_000_000_000u64);
        payload.payload.signature = signer
            .sign_authorization(&payload.payload.authorization, Network::ArcTestnet)
            .unwrap();

        h.engine.settle_at(&payload, &requirements, NOW).await.unwrap();
        assert_eq!(
            h.chain.native_calls.lock().as_slice(),
            [(PAY_TO, TokenAmount::from(10_000u64))]
        );
    }

    #[tokio::test]
    async fn wrong_recipient_is_rejected_without_a_record() {
        let h = harness();
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let mut payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();
        payload.payload.authorization.to = address!("0x1111111111111111111111111111111111111111");

        let err = h
            .engine
            .settle_at(&payload, &requirements, NOW)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "recipient_mismatch");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(h.store.is_empty());
        assert!(h.chain.authorized_calls.lock().is_empty());
    }

    #[test]
    fn validity_window_bounds_are_inclusive() {
        let h = harness();
        let mut requirements = one_cent(&h.engine, Network::BaseSepolia);
        if let Some(extra) = requirements.extra.as_mut() {
            extra.expires_at = None;
        }
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();
        let authorization = payload.payload.authorization;

        let at = |now: UnixTimestamp| h.engine.verify_at(&payload, &requirements, now);
        assert!(at(authorization.valid_after).is_ok());
        assert!(at(authorization.valid_before).is_ok());
        assert!(matches!(
            at(UnixTimestamp::from_secs(authorization.valid_after.as_secs() - 1)),
            Err(VerificationFailure::NotYetValid { .. })
        ));
        assert!(matches!(
            at(authorization.valid_before + 1),
            Err(VerificationFailure::AuthorizationExpired { .. })
        ));
    }

    #[test]
    fn expired_requirement_is_rejected() {
        let h = harness();
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();
        let result = h.engine.verify_at(&payload, &requirements, NOW + 301);
        assert!(matches!(
            result,
            Err(VerificationFailure::RequirementExpired { .. })
        ));
    }

    #[test]
    fn mismatches_are_reported_before_expiry() {
        let h = harness();
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let mut payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();
        payload.network = Network::Base;
        let err = h
            .engine
            .verify_at(&payload, &requirements, NOW + 301)
            .unwrap_err();
        assert_eq!(err.reason(), "network_mismatch");
    }

    #[test]
    fn foreign_asset_is_rejected() {
        let h = harness();
        let mut requirements = one_cent(&h.engine, Network::BaseSepolia);
        requirements.asset = Network::Base.usdc();
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();
        let err = h.engine.verify_at(&payload, &requirements, NOW).unwrap_err();
        assert_eq!(
            err,
            VerificationFailure::AssetMismatch {
                expected: Network::BaseSepolia.usdc(),
                got: Network::Base.usdc(),
            }
        );
    }

    #[test]
    fn tampered_amount_breaks_the_signature() {
        let h = harness();
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let signer = AuthorizationSigner::random();
        let mut payload = signer.pay(&requirements, NOW).unwrap();
        payload.payload.authorization.value = TokenAmount::from(20_000u64);
        let err = h.engine.verify_at(&payload, &requirements, NOW).unwrap_err();
        assert!(matches!(err, VerificationFailure::InvalidSignature(_)));

        let response = h.engine.verify_response(&payload, &requirements);
        assert!(!response.is_valid);
        assert_eq!(response.payer, Some(signer.address()));
    }

    #[test]
    fn development_key_is_refused_on_mainnet_only() {
        let h = harness();
        let dev = AuthorizationSigner::dev().unwrap();

        let mainnet = one_cent(&h.engine, Network::Base);
        let payload = dev.pay(&mainnet, NOW).unwrap();
        assert_eq!(
            h.engine.verify_at(&payload, &mainnet, NOW),
            Err(VerificationFailure::TestKeyOnMainnet(Network::Base))
        );

        let testnet = one_cent(&h.engine, Network::BaseSepolia);
        let payload = dev.pay(&testnet, NOW).unwrap();
        assert_eq!(
            h.engine.verify_at(&payload, &testnet, NOW),
            Ok(dev.address())
        );
    }

    #[tokio::test]
    async fn policy_denial_leaves_no_record() {
        let policy = ThresholdPolicy {
            max_amount_per_payment: Some(MoneyAmount::parse("0.005").unwrap()),
            ..Default::default()
        };
        let h = harness_with(FakeChain::default(), Arc::new(policy), Duration::from_secs(5));
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();

        let err = h
            .engine
            .settle_at(&payload, &requirements, NOW)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.violations().len(), 1);
        assert!(h.store.is_empty());
        assert!(h.chain.authorized_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn concurrent_settlements_of_one_nonce_admit_one() {
        let chain = FakeChain {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let h = harness_with(chain, Arc::new(AllowAllPolicy), Duration::from_secs(5));
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();

        let attempts = (0..8).map(|_| {
            let engine = h.engine.clone();
            let payload = payload.clone();
            let requirements = requirements.clone();
            tokio::spawn(async move { engine.settle_at(&payload, &requirements, NOW).await })
        });
        let mut settled = 0;
        let mut replays = 0;
        for attempt in attempts.collect::<Vec<_>>() {
            match attempt.await.unwrap() {
                Ok(_) => settled += 1,
                Err(PaymentError::ReplayRejected { .. }) => replays += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(settled, 1);
        assert_eq!(replays, 7);
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.chain.authorized_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn timed_out_settlement_is_finalized_in_background() {
        let chain = FakeChain {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let h = harness_with(chain, Arc::new(AllowAllPolicy), Duration::from_millis(10));
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();

        let err = h
            .engine
            .settle_at(&payload, &requirements, NOW)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Settlement(SettlementError::Timeout { .. })
        ));
        assert!(err.is_retryable());
        assert_eq!(h.engine.pending_records().await.unwrap().len(), 1);

        h.engine.shutdown().await;
        assert!(h.engine.pending_records().await.unwrap().is_empty());
        assert_eq!(h.store.records()[0].status, PaymentStatus::Settled);
    }

    #[tokio::test]
    async fn chain_failure_marks_record_failed_and_frees_nonce() {
        let chain = FakeChain {
            fail: true,
            ..Default::default()
        };
        let h = harness_with(chain, Arc::new(AllowAllPolicy), Duration::from_secs(5));
        let requirements = one_cent(&h.engine, Network::BaseSepolia);
        let payload = AuthorizationSigner::random()
            .pay(&requirements, NOW)
            .unwrap();

        let err = h
            .engine
            .settle_at(&payload, &requirements, NOW)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "transaction_reverted");
        assert!(!err.is_retryable());

        let records = h.store.records();
        assert_eq!(records[0].status, PaymentStatus::Failed);
        assert!(records[0].error.is_some());
        assert!(
            !h.store
                .exists_by_nonce_and_network(&payload.payload.authorization.nonce, Network::BaseSepolia)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn unconfirmed_transaction_stays_pending() {
        let store = InMemoryPaymentStore::new();
        let record = crate::store::test_support::record(9, Network::Base);
        store.insert_payment_record(&record).await.unwrap();

        let tx_hash = FakeChain::hash_for(b"submitted");
        let result = Err(ChainError::Unconfirmed {
            tx_hash,
            source: PendingTransactionError::TxWatcher(WatchTxError::Timeout),
        });
        finalize(&store, record.id, &result).await;
        assert_eq!(store.records()[0].status, PaymentStatus::Pending);

        let settled = Ok(SettlementReceipt {
            tx_hash,
            simulated: false,
        });
        finalize(&store, record.id, &settled).await;
        assert_eq!(store.records()[0].status, PaymentStatus::Settled);
    }
}
