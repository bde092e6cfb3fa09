//! Persistence of payment records.
//!
//! The engine depends only on [`PaymentStore`]. Two implementations ship with the crate:
//! [`InMemoryPaymentStore`] for tests and development, and [`SqlitePaymentStore`] for
//! durable deployments. Both enforce the replay guard themselves: at most one record per
//! `(nonce, network)` that is not `failed`, checked atomically with the insert.

mod memory;
mod sqlite;

pub use memory::InMemoryPaymentStore;
pub use sqlite::SqlitePaymentStore;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

use crate::network::Network;
use crate::types::{HexEncodedNonce, TokenAmount, TransactionHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Settled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Settled | PaymentStatus::Failed)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown payment status: {0}")]
pub struct UnknownStatus(String);

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "verified" => Ok(PaymentStatus::Verified),
            "settled" => Ok(PaymentStatus::Settled),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// Idempotency key of the attempt.
    pub id: Uuid,
    pub resource: String,
    pub network: Network,
    /// Human-readable amount, e.g. `"0.01"`.
    pub amount: String,
    pub amount_units: TokenAmount,
    pub payer: Address,
    pub recipient: Address,
    pub nonce: HexEncodedNonce,
    pub tx_hash: Option<TransactionHash>,
    pub status: PaymentStatus,
    pub error: Option<String>,
    /// Settled through the development-only simulated route.
    pub simulated: bool,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Terminal outcome written to a pending record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Settled {
        tx_hash: TransactionHash,
        simulated: bool,
    },
    Failed {
        error: String,
    },
}

impl RecordOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            RecordOutcome::Settled { .. } => PaymentStatus::Settled,
            RecordOutcome::Failed { .. } => PaymentStatus::Failed,
        }
    }
}

impl PaymentRecord {
    /// Applies `outcome` to a pending record.
    fn complete(&mut self, outcome: &RecordOutcome, at: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: outcome.status(),
            });
        }
        match outcome {
            RecordOutcome::Settled { tx_hash, simulated } => {
                self.tx_hash = Some(*tx_hash);
                self.simulated = *simulated;
                self.settled_at = Some(at);
            }
            RecordOutcome::Failed { error } => {
                self.error = Some(error.clone());
            }
        }
        self.status = outcome.status();
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Nonce {nonce} already used on {network}")]
    DuplicateNonce {
        nonce: HexEncodedNonce,
        network: Network,
    },
    #[error("Payment record {0} not found")]
    NotFound(Uuid),
    #[error("Payment record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("Payment store failure: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Backend(value.to_string())
    }
}

/// Storage used by the payment engine.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new record.
    ///
    /// Fails with [`StoreError::DuplicateNonce`] when a non-failed record already holds the
    /// same `(nonce, network)`; the check and the insert are one atomic step.
    async fn insert_payment_record(&self, record: &PaymentRecord) -> Result<(), StoreError>;

    /// Whether a non-failed record holds `(nonce, network)`.
    async fn exists_by_nonce_and_network(
        &self,
        nonce: &HexEncodedNonce,
        network: Network,
    ) -> Result<bool, StoreError>;

    /// Moves a pending record to its terminal state and returns the updated record.
    async fn complete_payment_record(
        &self,
        id: Uuid,
        outcome: &RecordOutcome,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError>;

    /// The non-failed record holding `(nonce, network)`, if any.
    async fn find_by_nonce_and_network(
        &self,
        nonce: &HexEncodedNonce,
        network: Network,
    ) -> Result<Option<PaymentRecord>, StoreError>;

    /// Records still awaiting a terminal outcome, oldest first.
    async fn pending_records(&self) -> Result<Vec<PaymentRecord>, StoreError>;
}
