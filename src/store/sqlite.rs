//! SQLite-backed payment records.
//!
//! The replay guard is a partial unique index on `(nonce, network)` over rows whose status
//! is not `failed`. Concurrent inserts of one nonce are serialized by SQLite itself, and the
//! loser gets a constraint violation that surfaces as [`StoreError::DuplicateNonce`].
//!
//! rusqlite is synchronous: every query runs on tokio's blocking pool, never on a runtime
//! worker thread.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::network::Network;
use crate::store::{PaymentRecord, PaymentStatus, PaymentStore, RecordOutcome, StoreError};
use crate::types::HexEncodedNonce;

const COLUMNS: &str = "id, resource, network, amount, amount_units, payer, recipient, nonce, \
                       tx_hash, status, error, simulated, created_at, verified_at, settled_at";

pub struct SqlitePaymentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePaymentStore {
    /// Opens (or creates) the database at `path`. `":memory:"` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        tracing::info!(path = %path.display(), "Payment store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS payment_records (
                id TEXT PRIMARY KEY,
                resource TEXT NOT NULL,
                network TEXT NOT NULL,
                amount TEXT NOT NULL,
                amount_units TEXT NOT NULL,
                payer TEXT NOT NULL,
                recipient TEXT NOT NULL,
                nonce TEXT NOT NULL,
                tx_hash TEXT,
                status TEXT NOT NULL,
                error TEXT,
                simulated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                verified_at TEXT,
                settled_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_records_live_nonce
             ON payment_records(nonce, network) WHERE status != 'failed'",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payment_records_status
             ON payment_records(status)",
            [],
        )?;
        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

fn parse_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(index)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn parse_optional_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(index)?;
    text.map(|text| {
        text.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<PaymentRecord> {
    Ok(PaymentRecord {
        id: parse_column(row, 0)?,
        resource: row.get(1)?,
        network: parse_column(row, 2)?,
        amount: row.get(3)?,
        amount_units: parse_column(row, 4)?,
        payer: parse_column(row, 5)?,
        recipient: parse_column(row, 6)?,
        nonce: parse_column(row, 7)?,
        tx_hash: parse_optional_column(row, 8)?,
        status: parse_column(row, 9)?,
        error: row.get(10)?,
        simulated: row.get(11)?,
        created_at: parse_column(row, 12)?,
        verified_at: parse_optional_column(row, 13)?,
        settled_at: parse_optional_column(row, 14)?,
    })
}

fn select_by_id(conn: &Connection, id: Uuid) -> Result<Option<PaymentRecord>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM payment_records WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_record)
        .optional()?)
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl PaymentStore for SqlitePaymentStore {
    async fn insert_payment_record(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "INSERT INTO payment_records ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            );
            let result = conn.execute(
                &sql,
                params![
                    record.id.to_string(),
                    record.resource,
                    record.network.to_string(),
                    record.amount,
                    record.amount_units.to_string(),
                    record.payer.to_string(),
                    record.recipient.to_string(),
                    record.nonce.to_string(),
                    record.tx_hash.map(|h| h.to_string()),
                    record.status.as_str(),
                    record.error,
                    record.simulated,
                    record.created_at.to_rfc3339(),
                    record.verified_at.map(|t| t.to_rfc3339()),
                    record.settled_at.map(|t| t.to_rfc3339()),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateNonce {
                    nonce: record.nonce,
                    network: record.network,
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn exists_by_nonce_and_network(
        &self,
        nonce: &HexEncodedNonce,
        network: Network,
    ) -> Result<bool, StoreError> {
        let nonce = *nonce;
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM payment_records
                 WHERE nonce = ?1 AND network = ?2 AND status != 'failed')",
                params![nonce.to_string(), network.to_string()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn complete_payment_record(
        &self,
        id: Uuid,
        outcome: &RecordOutcome,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError> {
        let outcome = outcome.clone();
        self.with_conn(move |conn| {
            let changed = match &outcome {
                RecordOutcome::Settled { tx_hash, simulated } => conn.execute(
                    "UPDATE payment_records
                     SET status = 'settled', tx_hash = ?2, simulated = ?3, settled_at = ?4
                     WHERE id = ?1 AND status IN ('pending', 'verified')",
                    params![
                        id.to_string(),
                        tx_hash.to_string(),
                        simulated,
                        at.to_rfc3339()
                    ],
                )?,
                RecordOutcome::Failed { error } => conn.execute(
                    "UPDATE payment_records
                     SET status = 'failed', error = ?2
                     WHERE id = ?1 AND status IN ('pending', 'verified')",
                    params![id.to_string(), error],
                )?,
            };
            let record = select_by_id(conn, id)?.ok_or(StoreError::NotFound(id))?;
            if changed == 0 {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: record.status,
                    to: outcome.status(),
                });
            }
            Ok(record)
        })
        .await
    }

    async fn find_by_nonce_and_network(
        &self,
        nonce: &HexEncodedNonce,
        network: Network,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        let nonce = *nonce;
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM payment_records
                 WHERE nonce = ?1 AND network = ?2 AND status != 'failed'"
            );
            Ok(conn
                .query_row(
                    &sql,
                    params![nonce.to_string(), network.to_string()],
                    row_to_record,
                )
                .optional()?)
        })
        .await
    }

    async fn pending_records(&self) -> Result<Vec<PaymentRecord>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM payment_records
                 WHERE status IN ('pending', 'verified')
                 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map([], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }
}
