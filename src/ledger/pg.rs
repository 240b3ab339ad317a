//! PostgreSQL ledger

use alloy::primitives::{Bytes, TxHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::WrapErr;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::error;

use super::{LedgerCounts, LedgerEntry, TransferLedger};
use crate::chain::SignedTx;
use crate::error::RelayError;
use crate::types::{RelayJob, RelayKey, TransferStatus};

/// [`TransferLedger`] backed by the `relay_transfers` and `chain_cursors` tables
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

const ENTRY_COLUMNS: &str =
    "key, direction, status, payload, tx_hash, raw_tx, error_message, created_at, updated_at";

fn to_i64(value: u64, what: &str) -> Result<i64, RelayError> {
    i64::try_from(value).map_err(|_| RelayError::Ledger(format!("{} {} out of range", what, value)))
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry, RelayError> {
    let key: Vec<u8> = row.try_get("key")?;
    let key = RelayKey(
        <[u8; 32]>::try_from(key.as_slice())
            .map_err(|_| RelayError::Ledger("ledger key is not 32 bytes".to_string()))?
            .into(),
    );

    let status: String = row.try_get("status")?;
    let status: TransferStatus = status
        .parse()
        .map_err(|e: eyre::Report| RelayError::Ledger(e.to_string()))?;

    let Json(job): Json<RelayJob> = row.try_get("payload")?;

    let tx_hash: Option<Vec<u8>> = row.try_get("tx_hash")?;
    let tx_hash = tx_hash
        .map(|bytes| {
            <[u8; 32]>::try_from(bytes.as_slice())
                .map(TxHash::from)
                .map_err(|_| RelayError::Ledger("tx hash is not 32 bytes".to_string()))
        })
        .transpose()?;
    let raw_tx: Option<Vec<u8>> = row.try_get("raw_tx")?;

    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(LedgerEntry {
        key,
        direction: job.direction(),
        status,
        job,
        tx_hash,
        raw_tx: raw_tx.map(Bytes::from),
        error: row.try_get("error_message")?,
        created_at,
        updated_at,
    })
}

impl PgLedger {
    /// Create a database connection pool
    pub async fn connect(database_url: &str) -> eyre::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .wrap_err("Failed to connect to database")?;
        Ok(Self { pool })
    }

    /// Run pending migrations (uses the migration files in migrations/)
    pub async fn migrate(&self) -> eyre::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .wrap_err("Failed to run database migrations")?;
        Ok(())
    }

    async fn set_status(
        &self,
        key: &RelayKey,
        status: TransferStatus,
        tx_hash: TxHash,
        raw_tx: Option<&Bytes>,
    ) -> Result<(), RelayError> {
        let result = sqlx::query(
            r#"
            UPDATE relay_transfers
            SET status = $2,
                tx_hash = $3,
                raw_tx = COALESCE($4, raw_tx),
                error_message = NULL,
                updated_at = NOW()
            WHERE key = $1
            "#,
        )
        .bind(key.as_bytes().as_slice())
        .bind(status.as_str())
        .bind(tx_hash.to_vec())
        .bind(raw_tx.map(|raw| raw.to_vec()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayError::Ledger(format!("no ledger entry for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl TransferLedger for PgLedger {
    async fn record(&self, job: &RelayJob) -> Result<bool, RelayError> {
        let key = job.key();
        let result = sqlx::query(
            r#"
            INSERT INTO relay_transfers (key, direction, status, payload)
            VALUES ($1, $2, 'pending', $3)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key.as_bytes().as_slice())
        .bind(job.direction().as_str())
        .bind(Json(job))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(key = %key, error = ?e, "SQL error recording relay job");
            RelayError::from(e)
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, key: &RelayKey) -> Result<Option<LedgerEntry>, RelayError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM relay_transfers WHERE key = $1",
            ENTRY_COLUMNS
        ))
        .bind(key.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn mark_submitted(&self, key: &RelayKey, tx: &SignedTx) -> Result<(), RelayError> {
        self.set_status(key, TransferStatus::Submitted, tx.tx_hash, Some(&tx.raw))
            .await
    }

    async fn mark_released(&self, key: &RelayKey, tx_hash: TxHash) -> Result<(), RelayError> {
        self.set_status(key, TransferStatus::Released, tx_hash, None)
            .await
    }

    async fn mark_failed(&self, key: &RelayKey, error: &str) -> Result<(), RelayError> {
        // Never downgrade a confirmed release
        sqlx::query(
            r#"
            UPDATE relay_transfers
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE key = $1 AND status <> 'released'
            "#,
        )
        .bind(key.as_bytes().as_slice())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unfinished(&self) -> Result<Vec<LedgerEntry>, RelayError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM relay_transfers WHERE status IN ('pending', 'submitted') ORDER BY seq",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, "SQL error getting unfinished relay jobs");
            RelayError::from(e)
        })?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn counts(&self) -> Result<LedgerCounts, RelayError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM relay_transfers GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = LedgerCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<TransferStatus>() {
                Ok(TransferStatus::Pending) => counts.pending = count,
                Ok(TransferStatus::Submitted) => counts.submitted = count,
                Ok(TransferStatus::Released) => counts.released = count,
                Ok(TransferStatus::Failed) => counts.failed = count,
                Err(e) => return Err(RelayError::Ledger(e.to_string())),
            }
        }
        Ok(counts)
    }

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>, RelayError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_processed_block FROM chain_cursors WHERE chain_id = $1")
                .bind(to_i64(chain_id, "chain id")?)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(block,)| block.max(0) as u64))
    }

    async fn set_last_block(&self, chain_id: u64, block: u64) -> Result<(), RelayError> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain_id, last_processed_block)
            VALUES ($1, $2)
            ON CONFLICT (chain_id) DO UPDATE SET last_processed_block = $2, updated_at = NOW()
            "#,
        )
        .bind(to_i64(chain_id, "chain id")?)
        .bind(to_i64(block, "block number")?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_i64_bounds() {
        assert_eq!(to_i64(42, "block").unwrap(), 42);
        assert!(to_i64(u64::MAX, "block").is_err());
    }
}
