//! Durable transfer ledger
//!
//! Every relay job is recorded before any transaction is sent and moves through
//! `Pending -> Submitted -> Released`, or to `Failed`. Watchers persist their
//! block cursor here too, so a restart resumes where the last run stopped.

use std::sync::Arc;

use alloy::primitives::{Bytes, TxHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chain::SignedTx;
use crate::error::RelayError;
use crate::types::{Direction, RelayJob, RelayKey, TransferStatus};

pub mod memory;
pub mod pg;

pub use memory::MemoryLedger;
pub use pg::PgLedger;

/// One relay job and its processing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub key: RelayKey,
    pub direction: Direction,
    pub status: TransferStatus,
    pub job: RelayJob,
    /// Release transaction once one has been signed
    pub tx_hash: Option<TxHash>,
    /// Signed release bytes, rebroadcast unchanged when a Submitted entry resumes
    #[serde(skip_serializing)]
    pub raw_tx: Option<Bytes>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Number of entries per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub pending: u64,
    pub submitted: u64,
    pub released: u64,
    pub failed: u64,
}

impl LedgerCounts {
    pub fn add(&mut self, status: TransferStatus) {
        match status {
            TransferStatus::Pending => self.pending += 1,
            TransferStatus::Submitted => self.submitted += 1,
            TransferStatus::Released => self.released += 1,
            TransferStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.submitted + self.released + self.failed
    }
}

/// Storage backend for relay state
#[async_trait]
pub trait TransferLedger: Send + Sync {
    /// Insert `job` as Pending; `false` if its key was already recorded
    async fn record(&self, job: &RelayJob) -> Result<bool, RelayError>;

    async fn get(&self, key: &RelayKey) -> Result<Option<LedgerEntry>, RelayError>;

    /// Release transaction signed; written before the first broadcast
    async fn mark_submitted(&self, key: &RelayKey, tx: &SignedTx) -> Result<(), RelayError>;

    /// Release transaction confirmed
    async fn mark_released(&self, key: &RelayKey, tx_hash: TxHash) -> Result<(), RelayError>;

    async fn mark_failed(&self, key: &RelayKey, error: &str) -> Result<(), RelayError>;

    /// Pending and Submitted entries, oldest first
    async fn unfinished(&self) -> Result<Vec<LedgerEntry>, RelayError>;

    async fn counts(&self) -> Result<LedgerCounts, RelayError>;

    /// Last fully processed block for `chain_id`
    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>, RelayError>;

    async fn set_last_block(&self, chain_id: u64, block: u64) -> Result<(), RelayError>;

    /// Status of `key`, if recorded
    async fn status(&self, key: &RelayKey) -> Result<Option<TransferStatus>, RelayError> {
        Ok(self.get(key).await?.map(|entry| entry.status))
    }
}

pub type SharedLedger = Arc<dyn TransferLedger>;

/// Connect to `database_url` and run migrations, or fall back to memory
pub async fn open(database_url: Option<&str>) -> eyre::Result<SharedLedger> {
    match database_url {
        Some(url) => {
            let ledger = PgLedger::connect(url).await?;
            ledger.migrate().await?;
            tracing::info!("Using PostgreSQL transfer ledger");
            Ok(Arc::new(ledger))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, relay state will not survive a restart");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}
