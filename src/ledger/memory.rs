//! In-memory ledger, used when no database is configured and in tests

use std::collections::HashMap;

use alloy::primitives::TxHash;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{LedgerCounts, LedgerEntry, TransferLedger};
use crate::chain::SignedTx;
use crate::error::RelayError;
use crate::types::{RelayJob, RelayKey, TransferStatus};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<RelayKey, (u64, LedgerEntry)>,
    cursors: HashMap<u64, u64>,
    next_seq: u64,
}

/// [`TransferLedger`] kept in process memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, key: &RelayKey, apply: F) -> Result<(), RelayError>
    where
        F: FnOnce(&mut LedgerEntry),
    {
        let mut state = self.state.write().await;
        let (_, entry) = state
            .entries
            .get_mut(key)
            .ok_or_else(|| RelayError::Ledger(format!("no ledger entry for {}", key)))?;
        apply(entry);
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TransferLedger for MemoryLedger {
    async fn record(&self, job: &RelayJob) -> Result<bool, RelayError> {
        let key = job.key();
        let mut state = self.state.write().await;
        if state.entries.contains_key(&key) {
            return Ok(false);
        }

        let now = Utc::now();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            (
                seq,
                LedgerEntry {
                    key,
                    direction: job.direction(),
                    status: TransferStatus::Pending,
                    job: job.clone(),
                    tx_hash: None,
                    raw_tx: None,
                    error: None,
                    created_at: now,
                    updated_at: now,
                },
            ),
        );
        Ok(true)
    }

    async fn get(&self, key: &RelayKey) -> Result<Option<LedgerEntry>, RelayError> {
        let state = self.state.read().await;
        Ok(state.entries.get(key).map(|(_, entry)| entry.clone()))
    }

    async fn mark_submitted(&self, key: &RelayKey, tx: &SignedTx) -> Result<(), RelayError> {
        self.update(key, |entry| {
            entry.status = TransferStatus::Submitted;
            entry.tx_hash = Some(tx.tx_hash);
            entry.raw_tx = Some(tx.raw.clone());
        })
        .await
    }

    async fn mark_released(&self, key: &RelayKey, tx_hash: TxHash) -> Result<(), RelayError> {
        self.update(key, |entry| {
            entry.status = TransferStatus::Released;
            entry.tx_hash = Some(tx_hash);
            entry.error = None;
        })
        .await
    }

    async fn mark_failed(&self, key: &RelayKey, error: &str) -> Result<(), RelayError> {
        self.update(key, |entry| {
            if entry.status != TransferStatus::Released {
                entry.status = TransferStatus::Failed;
                entry.error = Some(error.to_string());
            }
        })
        .await
    }

    async fn unfinished(&self) -> Result<Vec<LedgerEntry>, RelayError> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .entries
            .values()
            .filter(|(_, entry)| !entry.status.is_finished())
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, entry)| entry.clone()).collect())
    }

    async fn counts(&self) -> Result<LedgerCounts, RelayError> {
        let state = self.state.read().await;
        let mut counts = LedgerCounts::default();
        for (_, entry) in state.entries.values() {
            counts.add(entry.status);
        }
        Ok(counts)
    }

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>, RelayError> {
        Ok(self.state.read().await.cursors.get(&chain_id).copied())
    }

    async fn set_last_block(&self, chain_id: u64, block: u64) -> Result<(), RelayError> {
        self.state.write().await.cursors.insert(chain_id, block);
        Ok(())
    }
}
