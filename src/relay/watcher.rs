//! Bridge event watcher
//!
//! Polls one chain for bridge events in block order, records each relay job in
//! the ledger and hands new jobs to the dispatcher. The block cursor is only
//! advanced after every event in the range has been recorded.

use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chain::BridgeChain;
use crate::error::RelayError;
use crate::ledger::SharedLedger;
use crate::metrics;
use crate::types::{Direction, RelayJob};

/// Watches one chain for the events that start relays in `direction`
pub struct ChainWatcher {
    name: String,
    chain: Arc<dyn BridgeChain>,
    direction: Direction,
    ledger: SharedLedger,
    jobs: mpsc::Sender<RelayJob>,
    finality_blocks: u64,
    start_block: Option<u64>,
    poll_interval: Duration,
}

impl ChainWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        chain: Arc<dyn BridgeChain>,
        direction: Direction,
        ledger: SharedLedger,
        jobs: mpsc::Sender<RelayJob>,
        finality_blocks: u64,
        start_block: Option<u64>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            chain,
            direction,
            ledger,
            jobs,
            finality_blocks,
            start_block,
            poll_interval,
        }
    }

    /// Latest block considered final
    async fn finalized_block(&self) -> Result<u64, RelayError> {
        let head = self.chain.block_number().await?;
        Ok(head.saturating_sub(self.finality_blocks))
    }

    /// First block to scan: persisted cursor + 1, configured start, or the finalized head
    pub async fn starting_block(&self) -> Result<u64, RelayError> {
        if let Some(last) = self.ledger.last_block(self.chain.chain_id()).await? {
            return Ok(last + 1);
        }
        if let Some(start) = self.start_block {
            return Ok(start);
        }
        self.finalized_block().await
    }

    /// Scan `[from, finalized]` once; returns the last block processed, if any
    pub async fn poll_once(&self, from: u64) -> Result<Option<u64>> {
        let to = self.finalized_block().await?;
        if to < from {
            return Ok(None);
        }

        debug!(chain = %self.name, from_block = from, to_block = to, "Processing blocks");

        let events = self.chain.bridge_events(from, to).await?;
        for observed in events {
            let job = RelayJob::from_observed(observed);
            if job.direction() != self.direction {
                continue;
            }

            let event_name = match &job {
                RelayJob::Forward { .. } => "TokensBridged",
                RelayJob::Backward { .. } => "TokensBridgedBack",
            };
            metrics::record_event_detected(&self.name, event_name);

            let key = job.key();
            if !self.ledger.record(&job).await? {
                debug!(chain = %self.name, key = %key, "Event already recorded");
                continue;
            }

            let origin = job.origin();
            info!(
                chain = %self.name,
                key = %key,
                event = event_name,
                block = origin.block_number,
                tx_hash = %origin.tx_hash,
                log_index = origin.log_index,
                "New bridge event detected"
            );

            self.jobs
                .send(job)
                .await
                .map_err(|_| eyre!("relay dispatcher stopped"))?;
        }

        self.ledger.set_last_block(self.chain.chain_id(), to).await?;
        metrics::record_block_processed(&self.name, to);
        Ok(Some(to))
    }

    /// Run the watcher loop until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut next = loop {
            match self.starting_block().await {
                Ok(block) => break block,
                Err(e) => {
                    warn!(chain = %self.name, error = %e, "Failed to determine starting block");
                    tokio::select! {
                        _ = shutdown.changed() => return Ok(()),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        };

        info!(
            chain = %self.name,
            chain_id = self.chain.chain_id(),
            from_block = next,
            "Watcher started"
        );

        loop {
            match self.poll_once(next).await {
                Ok(Some(last)) => next = last + 1,
                Ok(None) => {}
                Err(e) => {
                    if self.jobs.is_closed() {
                        return Err(e);
                    }
                    warn!(chain = %self.name, error = %e, "Watcher poll failed, will retry");
                    metrics::record_error(&self.name, "poll");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!(chain = %self.name, "Watcher shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
