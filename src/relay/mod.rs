//! Relay orchestration
//!
//! Two watchers (origin and destination) feed one dispatcher, which runs each
//! job through the [`RelayEngine`] on its own task.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

pub mod dispatcher;
pub mod engine;
pub mod watcher;

pub use dispatcher::Dispatcher;
pub use engine::{RelayEngine, RelayOutcome};
pub use watcher::ChainWatcher;

use crate::chain::BridgeChain;
use crate::config::{Config, RelayerConfig};
use crate::ledger::SharedLedger;
use crate::retry::RetryConfig;
use crate::types::Direction;

const JOB_CHANNEL_CAPACITY: usize = 256;

/// Long-running relayer: watchers, dispatcher and engine wired together
pub struct RelayService {
    origin: Arc<dyn BridgeChain>,
    destination: Arc<dyn BridgeChain>,
    origin_start: Option<u64>,
    destination_start: Option<u64>,
    ledger: SharedLedger,
    settings: RelayerConfig,
}

impl RelayService {
    pub fn new(
        origin: Arc<dyn BridgeChain>,
        destination: Arc<dyn BridgeChain>,
        ledger: SharedLedger,
        config: &Config,
    ) -> Self {
        Self {
            origin,
            destination,
            origin_start: config.origin.start_block,
            destination_start: config.destination.start_block,
            ledger,
            settings: config.relayer.clone(),
        }
    }

    /// Run until `shutdown` flips or a watcher fails fatally
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let retry = RetryConfig::new(
            self.settings.retry_attempts,
            Duration::from_millis(self.settings.retry_delay_ms),
        );
        let engine = Arc::new(RelayEngine::new(
            Arc::clone(&self.origin),
            Arc::clone(&self.destination),
            Arc::clone(&self.ledger),
            retry,
        ));

        let (jobs_tx, jobs_rx) = mpsc::channel(JOB_CHANNEL_CAPACITY);
        let dispatcher = Dispatcher::new(engine, self.settings.max_concurrent_relays);
        let dispatcher_task = tokio::spawn(dispatcher.run(jobs_rx, shutdown.clone()));

        // Jobs left unfinished by a previous run go first
        let unfinished = self.ledger.unfinished().await?;
        if !unfinished.is_empty() {
            info!(count = unfinished.len(), "Resuming unfinished relays");
        }
        for entry in unfinished {
            if jobs_tx.send(entry.job).await.is_err() {
                break;
            }
        }

        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms);
        let origin_watcher = ChainWatcher::new(
            "origin",
            Arc::clone(&self.origin),
            Direction::Forward,
            Arc::clone(&self.ledger),
            jobs_tx.clone(),
            self.settings.finality_blocks,
            self.origin_start,
            poll_interval,
        );
        let destination_watcher = ChainWatcher::new(
            "destination",
            Arc::clone(&self.destination),
            Direction::Backward,
            Arc::clone(&self.ledger),
            jobs_tx,
            self.settings.finality_blocks,
            self.destination_start,
            poll_interval,
        );

        info!(
            origin_chain_id = self.origin.chain_id(),
            destination_chain_id = self.destination.chain_id(),
            max_concurrent = self.settings.max_concurrent_relays,
            "Relayer running"
        );

        let watchers = tokio::try_join!(
            origin_watcher.run(shutdown.clone()),
            destination_watcher.run(shutdown)
        );
        if let Err(e) = &watchers {
            error!(error = %e, "Watcher stopped");
        }

        // Watchers own the senders; once they are gone the dispatcher drains
        if let Err(e) = dispatcher_task.await {
            error!(error = %e, "Dispatcher task failed");
        }

        watchers.map(|_| ())
    }
}
