//! Bounded per-job task dispatch

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::engine::RelayEngine;
use crate::metrics;
use crate::types::{RelayJob, RelayKey};

/// Spawns one task per relay job, at most `max_concurrent` at a time
pub struct Dispatcher {
    engine: Arc<RelayEngine>,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<RelayKey>>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(engine: Arc<RelayEngine>, max_concurrent: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(DashSet::new()),
            tasks: JoinSet::new(),
        }
    }

    /// Keys currently being relayed
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Consume jobs until the channel closes or shutdown is signalled
    ///
    /// On channel close running tasks are awaited; on shutdown they are aborted
    /// and their ledger entries stay unfinished for the next start.
    pub async fn run(mut self, mut jobs: mpsc::Receiver<RelayJob>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(in_flight = self.in_flight(), "Dispatcher shutting down, aborting relay tasks");
                    self.tasks.shutdown().await;
                    return;
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Relay task panicked");
                        }
                    }
                }
                job = jobs.recv() => match job {
                    Some(job) => {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                self.tasks.shutdown().await;
                                return;
                            }
                            _ = self.dispatch(job) => {}
                        }
                    }
                    None => break,
                },
            }
        }

        debug!(remaining = self.tasks.len(), "Job channel closed, draining relay tasks");
        while self.tasks.join_next().await.is_some() {}
    }

    /// Spawn a task for `job` unless the same key is already running
    async fn dispatch(&mut self, job: RelayJob) {
        let key = job.key();
        if !self.in_flight.insert(key) {
            debug!(key = %key, "Relay already in flight, skipping duplicate");
            return;
        }

        // Waiting here pushes back on the watchers through the bounded channel
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Relay semaphore closed");
                self.in_flight.remove(&key);
                return;
            }
        };

        let engine = Arc::clone(&self.engine);
        let in_flight = Arc::clone(&self.in_flight);
        metrics::set_in_flight(in_flight.len());

        self.tasks.spawn(async move {
            let _permit = permit;
            // errors are logged and recorded by the engine
            let _ = engine.handle(job).await;
            in_flight.remove(&key);
            metrics::set_in_flight(in_flight.len());
        });
    }
}
