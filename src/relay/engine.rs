//! Per-event relay state machines
//!
//! Forward: ReceivedEvent -> MetadataFetched -> AttestationEnsured -> Released -> Done
//! Backward: ReceivedEvent -> OriginTokenResolved -> Released -> Done
//!
//! Every job is checked against the ledger first. Released and Failed entries
//! are never replayed. A release is signed once and recorded as Submitted
//! before it is broadcast; a Submitted entry is finished by rebroadcasting the
//! recorded bytes and confirming them, never by signing a second release.

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::{Address, TxHash, B256};
use tracing::{debug, error, info, warn};

use crate::attestation::{AttestationRequest, AttestationService};
use crate::chain::{broadcast_signed, BridgeCall, BridgeChain, SignedTx, TxReceipt};
use crate::error::RelayError;
use crate::ledger::SharedLedger;
use crate::metrics;
use crate::retry::{with_retry, RetryConfig};
use crate::tokens::TokenInspector;
use crate::types::{BridgeBackEvent, Direction, EventOrigin, RelayJob, RelayKey, TransferStatus};

/// Result of handling one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Release confirmed by this call
    Released(TxReceipt),
    /// Already released earlier; nothing was sent
    AlreadyReleased,
    /// Entry previously failed; left for an operator
    PreviouslyFailed,
}

impl RelayOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Released(_) => "released",
            RelayOutcome::AlreadyReleased => "already_released",
            RelayOutcome::PreviouslyFailed => "previously_failed",
        }
    }
}

/// Drives relay jobs against the two chains
pub struct RelayEngine {
    origin: Arc<dyn BridgeChain>,
    destination: Arc<dyn BridgeChain>,
    attestations: AttestationService,
    ledger: SharedLedger,
    retry: RetryConfig,
}

impl RelayEngine {
    pub fn new(
        origin: Arc<dyn BridgeChain>,
        destination: Arc<dyn BridgeChain>,
        ledger: SharedLedger,
        retry: RetryConfig,
    ) -> Self {
        Self {
            origin,
            destination,
            attestations: AttestationService::new(retry.clone()),
            ledger,
            retry,
        }
    }

    /// Chain the release for `direction` is sent on
    fn target(&self, direction: Direction) -> &dyn BridgeChain {
        match direction {
            Direction::Forward => self.destination.as_ref(),
            Direction::Backward => self.origin.as_ref(),
        }
    }

    /// Process one job to completion
    ///
    /// Failures are recorded in the ledger as Failed before being returned.
    pub async fn handle(&self, job: RelayJob) -> Result<RelayOutcome, RelayError> {
        let key = job.key();
        let direction = job.direction();
        let started = Instant::now();

        self.ledger.record(&job).await?;
        let entry = self
            .ledger
            .get(&key)
            .await?
            .ok_or_else(|| RelayError::Ledger(format!("entry {} vanished after insert", key)))?;

        let result = match (entry.status, entry.tx_hash) {
            (TransferStatus::Released, _) => {
                debug!(key = %key, %direction, "Already released, skipping");
                Ok(RelayOutcome::AlreadyReleased)
            }
            (TransferStatus::Failed, _) => {
                debug!(key = %key, %direction, error = ?entry.error, "Previously failed, skipping");
                Ok(RelayOutcome::PreviouslyFailed)
            }
            (TransferStatus::Submitted, Some(tx_hash)) => {
                let signed = entry.raw_tx.map(|raw| SignedTx { tx_hash, raw });
                self.resume_submitted(key, direction, tx_hash, signed)
                    .await
                    .map(RelayOutcome::Released)
            }
            (TransferStatus::Submitted, None) | (TransferStatus::Pending, _) => {
                self.run(key, &job).await.map(RelayOutcome::Released)
            }
        };

        match &result {
            Ok(outcome) => {
                metrics::record_relay(direction.as_str(), outcome.label());
                if let RelayOutcome::Released(receipt) = outcome {
                    metrics::record_latency(direction.as_str(), started.elapsed().as_secs_f64());
                    info!(
                        key = %key,
                        %direction,
                        tx_hash = %receipt.tx_hash,
                        state = "Done",
                        "Relay complete"
                    );
                }
            }
            Err(e) => {
                metrics::record_relay(direction.as_str(), e.kind());
                error!(key = %key, %direction, error = %e, state = "Failed", "Relay failed");
                if let Err(ledger_err) = self.ledger.mark_failed(&key, &e.to_string()).await {
                    warn!(key = %key, error = %ledger_err, "Failed to record relay failure");
                }
            }
        }

        result
    }

    async fn run(&self, key: RelayKey, job: &RelayJob) -> Result<TxReceipt, RelayError> {
        match job {
            RelayJob::Forward {
                transfer_id,
                origin,
            } => self.relay_forward(key, *transfer_id, origin).await,
            RelayJob::Backward { event, origin } => self.relay_backward(key, event, origin).await,
        }
    }

    async fn resume_submitted(
        &self,
        key: RelayKey,
        direction: Direction,
        tx_hash: TxHash,
        signed: Option<SignedTx>,
    ) -> Result<TxReceipt, RelayError> {
        info!(key = %key, %direction, tx_hash = %tx_hash, "Resuming submitted release");
        let chain = self.target(direction);
        // The node may never have received the bytes before the restart
        if let Some(signed) = &signed {
            broadcast_signed(chain, signed, &self.retry, "rebroadcast", true).await?;
        }
        let receipt = chain.confirm(tx_hash).await?;
        self.ledger.mark_released(&key, receipt.tx_hash).await?;
        Ok(receipt)
    }

    async fn relay_forward(
        &self,
        key: RelayKey,
        transfer_id: B256,
        event: &EventOrigin,
    ) -> Result<TxReceipt, RelayError> {
        info!(
            key = %key,
            block = event.block_number,
            tx_hash = %event.tx_hash,
            state = "ReceivedEvent",
            "TokensBridged received"
        );

        let origin = self.origin.as_ref();
        let transfer = with_retry(&self.retry, "tokenTransfers", |_| {
            origin.token_transfer(transfer_id)
        })
        .await?;

        let metadata = TokenInspector::new(origin)
            .describe(transfer.source_token_address)
            .await?;
        info!(
            key = %key,
            token = %transfer.source_token_address,
            symbol = %metadata.symbol,
            decimals = metadata.decimals,
            amount = %transfer.amount,
            state = "MetadataFetched",
            "Token metadata fetched"
        );

        let request = AttestationRequest {
            token: transfer.source_token_address,
            chain_id: transfer.source_chain_id,
            token_type: transfer.token_type,
            metadata,
        };
        let wrapped = self
            .attestations
            .ensure_attested(origin, self.destination.as_ref(), &request)
            .await?;
        let attestation_id = request.id();
        info!(
            key = %key,
            attestation_id = %attestation_id,
            wrapped = %wrapped,
            state = "AttestationEnsured",
            "Wrapped token available"
        );

        let call = BridgeCall::ReleaseWrappedTokens {
            amount: transfer.amount,
            recipient: transfer.destination_address,
            attestation_id,
        };
        self.release(key, self.destination.as_ref(), call).await
    }

    async fn relay_backward(
        &self,
        key: RelayKey,
        event: &BridgeBackEvent,
        origin_event: &EventOrigin,
    ) -> Result<TxReceipt, RelayError> {
        info!(
            key = %key,
            block = origin_event.block_number,
            tx_hash = %origin_event.tx_hash,
            attestation_id = %event.attestation_id,
            state = "ReceivedEvent",
            "TokensBridgedBack received"
        );

        let destination = self.destination.as_ref();
        let attestation_id = event.attestation_id;
        let token = with_retry(&self.retry, "attestedTokens", |_| {
            destination.attested_token(attestation_id)
        })
        .await?;
        if token == Address::ZERO {
            return Err(RelayError::UnknownAttestation(attestation_id));
        }
        info!(key = %key, token = %token, state = "OriginTokenResolved", "Origin token resolved");

        let call = BridgeCall::ReleaseTokens {
            amount: event.amount,
            recipient: event.destination_address,
            token,
            convert_to_native: event.convert_to_native,
        };
        self.release(key, self.origin.as_ref(), call).await
    }

    /// Sign the release, record it, broadcast it, then wait for inclusion
    ///
    /// Only the recorded bytes are ever resent, so an ambiguous send error can
    /// not turn into a second release.
    async fn release(
        &self,
        key: RelayKey,
        chain: &dyn BridgeChain,
        call: BridgeCall,
    ) -> Result<TxReceipt, RelayError> {
        let method = call.method();
        let signed = with_retry(&self.retry, method, |_| chain.sign(call.clone())).await?;
        self.ledger.mark_submitted(&key, &signed).await?;

        let tx_hash = broadcast_signed(chain, &signed, &self.retry, method, false).await?;
        info!(
            key = %key,
            chain_id = chain.chain_id(),
            method,
            tx_hash = %tx_hash,
            state = "Submitted",
            "Release submitted"
        );

        let receipt = chain.confirm(tx_hash).await?;
        self.ledger.mark_released(&key, receipt.tx_hash).await?;
        info!(
            key = %key,
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            state = "Released",
            "Release confirmed"
        );
        Ok(receipt)
    }
}
