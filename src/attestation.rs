//! Token attestation
//!
//! An origin token is usable on the destination chain once the destination
//! bridge holds a wrapped-token mapping for it. The mapping is keyed by the
//! attestation id `keccak256(abi.encodePacked(token, chainId))` and is created
//! at most once per (token, chain) pair.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::{submit_and_confirm, BridgeCall, BridgeChain};
use crate::error::RelayError;
use crate::hash::{bytes32_to_hex, compute_attestation_id};
use crate::metrics;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{TokenMetadata, TokenType};

/// Deterministic id binding an origin token to its origin chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttestationId(pub B256);

impl AttestationId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }
}

impl From<B256> for AttestationId {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<AttestationId> for B256 {
    fn from(value: AttestationId) -> Self {
        value.0
    }
}

impl fmt::Display for AttestationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bytes32_to_hex(self.as_bytes()))
    }
}

/// `keccak256(abi.encodePacked(address token, uint256 chainId))`
pub fn attestation_id(token: Address, chain_id: u64) -> AttestationId {
    AttestationId(B256::from(compute_attestation_id(&token.0 .0, chain_id)))
}

/// Everything the destination bridge needs to register a wrapped token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationRequest {
    pub token: Address,
    pub chain_id: u64,
    pub token_type: TokenType,
    pub metadata: TokenMetadata,
}

impl AttestationRequest {
    pub fn id(&self) -> AttestationId {
        attestation_id(self.token, self.chain_id)
    }
}

/// Creates wrapped-token mappings, one attestation per (token, chain) pair
///
/// Concurrent callers for the same pair queue on a per-id lock; the first one
/// attests, the others observe the mapping it created. A pair is cached only
/// after the origin bridge accepted `addDeployedToken` for it, so a failed
/// registration is repeated on the next deposit.
#[derive(Default)]
pub struct AttestationService {
    locks: DashMap<AttestationId, Arc<Mutex<()>>>,
    known: DashMap<AttestationId, Address>,
    retry: RetryConfig,
}

impl AttestationService {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            ..Self::default()
        }
    }

    /// Wrapped address already resolved in this process, if any
    pub fn cached(&self, id: &AttestationId) -> Option<Address> {
        self.known.get(id).map(|entry| *entry.value())
    }

    fn lock_for(&self, id: AttestationId) -> Arc<Mutex<()>> {
        // Clone the Arc out so the map shard is not held across the await
        let entry = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    /// Return the wrapped token for `request`, attesting it first if needed
    pub async fn ensure_attested(
        &self,
        origin: &dyn BridgeChain,
        destination: &dyn BridgeChain,
        request: &AttestationRequest,
    ) -> Result<Address, RelayError> {
        let id = request.id();

        if let Some(wrapped) = self.cached(&id) {
            return Ok(wrapped);
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        // Another task may have finished while we waited
        if let Some(wrapped) = self.cached(&id) {
            return Ok(wrapped);
        }

        let supported = with_retry(&self.retry, "isWrappedTokenSupported", |_| {
            destination.is_wrapped_token_supported(request.token, request.chain_id)
        })
        .await?;

        let wrapped = if supported {
            let wrapped = self.wrapped_token(destination, request).await?;
            debug!(attestation_id = %id, wrapped = %wrapped, "Token already attested");
            wrapped
        } else {
            self.attest(destination, request, id).await?
        };

        if wrapped == Address::ZERO {
            return Err(RelayError::AttestationFailed {
                token: request.token,
                chain_id: request.chain_id,
                reason: "destination bridge returned the zero wrapped address".to_string(),
            });
        }

        // The mapping may predate this process; registering again is harmless
        self.register_on_origin(origin, request).await?;

        self.known.insert(id, wrapped);
        Ok(wrapped)
    }

    async fn wrapped_token(
        &self,
        destination: &dyn BridgeChain,
        request: &AttestationRequest,
    ) -> Result<Address, RelayError> {
        with_retry(&self.retry, "getWrappedToken", |_| {
            destination.wrapped_token(request.token, request.chain_id)
        })
        .await
    }

    /// `addDeployedToken` on the origin bridge, enabling bridge-backs of the token
    async fn register_on_origin(
        &self,
        origin: &dyn BridgeChain,
        request: &AttestationRequest,
    ) -> Result<(), RelayError> {
        let call = BridgeCall::AddDeployedToken {
            token: request.token,
        };
        match submit_and_confirm(origin, call, &self.retry).await {
            Ok(receipt) => {
                debug!(
                    token = %request.token,
                    tx_hash = %receipt.tx_hash,
                    "Token registered on origin"
                );
                Ok(())
            }
            Err(RelayError::TransactionReverted { tx_hash }) => {
                warn!(
                    token = %request.token,
                    tx_hash = %tx_hash,
                    "addDeployedToken reverted, treating token as registered"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn attest(
        &self,
        destination: &dyn BridgeChain,
        request: &AttestationRequest,
        id: AttestationId,
    ) -> Result<Address, RelayError> {
        let failed = |reason: String| RelayError::AttestationFailed {
            token: request.token,
            chain_id: request.chain_id,
            reason,
        };

        info!(
            token = %request.token,
            chain_id = request.chain_id,
            symbol = %request.metadata.symbol,
            attestation_id = %id,
            "Attesting token on destination"
        );

        let call = BridgeCall::AttestToken {
            token: request.token,
            chain_id: request.chain_id,
            token_type: request.token_type,
            metadata: request.metadata.clone(),
        };
        let receipt = submit_and_confirm(destination, call, &self.retry)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let wrapped = self.wrapped_token(destination, request).await?;
        if wrapped == Address::ZERO {
            warn!(
                attestation_id = %id,
                tx_hash = %receipt.tx_hash,
                "Attestation confirmed but no wrapped token was registered"
            );
            return Err(failed(format!(
                "no wrapped token registered after attestation {}",
                receipt.tx_hash
            )));
        }

        metrics::record_attestation();
        info!(
            attestation_id = %id,
            wrapped = %wrapped,
            tx_hash = %receipt.tx_hash,
            "Token attested"
        );

        Ok(wrapped)
    }
}
