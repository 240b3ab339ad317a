//! Common types for cross-chain relaying
//!
//! Bridge payloads as the relayer sees them, plus the ledger-facing types
//! (relay keys, jobs and statuses).

use alloy::primitives::{Address, TxHash, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::attestation::AttestationId;

// ============================================================================
// Bridge Payloads
// ============================================================================

/// Token standard carried by the bridge as a `uint8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Native,
    Erc20,
    Erc721,
    Erc1155,
    /// Discriminant the relayer does not know; passed through untouched
    Other(u8),
}

impl TokenType {
    pub fn as_u8(&self) -> u8 {
        match self {
            TokenType::Native => 0,
            TokenType::Erc20 => 1,
            TokenType::Erc721 => 2,
            TokenType::Erc1155 => 3,
            TokenType::Other(v) => *v,
        }
    }
}

impl From<u8> for TokenType {
    fn from(value: u8) -> Self {
        match value {
            0 => TokenType::Native,
            1 => TokenType::Erc20,
            2 => TokenType::Erc721,
            3 => TokenType::Erc1155,
            other => TokenType::Other(other),
        }
    }
}

/// Entry of a bridge's supported-token list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token: Address,
    pub is_wrapped: bool,
}

/// ERC20 metadata, immutable for a token within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
}

/// A deposit recorded by the origin bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub transfer_id: B256,
    pub amount: U256,
    pub destination_address: Address,
    pub source_token_address: Address,
    pub source_chain_id: u64,
    pub token_type: TokenType,
}

/// A return transfer initiated on the destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeBackEvent {
    pub amount: U256,
    pub destination_address: Address,
    pub attestation_id: AttestationId,
    pub convert_to_native: bool,
}

/// Where an event was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOrigin {
    pub chain_id: u64,
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub log_index: u64,
}

/// Bridge events the relayer reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    /// `TokensBridged(transferId, tokenType)` on the origin chain
    ///
    /// The token type is taken from the `tokenTransfers` record, so only the id
    /// is kept.
    TokensBridged { transfer_id: B256 },
    /// `TokensBridgedBack(amount, to, attestationId, convertToNative)` on the destination chain
    TokensBridgedBack(BridgeBackEvent),
}

/// A bridge event together with its position on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEvent {
    pub event: BridgeEvent,
    pub origin: EventOrigin,
}

// ============================================================================
// Relay Jobs
// ============================================================================

/// Direction of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// origin deposit -> destination wrapped release
    Forward,
    /// destination bridge-back -> origin release
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique ledger key of a relay
///
/// Forward relays are keyed by the bridge transfer id. Bridge-back events carry
/// no id, so they are keyed by `keccak256(txHash ++ logIndex)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelayKey(pub B256);

impl RelayKey {
    pub fn for_transfer(transfer_id: B256) -> Self {
        Self(transfer_id)
    }

    pub fn for_log(tx_hash: TxHash, log_index: u64) -> Self {
        Self(B256::from(crate::hash::compute_log_key(&tx_hash.0, log_index)))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::hash::bytes32_to_hex(&self.0 .0))
    }
}

/// Unit of work handed from a watcher to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayJob {
    Forward {
        transfer_id: B256,
        origin: EventOrigin,
    },
    Backward {
        event: BridgeBackEvent,
        origin: EventOrigin,
    },
}

impl RelayJob {
    /// Build the job for an observed event
    pub fn from_observed(observed: ObservedEvent) -> Self {
        match observed.event {
            BridgeEvent::TokensBridged { transfer_id } => RelayJob::Forward {
                transfer_id,
                origin: observed.origin,
            },
            BridgeEvent::TokensBridgedBack(event) => RelayJob::Backward {
                event,
                origin: observed.origin,
            },
        }
    }

    pub fn key(&self) -> RelayKey {
        match self {
            RelayJob::Forward { transfer_id, .. } => RelayKey::for_transfer(*transfer_id),
            RelayJob::Backward { origin, .. } => {
                RelayKey::for_log(origin.tx_hash, origin.log_index)
            }
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            RelayJob::Forward { .. } => Direction::Forward,
            RelayJob::Backward { .. } => Direction::Backward,
        }
    }

    pub fn origin(&self) -> &EventOrigin {
        match self {
            RelayJob::Forward { origin, .. } | RelayJob::Backward { origin, .. } => origin,
        }
    }
}

/// Processing status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Recorded, nothing sent on the target chain yet
    Pending,
    /// Release transaction broadcast, receipt not yet seen
    Submitted,
    /// Release confirmed
    Released,
    /// Terminal failure; requires an operator
    Failed,
}

impl TransferStatus {
    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Submitted => "submitted",
            TransferStatus::Released => "released",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TransferStatus::Released | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "submitted" => Ok(TransferStatus::Submitted),
            "released" => Ok(TransferStatus::Released),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(eyre::eyre!("unknown transfer status: {}", other)),
        }
    }
}
