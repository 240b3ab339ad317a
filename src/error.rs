//! Relay error taxonomy
//!
//! Failures are local to a single relay task. The variants mirror what a caller
//! needs to branch on: whether anything reached the chain, and whether the
//! failure is worth retrying.

use alloy::primitives::{Address, TxHash, B256};
use thiserror::Error;

use crate::attestation::AttestationId;
use crate::retry::{classify_error, ErrorClass};

/// Errors surfaced by chain clients, the attestation service and the relay engine
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// The node refused the transaction (bad nonce, signature, funds, gas)
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    /// The transaction was included but execution failed
    #[error("transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: TxHash },

    /// The destination chain accepted (or refused) the attestation but holds no mapping
    #[error("attestation of token {token} from chain {chain_id} failed: {reason}")]
    AttestationFailed {
        token: Address,
        chain_id: u64,
        reason: String,
    },

    /// Metadata reads against a token contract failed
    #[error("token query failed for {token}: {reason}")]
    TokenQueryFailed { token: Address, reason: String },

    /// The origin bridge has no record for this transfer id
    #[error("transfer {0} not found on origin bridge")]
    TransferNotFound(B256),

    /// The destination registry does not know this attestation id
    #[error("attestation {0} is not registered on the destination bridge")]
    UnknownAttestation(AttestationId),

    /// JSON-RPC / transport failure, generally transient
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The transfer ledger could not be read or written
    #[error("ledger error: {0}")]
    Ledger(String),
}

impl RelayError {
    /// How a caller should react to this error
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::TransactionRejected(msg) => classify_error(msg),
            RelayError::Rpc(msg) => match classify_error(msg) {
                ErrorClass::Permanent => ErrorClass::Transient,
                class => class,
            },
            RelayError::Ledger(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// The node already holds the broadcast transaction
    pub fn is_already_known(&self) -> bool {
        self.class() == ErrorClass::AlreadyKnown
    }

    /// The sender nonce of the broadcast transaction is already used
    pub fn is_nonce_too_low(&self) -> bool {
        self.class() == ErrorClass::NonceTooLow
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::TransactionRejected(_) => "rejected",
            RelayError::TransactionReverted { .. } => "reverted",
            RelayError::AttestationFailed { .. } => "attestation_failed",
            RelayError::TokenQueryFailed { .. } => "token_query_failed",
            RelayError::TransferNotFound(_) => "transfer_not_found",
            RelayError::UnknownAttestation(_) => "unknown_attestation",
            RelayError::Rpc(_) => "rpc",
            RelayError::Ledger(_) => "ledger",
        }
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(e: sqlx::Error) -> Self {
        RelayError::Ledger(e.to_string())
    }
}
