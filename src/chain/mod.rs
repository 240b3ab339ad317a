//! Chain client abstraction
//!
//! `BridgeChain` is the only surface through which the relayer touches a chain:
//! typed reads against the bridge and token contracts, transaction signing and
//! broadcast, receipt confirmation and bridge event retrieval. The alloy-backed
//! implementation lives in `evm`; tests substitute in-process mocks.

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::attestation::AttestationId;
use crate::error::RelayError;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{ObservedEvent, TokenInfo, TokenMetadata, TokenTransfer, TokenType};

pub mod evm;

pub use evm::{connect, EvmBridgeChain};

/// A state-changing call the relayer or an initiator can submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    /// `attestToken` on the destination bridge, with a zero wrapped-address placeholder
    AttestToken {
        token: Address,
        chain_id: u64,
        token_type: TokenType,
        metadata: TokenMetadata,
    },
    /// `addDeployedToken` on the origin bridge
    AddDeployedToken { token: Address },
    /// `releaseWrappedTokens` on the destination bridge
    ReleaseWrappedTokens {
        amount: U256,
        recipient: Address,
        attestation_id: AttestationId,
    },
    /// `releaseTokens` on the origin bridge
    ReleaseTokens {
        amount: U256,
        recipient: Address,
        token: Address,
        convert_to_native: bool,
    },
    /// ERC20 `approve` on the token contract itself
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    /// `bridgeTokens` on the origin bridge
    BridgeTokens {
        token: Address,
        amount: U256,
        destination_chain_id: u64,
        recipient: Address,
    },
    /// `bridgeTokensBack` on the destination bridge
    BridgeTokensBack {
        amount: U256,
        recipient: Address,
        attestation_id: AttestationId,
        convert_to_native: bool,
    },
}

impl BridgeCall {
    /// Contract method name, for logs and metrics
    pub fn method(&self) -> &'static str {
        match self {
            BridgeCall::AttestToken { .. } => "attestToken",
            BridgeCall::AddDeployedToken { .. } => "addDeployedToken",
            BridgeCall::ReleaseWrappedTokens { .. } => "releaseWrappedTokens",
            BridgeCall::ReleaseTokens { .. } => "releaseTokens",
            BridgeCall::Approve { .. } => "approve",
            BridgeCall::BridgeTokens { .. } => "bridgeTokens",
            BridgeCall::BridgeTokensBack { .. } => "bridgeTokensBack",
        }
    }
}

/// A transaction signed with a fixed nonce, ready to be broadcast as-is
///
/// Broadcasting the same bytes again can never produce a second transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub tx_hash: TxHash,
    /// EIP-2718 encoded envelope
    pub raw: Bytes,
}

/// Confirmation of a successfully executed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// Connection to one bridge deployment on one chain
#[async_trait]
pub trait BridgeChain: Send + Sync {
    /// Native chain id of this network
    fn chain_id(&self) -> u64;

    /// Address of the CrossBridge contract on this chain
    fn bridge_address(&self) -> Address;

    /// Address transactions are signed with
    fn signer_address(&self) -> Address;

    /// Latest block number
    async fn block_number(&self) -> Result<u64, RelayError>;

    /// Bridge events emitted in `[from_block, to_block]`, in emission order
    async fn bridge_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ObservedEvent>, RelayError>;

    // ------------------------------------------------------------------------
    // Bridge reads
    // ------------------------------------------------------------------------

    /// `tokenTransfers(transferId)`
    async fn token_transfer(&self, transfer_id: B256) -> Result<TokenTransfer, RelayError>;

    /// `isWrappedTokenSupported(token, chainId)`
    async fn is_wrapped_token_supported(
        &self,
        token: Address,
        chain_id: u64,
    ) -> Result<bool, RelayError>;

    /// `getWrappedToken(token, chainId)`; zero when no mapping exists
    async fn wrapped_token(&self, token: Address, chain_id: u64) -> Result<Address, RelayError>;

    /// Origin token address of `attestedTokens(attestationId)`; zero when unknown
    async fn attested_token(&self, attestation_id: AttestationId) -> Result<Address, RelayError>;

    /// `getSupportedTokens()`
    async fn supported_tokens(&self) -> Result<Vec<TokenInfo>, RelayError>;

    /// `getDeployedToken(wrapped)` -> (origin token, origin chain id)
    async fn deployed_token(&self, wrapped: Address) -> Result<(Address, u64), RelayError>;

    // ------------------------------------------------------------------------
    // ERC20 reads
    // ------------------------------------------------------------------------

    async fn token_decimals(&self, token: Address) -> Result<u8, RelayError>;

    async fn token_symbol(&self, token: Address) -> Result<String, RelayError>;

    async fn token_name(&self, token: Address) -> Result<String, RelayError>;

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Estimate, assign a nonce to and sign `call`; nothing is sent
    async fn sign(&self, call: BridgeCall) -> Result<SignedTx, RelayError>;

    /// Hand signed bytes to the node
    async fn broadcast(&self, tx: &SignedTx) -> Result<TxHash, RelayError>;

    /// Wait until `tx_hash` is included; fails with `TransactionReverted` if execution failed
    async fn confirm(&self, tx_hash: TxHash) -> Result<TxReceipt, RelayError>;
}

/// Broadcast `tx`, resending the same bytes on transient errors
///
/// "already known" means a node holds the transaction. Once the bytes may have
/// reached a node (`previously_sent`, or an earlier attempt that failed
/// ambiguously), "nonce too low" means it was mined.
pub async fn broadcast_signed(
    chain: &dyn BridgeChain,
    tx: &SignedTx,
    retry: &RetryConfig,
    label: &str,
    previously_sent: bool,
) -> Result<TxHash, RelayError> {
    with_retry(retry, label, move |attempt| async move {
        match chain.broadcast(tx).await {
            Err(e)
                if e.is_already_known()
                    || (e.is_nonce_too_low() && (previously_sent || attempt > 0)) =>
            {
                debug!(
                    chain_id = chain.chain_id(),
                    tx_hash = %tx.tx_hash,
                    error = %e,
                    "Transaction already sent"
                );
                Ok(tx.tx_hash)
            }
            other => other,
        }
    })
    .await
}

/// Sign `call` once, broadcast it and wait for its receipt
pub async fn submit_and_confirm(
    chain: &dyn BridgeChain,
    call: BridgeCall,
    retry: &RetryConfig,
) -> Result<TxReceipt, RelayError> {
    let method = call.method();
    let signed = with_retry(retry, method, |_| chain.sign(call.clone())).await?;
    let tx_hash = broadcast_signed(chain, &signed, retry, method, false).await?;
    info!(
        chain_id = chain.chain_id(),
        method,
        tx_hash = %tx_hash,
        "Transaction sent, waiting for confirmation"
    );
    chain.confirm(tx_hash).await
}
