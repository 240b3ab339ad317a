//! In-process bridge deployment used by the integration tests
//!
//! `MockChain` keeps the bridge registries, ERC20 metadata and a log of every
//! executed call, and can be told to misbehave in the ways the relayer must
//! survive. Signing only reserves a hash; a call executes when its bytes are
//! first broadcast, and rebroadcasting executed bytes is answered like a node
//! would, with "nonce too low".

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;

use crossbridge_relayer::attestation::{attestation_id, AttestationId};
use crossbridge_relayer::chain::{BridgeCall, BridgeChain, SignedTx, TxReceipt};
use crossbridge_relayer::error::RelayError;
use crossbridge_relayer::ledger::{MemoryLedger, SharedLedger};
use crossbridge_relayer::types::{
    BridgeBackEvent, BridgeEvent, EventOrigin, ObservedEvent, RelayJob, TokenInfo, TokenMetadata,
    TokenTransfer, TokenType,
};

pub const ORIGIN_CHAIN_ID: u64 = 5;
pub const DESTINATION_CHAIN_ID: u64 = 9001;

pub fn usdt() -> Address {
    Address::repeat_byte(0x55)
}

pub fn wrapped_usdt() -> Address {
    Address::repeat_byte(0x77)
}

pub fn recipient() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn usdt_metadata() -> TokenMetadata {
    TokenMetadata {
        decimals: 6,
        symbol: "USDT".to_string(),
        name: "Tether USD".to_string(),
    }
}

pub fn hundred_usdt() -> U256 {
    U256::from(100_000_000u64)
}

/// What the destination bridge does when it receives `attestToken`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestBehaviour {
    /// Register the given wrapped address
    Register(Address),
    /// Transaction is included but reverts
    Revert,
    /// Transaction succeeds but no mapping is stored
    RegisterNothing,
}

/// A broadcast error, raised before or after the node took the transaction
#[derive(Debug, Clone)]
enum Fault {
    Before(RelayError),
    After(RelayError),
}

#[derive(Debug)]
struct State {
    head: u64,
    events: Vec<ObservedEvent>,
    transfers: HashMap<B256, TokenTransfer>,
    wrapped: HashMap<(Address, u64), Address>,
    attested: HashMap<AttestationId, Address>,
    supported: Vec<TokenInfo>,
    deployed: HashMap<Address, (Address, u64)>,
    metadata: HashMap<Address, TokenMetadata>,
    submitted: Vec<BridgeCall>,
    receipts: HashMap<TxHash, bool>,
    signed: HashMap<TxHash, BridgeCall>,
    sign_failures: VecDeque<RelayError>,
    broadcast_faults: VecDeque<Fault>,
    broadcasts: usize,
    next_tx: u64,
    attest_behaviour: AttestBehaviour,
}

/// One side of the bridge, fully in memory
#[derive(Debug)]
pub struct MockChain {
    chain_id: u64,
    bridge: Address,
    signer: Address,
    state: Mutex<State>,
    attest_calls: AtomicUsize,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            bridge: Address::with_last_byte(chain_id as u8),
            signer: Address::repeat_byte(0x5e),
            state: Mutex::new(State {
                head: 0,
                events: Vec::new(),
                transfers: HashMap::new(),
                wrapped: HashMap::new(),
                attested: HashMap::new(),
                supported: Vec::new(),
                deployed: HashMap::new(),
                metadata: HashMap::new(),
                submitted: Vec::new(),
                receipts: HashMap::new(),
                signed: HashMap::new(),
                sign_failures: VecDeque::new(),
                broadcast_faults: VecDeque::new(),
                broadcasts: 0,
                next_tx: 1,
                attest_behaviour: AttestBehaviour::Register(wrapped_usdt()),
            }),
            attest_calls: AtomicUsize::new(0),
        })
    }

    pub fn origin() -> Arc<Self> {
        Self::new(ORIGIN_CHAIN_ID)
    }

    pub fn destination() -> Arc<Self> {
        Self::new(DESTINATION_CHAIN_ID)
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn BridgeChain> {
        Arc::clone(self) as Arc<dyn BridgeChain>
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn add_token(&self, token: Address, metadata: TokenMetadata) {
        self.state.lock().unwrap().metadata.insert(token, metadata);
    }

    pub fn add_transfer(&self, transfer: TokenTransfer) {
        self.state
            .lock()
            .unwrap()
            .transfers
            .insert(transfer.transfer_id, transfer);
    }

    pub fn add_event(&self, event: BridgeEvent, block_number: u64, log_index: u64) -> ObservedEvent {
        let observed = ObservedEvent {
            event,
            origin: EventOrigin {
                chain_id: self.chain_id,
                block_number,
                tx_hash: TxHash::with_last_byte(block_number as u8),
                log_index,
            },
        };
        self.state.lock().unwrap().events.push(observed.clone());
        observed
    }

    /// Pretend `token` from `chain_id` was attested earlier
    pub fn register_wrapped(&self, token: Address, chain_id: u64, wrapped: Address, decimals: u8) {
        let mut state = self.state.lock().unwrap();
        state.wrapped.insert((token, chain_id), wrapped);
        state
            .attested
            .insert(attestation_id(token, chain_id), token);
        state.supported.push(TokenInfo {
            token: wrapped,
            is_wrapped: true,
        });
        state.deployed.insert(wrapped, (token, chain_id));
        state.metadata.insert(
            wrapped,
            TokenMetadata {
                decimals,
                symbol: "wUSDT".to_string(),
                name: "Wrapped Tether USD".to_string(),
            },
        );
    }

    pub fn set_attest_behaviour(&self, behaviour: AttestBehaviour) {
        self.state.lock().unwrap().attest_behaviour = behaviour;
    }

    /// Fail the next signing attempts with `errors`, in order
    pub fn fail_next_signs(&self, errors: Vec<RelayError>) {
        self.state.lock().unwrap().sign_failures.extend(errors);
    }

    /// Fail the next broadcasts with `errors` before the node sees them
    pub fn fail_next_broadcasts(&self, errors: Vec<RelayError>) {
        let mut state = self.state.lock().unwrap();
        state
            .broadcast_faults
            .extend(errors.into_iter().map(Fault::Before));
    }

    /// Execute the next broadcasts, then report `errors` to the sender anyway
    pub fn fail_after_broadcast(&self, errors: Vec<RelayError>) {
        let mut state = self.state.lock().unwrap();
        state
            .broadcast_faults
            .extend(errors.into_iter().map(Fault::After));
    }

    /// Sign `call` without broadcasting it, as a run that stopped right after signing
    pub fn sign_only(&self, call: BridgeCall) -> SignedTx {
        let mut state = self.state.lock().unwrap();
        self.reserve(&mut state, call)
    }

    /// Number of broadcast attempts, including failed and repeated ones
    pub fn broadcasts(&self) -> usize {
        self.state.lock().unwrap().broadcasts
    }

    /// Make `tx_hash` known as an already included transaction
    pub fn preload_receipt(&self, tx_hash: TxHash, success: bool) {
        self.state.lock().unwrap().receipts.insert(tx_hash, success);
    }

    pub fn submitted(&self) -> Vec<BridgeCall> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn submitted_methods(&self) -> Vec<&'static str> {
        self.submitted().iter().map(|call| call.method()).collect()
    }

    pub fn attest_calls(&self) -> usize {
        self.attest_calls.load(Ordering::SeqCst)
    }

    fn reserve(&self, state: &mut State, call: BridgeCall) -> SignedTx {
        let tx_hash = TxHash::from(U256::from(state.next_tx) + U256::from(self.chain_id << 32));
        state.next_tx += 1;
        state.signed.insert(tx_hash, call);
        SignedTx {
            tx_hash,
            raw: Bytes::copy_from_slice(tx_hash.as_slice()),
        }
    }

    fn apply(&self, state: &mut State, call: &BridgeCall) -> bool {
        match call {
            BridgeCall::AttestToken {
                token, chain_id, ..
            } => {
                self.attest_calls.fetch_add(1, Ordering::SeqCst);
                match state.attest_behaviour {
                    AttestBehaviour::Register(wrapped) => {
                        state.wrapped.insert((*token, *chain_id), wrapped);
                        state
                            .attested
                            .insert(attestation_id(*token, *chain_id), *token);
                        state.supported.push(TokenInfo {
                            token: wrapped,
                            is_wrapped: true,
                        });
                        state.deployed.insert(wrapped, (*token, *chain_id));
                        true
                    }
                    AttestBehaviour::Revert => false,
                    AttestBehaviour::RegisterNothing => true,
                }
            }
            _ => true,
        }
    }
}

#[async_trait]
impl BridgeChain for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn bridge_address(&self) -> Address {
        self.bridge
    }

    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn block_number(&self) -> Result<u64, RelayError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn bridge_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ObservedEvent>, RelayError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.origin.block_number >= from_block && e.origin.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn token_transfer(&self, transfer_id: B256) -> Result<TokenTransfer, RelayError> {
        self.state
            .lock()
            .unwrap()
            .transfers
            .get(&transfer_id)
            .cloned()
            .ok_or(RelayError::TransferNotFound(transfer_id))
    }

    async fn is_wrapped_token_supported(
        &self,
        token: Address,
        chain_id: u64,
    ) -> Result<bool, RelayError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .wrapped
            .contains_key(&(token, chain_id)))
    }

    async fn wrapped_token(&self, token: Address, chain_id: u64) -> Result<Address, RelayError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .wrapped
            .get(&(token, chain_id))
            .copied()
            .unwrap_or(Address::ZERO))
    }

    async fn attested_token(&self, attestation_id: AttestationId) -> Result<Address, RelayError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attested
            .get(&attestation_id)
            .copied()
            .unwrap_or(Address::ZERO))
    }

    async fn supported_tokens(&self) -> Result<Vec<TokenInfo>, RelayError> {
        Ok(self.state.lock().unwrap().supported.clone())
    }

    async fn deployed_token(&self, wrapped: Address) -> Result<(Address, u64), RelayError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deployed
            .get(&wrapped)
            .copied()
            .unwrap_or((Address::ZERO, 0)))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, RelayError> {
        self.metadata(token).map(|m| m.decimals)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, RelayError> {
        self.metadata(token).map(|m| m.symbol)
    }

    async fn token_name(&self, token: Address) -> Result<String, RelayError> {
        self.metadata(token).map(|m| m.name)
    }

    async fn sign(&self, call: BridgeCall) -> Result<SignedTx, RelayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.sign_failures.pop_front() {
            return Err(error);
        }
        Ok(self.reserve(&mut state, call))
    }

    async fn broadcast(&self, tx: &SignedTx) -> Result<TxHash, RelayError> {
        // let concurrent callers interleave here
        tokio::task::yield_now().await;

        let mut state = self.state.lock().unwrap();
        state.broadcasts += 1;
        let late_error = match state.broadcast_faults.pop_front() {
            Some(Fault::Before(error)) => return Err(error),
            Some(Fault::After(error)) => Some(error),
            None => None,
        };

        if state.receipts.contains_key(&tx.tx_hash) {
            return Err(RelayError::TransactionRejected("nonce too low".to_string()));
        }
        let call = state
            .signed
            .get(&tx.tx_hash)
            .cloned()
            .ok_or_else(|| RelayError::TransactionRejected("invalid signature".to_string()))?;

        let success = self.apply(&mut state, &call);
        state.submitted.push(call);
        state.receipts.insert(tx.tx_hash, success);

        match late_error {
            Some(error) => Err(error),
            None => Ok(tx.tx_hash),
        }
    }

    async fn confirm(&self, tx_hash: TxHash) -> Result<TxReceipt, RelayError> {
        let state = self.state.lock().unwrap();
        match state.receipts.get(&tx_hash) {
            Some(true) => Ok(TxReceipt {
                tx_hash,
                block_number: Some(state.head),
            }),
            Some(false) => Err(RelayError::TransactionReverted { tx_hash }),
            None => Err(RelayError::Rpc(format!("unknown transaction {}", tx_hash))),
        }
    }
}

impl MockChain {
    fn metadata(&self, token: Address) -> Result<TokenMetadata, RelayError> {
        self.state
            .lock()
            .unwrap()
            .metadata
            .get(&token)
            .cloned()
            .ok_or_else(|| RelayError::Rpc(format!("no contract at {}", token)))
    }
}

pub fn memory_ledger() -> SharedLedger {
    Arc::new(MemoryLedger::new())
}

/// 100 USDT deposited on the origin towards `recipient()`
pub fn usdt_deposit(transfer_id: B256) -> TokenTransfer {
    TokenTransfer {
        transfer_id,
        amount: hundred_usdt(),
        destination_address: recipient(),
        source_token_address: usdt(),
        source_chain_id: ORIGIN_CHAIN_ID,
        token_type: TokenType::Erc20,
    }
}

/// Origin chain holding one 100 USDT deposit towards `recipient()`
pub fn origin_with_deposit(transfer_id: B256) -> Arc<MockChain> {
    let origin = MockChain::origin();
    origin.add_token(usdt(), usdt_metadata());
    origin.add_transfer(usdt_deposit(transfer_id));
    origin
}

pub fn forward_job(transfer_id: B256) -> RelayJob {
    RelayJob::Forward {
        transfer_id,
        origin: EventOrigin {
            chain_id: ORIGIN_CHAIN_ID,
            block_number: 10,
            tx_hash: TxHash::repeat_byte(0x10),
            log_index: 0,
        },
    }
}

pub fn backward_job(attestation_id: AttestationId, log_index: u64) -> RelayJob {
    RelayJob::Backward {
        event: BridgeBackEvent {
            amount: hundred_usdt(),
            destination_address: recipient(),
            attestation_id,
            convert_to_native: false,
        },
        origin: EventOrigin {
            chain_id: DESTINATION_CHAIN_ID,
            block_number: 20,
            tx_hash: TxHash::repeat_byte(0x20),
            log_index,
        },
    }
}
