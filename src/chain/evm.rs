//! alloy-backed `BridgeChain`
//!
//! Transactions are signed locally with a nonce handed out under a per-chain
//! lock, so concurrent relay tasks sharing one key never collide, and the
//! signed bytes can be rebroadcast unchanged after an ambiguous send error.

use std::sync::Arc;
use std::time::Duration;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::http::reqwest::Url;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{BridgeCall, BridgeChain, SignedTx, TxReceipt};
use crate::attestation::AttestationId;
use crate::config::{ChainEndpoint, RelayerConfig};
use crate::contracts::{CrossBridge, ERC20};
use crate::error::RelayError;
use crate::types::{
    BridgeBackEvent, BridgeEvent, EventOrigin, ObservedEvent, TokenInfo, TokenMetadata,
    TokenTransfer, TokenType,
};

/// EVM chain client bound to one CrossBridge deployment
pub struct EvmBridgeChain<P> {
    provider: P,
    chain_id: u64,
    bridge_address: Address,
    signer_address: Address,
    wallet: EthereumWallet,
    /// Next nonce to hand out; `None` until fetched or after a resync
    nonce: Mutex<Option<u64>>,
    poll_interval: Duration,
    max_block_range: u64,
}

/// Connect to `endpoint` signing with `private_key`
///
/// The fully layered provider type is never named; callers get a trait object.
pub fn connect(
    endpoint: &ChainEndpoint,
    private_key: &str,
    relayer: &RelayerConfig,
) -> Result<Arc<dyn BridgeChain>> {
    let url: Url = endpoint
        .rpc_url
        .parse()
        .wrap_err("Failed to parse RPC URL")?;
    let bridge_address = endpoint.bridge_address;

    let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;
    let signer_address = signer.address();
    let wallet = EthereumWallet::from(signer);

    let provider = ProviderBuilder::new().on_http(url);

    info!(
        name = %endpoint.name,
        chain_id = endpoint.chain_id,
        bridge_address = %bridge_address,
        signer = %signer_address,
        "Created EVM bridge client"
    );

    Ok(Arc::new(EvmBridgeChain {
        provider,
        chain_id: endpoint.chain_id,
        bridge_address,
        signer_address,
        wallet,
        nonce: Mutex::new(None),
        poll_interval: Duration::from_millis(relayer.poll_interval_ms),
        max_block_range: relayer.max_block_range.max(1),
    }))
}

fn rpc_error(e: impl std::fmt::Display) -> RelayError {
    RelayError::Rpc(e.to_string())
}

fn u256_to_u64(value: U256, what: &str) -> Result<u64, RelayError> {
    u64::try_from(value).map_err(|_| RelayError::Rpc(format!("{} {} exceeds u64", what, value)))
}

impl<P> EvmBridgeChain<P>
where
    P: Provider<Http<Client>> + 'static,
{
    fn event_origin(&self, log: &Log) -> Option<EventOrigin> {
        Some(EventOrigin {
            chain_id: self.chain_id,
            block_number: log.block_number?,
            tx_hash: log.transaction_hash?,
            log_index: log.log_index?,
        })
    }

    /// Decode one bridge log; `None` for unrelated or malformed logs
    fn parse_log(&self, log: &Log) -> Option<ObservedEvent> {
        let topic0 = *log.topics().first()?;

        let event = if topic0 == CrossBridge::TokensBridged::SIGNATURE_HASH {
            match log.log_decode::<CrossBridge::TokensBridged>() {
                Ok(decoded) => {
                    BridgeEvent::TokensBridged {
                        transfer_id: decoded.inner.data.transferId,
                    }
                }
                Err(e) => {
                    warn!(tx_hash = ?log.transaction_hash, error = %e, "Failed to decode TokensBridged log");
                    return None;
                }
            }
        } else if topic0 == CrossBridge::TokensBridgedBack::SIGNATURE_HASH {
            match log.log_decode::<CrossBridge::TokensBridgedBack>() {
                Ok(decoded) => {
                    let data = decoded.inner.data;
                    BridgeEvent::TokensBridgedBack(BridgeBackEvent {
                        amount: data.amount,
                        destination_address: data.to,
                        attestation_id: AttestationId::from(data.attestationId),
                        convert_to_native: data.convertToNative,
                    })
                }
                Err(e) => {
                    warn!(tx_hash = ?log.transaction_hash, error = %e, "Failed to decode TokensBridgedBack log");
                    return None;
                }
            }
        } else {
            return None;
        };

        let Some(origin) = self.event_origin(log) else {
            warn!(tx_hash = ?log.transaction_hash, "Bridge log without block position, skipping");
            return None;
        };

        Some(ObservedEvent { event, origin })
    }

    /// Unsigned request for `call`, without nonce, gas or fees
    fn call_request(&self, call: BridgeCall) -> TransactionRequest {
        let bridge = CrossBridge::new(self.bridge_address, &self.provider);

        match call {
            BridgeCall::AttestToken {
                token,
                chain_id,
                token_type,
                metadata,
            } => {
                let TokenMetadata {
                    decimals,
                    symbol,
                    name,
                } = metadata;
                let attestation = CrossBridge::TokenAttestation {
                    tokenAddress: token,
                    tokenChain: U256::from(chain_id),
                    tokenType: token_type.as_u8(),
                    decimals,
                    symbol,
                    name,
                    wrappedTokenAddress: Address::ZERO,
                };
                bridge.attestToken(attestation).into_transaction_request()
            }
            BridgeCall::AddDeployedToken { token } => {
                bridge.addDeployedToken(token).into_transaction_request()
            }
            BridgeCall::ReleaseWrappedTokens {
                amount,
                recipient,
                attestation_id,
            } => bridge
                .releaseWrappedTokens(amount, recipient, attestation_id.into())
                .into_transaction_request(),
            BridgeCall::ReleaseTokens {
                amount,
                recipient,
                token,
                convert_to_native,
            } => bridge
                .releaseTokens(amount, recipient, token, convert_to_native)
                .into_transaction_request(),
            BridgeCall::Approve {
                token,
                spender,
                amount,
            } => ERC20::new(token, &self.provider)
                .approve(spender, amount)
                .into_transaction_request(),
            BridgeCall::BridgeTokens {
                token,
                amount,
                destination_chain_id,
                recipient,
            } => bridge
                .bridgeTokens(token, amount, U256::from(destination_chain_id), recipient)
                .into_transaction_request(),
            BridgeCall::BridgeTokensBack {
                amount,
                recipient,
                attestation_id,
                convert_to_native,
            } => bridge
                .bridgeTokensBack(amount, recipient, attestation_id.into(), convert_to_native)
                .into_transaction_request(),
        }
    }
}

#[async_trait]
impl<P> BridgeChain for EvmBridgeChain<P>
where
    P: Provider<Http<Client>> + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn bridge_address(&self) -> Address {
        self.bridge_address
    }

    fn signer_address(&self) -> Address {
        self.signer_address
    }

    async fn block_number(&self) -> Result<u64, RelayError> {
        self.provider.get_block_number().await.map_err(rpc_error)
    }

    async fn bridge_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ObservedEvent>, RelayError> {
        let mut events = Vec::new();
        let mut current_from = from_block;

        // Chunk into manageable ranges
        while current_from <= to_block {
            let current_to = std::cmp::min(current_from + self.max_block_range - 1, to_block);

            let filter = Filter::new()
                .address(self.bridge_address)
                .from_block(current_from)
                .to_block(current_to);

            let logs = self.provider.get_logs(&filter).await.map_err(|e| {
                RelayError::Rpc(format!(
                    "failed to get logs from block {} to {}: {}",
                    current_from, current_to, e
                ))
            })?;

            events.extend(logs.iter().filter_map(|log| self.parse_log(log)));
            current_from = current_to + 1;
        }

        if !events.is_empty() {
            debug!(
                chain_id = self.chain_id,
                count = events.len(),
                from = from_block,
                to = to_block,
                "Found bridge events"
            );
        }

        Ok(events)
    }

    async fn token_transfer(&self, transfer_id: B256) -> Result<TokenTransfer, RelayError> {
        let bridge = CrossBridge::new(self.bridge_address, &self.provider);
        let record = bridge
            .tokenTransfers(transfer_id)
            .call()
            .await
            .map_err(rpc_error)?;

        let transfer = record.tokenTransfer;
        if transfer.tokenAddress == Address::ZERO && record.amount.is_zero() {
            return Err(RelayError::TransferNotFound(transfer_id));
        }

        Ok(TokenTransfer {
            transfer_id,
            amount: record.amount,
            destination_address: transfer.dstAddress,
            source_token_address: transfer.tokenAddress,
            source_chain_id: u256_to_u64(transfer.srcChain, "source chain id")?,
            token_type: TokenType::from(transfer.tokenType),
        })
    }

    async fn is_wrapped_token_supported(
        &self,
        token: Address,
        chain_id: u64,
    ) -> Result<bool, RelayError> {
        let bridge = CrossBridge::new(self.bridge_address, &self.provider);
        let supported = bridge
            .isWrappedTokenSupported(token, U256::from(chain_id))
            .call()
            .await
            .map_err(rpc_error)?;
        Ok(supported._0)
    }

    async fn wrapped_token(&self, token: Address, chain_id: u64) -> Result<Address, RelayError> {
        let bridge = CrossBridge::new(self.bridge_address, &self.provider);
        let wrapped = bridge
            .getWrappedToken(token, U256::from(chain_id))
            .call()
            .await
            .map_err(rpc_error)?;
        Ok(wrapped._0)
    }

    async fn attested_token(&self, attestation_id: AttestationId) -> Result<Address, RelayError> {
        let bridge = CrossBridge::new(self.bridge_address, &self.provider);
        let attestation = bridge
            .attestedTokens(attestation_id.into())
            .call()
            .await
            .map_err(rpc_error)?;
        Ok(attestation.tokenAddress)
    }

    async fn supported_tokens(&self) -> Result<Vec<TokenInfo>, RelayError> {
        let bridge = CrossBridge::new(self.bridge_address, &self.provider);
        let tokens = bridge
            .getSupportedTokens()
            .call()
            .await
            .map_err(rpc_error)?;
        Ok(tokens
            ._0
            .into_iter()
            .map(|info| TokenInfo {
                token: info.token,
                is_wrapped: info.isWrapped,
            })
            .collect())
    }

    async fn deployed_token(&self, wrapped: Address) -> Result<(Address, u64), RelayError> {
        let bridge = CrossBridge::new(self.bridge_address, &self.provider);
        let deployed = bridge
            .getDeployedToken(wrapped)
            .call()
            .await
            .map_err(rpc_error)?;
        Ok((
            deployed.tokenAddress,
            u256_to_u64(deployed.chainId, "origin chain id")?,
        ))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, RelayError> {
        let contract = ERC20::new(token, &self.provider);
        let decimals = contract.decimals().call().await.map_err(rpc_error)?;
        Ok(decimals._0)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, RelayError> {
        let contract = ERC20::new(token, &self.provider);
        let symbol = contract.symbol().call().await.map_err(rpc_error)?;
        Ok(symbol._0)
    }

    async fn token_name(&self, token: Address) -> Result<String, RelayError> {
        let contract = ERC20::new(token, &self.provider);
        let name = contract.name().call().await.map_err(rpc_error)?;
        Ok(name._0)
    }

    async fn sign(&self, call: BridgeCall) -> Result<SignedTx, RelayError> {
        let method = call.method();
        debug!(chain_id = self.chain_id, method, call = ?call, "Signing transaction");

        let request = self
            .call_request(call)
            .with_from(self.signer_address)
            .with_chain_id(self.chain_id);

        // Reverting calls fail here, before a nonce is taken
        let (gas_limit, fees) = tokio::try_join!(
            async { self.provider.estimate_gas(&request).await },
            async { self.provider.estimate_eip1559_fees(None).await },
        )
        .map_err(|e| RelayError::TransactionRejected(e.to_string()))?;

        let mut next_nonce = self.nonce.lock().await;
        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => self
                .provider
                .get_transaction_count(self.signer_address)
                .pending()
                .await
                .map_err(rpc_error)?,
        };

        let envelope = request
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_max_fee_per_gas(fees.max_fee_per_gas)
            .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas)
            .build(&self.wallet)
            .await
            .map_err(|e| RelayError::TransactionRejected(format!("signing failed: {}", e)))?;
        *next_nonce = Some(nonce + 1);
        drop(next_nonce);

        let tx_hash = *envelope.tx_hash();
        debug!(chain_id = self.chain_id, method, nonce, tx_hash = %tx_hash, "Signed transaction");

        Ok(SignedTx {
            tx_hash,
            raw: Bytes::from(envelope.encoded_2718()),
        })
    }

    async fn broadcast(&self, tx: &SignedTx) -> Result<TxHash, RelayError> {
        match self.provider.send_raw_transaction(&tx.raw).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) => {
                let error = RelayError::TransactionRejected(e.to_string());
                // A refused nonce is never used, refetch before the next sign
                if !error.is_transient() && !error.is_already_known() {
                    *self.nonce.lock().await = None;
                }
                Err(error)
            }
        }
    }

    async fn confirm(&self, tx_hash: TxHash) -> Result<TxReceipt, RelayError> {
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.status() {
                        return Err(RelayError::TransactionReverted { tx_hash });
                    }
                    return Ok(TxReceipt {
                        tx_hash,
                        block_number: receipt.block_number,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        chain_id = self.chain_id,
                        tx_hash = %tx_hash,
                        error = %e,
                        "Failed to fetch receipt, will poll again"
                    );
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(rpc_url: &str) -> ChainEndpoint {
        ChainEndpoint {
            name: "origin".to_string(),
            rpc_url: rpc_url.to_string(),
            chain_id: 31337,
            bridge_address: Address::repeat_byte(0x0b),
            start_block: None,
        }
    }

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_u256_to_u64_bounds() {
        assert_eq!(u256_to_u64(U256::from(42u64), "chain id").unwrap(), 42);
        assert!(u256_to_u64(U256::MAX, "chain id").is_err());
    }

    #[test]
    fn test_connect_derives_signer_address() {
        let chain = connect(
            &endpoint("http://localhost:8545"),
            ANVIL_KEY,
            &RelayerConfig::default(),
        )
        .unwrap();
        assert_eq!(chain.chain_id(), 31337);
        assert_eq!(chain.bridge_address(), Address::repeat_byte(0x0b));
        assert_eq!(
            chain.signer_address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_connect_rejects_bad_inputs() {
        let config = RelayerConfig::default();
        assert!(connect(&endpoint("not a url"), ANVIL_KEY, &config).is_err());
        assert!(connect(&endpoint("http://localhost:8545"), "0x1234", &config).is_err());
    }

    /// Requires a node at ORIGIN_RPC_URL
    #[tokio::test]
    #[ignore]
    async fn test_live_block_number() {
        let rpc_url =
            std::env::var("ORIGIN_RPC_URL").unwrap_or_else(|_| "http://localhost:8545".into());
        let chain = connect(&endpoint(&rpc_url), ANVIL_KEY, &RelayerConfig::default()).unwrap();
        let head = chain.block_number().await.unwrap();
        let events = chain.bridge_events(head.saturating_sub(10), head).await;
        assert!(events.is_ok());
    }
}
