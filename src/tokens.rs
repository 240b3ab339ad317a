//! ERC20 metadata lookups

use alloy::primitives::Address;

use crate::chain::BridgeChain;
use crate::error::RelayError;
use crate::types::TokenMetadata;

/// Reads token metadata from one chain
pub struct TokenInspector<'a> {
    chain: &'a dyn BridgeChain,
}

impl<'a> TokenInspector<'a> {
    pub fn new(chain: &'a dyn BridgeChain) -> Self {
        Self { chain }
    }

    /// Fetch decimals, symbol and name concurrently
    ///
    /// The result is only valid if all three reads succeed.
    pub async fn describe(&self, token: Address) -> Result<TokenMetadata, RelayError> {
        let query_failed = |field: &str, e: RelayError| RelayError::TokenQueryFailed {
            token,
            reason: format!("{}: {}", field, e),
        };

        let (decimals, symbol, name) = tokio::try_join!(
            async {
                self.chain
                    .token_decimals(token)
                    .await
                    .map_err(|e| query_failed("decimals", e))
            },
            async {
                self.chain
                    .token_symbol(token)
                    .await
                    .map_err(|e| query_failed("symbol", e))
            },
            async {
                self.chain
                    .token_name(token)
                    .await
                    .map_err(|e| query_failed("name", e))
            }
        )?;

        Ok(TokenMetadata {
            decimals,
            symbol,
            name,
        })
    }
}
