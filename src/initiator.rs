//! One-shot bridge operations: deposit and bridge-back

use alloy::primitives::utils::{parse_units, ParseUnits};
use alloy::primitives::{Address, U256};
use eyre::{bail, eyre, Result, WrapErr};
use tracing::info;

use crate::attestation::attestation_id;
use crate::chain::{submit_and_confirm, BridgeCall, BridgeChain, TxReceipt};
use crate::retry::RetryConfig;

/// Convert a human amount ("100", "0.5") to base units
pub fn to_base_units(amount: &str, decimals: u8) -> Result<U256> {
    let parsed = parse_units(amount.trim(), decimals)
        .map_err(|e| eyre!("invalid amount {:?}: {}", amount, e))?;
    let value = match parsed {
        ParseUnits::U256(value) => value,
        ParseUnits::I256(_) => bail!("amount must not be negative: {}", amount),
    };
    if value.is_zero() {
        bail!("amount must be greater than zero");
    }
    Ok(value)
}

/// Deposit submitted by [`bridge_tokens`]
#[derive(Debug, Clone)]
pub struct Deposit {
    pub amount: U256,
    pub recipient: Address,
    pub approve: TxReceipt,
    pub bridge: TxReceipt,
}

/// Approve the origin bridge and deposit `amount` of `token` for `destination_chain_id`
///
/// `recipient` defaults to the signer.
pub async fn bridge_tokens(
    origin: &dyn BridgeChain,
    token: Address,
    amount: &str,
    destination_chain_id: u64,
    recipient: Option<Address>,
) -> Result<Deposit> {
    let decimals = origin
        .token_decimals(token)
        .await
        .wrap_err_with(|| format!("Failed to read decimals of {}", token))?;
    let amount = to_base_units(amount, decimals)?;
    let recipient = recipient.unwrap_or_else(|| origin.signer_address());

    info!(
        token = %token,
        amount = %amount,
        decimals,
        destination_chain_id,
        recipient = %recipient,
        "Bridging tokens"
    );

    let retry = RetryConfig::default();
    let approve = submit_and_confirm(
        origin,
        BridgeCall::Approve {
            token,
            spender: origin.bridge_address(),
            amount,
        },
        &retry,
    )
    .await
    .wrap_err("approve failed")?;

    let bridge = submit_and_confirm(
        origin,
        BridgeCall::BridgeTokens {
            token,
            amount,
            destination_chain_id,
            recipient,
        },
        &retry,
    )
    .await
    .wrap_err("bridgeTokens failed")?;

    info!(tx_hash = %bridge.tx_hash, "Deposit confirmed");

    Ok(Deposit {
        amount,
        recipient,
        approve,
        bridge,
    })
}

/// Withdrawal submitted by [`bridge_back`]
#[derive(Debug, Clone)]
pub struct Withdrawal {
    pub wrapped_token: Address,
    pub origin_token: Address,
    pub origin_chain_id: u64,
    pub amount: U256,
    pub receipt: TxReceipt,
}

/// Burn wrapped tokens on the destination for release on the origin chain
///
/// Without `wrapped_token` the last wrapped entry of the supported-token list is
/// used. Returns `None` when the destination bridge has no wrapped token yet.
pub async fn bridge_back(
    destination: &dyn BridgeChain,
    wrapped_token: Option<Address>,
    amount: &str,
    recipient: Option<Address>,
    convert_to_native: bool,
) -> Result<Option<Withdrawal>> {
    let supported = destination
        .supported_tokens()
        .await
        .wrap_err("Failed to list supported tokens")?;

    let wrapped = match wrapped_token {
        Some(token) => {
            let known = supported
                .iter()
                .any(|info| info.is_wrapped && info.token == token);
            if !known {
                bail!("{} is not a wrapped token on the destination bridge", token);
            }
            token
        }
        None => match supported.iter().rev().find(|info| info.is_wrapped) {
            Some(info) => info.token,
            None => {
                info!("No wrapped tokens on the destination bridge, nothing to bridge back");
                return Ok(None);
            }
        },
    };

    let decimals = destination
        .token_decimals(wrapped)
        .await
        .wrap_err_with(|| format!("Failed to read decimals of {}", wrapped))?;
    let amount = to_base_units(amount, decimals)?;

    let (origin_token, origin_chain_id) = destination
        .deployed_token(wrapped)
        .await
        .wrap_err("Failed to resolve origin token")?;
    let id = attestation_id(origin_token, origin_chain_id);
    let recipient = recipient.unwrap_or_else(|| destination.signer_address());

    info!(
        wrapped = %wrapped,
        origin_token = %origin_token,
        origin_chain_id,
        attestation_id = %id,
        amount = %amount,
        recipient = %recipient,
        convert_to_native,
        "Bridging tokens back"
    );

    let receipt = submit_and_confirm(
        destination,
        BridgeCall::BridgeTokensBack {
            amount,
            recipient,
            attestation_id: id,
            convert_to_native,
        },
        &RetryConfig::default(),
    )
    .await
    .wrap_err("bridgeTokensBack failed")?;

    info!(tx_hash = %receipt.tx_hash, "Bridge-back confirmed");

    Ok(Some(Withdrawal {
        wrapped_token: wrapped,
        origin_token,
        origin_chain_id,
        amount,
        receipt,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_base_units() {
        assert_eq!(
            to_base_units("100", 6).unwrap(),
            U256::from(100_000_000u64)
        );
        assert_eq!(
            to_base_units("0.5", 18).unwrap(),
            U256::from(500_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_to_base_units_rejects_bad_input() {
        assert!(to_base_units("0", 6).is_err());
        assert!(to_base_units("-1", 6).is_err());
        assert!(to_base_units("abc", 6).is_err());
        assert!(to_base_units("0.0000001", 6).is_err());
    }
}
