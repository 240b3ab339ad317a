//! Hash computation for attestation ids and ledger keys
//!
//! The attestation id must match the bridge contract's derivation exactly:
//! `keccak256(abi.encodePacked(address tokenAddress, uint256 chainId))`.

use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Compute the attestation id binding an origin token to its origin chain
///
/// abi.encodePacked(address, uint256) is 20 raw address bytes followed by the
/// chain id as a full 32-byte big-endian word, 52 bytes in total.
pub fn compute_attestation_id(token: &[u8; 20], chain_id: u64) -> [u8; 32] {
    let mut data = [0u8; 52];

    data[0..20].copy_from_slice(token);

    // uint256 chain id: big-endian u64 in the last 8 bytes of the word
    data[20 + 24..52].copy_from_slice(&chain_id.to_be_bytes());

    keccak256(&data)
}

/// Key for events that carry no id of their own: keccak256(txHash ++ uint64 logIndex)
pub fn compute_log_key(tx_hash: &[u8; 32], log_index: u64) -> [u8; 32] {
    let mut data = [0u8; 40];
    data[0..32].copy_from_slice(tx_hash);
    data[32..40].copy_from_slice(&log_index.to_be_bytes());
    keccak256(&data)
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};
    use alloy::sol_types::SolValue;

    #[test]
    fn test_keccak256() {
        let result = keccak256(b"hello");
        assert_eq!(
            bytes32_to_hex(&result),
            "0x1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn test_attestation_id_matches_abi_encode_packed() {
        let token: Address = "0xdAC17F958D2ee523a2206206994597C13D831ec7"
            .parse()
            .unwrap();
        let chain_id = 5u64;

        let packed = (token, U256::from(chain_id)).abi_encode_packed();
        assert_eq!(packed.len(), 52);

        let expected = alloy::primitives::keccak256(&packed);
        assert_eq!(compute_attestation_id(&token.0 .0, chain_id), expected.0);
    }

    #[test]
    fn test_attestation_id_is_deterministic() {
        let token = [0x11u8; 20];
        assert_eq!(
            compute_attestation_id(&token, 5),
            compute_attestation_id(&token, 5)
        );
    }

    #[test]
    fn test_attestation_id_depends_on_both_inputs() {
        let token = [0x11u8; 20];
        let other = [0x12u8; 20];
        assert_ne!(
            compute_attestation_id(&token, 5),
            compute_attestation_id(&token, 9001)
        );
        assert_ne!(
            compute_attestation_id(&token, 5),
            compute_attestation_id(&other, 5)
        );
    }

    #[test]
    fn test_log_key_depends_on_index() {
        let tx = [0xabu8; 32];
        assert_ne!(compute_log_key(&tx, 0), compute_log_key(&tx, 1));
    }
}
