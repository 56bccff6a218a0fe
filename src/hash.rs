//! Hash utilities for checkpoint messages and block identifiers

use sha2::{Digest, Sha256};

/// 256-bit hash value - fixed size array for blockchain use
pub type Hash256 = [u8; 32];

/// Zero hash, used as the parent of the genesis block
pub const ZERO_HASH: Hash256 = [0u8; 32];

/// Compute SHA256(SHA256(data))
pub fn hash256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);

    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    result
}

/// Parse a hexadecimal string into a 32-byte hash.
///
/// Unlike loose hex helpers elsewhere, checkpoint hashes must be exact:
/// anything other than 64 hex characters is rejected.
pub fn hash_from_hex(hex_str: &str) -> Option<Hash256> {
    let hex_str = hex_str.trim_start_matches("0x");
    let bytes = hex::decode(hex_str).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut result = [0u8; 32];
    result.copy_from_slice(&bytes);
    Some(result)
}

/// Short display form of a hash for log lines
pub fn short_hex(hash: &Hash256) -> String {
    let full = hex::encode(hash);
    format!("{}..{}", &full[..8], &full[56..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_double_sha() {
        let one = Sha256::digest(b"checkpoint");
        let two = Sha256::digest(one);
        assert_eq!(hash256(b"checkpoint")[..], two[..]);
    }

    #[test]
    fn test_hash_from_hex_strict() {
        let hex = "aa".repeat(32);
        assert_eq!(hash_from_hex(&hex), Some([0xaa; 32]));
        assert_eq!(hash_from_hex(&format!("0x{}", hex)), Some([0xaa; 32]));

        // Wrong length or non-hex input is rejected, not padded
        assert_eq!(hash_from_hex("aabb"), None);
        assert_eq!(hash_from_hex(&"zz".repeat(32)), None);
    }
}
