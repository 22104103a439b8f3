//! SHA-256 content digests.
//!
//! The digest of the plaintext is the integrity anchor stored with every
//! document. Comparison is an exact match on the canonical lower-case hex form.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the SHA-256 hex digest of raw bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Raw 32-byte SHA-256 digest.
pub fn hash_raw(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Full, case-sensitive equality of two hex digests.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.len() == DIGEST_HEX_LEN && expected == actual
}
