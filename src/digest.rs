//! SHA-256 digests and identifier validation.
//!
//! Blob identifiers, owner namespaces and verification claims all share one
//! encoding: the lowercase hex form of a SHA-256 digest, 64 characters long.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest (32 bytes, two hex chars each).
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the lowercase SHA-256 hex digest of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Returns `true` when `id` is exactly 64 lowercase hex characters.
///
/// Anything else could name a path outside the store, so callers reject it
/// before building a filesystem path from it.
pub fn is_digest_hex(id: &str) -> bool {
    id.len() == DIGEST_HEX_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
