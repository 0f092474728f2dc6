//! Content checksums for minidfs
//!
//! Files are identified on the wire by a lowercase hex SHA-256 digest.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute SHA-256 of data, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute SHA-256 incrementally (for streamed bodies)
pub struct ChecksumHasher {
    hasher: Sha256,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Is this a well-formed digest string?
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == DIGEST_HEX_LEN && digest.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare two digests ignoring hex case
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex(b"hello world");
        assert_eq!(hash.len(), DIGEST_HEX_LEN);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = ChecksumHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), sha256_hex(b"hello world"));
    }

    #[test]
    fn test_digest_validation() {
        assert!(is_valid_digest(&sha256_hex(b"x")));
        assert!(!is_valid_digest("abc"));
        assert!(!is_valid_digest(&"z".repeat(DIGEST_HEX_LEN)));
        assert!(digests_match("ABCDEF", "abcdef"));
    }
}
