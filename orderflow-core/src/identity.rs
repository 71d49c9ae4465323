//! Identity and content-addressing types

use sha2::{Digest, Sha256};

/// Internal order identifier, assigned by the store.
pub type OrderId = i64;

/// Internal identifier of a delivery, payment or item row.
pub type RowId = i64;

/// SHA-256 content hash for deduplication of content-addressed rows.
pub type ContentHash = [u8; 32];

/// Builds a [`ContentHash`] over a sequence of fields.
///
/// Each field is written as a type tag, an 8-byte little-endian length and the
/// raw bytes, so `("ab", "c")` and `("a", "bc")` never collide.
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    /// Start a fingerprint in the given domain (entity name).
    pub fn new(domain: &str) -> Self {
        let mut fp = Self {
            hasher: Sha256::new(),
        };
        fp.write(b'd', domain.as_bytes());
        fp
    }

    pub fn str(mut self, value: &str) -> Self {
        self.write(b's', value.as_bytes());
        self
    }

    pub fn int(mut self, value: i64) -> Self {
        self.write(b'i', &value.to_le_bytes());
        self
    }

    pub fn finish(self) -> ContentHash {
        let result = self.hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    fn write(&mut self, tag: u8, bytes: &[u8]) {
        self.hasher.update([tag]);
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }
}

/// Lowercase hex form used for the `content_hash` column.
pub fn content_hash_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_separates_hashes() {
        let a = Fingerprinter::new("delivery").str("x").finish();
        let b = Fingerprinter::new("payment").str("x").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_str_and_int_are_distinct() {
        let a = Fingerprinter::new("item").int(1).finish();
        let b = Fingerprinter::new("item")
            .str(std::str::from_utf8(&1i64.to_le_bytes()).unwrap_or(""))
            .finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_is_64_chars() {
        let hash = Fingerprinter::new("item").int(999).finish();
        let hex = content_hash_hex(&hash);
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
