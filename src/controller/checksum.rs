//! # Checksums
//!
//! Content hashes used to skip writes whose content has not changed since the
//! last successful write to the same destination.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// SHA-256 digest of fully rendered destination content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Hash a single buffer
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }

    /// Hash a key/value map in key order
    ///
    /// Each key and value is length-prefixed so that different maps can never
    /// produce the same byte stream.
    pub fn of_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut sorted: Vec<(&str, &[u8])> = entries.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (key, value) in sorted {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value);
        }
        Self(hasher.finalize().into())
    }

    /// Hex rendering, for debug logs only
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Last written checksum per destination (group name or Secret name)
///
/// Lives as long as the provider that owns it; never persisted.
#[derive(Debug, Default)]
pub struct ChecksumStore {
    sums: HashMap<String, Checksum>,
}

impl ChecksumStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing is recorded for `key` or the recorded checksum differs
    ///
    /// Never modifies the store; call [`ChecksumStore::record`] after the
    /// write succeeded.
    #[must_use]
    pub fn changed(&self, key: &str, checksum: &Checksum) -> bool {
        self.sums.get(key) != Some(checksum)
    }

    pub fn record(&mut self, key: &str, checksum: Checksum) {
        self.sums.insert(key.to_string(), checksum);
    }

    /// Forget a destination so its next write is unconditional
    pub fn forget(&mut self, key: &str) {
        self.sums.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_is_changed() {
        let store = ChecksumStore::new();
        assert!(store.changed("group", &Checksum::of(b"content")));
    }

    #[test]
    fn test_recorded_checksum_is_unchanged() {
        let mut store = ChecksumStore::new();
        store.record("group", Checksum::of(b"content"));

        assert!(!store.changed("group", &Checksum::of(b"content")));
        assert!(store.changed("group", &Checksum::of(b"content2")));
        assert!(store.changed("other", &Checksum::of(b"content")));
    }

    #[test]
    fn test_changed_does_not_record() {
        let store = ChecksumStore::new();
        let sum = Checksum::of(b"content");
        assert!(store.changed("group", &sum));
        assert!(store.changed("group", &sum));
    }

    #[test]
    fn test_forget() {
        let mut store = ChecksumStore::new();
        store.record("group", Checksum::of(b"content"));
        store.forget("group");
        assert!(store.changed("group", &Checksum::of(b"content")));
    }

    #[test]
    fn test_entries_checksum_is_order_independent() {
        let a = Checksum::of_entries([("a", b"1".as_slice()), ("b", b"2".as_slice())]);
        let b = Checksum::of_entries([("b", b"2".as_slice()), ("a", b"1".as_slice())]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_entries_checksum_is_unambiguous() {
        // "ab"="" vs "a"="b" must not collide
        let a = Checksum::of_entries([("ab", b"".as_slice())]);
        let b = Checksum::of_entries([("a", b"b".as_slice())]);
        assert_ne!(a, b);
        assert_eq!(a.to_hex().len(), 64);
    }
}
