// Striped store: routes each key to one of N independently-locked shards.

use bytes::Bytes;
use xxhash_rust::xxh3::xxh3_64;

use super::shard::{CacheError, Shard};

/// A striped LRU key-value store.
///
/// Each shard owns its own lock and its own byte budget; an operation on
/// one key never blocks on another key routed to a different shard.
pub struct Store {
    shards: Vec<Shard>,
}

impl Store {
    /// Builds a store with `shard_count` shards, each budgeted to
    /// `shard_max_bytes` bytes of `|key|+|value|`.
    pub fn new(shard_count: usize, shard_max_bytes: usize) -> Self {
        assert!(shard_count > 0, "shard_count must be positive");
        let shards = (0..shard_count).map(|_| Shard::new(shard_max_bytes)).collect();
        Self { shards }
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        let h = xxh3_64(key);
        &self.shards[(h as usize) % self.shards.len()]
    }

    pub fn put(&self, key: Bytes, value: Bytes, flags: u32) -> Result<(), CacheError> {
        self.shard(&key).put(key, value, flags)
    }

    pub fn put_if_absent(&self, key: Bytes, value: Bytes, flags: u32) -> Result<bool, CacheError> {
        self.shard(&key).put_if_absent(key, value, flags)
    }

    pub fn set(&self, key: &[u8], value: Bytes, flags: u32) -> Result<bool, CacheError> {
        self.shard(key).set(key, value, flags)
    }

    /// Returns the value and its stored flags, promoting the entry to MRU.
    pub fn get(&self, key: &[u8]) -> Option<(Bytes, u32)> {
        self.shard(key).get(key)
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.shard(key).delete(key)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total items across all shards. Intended for diagnostics, not hot paths.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes charged across all shards.
    pub fn mem(&self) -> usize {
        self.shards.iter().map(Shard::mem).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn routes_disjoint_keys_to_independent_shards() {
        let store = Store::new(8, 1024);
        for i in 0..100 {
            let k = format!("key-{i}");
            store.put(b(&k), b("v"), 0).unwrap();
        }
        assert_eq!(store.len(), 100);
        for i in 0..100 {
            let k = format!("key-{i}");
            assert_eq!(store.get(k.as_bytes()), Some((b("v"), 0)));
        }
    }

    #[test]
    fn put_get_delete_round_trip() {
        let store = Store::new(4, 1024);
        store.put(b("a"), b("1"), 0).unwrap();
        assert_eq!(store.get(b"a"), Some((b("1"), 0)));
        assert!(store.delete(b"a"));
        assert!(store.get(b"a").is_none());
        assert!(!store.delete(b"a"));
    }

    #[test]
    fn flags_round_trip_through_get() {
        let store = Store::new(4, 1024);
        store.put(b("a"), b("1"), 42).unwrap();
        assert_eq!(store.get(b"a"), Some((b("1"), 42)));
    }

    #[test]
    #[should_panic]
    fn zero_shards_rejected() {
        Store::new(0, 1024);
    }
}
