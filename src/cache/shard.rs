// Intrusive LRU ring for one shard of the striped store.
//
// Nodes live in an arena (a `Vec<Node>` indexed by integer handle) so the
// ring can be a doubly-linked list without fighting the borrow checker over
// owning cycles. Index 0 is a permanent sentinel: the node immediately
// after it (`sentinel.next`) is the most-recently-used entry, the node
// immediately before it (`sentinel.prev`) is the least-recently-used one.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

use super::entry::Entry;

const SENTINEL: usize = 0;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("object of {size} bytes is too large for a shard budget of {max} bytes")]
    TooLarge { size: usize, max: usize },
}

struct Node {
    key: Bytes,
    value: Bytes,
    flags: u32,
    prev: usize,
    next: usize,
}

impl Node {
    fn sentinel() -> Self {
        Self {
            key: Bytes::new(),
            value: Bytes::new(),
            flags: 0,
            prev: SENTINEL,
            next: SENTINEL,
        }
    }
}

struct Inner {
    arena: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<Bytes, usize>,
    mem: usize,
    max: usize,
}

impl Inner {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.arena[idx].prev, self.arena[idx].next);
        self.arena[prev].next = next;
        self.arena[next].prev = prev;
    }

    fn link_after_head(&mut self, idx: usize) {
        let old_head_next = self.arena[SENTINEL].next;
        self.arena[idx].prev = SENTINEL;
        self.arena[idx].next = old_head_next;
        self.arena[old_head_next].prev = idx;
        self.arena[SENTINEL].next = idx;
    }

    fn touch(&mut self, idx: usize) {
        self.unlink(idx);
        self.link_after_head(idx);
    }

    fn alloc(&mut self, key: Bytes, value: Bytes, flags: u32) -> usize {
        let node = Node {
            key,
            value,
            flags,
            prev: SENTINEL,
            next: SENTINEL,
        };
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = node;
            idx
        } else {
            self.arena.push(node);
            self.arena.len() - 1
        }
    }

    fn free(&mut self, idx: usize) {
        self.arena[idx].key = Bytes::new();
        self.arena[idx].value = Bytes::new();
        self.arena[idx].flags = 0;
        self.free.push(idx);
    }

    /// Evicts from the tail until `extra` more bytes fit. Callers updating
    /// an existing node must unlink it first so it can never be its own
    /// eviction candidate.
    fn evict_to_fit(&mut self, extra: usize) {
        while self.mem + extra > self.max {
            let tail = self.arena[SENTINEL].prev;
            if tail == SENTINEL {
                break;
            }
            let weight = self.arena[tail].key.len() + self.arena[tail].value.len();
            self.unlink(tail);
            self.index.remove(&self.arena[tail].key);
            self.free(tail);
            self.mem -= weight;
        }
    }
}

/// One shard of the striped store: its own lock, its own LRU ring.
pub struct Shard {
    inner: Mutex<Inner>,
}

impl Shard {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                arena: vec![Node::sentinel()],
                free: Vec::new(),
                index: HashMap::new(),
                mem: 0,
                max: max_bytes,
            }),
        }
    }

    fn check_fits(&self, inner: &Inner, weight: usize) -> Result<(), CacheError> {
        if weight > inner.max {
            return Err(CacheError::TooLarge {
                size: weight,
                max: inner.max,
            });
        }
        Ok(())
    }

    /// Insert or overwrite. Returns `Err(TooLarge)` without modifying the
    /// shard if `|key|+|value|` exceeds the shard budget. `flags` is opaque
    /// metadata carried alongside the value for a later `get` to echo back;
    /// it is not charged against the shard's byte budget.
    pub fn put(&self, key: Bytes, value: Bytes, flags: u32) -> Result<(), CacheError> {
        let weight = key.len() + value.len();
        let mut inner = self.inner.lock();
        self.check_fits(&inner, weight)?;

        if let Some(&idx) = inner.index.get(&key) {
            let old_weight = inner.arena[idx].key.len() + inner.arena[idx].value.len();
            inner.unlink(idx);
            inner.mem -= old_weight;
            inner.evict_to_fit(weight);
            inner.arena[idx].value = value;
            inner.arena[idx].flags = flags;
            inner.mem += weight;
            inner.link_after_head(idx);
        } else {
            inner.evict_to_fit(weight);
            let idx = inner.alloc(key.clone(), value, flags);
            inner.index.insert(key, idx);
            inner.link_after_head(idx);
            inner.mem += weight;
        }
        Ok(())
    }

    /// Insert only if absent. Returns `false` (no-op) on a hit.
    pub fn put_if_absent(&self, key: Bytes, value: Bytes, flags: u32) -> Result<bool, CacheError> {
        let weight = key.len() + value.len();
        let mut inner = self.inner.lock();
        self.check_fits(&inner, weight)?;
        if inner.index.contains_key(&key) {
            return Ok(false);
        }
        inner.evict_to_fit(weight);
        let idx = inner.alloc(key.clone(), value, flags);
        inner.index.insert(key, idx);
        inner.link_after_head(idx);
        inner.mem += weight;
        Ok(true)
    }

    /// Overwrite only on a hit. Returns `false` if the key is absent.
    ///
    /// The node being updated is detached from the ring before eviction is
    /// computed, so it can never be evicted while its own update is in
    /// flight (it also can't be seen by eviction accidentally including a
    /// momentarily-zeroed size).
    pub fn set(&self, key: &[u8], value: Bytes, flags: u32) -> Result<bool, CacheError> {
        let new_weight = key.len() + value.len();
        let mut inner = self.inner.lock();
        self.check_fits(&inner, new_weight)?;
        let idx = match inner.index.get(key).copied() {
            Some(idx) => idx,
            None => return Ok(false),
        };
        let old_weight = inner.arena[idx].key.len() + inner.arena[idx].value.len();
        inner.unlink(idx);
        inner.mem -= old_weight;
        inner.evict_to_fit(new_weight);
        inner.arena[idx].value = value;
        inner.arena[idx].flags = flags;
        inner.mem += new_weight;
        inner.link_after_head(idx);
        Ok(true)
    }

    /// Returns the value and its stored flags, promoting the entry to MRU.
    pub fn get(&self, key: &[u8]) -> Option<(Bytes, u32)> {
        let mut inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        inner.touch(idx);
        Some((inner.arena[idx].value.clone(), inner.arena[idx].flags))
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        let idx = match inner.index.remove(key) {
            Some(idx) => idx,
            None => return false,
        };
        let weight = inner.arena[idx].key.len() + inner.arena[idx].value.len();
        inner.unlink(idx);
        inner.free(idx);
        inner.mem -= weight;
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mem(&self) -> usize {
        self.inner.lock().mem
    }

    /// Snapshot of the key currently at the LRU tail, for tests.
    pub fn peek_lru_tail(&self) -> Option<Bytes> {
        let inner = self.inner.lock();
        let tail = inner.arena[SENTINEL].prev;
        if tail == SENTINEL {
            None
        } else {
            Some(inner.arena[tail].key.clone())
        }
    }

    pub fn to_entries(&self) -> Vec<Entry> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.index.len());
        let mut cur = inner.arena[SENTINEL].next;
        while cur != SENTINEL {
            out.push(Entry::new(
                inner.arena[cur].key.clone(),
                inner.arena[cur].value.clone(),
                inner.arena[cur].flags,
            ));
            cur = inner.arena[cur].next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn eviction_order_e1() {
        let shard = Shard::new(10);
        shard.put(b("a"), b("1"), 0).unwrap();
        shard.put(b("b"), b("2"), 0).unwrap();
        shard.put(b("c"), b("3"), 0).unwrap();
        shard.put(b("d"), b("4"), 0).unwrap();
        shard.put(b("e"), b("5"), 0).unwrap();
        assert_eq!(shard.mem(), 10);

        shard.put(b("f"), b("6"), 0).unwrap();
        assert!(shard.get(b"a").is_none());
        assert_eq!(shard.get(b"f"), Some((b("6"), 0)));
    }

    #[test]
    fn touch_on_get_promotes_e2() {
        let shard = Shard::new(10);
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] {
            shard.put(b(k), b(v), 0).unwrap();
        }
        assert_eq!(shard.get(b"a"), Some((b("1"), 0)));
        shard.put(b("f"), b("6"), 0).unwrap();
        assert!(shard.get(b"b").is_none());
        assert_eq!(shard.get(b"a"), Some((b("1"), 0)));
    }

    #[test]
    fn oversized_rejected_e3() {
        let shard = Shard::new(4);
        let err = shard.put(b("hello"), b("world"), 0).unwrap_err();
        assert!(matches!(err, CacheError::TooLarge { .. }));
        assert_eq!(shard.mem(), 0);
        assert!(shard.is_empty());
    }

    #[test]
    fn put_if_absent_is_noop_on_hit() {
        let shard = Shard::new(100);
        assert!(shard.put_if_absent(b("k"), b("v1"), 0).unwrap());
        assert!(!shard.put_if_absent(b("k"), b("v2"), 0).unwrap());
        assert_eq!(shard.get(b"k"), Some((b("v1"), 0)));
    }

    #[test]
    fn set_misses_on_absent_key() {
        let shard = Shard::new(100);
        assert!(!shard.set(b"missing", b("v"), 0).unwrap());
    }

    #[test]
    fn set_does_not_evict_the_entry_being_updated() {
        // Shard can hold exactly one 4-byte entry ("kk"+"vv"). Growing that
        // entry's value must never evict the entry itself.
        let shard = Shard::new(4);
        shard.put(b("kk"), b("vv"), 0).unwrap();
        assert!(shard.set(b"kk", b("vv"), 0).unwrap());
        assert_eq!(shard.get(b"kk"), Some((b("vv"), 0)));
    }

    #[test]
    fn set_stores_updated_flags() {
        let shard = Shard::new(100);
        shard.put(b("k"), b("v"), 1).unwrap();
        assert!(shard.set(b"k", b("v2"), 7).unwrap());
        assert_eq!(shard.get(b"k"), Some((b("v2"), 7)));
    }

    #[test]
    fn delete_hit_and_miss() {
        let shard = Shard::new(100);
        shard.put(b("k"), b("v"), 0).unwrap();
        assert!(shard.delete(b"k"));
        assert!(!shard.delete(b"k"));
        assert!(shard.get(b"k").is_none());
    }

    #[test]
    fn reuses_freed_arena_slots() {
        let shard = Shard::new(100);
        for i in 0..50 {
            let k = format!("k{i}");
            shard.put(b(&k), b("v"), 0).unwrap();
            shard.delete(k.as_bytes());
        }
        // Only the sentinel plus a handful of reused slots should exist.
        assert!(shard.is_empty());
    }
}
