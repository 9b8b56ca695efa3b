use bytes::Bytes;

/// A single cache entry: an owned key/value byte pair.
///
/// The shard never interprets the contents of either buffer; byte
/// accounting only ever looks at `key.len() + value.len()`.
#[derive(Clone, Debug)]
pub struct Entry {
    pub key: Bytes,
    pub value: Bytes,
    pub flags: u32,
}

impl Entry {
    pub fn new(key: Bytes, value: Bytes, flags: u32) -> Self {
        Self { key, value, flags }
    }

    /// Bytes charged against a shard's budget for this entry.
    pub fn weight(&self) -> usize {
        self.key.len() + self.value.len()
    }
}
