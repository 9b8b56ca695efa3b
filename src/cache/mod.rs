//! Striped, byte-accounted LRU cache: the shard ring (`shard`), the
//! multi-shard router (`store`), and the `Entry` value type.

pub mod entry;
pub mod shard;
pub mod store;

pub use entry::Entry;
pub use shard::{CacheError, Shard};
pub use store::Store;
