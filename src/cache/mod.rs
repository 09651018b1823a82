//! Content Cache
//!
//! Content-addressed store of analysis records. A memory LRU tier serves
//! parallel workers; an optional SQLite tier carries records across runs.
//! Both tiers verify a CRC32 checksum on every read and refuse to serve a
//! record that fails it.

mod content;
mod policy;

pub use content::{CacheStats, ContentCache};
pub use policy::{EvictionPolicy, EvictionReport};
