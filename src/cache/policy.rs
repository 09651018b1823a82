use std::time::Duration;

use serde::Serialize;

use crate::constants::cache;

/// Bounds applied by [`ContentCache::evict`](super::ContentCache::evict)
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPolicy {
    pub max_entries: usize,
    pub max_bytes: usize,
    /// Records untouched for longer than this are dropped from both tiers
    pub max_age: Option<Duration>,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_entries: cache::DEFAULT_MAX_ENTRIES,
            max_bytes: cache::DEFAULT_MAX_BYTES,
            max_age: None,
        }
    }
}

impl EvictionPolicy {
    pub fn entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Memory entries removed
    pub evicted: usize,
    /// Entries over the bounds but still referenced by a reader
    pub pinned: usize,
    /// Persistent rows removed by age
    pub pruned: usize,
}
