use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;
use serde::Serialize;
use tracing::{debug, warn};

use super::policy::{EvictionPolicy, EvictionReport};
use crate::storage::SharedDatabase;
use crate::types::{AnalysisRecord, AtlasError, ContentHash, Result};

struct CachedRecord {
    record: Arc<AnalysisRecord>,
    checksum: u32,
    size_bytes: usize,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub corruptions: u64,
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub persisted_entries: usize,
    pub persisted_bytes: usize,
}

impl CacheStats {
    /// Cache hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Content-addressed record cache
///
/// Records are handed out as `Arc`s. An entry whose `Arc` is still held by a
/// reader (an assembly or diagram pass) is pinned and survives eviction.
pub struct ContentCache {
    memory: Mutex<LruCache<ContentHash, CachedRecord>>,
    store: Option<SharedDatabase>,
    counters: Counters,
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ContentCache {
    pub fn in_memory() -> Self {
        Self {
            memory: Mutex::new(LruCache::unbounded()),
            store: None,
            counters: Counters::default(),
        }
    }

    pub fn persistent(store: SharedDatabase) -> Self {
        Self {
            store: Some(store),
            ..Self::in_memory()
        }
    }

    fn memory(&self) -> MutexGuard<'_, LruCache<ContentHash, CachedRecord>> {
        // Entries are inserted whole, so a poisoned map is still consistent
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up the record for `hash`.
    ///
    /// Fails with `CacheCorruption` when a stored record does not match its
    /// checksum or its key; the bad entry is dropped from memory.
    pub fn get(&self, hash: &ContentHash) -> Result<Option<Arc<AnalysisRecord>>> {
        if let Some(record) = self.get_memory(hash)? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(record));
        }

        let Some(store) = &self.store else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let Some(row) = store.load_record(hash.as_str())? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let actual = crc32fast::hash(row.record_json.as_bytes());
        if actual != row.checksum {
            return Err(self.corrupted(
                hash,
                format!("checksum {:08x} != stored {:08x}", actual, row.checksum),
            ));
        }

        let record: AnalysisRecord = serde_json::from_str(&row.record_json)
            .map_err(|e| self.corrupted(hash, format!("unreadable record: {}", e)))?;
        if &record.content_hash != hash {
            return Err(self.corrupted(
                hash,
                format!("record belongs to {}", record.content_hash.short()),
            ));
        }

        let record = Arc::new(record);
        self.memory().put(
            hash.clone(),
            CachedRecord {
                record: Arc::clone(&record),
                checksum: row.checksum,
                size_bytes: row.size_bytes,
                inserted_at: Instant::now(),
            },
        );
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(hash = hash.short(), "Promoted record from persistent tier");
        Ok(Some(record))
    }

    fn get_memory(&self, hash: &ContentHash) -> Result<Option<Arc<AnalysisRecord>>> {
        let mut memory = self.memory();
        let Some(entry) = memory.get(hash) else {
            return Ok(None);
        };

        let actual = entry.record.checksum()?;
        if actual != entry.checksum || &entry.record.content_hash != hash {
            memory.pop(hash);
            drop(memory);
            return Err(self.corrupted(hash, "memory entry failed integrity check"));
        }
        Ok(Some(Arc::clone(&entry.record)))
    }

    fn corrupted(&self, hash: &ContentHash, reason: impl Into<String>) -> AtlasError {
        self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
        let err = AtlasError::corruption(hash.as_str(), reason);
        warn!("{}", err);
        err
    }

    /// Whether a record exists in either tier, without verifying or promoting it
    pub fn contains(&self, hash: &ContentHash) -> Result<bool> {
        if self.memory().contains(hash) {
            return Ok(true);
        }
        match &self.store {
            Some(store) => store.has_record(hash.as_str()),
            None => Ok(false),
        }
    }

    /// Insert `record` under `hash`.
    ///
    /// The persistent row is written in one transaction before the memory
    /// tier is updated, so an interrupted write leaves no trace. Degraded
    /// records are returned but never stored, so the file is retried on the
    /// next run.
    pub fn put(&self, hash: &ContentHash, record: AnalysisRecord) -> Result<Arc<AnalysisRecord>> {
        if &record.content_hash != hash {
            return Err(AtlasError::InvalidInput(format!(
                "record for {} inserted under {}",
                record.content_hash.short(),
                hash.short()
            )));
        }

        let record = Arc::new(record);
        if record.is_degraded() {
            debug!(hash = hash.short(), "Skipping cache write for degraded record");
            return Ok(record);
        }

        let bytes = record.canonical_bytes()?;
        let checksum = crc32fast::hash(&bytes);

        if let Some(store) = &self.store {
            let json = String::from_utf8(bytes.clone())
                .map_err(|e| AtlasError::Storage(format!("record is not UTF-8: {}", e)))?;
            store.put_record(hash.as_str(), &json, checksum)?;
        }

        self.memory().put(
            hash.clone(),
            CachedRecord {
                record: Arc::clone(&record),
                checksum,
                size_bytes: bytes.len(),
                inserted_at: Instant::now(),
            },
        );
        Ok(record)
    }

    /// Apply `policy`, least recently used entries first.
    pub fn evict(&self, policy: &EvictionPolicy) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();

        {
            let mut memory = self.memory();
            let mut entries = memory.len();
            let mut bytes: usize = memory.iter().map(|(_, e)| e.size_bytes).sum();

            let candidates: Vec<(ContentHash, bool, usize, Duration)> = memory
                .iter()
                .rev()
                .map(|(hash, entry)| {
                    (
                        hash.clone(),
                        Arc::strong_count(&entry.record) > 1,
                        entry.size_bytes,
                        entry.inserted_at.elapsed(),
                    )
                })
                .collect();

            for (hash, pinned, size, age) in candidates {
                let expired = policy.max_age.is_some_and(|max| age > max);
                let over = entries > policy.max_entries || bytes > policy.max_bytes;
                if !expired && !over {
                    continue;
                }
                if pinned {
                    report.pinned += 1;
                    continue;
                }
                memory.pop(&hash);
                entries -= 1;
                bytes = bytes.saturating_sub(size);
                report.evicted += 1;
            }
        }

        if let (Some(store), Some(max_age)) = (&self.store, policy.max_age) {
            let max_age = chrono::Duration::from_std(max_age)
                .map_err(|e| AtlasError::Config(format!("max age out of range: {}", e)))?;
            report.pruned = store.delete_records_accessed_before(Utc::now() - max_age)?;
        }

        self.counters
            .evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        if report.evicted > 0 || report.pruned > 0 {
            debug!(
                evicted = report.evicted,
                pinned = report.pinned,
                pruned = report.pruned,
                "Cache eviction"
            );
        }
        Ok(report)
    }

    /// Drop every record from both tiers. Outstanding `Arc`s stay valid.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = {
            let mut memory = self.memory();
            let n = memory.len();
            memory.clear();
            n
        };
        if let Some(store) = &self.store {
            removed = removed.max(store.clear_records()?);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let (memory_entries, memory_bytes) = {
            let memory = self.memory();
            (
                memory.len(),
                memory.iter().map(|(_, e)| e.size_bytes).sum(),
            )
        };
        let (persisted_entries, persisted_bytes) = match &self.store {
            Some(store) => store.record_stats()?,
            None => (0, 0),
        };

        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            corruptions: self.counters.corruptions.load(Ordering::Relaxed),
            memory_entries,
            memory_bytes,
            persisted_entries,
            persisted_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::{Entity, EntityKind, RecordStatus};

    fn record(content: &str) -> (ContentHash, AnalysisRecord) {
        let hash = ContentHash::of(content.as_bytes());
        let record = AnalysisRecord {
            content_hash: hash.clone(),
            status: RecordStatus::Complete,
            summary: format!("summary of {}", content),
            responsibilities: vec!["testing".into()],
            entities: vec![Entity {
                name: "Thing".into(),
                kind: EntityKind::Class,
                signature: "class Thing".into(),
            }],
            relationships: vec![],
            dependencies: vec![],
            mentions: vec![],
            degraded_reason: None,
        };
        (hash, record)
    }

    fn store() -> SharedDatabase {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_put_get_memory() {
        let cache = ContentCache::in_memory();
        let (hash, rec) = record("a");
        cache.put(&hash, rec.clone()).unwrap();

        let got = cache.get(&hash).unwrap().unwrap();
        assert_eq!(*got, rec);
        assert!(cache.get(&ContentHash::of(b"missing")).unwrap().is_none());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_entries, 1);
    }

    #[test]
    fn test_identical_content_shares_record_across_runs() {
        let db = store();
        let (hash, rec) = record("same bytes");
        ContentCache::persistent(Arc::clone(&db))
            .put(&hash, rec.clone())
            .unwrap();

        // A fresh cache over the same store models a later run
        let later = ContentCache::persistent(db);
        let got = later.get(&ContentHash::of(b"same bytes")).unwrap().unwrap();
        assert_eq!(*got, rec);
        assert!(later.contains(&hash).unwrap());
    }

    #[test]
    fn test_rejects_mismatched_key() {
        let cache = ContentCache::in_memory();
        let (_, rec) = record("a");
        let err = cache.put(&ContentHash::of(b"b"), rec).unwrap_err();
        assert!(matches!(err, AtlasError::InvalidInput(_)));
    }

    #[test]
    fn test_degraded_records_not_stored() {
        let cache = ContentCache::persistent(store());
        let hash = ContentHash::of(b"broken");
        let returned = cache
            .put(&hash, AnalysisRecord::degraded(hash.clone(), "timeout"))
            .unwrap();
        assert!(returned.is_degraded());
        assert!(cache.get(&hash).unwrap().is_none());
        assert!(!cache.contains(&hash).unwrap());
    }

    #[test]
    fn test_corrupted_row_is_refused() {
        let db = store();
        let (hash, rec) = record("a");
        let json = String::from_utf8(rec.canonical_bytes().unwrap()).unwrap();
        db.put_record(hash.as_str(), &json, crc32fast::hash(json.as_bytes()) ^ 1)
            .unwrap();

        let cache = ContentCache::persistent(db);
        let err = cache.get(&hash).unwrap_err();
        assert!(matches!(err, AtlasError::CacheCorruption { .. }));
        assert!(err.is_fatal());
        assert_eq!(cache.stats().unwrap().corruptions, 1);
    }

    #[test]
    fn test_row_under_wrong_key_is_refused() {
        let db = store();
        let (_, rec) = record("a");
        let json = String::from_utf8(rec.canonical_bytes().unwrap()).unwrap();
        let other = ContentHash::of(b"other");
        db.put_record(other.as_str(), &json, crc32fast::hash(json.as_bytes()))
            .unwrap();

        let cache = ContentCache::persistent(db);
        assert!(matches!(
            cache.get(&other),
            Err(AtlasError::CacheCorruption { .. })
        ));
    }

    #[test]
    fn test_evict_lru_first() {
        let cache = ContentCache::in_memory();
        let (h1, r1) = record("1");
        let (h2, r2) = record("2");
        let (h3, r3) = record("3");
        cache.put(&h1, r1).unwrap();
        cache.put(&h2, r2).unwrap();
        cache.put(&h3, r3).unwrap();
        // Touch h1 so h2 is the least recently used
        drop(cache.get(&h1).unwrap());

        let report = cache.evict(&EvictionPolicy::entries(2)).unwrap();
        assert_eq!(report.evicted, 1);
        assert!(cache.get(&h2).unwrap().is_none());
        assert!(cache.get(&h1).unwrap().is_some());
    }

    #[test]
    fn test_evict_skips_pinned_records() {
        let cache = ContentCache::in_memory();
        let (h1, r1) = record("1");
        let (h2, r2) = record("2");
        let held = cache.put(&h1, r1).unwrap();
        cache.put(&h2, r2).unwrap();

        let report = cache.evict(&EvictionPolicy::entries(0)).unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(report.pinned, 1);
        assert_eq!(cache.get(&h1).unwrap().unwrap(), held);
    }

    #[test]
    fn test_evict_by_age_prunes_store() {
        let cache = ContentCache::persistent(store());
        let (hash, rec) = record("old");
        cache.put(&hash, rec).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let policy = EvictionPolicy::default().with_max_age(Duration::from_millis(1));
        let report = cache.evict(&policy).unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(report.pruned, 1);
        assert!(cache.get(&hash).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_puts_and_gets() {
        let cache = Arc::new(ContentCache::persistent(store()));
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                // Pairs of workers race on the same content
                let (hash, rec) = record(&format!("file-{}", i % 8));
                cache.put(&hash, rec.clone()).unwrap();
                assert_eq!(*cache.get(&hash).unwrap().unwrap(), rec);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stats = cache.stats().unwrap();
        assert_eq!(stats.memory_entries, 8);
        assert_eq!(stats.persisted_entries, 8);
    }
}
