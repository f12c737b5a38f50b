//! # Cache Layer
//!
//! Memoizes whole `ask` outcomes. Keys are the SHA-256 of the normalized
//! question (trimmed, case-folded, whitespace collapsed), so formatting
//! differences hit the same entry while any change of wording misses.
//!
//! Entries are immutable `Arc`s. Concurrent writers for one key race and
//! the last write wins; readers always see one whole entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::execution::QueryResult;
use crate::model::Value;
use crate::{Error, Result};

/// Rows kept in a cached result summary.
pub const SUMMARY_ROWS: usize = 20;

// ============================================================================
// Keys and entries
// ============================================================================

/// Trim, case-fold and collapse runs of whitespace to one space.
pub fn normalize_question(question: &str) -> String {
    question.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the normalized question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_question(question: &str) -> Self {
        let digest = Sha256::digest(normalize_question(question).as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log fields.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the executor returned, trimmed for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub columns: Vec<String>,
    pub row_count: usize,
    /// The first `SUMMARY_ROWS` rows in column order.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSummary {
    pub fn of(result: &QueryResult) -> Self {
        Self {
            columns: result.columns.clone(),
            row_count: result.rows.len(),
            rows: result.rows.iter().take(SUMMARY_ROWS).map(|r| result.ordered(r)).collect(),
        }
    }
}

/// A memoized pipeline outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query: String,
    pub description: String,
    pub answer: String,
    pub result: ResultSummary,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// CacheStore
// ============================================================================

/// Opaque key-value storage behind the cache. An external store (Redis, a
/// file) implements this; the pipeline never sees its format.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>>;
    async fn put(&self, key: CacheKey, entry: Arc<CacheEntry>) -> Result<()>;
    async fn remove(&self, key: &CacheKey) -> Result<bool>;
    /// Remove `key` only while its entry is still the one created at
    /// `created_at`. A newer write for the same key survives.
    async fn remove_if_created(&self, key: &CacheKey, created_at: DateTime<Utc>) -> Result<bool>;
    /// Remove everything; returns how many entries were dropped.
    async fn clear(&self) -> Result<usize>;
    async fn len(&self) -> Result<usize>;
    /// Remove entries created before `cutoff`.
    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// In-process `CacheStore` with an optional entry bound. When full, the
/// oldest entry is evicted.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    max_entries: usize,
    unavailable: AtomicBool,
}

impl MemoryCacheStore {
    /// `max_entries == 0` means unbounded.
    pub fn new(max_entries: usize) -> Self {
        Self { max_entries, ..Self::default() }
    }

    /// Make every operation fail with `CacheUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::CacheUnavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>> {
        self.available()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: CacheKey, entry: Arc<CacheEntry>) -> Result<()> {
        self.available()?;
        let mut entries = self.entries.write();
        entries.insert(key, entry);
        if self.max_entries > 0 {
            while entries.len() > self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by(|(ka, a), (kb, b)| a.created_at.cmp(&b.created_at).then_with(|| ka.cmp(kb)))
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        trace!(key = k.short(), "evicting oldest cache entry");
                        entries.remove(&k);
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.available()?;
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn remove_if_created(&self, key: &CacheKey, created_at: DateTime<Utc>) -> Result<bool> {
        self.available()?;
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.created_at == created_at) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn clear(&self) -> Result<usize> {
        self.available()?;
        let drained = std::mem::take(&mut *self.entries.write());
        Ok(drained.len())
    }

    async fn len(&self) -> Result<usize> {
        self.available()?;
        Ok(self.entries.read().len())
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.available()?;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.created_at >= cutoff);
        Ok(before - entries.len())
    }
}

// ============================================================================
// ResultCache
// ============================================================================

/// Question-level cache with read-time TTL expiry.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn in_memory(ttl: Duration, max_entries: usize) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new(max_entries)), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC),
            Err(_) => DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Live entry for `question`, if any. Expired entries are removed and
    /// reported as a miss.
    pub async fn get(&self, question: &str) -> Result<Option<Arc<CacheEntry>>> {
        let key = CacheKey::for_question(question);
        let Some(entry) = self.store.get(&key).await? else {
            trace!(question_key = key.short(), "cache miss");
            return Ok(None);
        };
        if entry.created_at < self.cutoff(Utc::now()) {
            debug!(question_key = key.short(), "cache entry expired");
            self.store.remove_if_created(&key, entry.created_at).await?;
            return Ok(None);
        }
        trace!(question_key = key.short(), "cache hit");
        Ok(Some(entry))
    }

    pub async fn put(&self, question: &str, entry: CacheEntry) -> Result<Arc<CacheEntry>> {
        let key = CacheKey::for_question(question);
        let entry = Arc::new(entry);
        self.store.put(key, entry.clone()).await?;
        Ok(entry)
    }

    pub async fn invalidate(&self, question: &str) -> Result<bool> {
        self.store.remove(&CacheKey::for_question(question)).await
    }

    pub async fn clear(&self) -> Result<usize> {
        let cleared = self.store.clear().await?;
        debug!(cleared, "cache cleared");
        Ok(cleared)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.remove_older_than(self.cutoff(Utc::now())).await
    }
}
