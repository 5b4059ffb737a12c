use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::cache::keys::CacheKey;
use crate::cache::store::CacheCoordinator;
use crate::cache::tier::StalenessTier;
use crate::cancel::CancellationToken;
use crate::error::{ErrorContext, Result, log_error};

/// Fixed key the dehydrated cache is stored under.
pub const STORAGE_KEY: &str = "casewatch-query-cache";
pub const MAX_AGE_DAYS: i64 = 7;

// ============================================================================
// Durable stores
// ============================================================================

pub trait DurableStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, blob: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// One JSON file per cache directory, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", STORAGE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableStore for FileStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(format!("reading {}", self.path.display())),
        }
    }

    fn save(&self, blob: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).context(format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, blob).context(format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).context(format!("replacing {}", self.path.display()))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blob: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    pub fn blob(&self) -> Option<String> {
        self.blob.lock().clone()
    }
}

impl DurableStore for MemoryStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.blob.lock().clone())
    }

    fn save(&self, blob: &str) -> Result<()> {
        *self.blob.lock() = Some(blob.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.blob.lock() = None;
        Ok(())
    }
}

// ============================================================================
// Dehydrated format
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCache {
    pub buster: String,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<PersistedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: CacheKey,
    pub value: Value,
    pub tier: StalenessTier,
    pub fetched_at: DateTime<Utc>,
}

// ============================================================================
// Persister
// ============================================================================

/// Saves and restores the non-volatile, successfully fetched part of a cache.
pub struct CachePersister {
    store: Arc<dyn DurableStore>,
    buster: String,
    max_age: Duration,
}

impl CachePersister {
    pub fn new(store: Arc<dyn DurableStore>, buster: impl Into<String>) -> Self {
        Self {
            store,
            buster: buster.into(),
            max_age: Duration::days(MAX_AGE_DAYS),
        }
    }

    pub fn buster(&self) -> &str {
        &self.buster
    }

    pub fn dehydrate(&self, cache: &CacheCoordinator) -> PersistedCache {
        let mut entries: Vec<PersistedEntry> = cache
            .entries()
            .into_iter()
            .filter(|(key, entry)| {
                !key.is_volatile() && entry.is_success() && !entry.invalidated
            })
            .filter_map(|(key, entry)| {
                Some(PersistedEntry {
                    key,
                    value: entry.value?,
                    tier: entry.tier,
                    fetched_at: entry.fetched_at?,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        PersistedCache {
            buster: self.buster.clone(),
            saved_at: cache.now(),
            entries,
        }
    }

    pub fn save(&self, cache: &CacheCoordinator) -> Result<usize> {
        let snapshot = self.dehydrate(cache);
        let blob = serde_json::to_string(&snapshot)?;
        self.store.save(&blob)?;
        log::debug!("💾 Persisted {} cache entries", snapshot.entries.len());
        Ok(snapshot.entries.len())
    }

    /// Restores persisted entries into `cache`, returning how many were used.
    /// A missing, unreadable or mismatched blob is a cold start.
    pub fn restore(&self, cache: &CacheCoordinator) -> Result<usize> {
        let Some(blob) = self.store.load()? else {
            log::info!("💾 No persisted cache, cold start");
            return Ok(0);
        };

        let snapshot: PersistedCache = match serde_json::from_str(&blob) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("💾 Discarding unreadable persisted cache: {}", e);
                self.store.clear()?;
                return Ok(0);
            }
        };

        if snapshot.buster != self.buster {
            log::info!(
                "💾 Cache buster changed ({} -> {}), cold start",
                snapshot.buster,
                self.buster
            );
            self.store.clear()?;
            return Ok(0);
        }

        let now = cache.now();
        if now - snapshot.saved_at > self.max_age {
            log::info!("💾 Persisted cache older than {} days, cold start", MAX_AGE_DAYS);
            self.store.clear()?;
            return Ok(0);
        }

        let restored = snapshot
            .entries
            .into_iter()
            .filter(|e| !e.key.is_volatile() && now - e.fetched_at <= self.max_age)
            .filter(|e| cache.hydrate(e.key.clone(), e.value.clone(), e.tier, e.fetched_at))
            .count();
        log::info!("💾 Restored {} cache entries", restored);
        Ok(restored)
    }

    /// Saves every `every` until `token` is cancelled, then once more.
    pub fn spawn_autosave(
        self: Arc<Self>,
        cache: Arc<CacheCoordinator>,
        every: StdDuration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                cache.collect_garbage();
                if let Err(e) = self.save(&cache) {
                    log_error(&e);
                }
            }
            if let Err(e) = self.save(&cache) {
                log_error(&e);
            }
        })
    }
}
