use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::keys::CacheKey;
use crate::cache::tier::StalenessTier;
use crate::cancel::CancellationToken;
use crate::error::{Result, log_error};

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus {
    Success,
    Pending,
    /// Optimistic value written ahead of a mutation; never persisted.
    Speculative,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Option<Value>,
    pub tier: StalenessTier,
    pub status: EntryStatus,
    /// Last time a value was written from a successful fetch.
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_accessed: DateTime<Utc>,
    /// Set by explicit invalidation; cleared by the next successful write.
    pub invalidated: bool,
    /// Times this key has been invalidated. Never decreases while the entry lives.
    pub invalidations: u64,
}

impl CacheEntry {
    fn fresh(value: Value, tier: StalenessTier, now: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            tier,
            status: EntryStatus::Success,
            fetched_at: Some(now),
            last_accessed: now,
            invalidated: false,
            invalidations: 0,
        }
    }

    fn placeholder(key: &CacheKey, now: DateTime<Utc>) -> Self {
        Self {
            value: None,
            tier: key.default_tier(),
            status: EntryStatus::Pending,
            fetched_at: None,
            last_accessed: now,
            invalidated: false,
            invalidations: 0,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if self.invalidated || self.value.is_none() {
            return true;
        }
        match (self.fetched_at, self.tier.stale_after()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(fetched_at), Some(window)) => now - fetched_at >= window,
        }
    }

    pub fn gc_deadline(&self) -> DateTime<Utc> {
        self.last_accessed + StalenessTier::gc_horizon()
    }

    pub fn is_success(&self) -> bool {
        self.status == EntryStatus::Success && self.value.is_some()
    }
}

// ============================================================================
// Cache Coordinator
// ============================================================================

/// Process-wide keyed store shared by stream sessions, push channels and
/// readers. Construct once and hand out `Arc`s.
pub struct CacheCoordinator {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for CacheCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CacheCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reads a value and marks the entry as recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = self.now();
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        entry.last_accessed = now;
        entry.value.clone()
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Copy of the entry without touching its access time.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: CacheKey, value: Value) {
        let tier = self.tier_of(&key);
        self.set_with_tier(key, value, tier);
    }

    pub fn set_with_tier(&self, key: CacheKey, value: Value, tier: StalenessTier) {
        let mut entry = CacheEntry::fresh(value, tier, self.now());
        let mut entries = self.entries.write();
        if let Some(previous) = entries.get(&key) {
            entry.invalidations = previous.invalidations;
        }
        entries.insert(key, entry);
    }

    pub fn set_value<T: Serialize>(&self, key: CacheKey, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.write().remove(key)
    }

    /// Marks one key stale. Repeating it changes nothing; missing keys are a no-op.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let found = match self.entries.write().get_mut(key) {
            Some(entry) => {
                entry.invalidated = true;
                entry.invalidations += 1;
                true
            }
            None => false,
        };
        log::debug!("Invalidated {} (cached: {})", key, found);
        found
    }

    pub fn invalidate_many(&self, keys: &[CacheKey]) -> usize {
        keys.iter().filter(|key| self.invalidate(key)).count()
    }

    /// Missing keys count as stale.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        let now = self.now();
        self.entries
            .read()
            .get(key)
            .is_none_or(|entry| entry.is_stale(now))
    }

    pub fn is_invalidated(&self, key: &CacheKey) -> bool {
        self.entries.read().get(key).is_some_and(|e| e.invalidated)
    }

    pub fn tier_of(&self, key: &CacheKey) -> StalenessTier {
        self.entries
            .read()
            .get(key)
            .map(|e| e.tier)
            .unwrap_or_else(|| key.default_tier())
    }

    /// Returns the cached value while fresh, otherwise refetches.
    /// A failed fetch is recorded on the entry and any previous value kept.
    pub async fn fetch<F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if !self.is_stale(key) {
            if let Some(value) = self.get(key) {
                return Ok(value);
            }
        }

        let since = self.begin_fetch(key);
        match fetcher().await {
            Ok(value) => {
                self.complete_fetch(key, value.clone(), since);
                Ok(value)
            }
            Err(e) => {
                self.record_error(key, &e.message);
                Err(e)
            }
        }
    }

    /// Polls `fetcher` at the tier's interval until `token` is cancelled.
    /// Only tiers with an active polling interval get a task.
    pub fn spawn_polling<F, Fut>(
        self: &Arc<Self>,
        key: CacheKey,
        fetcher: F,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let interval = self.tier_of(&key).poll_interval()?;
        let cache = Arc::clone(self);
        log::debug!("Polling {} every {:?}", key, interval);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let since = cache.begin_fetch(&key);
                match fetcher().await {
                    Ok(value) => cache.complete_fetch(&key, value, since),
                    Err(e) => {
                        log_error(&e);
                        cache.record_error(&key, &e.message);
                    }
                }
            }
        }))
    }

    /// Drops entries unused for longer than the GC horizon.
    pub fn collect_garbage(&self) -> usize {
        let now = self.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.gc_deadline());
        let removed = before - entries.len();
        if removed > 0 {
            log::info!("🧹 Cache GC removed {} entries", removed);
        }
        removed
    }

    /// Sweeps with `collect_garbage` every `every` until `token` is cancelled.
    pub fn spawn_gc(self: &Arc<Self>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                cache.collect_garbage();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.entries
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Marks `key` in flight and returns its invalidation count at this point.
    fn begin_fetch(&self, key: &CacheKey) -> u64 {
        let now = self.now();
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::placeholder(key, now));
        if entry.status != EntryStatus::Speculative {
            entry.status = EntryStatus::Pending;
        }
        entry.invalidations
    }

    /// Stores a fetched value. An invalidation that landed after `since` was
    /// taken keeps the entry stale, since the response may predate it.
    fn complete_fetch(&self, key: &CacheKey, value: Value, since: u64) {
        let now = self.now();
        let mut entries = self.entries.write();
        let (tier, invalidations, raced) = match entries.get(key) {
            Some(current) => (
                current.tier,
                current.invalidations,
                current.invalidations != since,
            ),
            None => (key.default_tier(), since, true),
        };
        if raced {
            log::debug!("Invalidation of {} raced its fetch, keeping it stale", key);
        }
        let mut entry = CacheEntry::fresh(value, tier, now);
        entry.invalidations = invalidations;
        entry.invalidated = raced;
        entries.insert(key.clone(), entry);
    }

    /// Writes a value whose fetch time is already known (restored from disk).
    pub(crate) fn hydrate(
        &self,
        key: CacheKey,
        value: Value,
        tier: StalenessTier,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        let now = self.now();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return false;
        }
        let mut entry = CacheEntry::fresh(value, tier, now);
        entry.fetched_at = Some(fetched_at);
        entries.insert(key, entry);
        true
    }

    /// Speculative write; keeps tier and fetch time so freshness is unchanged.
    pub(crate) fn write_speculative(&self, key: &CacheKey, value: Value) {
        let now = self.now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = Some(value);
                entry.status = EntryStatus::Speculative;
                entry.last_accessed = now;
            }
            None => {
                let mut entry = CacheEntry::fresh(value, key.default_tier(), now);
                entry.status = EntryStatus::Speculative;
                entry.fetched_at = None;
                entries.insert(key.clone(), entry);
            }
        }
    }

    /// Keeps a committed optimistic value as an ordinary entry.
    pub(crate) fn confirm_speculative(&self, key: &CacheKey) {
        if let Some(entry) = self.entries.write().get_mut(key) {
            if entry.status == EntryStatus::Speculative {
                entry.status = EntryStatus::Success;
            }
        }
    }

    /// Puts back the value a mutation replaced, including absence.
    /// Invalidations that arrived in the meantime survive the rollback.
    pub(crate) fn restore_entry(&self, key: &CacheKey, snapshot: Option<CacheEntry>) {
        let mut entries = self.entries.write();
        match snapshot {
            Some(mut restored) => {
                if let Some(current) = entries.get(key) {
                    restored.invalidated |= current.invalidated;
                    restored.invalidations = restored.invalidations.max(current.invalidations);
                    restored.last_accessed = restored.last_accessed.max(current.last_accessed);
                }
                entries.insert(key.clone(), restored);
            }
            None => {
                entries.remove(key);
            }
        }
    }

    fn record_error(&self, key: &CacheKey, message: &str) {
        let now = self.now();
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::placeholder(key, now));
        entry.status = EntryStatus::Error(message.to_string());
    }
}
