use super::errors::SyncError;
use super::snapshot::{ResourceKey, ThreadSnapshot};
use super::subscription::{SnapshotUpdate, SubscriptionManager};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// Latest known snapshot and error per thread, shared by every view of that thread.
///
/// Only the fetch and mutation coordinators write here; consumers read.
#[derive(Debug)]
pub struct ResourceCache {
    cache: Arc<RwLock<HashMap<ResourceKey, CachedEntry>>>,
    pub subscription_manager: Arc<SubscriptionManager>,
    max_entries: Option<usize>,
    store_clock: AtomicU64,
}

#[derive(Debug, Default)]
struct CachedEntry {
    snapshot: Option<Arc<ThreadSnapshot>>,
    last_error: Option<SyncError>,
    /// Logical time of the last successful store, 0 if none
    last_stored: u64,
    version: u64,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    /// Unbounded cache
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Cache holding at most `max_entries` threads, evicting the least recently stored one
    #[must_use]
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::build(Some(max_entries.max(1)))
    }

    fn build(max_entries: Option<usize>) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            subscription_manager: Arc::new(SubscriptionManager::new()),
            max_entries,
            store_clock: AtomicU64::new(0),
        }
    }

    /// Whatever is cached for `key`, possibly stale
    pub async fn get(&self, key: &ResourceKey) -> Option<Arc<ThreadSnapshot>> {
        let cache = self.cache.read().await;

        match cache.get(key).and_then(|entry| entry.snapshot.clone()) {
            Some(snapshot) => {
                debug!("🎯 Cache HIT: {}", key.cache_key());
                Some(snapshot)
            }
            None => {
                debug!("❌ Cache MISS: {}", key.cache_key());
                None
            }
        }
    }

    /// Replace the snapshot for `key` wholesale and notify its subscribers.
    ///
    /// A successful store also clears any recorded error for the key.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn put(&self, key: &ResourceKey, snapshot: Arc<ThreadSnapshot>) {
        {
            let mut cache = self.cache.write().await;

            if !cache.contains_key(key) {
                if let Some(max) = self.max_entries {
                    if cache.len() >= max {
                        Self::evict_lru(&mut cache);
                    }
                }
            }

            let entry = cache.entry(key.clone()).or_default();
            entry.snapshot = Some(snapshot.clone());
            entry.last_error = None;
            entry.last_stored = self.store_clock.fetch_add(1, Ordering::Relaxed) + 1;
            entry.version += 1;

            info!(
                "💾 Cache STORE: {} ({} posts, generating: {}, v{})",
                key.cache_key(),
                snapshot.posts.len(),
                snapshot.generation_in_progress,
                entry.version
            );
        }

        self.subscription_manager.notify(key, snapshot).await;
    }

    /// Drop the recorded error for `key`, keeping the snapshot
    pub async fn invalidate(&self, key: &ResourceKey) {
        let mut cache = self.cache.write().await;

        if let Some(entry) = cache.get_mut(key) {
            if entry.last_error.take().is_some() {
                debug!("🔄 Cache INVALIDATE: {}", key.cache_key());
            }
        }
    }

    /// Remember the latest failure for `key` without touching its snapshot
    pub async fn record_error(&self, key: &ResourceKey, error: SyncError) {
        let mut cache = self.cache.write().await;

        if !cache.contains_key(key) {
            if let Some(max) = self.max_entries {
                if cache.len() >= max {
                    Self::evict_lru(&mut cache);
                }
            }
        }

        cache.entry(key.clone()).or_default().last_error = Some(error);
    }

    pub async fn last_error(&self, key: &ResourceKey) -> Option<SyncError> {
        let cache = self.cache.read().await;
        cache.get(key).and_then(|entry| entry.last_error.clone())
    }

    /// Number of successful stores for `key` so far
    pub async fn version(&self, key: &ResourceKey) -> u64 {
        let cache = self.cache.read().await;
        cache.get(key).map_or(0, |entry| entry.version)
    }

    fn evict_lru(cache: &mut HashMap<ResourceKey, CachedEntry>) {
        // Entries that never stored a snapshot sort first
        let oldest_key = cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_stored)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest_key {
            debug!("🧹 Cache EVICT: {}", key.cache_key());
            cache.remove(&key);
        }
    }

    /// Updates for every snapshot stored for `key` from now on
    pub async fn subscribe(&self, key: ResourceKey) -> (String, mpsc::UnboundedReceiver<SnapshotUpdate>) {
        self.subscription_manager.subscribe(key).await
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subscription_manager.unsubscribe(subscription_id).await;
    }

    pub async fn stats(&self) -> CacheStats {
        let subscriptions = self.subscription_manager.active_subscriptions().await;
        let cache = self.cache.read().await;

        CacheStats {
            total_entries: cache.len(),
            snapshot_entries: cache.values().filter(|e| e.snapshot.is_some()).count(),
            error_entries: cache.values().filter(|e| e.last_error.is_some()).count(),
            generating_entries: cache
                .values()
                .filter(|e| e.snapshot.as_ref().is_some_and(|s| s.generation_in_progress))
                .count(),
            subscriptions,
            max_entries: self.max_entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub snapshot_entries: usize,
    pub error_entries: usize,
    pub generating_entries: usize,
    pub subscriptions: usize,
    pub max_entries: Option<usize>,
}
