use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cancel::{CancelSource, CancelToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub cleanup_interval: Duration,
    pub max_items: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(10 * 60),
            max_items: 1000,
        }
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory key/value cache with per-entry expiry.
///
/// Reads never return an expired entry even before the sweeper has run.
/// When full, inserting a new key first purges expired entries and then
/// evicts the entry closest to expiry.
pub struct TtlCache<V> {
    items: RwLock<HashMap<String, Entry<V>>>,
    config: CacheConfig,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let items = self.items.read();
        let entry = items.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Store `value` under `key`. A zero `ttl` uses the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let ttl = if ttl.is_zero() {
            self.config.default_ttl
        } else {
            ttl
        };
        let key = key.into();
        let now = Instant::now();

        let mut items = self.items.write();
        if !items.contains_key(&key) && items.len() >= self.config.max_items {
            items.retain(|_, e| e.expires_at > now);
            if items.len() >= self.config.max_items {
                let soonest = items
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    log::debug!("Cache full, evicting {k}");
                    items.remove(&k);
                }
            }
        }
        items.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.items.write().remove(key);
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }

    /// Entries held, including expired ones the sweeper has not yet removed.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, e| e.expires_at > now);
        before - items.len()
    }

    /// Start a task that purges expired entries every `cleanup_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Sweeper {
        let source = CancelSource::new();
        let token = source.token();
        let cache = Arc::clone(self);
        let handle = tokio::spawn(sweep_loop(cache, token));
        Sweeper { source, handle }
    }
}

async fn sweep_loop<V: Clone + Send + Sync + 'static>(
    cache: Arc<TtlCache<V>>,
    mut cancel: CancelToken,
) {
    let period = cache.config.cleanup_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = cache.purge_expired();
                if removed > 0 {
                    log::debug!("Cache sweep removed {removed} expired entries");
                }
            }
        }
    }
}

/// Handle to a running cache sweeper.
pub struct Sweeper {
    source: CancelSource,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn shutdown(self) {
        self.source.cancel();
        if let Err(e) = self.handle.await {
            log::warn!("Cache sweeper exited abnormally: {e}");
        }
    }
}
