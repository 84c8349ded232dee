// smartpixl-classify: Geo cache with asynchronous backfill

use std::collections::VecDeque;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::ClassifyResult;
use smartpixl_record::GeoSnapshot;

/// Geo cache tuning
#[derive(Debug, Clone)]
pub struct GeoCacheConfig {
    /// Hard LRU capacity
    pub cache_capacity: usize,
    /// Bounded backfill queue; oldest pending IP dropped on overflow
    pub backfill_capacity: usize,
    /// Entries older than this are re-enqueued for refresh on read
    pub refresh_after: std::time::Duration,
}

impl Default for GeoCacheConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 50_000,
            backfill_capacity: 1024,
            refresh_after: std::time::Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// External lookup behind the cache; production resolves against the geo
/// table, tests substitute fixtures
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> ClassifyResult<Option<GeoSnapshot>>;
}

struct BackfillQueue {
    pending: Mutex<VecDeque<IpAddr>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl BackfillQueue {
    fn push(&self, ip: IpAddr) {
        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.capacity {
                pending.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            pending.push_back(ip);
        }
        self.notify.notify_one();
    }

    async fn pop(&self) -> IpAddr {
        loop {
            let notified = self.notify.notified();
            if let Some(ip) = self.pending.lock().pop_front() {
                return ip;
            }
            notified.await;
        }
    }
}

/// Non-blocking two-tier geo lookup.
///
/// `get` never blocks the caller: a hit returns an immutable snapshot, a
/// miss enqueues the IP for the backfill worker and returns nothing.
pub struct GeoCache {
    entries: Mutex<LruCache<IpAddr, Arc<GeoSnapshot>>>,
    backfill: BackfillQueue,
    refresh_after: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GeoCache {
    pub fn new(config: GeoCacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            backfill: BackfillQueue {
                pending: Mutex::new(VecDeque::with_capacity(config.backfill_capacity)),
                notify: Notify::new(),
                capacity: config.backfill_capacity.max(1),
                dropped: AtomicU64::new(0),
            },
            refresh_after: Duration::from_std(config.refresh_after)
                .unwrap_or_else(|_| Duration::days(30)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Warm lookup; a miss schedules backfill. Stale entries are still
    /// returned but re-enqueued for an opportunistic refresh.
    pub fn get(&self, ip: IpAddr) -> Option<Arc<GeoSnapshot>> {
        let entry = self.entries.lock().get(&ip).cloned();
        match entry {
            Some(snapshot) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if Utc::now() - snapshot.resolved_at > self.refresh_after {
                    self.backfill.push(ip);
                }
                Some(snapshot)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.backfill.push(ip);
                None
            }
        }
    }

    /// Replace the entry for an IP with a fresh immutable snapshot
    pub fn insert(&self, ip: IpAddr, snapshot: GeoSnapshot) {
        self.entries.lock().put(ip, Arc::new(snapshot));
    }

    /// Operator invalidation after a bulk geo database update. Atomic with
    /// respect to readers: they see an old entry or a miss, never torn data.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn backfill_len(&self) -> usize {
        self.backfill.pending.lock().len()
    }

    pub fn backfill_dropped(&self) -> u64 {
        self.backfill.dropped.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Next IP awaiting backfill; parks until one is queued
    pub async fn next_backfill(&self) -> IpAddr {
        self.backfill.pop().await
    }
}

/// Background worker draining the backfill queue through the resolver
pub struct GeoBackfillWorker {
    cache: Arc<GeoCache>,
    resolver: Arc<dyn GeoResolver>,
    lookup_errors: Arc<AtomicU64>,
}

impl GeoBackfillWorker {
    pub fn new(cache: Arc<GeoCache>, resolver: Arc<dyn GeoResolver>) -> Self {
        Self {
            cache,
            resolver,
            lookup_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn error_counter(&self) -> Arc<AtomicU64> {
        self.lookup_errors.clone()
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let ip = tokio::select! {
                _ = shutdown.changed() => break,
                ip = self.cache.next_backfill() => ip,
            };

            match self.resolver.resolve(ip).await {
                Ok(Some(snapshot)) => self.cache.insert(ip, snapshot),
                Ok(None) => debug!(%ip, "geo source has no row for address"),
                Err(e) => {
                    self.lookup_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(%ip, error = %e, "geo backfill lookup failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifyError;

    fn snapshot(city: &str) -> GeoSnapshot {
        GeoSnapshot {
            country: "US".to_string(),
            region: "TX".to_string(),
            city: city.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            timezone: "America/Chicago".to_string(),
            resolved_at: Utc::now(),
        }
    }

    struct FixtureResolver;

    #[async_trait]
    impl GeoResolver for FixtureResolver {
        async fn resolve(&self, ip: IpAddr) -> ClassifyResult<Option<GeoSnapshot>> {
            match ip.to_string().as_str() {
                "203.0.113.9" => Ok(Some(snapshot("Austin"))),
                "203.0.113.10" => Err(ClassifyError::GeoLookup("source offline".to_string())),
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn test_miss_enqueues_backfill_and_returns_none() {
        let cache = GeoCache::new(GeoCacheConfig::default());
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        assert!(cache.get(ip).is_none());
        assert_eq!(cache.backfill_len(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_hit_after_insert() {
        let cache = GeoCache::new(GeoCacheConfig::default());
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        cache.insert(ip, snapshot("Austin"));
        let entry = cache.get(ip).unwrap();
        assert_eq!(entry.city, "Austin");
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = GeoCache::new(GeoCacheConfig {
            cache_capacity: 2,
            ..Default::default()
        });
        let a: IpAddr = "203.0.113.1".parse().unwrap();
        let b: IpAddr = "203.0.113.2".parse().unwrap();
        let c: IpAddr = "203.0.113.3".parse().unwrap();

        cache.insert(a, snapshot("A"));
        cache.insert(b, snapshot("B"));
        cache.get(a); // refresh A so B becomes least-recent
        cache.insert(c, snapshot("C"));

        assert!(cache.get(a).is_some());
        assert!(cache.get(b).is_none());
        assert!(cache.get(c).is_some());
    }

    #[test]
    fn test_backfill_queue_drops_oldest() {
        let cache = GeoCache::new(GeoCacheConfig {
            backfill_capacity: 2,
            ..Default::default()
        });
        for last in 1..=3u8 {
            let ip: IpAddr = format!("203.0.113.{last}").parse().unwrap();
            cache.get(ip);
        }
        assert_eq!(cache.backfill_len(), 2);
        assert_eq!(cache.backfill_dropped(), 1);
    }

    #[test]
    fn test_stale_entry_returned_and_reenqueued() {
        let cache = GeoCache::new(GeoCacheConfig {
            refresh_after: std::time::Duration::from_secs(3600),
            ..Default::default()
        });
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        let mut stale = snapshot("Austin");
        stale.resolved_at = Utc::now() - Duration::days(2);
        cache.insert(ip, stale);

        assert!(cache.get(ip).is_some());
        assert_eq!(cache.backfill_len(), 1);
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = GeoCache::new(GeoCacheConfig::default());
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        cache.insert(ip, snapshot("Austin"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_backfill_worker_populates_cache() {
        let cache = Arc::new(GeoCache::new(GeoCacheConfig::default()));
        let worker = GeoBackfillWorker::new(cache.clone(), Arc::new(FixtureResolver));
        let errors = worker.error_counter();

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        let known: IpAddr = "203.0.113.9".parse().unwrap();
        let failing: IpAddr = "203.0.113.10".parse().unwrap();
        assert!(cache.get(known).is_none());
        assert!(cache.get(failing).is_none());

        // Wait for the worker to drain both lookups
        for _ in 0..100 {
            if cache.len() == 1 && errors.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(cache.get(known).map(|s| s.city.clone()).as_deref(), Some("Austin"));
        assert_eq!(errors.load(Ordering::Relaxed), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
