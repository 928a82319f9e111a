//! Deduplicating catalog cache
//!
//! Frequent polling is only affordable because every scan within the TTL
//! window shares one upstream fetch per credential pair. Concurrent identical
//! requests collapse into a single in-flight call, and a fetch failure is
//! served from the last good (possibly stale) entry instead of failing the
//! whole scan pass.

use crate::client::ShopApi;
use crate::error::Result;
use crate::types::{Catalog, Credential};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

struct CacheEntry {
    catalog: Catalog,
    fetched_at: Instant,
}

/// Counters exposed on the dashboard
#[derive(Debug, Clone, Serialize, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_fallbacks: u64,
    pub entries: usize,
}

/// TTL + single-flight cache over catalog fetches, keyed by credential pair.
pub struct CatalogCache {
    source: Arc<dyn ShopApi>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Per-key in-flight guards; a second caller for the same key awaits the
    /// first fetch instead of issuing its own.
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_fallbacks: AtomicU64,
}

impl CatalogCache {
    pub fn new(source: Arc<dyn ShopApi>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_fallbacks: AtomicU64::new(0),
        }
    }

    fn key(cred: &Credential) -> String {
        format!("{}\u{1}{}", cred.username, cred.password)
    }

    /// Fetch the catalog for a credential, via cache when possible.
    pub async fn fetch(&self, cred: &Credential) -> Result<Catalog> {
        let key = Self::key(cred);

        if let Some(catalog) = self.fresh(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(catalog);
        }

        // Single-flight: serialize fetches per key, then re-check freshness.
        // A waiter that arrives while a fetch is running finds a fresh entry
        // here and never touches the network.
        let flight = {
            let mut flights = self.flights.lock().await;
            flights.entry(key.clone()).or_default().clone()
        };
        let _guard = flight.lock().await;

        if let Some(catalog) = self.fresh(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(catalog);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match self.source.fetch_catalog(cred).await {
            Ok(catalog) => {
                let mut entries = self.entries.write().await;
                entries.insert(
                    key,
                    CacheEntry {
                        catalog: catalog.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(catalog)
            }
            Err(e) => {
                let entries = self.entries.read().await;
                if let Some(entry) = entries.get(&key) {
                    warn!("Catalog fetch failed, serving stale entry: {}", e);
                    self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
                    Ok(entry.catalog.clone())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn fresh(&self, key: &str) -> Option<Catalog> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.catalog.clone())
    }

    /// Evict entries past the TTL. Runs independently of fetches and only
    /// bounds memory; correctness never depends on it.
    pub async fn sweep(&self) {
        let evicted = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, e| e.fetched_at.elapsed() < self.ttl);
            before - entries.len()
        };
        if evicted > 0 {
            debug!("Cache sweep evicted {} entries", evicted);
        }

        let mut flights = self.flights.lock().await;
        flights.retain(|_, m| Arc::strong_count(m) > 1);
    }

    /// Spawn the periodic eviction sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
            entries: self.entries.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ShopApi;
    use crate::error::BotError;
    use crate::types::{Category, Product, PurchaseOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct FakeSource {
        calls: AtomicU64,
        fail: AtomicBool,
        delay: Duration,
    }

    impl FakeSource {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail: AtomicBool::new(false),
                delay,
            }
        }
    }

    #[async_trait]
    impl ShopApi for FakeSource {
        async fn fetch_catalog(&self, _cred: &Credential) -> Result<Catalog> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(BotError::Shop("upstream down".into()));
            }
            Ok(Catalog {
                categories: vec![Category {
                    id: "1".into(),
                    name: "Cat".into(),
                    products: vec![Product {
                        id: "11".into(),
                        name: "Item".into(),
                        price: None,
                        amount: 5,
                    }],
                }],
            })
        }

        async fn fetch_balance(&self, _cred: &Credential) -> Result<String> {
            Ok("0".into())
        }

        async fn purchase(
            &self,
            _cred: &Credential,
            _product_id: &str,
            _amount: i64,
        ) -> Result<PurchaseOutcome> {
            Ok(PurchaseOutcome::Success { items: vec![] })
        }
    }

    fn cred() -> Credential {
        Credential {
            user_id: 1,
            username: "alice".into(),
            password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_network() {
        let source = Arc::new(FakeSource::new(Duration::ZERO));
        let cache = CatalogCache::new(source.clone(), Duration::from_secs(60));

        cache.fetch(&cred()).await.unwrap();
        cache.fetch(&cred()).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_single_flight() {
        let source = Arc::new(FakeSource::new(Duration::from_millis(50)));
        let cache = Arc::new(CatalogCache::new(source.clone(), Duration::from_secs(60)));

        let (a, b) = tokio::join!(
            {
                let c = cache.clone();
                async move { c.fetch(&cred()).await }
            },
            {
                let c = cache.clone();
                async move { c.fetch(&cred()).await }
            }
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_credentials_fetch_separately() {
        let source = Arc::new(FakeSource::new(Duration::ZERO));
        let cache = CatalogCache::new(source.clone(), Duration::from_secs(60));

        let other = Credential {
            user_id: 2,
            username: "bob".into(),
            password: "pw2".into(),
        };

        cache.fetch(&cred()).await.unwrap();
        cache.fetch(&other).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_fallback_on_failure() {
        let source = Arc::new(FakeSource::new(Duration::ZERO));
        // Zero TTL: every entry is immediately stale
        let cache = CatalogCache::new(source.clone(), Duration::ZERO);

        cache.fetch(&cred()).await.unwrap();
        source.fail.store(true, Ordering::SeqCst);

        let catalog = cache.fetch(&cred()).await.unwrap();
        assert_eq!(catalog.categories.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().await.stale_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_failure_without_cache_propagates() {
        let source = Arc::new(FakeSource::new(Duration::ZERO));
        source.fail.store(true, Ordering::SeqCst);
        let cache = CatalogCache::new(source, Duration::from_secs(60));

        assert!(cache.fetch(&cred()).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired() {
        let source = Arc::new(FakeSource::new(Duration::ZERO));
        let cache = CatalogCache::new(source, Duration::ZERO);

        cache.fetch(&cred()).await.unwrap();
        assert_eq!(cache.stats().await.entries, 1);

        cache.sweep().await;
        assert_eq!(cache.stats().await.entries, 0);
    }
}
