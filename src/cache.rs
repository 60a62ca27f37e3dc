//! cache.rs - TTL-keyed in-memory cache for quotes and provider metadata
//!
//! Expiry is computed on read from the entry's own TTL; expired entries are
//! removed lazily when they are read. There is no background sweep.

use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::models::TokenKey;

/// Composite cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A price for one token from one provider
    Price { provider: String, token: TokenKey },
    /// Any other lookup, keyed by endpoint and its parameters
    Endpoint {
        provider: String,
        endpoint: String,
        params: String,
    },
}

impl CacheKey {
    pub fn price(provider: &str, token: &TokenKey) -> Self {
        CacheKey::Price {
            provider: provider.to_string(),
            token: token.clone(),
        }
    }

    pub fn endpoint(provider: &str, endpoint: &str, params: &str) -> Self {
        CacheKey::Endpoint {
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            params: params.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Price { provider, token } => write!(f, "{}:price:{}", provider, token),
            CacheKey::Endpoint {
                provider,
                endpoint,
                params,
            } => write!(f, "{}:{}?{}", provider, endpoint, params),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self) -> bool {
        self.created_at.elapsed() < self.ttl
    }
}

/// Hit/miss counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct PriceCache<V> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> PriceCache<V> {
    pub fn new() -> Self {
        PriceCache {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh value for `key`, or `None`. An expired entry is deleted here.
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_fresh() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.payload.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: re-check under the write lock, a writer may have refreshed it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.is_fresh() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.payload.clone());
            }
            entries.remove(key);
            debug!("Cache entry expired: {}", key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite; the entry's clock restarts now.
    pub async fn set(&self, key: CacheKey, value: V, ttl: Duration) {
        let entry = CacheEntry {
            payload: value,
            created_at: Instant::now(),
            ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    pub async fn remove(&self, key: &CacheKey) -> Option<V> {
        self.entries.write().await.remove(key).map(|e| e.payload)
    }

    /// Number of stored entries, expired ones included until read or purged
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every expired entry; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh());
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for PriceCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceQuote;
    use rust_decimal_macros::dec;

    fn sol_key() -> CacheKey {
        CacheKey::price(
            "okx-dex",
            &TokenKey::new("501", "So11111111111111111111111111111111111111112"),
        )
    }

    #[tokio::test]
    async fn test_get_returns_last_set_value_within_ttl() {
        let cache = PriceCache::new();
        let token = TokenKey::new("501", "So11111111111111111111111111111111111111112");

        cache
            .set(sol_key(), PriceQuote::new("okx-dex", &token, dec!(149)), Duration::from_secs(60))
            .await;
        let latest = PriceQuote::new("okx-dex", &token, dec!(150.25));
        cache.set(sol_key(), latest.clone(), Duration::from_secs(60)).await;

        assert_eq!(cache.get(&sol_key()).await, Some(latest));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_read() {
        let cache = PriceCache::new();
        cache.set(sol_key(), 1u32, Duration::from_millis(20)).await;
        assert_eq!(cache.get(&sol_key()).await, Some(1));

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&sol_key()).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_each_entry_uses_its_own_ttl() {
        let cache = PriceCache::new();
        let short = CacheKey::endpoint("okx-cex", "/api/v5/market/tickers", "instType=SPOT");
        cache.set(short.clone(), "tickers", Duration::from_millis(10)).await;
        cache.set(sol_key(), "price", Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.get(&short).await, None);
        assert_eq!(cache.get(&sol_key()).await, Some("price"));
    }

    #[tokio::test]
    async fn test_overwrite_restarts_clock() {
        let cache = PriceCache::new();
        cache.set(sol_key(), 1u8, Duration::from_millis(40)).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.set(sol_key(), 2u8, Duration::from_millis(40)).await;
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(cache.get(&sol_key()).await, Some(2));
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = PriceCache::new();
        assert_eq!(cache.get(&sol_key()).await, None::<u8>);
        cache.set(sol_key(), 9u8, Duration::from_secs(1)).await;
        assert_eq!(cache.get(&sol_key()).await, Some(9));
        assert_eq!(cache.get(&sol_key()).await, Some(9));

        let stats = cache.stats();
        assert_eq!(stats, CacheStats { hits: 2, misses: 1 });
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = PriceCache::new();
        assert!(cache.is_empty().await);

        let tickers = CacheKey::endpoint("okx-cex", "/api/v5/market/tickers", "instType=SPOT");
        cache.set(sol_key(), 1u8, Duration::from_secs(60)).await;
        cache.set(tickers.clone(), 2u8, Duration::from_secs(60)).await;

        assert_eq!(cache.remove(&sol_key()).await, Some(1));
        assert_eq!(cache.remove(&sol_key()).await, None);
        assert_eq!(cache.get(&sol_key()).await, None);
        assert!(!cache.is_empty().await);

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.get(&tickers).await, None);
    }

    #[test]
    fn test_key_display() {
        let key = CacheKey::endpoint("okx-dex", "/all-tokens", "chainIndex=1");
        assert_eq!(key.to_string(), "okx-dex:/all-tokens?chainIndex=1");
    }
}
