//! fetcher.rs - Cache-aware, batch-splitting price fetcher
//!
//! Requests are deduplicated and served from the cache where possible. The
//! remainder is split into provider-sized sub-batches that are submitted
//! concurrently; each sub-batch still waits for its own slot in the
//! provider's rate limiter. A sub-batch that cannot be fetched falls back to
//! one call per token, and whatever ultimately fails is simply absent from
//! the result.

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKey, PriceCache};
use crate::config::{BatchConfig, CacheTtls};
use crate::error::ProviderError;
use crate::models::{PriceQuote, TokenKey};
use crate::price_feed::PriceSource;
use crate::rate_limiter::RateLimiter;

pub struct BatchedPriceFetcher {
    source: Arc<dyn PriceSource>,
    limiter: Arc<RateLimiter>,
    cache: Arc<PriceCache<PriceQuote>>,
    batch: BatchConfig,
    single_ttl: Duration,
    batch_ttl: Duration,
}

impl BatchedPriceFetcher {
    pub fn new(
        source: Arc<dyn PriceSource>,
        limiter: Arc<RateLimiter>,
        cache: Arc<PriceCache<PriceQuote>>,
        batch: BatchConfig,
        ttls: &CacheTtls,
    ) -> Self {
        BatchedPriceFetcher {
            source,
            limiter,
            cache,
            batch,
            single_ttl: ttls.single_price,
            batch_ttl: ttls.batch_price,
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Price for one token, `None` when unavailable
    pub async fn fetch_price(&self, token: &TokenKey) -> Option<PriceQuote> {
        self.fetch_prices(std::slice::from_ref(token))
            .await
            .remove(token)
    }

    /// Prices for every token that could be resolved. Never fails: tokens
    /// the provider has no data for, or that failed every attempt, are
    /// missing from the map.
    pub async fn fetch_prices(&self, requests: &[TokenKey]) -> HashMap<TokenKey, PriceQuote> {
        let mut seen = HashSet::new();
        let unique: Vec<TokenKey> = requests
            .iter()
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect();

        let mut prices = HashMap::with_capacity(unique.len());
        let mut uncached = Vec::new();
        for token in unique {
            match self.cache.get(&self.cache_key(&token)).await {
                Some(quote) => {
                    prices.insert(token, quote);
                }
                None => uncached.push(token),
            }
        }

        if uncached.is_empty() {
            if !prices.is_empty() {
                debug!("{}: all {} prices served from cache", self.source.name(), prices.len());
            }
            return prices;
        }

        let chunk_size = self.batch.max_batch_size.max(1);
        let sub_batches: Vec<&[TokenKey]> = uncached.chunks(chunk_size).collect();
        debug!(
            "{}: {} cached, {} to fetch in {} sub-batches",
            self.source.name(),
            prices.len(),
            uncached.len(),
            sub_batches.len()
        );

        let fetched = join_all(sub_batches.iter().map(|batch| self.fetch_sub_batch(batch))).await;
        let mut resolved = 0;
        for quotes in fetched {
            resolved += quotes.len();
            prices.extend(quotes);
        }

        if resolved < uncached.len() {
            info!(
                "{}: resolved {}/{} uncached prices",
                self.source.name(),
                resolved,
                uncached.len()
            );
        }
        prices
    }

    async fn fetch_sub_batch(&self, tokens: &[TokenKey]) -> Vec<(TokenKey, PriceQuote)> {
        match self.call_with_retry(tokens).await {
            Ok(quotes) => self.store(tokens, quotes).await,
            Err(err) if tokens.len() > 1 => {
                warn!(
                    "{}: sub-batch of {} failed ({}), fetching individually",
                    self.source.name(),
                    tokens.len(),
                    err
                );
                let singles = join_all(tokens.iter().map(|token| self.fetch_single(token))).await;
                singles.into_iter().flatten().collect()
            }
            Err(err) => {
                warn!("{}: price for {} unavailable: {}", self.source.name(), tokens[0], err);
                Vec::new()
            }
        }
    }

    async fn fetch_single(&self, token: &TokenKey) -> Option<(TokenKey, PriceQuote)> {
        let tokens = std::slice::from_ref(token);
        match self.call_with_retry(tokens).await {
            Ok(quotes) => self.store(tokens, quotes).await.into_iter().next(),
            Err(err) => {
                debug!("{}: individual fetch of {} failed: {}", self.source.name(), token, err);
                None
            }
        }
    }

    /// One rate-limited provider call per attempt, exponential backoff between
    /// retryable failures. Permanent failures return immediately.
    async fn call_with_retry(&self, tokens: &[TokenKey]) -> Result<Vec<PriceQuote>, ProviderError> {
        let max_attempts = self.batch.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self
                .limiter
                .execute(|| self.source.fetch_batch(tokens))
                .await;

            match result {
                Ok(quotes) => return Ok(quotes),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{}: attempt {}/{} for {} tokens failed ({}), retrying in {:?}",
                        self.source.name(),
                        attempt,
                        max_attempts,
                        tokens.len(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.batch
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Write quotes for requested tokens through to the cache
    async fn store(&self, requested: &[TokenKey], quotes: Vec<PriceQuote>) -> Vec<(TokenKey, PriceQuote)> {
        let ttl = if requested.len() > 1 {
            self.batch_ttl
        } else {
            self.single_ttl
        };

        let mut stored = Vec::with_capacity(quotes.len());
        for quote in quotes {
            let key = quote.key();
            if !requested.contains(&key) {
                debug!("{}: ignoring unrequested quote for {}", self.source.name(), key);
                continue;
            }
            self.cache.set(self.cache_key(&key), quote.clone(), ttl).await;
            stored.push((key, quote));
        }
        stored
    }

    fn cache_key(&self, token: &TokenKey) -> CacheKey {
        CacheKey::price(self.source.name(), token)
    }
}
