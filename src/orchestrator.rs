//! orchestrator.rs - Per-chain token universe and price snapshot
//!
//! State machine: `Uninitialized -> Loading -> Ready | Error`, and any state
//! goes back to `Loading` when a chain is selected. The previous snapshot is
//! dropped before the first fetch for the new chain is issued, and every
//! selection carries a generation number so a late result for a superseded
//! chain is discarded instead of merged.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cache::{CacheKey, PriceCache};
use crate::config::{CacheTtls, OrchestratorConfig};
use crate::error::OrchestratorError;
use crate::fetcher::BatchedPriceFetcher;
use crate::models::{ChainDescriptor, PriceQuote, TokenDescriptor, TokenKey};
use crate::price_feed::{TokenCatalog, ALL_TOKENS_PATH, SUPPORTED_CHAINS_PATH};
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    Uninitialized,
    Loading { chain_index: String },
    Ready { chain_index: String },
    Error { chain_index: String, message: String },
}

impl ChainState {
    pub fn chain_index(&self) -> Option<&str> {
        match self {
            ChainState::Uninitialized => None,
            ChainState::Loading { chain_index }
            | ChainState::Ready { chain_index }
            | ChainState::Error { chain_index, .. } => Some(chain_index),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ChainState::Ready { .. })
    }
}

/// Everything known about the selected chain. Always belongs to one chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainSnapshot {
    pub chain: Option<ChainDescriptor>,
    pub tokens: Vec<TokenDescriptor>,
    pub prices: HashMap<TokenKey, PriceQuote>,
}

impl ChainSnapshot {
    /// Token and its price, in token-list order, for tokens that have one
    pub fn priced_tokens(&self) -> Vec<(&TokenDescriptor, &PriceQuote)> {
        self.tokens
            .iter()
            .filter_map(|t| self.prices.get(&t.key()).map(|p| (t, p)))
            .collect()
    }
}

/// Called synchronously after every state change
pub type Listener = Arc<dyn Fn(&ChainState, &ChainSnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Selection {
    generation: u64,
    state: ChainState,
    snapshot: Arc<ChainSnapshot>,
}

pub struct MultiChainOrchestrator {
    catalog: Arc<dyn TokenCatalog>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<BatchedPriceFetcher>,
    chain_cache: PriceCache<Vec<ChainDescriptor>>,
    token_cache: PriceCache<Vec<TokenDescriptor>>,
    chain_list_ttl: Duration,
    token_list_ttl: Duration,
    max_priced_tokens: usize,
    selection: Mutex<Selection>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl MultiChainOrchestrator {
    /// `limiter` must be the same limiter `fetcher` uses: catalog and price
    /// calls go to the same provider.
    pub fn new(
        catalog: Arc<dyn TokenCatalog>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<BatchedPriceFetcher>,
        ttls: &CacheTtls,
        config: &OrchestratorConfig,
    ) -> Self {
        MultiChainOrchestrator {
            catalog,
            limiter,
            fetcher,
            chain_cache: PriceCache::new(),
            token_cache: PriceCache::new(),
            chain_list_ttl: ttls.chain_list,
            token_list_ttl: ttls.token_list,
            max_priced_tokens: config.max_priced_tokens,
            selection: Mutex::new(Selection {
                generation: 0,
                state: ChainState::Uninitialized,
                snapshot: Arc::new(ChainSnapshot::default()),
            }),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ChainState {
        self.lock_selection().state.clone()
    }

    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        self.lock_selection().snapshot.clone()
    }

    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.lock_listeners().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Supported chains, cached as static metadata
    pub async fn chains(&self) -> Result<Vec<ChainDescriptor>, OrchestratorError> {
        let key = CacheKey::endpoint(self.fetcher.source_name(), SUPPORTED_CHAINS_PATH, "");
        if let Some(chains) = self.chain_cache.get(&key).await {
            return Ok(chains);
        }

        let chains = self.limiter.execute(|| self.catalog.fetch_chains()).await?;
        self.chain_cache
            .set(key, chains.clone(), self.chain_list_ttl)
            .await;
        Ok(chains)
    }

    async fn tokens(&self, chain_index: &str) -> Result<Vec<TokenDescriptor>, OrchestratorError> {
        let key = CacheKey::endpoint(
            self.fetcher.source_name(),
            ALL_TOKENS_PATH,
            &format!("chainIndex={}", chain_index),
        );
        if let Some(tokens) = self.token_cache.get(&key).await {
            return Ok(tokens);
        }

        let tokens = self
            .limiter
            .execute(|| self.catalog.fetch_tokens(chain_index))
            .await?;
        self.token_cache
            .set(key, tokens.clone(), self.token_list_ttl)
            .await;
        Ok(tokens)
    }

    /// Switch to `chain_index` and load its token list and prices.
    ///
    /// Returns `Superseded` if another selection started before this one
    /// finished; its results are thrown away.
    pub async fn select_chain(&self, chain_index: &str) -> Result<(), OrchestratorError> {
        let generation = self.begin_loading(chain_index);
        info!("Selecting chain {}", chain_index);

        match self.load(chain_index).await {
            Ok(snapshot) => {
                let tokens = snapshot.tokens.len();
                let priced = snapshot.prices.len();
                self.finish(generation, chain_index, ChainState::Ready {
                    chain_index: chain_index.to_string(),
                }, snapshot)?;
                info!(
                    "Chain {} ready: {} tokens, {} priced",
                    chain_index, tokens, priced
                );
                Ok(())
            }
            Err(err) => {
                let state = ChainState::Error {
                    chain_index: chain_index.to_string(),
                    message: err.to_string(),
                };
                self.finish(generation, chain_index, state, ChainSnapshot::default())?;
                warn!("Chain {} failed to load: {}", chain_index, err);
                Err(err)
            }
        }
    }

    /// Re-price the current chain's token prefix without leaving `Ready`
    pub async fn refresh_prices(&self) -> Result<(), OrchestratorError> {
        let (generation, chain_index, current) = {
            let selection = self.lock_selection();
            match &selection.state {
                ChainState::Ready { chain_index } => (
                    selection.generation,
                    chain_index.clone(),
                    selection.snapshot.clone(),
                ),
                _ => return Ok(()),
            }
        };

        let prices = self.fetch_prefix_prices(&current.tokens).await;
        let snapshot = ChainSnapshot {
            chain: current.chain.clone(),
            tokens: current.tokens.clone(),
            prices,
        };
        let state = ChainState::Ready {
            chain_index: chain_index.clone(),
        };
        self.finish(generation, &chain_index, state, snapshot)
    }

    async fn load(&self, chain_index: &str) -> Result<ChainSnapshot, OrchestratorError> {
        let chain = self
            .chains()
            .await?
            .into_iter()
            .find(|c| c.chain_index == chain_index)
            .ok_or_else(|| OrchestratorError::UnknownChain(chain_index.to_string()))?;

        let tokens = self.tokens(chain_index).await?;
        let prices = self.fetch_prefix_prices(&tokens).await;

        Ok(ChainSnapshot {
            chain: Some(chain),
            tokens,
            prices,
        })
    }

    async fn fetch_prefix_prices(&self, tokens: &[TokenDescriptor]) -> HashMap<TokenKey, PriceQuote> {
        let prefix: Vec<TokenKey> = tokens
            .iter()
            .take(self.max_priced_tokens)
            .map(TokenDescriptor::key)
            .collect();
        self.fetcher.fetch_prices(&prefix).await
    }

    /// New generation, empty snapshot, `Loading`; then notify
    fn begin_loading(&self, chain_index: &str) -> u64 {
        let (generation, state, snapshot) = {
            let mut selection = self.lock_selection();
            selection.generation += 1;
            selection.state = ChainState::Loading {
                chain_index: chain_index.to_string(),
            };
            selection.snapshot = Arc::new(ChainSnapshot::default());
            (
                selection.generation,
                selection.state.clone(),
                selection.snapshot.clone(),
            )
        };
        self.notify(&state, &snapshot);
        generation
    }

    /// Publish a result if its selection is still current
    fn finish(
        &self,
        generation: u64,
        chain_index: &str,
        state: ChainState,
        snapshot: ChainSnapshot,
    ) -> Result<(), OrchestratorError> {
        let snapshot = Arc::new(snapshot);
        {
            let mut selection = self.lock_selection();
            if selection.generation != generation {
                warn!(
                    "Discarding late result for chain {} (superseded)",
                    chain_index
                );
                return Err(OrchestratorError::Superseded {
                    chain_index: chain_index.to_string(),
                });
            }
            selection.state = state.clone();
            selection.snapshot = snapshot.clone();
        }
        self.notify(&state, &snapshot);
        Ok(())
    }

    fn notify(&self, state: &ChainState, snapshot: &ChainSnapshot) {
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        debug!("State {:?} -> {} listeners", state, listeners.len());
        for listener in listeners {
            listener(state, snapshot);
        }
    }

    fn lock_selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner())
    }
}
