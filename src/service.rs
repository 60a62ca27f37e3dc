//! service.rs - The engine's upward-facing contract
//!
//! Wires one limiter and one cache per provider into the fetcher, the
//! arbitrage engine and the chain orchestrator, and exposes the operations
//! UI and HTTP layers call.

use log::info;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::arbitrage::{ArbitrageEngine, SymbolRegistry};
use crate::cache::PriceCache;
use crate::cex_feed::{ExchangeTickerFeed, MockTickerFeed, TickerSource};
use crate::config::EngineConfig;
use crate::error::{ConfigError, OrchestratorError};
use crate::fetcher::BatchedPriceFetcher;
use crate::http::{ApiKeyHeaders, HttpClient, ReqwestHttpClient};
use crate::models::{ArbitrageOpportunity, ChainDescriptor, PriceQuote, TokenKey};
use crate::orchestrator::{ChainSnapshot, ChainState, Listener, MultiChainOrchestrator, SubscriptionId};
use crate::price_feed::{DexAggregatorFeed, MockPriceFeed, PriceSource, TokenCatalog};
use crate::rate_limiter::RateLimiter;

/// The provider adapters the service runs against
pub struct Sources {
    pub prices: Arc<dyn PriceSource>,
    pub catalog: Arc<dyn TokenCatalog>,
    pub tickers: Arc<dyn TickerSource>,
}

impl Sources {
    /// HTTP adapters sharing `dex_http` for the aggregator and `cex_http`
    /// for the public ticker endpoint
    pub fn http(config: &EngineConfig, dex_http: Arc<dyn HttpClient>, cex_http: Arc<dyn HttpClient>) -> Self {
        let dex = Arc::new(DexAggregatorFeed::new(&config.dex, dex_http));
        Sources {
            prices: dex.clone(),
            catalog: dex,
            tickers: Arc::new(ExchangeTickerFeed::new(&config.cex, cex_http)),
        }
    }

    /// Offline demo market
    pub fn demo() -> Self {
        let dex = Arc::new(MockPriceFeed::demo());
        Sources {
            prices: dex.clone(),
            catalog: dex,
            tickers: Arc::new(MockTickerFeed::demo()),
        }
    }
}

pub struct MarketDataService {
    config: EngineConfig,
    fetcher: Arc<BatchedPriceFetcher>,
    arbitrage: ArbitrageEngine,
    orchestrator: MultiChainOrchestrator,
}

impl MarketDataService {
    /// Build from configuration. Demo mode runs on the mock market; otherwise
    /// the aggregator is reached with API-key headers and credentials must be set.
    pub fn from_config(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let sources = if config.demo_mode {
            Sources::demo()
        } else {
            let api_key = config
                .dex
                .api_key
                .as_deref()
                .ok_or(ConfigError::MissingCredential("ARB_DEX_API_KEY"))?;
            let passphrase = config
                .dex
                .passphrase
                .as_deref()
                .ok_or(ConfigError::MissingCredential("ARB_DEX_PASSPHRASE"))?;

            let dex_http = ReqwestHttpClient::new(Arc::new(ApiKeyHeaders::new(api_key, passphrase)))
                .map_err(|e| invalid_client(&e.to_string()))?;
            let cex_http =
                ReqwestHttpClient::unauthenticated().map_err(|e| invalid_client(&e.to_string()))?;
            Sources::http(&config, Arc::new(dex_http), Arc::new(cex_http))
        };

        Self::with_sources(config, sources, SymbolRegistry::with_default_watchlist())
    }

    /// Build around explicit sources
    pub fn with_sources(
        config: EngineConfig,
        sources: Sources,
        registry: SymbolRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let dex_limiter = Arc::new(RateLimiter::for_provider(&config.dex, &config.limiter));
        let cex_limiter = Arc::new(RateLimiter::for_provider(&config.cex, &config.limiter));

        let fetcher = Arc::new(BatchedPriceFetcher::new(
            sources.prices,
            dex_limiter.clone(),
            Arc::new(PriceCache::new()),
            config.batch.clone(),
            &config.cache,
        ));

        let arbitrage = ArbitrageEngine::new(
            fetcher.clone(),
            sources.tickers,
            cex_limiter,
            config.cache.cex_tickers,
            registry,
            config.thresholds.clone(),
        );

        let orchestrator = MultiChainOrchestrator::new(
            sources.catalog,
            dex_limiter,
            fetcher.clone(),
            &config.cache,
            &config.orchestrator,
        );

        info!(
            "Market data service ready: dex={} cex={} min spread {}%",
            config.dex.name, config.cex.name, config.thresholds.min_spread_percent
        );

        Ok(MarketDataService {
            config,
            fetcher,
            arbitrage,
            orchestrator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn get_token_price(&self, chain_index: &str, address: &str) -> Option<Decimal> {
        self.get_token_quote(chain_index, address)
            .await
            .map(|q| q.price)
    }

    pub async fn get_token_quote(&self, chain_index: &str, address: &str) -> Option<PriceQuote> {
        self.fetcher
            .fetch_price(&TokenKey::new(chain_index, address))
            .await
    }

    pub async fn get_multiple_token_prices(&self, requests: &[TokenKey]) -> HashMap<TokenKey, Decimal> {
        let normalized: Vec<TokenKey> = requests
            .iter()
            .map(|k| TokenKey::new(&k.chain_index, &k.address))
            .collect();
        self.fetcher
            .fetch_prices(&normalized)
            .await
            .into_iter()
            .map(|(key, quote)| (key, quote.price))
            .collect()
    }

    /// Ranked opportunities for `symbols`, or for the whole watchlist
    pub async fn get_arbitrage_opportunities(
        &self,
        symbols: Option<&[String]>,
        top_n: Option<usize>,
    ) -> Vec<ArbitrageOpportunity> {
        match symbols {
            Some(symbols) => self.arbitrage.find_opportunities(symbols, top_n).await,
            None => {
                let watchlist = self.arbitrage.registry().symbols();
                self.arbitrage.find_opportunities(&watchlist, top_n).await
            }
        }
    }

    pub async fn supported_chains(&self) -> Result<Vec<ChainDescriptor>, OrchestratorError> {
        self.orchestrator.chains().await
    }

    pub async fn select_chain(&self, chain_index: &str) -> Result<(), OrchestratorError> {
        self.orchestrator.select_chain(chain_index).await
    }

    pub async fn refresh_chain_prices(&self) -> Result<(), OrchestratorError> {
        self.orchestrator.refresh_prices().await
    }

    pub fn chain_state(&self) -> ChainState {
        self.orchestrator.state()
    }

    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        self.orchestrator.snapshot()
    }

    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        self.orchestrator.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.orchestrator.unsubscribe(id)
    }
}

fn invalid_client(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: "http_client".to_string(),
        reason: reason.to_string(),
    }
}
