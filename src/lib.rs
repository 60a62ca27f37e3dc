//! Market Arbitrage Engine
//!
//! Price aggregation across an on-chain DEX aggregator and a centralized
//! exchange, with cross-venue spread detection.
//!
//! # Guarantees
//! - Rate-limit compliance: one serialized limiter per provider
//! - Bounded staleness: every cached value carries its own TTL
//! - Partial failures shrink the result instead of failing it
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 MarketDataService                    │
//! │  get_token_price / get_multiple_token_prices         │
//! │  get_arbitrage_opportunities / select_chain          │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │                          │
//!            ▼                          ▼
//! ┌─────────────────────┐    ┌─────────────────────────┐
//! │ MultiChain          │    │ ArbitrageEngine         │
//! │ Orchestrator        │    │  join by symbol, rank   │
//! └──────────┬──────────┘    └──────┬───────────┬──────┘
//!            │                      │           │
//!            ▼                      ▼           ▼
//! ┌─────────────────────────────────────┐ ┌───────────────┐
//! │       BatchedPriceFetcher           │ │ TickerSource  │
//! │  cache split, sub-batches, retry,   │ │ (CEX, own     │
//! │  per-item fallback                  │ │  RateLimiter) │
//! └───────┬─────────────────┬───────────┘ └───────────────┘
//!         ▼                 ▼
//! ┌──────────────┐  ┌──────────────┐
//! │ RateLimiter  │  │ PriceCache   │──▶ PriceSource (DEX aggregator)
//! └──────────────┘  └──────────────┘
//! ```

pub mod arbitrage;
pub mod cache;
pub mod cex_feed;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod price_feed;
pub mod rate_limiter;
pub mod service;

// Re-export commonly used types
pub use arbitrage::{ArbitrageEngine, SymbolRegistry};
pub use cache::{CacheKey, PriceCache};
pub use cex_feed::{ExchangeTickerFeed, MockTickerFeed, TickerSource};
pub use config::{EngineConfig, SpreadThresholds};
pub use error::{ConfigError, OrchestratorError, ProviderError};
pub use fetcher::BatchedPriceFetcher;
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient, RequestSigner};
pub use models::{
    ArbitrageOpportunity,
    CexTicker,
    ChainDescriptor,
    PriceQuote,
    RiskLevel,
    TokenDescriptor,
    TokenKey,
};
pub use orchestrator::{ChainSnapshot, ChainState, MultiChainOrchestrator};
pub use price_feed::{DexAggregatorFeed, MockPriceFeed, PriceSource, TokenCatalog};
pub use rate_limiter::RateLimiter;
pub use service::{MarketDataService, Sources};

/// Version of the engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the package
pub const NAME: &str = env!("CARGO_PKG_NAME");
