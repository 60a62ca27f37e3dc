//! config.rs - Engine configuration
//!
//! Defaults mirror the providers' documented limits. `from_env` overlays
//! `ARB_*` environment variables on top of the defaults.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Most tokens the on-chain aggregator accepts in one price call
pub const MAX_PROVIDER_BATCH_SIZE: usize = 20;

/// Connection settings for one external provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub passphrase: Option<String>,
    /// Minimum spacing between two dispatches to this provider
    pub min_interval: Duration,
    /// Hard deadline for a single call
    pub request_timeout: Duration,
}

/// Adaptive behaviour of each provider's rate limiter
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Consecutive failures tolerated before the interval starts doubling
    pub failure_threshold: u32,
    /// Extra delay inserted before the next slot after a 429
    pub rate_limit_penalty: Duration,
    /// Ceiling for the doubled interval
    pub max_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub single_price: Duration,
    pub batch_price: Duration,
    pub token_list: Duration,
    pub chain_list: Duration,
    pub cex_tickers: Duration,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    /// Total attempts per call, first try included
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

/// The one place spread and risk thresholds live, all in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadThresholds {
    pub min_spread_percent: Decimal,
    pub low_risk_max_percent: Decimal,
    pub medium_risk_max_percent: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How many tokens from the head of a chain's list get priced
    pub max_priced_tokens: usize,
    pub default_chain: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dex: ProviderConfig,
    pub cex: ProviderConfig,
    pub limiter: LimiterConfig,
    pub cache: CacheTtls,
    pub batch: BatchConfig,
    pub thresholds: SpreadThresholds,
    pub orchestrator: OrchestratorConfig,
    /// Run against in-memory mock feeds instead of the network
    pub demo_mode: bool,
    pub scan_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig {
            failure_threshold: 3,
            rate_limit_penalty: Duration::from_secs(5),
            max_interval: Duration::from_secs(10),
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        CacheTtls {
            single_price: Duration::from_secs(60),
            batch_price: Duration::from_secs(120),
            token_list: Duration::from_secs(30 * 60),
            chain_list: Duration::from_secs(60 * 60),
            cex_tickers: Duration::from_secs(15),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            max_batch_size: MAX_PROVIDER_BATCH_SIZE,
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl Default for SpreadThresholds {
    fn default() -> Self {
        SpreadThresholds {
            min_spread_percent: Decimal::new(5, 1),
            low_risk_max_percent: Decimal::ONE,
            medium_risk_max_percent: Decimal::TWO,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            max_priced_tokens: 20,
            default_chain: "1".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            dex: ProviderConfig {
                name: "okx-dex".to_string(),
                base_url: "https://web3.okx.com".to_string(),
                api_key: None,
                passphrase: None,
                min_interval: Duration::from_millis(1000),
                request_timeout: Duration::from_secs(30),
            },
            cex: ProviderConfig {
                name: "okx-cex".to_string(),
                base_url: "https://www.okx.com".to_string(),
                api_key: None,
                passphrase: None,
                min_interval: Duration::from_millis(100),
                request_timeout: Duration::from_secs(30),
            },
            limiter: LimiterConfig::default(),
            cache: CacheTtls::default(),
            batch: BatchConfig::default(),
            thresholds: SpreadThresholds::default(),
            orchestrator: OrchestratorConfig::default(),
            demo_mode: false,
            scan_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `ARB_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = EngineConfig::default();

        if let Some(url) = read_var("ARB_DEX_BASE_URL") {
            config.dex.base_url = url;
        }
        config.dex.api_key = read_var("ARB_DEX_API_KEY");
        config.dex.passphrase = read_var("ARB_DEX_PASSPHRASE");
        if let Some(ms) = parse_var::<u64>("ARB_DEX_MIN_INTERVAL_MS")? {
            config.dex.min_interval = Duration::from_millis(ms);
        }
        if let Some(url) = read_var("ARB_CEX_BASE_URL") {
            config.cex.base_url = url;
        }
        if let Some(ms) = parse_var::<u64>("ARB_CEX_MIN_INTERVAL_MS")? {
            config.cex.min_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>("ARB_REQUEST_TIMEOUT_SECS")? {
            config.dex.request_timeout = Duration::from_secs(secs);
            config.cex.request_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<usize>("ARB_MAX_BATCH_SIZE")? {
            config.batch.max_batch_size = size;
        }
        if let Some(attempts) = parse_var::<u32>("ARB_MAX_ATTEMPTS")? {
            config.batch.max_attempts = attempts;
        }
        if let Some(pct) = parse_var::<Decimal>("ARB_MIN_SPREAD_PERCENT")? {
            config.thresholds.min_spread_percent = pct;
        }
        if let Some(count) = parse_var::<usize>("ARB_MAX_PRICED_TOKENS")? {
            config.orchestrator.max_priced_tokens = count;
        }
        if let Some(chain) = read_var("ARB_DEFAULT_CHAIN") {
            config.orchestrator.default_chain = chain;
        }
        if let Some(secs) = parse_var::<u64>("ARB_SCAN_INTERVAL_SECS")? {
            config.scan_interval = Duration::from_secs(secs);
        }
        if let Some(demo) = parse_var::<bool>("ARB_DEMO")? {
            config.demo_mode = demo;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.max_batch_size == 0 {
            return Err(invalid("max_batch_size", "must be at least 1"));
        }
        if self.batch.max_batch_size > MAX_PROVIDER_BATCH_SIZE {
            return Err(invalid(
                "max_batch_size",
                &format!("provider accepts at most {} tokens per call", MAX_PROVIDER_BATCH_SIZE),
            ));
        }
        if self.batch.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.orchestrator.max_priced_tokens == 0 {
            return Err(invalid("max_priced_tokens", "must be at least 1"));
        }

        let t = &self.thresholds;
        if t.min_spread_percent < Decimal::ZERO {
            return Err(invalid("min_spread_percent", "must not be negative"));
        }
        if t.low_risk_max_percent > t.medium_risk_max_percent {
            return Err(invalid(
                "low_risk_max_percent",
                "must not exceed medium_risk_max_percent",
            ));
        }

        if !self.demo_mode {
            if self.dex.api_key.is_none() {
                return Err(ConfigError::MissingCredential("ARB_DEX_API_KEY"));
            }
            if self.dex.passphrase.is_none() {
                return Err(ConfigError::MissingCredential("ARB_DEX_PASSPHRASE"));
            }
        }

        Ok(())
    }
}

fn read_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match read_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &e.to_string())),
        None => Ok(None),
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
