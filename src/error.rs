//! error.rs - Error taxonomy for provider calls, configuration and chain loading

use thiserror::Error;

/// Failure of a single call to an external market-data provider.
///
/// Transient variants are retried by the batch fetcher; permanent variants
/// are handed back to the caller, which downgrades them to per-item failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider server error: HTTP {status}")]
    Server { status: u16 },

    #[error("provider call timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned code {code}: {msg}")]
    Api { code: String, msg: String },

    #[error("malformed provider payload: {0}")]
    Malformed(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },
}

impl ProviderError {
    /// Rate-limit signals, 5xx, timeouts and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited
                | ProviderError::Server { .. }
                | ProviderError::Timeout
                | ProviderError::Network(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}

/// Raised while building the engine, never during a fetch cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Outcome of a chain selection that did not end in `Ready`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("chain {0} is not supported by the provider")]
    UnknownChain(String),

    #[error("failed to load chain data: {0}")]
    Load(#[from] ProviderError),

    #[error("selection of chain {chain_index} was superseded by a newer selection")]
    Superseded { chain_index: String },
}
