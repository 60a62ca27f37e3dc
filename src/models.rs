//! models.rs - Core data structures for the price and arbitrage engine
//!
//! Quotes, chain/token reference data and arbitrage opportunities. Every type
//! here is a plain value: quotes are superseded by newer quotes, never mutated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a token on one chain: the (chain, address) pair used for
/// price lookups and cache keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey {
    pub chain_index: String,
    pub address: String,
}

impl TokenKey {
    /// EVM-style `0x` addresses are case-insensitive and stored lowercased;
    /// other address formats (e.g. base58) are kept verbatim.
    pub fn new(chain_index: &str, address: &str) -> Self {
        let address = address.trim();
        let address = if address.starts_with("0x") || address.starts_with("0X") {
            address.to_ascii_lowercase()
        } else {
            address.to_string()
        };

        TokenKey {
            chain_index: chain_index.trim().to_string(),
            address,
        }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_index, self.address)
    }
}

/// Static description of a supported blockchain network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub chain_index: String,
    pub name: String,
    pub native_symbol: String,
}

impl ChainDescriptor {
    pub fn new(chain_index: &str, name: &str, native_symbol: &str) -> Self {
        ChainDescriptor {
            chain_index: chain_index.to_string(),
            name: name.to_string(),
            native_symbol: native_symbol.to_string(),
        }
    }
}

impl fmt::Display for ChainDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.chain_index)
    }
}

/// A token listed on exactly one chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenDescriptor {
    pub chain_index: String,
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenDescriptor {
    pub fn new(chain_index: &str, address: &str, symbol: &str, decimals: u8) -> Self {
        let key = TokenKey::new(chain_index, address);
        TokenDescriptor {
            chain_index: key.chain_index,
            address: key.address,
            symbol: symbol.to_string(),
            decimals,
        }
    }

    pub fn key(&self) -> TokenKey {
        TokenKey::new(&self.chain_index, &self.address)
    }
}

impl fmt::Display for TokenDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Values reported over the provider's rolling windows
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowedValues {
    pub m5: Option<Decimal>,
    pub h1: Option<Decimal>,
    pub h4: Option<Decimal>,
    pub h24: Option<Decimal>,
}

/// A price observation for one token from one provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub provider: String,
    pub chain_index: String,
    pub token_address: String,
    pub price: Decimal,
    pub price_change: WindowedValues,
    pub volume: WindowedValues,
    pub market_cap: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

impl PriceQuote {
    /// Build a bare quote observed now, with no change/volume data
    pub fn new(provider: &str, key: &TokenKey, price: Decimal) -> Self {
        PriceQuote {
            provider: provider.to_string(),
            chain_index: key.chain_index.clone(),
            token_address: key.address.clone(),
            price,
            price_change: WindowedValues::default(),
            volume: WindowedValues::default(),
            market_cap: None,
            observed_at: Utc::now(),
        }
    }

    pub fn key(&self) -> TokenKey {
        TokenKey::new(&self.chain_index, &self.token_address)
    }
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} ({})", self.key(), self.price, self.provider)
    }
}

/// A spot ticker from the centralized exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CexTicker {
    pub inst_id: String,
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

/// Coarse risk classification derived from the spread magnitude
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        write!(f, "{}", label)
    }
}

/// Which side of a cross-venue spread is cheaper
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Venue {
    OnChain,
    Centralized,
}

/// A cross-venue price difference for one symbol.
///
/// Only the arbitrage engine creates these; they are recomputed from scratch
/// on every request cycle and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageOpportunity {
    pub symbol: String,
    /// On-chain aggregator price
    pub price_a: Decimal,
    /// Centralized exchange price
    pub price_b: Decimal,
    pub price_spread: Decimal,
    pub profit_percent: Decimal,
    pub volume_24h: Option<Decimal>,
    pub risk: RiskLevel,
    pub observed_at: DateTime<Utc>,
}

impl ArbitrageOpportunity {
    /// Venue to buy on (the cheaper side)
    pub fn buy_venue(&self) -> Venue {
        if self.price_a <= self.price_b {
            Venue::OnChain
        } else {
            Venue::Centralized
        }
    }
}

impl fmt::Display for ArbitrageOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: on-chain {} vs cex {} | spread {} ({:.4}%) [{}]",
            self.symbol, self.price_a, self.price_b, self.price_spread, self.profit_percent, self.risk
        )
    }
}
