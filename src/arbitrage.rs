//! arbitrage.rs - Cross-venue spread detection
//!
//! Joins on-chain aggregator prices with centralized exchange tickers by
//! symbol, computes spreads, buckets them by risk and ranks them. Symbols
//! missing on either side are dropped silently; a cycle never errors, it
//! just finds nothing.

use chrono::Utc;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKey, PriceCache};
use crate::cex_feed::{index_tickers, match_ticker, TickerSource, SPOT_TICKERS_PATH};
use crate::config::SpreadThresholds;
use crate::fetcher::BatchedPriceFetcher;
use crate::models::{ArbitrageOpportunity, CexTicker, RiskLevel, TokenKey};
use crate::rate_limiter::RateLimiter;

/// Maps trading symbols to the token priced on-chain for them
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    entries: HashMap<String, TokenKey>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Majors on Ethereum, Solana and BNB Chain
    pub fn with_default_watchlist() -> Self {
        [
            ("ETH", "1", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            ("BTC", "1", "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"),
            ("LINK", "1", "0x514910771AF9Ca656af840dff83E8264EcF986CA"),
            ("UNI", "1", "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984"),
            ("AAVE", "1", "0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9"),
            ("PEPE", "1", "0x6982508145454Ce325dDbE47a25d4ec3d2311933"),
            ("SOL", "501", "So11111111111111111111111111111111111111112"),
            ("JUP", "501", "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN"),
            ("BNB", "56", "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"),
            ("CAKE", "56", "0x0E09FaBB73Bd3Ade0a17ECC321fD13a19e81cE82"),
        ]
        .into_iter()
        .fold(Self::new(), |registry, (symbol, chain, address)| {
            registry.with(symbol, TokenKey::new(chain, address))
        })
    }

    pub fn with(mut self, symbol: &str, token: TokenKey) -> Self {
        self.insert(symbol, token);
        self
    }

    pub fn insert(&mut self, symbol: &str, token: TokenKey) {
        self.entries.insert(symbol.trim().to_uppercase(), token);
    }

    pub fn resolve(&self, symbol: &str) -> Option<&TokenKey> {
        self.entries.get(&symbol.trim().to_uppercase())
    }

    /// All registered symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self.entries.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

/// Absolute spread and spread relative to the cheaper side, in percent.
/// `None` unless both prices are positive and the ratio fits in a `Decimal`.
pub fn spread(on_chain: Decimal, cex: Decimal) -> Option<(Decimal, Decimal)> {
    if on_chain <= Decimal::ZERO || cex <= Decimal::ZERO {
        return None;
    }
    let price_spread = on_chain.checked_sub(cex)?.abs();
    let profit_percent = price_spread
        .checked_div(on_chain.min(cex))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED));

    match profit_percent {
        Some(pct) => Some((price_spread, pct)),
        None => {
            warn!("Spread between {} and {} overflows, pair dropped", on_chain, cex);
            None
        }
    }
}

pub fn classify_risk(profit_percent: Decimal, thresholds: &SpreadThresholds) -> RiskLevel {
    let magnitude = profit_percent.abs();
    if magnitude <= thresholds.low_risk_max_percent {
        RiskLevel::Low
    } else if magnitude <= thresholds.medium_risk_max_percent {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Build the opportunity for one joined pair, or `None` if it is below the
/// minimum spread or either price is unusable.
pub fn evaluate(
    symbol: &str,
    on_chain_price: Decimal,
    ticker: &CexTicker,
    volume_24h: Option<Decimal>,
    thresholds: &SpreadThresholds,
) -> Option<ArbitrageOpportunity> {
    let (price_spread, profit_percent) = spread(on_chain_price, ticker.last)?;
    if profit_percent.abs() < thresholds.min_spread_percent {
        return None;
    }

    Some(ArbitrageOpportunity {
        symbol: symbol.to_uppercase(),
        price_a: on_chain_price,
        price_b: ticker.last,
        price_spread,
        profit_percent,
        volume_24h,
        risk: classify_risk(profit_percent, thresholds),
        observed_at: Utc::now(),
    })
}

/// One entry per symbol, keeping the larger |profitPercent|
pub fn dedupe_by_symbol(opportunities: Vec<ArbitrageOpportunity>) -> Vec<ArbitrageOpportunity> {
    let mut best: HashMap<String, ArbitrageOpportunity> = HashMap::new();
    for opp in opportunities {
        match best.get(&opp.symbol) {
            Some(kept) if kept.profit_percent.abs() >= opp.profit_percent.abs() => {}
            _ => {
                best.insert(opp.symbol.clone(), opp);
            }
        }
    }
    best.into_values().collect()
}

/// Sort descending by |profitPercent|, optionally keeping the top `top_n`
pub fn rank(mut opportunities: Vec<ArbitrageOpportunity>, top_n: Option<usize>) -> Vec<ArbitrageOpportunity> {
    opportunities.sort_by(|a, b| {
        b.profit_percent
            .abs()
            .cmp(&a.profit_percent.abs())
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    if let Some(n) = top_n {
        opportunities.truncate(n);
    }
    opportunities
}

pub struct ArbitrageEngine {
    fetcher: Arc<BatchedPriceFetcher>,
    tickers: Arc<dyn TickerSource>,
    cex_limiter: Arc<RateLimiter>,
    ticker_cache: Arc<PriceCache<Vec<CexTicker>>>,
    ticker_ttl: Duration,
    registry: SymbolRegistry,
    thresholds: SpreadThresholds,
}

impl ArbitrageEngine {
    pub fn new(
        fetcher: Arc<BatchedPriceFetcher>,
        tickers: Arc<dyn TickerSource>,
        cex_limiter: Arc<RateLimiter>,
        ticker_ttl: Duration,
        registry: SymbolRegistry,
        thresholds: SpreadThresholds,
    ) -> Self {
        ArbitrageEngine {
            fetcher,
            tickers,
            cex_limiter,
            ticker_cache: Arc::new(PriceCache::new()),
            ticker_ttl,
            registry,
            thresholds,
        }
    }

    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    /// Ranked opportunities for `symbols`. Both venues are queried
    /// concurrently; they are independent providers with their own limiters.
    pub async fn find_opportunities(
        &self,
        symbols: &[String],
        top_n: Option<usize>,
    ) -> Vec<ArbitrageOpportunity> {
        let mut seen = HashSet::new();
        let resolved: Vec<(String, TokenKey)> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .filter_map(|symbol| match self.registry.resolve(&symbol) {
                Some(token) => Some((symbol, token.clone())),
                None => {
                    debug!("No on-chain token registered for {}", symbol);
                    None
                }
            })
            .collect();

        if resolved.is_empty() {
            return Vec::new();
        }

        let tokens: Vec<TokenKey> = resolved.iter().map(|(_, t)| t.clone()).collect();
        let (on_chain, tickers) = tokio::join!(self.fetcher.fetch_prices(&tokens), self.load_tickers());

        if on_chain.is_empty() && tickers.is_empty() {
            warn!("Both price sources returned nothing for {} symbols", resolved.len());
            return Vec::new();
        }

        let candidates: Vec<ArbitrageOpportunity> = resolved
            .iter()
            .filter_map(|(symbol, token)| {
                let quote = on_chain.get(token)?;
                let ticker = match_ticker(symbol, &tickers)?;
                let volume = ticker.volume_24h.or(quote.volume.h24);
                let mut opp = evaluate(symbol, quote.price, ticker, volume, &self.thresholds)?;
                opp.observed_at = quote.observed_at.min(ticker.observed_at);
                Some(opp)
            })
            .collect();

        let ranked = rank(dedupe_by_symbol(candidates), top_n);
        info!(
            "Arbitrage scan: {} symbols, {} on-chain prices, {} opportunities",
            resolved.len(),
            on_chain.len(),
            ranked.len()
        );
        ranked
    }

    /// All spot tickers by instrument id; empty on failure
    async fn load_tickers(&self) -> HashMap<String, CexTicker> {
        let key = CacheKey::endpoint(self.tickers.name(), SPOT_TICKERS_PATH, "instType=SPOT");
        if let Some(cached) = self.ticker_cache.get(&key).await {
            return index_tickers(cached);
        }

        match self.cex_limiter.execute(|| self.tickers.fetch_tickers()).await {
            Ok(tickers) => {
                debug!("{}: {} spot tickers", self.tickers.name(), tickers.len());
                self.ticker_cache
                    .set(key, tickers.clone(), self.ticker_ttl)
                    .await;
                index_tickers(tickers)
            }
            Err(err) => {
                warn!("{}: ticker fetch failed: {}", self.tickers.name(), err);
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cex_feed::MockTickerFeed;
    use crate::config::{BatchConfig, CacheTtls, LimiterConfig};
    use crate::error::ProviderError;
    use crate::price_feed::MockPriceFeed;
    use rust_decimal_macros::dec;

    fn ticker(inst: &str, last: Decimal) -> CexTicker {
        CexTicker {
            inst_id: inst.to_string(),
            last,
            bid: None,
            ask: None,
            volume_24h: None,
            observed_at: Utc::now(),
        }
    }

    fn opp(symbol: &str, pct: Decimal) -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            symbol: symbol.to_string(),
            price_a: dec!(100),
            price_b: dec!(100) + pct,
            price_spread: pct,
            profit_percent: pct,
            volume_24h: None,
            risk: RiskLevel::Low,
            observed_at: Utc::now(),
        }
    }

    fn limiter(name: &str) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            name,
            Duration::from_millis(1),
            Duration::from_secs(5),
            LimiterConfig::default(),
        ))
    }

    fn engine(dex: MockPriceFeed, cex: Arc<MockTickerFeed>) -> ArbitrageEngine {
        let fetcher = BatchedPriceFetcher::new(
            Arc::new(dex),
            limiter("dex"),
            Arc::new(PriceCache::new()),
            BatchConfig {
                base_backoff: Duration::from_millis(1),
                ..BatchConfig::default()
            },
            &CacheTtls::default(),
        );
        ArbitrageEngine::new(
            Arc::new(fetcher),
            cex,
            limiter("cex"),
            Duration::from_secs(15),
            SymbolRegistry::with_default_watchlist(),
            SpreadThresholds::default(),
        )
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sol_scenario() {
        let thresholds = SpreadThresholds::default();
        let opp = evaluate("sol", dec!(150.00), &ticker("SOL-USDT", dec!(148.50)), None, &thresholds)
            .unwrap();

        assert_eq!(opp.symbol, "SOL");
        assert_eq!(opp.price_spread, dec!(1.50));
        assert_eq!(opp.profit_percent.round_dp(4), dec!(1.0101));
        assert_eq!(opp.risk, RiskLevel::Medium);

        let strict = SpreadThresholds {
            min_spread_percent: dec!(1.02),
            ..SpreadThresholds::default()
        };
        assert!(evaluate("SOL", dec!(150.00), &ticker("SOL-USDT", dec!(148.50)), None, &strict).is_none());
    }

    #[test]
    fn test_spread_formula() {
        for (a, b) in [(dec!(10), dec!(12)), (dec!(12), dec!(10)), (dec!(0.0001), dec!(0.00012)), (dec!(5), dec!(5))] {
            let (spread_abs, pct) = spread(a, b).unwrap();
            assert_eq!(spread_abs, (a - b).abs());
            assert_eq!(pct, (a - b).abs() / a.min(b) * dec!(100));
            assert!(pct >= Decimal::ZERO);
        }
        assert!(spread(dec!(0), dec!(1)).is_none());
        assert!(spread(dec!(1), dec!(0)).is_none());
    }

    #[test]
    fn test_spread_out_of_range_is_dropped() {
        // ratio itself overflows
        assert!(spread(dec!(0.0000000000000000000000001), dec!(100000)).is_none());
        // ratio fits, percent does not
        assert!(spread(dec!(0.00000000000000000000001), dec!(100000)).is_none());
        assert!(spread(dec!(100000), dec!(0.0000000000000000000000001)).is_none());

        let tiny = spread(dec!(0.000001), dec!(1)).unwrap();
        assert_eq!(tiny.1, dec!(99999900));

        let thresholds = SpreadThresholds::default();
        let dust = ticker("DUST-USDT", dec!(100000));
        assert!(evaluate("DUST", dec!(0.0000000000000000000000001), &dust, None, &thresholds).is_none());
    }

    #[test]
    fn test_risk_buckets() {
        let t = SpreadThresholds::default();
        assert_eq!(classify_risk(dec!(0.7), &t), RiskLevel::Low);
        assert_eq!(classify_risk(dec!(1.0), &t), RiskLevel::Low);
        assert_eq!(classify_risk(dec!(1.5), &t), RiskLevel::Medium);
        assert_eq!(classify_risk(dec!(2.0), &t), RiskLevel::Medium);
        assert_eq!(classify_risk(dec!(2.01), &t), RiskLevel::High);
    }

    #[test]
    fn test_dedupe_keeps_larger_spread() {
        let deduped = dedupe_by_symbol(vec![opp("ETH", dec!(0.8)), opp("ETH", dec!(1.4)), opp("SOL", dec!(0.6))]);

        assert_eq!(deduped.len(), 2);
        let eth = deduped.iter().find(|o| o.symbol == "ETH").unwrap();
        assert_eq!(eth.profit_percent, dec!(1.4));
    }

    #[test]
    fn test_rank_sorts_descending_and_truncates() {
        let ranked = rank(
            vec![opp("A", dec!(0.6)), opp("B", dec!(3.2)), opp("C", dec!(1.1)), opp("D", dec!(0.9))],
            None,
        );
        for pair in ranked.windows(2) {
            assert!(pair[0].profit_percent.abs() >= pair[1].profit_percent.abs());
        }
        assert_eq!(ranked[0].symbol, "B");

        let top = rank(ranked, Some(2));
        assert_eq!(top.iter().map(|o| o.symbol.as_str()).collect::<Vec<_>>(), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_find_opportunities_joins_both_venues() {
        let sol = TokenKey::new("501", "So11111111111111111111111111111111111111112");
        let eth = TokenKey::new("1", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let link = TokenKey::new("1", "0x514910771AF9Ca656af840dff83E8264EcF986CA");
        let dex = MockPriceFeed::new("dex")
            .with_price(sol, dec!(150.00))
            .with_price(eth, dec!(3000))
            .with_price(link, dec!(14.50));
        let cex = Arc::new(
            MockTickerFeed::new("cex")
                .with_ticker("SOL-USDT", dec!(148.50), Some(dec!(1000)))
                .with_ticker("ETH-USDC", dec!(3001), None)
                .with_ticker("BTC-USDT", dec!(64000), None),
        );
        let engine = engine(dex, cex.clone());

        let found = engine
            .find_opportunities(&symbols(&["SOL", "eth", "LINK", "BTC", "DOGE", "SOL"]), None)
            .await;

        // ETH spread is below the minimum, LINK has no ticker, BTC no on-chain price, DOGE unknown
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "SOL");
        assert_eq!(found[0].volume_24h, Some(dec!(1000)));
        assert_eq!(found[0].risk, RiskLevel::Medium);

        engine.find_opportunities(&symbols(&["SOL"]), None).await;
        assert_eq!(cex.calls(), 1, "tickers are served from cache on the second cycle");
    }

    #[tokio::test]
    async fn test_dust_price_does_not_abort_cycle() {
        let sol = TokenKey::new("501", "So11111111111111111111111111111111111111112");
        let pepe = TokenKey::new("1", "0x6982508145454Ce325dDbE47a25d4ec3d2311933");
        let dex = MockPriceFeed::new("dex")
            .with_price(sol, dec!(150.00))
            .with_price(pepe, dec!(0.0000000000000000000000001));
        let cex = Arc::new(
            MockTickerFeed::new("cex")
                .with_ticker("SOL-USDT", dec!(148.50), None)
                .with_ticker("PEPE-USDT", dec!(100000), None),
        );
        let engine = engine(dex, cex);

        let found = engine.find_opportunities(&symbols(&["SOL", "PEPE"]), None).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "SOL");
    }

    #[tokio::test]
    async fn test_venues_are_queried_concurrently() {
        let sol = TokenKey::new("501", "So11111111111111111111111111111111111111112");
        let dex = MockPriceFeed::new("dex")
            .with_price(sol, dec!(150.00))
            .with_latency(Duration::from_millis(80));
        let cex = Arc::new(
            MockTickerFeed::new("cex")
                .with_ticker("SOL-USDT", dec!(148.50), None)
                .with_latency(Duration::from_millis(80)),
        );
        let engine = engine(dex, cex);

        let started = std::time::Instant::now();
        let found = engine.find_opportunities(&symbols(&["SOL"]), None).await;

        assert_eq!(found.len(), 1);
        assert!(started.elapsed() < Duration::from_millis(150), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_failing_sources_yield_empty_result() {
        let dex = MockPriceFeed::new("dex").fail_next_calls(100, ProviderError::Server { status: 500 });
        let cex = Arc::new(MockTickerFeed::new("cex").failing(ProviderError::Timeout));
        let engine = engine(dex, cex);

        assert!(engine.find_opportunities(&symbols(&["SOL", "ETH"]), None).await.is_empty());
        assert!(engine.find_opportunities(&[], Some(5)).await.is_empty());
    }

    #[test]
    fn test_registry_resolution() {
        let registry = SymbolRegistry::with_default_watchlist();
        assert_eq!(
            registry.resolve(" sol "),
            Some(&TokenKey::new("501", "So11111111111111111111111111111111111111112"))
        );
        assert!(registry.resolve("DOGE").is_none());
        assert_eq!(registry.symbols().len(), 10);
    }
}
