//! main.rs - Entry point for the market arbitrage scanner
//!
//! Loads configuration from `ARB_*` environment variables, selects the
//! default chain, then periodically re-prices it and scans the watchlist
//! for cross-venue spreads. Set `ARB_DEMO=true` to run offline.

use log::{debug, error, info, warn};
use market_arb_engine::{ArbitrageOpportunity, ChainSnapshot, ChainState, EngineConfig, MarketDataService, NAME, VERSION};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    println!();
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║     Market Arbitrage Engine v{:<28}║", VERSION);
    println!("║     On-chain aggregator vs centralized exchange          ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    info!("Starting {} v{}", NAME, VERSION);

    let config = EngineConfig::from_env()?;
    if config.demo_mode {
        warn!("Demo mode: using in-memory mock feeds");
    }
    info!("  - On-chain source: {} ({})", config.dex.name, config.dex.base_url);
    info!("  - CEX source: {} ({})", config.cex.name, config.cex.base_url);
    info!(
        "  - Min spread: {}% | batch size: {} | priced tokens: {}",
        config.thresholds.min_spread_percent,
        config.batch.max_batch_size,
        config.orchestrator.max_priced_tokens
    );

    let scan_interval = config.scan_interval;
    let default_chain = config.orchestrator.default_chain.clone();
    let service = MarketDataService::from_config(config)?;

    service.subscribe(Arc::new(|state: &ChainState, snapshot: &ChainSnapshot| {
        debug!("Chain state {:?}: {} tokens", state, snapshot.tokens.len());
    }));

    match service.select_chain(&default_chain).await {
        Ok(()) => display_snapshot(&service.snapshot()),
        Err(e) => {
            error!("✗ Initial chain load failed: {}", e);
            warn!("Will retry in the main loop...");
        }
    }

    info!("🔄 Starting scan loop (interval: {:?})...", scan_interval);
    let mut interval = tokio::time::interval(scan_interval);
    let mut scan_count: u64 = 0;

    loop {
        interval.tick().await;
        scan_count += 1;
        info!("📡 Scan #{}", scan_count);

        let chain_result = if service.chain_state().is_ready() {
            service.refresh_chain_prices().await
        } else {
            service.select_chain(&default_chain).await
        };
        if let Err(e) = chain_result {
            error!("✗ Chain refresh failed: {}", e);
        }

        let opportunities = service.get_arbitrage_opportunities(None, Some(10)).await;
        display_opportunities(&opportunities);

        if scan_count % 10 == 0 {
            info!("📈 Stats: {} scans completed", scan_count);
        }
    }
}

fn display_snapshot(snapshot: &ChainSnapshot) {
    let chain = match &snapshot.chain {
        Some(chain) => chain.to_string(),
        None => {
            warn!("No chain loaded");
            return;
        }
    };

    println!();
    println!("┌──────────────────────────────────────────────────────────────┐");
    println!("│ {:<60} │", format!("Tokens on {}", chain));
    println!("├──────────────┬───────────────────────┬───────────────────────┤");
    println!("│ Symbol       │ Price (USD)           │ 24h change (%)        │");
    println!("├──────────────┼───────────────────────┼───────────────────────┤");
    for (token, quote) in snapshot.priced_tokens() {
        let change = quote
            .price_change
            .h24
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("│ {:12} │ {:>21} │ {:>21} │", token.symbol, quote.price, change);
    }
    println!("└──────────────┴───────────────────────┴───────────────────────┘");
    println!();
    info!(
        "Total tokens: {} (priced: {})",
        snapshot.tokens.len(),
        snapshot.prices.len()
    );
}

fn display_opportunities(opportunities: &[ArbitrageOpportunity]) {
    if opportunities.is_empty() {
        info!("No spreads above threshold this scan");
        return;
    }

    for opp in opportunities {
        info!("💡 {} | buy on {:?}", opp, opp.buy_venue());
    }
    info!("🎯 {} opportunities detected", opportunities.len());
}
