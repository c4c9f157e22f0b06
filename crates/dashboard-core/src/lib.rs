//! Display-facing entry points: one async call per dashboard panel.

use analysis_core::{
    EarningsObservation, FundamentalsRecord, Interval, MarketDataPort, MarketResult, NewsItem,
    Period, PriceObservation, Symbol,
};
use market_data::MarketDataHub;
use peer_valuation::{
    compute_statistics, recent_quarters, with_timeout, GroupStatistics, PeerComparisonTable,
    PeerValuationEngine,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

pub mod config;
pub use config::DashboardConfig;

/// Install the global `tracing` subscriber: `EnvFilter` from `RUST_LOG` (default `info`),
/// JSON lines when `LOG_FORMAT=json`. Safe to call more than once.
pub fn init_tracing() {
    let json_logging = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let result = if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

pub struct Dashboard {
    port: Arc<dyn MarketDataPort>,
    engine: PeerValuationEngine,
    config: DashboardConfig,
}

impl Dashboard {
    /// Dashboard backed by the live Yahoo Finance / Alpha Vantage hub.
    pub fn new(config: DashboardConfig) -> anyhow::Result<Self> {
        let hub = MarketDataHub::new(&config.market_data_config())?;
        Ok(Self::with_port(Arc::new(hub), config))
    }

    pub fn with_port(port: Arc<dyn MarketDataPort>, config: DashboardConfig) -> Self {
        let engine = PeerValuationEngine::new(Arc::clone(&port), config.valuation_policy());
        Self { port, engine, config }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    async fn bounded<T, F>(&self, symbol: &Symbol, what: &str, fut: F) -> MarketResult<T>
    where
        F: Future<Output = MarketResult<T>>,
    {
        with_timeout(self.engine.policy().fetch_timeout, symbol, what, fut).await
    }

    /// Quote and company profile for the overview panel.
    pub async fn get_security_overview(&self, symbol: &str) -> MarketResult<FundamentalsRecord> {
        let symbol = Symbol::new(symbol)?;
        tracing::info!("Loading overview for {}", symbol);
        self.bounded(&symbol, "fundamentals", self.port.fetch_fundamentals(&symbol))
            .await
    }

    /// Latest headlines, newest first, capped at the configured news limit.
    pub async fn get_recent_news(&self, symbol: &str) -> MarketResult<Vec<NewsItem>> {
        let symbol = Symbol::new(symbol)?;
        let mut news = self
            .bounded(&symbol, "news", self.port.fetch_news(&symbol, self.config.news_limit))
            .await?;
        news.truncate(self.config.news_limit);
        Ok(news)
    }

    /// Chart series, e.g. `(Period::Day5, Interval::Minute2)` for the overview chart.
    pub async fn get_price_series(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> MarketResult<Vec<PriceObservation>> {
        let symbol = Symbol::new(symbol)?;
        self.bounded(
            &symbol,
            "price series",
            self.port.fetch_price_series(&symbol, period, interval),
        )
        .await
    }

    /// Peer table plus group statistics. With `peers` absent or empty the peer set is
    /// discovered through the market data port.
    pub async fn get_peer_comparison(
        &self,
        symbol: &str,
        peers: Option<&[String]>,
    ) -> MarketResult<(PeerComparisonTable, GroupStatistics)> {
        let target = Symbol::new(symbol)?;
        let explicit: Option<BTreeSet<Symbol>> = match peers {
            Some(list) if !list.is_empty() => Some(
                list.iter()
                    .map(|p| Symbol::new(p))
                    .collect::<MarketResult<BTreeSet<_>>>()?,
            ),
            _ => None,
        };

        let table = self.engine.build_comparison(&target, explicit.as_ref()).await?;
        let stats = compute_statistics(&table, &target, self.engine.policy().mean_pool);
        Ok((table, stats))
    }

    /// The `quarters` most recent earnings reports, newest first.
    pub async fn get_earnings_history(&self, symbol: &str, quarters: usize) -> MarketResult<Vec<EarningsObservation>> {
        let symbol = Symbol::new(symbol)?;
        let earnings = self
            .bounded(&symbol, "earnings history", self.port.fetch_earnings_history(&symbol))
            .await?;
        let mut recent = recent_quarters(&earnings, quarters);
        recent.reverse();
        Ok(recent)
    }
}
