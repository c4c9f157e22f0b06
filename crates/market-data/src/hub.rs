use analysis_core::{
    EarningsObservation, FundamentalsRecord, Interval, MarketDataError, MarketDataPort,
    MarketResult, NewsItem, Period, PriceObservation, Symbol,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::alpha_vantage::AlphaVantageClient;
use crate::error::ClientResult;
use crate::yahoo::{self, YahooFinanceClient};

/// Provider endpoints, keys and throttles for [`MarketDataHub`].
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub yahoo_base_url: String,
    pub yahoo_requests_per_minute: usize,
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_requests_per_minute: usize,
    pub request_timeout: Duration,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            yahoo_base_url: yahoo::DEFAULT_BASE_URL.to_string(),
            yahoo_requests_per_minute: 120,
            alpha_vantage_api_key: None,
            alpha_vantage_requests_per_minute: 5,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Production [`MarketDataPort`]: Yahoo Finance for everything, with Alpha Vantage
/// earnings taking precedence when an API key is configured.
#[derive(Clone)]
pub struct MarketDataHub {
    yahoo: YahooFinanceClient,
    alpha_vantage: Option<AlphaVantageClient>,
    request_timeout: Duration,
}

impl MarketDataHub {
    pub fn new(config: &MarketDataConfig) -> ClientResult<Self> {
        let yahoo = YahooFinanceClient::new(
            config.yahoo_base_url.clone(),
            config.request_timeout,
            config.yahoo_requests_per_minute,
        )?;

        let alpha_vantage = match config.alpha_vantage_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Some(AlphaVantageClient::new(
                key.trim().to_string(),
                config.request_timeout,
                config.alpha_vantage_requests_per_minute,
            )?),
            _ => None,
        };

        tracing::info!(
            "Market data hub ready (Yahoo Finance{})",
            if alpha_vantage.is_some() { " + Alpha Vantage earnings" } else { "" }
        );

        Ok(Self {
            yahoo,
            alpha_vantage,
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl MarketDataPort for MarketDataHub {
    async fn fetch_fundamentals(&self, symbol: &Symbol) -> MarketResult<FundamentalsRecord> {
        self.yahoo
            .get_fundamentals(symbol)
            .await
            .map_err(|e| e.for_symbol(symbol))
    }

    async fn fetch_price_history(
        &self,
        symbols: &BTreeSet<Symbol>,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> MarketResult<HashMap<Symbol, Vec<PriceObservation>>> {
        // Bounds rate-limiter wait plus request, per symbol.
        let futures = symbols.iter().map(|symbol| async move {
            let result = tokio::time::timeout(
                self.request_timeout,
                self.yahoo.get_chart_range(symbol, start, end, interval),
            )
            .await;
            (symbol.clone(), result)
        });

        let mut series = HashMap::with_capacity(symbols.len());
        for (symbol, result) in join_all(futures).await {
            match result {
                Ok(Ok(bars)) => {
                    series.insert(symbol, bars);
                }
                Ok(Err(e)) => tracing::warn!("Price history for {} ({} to {}) failed: {}", symbol, start, end, e),
                Err(_) => tracing::warn!("Price history for {} ({} to {}) timed out", symbol, start, end),
            }
        }

        if series.is_empty() {
            let joined: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
            return Err(MarketDataError::unavailable(
                joined.join(","),
                format!("no price history between {} and {}", start, end),
            ));
        }
        Ok(series)
    }

    async fn fetch_earnings_history(&self, symbol: &Symbol) -> MarketResult<Vec<EarningsObservation>> {
        if let Some(av) = &self.alpha_vantage {
            match av.get_earnings(symbol).await {
                Ok(earnings) => return Ok(earnings),
                Err(e) => tracing::warn!("Alpha Vantage earnings for {} failed, using Yahoo: {}", symbol, e),
            }
        }

        self.yahoo
            .get_earnings_history(symbol)
            .await
            .map_err(|e| e.for_symbol(symbol))
    }

    async fn resolve_peers(&self, symbol: &Symbol, max_peers: usize) -> MarketResult<Vec<Symbol>> {
        let recommended = self
            .yahoo
            .get_recommendations(symbol)
            .await
            .map_err(|e| e.for_symbol(symbol))?;

        let mut seen = BTreeSet::new();
        let peers: Vec<Symbol> = recommended
            .into_iter()
            .filter(|peer| peer != symbol && seen.insert(peer.clone()))
            .take(max_peers)
            .collect();

        if peers.is_empty() {
            return Err(MarketDataError::unavailable(symbol, "no comparable companies recommended"));
        }
        Ok(peers)
    }

    async fn fetch_news(&self, symbol: &Symbol, limit: usize) -> MarketResult<Vec<NewsItem>> {
        self.yahoo
            .get_news(symbol, limit)
            .await
            .map_err(|e| e.for_symbol(symbol))
    }

    async fn fetch_price_series(
        &self,
        symbol: &Symbol,
        period: Period,
        interval: Interval,
    ) -> MarketResult<Vec<PriceObservation>> {
        self.yahoo
            .get_chart_period(symbol, period, interval)
            .await
            .map_err(|e| e.for_symbol(symbol))
    }
}
