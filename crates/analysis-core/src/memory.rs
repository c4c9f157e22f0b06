//! In-memory `MarketDataPort` for tests of code built on top of the port.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::{
    EarningsObservation, FundamentalsRecord, Interval, MarketDataError, MarketDataPort,
    MarketResult, NewsItem, Period, PriceObservation, Symbol,
};

/// A recorded `fetch_price_history` call.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub symbols: Vec<Symbol>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Default)]
pub struct StaticMarketData {
    fundamentals: HashMap<Symbol, FundamentalsRecord>,
    earnings: HashMap<Symbol, Vec<EarningsObservation>>,
    prices: HashMap<Symbol, Vec<PriceObservation>>,
    peers: HashMap<Symbol, Vec<Symbol>>,
    news: HashMap<Symbol, Vec<NewsItem>>,
    failing: HashSet<Symbol>,
    delays: HashMap<Symbol, Duration>,
    failing_batches: bool,
    batch_delay: Option<Duration>,
    history_requests: Mutex<Vec<HistoryRequest>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fundamentals(mut self, record: FundamentalsRecord) -> Self {
        self.fundamentals.insert(record.symbol.clone(), record);
        self
    }

    pub fn with_earnings(mut self, symbol: &Symbol, earnings: Vec<EarningsObservation>) -> Self {
        self.earnings.insert(symbol.clone(), earnings);
        self
    }

    pub fn with_prices(mut self, symbol: &Symbol, mut prices: Vec<PriceObservation>) -> Self {
        prices.sort_by_key(|p| p.trading_date);
        self.prices.insert(symbol.clone(), prices);
        self
    }

    pub fn with_peers(mut self, symbol: &Symbol, peers: Vec<Symbol>) -> Self {
        self.peers.insert(symbol.clone(), peers);
        self
    }

    pub fn with_news(mut self, symbol: &Symbol, news: Vec<NewsItem>) -> Self {
        self.news.insert(symbol.clone(), news);
        self
    }

    /// Every call touching `symbol` fails with `DataUnavailable`.
    pub fn failing(mut self, symbol: &Symbol) -> Self {
        self.failing.insert(symbol.clone());
        self
    }

    /// Every call touching `symbol` sleeps first.
    pub fn with_delay(mut self, symbol: &Symbol, delay: Duration) -> Self {
        self.delays.insert(symbol.clone(), delay);
        self
    }

    /// Multi-symbol `fetch_price_history` calls fail; single-symbol calls still succeed.
    pub fn failing_batches(mut self) -> Self {
        self.failing_batches = true;
        self
    }

    /// Multi-symbol `fetch_price_history` calls sleep first.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    pub fn history_requests(&self) -> Vec<HistoryRequest> {
        self.history_requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    async fn gate(&self, symbol: &Symbol) -> MarketResult<()> {
        if let Some(delay) = self.delays.get(symbol) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(symbol) {
            return Err(MarketDataError::unavailable(symbol, "simulated provider failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataPort for StaticMarketData {
    async fn fetch_fundamentals(&self, symbol: &Symbol) -> MarketResult<FundamentalsRecord> {
        self.gate(symbol).await?;
        self.fundamentals
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::unavailable(symbol, "unknown symbol"))
    }

    async fn fetch_price_history(
        &self,
        symbols: &BTreeSet<Symbol>,
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> MarketResult<HashMap<Symbol, Vec<PriceObservation>>> {
        if let Ok(mut requests) = self.history_requests.lock() {
            requests.push(HistoryRequest {
                symbols: symbols.iter().cloned().collect(),
                start,
                end,
            });
        }

        if symbols.len() > 1 {
            if let Some(delay) = self.batch_delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing_batches {
                return Err(MarketDataError::unavailable(
                    symbols.iter().map(Symbol::as_str).collect::<Vec<_>>().join(","),
                    "simulated batch failure",
                ));
            }
        }

        let mut out = HashMap::new();
        for symbol in symbols {
            if self.gate(symbol).await.is_err() {
                continue;
            }
            let series: Vec<PriceObservation> = self
                .prices
                .get(symbol)
                .map(|prices| {
                    prices
                        .iter()
                        .filter(|p| p.trading_date >= start && p.trading_date <= end)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if !series.is_empty() {
                out.insert(symbol.clone(), series);
            }
        }

        if out.is_empty() {
            let joined: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
            return Err(MarketDataError::unavailable(
                joined.join(","),
                format!("no price history between {start} and {end}"),
            ));
        }
        Ok(out)
    }

    async fn fetch_earnings_history(&self, symbol: &Symbol) -> MarketResult<Vec<EarningsObservation>> {
        self.gate(symbol).await?;
        match self.earnings.get(symbol) {
            Some(earnings) if !earnings.is_empty() => Ok(earnings.clone()),
            _ => Err(MarketDataError::unavailable(symbol, "no earnings history")),
        }
    }

    async fn resolve_peers(&self, symbol: &Symbol, max_peers: usize) -> MarketResult<Vec<Symbol>> {
        self.gate(symbol).await?;
        let peers = self
            .peers
            .get(symbol)
            .ok_or_else(|| MarketDataError::unavailable(symbol, "no recommendations"))?;
        Ok(peers
            .iter()
            .filter(|peer| *peer != symbol)
            .take(max_peers)
            .cloned()
            .collect())
    }

    async fn fetch_news(&self, symbol: &Symbol, limit: usize) -> MarketResult<Vec<NewsItem>> {
        self.gate(symbol).await?;
        Ok(self
            .news
            .get(symbol)
            .map(|items| items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_price_series(
        &self,
        symbol: &Symbol,
        _period: Period,
        _interval: Interval,
    ) -> MarketResult<Vec<PriceObservation>> {
        self.gate(symbol).await?;
        self.prices
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::unavailable(symbol, "no chart data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_partial_history_fetch_returns_successful_symbols() {
        let a = Symbol::new("A").unwrap();
        let b = Symbol::new("B").unwrap();
        let port = StaticMarketData::new()
            .with_prices(&a, vec![PriceObservation::daily(a.clone(), d(2023, 7, 3), 10.0)])
            .failing(&b);

        let symbols: BTreeSet<Symbol> = [a.clone(), b.clone()].into_iter().collect();
        let map = port
            .fetch_price_history(&symbols, d(2023, 7, 1), d(2023, 7, 10), Interval::Day1)
            .await
            .unwrap();

        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&a));
        assert_eq!(port.history_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_batches_only_affect_multi_symbol_calls() {
        let a = Symbol::new("A").unwrap();
        let b = Symbol::new("B").unwrap();
        let port = StaticMarketData::new()
            .with_prices(&a, vec![PriceObservation::daily(a.clone(), d(2023, 7, 3), 10.0)])
            .with_prices(&b, vec![PriceObservation::daily(b.clone(), d(2023, 7, 3), 20.0)])
            .failing_batches();

        let both: BTreeSet<Symbol> = [a.clone(), b.clone()].into_iter().collect();
        assert!(port
            .fetch_price_history(&both, d(2023, 7, 1), d(2023, 7, 10), Interval::Day1)
            .await
            .is_err());

        let single: BTreeSet<Symbol> = [a.clone()].into_iter().collect();
        let map = port
            .fetch_price_history(&single, d(2023, 7, 1), d(2023, 7, 10), Interval::Day1)
            .await
            .unwrap();
        assert_eq!(map[&a].len(), 1);
    }

    #[tokio::test]
    async fn test_peers_exclude_self_and_truncate() {
        let a = Symbol::new("A").unwrap();
        let peers = vec![a.clone(), Symbol::new("B").unwrap(), Symbol::new("C").unwrap()];
        let port = StaticMarketData::new().with_peers(&a, peers);
        let resolved = port.resolve_peers(&a, 1).await.unwrap();
        assert_eq!(resolved, vec![Symbol::new("B").unwrap()]);
    }
}
