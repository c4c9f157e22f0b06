use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

use crate::{
    EarningsObservation, FundamentalsRecord, Interval, MarketResult, NewsItem, Period,
    PriceObservation, Symbol,
};

/// Port over the upstream quote / fundamentals / history / earnings providers.
///
/// Implementations normalize provider payloads into the record types of this crate
/// and report every failure as `MarketDataError::DataUnavailable`.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Snapshot of quote and fundamentals fields. Missing fields are `None`.
    async fn fetch_fundamentals(&self, symbol: &Symbol) -> MarketResult<FundamentalsRecord>;

    /// Trading-day series per symbol inside `[start, end]`, ascending by date.
    ///
    /// Symbols that fail individually are left out of the map; an error is returned
    /// only when nothing could be fetched.
    async fn fetch_price_history(
        &self,
        symbols: &BTreeSet<Symbol>,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> MarketResult<HashMap<Symbol, Vec<PriceObservation>>>;

    /// Quarterly earnings reports, in whatever order the provider returns them.
    async fn fetch_earnings_history(&self, symbol: &Symbol) -> MarketResult<Vec<EarningsObservation>>;

    /// Provider-recommended comparable companies, at most `max_peers`, never `symbol` itself.
    async fn resolve_peers(&self, symbol: &Symbol, max_peers: usize) -> MarketResult<Vec<Symbol>>;

    /// Latest headlines, newest first.
    async fn fetch_news(&self, symbol: &Symbol, limit: usize) -> MarketResult<Vec<NewsItem>>;

    /// Chart series for a relative period ending now (e.g. 5 days of 2-minute bars).
    async fn fetch_price_series(
        &self,
        symbol: &Symbol,
        period: Period,
        interval: Interval,
    ) -> MarketResult<Vec<PriceObservation>>;
}
