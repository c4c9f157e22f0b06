use analysis_core::{
    EarningsObservation, FundamentalsRecord, Interval, MarketDataError, MarketDataPort,
    MarketResult, PriceObservation, Symbol,
};
use chrono::{Days, NaiveDate, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::alignment::DateAligner;
use crate::models::{PeerComparisonRow, PeerComparisonTable, PeerSource, SymbolFailure};
use crate::multiples::{current_pe, recent_quarters, trailing_12m_eps, HistoricalMultipleCalculator};
use crate::policy::ValuationPolicy;
use crate::with_timeout;

/// Everything fetched for one symbol before rows are derived.
struct SymbolInputs {
    fundamentals: FundamentalsRecord,
    earnings: Vec<EarningsObservation>,
}

/// Builds peer comparison tables from a market data port.
pub struct PeerValuationEngine {
    port: Arc<dyn MarketDataPort>,
    policy: ValuationPolicy,
}

impl PeerValuationEngine {
    pub fn new(port: Arc<dyn MarketDataPort>, policy: ValuationPolicy) -> Self {
        Self { port, policy }
    }

    pub fn policy(&self) -> &ValuationPolicy {
        &self.policy
    }

    /// Comparison table for `target` and its peers.
    ///
    /// Peers that fail at any step are dropped and listed in `failures`; only a
    /// failure to fetch the target itself fails the whole call.
    pub async fn build_comparison(
        &self,
        target: &Symbol,
        explicit_peers: Option<&BTreeSet<Symbol>>,
    ) -> MarketResult<PeerComparisonTable> {
        let (peers, peer_source, peer_discovery_error) = self.discover_peers(target, explicit_peers).await;

        // Target first, no duplicates.
        let mut seen = BTreeSet::new();
        let symbols: Vec<Symbol> = std::iter::once(target.clone())
            .chain(peers)
            .filter(|s| seen.insert(s.clone()))
            .collect();

        tracing::info!(
            "Building peer comparison for {} with {} peers ({:?})",
            target,
            symbols.len() - 1,
            peer_source
        );

        let parallelism = self.policy.max_parallelism.unwrap_or(symbols.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(parallelism));

        let fetched: DashMap<Symbol, MarketResult<SymbolInputs>> = DashMap::new();
        join_all(symbols.iter().map(|symbol| {
            let semaphore = Arc::clone(&semaphore);
            let fetched = &fetched;
            async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => self.fetch_inputs(symbol).await,
                    Err(e) => Err(MarketDataError::unavailable(symbol, e.to_string())),
                };
                fetched.insert(symbol.clone(), result);
            }
        }))
        .await;

        let mut inputs: Vec<(Symbol, SymbolInputs)> = Vec::with_capacity(symbols.len());
        let mut failures = Vec::new();
        for symbol in &symbols {
            let Some((symbol, result)) = fetched.remove(symbol) else {
                continue;
            };
            match result {
                Ok(input) => inputs.push((symbol, input)),
                Err(e) => self.drop_symbol(target, symbol, e, &mut failures)?,
            }
        }

        if !inputs.iter().any(|(s, _)| s == target) {
            return Err(MarketDataError::unavailable(target, "target fetch produced no result"));
        }

        let history = self.fetch_history(&inputs).await;

        let derived: DashMap<Symbol, MarketResult<PeerComparisonRow>> = DashMap::new();
        join_all(inputs.into_iter().map(|(symbol, input)| {
            let semaphore = Arc::clone(&semaphore);
            let derived = &derived;
            let bulk = history.get(&symbol);
            let is_target = symbol == *target;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let row = self
                    .derive_row(input, bulk.map(Vec::as_slice).unwrap_or(&[]), is_target)
                    .await;
                derived.insert(symbol, if bulk.is_none() { unpriced(row) } else { Ok(row) });
            }
        }))
        .await;

        let mut rows = BTreeMap::new();
        for symbol in &symbols {
            let Some((symbol, result)) = derived.remove(symbol) else {
                continue;
            };
            match result {
                Ok(row) => {
                    rows.insert(symbol, row);
                }
                Err(e) => self.drop_symbol(target, symbol, e, &mut failures)?,
            }
        }

        failures.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let table = PeerComparisonTable {
            target: target.clone(),
            rows,
            peer_source,
            peer_discovery_error,
            failures,
        };

        if let Some(notice) = table.batch_notice() {
            tracing::warn!("{}: {}", target, notice);
        }
        tracing::info!("Peer comparison for {} complete: {} rows", target, table.rows.len());

        Ok(table)
    }

    /// Record a dropped peer, or fail the build if `symbol` is the target.
    fn drop_symbol(
        &self,
        target: &Symbol,
        symbol: Symbol,
        error: MarketDataError,
        failures: &mut Vec<SymbolFailure>,
    ) -> MarketResult<()> {
        if symbol == *target {
            tracing::warn!("Target {} could not be fetched: {}", target, error);
            return Err(error);
        }
        tracing::warn!("Dropping peer {}: {}", symbol, error);
        failures.push(SymbolFailure {
            symbol,
            reason: error.to_string(),
        });
        Ok(())
    }

    async fn discover_peers(
        &self,
        target: &Symbol,
        explicit_peers: Option<&BTreeSet<Symbol>>,
    ) -> (Vec<Symbol>, PeerSource, Option<String>) {
        if let Some(peers) = explicit_peers {
            return (peers.iter().cloned().collect(), PeerSource::Explicit, None);
        }

        let resolved = with_timeout(
            self.policy.fetch_timeout,
            target,
            "peer discovery",
            self.port.resolve_peers(target, self.policy.max_peers),
        )
        .await;

        match resolved {
            Ok(peers) => (peers, PeerSource::Recommended, None),
            Err(e) => {
                tracing::warn!(
                    "Peer discovery for {} failed, using {} fallback peers: {}",
                    target,
                    self.policy.fallback_peers.len(),
                    e
                );
                (self.policy.fallback_peers.clone(), PeerSource::Fallback, Some(e.to_string()))
            }
        }
    }

    async fn fetch_inputs(&self, symbol: &Symbol) -> MarketResult<SymbolInputs> {
        let timeout = self.policy.fetch_timeout;
        let (fundamentals, earnings) = tokio::join!(
            with_timeout(timeout, symbol, "fundamentals", self.port.fetch_fundamentals(symbol)),
            with_timeout(timeout, symbol, "earnings history", self.port.fetch_earnings_history(symbol)),
        );

        let earnings = earnings?;
        if earnings.is_empty() {
            return Err(MarketDataError::unavailable(symbol, "no earnings history"));
        }

        Ok(SymbolInputs {
            fundamentals: fundamentals?,
            earnings,
        })
    }

    /// Report-date span of the lookback window across all symbols, padded on both
    /// sides, end capped at today.
    fn history_window(&self, inputs: &[(Symbol, SymbolInputs)]) -> Option<(NaiveDate, NaiveDate)> {
        let dates: Vec<NaiveDate> = inputs
            .iter()
            .flat_map(|(_, input)| recent_quarters(&input.earnings, self.policy.lookback_quarters))
            .map(|e| e.report_date)
            .collect();

        let padding = Days::new(u64::from(self.policy.history_padding_days));
        let earliest = dates.iter().min()?;
        let latest = dates.iter().max()?;
        let start = earliest.checked_sub_days(padding).unwrap_or(*earliest);
        let end = latest
            .checked_add_days(padding)
            .unwrap_or(*latest)
            .min(Utc::now().date_naive());

        (start <= end).then_some((start, end))
    }

    async fn fetch_history(&self, inputs: &[(Symbol, SymbolInputs)]) -> HashMap<Symbol, Vec<PriceObservation>> {
        let Some((start, end)) = self.history_window(inputs) else {
            return HashMap::new();
        };
        let symbols: BTreeSet<Symbol> = inputs.iter().map(|(s, _)| s.clone()).collect();
        let label = symbols.iter().map(Symbol::as_str).collect::<Vec<_>>().join(",");

        tracing::debug!("Fetching price history for {} from {} to {}", label, start, end);
        // Each symbol is bounded by the provider; this caps the batch as a whole.
        let fetched = with_timeout(
            self.policy.fetch_timeout.saturating_mul(2),
            &label,
            "price history",
            self.port.fetch_price_history(&symbols, start, end, Interval::Day1),
        )
        .await;

        match fetched {
            Ok(mut history) => {
                for series in history.values_mut() {
                    series.sort_by_key(|p| p.trading_date);
                }
                history
            }
            Err(e) => {
                // Every report falls through to the point fetch.
                tracing::warn!("Batch price history failed: {}", e);
                HashMap::new()
            }
        }
    }

    async fn derive_row(&self, input: SymbolInputs, prices: &[PriceObservation], is_target: bool) -> PeerComparisonRow {
        let symbol = input.fundamentals.symbol.clone();
        let calculator = HistoricalMultipleCalculator::new(
            DateAligner::new(self.port.as_ref(), self.policy.alignment, self.policy.fetch_timeout),
            self.policy.lookback_quarters,
        );
        let historical = calculator.compute(&symbol, &input.earnings, prices).await;

        PeerComparisonRow {
            is_target,
            current_pe_multiple: current_pe(&input.fundamentals),
            trailing_12m_eps: trailing_12m_eps(&input.earnings),
            historical_average_pe: historical.average_multiple(),
            eps_trend: recent_quarters(&input.earnings, self.policy.lookback_quarters)
                .iter()
                .map(|e| e.reported_eps)
                .collect(),
            historical,
            fundamentals: input.fundamentals,
        }
    }
}

/// A row with no bulk prices and no resolved report has no price data at all.
fn unpriced(row: PeerComparisonRow) -> MarketResult<PeerComparisonRow> {
    if !row.historical.points.is_empty() || row.historical.unresolved.is_empty() {
        return Ok(row);
    }
    let reasons: Vec<&str> = row.historical.unresolved.iter().map(|u| u.reason.as_str()).collect();
    Err(MarketDataError::unavailable(
        row.symbol(),
        format!("no price history: {}", reasons.join("; ")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlignmentSource;
    use analysis_core::memory::StaticMarketData;
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn fundamentals(symbol: &Symbol, price: f64, eps: f64) -> FundamentalsRecord {
        let mut record = FundamentalsRecord::empty(symbol.clone());
        record.current_price = Some(price);
        record.trailing_eps = Some(eps);
        record.market_cap = Some(10_000_000_000.0);
        record
    }

    /// A symbol with two quarterly reports and daily closes around them.
    fn with_symbol(port: StaticMarketData, symbol: &Symbol, price: f64, eps: f64) -> StaticMarketData {
        let earnings = vec![
            EarningsObservation::new(symbol.clone(), d(2023, 7, 1), eps),
            EarningsObservation::new(symbol.clone(), d(2023, 4, 3), eps),
        ];
        let prices = vec![
            PriceObservation::daily(symbol.clone(), d(2023, 3, 31), price),
            PriceObservation::daily(symbol.clone(), d(2023, 4, 3), price),
            PriceObservation::daily(symbol.clone(), d(2023, 6, 30), price),
            PriceObservation::daily(symbol.clone(), d(2023, 7, 3), price),
        ];
        port.with_fundamentals(fundamentals(symbol, price, eps))
            .with_earnings(symbol, earnings)
            .with_prices(symbol, prices)
    }

    fn engine(port: StaticMarketData) -> (Arc<StaticMarketData>, PeerValuationEngine) {
        let port = Arc::new(port);
        let policy = ValuationPolicy {
            fetch_timeout: Duration::from_millis(200),
            ..ValuationPolicy::default()
        };
        (port.clone(), PeerValuationEngine::new(port, policy))
    }

    #[tokio::test]
    async fn test_acme_scenario() {
        let (acme, x, y) = (sym("ACME"), sym("X"), sym("Y"));
        let port = StaticMarketData::new();
        let port = with_symbol(port, &acme, 20.0, 2.0);
        let port = with_symbol(port, &x, 16.0, 2.0);
        let port = with_symbol(port, &y, 24.0, 2.0).with_peers(&acme, vec![x.clone(), y.clone()]);
        let (_, engine) = engine(port);

        let table = engine.build_comparison(&acme, None).await.unwrap();

        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.peer_source, PeerSource::Recommended);
        assert_eq!(table.target_row().unwrap().current_pe_multiple, Some(10.0));
        assert_eq!(table.rows[&x].current_pe_multiple, Some(8.0));
        assert_eq!(table.rows[&y].current_pe_multiple, Some(12.0));
        assert!(table.target_row().unwrap().is_target);
        assert!(table.batch_notice().is_none());

        let ordered: Vec<&str> = table.ordered_rows().map(|r| r.symbol().as_str()).collect();
        assert_eq!(ordered, vec!["ACME", "X", "Y"]);
    }

    #[tokio::test]
    async fn test_failed_peer_is_dropped_and_reported() {
        let (a, b, c, e) = (sym("A"), sym("B"), sym("C"), sym("E"));
        let port = StaticMarketData::new();
        let port = with_symbol(port, &a, 20.0, 2.0);
        let port = with_symbol(port, &b, 30.0, 2.0);
        let port = with_symbol(port, &c, 30.0, 2.0).failing(&c);
        let port = with_symbol(port, &e, 40.0, 2.0);
        let (_, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [b.clone(), c.clone(), e.clone()].into_iter().collect();
        let table = engine.build_comparison(&a, Some(&peers)).await.unwrap();

        assert_eq!(table.rows.len(), 3);
        assert!(!table.rows.contains_key(&c));
        assert_eq!(table.failures.len(), 1);
        assert_eq!(table.failures[0].symbol, c);
        assert_eq!(
            table.batch_notice(),
            Some(MarketDataError::PartialBatchFailure { dropped: vec!["C".to_string()] })
        );
    }

    #[tokio::test]
    async fn test_target_failure_fails_the_build() {
        let (a, b) = (sym("A"), sym("B"));
        let port = with_symbol(StaticMarketData::new(), &b, 10.0, 1.0).failing(&a);
        let (_, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [b].into_iter().collect();
        let err = engine.build_comparison(&a, Some(&peers)).await.unwrap_err();
        assert!(matches!(err, MarketDataError::DataUnavailable { ref symbol, .. } if symbol == "A"));
    }

    #[tokio::test]
    async fn test_slow_peer_times_out_as_unavailable() {
        let (a, slow) = (sym("A"), sym("SLOW"));
        let port = with_symbol(StaticMarketData::new(), &a, 20.0, 2.0);
        let port = with_symbol(port, &slow, 20.0, 2.0).with_delay(&slow, Duration::from_secs(2));
        let (_, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [slow.clone()].into_iter().collect();
        let table = engine.build_comparison(&a, Some(&peers)).await.unwrap();

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.failures[0].symbol, slow);
        assert!(table.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_discovery_failure_uses_fallback_peers() {
        let (a, b) = (sym("A"), sym("B"));
        let port = with_symbol(StaticMarketData::new(), &a, 20.0, 2.0);
        let port = with_symbol(port, &b, 20.0, 2.0);
        let port = Arc::new(port);
        let policy = ValuationPolicy {
            fallback_peers: vec![b.clone(), a.clone()],
            ..ValuationPolicy::default()
        };
        let engine = PeerValuationEngine::new(port, policy);

        let table = engine.build_comparison(&a, None).await.unwrap();

        assert_eq!(table.peer_source, PeerSource::Fallback);
        assert!(table.peer_discovery_error.is_some());
        assert_eq!(table.peer_symbols(), vec![&b]);
    }

    #[tokio::test]
    async fn test_history_is_fetched_in_one_padded_batch() {
        let (a, b) = (sym("A"), sym("B"));
        let port = with_symbol(StaticMarketData::new(), &a, 20.0, 2.0);
        let port = with_symbol(port, &b, 30.0, 3.0);
        let (port, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [b.clone()].into_iter().collect();
        let table = engine.build_comparison(&a, Some(&peers)).await.unwrap();

        let requests = port.history_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].symbols, vec![a.clone(), b.clone()]);
        assert_eq!(requests[0].start, d(2023, 3, 29));
        assert_eq!(requests[0].end, d(2023, 7, 6));

        // Saturday 2023-07-01 report priced at Monday 2023-07-03.
        let row = &table.rows[&b];
        assert_eq!(row.historical.points.len(), 2);
        assert_eq!(row.historical.points[1].aligned_date, d(2023, 7, 3));
        assert_eq!(row.historical_average_pe, Some(10.0));
        assert_eq!(row.eps_trend, vec![3.0, 3.0]);
        assert_eq!(row.trailing_12m_eps, Some(3.0));
    }

    #[tokio::test]
    async fn test_peer_without_any_prices_is_dropped() {
        let (a, b) = (sym("A"), sym("B"));
        let port = with_symbol(StaticMarketData::new(), &a, 20.0, 2.0)
            .with_fundamentals(fundamentals(&b, 30.0, 3.0))
            .with_earnings(&b, vec![EarningsObservation::new(b.clone(), d(2023, 7, 1), 3.0)]);
        let (_, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [b.clone()].into_iter().collect();
        let table = engine.build_comparison(&a, Some(&peers)).await.unwrap();

        assert_eq!(table.rows.len(), 1);
        assert!(!table.rows.contains_key(&b));
        assert_eq!(table.failures.len(), 1);
        assert_eq!(table.failures[0].symbol, b);
        assert!(table.failures[0].reason.contains("no price history"));
        assert_eq!(
            table.batch_notice(),
            Some(MarketDataError::PartialBatchFailure { dropped: vec!["B".to_string()] })
        );
    }

    #[tokio::test]
    async fn test_target_without_any_prices_fails_the_build() {
        let (a, b) = (sym("A"), sym("B"));
        let port = with_symbol(StaticMarketData::new(), &b, 20.0, 2.0)
            .with_fundamentals(fundamentals(&a, 30.0, 3.0))
            .with_earnings(&a, vec![EarningsObservation::new(a.clone(), d(2023, 7, 1), 3.0)]);
        let (_, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [b].into_iter().collect();
        let err = engine.build_comparison(&a, Some(&peers)).await.unwrap_err();
        assert!(matches!(err, MarketDataError::DataUnavailable { ref symbol, .. } if symbol == "A"));
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_to_point_fetches() {
        let (a, b) = (sym("A"), sym("B"));
        let port = with_symbol(StaticMarketData::new(), &a, 20.0, 2.0);
        let port = with_symbol(port, &b, 30.0, 3.0).failing_batches();
        let (port, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [b.clone()].into_iter().collect();
        let table = engine.build_comparison(&a, Some(&peers)).await.unwrap();

        assert!(table.failures.is_empty());
        for row in table.rows.values() {
            assert_eq!(row.historical.points.len(), 2);
            assert!(row
                .historical
                .points
                .iter()
                .all(|p| p.resolution == AlignmentSource::SecondaryFetch));
        }
        assert_eq!(table.rows[&b].historical.points[1].aligned_date, d(2023, 7, 3));
        assert_eq!(table.rows[&b].historical_average_pe, Some(10.0));

        let requests = port.history_requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests.iter().filter(|r| r.symbols.len() == 1).count(), 4);
    }

    #[tokio::test]
    async fn test_slow_batch_within_headroom_keeps_bulk_series() {
        let (a, b) = (sym("A"), sym("B"));
        let port = with_symbol(StaticMarketData::new(), &a, 20.0, 2.0);
        let port = with_symbol(port, &b, 30.0, 3.0).with_batch_delay(Duration::from_millis(300));
        let (port, engine) = engine(port);

        let peers: BTreeSet<Symbol> = [b.clone()].into_iter().collect();
        let table = engine.build_comparison(&a, Some(&peers)).await.unwrap();

        assert_eq!(port.history_requests().len(), 1);
        let resolutions: Vec<AlignmentSource> = table.rows[&a]
            .historical
            .points
            .iter()
            .map(|p| p.resolution)
            .collect();
        assert_eq!(resolutions, vec![AlignmentSource::Exact, AlignmentSource::ForwardProbe]);
    }

    #[tokio::test]
    async fn test_bounded_parallelism_still_completes() {
        let (a, b, c) = (sym("A"), sym("B"), sym("C"));
        let port = with_symbol(StaticMarketData::new(), &a, 20.0, 2.0);
        let port = with_symbol(port, &b, 20.0, 2.0);
        let port = with_symbol(port, &c, 20.0, 2.0);
        let policy = ValuationPolicy {
            max_parallelism: Some(1),
            ..ValuationPolicy::default()
        };
        let engine = PeerValuationEngine::new(Arc::new(port), policy);

        let peers: BTreeSet<Symbol> = [b, c].into_iter().collect();
        let table = engine.build_comparison(&a, Some(&peers)).await.unwrap();
        assert_eq!(table.rows.len(), 3);
    }
}
