//! Mapping earnings report dates onto trading days.
//!
//! A report date is priced at the first trading day on or after it, never at an
//! earlier close.

use analysis_core::{Interval, MarketDataError, MarketDataPort, MarketResult, PriceObservation, Symbol};
use chrono::{Days, NaiveDate};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::models::{AlignedPrice, AlignmentSource};
use crate::policy::AlignmentPolicy;
use crate::with_timeout;

/// First observation on `target` or within `window_days` after it.
///
/// `series` must be ascending by trading date.
pub fn align_within(series: &[PriceObservation], target: NaiveDate, window_days: u32) -> Option<AlignedPrice> {
    let idx = series.partition_point(|p| p.trading_date < target);
    let candidate = series.get(idx)?;
    let gap = (candidate.trading_date - target).num_days();

    if gap == 0 {
        Some(AlignedPrice {
            trading_date: candidate.trading_date,
            close_price: candidate.close_price,
            source: AlignmentSource::Exact,
        })
    } else if gap <= i64::from(window_days) {
        Some(AlignedPrice {
            trading_date: candidate.trading_date,
            close_price: candidate.close_price,
            source: AlignmentSource::ForwardProbe,
        })
    } else {
        None
    }
}

/// Two-stage resolver: probe the bulk series first, then fetch a short window
/// anchored at the report date.
pub struct DateAligner<'a> {
    port: &'a dyn MarketDataPort,
    policy: AlignmentPolicy,
    timeout: Duration,
}

impl<'a> DateAligner<'a> {
    pub fn new(port: &'a dyn MarketDataPort, policy: AlignmentPolicy, timeout: Duration) -> Self {
        Self { port, policy, timeout }
    }

    pub async fn align(
        &self,
        symbol: &Symbol,
        series: &[PriceObservation],
        report_date: NaiveDate,
    ) -> MarketResult<AlignedPrice> {
        if let Some(aligned) = align_within(series, report_date, self.policy.forward_window_days) {
            return Ok(aligned);
        }

        if let Some(last) = series.last() {
            if report_date > last.trading_date {
                return Err(MarketDataError::unresolvable(
                    symbol,
                    report_date,
                    format!("after latest available observation {}", last.trading_date),
                ));
            }
        }

        tracing::debug!(
            "No trading day within {} days of {} for {}, fetching point window",
            self.policy.forward_window_days,
            report_date,
            symbol
        );
        self.secondary_fetch(symbol, report_date).await
    }

    async fn secondary_fetch(&self, symbol: &Symbol, report_date: NaiveDate) -> MarketResult<AlignedPrice> {
        // `end` is inclusive: a 5-day window is [d, d+4].
        let span = self.policy.fallback_window_days.saturating_sub(1);
        let end = report_date
            .checked_add_days(Days::new(u64::from(span)))
            .unwrap_or(report_date);
        let symbols: BTreeSet<Symbol> = std::iter::once(symbol.clone()).collect();

        let fetched = with_timeout(
            self.timeout,
            symbol,
            "point price fetch",
            self.port.fetch_price_history(&symbols, report_date, end, Interval::Day1),
        )
        .await;

        let mut history = match fetched {
            Ok(history) => history,
            Err(e) => {
                return Err(MarketDataError::unresolvable(
                    symbol,
                    report_date,
                    format!("point fetch failed: {}", e),
                ))
            }
        };

        let mut window = history.remove(symbol).unwrap_or_default();
        window.sort_by_key(|p| p.trading_date);
        window
            .into_iter()
            .find(|p| p.trading_date >= report_date)
            .map(|p| AlignedPrice {
                trading_date: p.trading_date,
                close_price: p.close_price,
                source: AlignmentSource::SecondaryFetch,
            })
            .ok_or_else(|| {
                MarketDataError::unresolvable(
                    symbol,
                    report_date,
                    format!("no trading day between {} and {}", report_date, end),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::memory::StaticMarketData;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(symbol: &Symbol, days: &[(NaiveDate, f64)]) -> Vec<PriceObservation> {
        days.iter()
            .map(|(date, close)| PriceObservation::daily(symbol.clone(), *date, *close))
            .collect()
    }

    #[test]
    fn test_weekend_report_rolls_forward_to_monday() {
        let acme = Symbol::new("ACME").unwrap();
        let prices = series(&acme, &[(d(2023, 6, 30), 19.0), (d(2023, 7, 3), 20.0)]);

        let aligned = align_within(&prices, d(2023, 7, 1), 5).unwrap();
        assert_eq!(aligned.trading_date, d(2023, 7, 3));
        assert_eq!(aligned.close_price, 20.0);
        assert_eq!(aligned.source, AlignmentSource::ForwardProbe);
    }

    #[test]
    fn test_exact_match() {
        let acme = Symbol::new("ACME").unwrap();
        let prices = series(&acme, &[(d(2023, 6, 30), 19.0), (d(2023, 7, 3), 20.0)]);
        let aligned = align_within(&prices, d(2023, 6, 30), 5).unwrap();
        assert_eq!(aligned.source, AlignmentSource::Exact);
        assert_eq!(aligned.close_price, 19.0);
    }

    #[test]
    fn test_never_uses_an_earlier_trading_day() {
        let acme = Symbol::new("ACME").unwrap();
        let prices = series(
            &acme,
            &[(d(2023, 6, 26), 1.0), (d(2023, 6, 28), 2.0), (d(2023, 7, 5), 3.0), (d(2023, 7, 20), 4.0)],
        );

        let mut date = d(2023, 6, 20);
        let mut previous: Option<NaiveDate> = None;
        while date <= d(2023, 7, 25) {
            if let Some(aligned) = align_within(&prices, date, 5) {
                assert!(aligned.trading_date >= date, "{} aligned back to {}", date, aligned.trading_date);
                if let Some(prev) = previous {
                    assert!(prev <= aligned.trading_date);
                }
                previous = Some(aligned.trading_date);
            }
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_gap_wider_than_window_misses() {
        let acme = Symbol::new("ACME").unwrap();
        let prices = series(&acme, &[(d(2023, 7, 10), 20.0)]);
        assert!(align_within(&prices, d(2023, 7, 1), 5).is_none());
        assert!(align_within(&prices, d(2023, 7, 5), 5).is_some());
        assert!(align_within(&[], d(2023, 7, 5), 5).is_none());
    }

    #[tokio::test]
    async fn test_secondary_fetch_resolves_gap() {
        let acme = Symbol::new("ACME").unwrap();
        let port = StaticMarketData::new().with_prices(
            &acme,
            series(&acme, &[(d(2023, 4, 3), 15.0), (d(2023, 4, 14), 16.0)]),
        );
        // Bulk series has a hole around the report date.
        let bulk = series(&acme, &[(d(2023, 3, 20), 14.0), (d(2023, 4, 14), 16.0)]);

        let aligner = DateAligner::new(&port, AlignmentPolicy::default(), Duration::from_secs(1));
        let aligned = aligner.align(&acme, &bulk, d(2023, 4, 1)).await.unwrap();

        assert_eq!(aligned.trading_date, d(2023, 4, 3));
        assert_eq!(aligned.source, AlignmentSource::SecondaryFetch);
        let requests = port.history_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].start, d(2023, 4, 1));
        assert_eq!(requests[0].end, d(2023, 4, 5));
    }

    #[tokio::test]
    async fn test_secondary_window_excludes_day_after_its_length() {
        let acme = Symbol::new("ACME").unwrap();
        let port = StaticMarketData::new().with_prices(&acme, series(&acme, &[(d(2023, 7, 10), 20.0)]));

        let aligner = DateAligner::new(&port, AlignmentPolicy::default(), Duration::from_secs(1));
        let err = aligner.align(&acme, &[], d(2023, 7, 5)).await.unwrap_err();

        assert!(matches!(err, MarketDataError::Unresolvable { date, .. } if date == d(2023, 7, 5)));
        let requests = port.history_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!((requests[0].start, requests[0].end), (d(2023, 7, 5), d(2023, 7, 9)));
    }

    #[tokio::test]
    async fn test_report_after_latest_observation_is_unresolvable_without_fetch() {
        let acme = Symbol::new("ACME").unwrap();
        let port = StaticMarketData::new();
        let bulk = series(&acme, &[(d(2023, 7, 3), 20.0)]);

        let aligner = DateAligner::new(&port, AlignmentPolicy::default(), Duration::from_secs(1));
        let err = aligner.align(&acme, &bulk, d(2023, 7, 20)).await.unwrap_err();

        assert!(matches!(err, MarketDataError::Unresolvable { date, .. } if date == d(2023, 7, 20)));
        assert!(port.history_requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_secondary_fetch_is_unresolvable() {
        let acme = Symbol::new("ACME").unwrap();
        let port = StaticMarketData::new().failing(&acme);

        let aligner = DateAligner::new(&port, AlignmentPolicy::default(), Duration::from_secs(1));
        let err = aligner.align(&acme, &[], d(2023, 7, 1)).await.unwrap_err();
        assert!(matches!(err, MarketDataError::Unresolvable { .. }));
    }
}
