use analysis_core::stats::{mean, safe_ratio};
use analysis_core::{EarningsObservation, FundamentalsRecord, PriceObservation, Symbol};

use crate::alignment::DateAligner;
use crate::models::{HistoricalMultiplePoint, HistoricalSeries, UnresolvedReport};

/// The `n` most recent reports, oldest first. Provider order is not trusted.
pub fn recent_quarters(earnings: &[EarningsObservation], n: usize) -> Vec<EarningsObservation> {
    let mut sorted = earnings.to_vec();
    sorted.sort_by_key(|e| e.report_date);
    let skip = sorted.len().saturating_sub(n);
    sorted.split_off(skip)
}

/// Mean EPS of the four most recent quarterly reports.
pub fn trailing_12m_eps(earnings: &[EarningsObservation]) -> Option<f64> {
    let eps: Vec<f64> = recent_quarters(earnings, 4)
        .iter()
        .map(|e| e.reported_eps)
        .collect();
    mean(&eps)
}

/// Current price over trailing EPS. `None` if either is missing or EPS is zero.
pub fn current_pe(record: &FundamentalsRecord) -> Option<f64> {
    safe_ratio(record.current_price?, record.trailing_eps?)
}

/// Historical P/E series over a lookback window of quarterly reports.
pub struct HistoricalMultipleCalculator<'a> {
    aligner: DateAligner<'a>,
    lookback_quarters: usize,
}

impl<'a> HistoricalMultipleCalculator<'a> {
    pub fn new(aligner: DateAligner<'a>, lookback_quarters: usize) -> Self {
        Self {
            aligner,
            lookback_quarters,
        }
    }

    /// One point per report in the window. Zero-EPS reports stay in the series with
    /// an undefined multiple; reports with no usable trading day are listed as unresolved.
    pub async fn compute(
        &self,
        symbol: &Symbol,
        earnings: &[EarningsObservation],
        prices: &[PriceObservation],
    ) -> HistoricalSeries {
        let mut series = HistoricalSeries::default();

        for report in recent_quarters(earnings, self.lookback_quarters) {
            match self.aligner.align(symbol, prices, report.report_date).await {
                Ok(aligned) => series.points.push(HistoricalMultiplePoint {
                    symbol: symbol.clone(),
                    report_date: report.report_date,
                    reported_eps: report.reported_eps,
                    aligned_date: aligned.trading_date,
                    close_price: aligned.close_price,
                    resolution: aligned.source,
                    multiple: safe_ratio(aligned.close_price, report.reported_eps),
                }),
                Err(e) => {
                    tracing::debug!("Dropping {} report {}: {}", symbol, report.report_date, e);
                    series.unresolved.push(UnresolvedReport {
                        report_date: report.report_date,
                        reason: e.to_string(),
                    });
                }
            }
        }

        series
    }
}
