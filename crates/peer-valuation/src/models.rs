use analysis_core::{FundamentalsRecord, MarketDataError, Symbol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::policy::MeanPool;

/// How a report date was mapped onto a trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentSource {
    Exact,
    ForwardProbe,
    SecondaryFetch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedPrice {
    pub trading_date: NaiveDate,
    pub close_price: f64,
    pub source: AlignmentSource,
}

/// Price-to-earnings multiple at one earnings report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMultiplePoint {
    pub symbol: Symbol,
    pub report_date: NaiveDate,
    pub reported_eps: f64,
    pub aligned_date: NaiveDate,
    pub close_price: f64,
    pub resolution: AlignmentSource,
    /// `None` when the reported EPS is zero.
    pub multiple: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedReport {
    pub report_date: NaiveDate,
    pub reason: String,
}

/// Historical multiples for one symbol, oldest report first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSeries {
    pub points: Vec<HistoricalMultiplePoint>,
    pub unresolved: Vec<UnresolvedReport>,
}

impl HistoricalSeries {
    pub fn defined_multiples(&self) -> Vec<f64> {
        self.points.iter().filter_map(|p| p.multiple).collect()
    }

    pub fn average_multiple(&self) -> Option<f64> {
        analysis_core::stats::mean(&self.defined_multiples())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerComparisonRow {
    pub is_target: bool,
    pub fundamentals: FundamentalsRecord,
    /// `current_price / trailing_eps`; absent when either input is missing or EPS is zero.
    pub current_pe_multiple: Option<f64>,
    /// Mean of the most recent four quarterly EPS reports.
    pub trailing_12m_eps: Option<f64>,
    pub historical: HistoricalSeries,
    pub historical_average_pe: Option<f64>,
    /// Reported EPS over the lookback window, oldest first.
    pub eps_trend: Vec<f64>,
}

impl PeerComparisonRow {
    pub fn symbol(&self) -> &Symbol {
        &self.fundamentals.symbol
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: Symbol,
    pub reason: String,
}

/// Where the peer list of a comparison came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerSource {
    Explicit,
    Recommended,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerComparisonTable {
    pub target: Symbol,
    pub rows: BTreeMap<Symbol, PeerComparisonRow>,
    pub peer_source: PeerSource,
    /// Why discovery fell back to the configured list, if it did.
    pub peer_discovery_error: Option<String>,
    pub failures: Vec<SymbolFailure>,
}

impl PeerComparisonTable {
    pub fn target_row(&self) -> Option<&PeerComparisonRow> {
        self.rows.get(&self.target)
    }

    /// Target first, then peers in symbol order.
    pub fn ordered_rows(&self) -> impl Iterator<Item = &PeerComparisonRow> {
        self.target_row()
            .into_iter()
            .chain(self.rows.values().filter(|row| !row.is_target))
    }

    pub fn peer_symbols(&self) -> Vec<&Symbol> {
        self.rows.keys().filter(|s| **s != self.target).collect()
    }

    /// `PartialBatchFailure` listing every dropped symbol, or `None` if nothing was dropped.
    pub fn batch_notice(&self) -> Option<MarketDataError> {
        if self.failures.is_empty() {
            return None;
        }
        Some(MarketDataError::PartialBatchFailure {
            dropped: self.failures.iter().map(|f| f.symbol.to_string()).collect(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    MarketCap,
    CurrentPe,
    EnterpriseToEbitda,
    EnterpriseToRevenue,
    CurrentRatio,
    QuickRatio,
    PegRatio,
    ShortRatio,
    Trailing12mEps,
    HistoricalAveragePe,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::MarketCap,
        Metric::CurrentPe,
        Metric::EnterpriseToEbitda,
        Metric::EnterpriseToRevenue,
        Metric::CurrentRatio,
        Metric::QuickRatio,
        Metric::PegRatio,
        Metric::ShortRatio,
        Metric::Trailing12mEps,
        Metric::HistoricalAveragePe,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::MarketCap => "market_cap",
            Metric::CurrentPe => "current_pe",
            Metric::EnterpriseToEbitda => "enterprise_to_ebitda",
            Metric::EnterpriseToRevenue => "enterprise_to_revenue",
            Metric::CurrentRatio => "current_ratio",
            Metric::QuickRatio => "quick_ratio",
            Metric::PegRatio => "peg_ratio",
            Metric::ShortRatio => "short_ratio",
            Metric::Trailing12mEps => "trailing_12m_eps",
            Metric::HistoricalAveragePe => "historical_average_pe",
        }
    }

    /// Column header as the comparison table shows it.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::MarketCap => "Market Cap (B)",
            Metric::CurrentPe => "P/E",
            Metric::EnterpriseToEbitda => "EV/EBITDA",
            Metric::EnterpriseToRevenue => "EV/Revenue",
            Metric::CurrentRatio => "Current Ratio",
            Metric::QuickRatio => "Quick Ratio",
            Metric::PegRatio => "PEG Ratio",
            Metric::ShortRatio => "Short Ratio",
            Metric::Trailing12mEps => "T12M EPS",
            Metric::HistoricalAveragePe => "Avg Historical P/E",
        }
    }

    /// The row's value for this metric, `None` when absent or not finite.
    pub fn value(&self, row: &PeerComparisonRow) -> Option<f64> {
        let f = &row.fundamentals;
        let value = match self {
            Metric::MarketCap => f.market_cap_billions(),
            Metric::CurrentPe => row.current_pe_multiple,
            Metric::EnterpriseToEbitda => f.enterprise_to_ebitda,
            Metric::EnterpriseToRevenue => f.enterprise_to_revenue,
            Metric::CurrentRatio => f.current_ratio,
            Metric::QuickRatio => f.quick_ratio,
            Metric::PegRatio => f.peg_ratio,
            Metric::ShortRatio => f.short_ratio,
            Metric::Trailing12mEps => row.trailing_12m_eps,
            Metric::HistoricalAveragePe => row.historical_average_pe,
        }?;
        value.is_finite().then_some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    /// Rows that contributed a value to the mean.
    pub samples: usize,
    pub target_value: Option<f64>,
    /// `(mean - target) / mean * 100`, one decimal. Positive is a discount to the group.
    pub target_premium_pct: Option<f64>,
}

/// Current vs. historical P/E premium of the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPremium {
    pub current_premium_pct: Option<f64>,
    pub historical_average_premium_pct: Option<f64>,
    pub premium_change_pct: Option<f64>,
    pub historical_std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatistics {
    pub target: Symbol,
    pub pool: MeanPool,
    pub metrics: BTreeMap<Metric, MetricSummary>,
    pub historical_premium: HistoricalPremium,
}

impl GroupStatistics {
    pub fn metric(&self, metric: Metric) -> Option<&MetricSummary> {
        self.metrics.get(&metric)
    }

    pub fn premium(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).and_then(|m| m.target_premium_pct)
    }
}
