use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MarketDataError;

/// Ticker identifier, trimmed and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Result<Self, MarketDataError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(MarketDataError::InvalidSymbol(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = MarketDataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::new(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Point-in-time fundamentals snapshot. Providers omit fields freely, so
/// everything past the symbol is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsRecord {
    pub symbol: Symbol,
    pub long_name: Option<String>,
    pub market_cap: Option<f64>,
    pub current_price: Option<f64>,
    pub trailing_eps: Option<f64>,
    pub enterprise_to_revenue: Option<f64>,
    pub enterprise_to_ebitda: Option<f64>,
    pub quick_ratio: Option<f64>,
    pub current_ratio: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub short_ratio: Option<f64>,

    // Profile / price panel
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub business_summary: Option<String>,
    #[serde(default)]
    pub day_open: Option<f64>,
    #[serde(default)]
    pub day_high: Option<f64>,
    #[serde(default)]
    pub day_low: Option<f64>,
    #[serde(default)]
    pub previous_close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub fifty_two_week_high: Option<f64>,
    #[serde(default)]
    pub fifty_two_week_low: Option<f64>,
    #[serde(default)]
    pub forward_pe: Option<f64>,
    #[serde(default)]
    pub dividend_yield: Option<f64>,
}

impl FundamentalsRecord {
    /// A record with every optional field absent.
    pub fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            long_name: None,
            market_cap: None,
            current_price: None,
            trailing_eps: None,
            enterprise_to_revenue: None,
            enterprise_to_ebitda: None,
            quick_ratio: None,
            current_ratio: None,
            peg_ratio: None,
            short_ratio: None,
            currency: None,
            exchange: None,
            sector: None,
            industry: None,
            website: None,
            business_summary: None,
            day_open: None,
            day_high: None,
            day_low: None,
            previous_close: None,
            volume: None,
            fifty_two_week_high: None,
            fifty_two_week_low: None,
            forward_pe: None,
            dividend_yield: None,
        }
    }

    /// Market cap in billions, the unit the comparison table displays.
    pub fn market_cap_billions(&self) -> Option<f64> {
        self.market_cap.map(|cap| cap / 1_000_000_000.0)
    }
}

/// One quarterly earnings report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsObservation {
    pub symbol: Symbol,
    pub report_date: NaiveDate,
    pub reported_eps: f64,
    #[serde(default)]
    pub estimated_eps: Option<f64>,
}

impl EarningsObservation {
    pub fn new(symbol: Symbol, report_date: NaiveDate, reported_eps: f64) -> Self {
        Self {
            symbol,
            report_date,
            reported_eps,
            estimated_eps: None,
        }
    }

    pub fn with_estimate(mut self, estimated_eps: f64) -> Self {
        self.estimated_eps = Some(estimated_eps);
        self
    }

    /// Earnings surprise vs. consensus, in percent of the absolute estimate.
    pub fn surprise_pct(&self) -> Option<f64> {
        let estimate = self.estimated_eps?;
        crate::stats::safe_ratio(self.reported_eps - estimate, estimate.abs()).map(|r| r * 100.0)
    }
}

/// Closing price for one bar. Daily series carry one observation per trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: Symbol,
    pub trading_date: NaiveDate,
    pub close_price: f64,
    /// Bar open time; meaningful for intraday intervals.
    pub timestamp: DateTime<Utc>,
}

impl PriceObservation {
    pub fn daily(symbol: Symbol, trading_date: NaiveDate, close_price: f64) -> Self {
        let timestamp = trading_date.and_time(NaiveTime::MIN).and_utc();
        Self {
            symbol,
            trading_date,
            close_price,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    pub publisher: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Bar size for price history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Minute1,
    Minute2,
    Minute5,
    Minute15,
    Minute30,
    Minute60,
    Minute90,
    Day1,
    Day5,
    Week1,
    Month1,
    Month3,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute2 => "2m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Minute60 => "60m",
            Interval::Minute90 => "90m",
            Interval::Day1 => "1d",
            Interval::Day5 => "5d",
            Interval::Week1 => "1wk",
            Interval::Month1 => "1mo",
            Interval::Month3 => "3mo",
        }
    }

    pub fn is_intraday(&self) -> bool {
        matches!(
            self,
            Interval::Minute1
                | Interval::Minute2
                | Interval::Minute5
                | Interval::Minute15
                | Interval::Minute30
                | Interval::Minute60
                | Interval::Minute90
        )
    }
}

impl FromStr for Interval {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let interval = match s.trim() {
            "1m" => Interval::Minute1,
            "2m" => Interval::Minute2,
            "5m" => Interval::Minute5,
            "15m" => Interval::Minute15,
            "30m" => Interval::Minute30,
            "60m" | "1h" => Interval::Minute60,
            "90m" => Interval::Minute90,
            "1d" => Interval::Day1,
            "5d" => Interval::Day5,
            "1wk" => Interval::Week1,
            "1mo" => Interval::Month1,
            "3mo" => Interval::Month3,
            other => return Err(MarketDataError::Config(format!("unknown interval {other:?}"))),
        };
        Ok(interval)
    }
}

/// Relative lookback for chart requests, ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Day1,
    Day5,
    Month1,
    Month3,
    Month6,
    Year1,
    Year2,
    Year5,
    Year10,
    YearToDate,
    Max,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day1 => "1d",
            Period::Day5 => "5d",
            Period::Month1 => "1mo",
            Period::Month3 => "3mo",
            Period::Month6 => "6mo",
            Period::Year1 => "1y",
            Period::Year2 => "2y",
            Period::Year5 => "5y",
            Period::Year10 => "10y",
            Period::YearToDate => "ytd",
            Period::Max => "max",
        }
    }
}

impl FromStr for Period {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let period = match s.trim() {
            "1d" => Period::Day1,
            "5d" => Period::Day5,
            "1mo" => Period::Month1,
            "3mo" => Period::Month3,
            "6mo" => Period::Month6,
            "1y" => Period::Year1,
            "2y" => Period::Year2,
            "5y" => Period::Year5,
            "10y" => Period::Year10,
            "ytd" => Period::YearToDate,
            "max" => Period::Max,
            other => return Err(MarketDataError::Config(format!("unknown period {other:?}"))),
        };
        Ok(period)
    }
}
