use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// Upstream returned nothing usable for a symbol or endpoint.
    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// No trading-day price could be matched to a calendar date within the alignment windows.
    #[error("Unresolvable date {date} for {symbol}: {reason}")]
    Unresolvable {
        symbol: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("Undefined metric: {0}")]
    Undefined(String),

    /// Some peers in a comparison batch were dropped; the batch itself still succeeded.
    #[error("Partial batch failure, dropped: {}", dropped.join(", "))]
    PartialBatchFailure { dropped: Vec<String> },

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MarketDataError {
    pub fn unavailable(symbol: impl ToString, reason: impl Into<String>) -> Self {
        MarketDataError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unresolvable(symbol: impl ToString, date: NaiveDate, reason: impl Into<String>) -> Self {
        MarketDataError::Unresolvable {
            symbol: symbol.to_string(),
            date,
            reason: reason.into(),
        }
    }
}

pub type MarketResult<T> = Result<T, MarketDataError>;
