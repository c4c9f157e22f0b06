use analysis_core::{MarketDataError, Symbol};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rate limited by {0} after {1} attempts")]
    RateLimited(&'static str, u32),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("No data: {0}")]
    NoData(String),
}

impl ClientError {
    /// Collapse an adapter error into the port's taxonomy.
    pub fn for_symbol(self, symbol: &Symbol) -> MarketDataError {
        MarketDataError::unavailable(symbol, self.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
