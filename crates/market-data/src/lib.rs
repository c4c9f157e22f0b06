//! Yahoo Finance and Alpha Vantage adapters behind `MarketDataPort`.

pub mod alpha_vantage;
pub mod error;
pub mod hub;
mod rate_limiter;
pub mod yahoo;

pub use alpha_vantage::AlphaVantageClient;
pub use error::{ClientError, ClientResult};
pub use hub::{MarketDataConfig, MarketDataHub};
pub use yahoo::YahooFinanceClient;
