//! Peer valuation: historical multiples, peer comparison tables and group statistics.

pub mod alignment;
pub mod comparison;
pub mod models;
pub mod multiples;
pub mod policy;
pub mod statistics;

pub use alignment::{align_within, DateAligner};
pub use comparison::PeerValuationEngine;
pub use models::*;
pub use multiples::{current_pe, recent_quarters, trailing_12m_eps, HistoricalMultipleCalculator};
pub use policy::{AlignmentPolicy, MeanPool, ValuationPolicy};
pub use statistics::compute_statistics;

use analysis_core::{MarketDataError, MarketResult};
use std::future::Future;
use std::time::Duration;

/// Run a port call under `limit`; expiry becomes `DataUnavailable` for `subject`.
pub async fn with_timeout<T, F>(limit: Duration, subject: impl ToString, what: &str, fut: F) -> MarketResult<T>
where
    F: Future<Output = MarketResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MarketDataError::unavailable(
            subject,
            format!("{} timed out after {}s", what, limit.as_secs_f64()),
        )),
    }
}
