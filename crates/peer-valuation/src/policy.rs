use analysis_core::MarketDataError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Which rows feed the group mean a premium is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanPool {
    /// Target and peers together.
    #[default]
    IncludeTarget,
    PeersOnly,
}

impl FromStr for MeanPool {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "include_target" | "all" => Ok(MeanPool::IncludeTarget),
            "peers_only" | "peers" => Ok(MeanPool::PeersOnly),
            other => Err(MarketDataError::Config(format!("unknown mean pool {other:?}"))),
        }
    }
}

/// Calendar-day windows used when a report date is not a trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentPolicy {
    /// How far past the report date to look in the already-fetched series.
    pub forward_window_days: u32,
    /// Length of the point fetch anchored at the report date when the forward probe misses.
    pub fallback_window_days: u32,
}

impl Default for AlignmentPolicy {
    fn default() -> Self {
        Self {
            forward_window_days: 5,
            fallback_window_days: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValuationPolicy {
    /// Quarters of earnings that feed the historical multiple series.
    pub lookback_quarters: usize,
    pub alignment: AlignmentPolicy,
    /// Days added on each side of the report-date span for the batch history fetch.
    pub history_padding_days: u32,
    pub max_peers: usize,
    /// Used when peer discovery fails and no explicit peers were given.
    pub fallback_peers: Vec<analysis_core::Symbol>,
    /// Concurrent per-symbol fetches; `None` means one slot per symbol in the peer set.
    pub max_parallelism: Option<usize>,
    pub fetch_timeout: Duration,
    pub mean_pool: MeanPool,
}

impl Default for ValuationPolicy {
    fn default() -> Self {
        Self {
            lookback_quarters: 4,
            alignment: AlignmentPolicy::default(),
            history_padding_days: 5,
            max_peers: 5,
            fallback_peers: Vec::new(),
            max_parallelism: None,
            fetch_timeout: Duration::from_secs(15),
            mean_pool: MeanPool::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_parsing() {
        assert_eq!("peers_only".parse::<MeanPool>().unwrap(), MeanPool::PeersOnly);
        assert_eq!(" Include_Target ".parse::<MeanPool>().unwrap(), MeanPool::IncludeTarget);
        assert!("median".parse::<MeanPool>().is_err());
        assert_eq!(MeanPool::default(), MeanPool::IncludeTarget);
    }

    #[test]
    fn test_default_policy_windows() {
        let policy = ValuationPolicy::default();
        assert_eq!(policy.lookback_quarters, 4);
        assert_eq!(policy.alignment.forward_window_days, 5);
        assert_eq!(policy.alignment.fallback_window_days, 5);
        assert_eq!(policy.max_parallelism, None);
    }
}
