use analysis_core::Symbol;
use anyhow::{bail, Context, Result};
use market_data::MarketDataConfig;
use peer_valuation::{AlignmentPolicy, MeanPool, ValuationPolicy};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub yahoo_base_url: String,
    pub yahoo_requests_per_minute: usize,
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_requests_per_minute: usize,
    pub fetch_timeout: Duration,

    // Peer valuation
    pub max_peers: usize,
    pub fallback_peers: Vec<Symbol>,
    pub lookback_quarters: usize,
    pub alignment_window_days: u32,
    pub mean_pool: MeanPool,
    pub max_parallelism: Option<usize>, // None = one slot per symbol

    pub news_limit: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        let market = MarketDataConfig::default();
        Self {
            yahoo_base_url: market.yahoo_base_url,
            yahoo_requests_per_minute: market.yahoo_requests_per_minute,
            alpha_vantage_api_key: None,
            alpha_vantage_requests_per_minute: market.alpha_vantage_requests_per_minute,
            fetch_timeout: market.request_timeout,
            max_peers: 5,
            fallback_peers: Vec::new(),
            lookback_quarters: 4,
            alignment_window_days: 5,
            mean_pool: MeanPool::IncludeTarget,
            max_parallelism: None,
            news_limit: 8,
        }
    }
}

impl DashboardConfig {
    /// Read configuration from the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing keys take defaults; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let fetch_timeout_secs: u64 = parse_or(&get, "FETCH_TIMEOUT_SECS", defaults.fetch_timeout.as_secs())?;
        if fetch_timeout_secs == 0 {
            bail!("FETCH_TIMEOUT_SECS must be at least 1");
        }

        let lookback_quarters = parse_or(&get, "LOOKBACK_QUARTERS", defaults.lookback_quarters)?;
        if lookback_quarters == 0 {
            bail!("LOOKBACK_QUARTERS must be at least 1");
        }

        let fallback_peers = match get("FALLBACK_PEERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Symbol::new)
                .collect::<Result<Vec<_>, _>>()
                .context("invalid FALLBACK_PEERS")?,
            None => defaults.fallback_peers,
        };

        let max_parallelism: usize = parse_or(&get, "MAX_PARALLELISM", 0)?;

        let config = Self {
            yahoo_base_url: get("YAHOO_BASE_URL").unwrap_or(defaults.yahoo_base_url),
            yahoo_requests_per_minute: parse_or(&get, "YAHOO_RATE_LIMIT", defaults.yahoo_requests_per_minute)?,
            alpha_vantage_api_key: get("ALPHA_VANTAGE_API_KEY"),
            alpha_vantage_requests_per_minute: parse_or(
                &get,
                "ALPHA_VANTAGE_RATE_LIMIT",
                defaults.alpha_vantage_requests_per_minute,
            )?,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            max_peers: parse_or(&get, "MAX_PEERS", defaults.max_peers)?,
            fallback_peers,
            lookback_quarters,
            alignment_window_days: parse_or(&get, "ALIGNMENT_WINDOW_DAYS", defaults.alignment_window_days)?,
            mean_pool: parse_or(&get, "MEAN_POOL", defaults.mean_pool)?,
            max_parallelism: (max_parallelism > 0).then_some(max_parallelism),
            news_limit: parse_or(&get, "NEWS_LIMIT", defaults.news_limit)?,
        };

        Ok(config)
    }

    pub fn market_data_config(&self) -> MarketDataConfig {
        MarketDataConfig {
            yahoo_base_url: self.yahoo_base_url.clone(),
            yahoo_requests_per_minute: self.yahoo_requests_per_minute,
            alpha_vantage_api_key: self.alpha_vantage_api_key.clone(),
            alpha_vantage_requests_per_minute: self.alpha_vantage_requests_per_minute,
            request_timeout: self.fetch_timeout,
        }
    }

    pub fn valuation_policy(&self) -> ValuationPolicy {
        ValuationPolicy {
            lookback_quarters: self.lookback_quarters,
            alignment: AlignmentPolicy {
                forward_window_days: self.alignment_window_days,
                fallback_window_days: self.alignment_window_days,
            },
            history_padding_days: self.alignment_window_days,
            max_peers: self.max_peers,
            fallback_peers: self.fallback_peers.clone(),
            max_parallelism: self.max_parallelism,
            fetch_timeout: self.fetch_timeout,
            mean_pool: self.mean_pool,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = DashboardConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_peers, 5);
        assert_eq!(config.lookback_quarters, 4);
        assert_eq!(config.alignment_window_days, 5);
        assert_eq!(config.news_limit, 8);
        assert_eq!(config.mean_pool, MeanPool::IncludeTarget);
        assert_eq!(config.max_parallelism, None);
        assert_eq!(config.fetch_timeout, Duration::from_secs(15));
        assert!(config.alpha_vantage_api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = DashboardConfig::from_lookup(lookup(&[
            ("MAX_PEERS", "3"),
            ("FALLBACK_PEERS", "msft, googl ,,AMZN"),
            ("MEAN_POOL", "peers_only"),
            ("MAX_PARALLELISM", "2"),
            ("ALIGNMENT_WINDOW_DAYS", "7"),
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("NEWS_LIMIT", ""),
        ]))
        .unwrap();

        assert_eq!(config.max_peers, 3);
        let fallback: Vec<&str> = config.fallback_peers.iter().map(Symbol::as_str).collect();
        assert_eq!(fallback, vec!["MSFT", "GOOGL", "AMZN"]);
        assert_eq!(config.mean_pool, MeanPool::PeersOnly);
        assert_eq!(config.max_parallelism, Some(2));
        assert_eq!(config.news_limit, 8);
        assert_eq!(config.alpha_vantage_api_key.as_deref(), Some("demo"));

        let policy = config.valuation_policy();
        assert_eq!(policy.alignment.forward_window_days, 7);
        assert_eq!(policy.history_padding_days, 7);
        assert_eq!(policy.mean_pool, MeanPool::PeersOnly);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(DashboardConfig::from_lookup(lookup(&[("MAX_PEERS", "five")])).is_err());
        assert!(DashboardConfig::from_lookup(lookup(&[("MEAN_POOL", "median")])).is_err());
        assert!(DashboardConfig::from_lookup(lookup(&[("LOOKBACK_QUARTERS", "0")])).is_err());
        assert!(DashboardConfig::from_lookup(lookup(&[("FETCH_TIMEOUT_SECS", "0")])).is_err());

        let err = DashboardConfig::from_lookup(lookup(&[("YAHOO_RATE_LIMIT", "-1")])).unwrap_err();
        assert!(err.to_string().contains("YAHOO_RATE_LIMIT"));
    }
}
