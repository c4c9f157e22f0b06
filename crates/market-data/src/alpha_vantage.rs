use analysis_core::{EarningsObservation, Symbol};
use chrono::NaiveDate;
use serde_json::Value;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::rate_limiter::HttpTransport;

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Alpha Vantage `EARNINGS` endpoint. Carries more quarters than Yahoo's
/// earnings module, so it is preferred when a key is configured.
#[derive(Clone)]
pub struct AlphaVantageClient {
    api_key: String,
    http: HttpTransport,
    base_url: String,
}

impl AlphaVantageClient {
    pub fn new(api_key: String, timeout: Duration, requests_per_minute: usize) -> ClientResult<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeout, requests_per_minute)
    }

    pub fn with_base_url(
        api_key: String,
        base_url: impl Into<String>,
        timeout: Duration,
        requests_per_minute: usize,
    ) -> ClientResult<Self> {
        Ok(Self {
            api_key,
            http: HttpTransport::new("Alpha Vantage", None, timeout, requests_per_minute)?,
            base_url: base_url.into(),
        })
    }

    /// Quarterly reported/estimated EPS, most recent first.
    pub async fn get_earnings(&self, symbol: &Symbol) -> ClientResult<Vec<EarningsObservation>> {
        let json = self
            .http
            .get_json(self.http.get(&self.base_url).query(&[
                ("function", "EARNINGS"),
                ("symbol", symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ]))
            .await?;
        parse_earnings(symbol, &json)
    }
}

/// Alpha Vantage sends numbers as strings and uses the literal "None" for gaps.
fn number(entry: &Value, field: &str) -> Option<f64> {
    entry
        .get(field)?
        .as_str()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub(crate) fn parse_earnings(symbol: &Symbol, json: &Value) -> ClientResult<Vec<EarningsObservation>> {
    if let Some(error) = json.get("Error Message").and_then(Value::as_str) {
        return Err(ClientError::Provider(error.to_string()));
    }
    // Throttled responses come back as 200 with a note instead of data.
    if let Some(note) = json
        .get("Note")
        .or_else(|| json.get("Information"))
        .and_then(Value::as_str)
    {
        return Err(ClientError::Provider(format!("rate limit: {}", note)));
    }

    let quarters = json
        .get("quarterlyEarnings")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::NoData(format!("no quarterly earnings for {}", symbol)))?;

    let mut observations: Vec<EarningsObservation> = quarters
        .iter()
        .filter_map(|q| {
            let report_date = q
                .get("reportedDate")
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())?;
            Some(EarningsObservation {
                symbol: symbol.clone(),
                report_date,
                reported_eps: number(q, "reportedEPS")?,
                estimated_eps: number(q, "estimatedEPS"),
            })
        })
        .collect();

    if observations.is_empty() {
        return Err(ClientError::NoData(format!("no reported quarters for {}", symbol)));
    }
    observations.sort_by(|a, b| b.report_date.cmp(&a.report_date));
    Ok(observations)
}
