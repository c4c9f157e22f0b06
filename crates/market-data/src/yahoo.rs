use analysis_core::{
    EarningsObservation, FundamentalsRecord, Interval, NewsItem, Period, PriceObservation, Symbol,
};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::rate_limiter::HttpTransport;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const SUMMARY_MODULES: &str = "price,summaryDetail,defaultKeyStatistics,financialData,assetProfile";

/// Yahoo Finance JSON endpoints: quote summary, chart, recommendations and search.
#[derive(Clone)]
pub struct YahooFinanceClient {
    http: HttpTransport,
    base_url: String,
}

impl YahooFinanceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, requests_per_minute: usize) -> ClientResult<Self> {
        Ok(Self {
            http: HttpTransport::new("Yahoo Finance", Some(USER_AGENT), timeout, requests_per_minute)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn quote_summary(&self, symbol: &Symbol, modules: &str) -> ClientResult<Value> {
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, symbol);
        self.http
            .get_json(self.http.get(&url).query(&[("modules", modules)]))
            .await
    }

    /// Quote, key statistics, financial data and profile in one call.
    pub async fn get_fundamentals(&self, symbol: &Symbol) -> ClientResult<FundamentalsRecord> {
        let json = self.quote_summary(symbol, SUMMARY_MODULES).await?;
        parse_quote_summary(symbol, &json)
    }

    /// Last four quarters of reported vs. estimated EPS.
    pub async fn get_earnings_history(&self, symbol: &Symbol) -> ClientResult<Vec<EarningsObservation>> {
        let json = self.quote_summary(symbol, "earningsHistory").await?;
        parse_earnings_history(symbol, &json)
    }

    /// Bars between two calendar dates, both inclusive.
    pub async fn get_chart_range(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> ClientResult<Vec<PriceObservation>> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = end
            .checked_add_days(Days::new(1))
            .unwrap_or(end)
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();

        let json = self
            .http
            .get_json(self.http.get(&url).query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", interval.as_str().to_string()),
                ("events", "history".to_string()),
            ]))
            .await?;

        let bars: Vec<PriceObservation> = parse_chart(symbol, &json, interval)?
            .into_iter()
            .filter(|p| p.trading_date >= start && p.trading_date <= end)
            .collect();
        if bars.is_empty() {
            return Err(ClientError::NoData(format!("no bars for {} between {} and {}", symbol, start, end)));
        }
        Ok(bars)
    }

    /// Bars for a relative period ending now.
    pub async fn get_chart_period(
        &self,
        symbol: &Symbol,
        period: Period,
        interval: Interval,
    ) -> ClientResult<Vec<PriceObservation>> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let json = self
            .http
            .get_json(self.http.get(&url).query(&[
                ("range", period.as_str()),
                ("interval", interval.as_str()),
            ]))
            .await?;
        parse_chart(symbol, &json, interval)
    }

    /// Symbols Yahoo considers similar to `symbol` (the "people also watch" list).
    pub async fn get_recommendations(&self, symbol: &Symbol) -> ClientResult<Vec<Symbol>> {
        let url = format!("{}/v6/finance/recommendationsbysymbol/{}", self.base_url, symbol);
        let json = self.http.get_json(self.http.get(&url)).await?;
        parse_recommendations(symbol, &json)
    }

    pub async fn get_news(&self, symbol: &Symbol, limit: usize) -> ClientResult<Vec<NewsItem>> {
        let url = format!("{}/v1/finance/search", self.base_url);
        let json = self
            .http
            .get_json(self.http.get(&url).query(&[
                ("q", symbol.to_string()),
                ("quotesCount", "0".to_string()),
                ("newsCount", limit.to_string()),
            ]))
            .await?;
        Ok(parse_news(&json, limit))
    }
}

/// Numeric field that Yahoo wraps as `{"raw": 1.2, "fmt": "1.20"}` or sends bare.
fn raw(module: Option<&Value>, field: &str) -> Option<f64> {
    let value = module?.get(field)?;
    let number = match value {
        Value::Object(map) => map.get("raw")?.as_f64(),
        other => other.as_f64(),
    }?;
    number.is_finite().then_some(number)
}

fn text(module: Option<&Value>, field: &str) -> Option<String> {
    module?
        .get(field)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn summary_result<'a>(symbol: &Symbol, json: &'a Value) -> ClientResult<&'a Value> {
    let summary = json
        .get("quoteSummary")
        .ok_or_else(|| ClientError::InvalidResponse("missing quoteSummary".to_string()))?;

    if let Some(description) = summary
        .get("error")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
    {
        return Err(ClientError::Provider(description.to_string()));
    }

    summary
        .get("result")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .ok_or_else(|| ClientError::NoData(format!("no quote summary for {}", symbol)))
}

pub(crate) fn parse_quote_summary(symbol: &Symbol, json: &Value) -> ClientResult<FundamentalsRecord> {
    let result = summary_result(symbol, json)?;
    let price = result.get("price");
    let detail = result.get("summaryDetail");
    let stats = result.get("defaultKeyStatistics");
    let financial = result.get("financialData");
    let profile = result.get("assetProfile");

    if price.is_none() && stats.is_none() && financial.is_none() {
        return Err(ClientError::NoData(format!("empty quote summary for {}", symbol)));
    }

    let mut record = FundamentalsRecord::empty(symbol.clone());
    record.long_name = text(price, "longName").or_else(|| text(price, "shortName"));
    record.market_cap = raw(price, "marketCap").or_else(|| raw(detail, "marketCap"));
    record.current_price = raw(price, "regularMarketPrice").or_else(|| raw(financial, "currentPrice"));
    record.trailing_eps = raw(stats, "trailingEps");
    record.enterprise_to_revenue = raw(stats, "enterpriseToRevenue");
    record.enterprise_to_ebitda = raw(stats, "enterpriseToEbitda");
    record.peg_ratio = raw(stats, "pegRatio");
    record.short_ratio = raw(stats, "shortRatio");
    record.quick_ratio = raw(financial, "quickRatio");
    record.current_ratio = raw(financial, "currentRatio");

    record.currency = text(price, "currency");
    record.exchange = text(price, "exchangeName");
    record.sector = text(profile, "sector");
    record.industry = text(profile, "industry");
    record.website = text(profile, "website");
    record.business_summary = text(profile, "longBusinessSummary");
    record.day_open = raw(price, "regularMarketOpen");
    record.day_high = raw(price, "regularMarketDayHigh");
    record.day_low = raw(price, "regularMarketDayLow");
    record.previous_close = raw(price, "regularMarketPreviousClose");
    record.volume = raw(price, "regularMarketVolume");
    record.fifty_two_week_high = raw(detail, "fiftyTwoWeekHigh");
    record.fifty_two_week_low = raw(detail, "fiftyTwoWeekLow");
    record.forward_pe = raw(detail, "forwardPE");
    record.dividend_yield = raw(detail, "dividendYield");

    Ok(record)
}

pub(crate) fn parse_earnings_history(symbol: &Symbol, json: &Value) -> ClientResult<Vec<EarningsObservation>> {
    let result = summary_result(symbol, json)?;
    let history = result
        .get("earningsHistory")
        .and_then(|h| h.get("history"))
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::NoData(format!("no earnings history for {}", symbol)))?;

    let mut observations = Vec::new();
    for entry in history {
        let date = entry.get("quarter").and_then(|q| {
            q.get("fmt")
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .or_else(|| {
                    q.get("raw")
                        .and_then(Value::as_i64)
                        .and_then(|ts| DateTime::from_timestamp(ts, 0))
                        .map(|dt| dt.date_naive())
                })
        });
        // Upcoming quarters come back without an actual.
        let (Some(report_date), Some(reported_eps)) = (date, raw(Some(entry), "epsActual")) else {
            continue;
        };

        observations.push(EarningsObservation {
            symbol: symbol.clone(),
            report_date,
            reported_eps,
            estimated_eps: raw(Some(entry), "epsEstimate"),
        });
    }

    if observations.is_empty() {
        return Err(ClientError::NoData(format!("no reported quarters for {}", symbol)));
    }
    Ok(observations)
}

pub(crate) fn parse_chart(symbol: &Symbol, json: &Value, interval: Interval) -> ClientResult<Vec<PriceObservation>> {
    let chart = json
        .get("chart")
        .ok_or_else(|| ClientError::InvalidResponse("missing chart".to_string()))?;

    if let Some(description) = chart
        .get("error")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
    {
        return Err(ClientError::Provider(description.to_string()));
    }

    let result = chart
        .get("result")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .ok_or_else(|| ClientError::NoData(format!("no chart data for {}", symbol)))?;

    // Trading dates are exchange-local; timestamps are UTC.
    let gmt_offset = result
        .get("meta")
        .and_then(|m| m.get("gmtoffset"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let timestamps = result
        .get("timestamp")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::NoData(format!("no timestamps for {}", symbol)))?;

    let closes = result
        .get("indicators")
        .and_then(|i| i.get("quote"))
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|q| q.get("close"))
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::InvalidResponse(format!("no close prices for {}", symbol)))?;

    let mut bars: Vec<PriceObservation> = timestamps
        .iter()
        .zip(closes.iter())
        .filter_map(|(ts, close)| {
            let ts = ts.as_i64()?;
            let close_price = close.as_f64().filter(|c| c.is_finite())?;
            let timestamp = DateTime::from_timestamp(ts, 0)?;
            let trading_date = DateTime::from_timestamp(ts + gmt_offset, 0)?.date_naive();
            Some(PriceObservation {
                symbol: symbol.clone(),
                trading_date,
                close_price,
                timestamp,
            })
        })
        .collect();

    bars.sort_by_key(|b| b.timestamp);
    if !interval.is_intraday() {
        // The live session can appear twice at the tail; keep the latest print per day.
        let mut daily: Vec<PriceObservation> = Vec::with_capacity(bars.len());
        for bar in bars {
            match daily.last_mut() {
                Some(last) if last.trading_date == bar.trading_date => *last = bar,
                _ => daily.push(bar),
            }
        }
        bars = daily;
    }

    if bars.is_empty() {
        return Err(ClientError::NoData(format!("no bars for {}", symbol)));
    }
    Ok(bars)
}

pub(crate) fn parse_recommendations(symbol: &Symbol, json: &Value) -> ClientResult<Vec<Symbol>> {
    let recommended = json
        .get("finance")
        .and_then(|f| f.get("result"))
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|r| r.get("recommendedSymbols"))
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::NoData(format!("no recommendations for {}", symbol)))?;

    let peers: Vec<Symbol> = recommended
        .iter()
        .filter_map(|r| r.get("symbol").and_then(Value::as_str))
        .filter_map(|s| Symbol::new(s).ok())
        .filter(|peer| peer != symbol)
        .collect();

    if peers.is_empty() {
        return Err(ClientError::NoData(format!("empty recommendation list for {}", symbol)));
    }
    Ok(peers)
}

pub(crate) fn parse_news(json: &Value, limit: usize) -> Vec<NewsItem> {
    let Some(articles) = json.get("news").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut items: Vec<NewsItem> = articles
        .iter()
        .filter_map(|a| {
            Some(NewsItem {
                title: text(Some(a), "title")?,
                link: text(Some(a), "link")?,
                publisher: text(Some(a), "publisher"),
                published_at: a
                    .get("providerPublishTime")
                    .and_then(Value::as_i64)
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            })
        })
        .collect();

    // Newest first; undated items sink to the end.
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    items.truncate(limit);
    items
}
