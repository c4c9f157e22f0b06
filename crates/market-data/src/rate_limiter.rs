use reqwest::{Client, RequestBuilder};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ClientError, ClientResult};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_WAIT: Duration = Duration::from_secs(2);

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
pub(crate) struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    pub(crate) async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            // Wait until the oldest request falls out of the window
            let Some(&oldest) = ts.front() else { continue };
            let sleep_dur = (oldest + self.window).saturating_duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for a request slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// HTTP client shared by one provider: rate limiting, 429 retry, JSON decoding.
#[derive(Clone)]
pub(crate) struct HttpTransport {
    client: Client,
    limiter: RateLimiter,
    provider: &'static str,
}

impl HttpTransport {
    pub(crate) fn new(
        provider: &'static str,
        user_agent: Option<&str>,
        timeout: Duration,
        requests_per_minute: usize,
    ) -> ClientResult<Self> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(agent) = user_agent {
            builder = builder.user_agent(agent);
        }

        Ok(Self {
            client: builder.build()?,
            limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
            provider,
        })
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Send a request with rate limiting and automatic 429 retry, decoding the body as JSON.
    pub(crate) async fn get_json(&self, builder: RequestBuilder) -> ClientResult<serde_json::Value> {
        let request = builder.build()?;

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| ClientError::InvalidResponse("cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await?;
            let status = response.status();

            if status.as_u16() == 429 {
                let wait = RETRY_BASE_WAIT * attempt;
                tracing::warn!(
                    "{} 429 rate limited, waiting {}s before retry {}/{}",
                    self.provider,
                    wait.as_secs(),
                    attempt,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                return Err(ClientError::Status {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                });
            }

            return Ok(response.json::<serde_json::Value>().await?);
        }

        Err(ClientError::RateLimited(self.provider, MAX_ATTEMPTS))
    }
}
