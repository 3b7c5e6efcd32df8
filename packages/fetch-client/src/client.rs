//! The retrying, paced fetch loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FetchError;
use crate::request::{FetchRequest, FetchResponse};
use crate::transport::{ReqwestTransport, Transport};

/// Desktop browser user agents picked from when rotation is enabled.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Mean pre-request delay; the actual sleep is uniform in [0.5, 1.5) of it.
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// 429 backoff grows as `(attempt + 1) * rate_limit_step`.
    pub rate_limit_step: Duration,
    pub server_error_backoff: Duration,
    pub network_error_backoff: Duration,
    /// Transport-level timeout, used when building the reqwest transport.
    pub timeout: Duration,
    pub rotate_user_agent: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_attempts: 3,
            rate_limit_step: Duration::from_secs(5),
            server_error_backoff: Duration::from_secs(2),
            network_error_backoff: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            rotate_user_agent: true,
        }
    }
}

impl FetchConfig {
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Scales `base` by a jitter factor; `sample` is expected in [0, 1).
pub fn jittered_delay(base: Duration, sample: f64) -> Duration {
    base.mul_f64(0.5 + sample.clamp(0.0, 1.0))
}

/// Rate-limited HTTP client shared by every crawler.
///
/// Cloning is cheap; clones share the transport.
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
}

impl FetchClient {
    pub fn new(transport: Arc<dyn Transport>, config: FetchConfig) -> Self {
        Self { transport, config }
    }

    /// Client over the production reqwest transport.
    pub fn reqwest(config: FetchConfig) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Same transport, different pacing. Crawlers use this to set their own delay.
    pub fn with_base_delay(&self, base_delay: Duration) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone().with_base_delay(base_delay),
        }
    }

    /// Fetch `request`, absorbing transient failures.
    ///
    /// Returns the first response that is neither 429 nor 5xx, whatever its
    /// status. Once `max_attempts` transient failures have been absorbed the
    /// result is [`FetchError::Exhausted`]. Each failed attempt is followed by
    /// its backoff, including the last one.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.pace().await;

        let request = self.with_user_agent(request);
        let attempts = self.config.max_attempts.max(1);
        let mut last = None;

        for attempt in 0..attempts {
            let (failure, backoff) = match self.transport.send(&request).await {
                Ok(response) if response.status == 429 => (
                    FetchError::RateLimited {
                        url: request.url.clone(),
                    },
                    self.config.rate_limit_step * (attempt + 1),
                ),
                Ok(response) if response.is_server_error() => (
                    FetchError::Server {
                        url: request.url.clone(),
                        status: response.status,
                    },
                    self.config.server_error_backoff,
                ),
                Ok(response) => {
                    debug!(url = %request.url, status = response.status, attempt, "fetch completed");
                    return Ok(response);
                }
                Err(e) if e.is_transient() => (e, self.config.network_error_backoff),
                Err(e) => return Err(e),
            };

            warn!(
                url = %request.url,
                attempt = attempt + 1,
                max_attempts = attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "transient fetch failure, backing off"
            );
            last = Some(Box::new(failure));
            tokio::time::sleep(backoff).await;
        }

        Err(FetchError::Exhausted {
            url: request.url,
            attempts,
            last,
        })
    }

    async fn pace(&self) {
        if self.config.base_delay.is_zero() {
            return;
        }
        let delay = jittered_delay(self.config.base_delay, fastrand::f64());
        tokio::time::sleep(delay).await;
    }

    fn with_user_agent(&self, request: FetchRequest) -> FetchRequest {
        if !self.config.rotate_user_agent || request.has_header("user-agent") {
            return request;
        }
        let agent = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
        request.header("User-Agent", agent)
    }
}
