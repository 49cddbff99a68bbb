use rampgauge_common::{RampGaugeError, Result};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Probe client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on one GET, including reading the body.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a single timed GET.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRequest {
    pub url: String,
    /// `None` when no response arrived (network error or timeout).
    pub status: Option<u16>,
    pub duration: Duration,
    pub error: Option<RampGaugeError>,
}

impl SubRequest {
    pub fn timed_out(&self) -> bool {
        matches!(self.error, Some(RampGaugeError::Timeout(_)))
    }
}

/// Issues plain HTTP GETs with a hard timeout and measures them.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct ProbeClient {
    pub config: ClientConfig,
    http_client: reqwest::Client,
}

impl ProbeClient {
    /// Create a new client with the given configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// GET `url` and return its status code once the whole body has been read.
    /// Any status is `Ok`; only transport failures and timeouts are errors.
    pub async fn fetch_status(&self, url: &str) -> Result<u16> {
        let limit = self.config.request_timeout;
        match timeout(limit, self.get_and_drain(url)).await {
            Ok(result) => result,
            Err(_) => Err(RampGaugeError::Timeout(limit.as_millis() as u64)),
        }
    }

    async fn get_and_drain(&self, url: &str) -> Result<u16> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| RampGaugeError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        // The payload is irrelevant, but perceived latency includes receiving it.
        response
            .bytes()
            .await
            .map_err(|e| RampGaugeError::NetworkError(e.to_string()))?;

        Ok(status)
    }

    /// Timed GET that never fails: errors are folded into the returned sample.
    /// A timed-out request is reported with a duration equal to the timeout.
    pub async fn probe(&self, url: &str) -> SubRequest {
        let start = Instant::now();
        let result = self.fetch_status(url).await;
        let elapsed = start.elapsed();

        match result {
            Ok(status) => SubRequest {
                url: url.to_string(),
                status: Some(status),
                duration: elapsed,
                error: None,
            },
            Err(err) => {
                tracing::debug!(url, error = %err, "sub-request failed");
                let duration = match err {
                    RampGaugeError::Timeout(_) => self.config.request_timeout,
                    _ => elapsed,
                };
                SubRequest {
                    url: url.to_string(),
                    status: None,
                    duration,
                    error: Some(err),
                }
            }
        }
    }
}
