//! Blocking HTTP image client with timeout and retries for transient failures.

use super::error::FetchError;
use super::AssetFetcher;
use std::time::Duration;
use tracing::debug;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; articlepack/0.1; +https://github.com/articlepack)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts per image (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 2, 4];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

/// Image client shared by all download workers. `reqwest::blocking::Client` is internally
/// reference counted, so one instance serves every thread.
#[derive(Debug, Clone)]
pub struct ImageClient {
    inner: reqwest::blocking::Client,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl ImageClient {
    /// Build a client with default User-Agent, timeout, and retries.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> ImageClientBuilder {
        ImageClientBuilder::default()
    }

    /// GET with retries on timeout, connection errors, HTTP 5xx and HTTP 429. Other errors and
    /// statuses are returned immediately.
    fn get_with_retry(&self, url: &str) -> Result<reqwest::blocking::Response, FetchError> {
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last_attempt = attempt >= max_attempts;
            match self.inner.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if !retryable || last_attempt {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    let backoff = if status.as_u16() == 429 {
                        backoff_for(&BACKOFF_429_SECS, attempt)
                    } else {
                        backoff_for(&self.backoff_secs, attempt)
                    };
                    debug!("HTTP {} from {}, retrying in {}s", status, url, backoff);
                    std::thread::sleep(Duration::from_secs(backoff));
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || last_attempt {
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            source: e,
                        });
                    }
                    let backoff = backoff_for(&self.backoff_secs, attempt);
                    debug!("{} failed ({}), retrying in {}s", url, e, backoff);
                    std::thread::sleep(Duration::from_secs(backoff));
                }
            }
        }
    }
}

/// Backoff after the given 1-based attempt; the last entry repeats, an empty list means 1s.
fn backoff_for(schedule: &[u64], attempt: u32) -> u64 {
    let idx = (attempt as usize).saturating_sub(1);
    schedule
        .get(idx)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(1)
}

impl AssetFetcher for ImageClient {
    fn fetch_bytes(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get_with_retry(uri)?;
        let bytes = response.bytes().map_err(|e| FetchError::BodyRead {
            url: uri.to_string(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }
}

/// Builder for ImageClient with optional User-Agent, timeout, and retry settings.
#[derive(Debug)]
pub struct ImageClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for ImageClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl ImageClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Per-request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Attempts per image (default 3, minimum 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff delays in seconds before each retry. If shorter than retry_count - 1, the last
    /// value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<ImageClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            // Default exponential: 1, 2, 4, ... for (retry_count - 1) steps
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(ImageClient {
            inner,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_reuses_last_entry() {
        assert_eq!(backoff_for(&[1, 2, 4], 1), 1);
        assert_eq!(backoff_for(&[1, 2, 4], 3), 4);
        assert_eq!(backoff_for(&[1, 2, 4], 9), 4);
        assert_eq!(backoff_for(&[], 2), 1);
    }

    #[test]
    fn builder_fills_empty_backoff_with_exponential_schedule() {
        let client = ImageClient::builder()
            .retry_count(4)
            .retry_backoff_secs(Vec::new())
            .build()
            .unwrap();
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        assert_eq!(client.retry_count, 4);
    }

    #[test]
    fn retry_count_has_a_floor_of_one() {
        let client = ImageClient::builder().retry_count(0).build().unwrap();
        assert_eq!(client.retry_count, 1);
    }
}
