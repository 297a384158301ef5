//! Request-with-retry: the only place that sends HTTP requests.
//!
//! 429 responses and network failures are retried with exponential backoff
//! and jitter. Any other non-2xx status fails at once.

use log::{debug, warn};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::FetcherConfig;
use crate::error::FetchError;
use crate::transport::{HttpResponse, RequestOptions, Transport};

/// `base * multiplier^attempt * jitter`, capped at `max`.
pub fn backoff_delay(base: f64, multiplier: f64, attempt: u32, jitter: f64, max: f64) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base * multiplier.powi(exponent) * jitter;
    if !secs.is_finite() || secs > max {
        return Duration::from_secs_f64(max.max(0.0));
    }
    Duration::from_secs_f64(secs.max(0.0))
}

pub struct RetryingClient {
    transport: Arc<dyn Transport>,
    config: FetcherConfig,
    last_request: Mutex<Option<Instant>>,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn Transport>, config: FetcherConfig) -> Self {
        Self {
            transport,
            config,
            last_request: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(
            self.config.retry_delay,
            self.config.backoff_multiplier,
            attempt,
            self.config.jitter(),
            self.config.max_backoff,
        )
    }

    /// Holds back until `min_request_interval` has passed since the previous request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if self.config.min_request_interval > 0.0 {
            if let Some(prev) = *last {
                let interval = Duration::from_secs_f64(self.config.min_request_interval);
                let elapsed = prev.elapsed();
                if elapsed < interval {
                    let wait = interval - elapsed;
                    debug!("Waiting {:.1?} before next request to respect rate limits", wait);
                    sleep(wait).await;
                }
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, FetchError> {
        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;

        loop {
            self.pace().await;
            debug!("{} {} (attempt {}/{})", method, url, attempt + 1, max_retries + 1);

            let wait = match self.transport.send(method.clone(), url, options).await {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) if resp.status == 429 => {
                    if attempt >= max_retries {
                        return Err(FetchError::RateLimitExhausted {
                            url: url.to_string(),
                            attempts: attempt + 1,
                        });
                    }
                    let mut wait = self.backoff(attempt);
                    if self.config.honor_retry_after {
                        if let Some(after) = resp.retry_after() {
                            let cap = Duration::from_secs_f64(self.config.max_backoff);
                            wait = wait.max(after.min(cap));
                        }
                    }
                    warn!("Rate limited on {}. Waiting {:.1?} before retrying", url, wait);
                    wait
                }
                Ok(resp) => {
                    return Err(FetchError::HttpStatus {
                        url: url.to_string(),
                        status: resp.status,
                    })
                }
                Err(e) => {
                    if attempt >= max_retries || !e.is_retryable() {
                        return Err(FetchError::RequestFailed {
                            url: url.to_string(),
                            attempts: attempt + 1,
                            reason: e.to_string(),
                        });
                    }
                    let wait = self.backoff(attempt);
                    warn!("Request to {} failed ({}). Retrying in {:.1?}", url, e, wait);
                    wait
                }
            };

            sleep(wait).await;
            attempt += 1;
        }
    }

    pub async fn head(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, FetchError> {
        self.request(Method::HEAD, url, options).await
    }

    pub async fn get(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, FetchError> {
        self.request(Method::GET, url, options).await
    }
}
