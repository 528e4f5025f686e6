//! Retry policy with exponential backoff for provider HTTP calls

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial one
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Classified outcome of a single request attempt.
///
/// Providers map raw HTTP responses into this taxonomy; `do_with_retry`
/// decides what to do with each class.
#[derive(Debug)]
pub enum AttemptError {
    /// 401/403; failed immediately, never retried
    Auth { status: u16, body: String },
    /// 429 or 5xx; retried up to `max_retries`
    Retryable {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    /// Other 4xx; returned immediately
    Api { status: u16, body: String },
    /// Network failure; retried up to `max_retries`
    Transport(reqwest::Error),
    /// Terminal error that bypasses the retry loop entirely
    Fatal(Error),
}

/// Classify a non-success HTTP response, consuming its body.
pub async fn classify_response(resp: reqwest::Response) -> AttemptError {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();

    match status {
        401 | 403 => AttemptError::Auth { status, body },
        429 => AttemptError::Retryable {
            status,
            body,
            retry_after,
        },
        s if s >= 500 => AttemptError::Retryable {
            status,
            body,
            retry_after,
        },
        _ => AttemptError::Api { status, body },
    }
}

/// Execute `op` with exponential backoff for retryable failures.
///
/// 2xx returns immediately; 401/403 and other 4xx fail fast; 429/5xx and
/// transport errors retry up to `cfg.max_retries`. A `Retry-After` hint from
/// a retryable response overrides only the immediately following delay, and
/// only when it exceeds the computed backoff and is under `max_delay`.
/// Cancellation during a backoff wait yields [`Error::RetryCancelled`].
pub async fn do_with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    cfg: &RetryConfig,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut override_delay: Option<Duration> = None;
    let mut last_status: Option<u16> = None;

    for attempt in 0..=cfg.max_retries {
        if attempt > 0 {
            let mut delay = backoff_delay(attempt - 1, cfg);
            // One-shot Retry-After override; never mutates the schedule.
            if let Some(hint) = override_delay.take() {
                if hint > delay {
                    delay = hint;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::RetryCancelled {
                        attempt,
                        status: last_status,
                        source: Box::new(Error::Cancelled),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Auth { status, body }) => {
                return Err(Error::Auth { status, body });
            }
            Err(AttemptError::Api { status, body }) => {
                return Err(Error::Api { status, body });
            }
            Err(AttemptError::Fatal(err)) => return Err(err),
            Err(AttemptError::Retryable {
                status,
                body,
                retry_after,
            }) => {
                last_status = Some(status);
                if let Some(hint) = retry_after.filter(|d| *d < cfg.max_delay) {
                    override_delay = Some(hint);
                }
                if attempt == cfg.max_retries {
                    return Err(if status == 429 {
                        Error::RateLimited {
                            retries: cfg.max_retries,
                            body,
                        }
                    } else {
                        Error::Server {
                            status,
                            retries: cfg.max_retries,
                            body,
                        }
                    });
                }
                tracing::warn!(
                    "request failed with HTTP {} (attempt {}/{}), retrying",
                    status,
                    attempt + 1,
                    cfg.max_retries + 1
                );
            }
            Err(AttemptError::Transport(err)) => {
                last_status = None;
                if attempt == cfg.max_retries {
                    return Err(Error::Transport {
                        retries: cfg.max_retries,
                        source: err,
                    });
                }
                tracing::warn!(
                    "transport error (attempt {}/{}): {}, retrying",
                    attempt + 1,
                    cfg.max_retries + 1,
                    err
                );
            }
        }
    }

    unreachable!("retry loop returns on every path of the final attempt")
}

/// Delay for a given 0-indexed attempt: `base * 2^attempt + U(0, 1s)`,
/// capped at `max_delay`.
fn backoff_delay(attempt: u32, cfg: &RetryConfig) -> Duration {
    let exp = cfg
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    (exp + jitter).min(cfg.max_delay)
}
