//! Retry helpers and RPC error classification.

use crate::error::CoreError;
use anyhow::{Context, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Smallest delay a backoff schedule will use.
const MIN_BASE_DELAY_MS: u64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    /// Adds a random `[0, delay/2)` on top of each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 30,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay_ms.max(MIN_BASE_DELAY_MS),
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * self.exponential_base.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter && delay_ms >= 2.0 {
            delay_ms + rand::thread_rng().gen_range(0.0..delay_ms / 2.0)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Runs `operation` until it succeeds or `max_retries` retries are spent.
/// Only transient errors are retried; anything else is returned at once.
pub async fn with_retry<T, F, Fut>(
    config: RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt + 1);
                }
                return Ok(result);
            }
            Err(e) if !is_transient_error(&e) => return Err(e),
            Err(e) if attempt >= config.max_retries => {
                let error_msg = format!("{}", e);
                return Err(e).context(format!(
                    "{} failed after {} attempts. Last error: {}",
                    operation_name,
                    attempt + 1,
                    error_msg
                ));
            }
            Err(e) => {
                let delay = config.calculate_delay(attempt);
                debug!(
                    "{} failed (attempt {}/{}). Retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Result of [`poll_with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Every attempt came back empty or failed.
    Exhausted { attempts: u32 },
}

/// Polls `operation` until it yields `Some`, sleeping with exponential
/// backoff between attempts. Errors count as misses; the last one is
/// logged at debug level.
pub async fn poll_with_backoff<T, F, Fut>(
    config: RetryConfig,
    token: &CancellationToken,
    mut operation: F,
) -> Result<PollOutcome<T>, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 0..config.max_retries {
        if token.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        match operation().await {
            Ok(Some(value)) => return Ok(PollOutcome::Ready(value)),
            Ok(None) => {}
            Err(e) => debug!(attempt = attempt + 1, error = %e, "Poll attempt failed"),
        }
        if attempt + 1 == config.max_retries {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => return Err(CoreError::Cancelled),
            _ = tokio::time::sleep(config.calculate_delay(attempt)) => {}
        }
    }
    Ok(PollOutcome::Exhausted {
        attempts: config.max_retries,
    })
}

/// How a node error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// The node refused the transaction. Never retried; the nonce stays
    /// consumed.
    Rejected,
    /// Network or server trouble worth another try.
    Transient,
    Other,
}

const REJECTION_PATTERNS: [&str; 6] = [
    "nonce too low",
    "already known",
    "replacement transaction underpriced",
    "transaction underpriced",
    "could not replace existing",
    "insufficient funds",
];

const TRANSIENT_PATTERNS: [&str; 12] = [
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "connection closed",
    "network error",
    "temporary failure",
    "service unavailable",
    "bad gateway",
    "rate limited",
    "too many requests",
    "429",
];

pub fn classify_rpc_error(message: &str) -> RpcErrorKind {
    let message = message.to_lowercase();
    if REJECTION_PATTERNS.iter().any(|p| message.contains(p)) {
        RpcErrorKind::Rejected
    } else if TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
        || message.contains(" 502")
        || message.contains(" 503")
        || message.contains(" 504")
    {
        RpcErrorKind::Transient
    } else {
        RpcErrorKind::Other
    }
}

pub fn is_transient_error(error: &anyhow::Error) -> bool {
    classify_rpc_error(&format!("{:#}", error)) == RpcErrorKind::Transient
}

pub fn is_rejection(error: &anyhow::Error) -> bool {
    classify_rpc_error(&format!("{:#}", error)) == RpcErrorKind::Rejected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new(10, 100).with_max_delay(1_000).without_jitter();
        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(800));
        assert_eq!(config.calculate_delay(4), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_adds_up_to_half() {
        let config = RetryConfig::new(10, 100);
        for _ in 0..50 {
            let delay = config.calculate_delay(1);
            assert!(delay >= Duration::from_millis(200) && delay < Duration::from_millis(300));
        }
    }

    #[test]
    fn test_base_delay_has_floor() {
        assert_eq!(RetryConfig::new(3, 1).base_delay_ms, MIN_BASE_DELAY_MS);
    }
}
