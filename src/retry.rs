//! Retry and error recovery for transaction submission
//!
//! Exponential backoff for transient node errors. Reverts and other terminal
//! failures are returned immediately so the ledger can record them.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RelayError;
use crate::metrics;

/// Transaction retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Build from the relayer settings (attempts + initial delay)
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if another retry is allowed after `attempt` retries
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Classifies node error messages for retry and rebroadcast decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// The node already holds these exact transaction bytes
    AlreadyKnown,
    /// The nonce is used - by these bytes if they were sent before, else by another transaction
    NonceTooLow,
    /// Everything else (revert, bad signature, no funds) - do not retry
    Permanent,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("already known")
        || error_lower.contains("already imported")
        || error_lower.contains("known transaction")
    {
        return ErrorClass::AlreadyKnown;
    }

    if error_lower.contains("nonce too low") || error_lower.contains("already been processed") {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Permanent
}

/// Action to take after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    /// Retry after a backoff period
    RetryAfter(Duration),
    /// Give up and surface the error
    GiveUp,
}

/// Decide what to do after `attempt` failed attempts ending in `error`
pub fn next_action(config: &RetryConfig, attempt: u32, error: &RelayError) -> RetryAction {
    if !error.is_transient() {
        return RetryAction::GiveUp;
    }
    // attempt counts failures so far; retries already made is one less
    let retries_made = attempt.saturating_sub(1);
    if !config.should_retry(retries_made) {
        return RetryAction::GiveUp;
    }
    RetryAction::RetryAfter(config.backoff_for_attempt(retries_made))
}

/// Execute `operation` with retry on transient errors
///
/// `label` names the call in logs and metrics.
pub async fn with_retry<F, T, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, RelayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                match next_action(config, attempt, &e) {
                    RetryAction::RetryAfter(backoff) => {
                        warn!(
                            call = label,
                            attempt,
                            max = config.max_retries,
                            ?backoff,
                            error = %e,
                            "Retrying after backoff"
                        );
                        metrics::record_retry(label);
                        tokio::time::sleep(backoff).await;
                    }
                    RetryAction::GiveUp => {
                        debug!(call = label, attempt, error = %e, "Giving up");
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(16));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_secs(32));
        assert_eq!(config.backoff_for_attempt(5), Duration::from_secs(60)); // capped
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(classify_error("nonce too low"), ErrorClass::NonceTooLow);
        assert_eq!(
            classify_error("server returned an error response: error code -32000: already known"),
            ErrorClass::AlreadyKnown
        );
        assert_eq!(
            classify_error("Known transaction: 0x1234"),
            ErrorClass::AlreadyKnown
        );
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(classify_error("some unknown error"), ErrorClass::Permanent);
    }

    #[test]
    fn test_next_action() {
        let config = RetryConfig::default();
        let transient = RelayError::Rpc("connection refused".into());
        let reverted = RelayError::TransactionReverted {
            tx_hash: Default::default(),
        };

        assert_eq!(
            next_action(&config, 1, &transient),
            RetryAction::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            next_action(&config, 3, &transient),
            RetryAction::RetryAfter(Duration::from_secs(8))
        );
        assert_eq!(next_action(&config, 4, &transient), RetryAction::GiveUp);
        assert_eq!(next_action(&config, 1, &reverted), RetryAction::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient_errors() {
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = with_retry(&config, "test", move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RelayError::Rpc("network unreachable".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_does_not_retry_reverts() {
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&config, "test", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RelayError::TransactionReverted {
                    tx_hash: Default::default(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(RelayError::TransactionReverted { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_max_retries() {
        let config = RetryConfig::new(2, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&config, "test", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RelayError::Rpc("503 service unavailable".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
