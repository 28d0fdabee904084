//! Retry and degradation helpers for external service calls.

use crate::error::{AppError, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Configuration for retry policies
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Policy for the streaming catalog and media library: two retries,
    /// 250 ms then 1 s.
    pub fn remote_lookup() -> Self {
        Self::default()
    }
}

/// Retry a remote operation with exponential backoff. Non-transient errors
/// are returned immediately.
pub async fn retry_external_operation<F, Fut, T>(
    operation: F,
    config: RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }
                last_error = Some(err);

                if attempt < config.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %last_error.as_ref().unwrap(),
                        "Operation failed, retrying"
                    );

                    sleep(delay).await;
                    delay = std::cmp::min(
                        Duration::from_millis(
                            (delay.as_millis() as f64 * config.backoff_multiplier) as u64,
                        ),
                        config.max_delay,
                    );
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %last_error.as_ref().unwrap(),
                        "Operation failed after all retry attempts"
                    );
                }
            }
        }
    }

    Err(last_error.unwrap_or(AppError::Internal { message: None }))
}

/// Circuit breaker states
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker guarding one external service (the transfer daemon,
/// the fingerprint service). A run of transient failures opens the
/// circuit; once the recovery window passes, a single probe call is let
/// through and its outcome decides whether the circuit closes or slams
/// shut for another window.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: &'static str,
    state: CircuitBreakerState,
    consecutive_failures: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    opened_at: Option<std::time::Instant>,
}

impl CircuitBreaker {
    pub fn new(service: &'static str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            service,
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            failure_threshold,
            recovery_timeout,
            opened_at: None,
        }
    }

    /// Whether a call may proceed. An open circuit answers immediately
    /// with the same service-unavailable error the call would otherwise
    /// earn the slow way.
    pub fn try_acquire(&mut self) -> Result<()> {
        match self.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => Ok(()),
            CircuitBreakerState::Open => {
                let window_elapsed = self
                    .opened_at
                    .map(|t| t.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if window_elapsed {
                    self.state = CircuitBreakerState::HalfOpen;
                    info!(service = self.service, "Circuit half-open, allowing probe");
                    Ok(())
                } else {
                    Err(AppError::ServiceUnavailable {
                        service: self.service.to_string(),
                    })
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitBreakerState::Closed {
            info!(service = self.service, "Circuit closed after recovery");
        }
        self.state = CircuitBreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            CircuitBreakerState::HalfOpen => {
                self.state = CircuitBreakerState::Open;
                self.opened_at = Some(std::time::Instant::now());
                warn!(service = self.service, "Probe failed, circuit reopened");
            }
            CircuitBreakerState::Closed
                if self.consecutive_failures >= self.failure_threshold =>
            {
                self.state = CircuitBreakerState::Open;
                self.opened_at = Some(std::time::Instant::now());
                warn!(
                    service = self.service,
                    consecutive_failures = self.consecutive_failures,
                    "Circuit opened"
                );
            }
            _ => {}
        }
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }
}

/// Graceful degradation helper for optional features
pub async fn with_graceful_degradation<F, Fut, T>(
    operation: F,
    fallback_value: T,
    feature_name: &str,
) -> T
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match operation().await {
        Ok(result) => result,
        Err(err) => {
            warn!(
                feature = feature_name,
                error = %err,
                "Feature failed, using fallback value"
            );
            fallback_value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn catalog_blip_is_absorbed_by_lookup_policy() {
        // One gateway hiccup on a playlist page fetch; the standard
        // lookup policy's retry lands the second attempt.
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_external_operation(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AppError::ServiceUnavailable {
                            service: "spotify".into(),
                        })
                    } else {
                        Ok("playlist page")
                    }
                }
            },
            RetryConfig::remote_lookup(),
            "spotify_get",
        )
        .await;

        assert_eq!(result.unwrap(), "playlist page");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bad_input_is_never_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<&str> = retry_external_operation(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::InvalidInput {
                        message: "not a playlist url".into(),
                    })
                }
            },
            RetryConfig::remote_lookup(),
            "playlist_parse",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_daemon_exhausts_retry_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 3.0,
        };

        let result: Result<()> = retry_external_operation(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::Timeout {
                        service: "slskd".into(),
                    })
                }
            },
            config,
            "slskd_snapshot",
        )
        .await;

        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn daemon_outage_opens_circuit_until_probe_succeeds() {
        // Mirrors the slskd wiring: five bad snapshots in a row open the
        // circuit, with a short recovery window for the test.
        let mut breaker = CircuitBreaker::new("slskd", 5, Duration::from_millis(40));

        for _ in 0..4 {
            breaker.record_failure();
            assert!(breaker.try_acquire().is_ok());
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), &CircuitBreakerState::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(AppError::ServiceUnavailable { .. })
        ));

        // After the window, one probe goes through.
        std::thread::sleep(Duration::from_millis(45));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), &CircuitBreakerState::HalfOpen);

        // The probe failing slams the circuit shut for another window.
        breaker.record_failure();
        assert_eq!(breaker.state(), &CircuitBreakerState::Open);
        assert!(breaker.try_acquire().is_err());

        // A successful probe after the next window closes it for good.
        std::thread::sleep(Duration::from_millis(45));
        assert!(breaker.try_acquire().is_ok());
        breaker.record_success();
        assert_eq!(breaker.state(), &CircuitBreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let mut breaker = CircuitBreaker::new("slskd", 3, Duration::from_millis(10));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        // The streak restarted; two more failures stay under threshold.
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), &CircuitBreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), &CircuitBreakerState::Open);
    }
}
