//! Readiness polling.
//!
//! A dependent child must not start before the child it depends on answers
//! its health endpoint. The poller checks at a fixed interval up to a fixed
//! attempt ceiling. Running out of attempts is not an error: the caller gets
//! [`ReadinessOutcome::Exhausted`] and decides what to do (the supervisor
//! warns and continues).

use crate::{HealthCheckData, HealthStatus};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polling policy for one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Sleep after each failed attempt.
    pub interval: Duration,
    /// Attempt ceiling.
    pub max_attempts: u32,
    /// Per-attempt request timeout.
    pub attempt_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

/// How a readiness wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// The endpoint answered successfully on attempt `attempts`.
    Ready { attempts: u32 },
    /// Every attempt failed.
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    /// The wait was abandoned before the ceiling (shutdown or sibling exit).
    Aborted { attempts: u32 },
}

impl ReadinessOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts }
            | Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts } => *attempts,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Seam for the single readiness check, so polling can be driven without a
/// real HTTP server.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Check `endpoint` once. Failures are reported in the returned data.
    async fn check(&self, endpoint: &str, timeout: Duration) -> HealthCheckData;
}

/// Production probe: plain HTTP GET, any 2xx is ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpReadinessProbe;

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn check(&self, endpoint: &str, timeout: Duration) -> HealthCheckData {
        let start = std::time::Instant::now();

        match crate::http::check_http_health(endpoint, timeout).await {
            Ok(data) => data,
            Err(e) => HealthCheckData::unhealthy(
                Some(start.elapsed().as_millis() as u64),
                format!("HTTP health check failed: {}", e),
            ),
        }
    }
}

/// Poll `endpoint` until it is ready, the ceiling is reached, or `abort` fires.
pub async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    process_id: &str,
    endpoint: &str,
    policy: &ReadinessPolicy,
    abort: &CancellationToken,
) -> ReadinessOutcome {
    let mut status = HealthStatus::new();

    info!(
        "Waiting for {} to become ready at {} (interval: {:?}, max attempts: {})",
        process_id, endpoint, policy.interval, policy.max_attempts
    );

    for attempt in 1..=policy.max_attempts {
        let data = tokio::select! {
            _ = abort.cancelled() => {
                debug!("Readiness wait for {} aborted before attempt {}", process_id, attempt);
                return ReadinessOutcome::Aborted { attempts: attempt - 1 };
            }
            data = probe.check(endpoint, policy.attempt_timeout) => data,
        };
        status.record(&data);

        if status.is_healthy {
            info!("{} is ready (attempt {}/{})", process_id, attempt, policy.max_attempts);
            return ReadinessOutcome::Ready { attempts: attempt };
        }

        debug!(
            "{} readiness check attempt {}/{} failed: {}",
            process_id,
            attempt,
            policy.max_attempts,
            status.failure_reason.as_deref().unwrap_or("unknown")
        );

        tokio::select! {
            _ = abort.cancelled() => {
                debug!("Readiness wait for {} aborted after attempt {}", process_id, attempt);
                return ReadinessOutcome::Aborted { attempts: attempt };
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }

    warn!(
        "{} not ready after {} attempts ({:?}), continuing anyway",
        process_id,
        policy.max_attempts,
        policy.interval * policy.max_attempts
    );

    ReadinessOutcome::Exhausted {
        attempts: status.total_checks,
        last_error: status.failure_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails until the `ready_on`-th call, then succeeds.
    struct CountingProbe {
        ready_on: Option<u32>,
        calls: AtomicU32,
    }

    impl CountingProbe {
        fn ready_on(n: u32) -> Self {
            Self { ready_on: Some(n), calls: AtomicU32::new(0) }
        }

        fn never() -> Self {
            Self { ready_on: None, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl ReadinessProbe for CountingProbe {
        async fn check(&self, _endpoint: &str, _timeout: Duration) -> HealthCheckData {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.ready_on {
                Some(n) if call >= n => HealthCheckData::healthy(Some(1)),
                _ => HealthCheckData::unhealthy(Some(1), "Connection refused"),
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_millis(5),
            max_attempts,
            attempt_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_default_policy_matches_sixty_second_ceiling() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.interval * policy.max_attempts, Duration::from_secs(60));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_ready_after_k_attempts() {
        let probe = CountingProbe::ready_on(4);
        let outcome = wait_until_ready(
            &probe,
            "mcp",
            "http://localhost:3000/health",
            &fast_policy(30),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, ReadinessOutcome::Ready { attempts: 4 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausted_after_ceiling() {
        let probe = CountingProbe::never();
        let outcome = wait_until_ready(
            &probe,
            "mcp",
            "http://localhost:3000/health",
            &fast_policy(5),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            outcome,
            ReadinessOutcome::Exhausted {
                attempts: 5,
                last_error: Some("Connection refused".to_string()),
            }
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_abort_stops_polling() {
        let probe = CountingProbe::never();
        let abort = CancellationToken::new();
        abort.cancel();

        let outcome = wait_until_ready(
            &probe,
            "mcp",
            "http://localhost:3000/health",
            &fast_policy(30),
            &abort,
        )
        .await;

        assert_eq!(outcome, ReadinessOutcome::Aborted { attempts: 0 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_during_interval() {
        let probe = CountingProbe::never();
        let abort = CancellationToken::new();
        let policy = ReadinessPolicy {
            interval: Duration::from_secs(30),
            max_attempts: 30,
            attempt_timeout: Duration::from_millis(50),
        };

        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            wait_until_ready(&probe, "mcp", "http://localhost:3000/health", &policy, &abort),
        )
        .await
        .expect("abort must interrupt the interval sleep");

        assert_eq!(outcome, ReadinessOutcome::Aborted { attempts: 1 });
    }

    #[tokio::test]
    async fn test_http_probe_against_live_server() {
        let port = crate::http::test_server::serve_status(StatusCode::NO_CONTENT).await;
        let endpoint = format!("http://127.0.0.1:{}/health", port);

        let outcome = wait_until_ready(
            &HttpReadinessProbe,
            "live",
            &endpoint,
            &fast_policy(3),
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_ready());
        assert_eq!(outcome.attempts(), 1);
    }
}
