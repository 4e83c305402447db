//! # Tandem Monitoring
//!
//! Health checking for the tandem supervisor.
//!
//! This crate provides:
//! - HTTP health checks against a child's readiness endpoint
//! - A bounded readiness poller (fixed interval, fixed attempt ceiling)
//! - The supervisor's own status tracker

pub mod http;
pub mod readiness;
pub mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Health check error types.
///
/// Connection failures and timeouts are not errors: they come back as an
/// unhealthy [`HealthCheckData`].
#[derive(Error, Debug)]
pub enum HealthCheckError {
    #[error("Health check invalid response: {id} - {response}")]
    InvalidResponse { id: String, response: String },
}

/// Result type for health check operations.
pub type HealthCheckResult<T> = Result<T, HealthCheckError>;

/// Health check result data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckData {
    pub is_healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl HealthCheckData {
    pub fn healthy(response_time_ms: Option<u64>) -> Self {
        Self {
            is_healthy: true,
            checked_at: Utc::now(),
            response_time_ms,
            error_message: None,
        }
    }

    pub fn unhealthy(response_time_ms: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            checked_at: Utc::now(),
            response_time_ms,
            error_message: Some(reason.into()),
        }
    }
}

/// Running tally of health check results for one endpoint.
///
/// Starts out not healthy: a readiness target is unproven until its first
/// successful check.
#[derive(Debug, Clone, Default)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_checks: u32,
    pub consecutive_failures: u32,
    pub failure_reason: Option<String>,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        let now = Utc::now();
        self.is_healthy = true;
        self.last_check = Some(now);
        self.last_success = Some(now);
        self.total_checks += 1;
        self.consecutive_failures = 0;
        self.failure_reason = None;
    }

    pub fn record_failure(&mut self, reason: String) {
        self.is_healthy = false;
        self.last_check = Some(Utc::now());
        self.total_checks += 1;
        self.consecutive_failures += 1;
        self.failure_reason = Some(reason);
    }

    /// Fold a single check result into the tally.
    pub fn record(&mut self, data: &HealthCheckData) {
        if data.is_healthy {
            self.record_success();
        } else {
            let reason = data
                .error_message
                .clone()
                .unwrap_or_else(|| "Unknown failure".to_string());
            self.record_failure(reason);
        }
    }
}

// Re-export main types
pub use http::*;
pub use readiness::*;
pub use status::*;
