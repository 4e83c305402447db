//! Supervisor status tracking.
//!
//! Shared between the supervisor (writer) and the status HTTP server
//! (reader). Keeps the most recent errors so an operator hitting `/health`
//! sees why the system is degraded.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Number of recent errors retained.
pub const MAX_RECENT_ERRORS: usize = 10;

/// Coarse supervisor state as reported to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorStatus {
    /// Children are being launched.
    Starting,
    /// All children launched and ready.
    Healthy,
    /// Running, but something was off (readiness timeout, environment issue).
    Degraded,
    /// Shutdown in progress.
    ShuttingDown,
    /// A child exited unexpectedly.
    Failed,
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorStatus::Starting => write!(f, "starting"),
            SupervisorStatus::Healthy => write!(f, "healthy"),
            SupervisorStatus::Degraded => write!(f, "degraded"),
            SupervisorStatus::ShuttingDown => write!(f, "shutting_down"),
            SupervisorStatus::Failed => write!(f, "failed"),
        }
    }
}

impl SupervisorStatus {
    /// Whether the status endpoint should answer 200.
    pub fn is_serving(&self) -> bool {
        matches!(self, SupervisorStatus::Healthy | SupervisorStatus::Degraded)
    }
}

/// One recorded error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusError {
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

/// Point-in-time view served over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: SupervisorStatus,
    pub uptime_secs: f64,
    pub last_check: Option<DateTime<Utc>>,
    pub errors: Vec<StatusError>,
}

#[derive(Debug)]
struct TrackerState {
    status: SupervisorStatus,
    last_check: Option<DateTime<Utc>>,
    errors: VecDeque<StatusError>,
}

/// Cloneable handle to the shared supervisor status.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    started: Instant,
    state: Arc<RwLock<TrackerState>>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Arc::new(RwLock::new(TrackerState {
                status: SupervisorStatus::Starting,
                last_check: None,
                errors: VecDeque::with_capacity(MAX_RECENT_ERRORS),
            })),
        }
    }

    /// Move to `status`.
    pub fn set_status(&self, status: SupervisorStatus) {
        let mut state = self.state.write();
        state.status = status;
        state.last_check = Some(Utc::now());
    }

    /// Record an error without changing the status.
    pub fn record_error(&self, error: impl Into<String>) {
        let mut state = self.state.write();
        let now = Utc::now();
        state.last_check = Some(now);
        if state.errors.len() == MAX_RECENT_ERRORS {
            state.errors.pop_front();
        }
        state.errors.push_back(StatusError {
            timestamp: now,
            error: error.into(),
        });
    }

    pub fn status(&self) -> SupervisorStatus {
        self.state.read().status
    }

    pub fn is_serving(&self) -> bool {
        self.status().is_serving()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.read();
        StatusSnapshot {
            status: state.status,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            last_check: state.last_check,
            errors: state.errors.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_starts_in_starting() {
        let tracker = StatusTracker::new();
        assert_eq!(tracker.status(), SupervisorStatus::Starting);
        assert!(!tracker.is_serving());
        assert!(tracker.snapshot().last_check.is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = StatusTracker::new();
        let reader = tracker.clone();

        tracker.set_status(SupervisorStatus::Healthy);
        assert_eq!(reader.status(), SupervisorStatus::Healthy);
        assert!(reader.is_serving());
    }

    #[test]
    fn test_recent_errors_are_bounded() {
        let tracker = StatusTracker::new();
        for i in 0..15 {
            tracker.record_error(format!("error {}", i));
        }

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(snapshot.errors[0].error, "error 5");
        assert_eq!(snapshot.errors[9].error, "error 14");
    }

    #[test]
    fn test_snapshot_serializes_snake_case_status() {
        let tracker = StatusTracker::new();
        tracker.set_status(SupervisorStatus::ShuttingDown);

        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["status"], "shutting_down");
        assert!(json["uptime_secs"].as_f64().unwrap() >= 0.0);
    }
}
