use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tandem_common::{ProcessError, ProcessResult};

/// Supervisor lifecycle phase. There is no way back from `ShuttingDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorPhase {
    /// Children are being launched
    Starting,
    /// All launches done, waiting for the first exit
    Running,
    /// Terminal: children are being (or have been) stopped
    ShuttingDown,
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorPhase::Starting => write!(f, "starting"),
            SupervisorPhase::Running => write!(f, "running"),
            SupervisorPhase::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Represents a phase transition with timestamp and reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from_phase: SupervisorPhase,
    pub to_phase: SupervisorPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Tracks the supervisor phase and rejects backwards transitions.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: SupervisorPhase,
    history: Vec<PhaseTransition>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: SupervisorPhase::Starting,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> SupervisorPhase {
        self.current
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn is_shutting_down(&self) -> bool {
        self.current == SupervisorPhase::ShuttingDown
    }

    /// Check if a transition from the current phase to `target` is valid
    pub fn is_valid_transition(&self, target: SupervisorPhase) -> bool {
        matches!(
            (self.current, target),
            (SupervisorPhase::Starting, SupervisorPhase::Running)
                | (SupervisorPhase::Starting, SupervisorPhase::ShuttingDown)
                | (SupervisorPhase::Running, SupervisorPhase::ShuttingDown)
        )
    }

    /// Transition to `target`, recording why.
    pub fn transition_to(
        &mut self,
        target: SupervisorPhase,
        reason: impl Into<String>,
    ) -> ProcessResult<()> {
        if !self.is_valid_transition(target) {
            return Err(ProcessError::operation_not_allowed(
                "supervisor",
                format!("transition to {}", target),
                self.current.to_string(),
            ));
        }

        let transition = PhaseTransition {
            from_phase: self.current,
            to_phase: target,
            timestamp: Utc::now(),
            reason: reason.into(),
        };

        tracing::debug!(
            "Supervisor transitioned from {} to {} ({})",
            transition.from_phase,
            transition.to_phase,
            transition.reason
        );

        self.current = target;
        self.history.push(transition);
        Ok(())
    }

    /// Enter `ShuttingDown`. Returns false if already there.
    pub fn begin_shutdown(&mut self, reason: impl Into<String>) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        self.transition_to(SupervisorPhase::ShuttingDown, reason).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut phase = PhaseMachine::new();
        assert_eq!(phase.current(), SupervisorPhase::Starting);

        phase.transition_to(SupervisorPhase::Running, "launch complete").unwrap();
        phase.transition_to(SupervisorPhase::ShuttingDown, "child exited").unwrap();

        assert!(phase.is_shutting_down());
        assert_eq!(phase.history().len(), 2);
        assert_eq!(phase.history()[1].reason, "child exited");
    }

    #[test]
    fn test_no_way_back() {
        let mut phase = PhaseMachine::new();
        phase.transition_to(SupervisorPhase::ShuttingDown, "signal").unwrap();

        assert!(phase.transition_to(SupervisorPhase::Running, "late").is_err());
        assert!(phase.transition_to(SupervisorPhase::Starting, "restart").is_err());
        assert_eq!(phase.current(), SupervisorPhase::ShuttingDown);
    }

    #[test]
    fn test_begin_shutdown_is_idempotent() {
        let mut phase = PhaseMachine::new();
        assert!(phase.begin_shutdown("first signal"));
        assert!(!phase.begin_shutdown("second signal"));
        assert_eq!(phase.history().len(), 1);
    }
}
