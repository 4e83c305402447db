//! The supervised child entity and its exit events.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tandem_monitoring::http::local_health_endpoint;
use tandem_process::{conventional_exit_code, SPAWN_FAILURE_EXIT_CODE};

use crate::config::ProcessConfig;

/// A child executable under supervisor control.
///
/// `pid` is set exactly while the child is running: [`mark_started`] sets it,
/// [`mark_exited`] clears it. Launched at most once, never restarted.
///
/// [`mark_started`]: ManagedProcess::mark_started
/// [`mark_exited`]: ManagedProcess::mark_exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub name: String,
    pub command: Vec<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub listen_port: Option<u16>,
    pub health_path: Option<String>,
    pub startup_delay: Option<Duration>,
    pub working_directory: Option<PathBuf>,
    pid: Option<u32>,
}

impl ManagedProcess {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            env_overrides: BTreeMap::new(),
            listen_port: None,
            health_path: None,
            startup_delay: None,
            working_directory: None,
            pid: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = Some(path.into());
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = Some(delay);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    /// Readiness URL, when both a port and a health path are declared.
    pub fn health_endpoint(&self) -> Option<String> {
        match (self.listen_port, self.health_path.as_deref()) {
            (Some(port), Some(path)) => Some(local_health_endpoint(port, path)),
            _ => None,
        }
    }

    pub(crate) fn mark_started(&mut self, pid: u32) {
        self.pid = Some(pid);
    }

    pub(crate) fn mark_exited(&mut self) {
        self.pid = None;
    }
}

impl From<&ProcessConfig> for ManagedProcess {
    fn from(config: &ProcessConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            env_overrides: config.env.clone(),
            listen_port: config.listen_port,
            health_path: config.health_path.clone(),
            startup_delay: config.startup_delay,
            working_directory: config.working_directory.clone(),
            pid: None,
        }
    }
}

/// One child's exit, as reported to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    /// Position in launch order.
    pub index: usize,
    pub name: String,
    pub pid: Option<u32>,
    /// `None` when the child never started or could not be waited on.
    pub status: Option<ExitStatus>,
    /// Shell-convention code: exit code, `128 + signal`, or 127 for spawn failure.
    pub exit_code: i32,
}

impl ExitEvent {
    pub(crate) fn exited(index: usize, name: &str, pid: u32, status: ExitStatus) -> Self {
        Self {
            index,
            name: name.to_string(),
            pid: Some(pid),
            status: Some(status),
            exit_code: conventional_exit_code(&status),
        }
    }

    pub(crate) fn spawn_failure(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            pid: None,
            status: None,
            exit_code: SPAWN_FAILURE_EXIT_CODE,
        }
    }

    pub(crate) fn wait_failure(index: usize, name: &str, pid: u32) -> Self {
        Self {
            index,
            name: name.to_string(),
            pid: Some(pid),
            status: None,
            exit_code: 1,
        }
    }

    /// Human-readable description for logs.
    pub fn describe(&self) -> String {
        match (self.pid, &self.status) {
            (None, _) => format!("{} failed to start", self.name),
            (Some(pid), Some(status)) if status.code().is_some() => {
                format!("{} (PID {}) exited with code {}", self.name, pid, self.exit_code)
            }
            (Some(pid), Some(_)) => format!(
                "{} (PID {}) was killed by a signal (code {})",
                self.name, pid, self.exit_code
            ),
            (Some(pid), None) => format!("{} (PID {}) could not be waited on", self.name, pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_endpoint() {
        let process = ManagedProcess::new("mcp", vec!["node".to_string()])
            .with_env("MCP_TRANSPORT", "http")
            .with_listen_port(3000)
            .with_health_path("/health");

        assert_eq!(process.health_endpoint().as_deref(), Some("http://localhost:3000/health"));
        assert_eq!(
            process.env_overrides.get("MCP_TRANSPORT").map(String::as_str),
            Some("http")
        );
        assert!(!process.is_running());
    }

    #[test]
    fn test_no_endpoint_without_port_or_path() {
        let port_only = ManagedProcess::new("a", vec!["a".to_string()]).with_listen_port(8080);
        assert!(port_only.health_endpoint().is_none());

        let path_only = ManagedProcess::new("b", vec!["b".to_string()]).with_health_path("/health");
        assert!(path_only.health_endpoint().is_none());
    }

    #[test]
    fn test_pid_tracks_running_state() {
        let mut process = ManagedProcess::new("a", vec!["a".to_string()]);
        process.mark_started(4242);
        assert_eq!(process.pid(), Some(4242));
        assert!(process.is_running());

        process.mark_exited();
        assert_eq!(process.pid(), None);
        assert!(!process.is_running());
    }

    #[test]
    fn test_from_config() {
        let mut config = ProcessConfig::new("coordinator", vec!["python".to_string()]);
        config.listen_port = Some(8080);
        config.startup_delay = Some(Duration::from_secs(5));
        config.env.insert("PORT".to_string(), "8080".to_string());

        let process = ManagedProcess::from(&config);
        assert_eq!(process.name, "coordinator");
        assert_eq!(process.listen_port, Some(8080));
        assert_eq!(process.startup_delay, Some(Duration::from_secs(5)));
        assert_eq!(process.env_overrides.get("PORT").map(String::as_str), Some("8080"));
        assert!(process.pid().is_none());
    }

    #[test]
    fn test_spawn_failure_event() {
        let event = ExitEvent::spawn_failure(1, "coordinator");
        assert_eq!(event.exit_code, 127);
        assert!(event.describe().contains("failed to start"));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_event_codes() {
        use std::os::unix::process::ExitStatusExt;

        let crashed = ExitEvent::exited(0, "mcp", 10, ExitStatus::from_raw(3 << 8));
        assert_eq!(crashed.exit_code, 3);
        assert!(crashed.describe().contains("exited with code 3"));

        let killed = ExitEvent::exited(0, "mcp", 10, ExitStatus::from_raw(9));
        assert_eq!(killed.exit_code, 137);
        assert!(killed.describe().contains("killed by a signal"));
    }
}
