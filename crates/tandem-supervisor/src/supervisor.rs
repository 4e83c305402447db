//! Ordered launch, readiness gating and coordinated shutdown.
//!
//! Each launched child gets an exit monitor task that owns its
//! `tokio::process::Child`, reaps it, and reports an [`ExitEvent`] on a
//! channel. The supervisor itself never holds a `Child`; termination is
//! PID-based, and a finished monitor task is the exit confirmation.
//!
//! Two cancellation tokens drive everything:
//! - `shutdown`: external shutdown request (signal listener, caller).
//! - `halt_launch`: a child of `shutdown`, also cancelled by any child exit.
//!   Launch stops and readiness polling aborts as soon as it fires.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tandem_common::{ProcessError, ProcessResult};
use tandem_monitoring::{
    wait_until_ready, HttpReadinessProbe, ReadinessOutcome, ReadinessPolicy, ReadinessProbe,
    StatusTracker, SupervisorStatus,
};
use tandem_process::{force_kill, spawn_child, terminate_gracefully, SpawnRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorOptions;
use crate::process::{ExitEvent, ManagedProcess};
use crate::state::{PhaseMachine, SupervisorPhase};

/// Timeouts and polling policy for one supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Time allowed for children to exit after SIGTERM.
    pub graceful_timeout: Duration,
    /// Time allowed for children to exit after SIGKILL.
    pub force_kill_timeout: Duration,
    pub readiness: ReadinessPolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(10),
            force_kill_timeout: Duration::from_secs(3),
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl From<&SupervisorOptions> for SupervisorSettings {
    fn from(options: &SupervisorOptions) -> Self {
        Self {
            graceful_timeout: options.graceful_timeout,
            force_kill_timeout: options.force_kill_timeout,
            readiness: options.readiness.into(),
        }
    }
}

/// Why `wait()` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// A child exited (or failed to start) first.
    ChildExited(ExitEvent),
    /// Shutdown was requested from outside.
    ShutdownRequested,
}

/// What `shutdown()` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Children that received SIGTERM, in signal order.
    pub signalled: Vec<String>,
    /// Children that exited within the grace period.
    pub terminated: Vec<String>,
    /// Children that had to be killed.
    pub force_killed: Vec<String>,
    /// Children whose exit could not be confirmed.
    pub unconfirmed: Vec<String>,
}

impl ShutdownReport {
    /// True when every signalled child was confirmed gone.
    pub fn fully_drained(&self) -> bool {
        self.unconfirmed.is_empty()
    }
}

/// Final result of a supervisor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorExit {
    pub cause: ExitCause,
    /// Code the supervisor process should exit with.
    pub exit_code: i32,
    pub report: ShutdownReport,
}

impl SupervisorExit {
    /// Apply the exit-code policy.
    ///
    /// An unplanned child exit is always a failure: its own code when
    /// non-zero, else 1. A requested shutdown is a success only when every
    /// child was confirmed gone.
    pub fn from_cause(cause: ExitCause, report: ShutdownReport) -> Self {
        let exit_code = match &cause {
            ExitCause::ChildExited(event) if event.exit_code != 0 => event.exit_code,
            ExitCause::ChildExited(_) => 1,
            ExitCause::ShutdownRequested if report.fully_drained() => 0,
            ExitCause::ShutdownRequested => 1,
        };

        Self {
            cause,
            exit_code,
            report,
        }
    }
}

struct ChildRecord {
    process: ManagedProcess,
    monitor: Option<JoinHandle<()>>,
}

impl ChildRecord {
    /// The child may still be alive: it has a PID and its monitor has not
    /// reaped it yet.
    fn is_live(&self) -> bool {
        self.process.is_running()
            && self.monitor.as_ref().map_or(false, |m| !m.is_finished())
    }
}

/// Supervises an ordered list of child processes.
pub struct Supervisor {
    settings: SupervisorSettings,
    shared_env: BTreeMap<String, String>,
    probe: Arc<dyn ReadinessProbe>,
    status: StatusTracker,
    shutdown: CancellationToken,
    halt_launch: CancellationToken,
    records: Vec<ChildRecord>,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    exit_rx: mpsc::UnboundedReceiver<ExitEvent>,
    phase: PhaseMachine,
    readiness: Vec<(String, ReadinessOutcome)>,
    degraded: bool,
    shutdown_report: Option<ShutdownReport>,
    /// First child exit seen before any SIGTERM went out.
    unplanned_exit: Option<ExitEvent>,
    finished: Option<SupervisorExit>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        let shutdown = CancellationToken::new();
        let halt_launch = shutdown.child_token();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        Self {
            settings,
            shared_env: BTreeMap::new(),
            probe: Arc::new(HttpReadinessProbe),
            status: StatusTracker::new(),
            shutdown,
            halt_launch,
            records: Vec::new(),
            exit_tx,
            exit_rx,
            phase: PhaseMachine::new(),
            readiness: Vec::new(),
            degraded: false,
            shutdown_report: None,
            unplanned_exit: None,
            finished: None,
        }
    }

    /// Environment layered under every child's own overrides.
    pub fn with_shared_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.shared_env = env;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_status_tracker(mut self, status: StatusTracker) -> Self {
        self.status = status;
        self
    }

    /// Use an externally owned shutdown token (e.g. one a signal listener
    /// cancels).
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.halt_launch = token.child_token();
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn status_tracker(&self) -> &StatusTracker {
        &self.status
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.phase.current()
    }

    /// Launched processes in launch order.
    pub fn processes(&self) -> impl Iterator<Item = &ManagedProcess> {
        self.records.iter().map(|r| &r.process)
    }

    /// Readiness results, one per process that declared a health path.
    pub fn readiness_outcomes(&self) -> &[(String, ReadinessOutcome)] {
        &self.readiness
    }

    /// Record a non-fatal problem: logged, kept in the status, and the
    /// supervisor reports `degraded` instead of `healthy` once running.
    pub fn report_issue(&mut self, issue: impl Into<String>) {
        let issue = issue.into();
        warn!("{}", issue);
        self.status.record_error(issue);
        self.degraded = true;
    }

    /// Start `processes` in order, gating each on the readiness of the ones
    /// before it.
    ///
    /// Stops early, without error, when shutdown is requested or any launched
    /// child exits; `wait()` then reports the cause. A child that cannot be
    /// spawned counts as an immediate exit with code 127.
    pub async fn launch(&mut self, processes: Vec<ManagedProcess>) -> ProcessResult<()> {
        if self.phase.current() != SupervisorPhase::Starting || !self.records.is_empty() {
            return Err(ProcessError::operation_not_allowed(
                "supervisor",
                "launch",
                self.phase.current().to_string(),
            ));
        }

        check_distinct_ports(&processes)?;
        check_health_ports(&processes)?;

        let total = processes.len();
        info!("Launching {} processes", total);
        self.status.set_status(SupervisorStatus::Starting);

        for process in processes {
            if self.halt_launch.is_cancelled() {
                info!(
                    "Launch halted after {}/{} processes",
                    self.records.len(),
                    total
                );
                break;
            }

            let index = self.records.len();
            let spawned = spawn_child(&SpawnRequest {
                id: &process.name,
                command: &process.command,
                shared_env: &self.shared_env,
                env_overrides: &process.env_overrides,
                working_directory: process.working_directory.as_deref(),
            });

            let mut record = ChildRecord {
                process,
                monitor: None,
            };

            match spawned {
                Ok(child) => match child.id() {
                    Some(pid) => {
                        info!("Started {} (PID: {})", record.process.name, pid);
                        record.process.mark_started(pid);
                        record.monitor = Some(self.spawn_exit_monitor_task(
                            index,
                            &record.process.name,
                            pid,
                            child,
                        ));
                    }
                    None => {
                        // Already reaped: nothing left to supervise.
                        error!("{} exited before its PID could be read", record.process.name);
                        self.report_exit(ExitEvent::spawn_failure(index, &record.process.name));
                    }
                },
                Err(e) => {
                    error!("Failed to start {}: {}", record.process.name, e);
                    self.status.record_error(e.to_string());
                    self.report_exit(ExitEvent::spawn_failure(index, &record.process.name));
                }
            }

            let launched = record.process.is_running();
            let endpoint = record.process.health_endpoint();
            let startup_delay = record.process.startup_delay;
            let name = record.process.name.clone();
            self.records.push(record);

            if !launched {
                break;
            }

            if let Some(endpoint) = endpoint {
                self.await_readiness(&name, &endpoint).await;
            } else if let Some(delay) = startup_delay {
                debug!("Giving {} {:?} to start", name, delay);
                tokio::select! {
                    _ = self.halt_launch.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if self.phase.current() == SupervisorPhase::Starting {
            self.phase
                .transition_to(SupervisorPhase::Running, "launch finished")?;
        }

        if self.shutdown.is_cancelled() {
            debug!("Shutdown requested during launch");
        } else if self.halt_launch.is_cancelled() {
            self.status.set_status(SupervisorStatus::Failed);
        } else if self.degraded {
            info!("All {} processes launched (degraded)", total);
            self.status.set_status(SupervisorStatus::Degraded);
        } else {
            info!("All {} processes launched", total);
            self.status.set_status(SupervisorStatus::Healthy);
        }

        Ok(())
    }

    async fn await_readiness(&mut self, name: &str, endpoint: &str) {
        let outcome = wait_until_ready(
            self.probe.as_ref(),
            name,
            endpoint,
            &self.settings.readiness,
            &self.halt_launch,
        )
        .await;

        if let ReadinessOutcome::Exhausted { attempts, last_error } = &outcome {
            // Warn and continue: a slow health endpoint does not block startup.
            self.report_issue(format!(
                "{} not ready after {} attempts: {}",
                name,
                attempts,
                last_error.as_deref().unwrap_or("no response")
            ));
        }

        self.readiness.push((name.to_string(), outcome));
    }

    /// Spawn the task that owns `child`, reaps it and reports its exit.
    fn spawn_exit_monitor_task(
        &self,
        index: usize,
        name: &str,
        pid: u32,
        mut child: tokio::process::Child,
    ) -> JoinHandle<()> {
        let name = name.to_string();
        let exit_tx = self.exit_tx.clone();
        let halt_launch = self.halt_launch.clone();

        tokio::spawn(async move {
            debug!("Exit monitor started for {} (PID: {})", name, pid);

            let event = match child.wait().await {
                Ok(status) => {
                    if status.success() {
                        info!("{} (PID: {}) exited with code 0", name, pid);
                    } else {
                        warn!("{} (PID: {}) exited with status: {}", name, pid, status);
                    }
                    ExitEvent::exited(index, &name, pid, status)
                }
                Err(e) => {
                    error!("Failed to wait for {} (PID: {}): {}", name, pid, e);
                    ExitEvent::wait_failure(index, &name, pid)
                }
            };

            // The receiver lives as long as the supervisor.
            let _ = exit_tx.send(event);
            halt_launch.cancel();
        })
    }

    fn report_exit(&self, event: ExitEvent) {
        let _ = self.exit_tx.send(event);
        self.halt_launch.cancel();
    }

    /// Block until the first child exits or shutdown is requested, then shut
    /// down and return the exit code to use.
    ///
    /// Returns immediately once the supervisor has shut down: a later call
    /// repeats the first result, and a call after `shutdown()` reports the
    /// outcome of that shutdown.
    pub async fn wait(&mut self) -> SupervisorExit {
        if let Some(exit) = &self.finished {
            return exit.clone();
        }

        let cause = if self.phase.is_shutting_down() {
            debug!("Already shut down; reporting recorded outcome");
            self.unplanned_exit
                .clone()
                .map_or(ExitCause::ShutdownRequested, ExitCause::ChildExited)
        } else {
            let cause = self.next_exit_cause().await;
            match &cause {
                ExitCause::ChildExited(event) => {
                    error!("{}; shutting down", event.describe());
                    self.status.record_error(event.describe());
                    self.status.set_status(SupervisorStatus::Failed);
                    self.apply_exit(event);
                }
                ExitCause::ShutdownRequested => {
                    info!("Shutdown requested");
                }
            }
            cause
        };

        let report = self.shutdown().await;
        let exit = SupervisorExit::from_cause(cause, report);
        info!("Supervisor exiting with code {}", exit.exit_code);
        self.finished = Some(exit.clone());
        exit
    }

    async fn next_exit_cause(&mut self) -> ExitCause {
        if self.records.is_empty() && !self.shutdown.is_cancelled() {
            info!("No processes launched; waiting for shutdown request");
        }

        let event = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            // The supervisor holds a sender, so the channel cannot close.
            event = self.exit_rx.recv() => event,
        };

        // A child that died before the request still counts as a crash.
        match event.or_else(|| self.exit_rx.try_recv().ok()) {
            Some(event) => ExitCause::ChildExited(event),
            None => ExitCause::ShutdownRequested,
        }
    }

    /// Stop every child that is still running.
    ///
    /// SIGTERM goes out in reverse launch order; children still alive after
    /// the grace period get SIGKILL. Calling this again returns the first
    /// report without signalling anything.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        if !self.phase.begin_shutdown("shutdown requested") {
            debug!("Shutdown already performed");
            return self.shutdown_report.clone().unwrap_or_default();
        }

        self.halt_launch.cancel();
        self.status.set_status(SupervisorStatus::ShuttingDown);
        if let Some(event) = self.drain_exit_events() {
            self.unplanned_exit.get_or_insert(event);
        }

        let mut report = ShutdownReport::default();
        let mut pending = Vec::new();

        for index in (0..self.records.len()).rev() {
            let record = &self.records[index];
            if !record.is_live() {
                continue;
            }
            let Some(pid) = record.process.pid() else {
                continue;
            };

            info!("Sending SIGTERM to {} (PID: {})", record.process.name, pid);
            if let Err(e) = terminate_gracefully(pid) {
                warn!("Failed to signal {}: {}", record.process.name, e);
            }
            report.signalled.push(record.process.name.clone());
            pending.push(index);
        }

        let deadline = Instant::now() + self.settings.graceful_timeout;
        let mut stragglers = Vec::new();
        for index in pending {
            if self.confirm_exit(index, deadline).await {
                report.terminated.push(self.records[index].process.name.clone());
            } else {
                stragglers.push(index);
            }
        }

        if !stragglers.is_empty() {
            for &index in &stragglers {
                let record = &self.records[index];
                if let Some(pid) = record.process.pid() {
                    warn!(
                        "{} (PID: {}) did not exit within {:?}, sending SIGKILL",
                        record.process.name, pid, self.settings.graceful_timeout
                    );
                    if let Err(e) = force_kill(pid) {
                        error!("Force kill failed for {}: {}", record.process.name, e);
                    }
                }
            }

            let deadline = Instant::now() + self.settings.force_kill_timeout;
            for index in stragglers {
                let name = self.records[index].process.name.clone();
                if self.confirm_exit(index, deadline).await {
                    report.force_killed.push(name);
                } else {
                    error!("Could not confirm exit of {}", name);
                    report.unconfirmed.push(name);
                }
            }
        }

        self.drain_exit_events();

        for name in &report.unconfirmed {
            self.status.record_error(format!("{} did not exit", name));
        }

        info!(
            "Shutdown complete: {} signalled, {} force killed, {} unconfirmed",
            report.signalled.len(),
            report.force_killed.len(),
            report.unconfirmed.len()
        );

        self.shutdown_report = Some(report.clone());
        report
    }

    /// Wait for the monitor of `index` to finish, up to `deadline`.
    async fn confirm_exit(&mut self, index: usize, deadline: Instant) -> bool {
        let Some(monitor) = self.records[index].monitor.as_mut() else {
            return true;
        };

        match timeout_at(deadline, monitor).await {
            Ok(Ok(())) => {
                self.records[index].monitor = None;
                self.records[index].process.mark_exited();
                true
            }
            Ok(Err(e)) => {
                // Monitor panicked; fall back to asking the OS.
                warn!("Exit monitor for {} failed: {}", self.records[index].process.name, e);
                self.records[index].monitor = None;
                let gone = self.records[index]
                    .process
                    .pid()
                    .map_or(true, |pid| !tandem_process::process_exists(pid).unwrap_or(true));
                if gone {
                    self.records[index].process.mark_exited();
                }
                gone
            }
            Err(_) => false,
        }
    }

    /// Apply every exit event already queued and return the first.
    fn drain_exit_events(&mut self) -> Option<ExitEvent> {
        let mut first = None;
        while let Ok(event) = self.exit_rx.try_recv() {
            self.apply_exit(&event);
            first.get_or_insert(event);
        }
        first
    }

    fn apply_exit(&mut self, event: &ExitEvent) {
        if let Some(record) = self.records.get_mut(event.index) {
            record.process.mark_exited();
        }
    }
}

fn check_distinct_ports(processes: &[ManagedProcess]) -> ProcessResult<()> {
    let mut seen = HashSet::new();
    for process in processes {
        if let Some(port) = process.listen_port {
            if !seen.insert(port) {
                return Err(ProcessError::configuration(
                    &process.name,
                    format!("port {} is already assigned to another process", port),
                ));
            }
        }
    }
    Ok(())
}

/// A health path is only reachable through a listen port.
fn check_health_ports(processes: &[ManagedProcess]) -> ProcessResult<()> {
    match processes
        .iter()
        .find(|p| p.health_path.is_some() && p.listen_port.is_none())
    {
        Some(process) => Err(ProcessError::configuration(
            &process.name,
            "health_path requires listen_port",
        )),
        None => Ok(()),
    }
}
