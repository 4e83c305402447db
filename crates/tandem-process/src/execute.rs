//! Process execution primitives.
//!
//! A child inherits the supervisor's environment. On top of that, two layers
//! are applied in order: the shared environment resolved at startup
//! (credentials, `.env` values), then the per-process overrides. Later layers
//! win.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tandem_common::{ProcessError, ProcessResult};
use tokio::process::{Child, Command};
use tracing::debug;

/// Everything needed to start one child.
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    /// Identifier used in errors and logs.
    pub id: &'a str,
    /// Executable followed by its arguments.
    pub command: &'a [String],
    /// Shared environment layer.
    pub shared_env: &'a BTreeMap<String, String>,
    /// Per-process environment layer.
    pub env_overrides: &'a BTreeMap<String, String>,
    pub working_directory: Option<&'a Path>,
}

/// Build the command for a spawn request without starting it.
pub fn build_command(request: &SpawnRequest<'_>) -> ProcessResult<Command> {
    let (executable, args) = request
        .command
        .split_first()
        .ok_or_else(|| ProcessError::configuration(request.id, "command is empty"))?;

    let mut cmd = Command::new(executable);
    cmd.args(args);

    if let Some(wd) = request.working_directory {
        cmd.current_dir(wd);
    }

    cmd.envs(request.shared_env);
    cmd.envs(request.env_overrides);

    // Children write straight to the supervisor's stdout/stderr so the
    // container runtime collects their logs.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    Ok(cmd)
}

/// Spawn a child for the given request.
pub fn spawn_child(request: &SpawnRequest<'_>) -> ProcessResult<Child> {
    let mut cmd = build_command(request)?;

    debug!(
        "Spawning {}: {:?} ({} shared env, {} overrides)",
        request.id,
        request.command,
        request.shared_env.len(),
        request.env_overrides.len()
    );

    cmd.spawn()
        .map_err(|e| ProcessError::spawn_failed(request.id, e.to_string()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let env = BTreeMap::new();
        let request = SpawnRequest {
            id: "empty",
            command: &[],
            shared_env: &env,
            env_overrides: &env,
            working_directory: None,
        };

        let err = spawn_child(&request).unwrap_err();
        assert!(matches!(err, ProcessError::Configuration { .. }));
    }

    #[test]
    fn test_missing_executable_is_spawn_failure() {
        let env = BTreeMap::new();
        let command = strings(&["/definitely/not/here"]);
        let request = SpawnRequest {
            id: "ghost",
            command: &command,
            shared_env: &env,
            env_overrides: &env,
            working_directory: None,
        };

        let err = spawn_child(&request).unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_overrides_win_over_shared_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");

        let mut shared = BTreeMap::new();
        shared.insert("LAYER".to_string(), "shared".to_string());
        shared.insert("ONLY_SHARED".to_string(), "yes".to_string());
        let mut overrides = BTreeMap::new();
        overrides.insert("LAYER".to_string(), "override".to_string());

        let command = strings(&[
            "/bin/sh",
            "-c",
            &format!("echo \"$LAYER $ONLY_SHARED\" > {}", out.display()),
        ]);
        let request = SpawnRequest {
            id: "env-check",
            command: &command,
            shared_env: &shared,
            env_overrides: &overrides,
            working_directory: None,
        };

        let status = spawn_child(&request).unwrap().wait().await.unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "override yes");
    }

    #[tokio::test]
    async fn test_working_directory_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        let command = strings(&["/bin/sh", "-c", "touch marker"]);
        let request = SpawnRequest {
            id: "cwd",
            command: &command,
            shared_env: &env,
            env_overrides: &env,
            working_directory: Some(dir.path()),
        };

        spawn_child(&request).unwrap().wait().await.unwrap();
        assert!(dir.path().join("marker").exists());
    }
}
