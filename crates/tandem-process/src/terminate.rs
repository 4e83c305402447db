//! Process termination primitives.

use tandem_common::{ProcessError, ProcessResult};

/// Terminate a process gracefully (SIGTERM).
pub fn terminate_gracefully(pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    {
        Err(ProcessError::operation_not_allowed(
            pid.to_string(),
            "terminate_gracefully",
            "unsupported platform",
        ))
    }
}

/// Force kill a process (SIGKILL).
pub fn force_kill(pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        send_signal(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    {
        Err(ProcessError::operation_not_allowed(
            pid.to_string(),
            "force_kill",
            "unsupported platform",
        ))
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> ProcessResult<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), signal)
        .map_err(|e| ProcessError::stop_failed(pid.to_string(), format!("{:?}: {}", signal, e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[tokio::test]
    async fn test_terminate_gracefully_delivers_sigterm() {
        let mut child = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();

        terminate_gracefully(pid).unwrap();
        let status = child.wait().await.unwrap();

        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn test_force_kill_delivers_sigkill() {
        let mut child = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();

        force_kill(pid).unwrap();
        let status = child.wait().await.unwrap();

        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGKILL as i32));
    }
}
