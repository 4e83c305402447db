//! Process existence checking.

use tandem_common::ProcessResult;

/// Check if a process with the given PID exists.
///
/// On Unix this is `kill(pid, 0)`: no signal is delivered, but the kernel
/// reports whether the PID is known.
///
/// * `Ok(true)` - Process exists (possibly owned by another user)
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - The check itself failed
///
/// ```rust,no_run
/// use tandem_process::process_exists;
///
/// if process_exists(1234).unwrap() {
///     println!("Process 1234 is running");
/// }
/// ```
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        process_exists_unix(pid)
    }

    #[cfg(not(unix))]
    {
        Err(tandem_common::ProcessError::operation_not_allowed(
            pid.to_string(),
            "process_exists",
            "unsupported platform",
        ))
    }
}

#[cfg(unix)]
fn process_exists_unix(pid: u32) -> ProcessResult<bool> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);

    match kill(nix_pid, None) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(e) => Err(tandem_common::ProcessError::configuration(
            pid.to_string(),
            format!("Failed to check process: {}", e),
        )),
    }
}
