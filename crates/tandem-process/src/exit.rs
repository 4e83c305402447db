//! Exit status helpers.

use std::process::ExitStatus;

/// Exit code reported when a child could not be spawned at all.
///
/// Matches the shell's "command not found" status.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Offset added to a signal number when a child was killed by a signal.
pub const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Map an exit status onto the code a shell would report for it.
///
/// A normal exit yields its code; death by signal yields `128 + signal`.
pub fn conventional_exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SIGNAL_EXIT_OFFSET + signal;
        }
    }

    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_normal_exit_code() {
        // Raw wait status: exit code lives in the second byte.
        let status = ExitStatus::from_raw(3 << 8);
        assert_eq!(conventional_exit_code(&status), 3);
    }

    #[test]
    fn test_signal_exit_code() {
        let status = ExitStatus::from_raw(15);
        assert_eq!(conventional_exit_code(&status), 143);
    }
}
