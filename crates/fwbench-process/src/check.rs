//! Process existence checks.

use fwbench_common::{ProcessError, ProcessResult};

/// Check if a process with the given PID exists.
///
/// Uses `kill(pid, 0)`, which delivers no signal but reports whether the
/// target exists. A zombie that has not been reaped still counts as existing.
///
/// # Returns
///
/// * `Ok(true)` - Process exists
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - The check itself failed
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            // Exists, but owned by someone else
            Err(nix::errno::Errno::EPERM) => Ok(true),
            Err(e) => Err(ProcessError::configuration(
                pid.to_string(),
                format!("Failed to check process: {}", e),
            )),
        }
    }

    #[cfg(not(unix))]
    {
        Err(ProcessError::configuration(
            pid.to_string(),
            "process checks are only supported on Unix",
        ))
    }
}
