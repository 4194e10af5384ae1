//! Forced termination primitives. Everything here is SIGKILL.

use fwbench_common::{ProcessError, ProcessResult};

/// Force kill a single process.
///
/// A process that is already gone is treated as success.
pub fn force_kill(pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::stop_failed(pid.to_string(), e.to_string())),
        }
    }

    #[cfg(not(unix))]
    {
        Err(ProcessError::stop_failed(
            pid.to_string(),
            "force kill is only supported on Unix",
        ))
    }
}

/// Force kill every process in the process group led by `pgid`.
///
/// Start scripts (`npm run start`) fork the real server, and the fork keeps
/// the port bound after the parent dies.
pub fn force_kill_group(pgid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::stop_failed(pgid.to_string(), e.to_string())),
        }
    }

    #[cfg(not(unix))]
    {
        force_kill(pgid)
    }
}
