//! Supervised spawning and teardown of framework servers.
//!
//! A [`ProcessSupervisor`] tracks at most one live process and at most one
//! leased port in a shared slot. Clones share the slot, which is how the
//! signal handler finds what to clean up while the campaign owns the
//! [`RunningProcess`] handle itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fwbench_common::{ProcessError, ProcessResult};
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::capture::{OutputCapture, StreamType};
use crate::check::process_exists;
use crate::port::PortProbe;
use crate::terminate::force_kill_group;

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to launch one server process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Identifier used in logs and errors, e.g. `express_no_schema`.
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Extra environment on top of the inherited one. `PORT` is always
    /// overwritten with [`LaunchSpec::port`].
    pub env: BTreeMap<String, String>,
    pub port: u16,
    /// Where captured stdout/stderr goes. In-memory only when `None`.
    pub log_path: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(id: impl Into<String>, program: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            env: BTreeMap::new(),
            port,
            log_path: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Environment the child actually receives on top of the inherited one.
    pub fn effective_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert("PORT".to_string(), self.port.to_string());
        env
    }

    /// Human readable command line, e.g. `node main.js`.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A live supervised process.
pub struct RunningProcess {
    id: String,
    pid: u32,
    port: u16,
    child: Child,
    started_at: DateTime<Utc>,
    output: OutputCapture,
    exit_status: Option<ExitStatus>,
    group_killed: bool,
}

impl RunningProcess {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn output(&self) -> &OutputCapture {
        &self.output
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Non-blocking liveness check. Records the exit status once the process
    /// is observed dead.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("Process {} (PID: {}) exited with {:?}", self.id, self.pid, status.code());
                self.exit_status = Some(status);
                false
            }
            Err(e) => {
                warn!("Failed to poll process {} (PID: {}): {}", self.id, self.pid, e);
                false
            }
        }
    }
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("port", &self.port)
            .field("started_at", &self.started_at)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

/// Claim on a port for the currently supervised process.
#[derive(Debug, PartialEq, Eq)]
pub struct PortLease {
    port: u16,
    acquired_at: DateTime<Utc>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

/// What the supervisor currently owns.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ActiveSlot {
    port: Option<u16>,
    process: Option<(String, u32)>,
    /// Set by [`ProcessSupervisor::emergency_stop`]; no new process or lease
    /// is accepted afterwards.
    shutting_down: bool,
}

/// Spawns, tracks, and tears down one server process at a time.
#[derive(Clone)]
pub struct ProcessSupervisor {
    slot: Arc<Mutex<ActiveSlot>>,
    probe: PortProbe,
    stop_timeout: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(PortProbe::default(), DEFAULT_STOP_TIMEOUT)
    }
}

impl ProcessSupervisor {
    pub fn new(probe: PortProbe, stop_timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(ActiveSlot::default())),
            probe,
            stop_timeout,
        }
    }

    pub fn port_probe(&self) -> &PortProbe {
        &self.probe
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// PID of the tracked process, if any.
    pub fn active_pid(&self) -> Option<u32> {
        self.slot.lock().process.as_ref().map(|(_, pid)| *pid)
    }

    /// Currently leased port, if any.
    pub fn leased_port(&self) -> Option<u16> {
        self.slot.lock().port
    }

    /// True once an emergency stop has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.slot.lock().shutting_down
    }

    /// Lease `port` and force-free it so leftovers from earlier runs cannot
    /// answer in place of the new server.
    pub async fn acquire_port(&self, port: u16) -> ProcessResult<PortLease> {
        {
            let mut slot = self.slot.lock();
            if slot.shutting_down {
                return Err(ProcessError::invalid_state(
                    format!("port {}", port),
                    "running",
                    "shutting down",
                ));
            }
            if let Some(current) = slot.port.filter(|current| *current != port) {
                return Err(ProcessError::invalid_state(
                    format!("port {}", port),
                    "no leased port",
                    format!("port {} leased", current),
                ));
            }
            slot.port = Some(port);
        }

        debug!("Leased port {}", port);
        self.probe.force_free(port).await;

        Ok(PortLease {
            port,
            acquired_at: Utc::now(),
        })
    }

    /// Force-free the leased port again and drop the lease.
    pub async fn release_port(&self, lease: PortLease) {
        self.probe.force_free(lease.port).await;

        let mut slot = self.slot.lock();
        if slot.port == Some(lease.port) {
            slot.port = None;
        }
        debug!("Released port {}", lease.port);
    }

    /// Launch `launch` without waiting for readiness.
    ///
    /// The child gets its own process group, a null stdin, and piped
    /// stdout/stderr feeding an [`OutputCapture`].
    pub fn start(&self, launch: &LaunchSpec) -> ProcessResult<RunningProcess> {
        let mut slot = self.slot.lock();
        if slot.shutting_down {
            return Err(ProcessError::invalid_state(launch.id.clone(), "running", "shutting down"));
        }
        if let Some((id, pid)) = &slot.process {
            return Err(ProcessError::already_active(id.clone(), *pid));
        }

        info!("Spawning {}: {} (port {})", launch.id, launch.command_line(), launch.port);

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .current_dir(&launch.working_dir)
            .envs(launch.effective_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, killed as a whole; terminal Ctrl+C reaches only us.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::spawn_failed(launch.id.clone(), e.to_string()))?;

        let pid = child.id().ok_or_else(|| {
            ProcessError::spawn_failed(launch.id.clone(), "process exited before its PID was read")
        })?;

        let output = match &launch.log_path {
            Some(path) => match OutputCapture::to_file(launch.id.clone(), path) {
                Ok(output) => output,
                Err(e) => {
                    // kill_on_drop reaches the leader only.
                    if let Err(kill) = force_kill_group(pid) {
                        warn!("Failed to kill process group {}: {}", pid, kill);
                    }
                    return Err(e);
                }
            },
            None => OutputCapture::in_memory(launch.id.clone()),
        };
        if let Some(stdout) = child.stdout.take() {
            output.attach(stdout, StreamType::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            output.attach(stderr, StreamType::Stderr);
        }

        slot.process = Some((launch.id.clone(), pid));
        info!("Process spawned successfully: {} (PID: {})", launch.id, pid);

        Ok(RunningProcess {
            id: launch.id.clone(),
            pid,
            port: launch.port,
            child,
            started_at: Utc::now(),
            output,
            exit_status: None,
            group_killed: false,
        })
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&self, process: &mut RunningProcess) -> bool {
        process.is_alive()
    }

    /// Kill the process group and wait (bounded) for the exit status.
    ///
    /// Safe to call repeatedly and on processes that already exited.
    pub async fn stop(&self, process: &mut RunningProcess) -> ProcessResult<()> {
        let result = self.kill_and_reap(process).await;
        process.output.finish().await;

        let mut slot = self.slot.lock();
        if slot.process.as_ref().map(|(_, pid)| *pid) == Some(process.pid) {
            slot.process = None;
        }

        result
    }

    async fn kill_and_reap(&self, process: &mut RunningProcess) -> ProcessResult<()> {
        // The leader may be gone while forked children still hold the port.
        if !process.group_killed {
            if let Err(e) = force_kill_group(process.pid) {
                warn!("Failed to kill process group {}: {}", process.pid, e);
            }
            process.group_killed = true;
        }

        if process.exit_status.is_some() {
            debug!("Process {} already exited", process.id);
            return Ok(());
        }

        match timeout(self.stop_timeout, process.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process {} (PID: {}) stopped: {:?}", process.id, process.pid, status.code());
                process.exit_status = Some(status);
                Ok(())
            }
            Ok(Err(e)) => Err(ProcessError::stop_failed(
                process.id.clone(),
                format!("Failed to wait for exit: {}", e),
            )),
            Err(_) => match process_exists(process.pid) {
                Ok(false) => Ok(()),
                Ok(true) => {
                    error!(
                        "Process {} (PID: {}) did not exit within {:?}",
                        process.id, process.pid, self.stop_timeout
                    );
                    Err(ProcessError::timeout(
                        process.id.clone(),
                        format!("stop (no exit within {:?})", self.stop_timeout),
                    ))
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Signal-path cleanup: latch the slot shut, kill the tracked process
    /// group, and force-free the leased port.
    ///
    /// After this begins, [`ProcessSupervisor::start`] and
    /// [`ProcessSupervisor::acquire_port`] are rejected.
    pub async fn emergency_stop(&self) {
        let (process, port) = {
            let mut slot = self.slot.lock();
            slot.shutting_down = true;
            (slot.process.take(), slot.port.take())
        };

        if let Some((id, pid)) = process {
            Self::emergency_kill(&id, pid);
        }

        if let Some(port) = port {
            warn!("Emergency release of port {}", port);
            self.probe.force_free(port).await;
        }

        // Re-check after the free delay.
        let late = self.slot.lock().process.take();
        if let Some((id, pid)) = late {
            Self::emergency_kill(&id, pid);
        }
    }

    fn emergency_kill(id: &str, pid: u32) {
        warn!("Emergency stop of {} (PID: {})", id, pid);
        if let Err(e) = force_kill_group(pid) {
            error!("Emergency kill of {} failed: {}", id, e);
        }
    }
}
