//! Cleanup on SIGINT/SIGTERM.
//!
//! The guard owns a clone of the campaign's [`ProcessSupervisor`]. When a
//! signal arrives it kills whatever server is tracked, frees the leased port,
//! and exits the process with the conventional `128 + signo` status.

use std::time::Duration;

use anyhow::Result;
use fwbench_process::ProcessSupervisor;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Signal that ended the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Terminate => 143,
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Background task that turns a termination signal into cleanup and exit.
pub struct SignalGuard {
    handle: JoinHandle<()>,
}

impl SignalGuard {
    /// Register the handlers and start listening. Must be called from within
    /// the tokio runtime, before the campaign starts.
    pub fn install(supervisor: ProcessSupervisor) -> Result<Self> {
        let bound = supervisor.stop_timeout() + supervisor.port_probe().free_delay();

        #[cfg(unix)]
        let handle = {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            tokio::spawn(async move {
                let received = tokio::select! {
                    _ = sigint.recv() => ShutdownSignal::Interrupt,
                    _ = sigterm.recv() => ShutdownSignal::Terminate,
                };
                Self::shutdown(&supervisor, received, bound).await;
            })
        };

        #[cfg(not(unix))]
        let handle = tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            Self::shutdown(&supervisor, ShutdownSignal::Interrupt, bound).await;
        });

        info!("Signal guard installed (cleanup bound {:?})", bound);
        Ok(Self { handle })
    }

    /// Stop listening. Used once the campaign has finished on its own.
    pub fn disarm(self) {
        self.handle.abort();
    }

    async fn shutdown(supervisor: &ProcessSupervisor, signal: ShutdownSignal, bound: Duration) {
        warn!("Received {}, cleaning up", signal);
        if !Self::cleanup(supervisor, bound).await {
            error!("Cleanup did not finish within {:?}, exiting anyway", bound);
        }
        std::process::exit(signal.exit_code());
    }

    /// Kill the tracked server and free the leased port, giving up after
    /// `bound`. Returns false if the bound was hit.
    pub async fn cleanup(supervisor: &ProcessSupervisor, bound: Duration) -> bool {
        tokio::time::timeout(bound, supervisor.emergency_stop()).await.is_ok()
    }
}
