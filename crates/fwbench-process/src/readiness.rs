//! Single-shot readiness detection.
//!
//! Frameworks announce readiness in wildly different ways, so there is no
//! handshake: wait a fixed settle delay, then look once. A process that is
//! still alive but not yet listening counts as timed out. There is no retry.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::port::PortProbe;
use crate::supervisor::RunningProcess;

/// Outcome of one readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessResult {
    /// Alive and accepting connections on the port, at this address.
    Ready(SocketAddr),
    /// Exited before the check.
    Crashed,
    /// Alive, but nothing listening on the port.
    TimedOut,
}

impl ReadinessResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessResult::Ready(_))
    }
}

/// Decides whether a freshly started server is ready.
#[derive(Debug, Clone, Default)]
pub struct ReadinessDetector {
    probe: PortProbe,
}

impl ReadinessDetector {
    pub fn new(probe: PortProbe) -> Self {
        Self { probe }
    }

    /// Sleep `settle_delay`, then check liveness and the port exactly once.
    pub async fn wait_ready(
        &self,
        process: &mut RunningProcess,
        port: u16,
        settle_delay: Duration,
    ) -> ReadinessResult {
        debug!("Settling {} for {:?} before readiness check", process.id(), settle_delay);
        tokio::time::sleep(settle_delay).await;

        if !process.is_alive() {
            warn!(
                "{} (PID: {}) exited before becoming ready: {:?}",
                process.id(),
                process.pid(),
                process.exit_status().and_then(|s| s.code())
            );
            return ReadinessResult::Crashed;
        }

        if let Some(addr) = self.probe.listening_addr(port).await {
            info!("{} is ready on {}", process.id(), addr);
            ReadinessResult::Ready(addr)
        } else {
            warn!("{} is alive but not listening on port {}", process.id(), port);
            ReadinessResult::TimedOut
        }
    }
}
