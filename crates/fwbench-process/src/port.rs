//! Port probing and forced port release.
//!
//! A port is "free" when nothing accepts connections on it. Leaked servers
//! from earlier runs are the common reason a port is taken, so
//! [`PortProbe::force_free`] kills every process holding a listening socket
//! on the port instead of asking politely.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::terminate::force_kill;

const DEFAULT_FREE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Checks and frees TCP ports on the loopback interface.
#[derive(Debug, Clone)]
pub struct PortProbe {
    /// Pause after killing owners so the kernel can release the socket.
    free_delay: Duration,
    connect_timeout: Duration,
}

impl Default for PortProbe {
    fn default() -> Self {
        Self {
            free_delay: DEFAULT_FREE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PortProbe {
    pub fn new(free_delay: Duration) -> Self {
        Self {
            free_delay,
            ..Default::default()
        }
    }

    pub fn free_delay(&self) -> Duration {
        self.free_delay
    }

    /// True iff something accepts TCP connections on `port` (IPv4 or IPv6
    /// loopback).
    pub async fn is_listening(&self, port: u16) -> bool {
        self.listening_addr(port).await.is_some()
    }

    /// The loopback address that accepted a connection on `port`, IPv4 first.
    pub async fn listening_addr(&self, port: u16) -> Option<SocketAddr> {
        let candidates = [
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
        ];

        for addr in candidates {
            if let Ok(Ok(_stream)) = timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                debug!("Port {} is accepting connections on {}", port, addr);
                return Some(addr);
            }
        }
        None
    }

    /// Kill every process listening on `port`, then wait `free_delay`.
    ///
    /// Never fails. Nothing listening is success, and the current process is
    /// never signalled even if it owns the socket.
    pub async fn force_free(&self, port: u16) {
        let own_pid = std::process::id();
        let owners: Vec<u32> = listener_pids(port)
            .await
            .into_iter()
            .filter(|pid| *pid != own_pid)
            .collect();

        if owners.is_empty() {
            debug!("No listeners on port {}", port);
        } else {
            info!("Freeing port {}: killing {:?}", port, owners);
            for pid in &owners {
                if let Err(e) = force_kill(*pid) {
                    warn!("Failed to kill PID {} holding port {}: {}", pid, port, e);
                }
            }
        }

        tokio::time::sleep(self.free_delay).await;

        if !owners.is_empty() && self.is_listening(port).await {
            warn!("Port {} is still listening after force free", port);
        }
    }
}

/// PIDs of processes with a listening socket on `port`.
///
/// Lookup failures are logged and reported as "no owners".
pub async fn listener_pids(port: u16) -> Vec<u32> {
    #[cfg(target_os = "linux")]
    {
        let lookup = tokio::task::spawn_blocking(move || procfs_listener_pids(port)).await;

        match lookup {
            Ok(Ok(pids)) => pids,
            Ok(Err(e)) => {
                warn!("Failed to scan /proc for port {} owners: {}", port, e);
                Vec::new()
            }
            Err(e) => {
                warn!("Port owner lookup task failed: {}", e);
                Vec::new()
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let output = tokio::process::Command::new("lsof")
            .arg("-nP")
            .arg("-t")
            .arg(format!("-iTCP:{}", port))
            .arg("-sTCP:LISTEN")
            .output()
            .await;

        match output {
            // lsof exits 1 when nothing matched, so the status is ignored.
            Ok(output) => parse_lsof_pids(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                warn!("Failed to run lsof for port {}: {}", port, e);
                Vec::new()
            }
        }
    }
}

/// Parses `lsof -t` output: one PID per line.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn parse_lsof_pids(stdout: &str) -> Vec<u32> {
    let mut seen = HashSet::new();
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| seen.insert(*pid))
        .collect()
}

#[cfg(target_os = "linux")]
fn procfs_listener_pids(port: u16) -> procfs::ProcResult<Vec<u32>> {
    use procfs::net::TcpState;
    use procfs::process::FDTarget;

    let mut entries = procfs::net::tcp()?;
    // tcp6 is absent when IPv6 is disabled
    if let Ok(v6) = procfs::net::tcp6() {
        entries.extend(v6);
    }

    let inodes: HashSet<u64> = entries
        .into_iter()
        .filter(|entry| matches!(entry.state, TcpState::Listen) && entry.local_address.port() == port)
        .map(|entry| entry.inode)
        .collect();
    if inodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut pids = Vec::new();
    for process in procfs::process::all_processes()?.flatten() {
        // Processes exit mid-scan and others' fds are unreadable without
        // privileges; both are skipped.
        let Ok(fds) = process.fd() else {
            continue;
        };
        let owns_socket = fds
            .flatten()
            .any(|fd| matches!(fd.target, FDTarget::Socket(inode) if inodes.contains(&inode)));
        if owns_socket {
            if let Ok(pid) = u32::try_from(process.pid) {
                pids.push(pid);
            }
        }
    }

    pids.sort_unstable();
    Ok(pids)
}
