//! SIGINT/SIGTERM against a running `fwbench`: the server it started is
//! killed, the port is freed, and the exit status is 128 + signo.

#![cfg(unix)]

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use e2e_tests::{fake_toolchain, fwbench_path, path_with, toolchain_framework, unused_port, wait_for_listening};
use fwbench_process::PortProbe;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

struct Campaign {
    _dir: tempfile::TempDir,
    port: u16,
    child: Child,
}

impl Drop for Campaign {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start `fwbench` on one framework whose server listens right away but
/// whose settle delay keeps the campaign mid-tuple for a while.
fn start_campaign(fwbench: &Path) -> Campaign {
    let dir = tempfile::tempdir().unwrap();
    let port = unused_port();
    let bin = fake_toolchain(dir.path());
    toolchain_framework(&dir.path().join("frameworks"), "alpha", "");

    let config = format!(
        "frameworks_dir: {frameworks}\n\
         results_dir: {results}\n\
         default_port: {port}\n\
         settle_delay: 5s\n\
         readiness_budget: 10s\n\
         free_delay: 100ms\n\
         stop_timeout: 2s\n",
        frameworks = dir.path().join("frameworks").display(),
        results = dir.path().join("results").display(),
        port = port,
    );
    let config_path = dir.path().join("fwbench.yaml");
    std::fs::write(&config_path, config).unwrap();

    let child = Command::new(fwbench)
        .arg("--config")
        .arg(&config_path)
        .env("PATH", path_with(&bin))
        .stdin(Stdio::null())
        .spawn()
        .expect("Failed to start fwbench");

    Campaign { _dir: dir, port, child }
}

async fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

async fn interrupt_mid_tuple(signal: Signal) -> Option<i32> {
    let Some(fwbench) = fwbench_path() else {
        eprintln!("fwbench binary not built; run `cargo build --workspace` first");
        return None;
    };
    let mut campaign = start_campaign(&fwbench);
    let ports = PortProbe::new(Duration::from_millis(10));

    assert!(
        wait_for_listening(&ports, campaign.port, Duration::from_secs(15)).await,
        "server never listened on {}",
        campaign.port
    );

    kill(Pid::from_raw(campaign.child.id() as i32), signal).unwrap();

    let status = wait_for_exit(&mut campaign.child, Duration::from_secs(10))
        .await
        .expect("fwbench did not exit after the signal");

    assert!(
        !ports.is_listening(campaign.port).await,
        "port {} still listening after {:?}",
        campaign.port,
        signal
    );

    Some(status.code().expect("fwbench was killed instead of exiting"))
}

#[tokio::test]
async fn test_sigint_kills_the_server_and_exits_130() {
    if let Some(code) = interrupt_mid_tuple(Signal::SIGINT).await {
        assert_eq!(code, 130);
    }
}

#[tokio::test]
async fn test_sigterm_kills_the_server_and_exits_143() {
    if let Some(code) = interrupt_mid_tuple(Signal::SIGTERM).await {
        assert_eq!(code, 143);
    }
}
