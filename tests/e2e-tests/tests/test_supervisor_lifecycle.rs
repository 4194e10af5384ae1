//! Supervisor, readiness detection, and port freeing against a real server.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use e2e_tests::{fast_config, http_post, supervisor_for, testsrv_path, unused_port, wait_for_listening};
use fwbench_process::{LaunchSpec, PortProbe, ReadinessDetector, ReadinessResult};

#[tokio::test]
async fn test_ready_port_is_the_leased_and_injected_port() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path());
    let supervisor = supervisor_for(&config);
    let detector = ReadinessDetector::new(supervisor.port_probe().clone());
    let port = unused_port();

    let lease = supervisor.acquire_port(port).await.unwrap();
    assert_eq!(lease.port(), port);

    // No --port: testsrv has to pick up $PORT.
    let launch = LaunchSpec::new("testsrv_no_schema", testsrv_path().display().to_string(), port)
        .args(["--startup-delay-ms", "100"])
        .log_to(dir.path().join("logs").join("testsrv_no_schema.log"));
    let mut process = supervisor.start(&launch).unwrap();

    let readiness = detector.wait_ready(&mut process, port, config.settle_delay).await;
    assert_eq!(readiness, ReadinessResult::Ready(SocketAddr::from((Ipv4Addr::LOCALHOST, lease.port()))));

    let response = http_post(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), "{}").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {}", response);
    assert!(response.contains(&format!("\"port\":{}", port)));

    supervisor.stop(&mut process).await.unwrap();
    supervisor.release_port(lease).await;

    assert!(!supervisor.port_probe().is_listening(port).await);
    assert!(supervisor.active_pid().is_none());
    assert!(supervisor.leased_port().is_none());

    let log = std::fs::read_to_string(dir.path().join("logs").join("testsrv_no_schema.log")).unwrap();
    assert!(log.contains("[stdout]"));
    assert!(log.contains("Listening on"));
}

#[tokio::test]
async fn test_force_free_kills_a_leaked_server() {
    let probe = PortProbe::new(Duration::from_millis(200));
    let port = unused_port();

    // Started outside any supervisor, like a leftover from an earlier run.
    let mut leaked = tokio::process::Command::new(testsrv_path())
        .env("PORT", port.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    assert!(wait_for_listening(&probe, port, Duration::from_secs(5)).await);

    probe.force_free(port).await;
    assert!(!probe.is_listening(port).await);

    let status = tokio::time::timeout(Duration::from_secs(2), leaked.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(!status.success());

    // Nothing left to kill; still fine.
    probe.force_free(port).await;
    assert!(!probe.is_listening(port).await);
}

#[tokio::test]
async fn test_stop_kills_forked_listener() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path());
    let supervisor = supervisor_for(&config);
    let detector = ReadinessDetector::new(supervisor.port_probe().clone());
    let port = unused_port();

    let lease = supervisor.acquire_port(port).await.unwrap();
    let launch = LaunchSpec::new("forking", testsrv_path().display().to_string(), port).args(["--forked-listener"]);
    let mut process = supervisor.start(&launch).unwrap();

    let readiness = detector.wait_ready(&mut process, port, config.settle_delay).await;
    assert_eq!(readiness, ReadinessResult::Ready(SocketAddr::from((Ipv4Addr::LOCALHOST, port))));

    // Killing the group takes the grandchild holding the port with it.
    supervisor.stop(&mut process).await.unwrap();
    let mut closed = false;
    for _ in 0..40 {
        if !supervisor.port_probe().is_listening(port).await {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(closed, "forked listener survived the group kill");

    supervisor.release_port(lease).await;
}

#[tokio::test]
async fn test_supervisor_holds_one_process_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor_for(&fast_config(dir.path()));
    let port = unused_port();

    let launch = LaunchSpec::new("first", testsrv_path().display().to_string(), port).args(["--no-listen"]);
    let mut first = supervisor.start(&launch).unwrap();

    let second = LaunchSpec::new("second", testsrv_path().display().to_string(), port).args(["--no-listen"]);
    assert!(supervisor.start(&second).is_err());

    supervisor.stop(&mut first).await.unwrap();
    supervisor.stop(&mut first).await.unwrap();
    assert!(!first.is_alive());
}
