//! E2E test helpers for fwbench.
//!
//! Tests drive the real supervisor, readiness detector, and runner against
//! `testsrv`, a fake framework server built from this package.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fwbench_campaign::{CampaignConfig, FrameworkSpec, LoadGenerator, LoadRequest, StartStrategy};
use fwbench_common::{FrameworkName, TupleError, Variant};
use fwbench_process::{PortProbe, ProcessSupervisor};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Path to the `testsrv` binary next to the test executable.
pub fn testsrv_path() -> PathBuf {
    let mut path = env::current_exe()
        .expect("Failed to get current exe path")
        .parent()
        .expect("Failed to get parent dir")
        .to_path_buf();

    // If we're in deps/, go up one level
    if path.ends_with("deps") {
        path.pop();
    }

    #[cfg(windows)]
    path.push("testsrv.exe");

    #[cfg(not(windows))]
    path.push("testsrv");

    if !path.exists() {
        panic!("TESTSRV binary not found at: {}", path.display());
    }

    path
}

/// Path to the `fwbench` binary, when a workspace build has produced it.
///
/// `cargo test` alone only builds binaries of the package under test, so
/// this is `None` until `cargo build --workspace` has run.
pub fn fwbench_path() -> Option<PathBuf> {
    let mut path = env::current_exe()
        .expect("Failed to get current exe path")
        .parent()
        .expect("Failed to get parent dir")
        .to_path_buf();

    if path.ends_with("deps") {
        path.pop();
    }

    #[cfg(windows)]
    path.push("fwbench.exe");

    #[cfg(not(windows))]
    path.push("fwbench");

    path.exists().then_some(path)
}

/// Writes stand-in `node` and `npm` scripts into `dir/bin`.
///
/// `npm install` succeeds without doing anything. `node <entry>` execs
/// `testsrv` with the entry file's contents as its arguments, so a
/// framework directory holding `package-lock.json` and a `main.js` of
/// `--no-listen` resolves and starts like a real one.
#[cfg(unix)]
pub fn fake_toolchain(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).expect("Failed to create toolchain dir");

    let scripts = [
        ("npm", "#!/bin/sh\nexit 0\n".to_string()),
        (
            "node",
            format!("#!/bin/sh\nexec '{}' $(cat \"$1\")\n", testsrv_path().display()),
        ),
    ];
    for (name, body) in scripts {
        let path = bin.join(name);
        std::fs::write(&path, body).expect("Failed to write toolchain script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make toolchain script executable");
    }

    bin
}

/// `PATH` with `bin` searched first.
pub fn path_with(bin: &Path) -> String {
    match env::var("PATH") {
        Ok(path) if !path.is_empty() => format!("{}:{}", bin.display(), path),
        _ => bin.display().to_string(),
    }
}

/// A framework directory for the fake toolchain: an npm lockfile and a
/// `main.js` holding `testsrv` arguments.
pub fn toolchain_framework(frameworks: &Path, name: &str, testsrv_args: &str) {
    let dir = frameworks.join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create framework dir");
    std::fs::write(dir.join("package-lock.json"), "{}").expect("Failed to write lockfile");
    std::fs::write(dir.join("main.js"), testsrv_args).expect("Failed to write main.js");
}

/// A port nothing is listening on right now.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind ephemeral port");
    listener.local_addr().expect("Failed to read local address").port()
}

/// Campaign config with short delays, rooted in `dir`.
pub fn fast_config(dir: &Path) -> CampaignConfig {
    CampaignConfig {
        frameworks_dir: dir.join("frameworks"),
        results_dir: dir.join("results"),
        settle_delay: Duration::from_millis(700),
        free_delay: Duration::from_millis(100),
        stop_timeout: Duration::from_secs(3),
        readiness_budget: Duration::from_secs(10),
        ..Default::default()
    }
}

pub fn supervisor_for(config: &CampaignConfig) -> ProcessSupervisor {
    ProcessSupervisor::new(PortProbe::new(config.free_delay), config.stop_timeout)
}

/// A framework directory started with `sh start.sh`, where the script execs
/// `testsrv` with `args`.
pub fn testsrv_framework(frameworks: &Path, name: &str, variant: Variant, port: u16, args: &[&str]) -> FrameworkSpec {
    let dir = frameworks.join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create framework dir");

    let script = format!("exec '{}' {}\n", testsrv_path().display(), args.join(" "));
    std::fs::write(dir.join("start.sh"), script).expect("Failed to write start.sh");

    FrameworkSpec {
        name: FrameworkName::from(name),
        directory: FrameworkName::from(name),
        dir,
        variant,
        manifest: Default::default(),
        package_manager: None,
        start_strategies: vec![StartStrategy::EntryFile {
            runtime: "sh".to_string(),
            file: "start.sh".to_string(),
        }],
        port,
        port_source: fwbench_campaign::PortSource::Default,
    }
}

/// Minimal HTTP/1.1 request; returns the raw response.
pub async fn http_post(addr: SocketAddr, body: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        addr,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

/// Load generator that sends one real request and writes the response body
/// as the artifact.
#[derive(Default)]
pub struct SingleRequestLoadGenerator {
    pub requests: Mutex<Vec<LoadRequest>>,
}

impl SingleRequestLoadGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl LoadGenerator for SingleRequestLoadGenerator {
    async fn run(&self, request: &LoadRequest) -> Result<PathBuf, TupleError> {
        self.requests.lock().push(request.clone());

        let response = http_post(request.address(), r#"{"name":"bench"}"#)
            .await
            .map_err(|e| TupleError::load_generator(&request.framework, e.to_string()))?;
        let body = response.split("\r\n\r\n").nth(1).unwrap_or_default();

        if let Some(parent) = request.artifact.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TupleError::load_generator(&request.framework, e.to_string()))?;
        }
        std::fs::write(&request.artifact, body).map_err(|e| TupleError::load_generator(&request.framework, e.to_string()))?;
        Ok(request.artifact.clone())
    }
}

/// Poll until `port` accepts connections or `timeout` passes.
pub async fn wait_for_listening(probe: &PortProbe, port: u16, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if probe.is_listening(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
