//! The external load generator.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use fwbench_common::{TupleError, Variant};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::LoadProfile;

/// One load test against a ready server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub framework: String,
    pub variant: Variant,
    /// Loopback address and port confirmed by the readiness check.
    pub host: IpAddr,
    pub port: u16,
    /// Where the generator's JSON report goes.
    pub artifact: PathBuf,
}

impl LoadRequest {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Run the load test to completion and return the artifact path.
    async fn run(&self, request: &LoadRequest) -> Result<PathBuf, TupleError>;
}

/// `oha` in non-interactive JSON mode.
#[derive(Debug, Clone, Default)]
pub struct OhaLoadGenerator {
    profile: LoadProfile,
}

impl OhaLoadGenerator {
    pub fn new(profile: LoadProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &LoadProfile {
        &self.profile
    }

    /// `http://127.0.0.1:3000/`, or `http://[::1]:3000/` for IPv6.
    pub fn target_url(&self, addr: SocketAddr) -> String {
        format!("http://{}{}", addr, self.profile.path)
    }

    /// Arguments passed to the generator for a server at `addr`.
    pub fn command_args(&self, addr: SocketAddr) -> Vec<String> {
        let profile = &self.profile;
        let mut args = vec![
            "--no-tui".to_string(),
            "--json".to_string(),
            "-c".to_string(),
            profile.concurrency.to_string(),
            "-z".to_string(),
            format!("{}s", profile.duration.as_secs()),
            "-m".to_string(),
            profile.method.to_uppercase(),
        ];

        if let Some(body) = &profile.body {
            args.extend([
                "-d".to_string(),
                body.clone(),
                "-H".to_string(),
                "Content-Type: application/json".to_string(),
            ]);
        }

        args.extend(profile.extra_args.iter().cloned());
        args.push(self.target_url(addr));
        args
    }
}

#[async_trait]
impl LoadGenerator for OhaLoadGenerator {
    async fn run(&self, request: &LoadRequest) -> Result<PathBuf, TupleError> {
        let fail = |reason: String| TupleError::load_generator(&request.framework, reason);

        info!(
            "Load testing {} ({}) on {} for {:?}",
            request.framework, request.variant, request.address(), self.profile.duration
        );

        let output = Command::new(&self.profile.program)
            .args(self.command_args(request.address()))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| fail(format!("failed to run {}: {}", self.profile.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} failed for {}: {}", self.profile.program, request.framework, stderr.trim());
            return Err(fail(format!(
                "{} exited with {:?}: {}",
                self.profile.program,
                output.status.code(),
                stderr.trim()
            )));
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(fail(format!("{} produced an empty report", self.profile.program)));
        }

        if let Some(parent) = request.artifact.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&request.artifact, &output.stdout)
            .await
            .map_err(|e| fail(format!("failed to write {}: {}", request.artifact.display(), e)))?;

        info!("Wrote {}", request.artifact.display());
        Ok(request.artifact.clone())
    }
}
