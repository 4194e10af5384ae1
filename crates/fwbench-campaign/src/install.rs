//! Dependency installation through the framework's package manager.

use std::process::Stdio;

use async_trait::async_trait;
use fwbench_common::TupleError;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::framework::FrameworkSpec;

/// Lines of installer stderr kept in the failure reason.
const STDERR_TAIL_LINES: usize = 5;

#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Install dependencies for `spec`. Any error skips the tuple.
    async fn install(&self, spec: &FrameworkSpec) -> Result<(), TupleError>;
}

/// Runs `bun install` or `npm install` depending on the lockfile.
#[derive(Debug, Clone, Default)]
pub struct PackageManagerInstaller;

impl PackageManagerInstaller {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DependencyInstaller for PackageManagerInstaller {
    async fn install(&self, spec: &FrameworkSpec) -> Result<(), TupleError> {
        let framework = spec.directory.to_string();
        let Some(package_manager) = spec.package_manager else {
            return Err(TupleError::dependency_install(framework, "no recognized lockfile"));
        };

        info!("Installing dependencies for {} with {}", framework, package_manager);

        let output = Command::new(package_manager.program())
            .arg("install")
            .current_dir(&spec.dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TupleError::dependency_install(&framework, format!("failed to run {}: {}", package_manager, e))
            })?;

        debug!(
            "{} install for {} wrote {} bytes of output",
            package_manager,
            framework,
            output.stdout.len() + output.stderr.len()
        );

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ");
        warn!("{} install failed for {}: {}", package_manager, framework, tail);

        Err(TupleError::dependency_install(
            framework,
            format!("{} install exited with {:?}: {}", package_manager, output.status.code(), tail),
        ))
    }
}
