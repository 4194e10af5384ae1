//! The campaign driver: every tuple, strictly in order, never aborting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fwbench_common::{TupleError, Variant};
use fwbench_process::ProcessSupervisor;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::CampaignConfig;
use crate::discovery::{list_framework_dirs, plan_tuples, DiscoveryOptions, TuplePlan};
use crate::framework::{FrameworkSpec, PackageManager};
use crate::install::{DependencyInstaller, PackageManagerInstaller};
use crate::loadgen::{LoadGenerator, OhaLoadGenerator};
use crate::resolve::PortResolverChain;
use crate::runner::FrameworkRunner;

pub const SUMMARY_FILE: &str = "summary.json";

/// Final status of one tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TupleStatus {
    Completed,
    SkippedNoDeps,
    SkippedNoEntrypoint,
    FailedToStart,
    /// The load generator failed against a ready server.
    Failed,
}

impl TupleStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TupleStatus::FailedToStart | TupleStatus::Failed)
    }

    fn from_error(error: &TupleError) -> Self {
        match error {
            TupleError::DependencyInstall { .. } => TupleStatus::SkippedNoDeps,
            TupleError::StartResolution { .. } => TupleStatus::SkippedNoEntrypoint,
            TupleError::Spawn { .. } | TupleError::ReadinessTimeout { .. } | TupleError::CrashedBeforeReady { .. } => {
                TupleStatus::FailedToStart
            }
            TupleError::LoadGenerator { .. } => TupleStatus::Failed,
        }
    }
}

/// Outcome of one (framework, variant) tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignResult {
    pub framework: String,
    pub directory: String,
    pub variant: Variant,
    pub status: TupleStatus,
    pub port: Option<u16>,
    pub artifact: Option<PathBuf>,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// All results of a campaign, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignReport {
    pub results: Vec<CampaignResult>,
}

impl CampaignReport {
    pub fn count(&self, status: TupleStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status.is_failure())
    }

    /// Process exit code for a finished (uninterrupted) campaign.
    pub fn exit_code(&self, fail_on_tuple_failure: bool) -> i32 {
        if fail_on_tuple_failure && self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn write_summary(&self, path: &Path) -> fwbench_common::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn log_summary(&self) {
        info!(
            "Campaign finished: {} tuples, {} completed, {} skipped (no deps), {} skipped (no entrypoint), {} failed to start, {} failed",
            self.results.len(),
            self.count(TupleStatus::Completed),
            self.count(TupleStatus::SkippedNoDeps),
            self.count(TupleStatus::SkippedNoEntrypoint),
            self.count(TupleStatus::FailedToStart),
            self.count(TupleStatus::Failed),
        );
        for result in self.results.iter().filter(|r| r.status != TupleStatus::Completed) {
            warn!(
                "{} ({}): {:?}{}",
                result.framework,
                result.variant,
                result.status,
                result.reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
            );
        }
    }
}

/// Runs every planned tuple through install, start resolution, and the
/// [`FrameworkRunner`].
pub struct CampaignDriver {
    config: CampaignConfig,
    ports: PortResolverChain,
    installer: Arc<dyn DependencyInstaller>,
    runner: FrameworkRunner,
    /// Install outcome per framework directory; a directory serving both
    /// variants is installed once.
    installed: HashMap<PathBuf, Result<(), TupleError>>,
}

impl CampaignDriver {
    /// Driver with the real package-manager installer and `oha`.
    pub fn new(config: CampaignConfig, supervisor: ProcessSupervisor) -> Result<Self> {
        let load_generator = Arc::new(OhaLoadGenerator::new(config.load.clone()));
        Self::with_components(config, supervisor, Arc::new(PackageManagerInstaller::new()), load_generator)
    }

    pub fn with_components(
        config: CampaignConfig,
        supervisor: ProcessSupervisor,
        installer: Arc<dyn DependencyInstaller>,
        load_generator: Arc<dyn LoadGenerator>,
    ) -> Result<Self> {
        let ports = PortResolverChain::from_config(&config)?;
        let runner = FrameworkRunner::new(supervisor, load_generator, &config);
        Ok(Self {
            config,
            ports,
            installer,
            runner,
            installed: HashMap::new(),
        })
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn runner(&self) -> &FrameworkRunner {
        &self.runner
    }

    /// Tuples the campaign would run, in order.
    pub fn plan(&self) -> Result<Vec<TuplePlan>> {
        let names = list_framework_dirs(&self.config.frameworks_dir)
            .with_context(|| format!("Failed to scan {}", self.config.frameworks_dir.display()))?;

        let options = DiscoveryOptions {
            include_versioned: self.config.include_versioned,
            only: self.config.only.clone(),
        };
        Ok(plan_tuples(names, &options))
    }

    /// Run the whole campaign and write `summary.json`.
    pub async fn run(&mut self) -> Result<CampaignReport> {
        let plans = self.plan()?;
        if plans.is_empty() {
            warn!("No frameworks found in {}", self.config.frameworks_dir.display());
        }

        std::fs::create_dir_all(&self.config.results_dir)
            .with_context(|| format!("Failed to create {}", self.config.results_dir.display()))?;

        info!("Campaign planned: {} tuples", plans.len());

        let mut report = CampaignReport::default();
        for (index, plan) in plans.iter().enumerate() {
            info!(
                "[{}/{}] {} ({}) from {}",
                index + 1,
                plans.len(),
                plan.base,
                plan.variant,
                plan.directory
            );
            report.results.push(self.run_tuple(plan).await);
        }

        let summary = self.config.results_dir.join(SUMMARY_FILE);
        if let Err(e) = report.write_summary(&summary) {
            error!("Failed to write {}: {}", summary.display(), e);
        }

        report.log_summary();
        Ok(report)
    }

    /// Run one tuple. Every failure is recorded in the result.
    pub async fn run_tuple(&mut self, plan: &TuplePlan) -> CampaignResult {
        let started_at = Utc::now();
        let mut result = CampaignResult {
            framework: plan.base.to_string(),
            directory: plan.directory.to_string(),
            variant: plan.variant,
            status: TupleStatus::Completed,
            port: None,
            artifact: None,
            reason: None,
            started_at,
            finished_at: started_at,
        };

        let outcome = match FrameworkSpec::load(&self.config.frameworks_dir, plan, &self.ports) {
            Ok(spec) => {
                result.port = Some(spec.port);
                self.execute(&spec).await
            }
            Err(e) => Err(self.classify_load_failure(plan, e)),
        };

        match outcome {
            Ok(artifact) => result.artifact = Some(artifact),
            Err(e) => {
                warn!("{} ({}) did not complete: {}", plan.base, plan.variant, e);
                result.status = TupleStatus::from_error(&e);
                result.reason = Some(e.to_string());
            }
        }

        result.finished_at = Utc::now();
        result
    }

    /// A framework without a lockfile is skipped for missing dependencies
    /// even when its manifest is unreadable.
    fn classify_load_failure(&self, plan: &TuplePlan, error: fwbench_common::Error) -> TupleError {
        let dir = self.config.frameworks_dir.join(plan.directory.as_str());
        match PackageManager::detect(&dir) {
            Some(_) => TupleError::start_resolution(plan.directory.to_string(), error.to_string()),
            None => TupleError::dependency_install(
                plan.directory.to_string(),
                format!("no recognized lockfile ({})", error),
            ),
        }
    }

    async fn execute(&mut self, spec: &FrameworkSpec) -> Result<PathBuf, TupleError> {
        self.install(spec).await?;

        if spec.start_strategies.is_empty() {
            return Err(TupleError::start_resolution(
                spec.directory.to_string(),
                "no start script and no fallback entry file",
            ));
        }

        self.runner.run(spec).await
    }

    async fn install(&mut self, spec: &FrameworkSpec) -> Result<(), TupleError> {
        if let Some(previous) = self.installed.get(&spec.dir) {
            return previous.clone();
        }

        let outcome = self.installer.install(spec).await;
        self.installed.insert(spec.dir.clone(), outcome.clone());
        outcome
    }
}
