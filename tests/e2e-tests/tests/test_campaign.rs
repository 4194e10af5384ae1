//! CampaignDriver with the real installer and load generator wiring.

use std::sync::Arc;

use async_trait::async_trait;
use e2e_tests::{
    fake_toolchain, fast_config, path_with, supervisor_for, toolchain_framework, unused_port,
    SingleRequestLoadGenerator,
};
use fwbench_campaign::{CampaignDriver, CampaignReport, DependencyInstaller, FrameworkSpec, TupleStatus};
use fwbench_common::{TupleError, Variant};

/// Every directory with a lockfile installs cleanly.
struct LockfileOnlyInstaller;

#[async_trait]
impl DependencyInstaller for LockfileOnlyInstaller {
    async fn install(&self, spec: &FrameworkSpec) -> Result<(), TupleError> {
        match spec.package_manager {
            Some(_) => Ok(()),
            None => Err(TupleError::dependency_install(spec.directory.to_string(), "no recognized lockfile")),
        }
    }
}

#[tokio::test]
async fn test_campaign_without_lockfiles_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path());
    for name in ["foo", "foo-schema", "bar"] {
        let framework = config.frameworks_dir.join(name);
        std::fs::create_dir_all(&framework).unwrap();
        std::fs::write(framework.join("main.js"), "app.listen({ port: 3031 })").unwrap();
    }

    let supervisor = supervisor_for(&config);
    let mut driver = CampaignDriver::new(config.clone(), supervisor.clone()).unwrap();

    let plan: Vec<(String, String, Variant)> = driver
        .plan()
        .unwrap()
        .into_iter()
        .map(|p| (p.base.to_string(), p.directory.to_string(), p.variant))
        .collect();
    assert_eq!(
        plan,
        vec![
            ("bar".to_string(), "bar".to_string(), Variant::Schema),
            ("bar".to_string(), "bar".to_string(), Variant::NoSchema),
            ("foo".to_string(), "foo-schema".to_string(), Variant::Schema),
            ("foo".to_string(), "foo".to_string(), Variant::NoSchema),
        ]
    );

    let report = driver.run().await.unwrap();
    assert_eq!(report.count(TupleStatus::SkippedNoDeps), 4);
    assert!(report.results.iter().all(|r| r.artifact.is_none()));
    assert!(driver.runner().state().state_history().is_empty());
    assert!(supervisor.active_pid().is_none());
    assert_eq!(report.exit_code(true), 0);

    let summary = read_summary(&config.results_dir.join("summary.json"));
    assert_eq!(summary.results.len(), 4);
}

#[cfg(unix)]
#[tokio::test]
async fn test_silent_server_fails_to_start_and_next_tuple_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.default_port = unused_port();
    let bin = fake_toolchain(dir.path());
    config.server_env.insert("PATH".to_string(), path_with(&bin));

    toolchain_framework(&config.frameworks_dir, "alpha", "--no-listen");
    toolchain_framework(&config.frameworks_dir, "beta", "--startup-delay-ms 100");

    let supervisor = supervisor_for(&config);
    let loadgen = SingleRequestLoadGenerator::new();
    let mut driver = CampaignDriver::with_components(
        config.clone(),
        supervisor.clone(),
        Arc::new(LockfileOnlyInstaller),
        loadgen.clone(),
    )
    .unwrap();

    let plans = driver.plan().unwrap();
    assert_eq!(plans.len(), 4);

    let mut statuses = Vec::new();
    for plan in &plans {
        let result = driver.run_tuple(plan).await;
        // Nothing survives a tuple, whatever its outcome.
        assert!(supervisor.active_pid().is_none(), "{} left a process behind", plan.directory);
        assert!(supervisor.leased_port().is_none());
        assert!(!supervisor.port_probe().is_listening(config.default_port).await);
        assert_eq!(result.port, Some(config.default_port));
        statuses.push((result.framework, result.variant, result.status));
    }

    assert_eq!(
        statuses,
        vec![
            ("alpha".to_string(), Variant::Schema, TupleStatus::FailedToStart),
            ("alpha".to_string(), Variant::NoSchema, TupleStatus::FailedToStart),
            ("beta".to_string(), Variant::Schema, TupleStatus::Completed),
            ("beta".to_string(), Variant::NoSchema, TupleStatus::Completed),
        ]
    );
    assert_eq!(loadgen.requests.lock().len(), 2);
    assert!(config.results_dir.join("beta_schema.json").is_file());
}

fn read_summary(path: &std::path::Path) -> CampaignReport {
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}
