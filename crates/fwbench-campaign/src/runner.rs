//! Runs one (framework, variant) tuple from port freeing to teardown.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fwbench_common::TupleError;
use fwbench_process::{LaunchSpec, PortLease, ProcessSupervisor, ReadinessDetector, ReadinessResult, RunningProcess};
use fwbench_run_state::{RunnerState, RunnerStateMachine};
use tracing::{error, info, warn};

use crate::config::CampaignConfig;
use crate::framework::FrameworkSpec;
use crate::loadgen::{LoadGenerator, LoadRequest};

/// Drives a single tuple through the runner state machine.
///
/// A started process is always stopped and the port freed again before
/// [`FrameworkRunner::run`] returns, whatever the outcome.
pub struct FrameworkRunner {
    supervisor: ProcessSupervisor,
    detector: ReadinessDetector,
    load_generator: Arc<dyn LoadGenerator>,
    state: RunnerStateMachine,
    settle_delay: Duration,
    readiness_budget: Duration,
    server_env: BTreeMap<String, String>,
    results_dir: PathBuf,
}

impl FrameworkRunner {
    pub fn new(supervisor: ProcessSupervisor, load_generator: Arc<dyn LoadGenerator>, config: &CampaignConfig) -> Self {
        Self {
            detector: ReadinessDetector::new(supervisor.port_probe().clone()),
            supervisor,
            load_generator,
            state: RunnerStateMachine::new("framework-runner"),
            settle_delay: config.settle_delay,
            readiness_budget: config.readiness_budget,
            server_env: config.server_env.clone(),
            results_dir: config.results_dir.clone(),
        }
    }

    pub fn state(&self) -> &RunnerStateMachine {
        &self.state
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn artifact_path(&self, spec: &FrameworkSpec) -> PathBuf {
        self.results_dir.join(spec.artifact_name())
    }

    pub fn log_path(&self, spec: &FrameworkSpec) -> PathBuf {
        self.results_dir.join("logs").join(spec.log_name())
    }

    /// Run `spec` and return the load generator's artifact.
    pub async fn run(&mut self, spec: &FrameworkSpec) -> Result<PathBuf, TupleError> {
        let tuple = spec.tuple_id();
        let port = spec.port;
        info!("Running {} from {} on port {} ({})", tuple, spec.directory, port, spec.port_source);

        self.enter(RunnerState::PortFreeing, format!("port {}", port));
        let lease = match self.supervisor.acquire_port(port).await {
            Ok(lease) => lease,
            Err(source) => {
                self.fail(format!("port {} unavailable", port));
                return Err(TupleError::Spawn {
                    framework: tuple,
                    source,
                });
            }
        };

        self.enter(RunnerState::Spawning, "port freed");
        let Some(strategy) = spec.start_strategy() else {
            self.supervisor.release_port(lease).await;
            self.fail("no start strategy");
            return Err(TupleError::start_resolution(
                tuple,
                "no start script and no fallback entry file",
            ));
        };

        let (program, args) = strategy.program_and_args();
        let launch = LaunchSpec {
            id: tuple.clone(),
            program,
            args,
            working_dir: spec.dir.clone(),
            env: self.server_env.clone(),
            port,
            log_path: Some(self.log_path(spec)),
        };

        let mut process = match self.supervisor.start(&launch) {
            Ok(process) => process,
            Err(source) => {
                error!("Failed to start {} with `{}`: {}", tuple, strategy.describe(), source);
                self.supervisor.release_port(lease).await;
                self.fail("spawn failed");
                return Err(TupleError::Spawn {
                    framework: tuple,
                    source,
                });
            }
        };

        self.enter(RunnerState::AwaitingReadiness, format!("pid {}", process.pid()));
        let readiness = tokio::time::timeout(
            self.readiness_budget,
            self.detector.wait_ready(&mut process, port, self.settle_delay),
        )
        .await
        .unwrap_or(ReadinessResult::TimedOut);

        let ready_addr = match readiness {
            ReadinessResult::Ready(addr) => addr,
            ReadinessResult::Crashed => {
                for line in process.output().tail() {
                    warn!("{}: {}", tuple, line);
                }
                self.enter(RunnerState::Stopping, "crashed before ready");
                self.teardown(&mut process, lease).await;
                self.fail("crashed before ready");
                return Err(TupleError::CrashedBeforeReady {
                    framework: tuple,
                    port,
                });
            }
            ReadinessResult::TimedOut => {
                self.enter(RunnerState::Stopping, "not listening");
                self.teardown(&mut process, lease).await;
                self.fail("readiness timeout");
                return Err(TupleError::ReadinessTimeout {
                    framework: tuple,
                    port,
                });
            }
        };

        self.enter(RunnerState::Ready, format!("listening on {}", ready_addr));
        self.enter(RunnerState::LoadTesting, "load generator started");
        let request = LoadRequest {
            framework: spec.name.to_string(),
            variant: spec.variant,
            host: ready_addr.ip(),
            port: ready_addr.port(),
            artifact: self.artifact_path(spec),
        };
        let outcome = self.load_generator.run(&request).await;

        self.enter(RunnerState::Stopping, "load test finished");
        self.teardown(&mut process, lease).await;

        match outcome {
            Ok(artifact) => {
                self.enter(RunnerState::Idle, "completed");
                info!("{} completed: {}", tuple, artifact.display());
                Ok(artifact)
            }
            Err(e) => {
                self.fail("load generator failed");
                Err(e)
            }
        }
    }

    async fn teardown(&self, process: &mut RunningProcess, lease: PortLease) {
        if let Err(e) = self.supervisor.stop(process).await {
            error!("Failed to stop {}: {}", process.id(), e);
        }
        self.supervisor.release_port(lease).await;
    }

    fn enter(&mut self, state: RunnerState, reason: impl Into<String>) {
        if let Err(e) = self.state.transition_to(state, Some(reason.into())) {
            error!("Runner state error: {}", e);
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        if let Err(e) = self.state.fail_to_idle(reason) {
            error!("Runner state error: {}", e);
        }
    }
}
