use std::sync::Arc;

use amibuilder_common::Platform;
use amibuilder_providers::CloudProvider;
use chrono::{DateTime, Utc};
use tokio::time::sleep;
use uuid::Uuid;

use crate::collector::Collector;
use crate::config::OrchestratorConfig;
use crate::dispatcher::Dispatcher;
use crate::error::BuildError;
use crate::launcher::Launcher;
use crate::provisioner::Provisioner;
use crate::resources::{AccountContext, ProvisionedResourceSet};
use crate::state_machine::{PhaseTransition, RunPhase, RunStateMachine};
use crate::terminator::{TeardownReport, Terminator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Image name, with or without the registry host.
    pub image: String,
    pub platform: Platform,
    /// Also put the operator policy on the calling user.
    pub grant_operator: bool,
}

impl BuildRequest {
    pub fn new(image: &str, platform: Platform) -> Self {
        Self {
            image: image.to_string(),
            platform,
            grant_operator: false,
        }
    }
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub run_id: String,
    pub image_id: Result<String, BuildError>,
    pub instance_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub teardown: TeardownReport,
    pub phases: Vec<PhaseTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.image_id.is_ok()
    }

    pub fn final_phase(&self) -> RunPhase {
        self.phases.last().map(|t| t.to).unwrap_or(RunPhase::Pending)
    }
}

#[derive(Default)]
struct Progress {
    instance_id: Option<String>,
    correlation_id: Option<Uuid>,
}

/// One end-to-end build: provision, launch, dispatch, collect, and always
/// tear down whatever was created.
pub struct BuildRun {
    provider: Arc<dyn CloudProvider>,
    config: OrchestratorConfig,
    run_id: String,
}

impl BuildRun {
    pub fn new(provider: Arc<dyn CloudProvider>, config: OrchestratorConfig) -> Self {
        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self::with_run_id(provider, config, &run_id)
    }

    pub fn with_run_id(provider: Arc<dyn CloudProvider>, config: OrchestratorConfig, run_id: &str) -> Self {
        Self {
            provider,
            config,
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn execute(&self, request: &BuildRequest) -> BuildOutcome {
        let started_at = Utc::now();
        let provider = self.provider.as_ref();
        let mut sm = RunStateMachine::new(&self.run_id);
        tracing::info!(
            run_id = %self.run_id,
            image = %request.image,
            platform = %request.platform,
            "🏗️ [run] build requested"
        );

        let account = match AccountContext::resolve(provider, self.config.region.as_deref()).await {
            Ok(account) => account,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "❌ [run] cannot reach provider");
                advance(&mut sm, RunPhase::Failed, "provider unavailable");
                return BuildOutcome {
                    run_id: self.run_id.clone(),
                    image_id: Err(e),
                    instance_id: None,
                    correlation_id: None,
                    teardown: TeardownReport::default(),
                    phases: sm.into_history(),
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };

        let names = self.config.resource_names(&self.run_id);
        let mut set = ProvisionedResourceSet::new(&self.run_id, account, names);
        let mut progress = Progress::default();

        let result = self.drive(&mut set, &mut sm, &mut progress, request).await;
        let reason = match &result {
            Ok(_) => "build finished".to_string(),
            Err(e) => e.to_string(),
        };

        advance(&mut sm, RunPhase::TearingDown, &reason);
        let teardown = Terminator::new(provider, &self.config.waits)
            .teardown(&mut set)
            .await;

        match &result {
            Ok(image_id) => {
                advance(&mut sm, RunPhase::Completed, "image produced");
                tracing::info!(run_id = %self.run_id, image_id = %image_id, "✅ [run] build completed");
            }
            Err(e) => {
                advance(&mut sm, RunPhase::Failed, &reason);
                tracing::error!(run_id = %self.run_id, error = %e, "❌ [run] build failed");
            }
        }
        if !teardown.is_clean() {
            tracing::warn!(
                run_id = %self.run_id,
                failed_steps = teardown.failures().len(),
                "⚠️ [run] resources may have leaked"
            );
        }

        BuildOutcome {
            run_id: self.run_id.clone(),
            image_id: result,
            instance_id: progress.instance_id,
            correlation_id: progress.correlation_id,
            teardown,
            phases: sm.into_history(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(
        &self,
        set: &mut ProvisionedResourceSet,
        sm: &mut RunStateMachine,
        progress: &mut Progress,
        request: &BuildRequest,
    ) -> Result<String, BuildError> {
        let provider = self.provider.as_ref();
        let cfg = &self.config;

        advance(sm, RunPhase::Provisioning, "start");
        let provisioner = Provisioner::new(provider, cfg);
        provisioner.provision(set).await?;
        if request.grant_operator {
            provisioner.grant_operator_permissions(set).await?;
        }

        advance(sm, RunPhase::Launching, "resources ready");
        let instance_id = Launcher::new(provider, &cfg.launch)
            .launch(set, &request.image)
            .await?;
        progress.instance_id = Some(instance_id);

        if !cfg.launch.worker_grace.is_zero() {
            tracing::debug!(run_id = %self.run_id, grace = ?cfg.launch.worker_grace, "⏳ [run] letting the worker boot");
            sleep(cfg.launch.worker_grace).await;
        }

        advance(sm, RunPhase::Dispatching, "instance launched");
        let receipt = Dispatcher::new(provider, cfg)
            .dispatch(set, &request.image, &request.platform.os, &request.platform.arch)
            .await?;
        progress.correlation_id = Some(receipt.correlation_id);

        advance(sm, RunPhase::Collecting, "order sent");
        let collected = Collector::new(provider, cfg)
            .collect(set, Some(receipt.correlation_id))
            .await?;
        Ok(collected.image_id)
    }
}

fn advance(sm: &mut RunStateMachine, to: RunPhase, reason: &str) {
    if let Err(e) = sm.transition(to, reason) {
        tracing::error!(error = %e, "❌ [run] state machine out of sync");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminator::{StepOutcome, TeardownStep};
    use amibuilder_providers::mock::{MockProvider, MockWorker, WorkerEcho};

    fn config() -> OrchestratorConfig {
        let mut cfg = OrchestratorConfig::default().without_delays();
        cfg.collect.max_polls = 3;
        cfg
    }

    #[tokio::test]
    async fn account_failure_skips_everything() {
        let mock = Arc::new(MockProvider::new());
        mock.fail_on("caller_account_id", "expired token");
        let run = BuildRun::with_run_id(mock.clone(), config(), "acc1");

        let outcome = run
            .execute(&BuildRequest::new("org/app", Platform::new("linux", "x86_64")))
            .await;
        assert!(matches!(outcome.image_id, Err(BuildError::ProviderUnavailable(_))));
        assert_eq!(outcome.final_phase(), RunPhase::Failed);
        assert!(outcome.teardown.steps.is_empty());
        assert_eq!(mock.calls("create_role"), 0);
    }

    #[tokio::test]
    async fn launch_failure_still_tears_down() {
        let mock = Arc::new(MockProvider::new());
        mock.fail_on("run_instance", "insufficient capacity");
        let run = BuildRun::with_run_id(mock.clone(), config(), "lf1");

        let outcome = run
            .execute(&BuildRequest::new("org/app", Platform::new("linux", "x86_64")))
            .await;
        assert!(matches!(
            outcome.image_id,
            Err(BuildError::Provider { step: "run instance", .. })
        ));
        assert_eq!(outcome.instance_id, None);
        assert!(outcome.teardown.is_clean());
        assert_eq!(
            outcome.teardown.outcome(TeardownStep::TerminateInstance),
            Some(&StepOutcome::Skipped)
        );
        assert!(mock.role_names().is_empty());
        assert!(mock.queue_names().is_empty());
        let phases: Vec<RunPhase> = outcome.phases.iter().map(|t| t.to).collect();
        assert_eq!(
            phases,
            vec![
                RunPhase::Provisioning,
                RunPhase::Launching,
                RunPhase::TearingDown,
                RunPhase::Failed
            ]
        );
    }

    #[tokio::test]
    async fn worker_echo_in_body_is_accepted() {
        let mock = Arc::new(MockProvider::new());
        mock.set_worker(MockWorker {
            orders_queue: "Orders-echo1".to_string(),
            results_queue: "Results-echo1".to_string(),
            image_id: "ami-0abc".to_string(),
            echo: WorkerEcho::Body,
        });
        let mut cfg = config();
        cfg.collect.correlation = crate::config::CorrelationMode::Strict;
        let run = BuildRun::with_run_id(mock.clone(), cfg, "echo1");

        let outcome = run
            .execute(&BuildRequest::new("org/app", Platform::new("linux", "arm64")))
            .await;
        assert_eq!(outcome.image_id.as_deref().ok(), Some("ami-0abc"));
        assert!(outcome.correlation_id.is_some());
        assert_eq!(outcome.final_phase(), RunPhase::Completed);
    }
}
