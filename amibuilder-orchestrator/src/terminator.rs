use std::fmt;

use amibuilder_providers::{is_not_found, CloudProvider};

use crate::config::WaitSettings;
use crate::logger::ActionTimer;
use crate::resources::ProvisionedResourceSet;
use crate::retry::{wait_until, WaitOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    DetachRole,
    DeletePolicies,
    DeleteRole,
    DeleteInstanceProfile,
    DeleteOrdersQueue,
    DeleteResultsQueue,
    TerminateInstance,
}

impl TeardownStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::DetachRole => "detach_role",
            TeardownStep::DeletePolicies => "delete_policies",
            TeardownStep::DeleteRole => "delete_role",
            TeardownStep::DeleteInstanceProfile => "delete_instance_profile",
            TeardownStep::DeleteOrdersQueue => "delete_orders_queue",
            TeardownStep::DeleteResultsQueue => "delete_results_queue",
            TeardownStep::TerminateInstance => "terminate_instance",
        }
    }

    fn action(&self) -> &'static str {
        match self {
            TeardownStep::DetachRole => "TEARDOWN_DETACH_ROLE",
            TeardownStep::DeletePolicies => "TEARDOWN_DELETE_POLICIES",
            TeardownStep::DeleteRole => "TEARDOWN_DELETE_ROLE",
            TeardownStep::DeleteInstanceProfile => "TEARDOWN_DELETE_INSTANCE_PROFILE",
            TeardownStep::DeleteOrdersQueue | TeardownStep::DeleteResultsQueue => {
                "TEARDOWN_DELETE_QUEUE"
            }
            TeardownStep::TerminateInstance => "TEARDOWN_TERMINATE_INSTANCE",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    /// The provider no longer knows the resource.
    AlreadyGone,
    /// Nothing to do: the resource was never created or is already torn down.
    Skipped,
    Failed(String),
}

impl StepOutcome {
    fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) if is_not_found(&e) => StepOutcome::AlreadyGone,
            Err(e) => StepOutcome::Failed(format!("{:#}", e)),
        }
    }

    /// Resource is gone after this step, either way.
    pub fn is_gone(&self) -> bool {
        matches!(self, StepOutcome::Succeeded | StepOutcome::AlreadyGone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStepOutcome {
    pub step: TeardownStep,
    pub outcome: StepOutcome,
}

/// Per-step record of one teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStepOutcome>,
}

impl TeardownReport {
    fn push(&mut self, step: TeardownStep, outcome: StepOutcome) {
        self.steps.push(TeardownStepOutcome { step, outcome });
    }

    pub fn outcome(&self, step: TeardownStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }

    pub fn failures(&self) -> Vec<&TeardownStepOutcome> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Best-effort reverse-order deletion of a run's resources.
pub struct Terminator<'a> {
    provider: &'a dyn CloudProvider,
    waits: &'a WaitSettings,
}

impl<'a> Terminator<'a> {
    pub fn new(provider: &'a dyn CloudProvider, waits: &'a WaitSettings) -> Self {
        Self { provider, waits }
    }

    /// Tear down everything recorded in `set`. Never fails: every step runs
    /// regardless of earlier failures and reports its own outcome. Resources
    /// that are gone are cleared from `set`, so calling this again only
    /// retries what failed.
    pub async fn teardown(&self, set: &mut ProvisionedResourceSet) -> TeardownReport {
        let mut report = TeardownReport::default();
        let run_id = set.run_id.clone();
        tracing::info!(run_id = %run_id, "🧹 [terminator] tearing down resources");

        // 1. Unbind role from profile.
        let outcome = match (&set.instance_profile_name, &set.role_name, set.role_attached) {
            (Some(profile), Some(role), true) => {
                let result = self
                    .provider
                    .remove_role_from_instance_profile(profile, role)
                    .await;
                self.finish(&run_id, TeardownStep::DetachRole, result)
            }
            _ => StepOutcome::Skipped,
        };
        if outcome.is_gone() || outcome == StepOutcome::Skipped {
            set.role_attached = false;
        }
        report.push(TeardownStep::DetachRole, outcome);

        // 2. Inline policies, then wait for the listing to drain.
        let outcome = match set.role_name.clone() {
            Some(role) => self.delete_policies(&run_id, &role).await,
            None => StepOutcome::Skipped,
        };
        if outcome.is_gone() || outcome == StepOutcome::Skipped {
            set.inline_policies.clear();
        }
        report.push(TeardownStep::DeletePolicies, outcome);

        // 3. Role
        let outcome = match set.role_name.as_deref() {
            Some(role) => {
                let result = self.provider.delete_role(role).await;
                self.finish(&run_id, TeardownStep::DeleteRole, result)
            }
            None => StepOutcome::Skipped,
        };
        if outcome.is_gone() {
            set.role_name = None;
        }
        report.push(TeardownStep::DeleteRole, outcome);

        // 4. Instance profile
        let outcome = match set.instance_profile_name.as_deref() {
            Some(profile) => {
                let result = self.provider.delete_instance_profile(profile).await;
                self.finish(&run_id, TeardownStep::DeleteInstanceProfile, result)
            }
            None => StepOutcome::Skipped,
        };
        if outcome.is_gone() {
            set.instance_profile_name = None;
        }
        report.push(TeardownStep::DeleteInstanceProfile, outcome);

        // 5. Queues
        let outcome = match set.orders_queue_url.as_deref() {
            Some(url) => {
                let result = self.provider.delete_queue(url).await;
                self.finish(&run_id, TeardownStep::DeleteOrdersQueue, result)
            }
            None => StepOutcome::Skipped,
        };
        if outcome.is_gone() {
            set.orders_queue_url = None;
        }
        report.push(TeardownStep::DeleteOrdersQueue, outcome);

        let outcome = match set.results_queue_url.as_deref() {
            Some(url) => {
                let result = self.provider.delete_queue(url).await;
                self.finish(&run_id, TeardownStep::DeleteResultsQueue, result)
            }
            None => StepOutcome::Skipped,
        };
        if outcome.is_gone() {
            set.results_queue_url = None;
        }
        report.push(TeardownStep::DeleteResultsQueue, outcome);

        // 6. Instance
        let outcome = match set.instance_id.as_deref() {
            Some(id) => {
                let result = self.provider.terminate_instance(id).await;
                self.finish(&run_id, TeardownStep::TerminateInstance, result)
            }
            None => StepOutcome::Skipped,
        };
        if outcome.is_gone() {
            set.instance_id = None;
        }
        report.push(TeardownStep::TerminateInstance, outcome);

        if report.is_clean() {
            tracing::info!(run_id = %run_id, "✅ [terminator] run torn down");
        } else {
            tracing::warn!(
                run_id = %run_id,
                failed_steps = report.failures().len(),
                "⚠️ [terminator] run torn down with failed steps"
            );
        }
        report
    }

    async fn delete_policies(&self, run_id: &str, role: &str) -> StepOutcome {
        let step = TeardownStep::DeletePolicies;
        let timer = ActionTimer::start(step.action(), run_id, Some(serde_json::json!({ "role": role })));

        let names = match self.provider.list_role_policies(role).await {
            Ok(names) => names,
            Err(e) if is_not_found(&e) => {
                timer.success();
                tracing::info!(run_id, role, "👻 [terminator] role already gone, no policies to delete");
                return StepOutcome::AlreadyGone;
            }
            Err(e) => {
                timer.failure(&e);
                tracing::warn!(run_id, role, error = %e, "❌ [terminator] could not list role policies");
                return StepOutcome::Failed(format!("{:#}", e));
            }
        };

        let mut failures = Vec::new();
        for name in &names {
            match self.provider.delete_role_policy(role, name).await {
                Ok(()) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => {
                    tracing::warn!(run_id, role, policy = %name, error = %e, "❌ [terminator] could not delete role policy");
                    failures.push(format!("{}: {:#}", name, e));
                }
            }
        }

        let provider = self.provider;
        let waited = wait_until("role policy list empty", &self.waits.policy_detach, move || async move {
            Ok::<bool, anyhow::Error>(provider.list_role_policies(role).await?.is_empty())
        })
        .await;

        let outcome = match waited {
            _ if !failures.is_empty() => StepOutcome::Failed(failures.join("; ")),
            Ok(WaitOutcome::Ready { .. }) => StepOutcome::Succeeded,
            Ok(WaitOutcome::GaveUp { attempts }) => {
                StepOutcome::Failed(format!("policies still listed after {} attempt(s)", attempts))
            }
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        match &outcome {
            StepOutcome::Failed(msg) => timer.failure(msg),
            _ => timer.success(),
        }
        outcome
    }

    fn finish(&self, run_id: &str, step: TeardownStep, result: anyhow::Result<()>) -> StepOutcome {
        let outcome = StepOutcome::from_result(result);
        match &outcome {
            StepOutcome::Succeeded => {
                tracing::info!(run_id, step = %step, "🗑️ [terminator] step done");
                crate::logger::log_quick(step.action(), run_id, Some(step.as_str()));
            }
            StepOutcome::AlreadyGone => {
                tracing::info!(run_id, step = %step, "👻 [terminator] already gone");
            }
            StepOutcome::Failed(msg) => {
                tracing::warn!(run_id, step = %step, error = %msg, "❌ [terminator] step failed, continuing");
                crate::logger::log_event(step.action(), "failed", run_id, Some(msg));
            }
            StepOutcome::Skipped => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OrchestratorConfig, ResourceNames};
    use crate::launcher::Launcher;
    use crate::provisioner::Provisioner;
    use crate::resources::AccountContext;
    use amibuilder_providers::mock::{MockBehavior, MockProvider};

    async fn provisioned(mock: &MockProvider, cfg: &OrchestratorConfig) -> ProvisionedResourceSet {
        let mut set = ProvisionedResourceSet::new(
            "t1",
            AccountContext::new("123456789012", "eu-central-1"),
            ResourceNames::for_run("t1"),
        );
        Provisioner::new(mock, cfg).provision(&mut set).await.unwrap();
        Launcher::new(mock, &cfg.launch)
            .launch(&mut set, "org/app")
            .await
            .unwrap();
        set
    }

    #[tokio::test]
    async fn removes_everything() {
        let mock = MockProvider::new();
        let cfg = OrchestratorConfig::default().without_delays();
        let mut set = provisioned(&mock, &cfg).await;
        let instance = set.instance_id.clone().unwrap();

        let report = Terminator::new(&mock, &cfg.waits).teardown(&mut set).await;
        assert!(report.is_clean(), "{:?}", report);
        assert!(report.steps.iter().all(|s| s.outcome == StepOutcome::Succeeded));
        assert!(set.is_empty());
        assert!(mock.role_names().is_empty());
        assert!(mock.profile_names().is_empty());
        assert!(mock.queue_names().is_empty());
        assert_eq!(mock.instance_state(&instance), Some("terminated"));
    }

    #[tokio::test]
    async fn second_teardown_is_a_no_op() {
        let mock = MockProvider::new();
        let cfg = OrchestratorConfig::default().without_delays();
        let mut set = provisioned(&mock, &cfg).await;
        let terminator = Terminator::new(&mock, &cfg.waits);

        terminator.teardown(&mut set).await;
        let calls_after_first = mock.journal().len();
        let report = terminator.teardown(&mut set).await;

        assert_eq!(mock.journal().len(), calls_after_first);
        assert!(report.steps.iter().all(|s| s.outcome == StepOutcome::Skipped));
    }

    #[tokio::test]
    async fn stale_set_reports_already_gone() {
        let mock = MockProvider::new();
        let cfg = OrchestratorConfig::default().without_delays();
        let mut set = provisioned(&mock, &cfg).await;
        let stale = set.clone();
        let terminator = Terminator::new(&mock, &cfg.waits);
        terminator.teardown(&mut set).await;

        let mut stale = stale;
        let report = terminator.teardown(&mut stale).await;
        assert!(report.is_clean());
        assert_eq!(
            report.outcome(TeardownStep::DeleteRole),
            Some(&StepOutcome::AlreadyGone)
        );
        assert_eq!(
            report.outcome(TeardownStep::DeleteOrdersQueue),
            Some(&StepOutcome::AlreadyGone)
        );
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn role_deleted_only_after_policy_list_drains() {
        let mock = MockProvider::with_behavior(MockBehavior {
            policy_list_lag: 1,
            ..MockBehavior::default()
        });
        let cfg = OrchestratorConfig::default().without_delays();
        let mut set = provisioned(&mock, &cfg).await;

        let report = Terminator::new(&mock, &cfg.waits).teardown(&mut set).await;
        assert!(report.is_clean(), "{:?}", report);

        let journal = mock.journal();
        let lists: Vec<usize> = journal
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with("list_role_policies "))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(lists.len(), 3);
        let delete_role = journal
            .iter()
            .position(|e| e.starts_with("delete_role "))
            .unwrap();
        let delete_profile = journal
            .iter()
            .position(|e| e.starts_with("delete_instance_profile "))
            .unwrap();
        assert!(delete_role > lists[2]);
        assert!(delete_profile > lists[2]);
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_steps() {
        let mock = MockProvider::new();
        let cfg = OrchestratorConfig::default().without_delays();
        let mut set = provisioned(&mock, &cfg).await;
        let instance = set.instance_id.clone().unwrap();
        mock.fail_on("delete_queue", "access denied");

        let report = Terminator::new(&mock, &cfg.waits).teardown(&mut set).await;
        assert!(matches!(
            report.outcome(TeardownStep::DeleteOrdersQueue),
            Some(StepOutcome::Failed(_))
        ));
        assert_eq!(report.failures().len(), 2);
        assert_eq!(
            report.outcome(TeardownStep::TerminateInstance),
            Some(&StepOutcome::Succeeded)
        );
        assert_eq!(mock.instance_state(&instance), Some("terminated"));
        assert!(set.orders_queue_url.is_some());

        // A retry picks up only what is left.
        mock.clear_failure("delete_queue");
        let retry = Terminator::new(&mock, &cfg.waits).teardown(&mut set).await;
        assert!(retry.is_clean());
        assert_eq!(
            retry.outcome(TeardownStep::DeleteRole),
            Some(&StepOutcome::Skipped)
        );
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn partial_set_is_torn_down() {
        let mock = MockProvider::new();
        mock.fail_on("create_queue", "quota");
        let cfg = OrchestratorConfig::default().without_delays();
        let mut set = ProvisionedResourceSet::new(
            "t2",
            AccountContext::new("123456789012", "eu-central-1"),
            ResourceNames::for_run("t2"),
        );
        assert!(Provisioner::new(&mock, &cfg).provision(&mut set).await.is_err());

        let report = Terminator::new(&mock, &cfg.waits).teardown(&mut set).await;
        assert!(report.is_clean());
        assert_eq!(
            report.outcome(TeardownStep::TerminateInstance),
            Some(&StepOutcome::Skipped)
        );
        assert!(mock.role_names().is_empty());
        assert!(set.is_empty());
    }
}
