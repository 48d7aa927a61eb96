// End-to-end build runs against the in-memory provider.

mod common;

use std::sync::Arc;

use amibuilder_common::{Platform, QueueNames};
use amibuilder_orchestrator::state_machine::RunPhase;
use amibuilder_orchestrator::terminator::{StepOutcome, TeardownStep};
use amibuilder_orchestrator::{BuildError, BuildRequest, BuildRun};
use amibuilder_providers::mock::{MockBehavior, MockProvider, WorkerEcho};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{assert_nothing_leaked, fast_config, fixed_config, mock_with_worker, mock_with_worker_on};

fn linux_x86() -> Platform {
    Platform::new("linux", "x86_64")
}

#[tokio::test]
async fn test_build_returns_worker_image_and_cleans_up() {
    let mock = mock_with_worker("happy01", "ami-0feedface", WorkerEcho::Attribute);
    let run = BuildRun::with_run_id(mock.clone(), fast_config(), "happy01");

    let outcome = run.execute(&BuildRequest::new("org/app", linux_x86())).await;

    assert_eq!(outcome.image_id.as_deref().ok(), Some("ami-0feedface"));
    assert_eq!(outcome.run_id, "happy01");
    assert!(outcome.teardown.is_clean(), "{:?}", outcome.teardown);
    assert!(outcome
        .teardown
        .steps
        .iter()
        .all(|s| s.outcome == StepOutcome::Succeeded));
    assert_nothing_leaked(&mock);

    let instance = outcome.instance_id.clone().unwrap();
    assert_eq!(mock.instance_state(&instance), Some("terminated"));
    assert_eq!(
        mock.instance_tags(&instance),
        vec![("org/app".to_string(), "my-ami".to_string())]
    );
    let script = String::from_utf8(STANDARD.decode(mock.instance_user_data(&instance).unwrap()).unwrap()).unwrap();
    assert!(script.contains("arn:aws:sqs:eu-central-1:123456789012:Orders-happy01"));
    assert!(script.contains("arn:aws:sqs:eu-central-1:123456789012:Results-happy01"));

    let phases: Vec<RunPhase> = outcome.phases.iter().map(|t| t.to).collect();
    assert_eq!(
        phases,
        vec![
            RunPhase::Provisioning,
            RunPhase::Launching,
            RunPhase::Dispatching,
            RunPhase::Collecting,
            RunPhase::TearingDown,
            RunPhase::Completed,
        ]
    );
    assert!(outcome.finished_at >= outcome.started_at);
}

#[tokio::test]
async fn test_uncorrelated_worker_is_accepted_in_lenient_mode() {
    let mock = mock_with_worker_on(
        QueueNames::fixed(),
        "ami-legacy",
        WorkerEcho::None,
        MockBehavior::default(),
    );
    let run = BuildRun::with_run_id(mock.clone(), fixed_config(), "legacy1");

    let outcome = run.execute(&BuildRequest::new("org/app", linux_x86())).await;
    assert_eq!(outcome.image_id.as_deref().ok(), Some("ami-legacy"));
    assert!(mock.journal().iter().any(|e| e == "create_queue Orders"));
    assert_nothing_leaked(&mock);
}

#[tokio::test]
async fn test_uncorrelated_worker_times_out_in_strict_mode() {
    let mock = mock_with_worker("strict1", "ami-1", WorkerEcho::None);
    let mut cfg = fast_config();
    cfg.collect.correlation = amibuilder_orchestrator::config::CorrelationMode::Strict;
    let run = BuildRun::with_run_id(mock.clone(), cfg, "strict1");

    let outcome = run.execute(&BuildRequest::new("org/app", linux_x86())).await;
    assert!(matches!(outcome.image_id, Err(BuildError::NotFound(_))));
    assert_eq!(outcome.final_phase(), RunPhase::Failed);
    assert_nothing_leaked(&mock);
}

#[tokio::test]
async fn test_silent_worker_exhausts_poll_budget() {
    let mock = Arc::new(MockProvider::new());
    let run = BuildRun::with_run_id(mock.clone(), fast_config(), "silent1");

    let outcome = run.execute(&BuildRequest::new("org/app", linux_x86())).await;
    assert!(matches!(outcome.image_id, Err(BuildError::NotFound(_))));

    let polls: Vec<String> = mock
        .journal()
        .into_iter()
        .filter(|e| e.starts_with("receive_messages "))
        .collect();
    assert_eq!(polls.len(), 15);
    assert!(polls
        .iter()
        .all(|e| e.ends_with("/Results-silent1 wait=20")));

    // The unanswered order is deleted with its queue.
    assert!(outcome.teardown.is_clean());
    assert_nothing_leaked(&mock);
}

#[tokio::test]
async fn test_eventual_consistency_is_absorbed() {
    let mock = mock_with_worker_on(
        QueueNames::for_run("lag1"),
        "ami-lagged",
        WorkerEcho::Body,
        MockBehavior {
            profile_visible_after: 4,
            queue_visible_after: 3,
            policy_list_lag: 2,
            ..MockBehavior::default()
        },
    );
    let run = BuildRun::with_run_id(mock.clone(), fast_config(), "lag1");

    let outcome = run.execute(&BuildRequest::new("org/app", linux_x86())).await;
    assert_eq!(outcome.image_id.as_deref().ok(), Some("ami-lagged"));
    assert_eq!(
        outcome.teardown.outcome(TeardownStep::DeletePolicies),
        Some(&StepOutcome::Succeeded)
    );
    assert_nothing_leaked(&mock);
}

#[tokio::test]
async fn test_teardown_failure_is_reported_not_raised() {
    let mock = mock_with_worker("leak1", "ami-2", WorkerEcho::Attribute);
    mock.fail_on("terminate_instance", "UnauthorizedOperation");
    let run = BuildRun::with_run_id(mock.clone(), fast_config(), "leak1");

    let outcome = run.execute(&BuildRequest::new("org/app", linux_x86())).await;
    // The image was produced; only cleanup is degraded.
    assert_eq!(outcome.image_id.as_deref().ok(), Some("ami-2"));
    assert_eq!(outcome.final_phase(), RunPhase::Completed);
    assert!(matches!(
        outcome.teardown.outcome(TeardownStep::TerminateInstance),
        Some(StepOutcome::Failed(_))
    ));
    assert_eq!(outcome.teardown.failures().len(), 1);
    assert_nothing_leaked(&mock);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_resources() {
    // Only run "twin-a" has a worker; "twin-b" must not steal its result.
    let mock = mock_with_worker("twin-a", "ami-a", WorkerEcho::Attribute);
    let mut cfg = fast_config();
    cfg.collect.max_polls = 3;
    let run_a = BuildRun::with_run_id(mock.clone(), cfg.clone(), "twin-a");
    let run_b = BuildRun::with_run_id(mock.clone(), cfg, "twin-b");
    let request = BuildRequest::new("org/app", linux_x86());

    let (a, b) = tokio::join!(run_a.execute(&request), run_b.execute(&request));

    assert_eq!(a.image_id.as_deref().ok(), Some("ami-a"));
    assert!(matches!(b.image_id, Err(BuildError::NotFound(_))));
    assert_ne!(a.instance_id, b.instance_id);
    assert!(a.teardown.is_clean());
    assert!(b.teardown.is_clean());
    assert_nothing_leaked(&mock);
}
