// Common test fixtures. Every test runs against the in-memory provider.
#![allow(dead_code)]
use std::sync::Arc;

use amibuilder_common::QueueNames;
use amibuilder_orchestrator::config::NamingScheme;
use amibuilder_orchestrator::OrchestratorConfig;
use amibuilder_providers::mock::{MockBehavior, MockProvider, MockWorker, WorkerEcho};

/// Config with every wait and sleep zeroed out.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default().without_delays()
}

pub fn fixed_config() -> OrchestratorConfig {
    let mut cfg = fast_config();
    cfg.naming = NamingScheme::Fixed;
    cfg
}

/// Mock provider with a worker answering orders of run `run_id`.
pub fn mock_with_worker(run_id: &str, image_id: &str, echo: WorkerEcho) -> Arc<MockProvider> {
    mock_with_worker_on(QueueNames::for_run(run_id), image_id, echo, MockBehavior::default())
}

pub fn mock_with_worker_on(
    queues: QueueNames,
    image_id: &str,
    echo: WorkerEcho,
    behavior: MockBehavior,
) -> Arc<MockProvider> {
    let mock = Arc::new(MockProvider::with_behavior(behavior));
    mock.set_worker(MockWorker {
        orders_queue: queues.orders,
        results_queue: queues.results,
        image_id: image_id.to_string(),
        echo,
    });
    mock
}

/// Nothing the run created is left behind.
pub fn assert_nothing_leaked(mock: &MockProvider) {
    assert!(mock.role_names().is_empty(), "roles left: {:?}", mock.role_names());
    assert!(mock.profile_names().is_empty(), "profiles left: {:?}", mock.profile_names());
    assert!(mock.queue_names().is_empty(), "queues left: {:?}", mock.queue_names());
}
