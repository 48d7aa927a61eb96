use amibuilder_common::bus::ATTR_CORRELATION_ID;
use amibuilder_common::BuildResult;
use amibuilder_providers::inventory::QueueMessage;
use amibuilder_providers::CloudProvider;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::{CorrelationMode, OrchestratorConfig};
use crate::dispatcher::resolve_queue;
use crate::error::BuildError;
use crate::logger::ActionTimer;
use crate::resources::ProvisionedResourceSet;

/// A result accepted from the Results queue.
#[derive(Debug, Clone)]
pub struct CollectedResult {
    pub image_id: String,
    pub message_id: String,
    pub correlation_id: Option<Uuid>,
    pub polls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Foreign,
    Uncorrelated,
}

/// Correlation id carried by a message, attribute first, then body.
fn message_correlation(message: &QueueMessage) -> Option<Uuid> {
    message
        .attributes
        .get(ATTR_CORRELATION_ID)
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .or_else(|| {
            BuildResult::parse(&message.body)
                .ok()
                .and_then(|r| r.correlation_id())
        })
}

fn judge(expected: Option<Uuid>, found: Option<Uuid>, mode: CorrelationMode) -> Verdict {
    match (expected, found) {
        (None, _) => Verdict::Accept,
        (Some(want), Some(got)) if want == got => Verdict::Accept,
        (Some(_), Some(_)) => Verdict::Foreign,
        (Some(_), None) => match mode {
            CorrelationMode::Lenient => Verdict::Accept,
            CorrelationMode::Strict => Verdict::Uncorrelated,
        },
    }
}

/// Long-polls the Results queue for the outcome of a build order.
pub struct Collector<'a> {
    provider: &'a dyn CloudProvider,
    config: &'a OrchestratorConfig,
}

impl<'a> Collector<'a> {
    pub fn new(provider: &'a dyn CloudProvider, config: &'a OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    /// Wait for the result of the order identified by `expected`.
    ///
    /// Messages carrying another correlation id are left unacknowledged.
    /// Without an expected id the first message wins.
    pub async fn collect(
        &self,
        set: &ProvisionedResourceSet,
        expected: Option<Uuid>,
    ) -> Result<CollectedResult, BuildError> {
        let settings = &self.config.collect;
        let queue_name = &set.names.queues.results;
        let queue_url = resolve_queue(
            self.provider,
            &set.results_address(),
            &self.config.waits.queue_resolve,
        )
        .await?;

        let timer = ActionTimer::start(
            "COLLECT_RESULT",
            &set.run_id,
            Some(serde_json::json!({
                "queue": queue_name,
                "max_polls": settings.max_polls,
                "wait_seconds": settings.wait_seconds,
            })),
        );

        for poll in 1..=settings.max_polls {
            let messages = match self
                .provider
                .receive_messages(&queue_url, settings.wait_seconds, settings.max_messages)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(run_id = %set.run_id, poll, error = %e, "⚠️ [collector] receive failed");
                    Vec::new()
                }
            };

            if messages.is_empty() {
                tracing::debug!(run_id = %set.run_id, poll, "⏳ [collector] no result yet");
                if !settings.empty_poll_sleep.is_zero() {
                    sleep(settings.empty_poll_sleep).await;
                }
                continue;
            }

            for message in messages {
                let found = message_correlation(&message);
                match judge(expected, found, settings.correlation) {
                    Verdict::Accept => {}
                    Verdict::Foreign => {
                        tracing::warn!(
                            run_id = %set.run_id,
                            message_id = %message.message_id,
                            correlation_id = ?found,
                            "🔀 [collector] result belongs to another order, leaving it"
                        );
                        continue;
                    }
                    Verdict::Uncorrelated => {
                        tracing::warn!(
                            run_id = %set.run_id,
                            message_id = %message.message_id,
                            "🔀 [collector] uncorrelated result ignored (strict mode)"
                        );
                        continue;
                    }
                }

                let parsed = BuildResult::parse(&message.body)
                    .and_then(|r| r.image_id().map(|s| s.to_string()));

                if let Some(receipt) = message.receipt_handle.as_deref() {
                    if let Err(e) = self.provider.delete_message(&queue_url, receipt).await {
                        tracing::warn!(run_id = %set.run_id, message_id = %message.message_id, error = %e, "⚠️ [collector] could not acknowledge result");
                    }
                }

                return match parsed {
                    Ok(image_id) => {
                        tracing::info!(run_id = %set.run_id, image_id = %image_id, poll, "📥 [collector] build result received");
                        timer.success();
                        Ok(CollectedResult {
                            image_id,
                            message_id: message.message_id,
                            correlation_id: found,
                            polls: poll,
                        })
                    }
                    Err(e) => {
                        timer.failure(&e);
                        Err(BuildError::MalformedResult(e))
                    }
                };
            }
        }

        let err = BuildError::NotFound(format!(
            "build result on {} after {} poll(s)",
            queue_name, settings.max_polls
        ));
        timer.failure(&err);
        Err(err)
    }
}
