use std::collections::HashMap;
use std::sync::Mutex;

use amibuilder_common::bus::{QueueAddress, ATTR_CORRELATION_ID};
use amibuilder_common::BuildOrder;
use amibuilder_providers::CloudProvider;
use serde_json::json;
use uuid::Uuid;

use crate::config::{OrchestratorConfig, RetryBudget};
use crate::error::BuildError;
use crate::logger::ActionTimer;
use crate::resources::ProvisionedResourceSet;
use crate::retry::wait_until;

/// Resolve a queue to its endpoint, retrying while the name is not
/// resolvable yet. On exhaustion `Fail` gives `NotFound`; `ProceedAnyway`
/// falls back to the endpoint derived from the account and region.
pub(crate) async fn resolve_queue(
    provider: &dyn CloudProvider,
    address: &QueueAddress,
    budget: &RetryBudget,
) -> Result<String, BuildError> {
    let resolved: Mutex<Option<String>> = Mutex::new(None);
    let slot = &resolved;
    let name = address.name.as_str();

    let waited = wait_until(&format!("queue {}", name), budget, move || async move {
        let url = provider.queue_url(name).await?;
        let found = url.is_some();
        if url.is_some() {
            *slot.lock().unwrap_or_else(|p| p.into_inner()) = url;
        }
        Ok::<bool, anyhow::Error>(found)
    })
    .await
    .map_err(|e| match e {
        BuildError::NotYetVisible { .. } => BuildError::NotFound(format!("queue {}", name)),
        other => other,
    })?;

    match resolved.into_inner().unwrap_or_else(|p| p.into_inner()) {
        Some(url) => Ok(url),
        None => {
            let url = address.url();
            tracing::warn!(queue = name, ?waited, url = %url, "⚠️ [queue] using derived endpoint");
            Ok(url)
        }
    }
}

/// What was sent for one build order.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub message_id: String,
    pub correlation_id: Uuid,
    pub order: BuildOrder,
}

/// Publishes build orders on the run's Orders queue.
pub struct Dispatcher<'a> {
    provider: &'a dyn CloudProvider,
    config: &'a OrchestratorConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(provider: &'a dyn CloudProvider, config: &'a OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    /// Send `{image, os, arch}` to the Orders queue. The body is exactly the
    /// order; the correlation id travels as a message attribute.
    pub async fn dispatch(
        &self,
        set: &ProvisionedResourceSet,
        image: &str,
        os: &str,
        arch: &str,
    ) -> Result<DispatchReceipt, BuildError> {
        let order = BuildOrder::new(&self.config.registry, image, os, arch);
        let body = order
            .to_wire()
            .map_err(|e| BuildError::provider("serialize build order", e.into()))?;

        let queue_url = resolve_queue(
            self.provider,
            &set.orders_address(),
            &self.config.waits.queue_resolve,
        )
        .await?;

        let correlation_id = Uuid::new_v4();
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_CORRELATION_ID.to_string(), correlation_id.to_string());

        let timer = ActionTimer::start(
            "DISPATCH_ORDER",
            &set.run_id,
            Some(json!({
                "image": order.image,
                "os": order.os,
                "arch": order.arch,
                "correlation_id": correlation_id.to_string(),
            })),
        );
        let message_id = timer
            .finish(self.provider.send_message(&queue_url, &body, &attributes).await)
            .map_err(|e| BuildError::provider("send build order", e))?;

        tracing::info!(
            run_id = %set.run_id,
            message_id = %message_id,
            correlation_id = %correlation_id,
            "📤 [dispatcher] build order sent: {}",
            body
        );
        Ok(DispatchReceipt {
            message_id,
            correlation_id,
            order,
        })
    }
}
