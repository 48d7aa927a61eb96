use amibuilder_common::QueueAddress;
use amibuilder_providers::inventory::LaunchRequest;
use amibuilder_providers::CloudProvider;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use crate::config::LaunchSettings;
use crate::error::BuildError;
use crate::logger::ActionTimer;
use crate::resources::ProvisionedResourceSet;

const WORKER_PATH: &str = "/home/ec2-user/amibuilderd";

/// Boot script run by the worker instance. It records the image name, fetches
/// the worker binary and starts it against the run's queue pair.
pub fn bootstrap_script(
    image_name: &str,
    worker_url: &str,
    orders: &QueueAddress,
    results: &QueueAddress,
) -> String {
    format!(
        r#"#!/bin/bash
yum update -y
yum install -y wget tar
echo '{image}' > /home/ec2-user/image-name
curl -fsSL -o {path} '{url}'
chmod +x {path}
sleep 10
{path} -results-queue "{results}" -orders-queue "{orders}"
"#,
        image = image_name.replace('\'', ""),
        path = WORKER_PATH,
        url = worker_url,
        results = results.arn(),
        orders = orders.arn(),
    )
}

pub fn encode_user_data(script: &str) -> String {
    STANDARD.encode(script.as_bytes())
}

/// Starts the worker instance for a run.
pub struct Launcher<'a> {
    provider: &'a dyn CloudProvider,
    settings: &'a LaunchSettings,
}

impl<'a> Launcher<'a> {
    pub fn new(provider: &'a dyn CloudProvider, settings: &'a LaunchSettings) -> Self {
        Self { provider, settings }
    }

    /// Launch one instance bound to the run's instance profile and tag it
    /// `{image_name: tag_value}`. The instance id lands in `set` before
    /// tagging so it is torn down even if tagging fails.
    pub async fn launch(
        &self,
        set: &mut ProvisionedResourceSet,
        image_name: &str,
    ) -> Result<String, BuildError> {
        let profile = set
            .instance_profile_name
            .clone()
            .ok_or_else(|| BuildError::NotFound("instance profile".to_string()))?;

        let script = bootstrap_script(
            image_name,
            &self.settings.worker_url,
            &set.orders_address(),
            &set.results_address(),
        );
        let request = LaunchRequest {
            image_id: self.settings.base_image.clone(),
            instance_type: self.settings.instance_type.clone(),
            key_name: self.settings.key_name.clone(),
            user_data: encode_user_data(&script),
            instance_profile: profile.clone(),
        };

        let timer = ActionTimer::start(
            "LAUNCH_INSTANCE",
            &set.run_id,
            Some(json!({
                "instance_type": request.instance_type,
                "base_image": request.image_id,
                "instance_profile": profile,
            })),
        );
        let instance_id = timer
            .finish(self.provider.run_instance(&request).await)
            .map_err(|e| BuildError::provider("run instance", e))?;
        set.instance_id = Some(instance_id.clone());

        match self
            .provider
            .create_tags(&instance_id, image_name, &self.settings.tag_value)
            .await
        {
            Ok(()) => tracing::info!(
                run_id = %set.run_id,
                instance_id = %instance_id,
                tagged = true,
                "🚀 [launcher] instance launched"
            ),
            Err(e) => tracing::warn!(
                run_id = %set.run_id,
                instance_id = %instance_id,
                tagged = false,
                error = %e,
                "⚠️ [launcher] instance launched but tagging failed"
            ),
        }
        Ok(instance_id)
    }
}
