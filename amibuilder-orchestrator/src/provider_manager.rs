use std::env;
use std::sync::Arc;

use amibuilder_providers::CloudProvider;

use crate::config::OrchestratorConfig;
use crate::error::BuildError;

pub struct ProviderManager;

impl ProviderManager {
    pub fn current_provider_name() -> String {
        env::var("PROVIDER")
            .ok()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "aws".to_string())
    }

    /// Build the provider named `provider_name`. Only providers compiled in
    /// through cargo features are available.
    pub async fn get_provider(
        provider_name: &str,
        config: &OrchestratorConfig,
    ) -> Result<Arc<dyn CloudProvider>, BuildError> {
        let _ = config; // unused when no provider feature is enabled
        match provider_name.to_lowercase().as_str() {
            #[cfg(feature = "provider-aws")]
            "aws" => {
                let provider =
                    amibuilder_providers::aws::AwsProvider::from_env(config.region.as_deref())
                        .await
                        .map_err(|e| BuildError::ProviderUnavailable(format!("{:#}", e)))?;
                Ok(Arc::new(provider))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => Ok(Arc::new(amibuilder_providers::mock::MockProvider::new())),
            other => Err(BuildError::ProviderUnavailable(format!(
                "provider '{}' is not compiled in (enable the provider-{} feature)",
                other, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_provider_is_unavailable() {
        let cfg = OrchestratorConfig::default();
        let err = ProviderManager::get_provider("scaleway", &cfg)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::ProviderUnavailable(_)));
    }
}
