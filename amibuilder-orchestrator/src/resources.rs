use amibuilder_common::QueueAddress;
use amibuilder_providers::CloudProvider;

use crate::config::ResourceNames;
use crate::error::BuildError;

/// Account and region every address of a run is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub account_id: String,
    pub region: String,
}

impl AccountContext {
    pub fn new(account_id: &str, region: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            region: region.to_string(),
        }
    }

    /// Resolve the caller's account once. Failure here means credentials are
    /// unusable, which is always fatal.
    pub async fn resolve(
        provider: &dyn CloudProvider,
        region_override: Option<&str>,
    ) -> Result<Self, BuildError> {
        let account_id = provider
            .caller_account_id()
            .await
            .map_err(|e| BuildError::ProviderUnavailable(format!("caller identity: {:#}", e)))?;
        let region = region_override
            .map(|r| r.to_string())
            .unwrap_or_else(|| provider.region());
        if region.trim().is_empty() {
            return Err(BuildError::ProviderUnavailable("no region configured".to_string()));
        }
        Ok(Self { account_id, region })
    }

    pub fn queue(&self, name: &str) -> QueueAddress {
        QueueAddress::new(&self.region, &self.account_id, name)
    }
}

/// Cloud objects created for one build run.
///
/// Fields are filled in as provisioning progresses and set back to `None`
/// (or `false`) as teardown removes them, so a partially provisioned set can
/// always be handed to the terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedResourceSet {
    pub run_id: String,
    pub account: AccountContext,
    pub names: ResourceNames,
    pub role_name: Option<String>,
    pub instance_profile_name: Option<String>,
    /// Role currently bound to the instance profile.
    pub role_attached: bool,
    /// Inline policies this run put on the role.
    pub inline_policies: Vec<String>,
    pub orders_queue_url: Option<String>,
    pub results_queue_url: Option<String>,
    pub instance_id: Option<String>,
}

impl ProvisionedResourceSet {
    pub fn new(run_id: &str, account: AccountContext, names: ResourceNames) -> Self {
        Self {
            run_id: run_id.to_string(),
            account,
            names,
            role_name: None,
            instance_profile_name: None,
            role_attached: false,
            inline_policies: Vec::new(),
            orders_queue_url: None,
            results_queue_url: None,
            instance_id: None,
        }
    }

    /// True once every resource has been torn down (or was never created).
    pub fn is_empty(&self) -> bool {
        self.role_name.is_none()
            && self.instance_profile_name.is_none()
            && !self.role_attached
            && self.inline_policies.is_empty()
            && self.orders_queue_url.is_none()
            && self.results_queue_url.is_none()
            && self.instance_id.is_none()
    }

    pub fn orders_address(&self) -> QueueAddress {
        self.account.queue(&self.names.queues.orders)
    }

    pub fn results_address(&self) -> QueueAddress {
        self.account.queue(&self.names.queues.results)
    }
}
