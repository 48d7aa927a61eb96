use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Thin cloud primitives consumed by the build orchestrator.
///
/// Implementations must report a missing resource as [`ProviderError::NotFound`]
/// (wrapped in `anyhow::Error`) so callers can tell "already gone" apart from a
/// real failure.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    // --- Account ---

    /// Region all calls are issued against.
    fn region(&self) -> String;

    async fn caller_account_id(&self) -> Result<String>;

    /// Name of the IAM user behind the current credentials.
    async fn caller_user_name(&self) -> Result<String>;

    // --- Identity ---

    /// Create a role trusted per `trust_policy`. Returns the role name.
    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<String>;

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()>;

    async fn list_role_policies(&self, role_name: &str) -> Result<Vec<String>>;

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()>;

    async fn delete_role(&self, role_name: &str) -> Result<()>;

    async fn create_instance_profile(&self, profile_name: &str) -> Result<()>;

    async fn add_role_to_instance_profile(&self, profile_name: &str, role_name: &str) -> Result<()>;

    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<()>;

    /// Lookup used to wait for profile visibility. `Ok(false)` when the
    /// provider does not (yet) know the profile.
    async fn instance_profile_exists(&self, profile_name: &str) -> Result<bool>;

    /// Roles currently bound to a profile. A profile holds at most one role.
    async fn instance_profile_roles(&self, profile_name: &str) -> Result<Vec<String>>;

    async fn delete_instance_profile(&self, profile_name: &str) -> Result<()>;

    async fn put_user_policy(
        &self,
        user_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()>;

    // --- Queues ---

    /// Create a queue and return its endpoint URL.
    async fn create_queue(&self, queue_name: &str) -> Result<String>;

    /// Resolve a queue name to its endpoint. `Ok(None)` when not resolvable (yet).
    async fn queue_url(&self, queue_name: &str) -> Result<Option<String>>;

    async fn delete_queue(&self, queue_url: &str) -> Result<()>;

    /// Returns the provider message id.
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String>;

    /// Long-poll: waits up to `wait_seconds` provider-side for messages.
    async fn receive_messages(
        &self,
        queue_url: &str,
        wait_seconds: i32,
        max_messages: i32,
    ) -> Result<Vec<inventory::QueueMessage>>;

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()>;

    // --- Compute ---

    /// Start one instance. Returns the instance id.
    async fn run_instance(&self, request: &inventory::LaunchRequest) -> Result<String>;

    async fn create_tags(&self, resource_id: &str, key: &str, value: &str) -> Result<()>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;

    async fn describe_image(&self, image_id: &str) -> Result<Option<inventory::ImageRecord>>;

    async fn find_images_by_name(&self, name: &str) -> Result<Vec<inventory::ImageRecord>>;

    async fn deregister_image(&self, image_id: &str) -> Result<()>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    /// Start an export-to-storage task. Returns the task id.
    async fn export_image(&self, request: &inventory::ExportRequest) -> Result<String>;

    async fn describe_export_task(&self, task_id: &str) -> Result<Option<inventory::ExportTaskStatus>>;

    // --- Object storage ---

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },
}

impl ProviderError {
    pub fn not_found(kind: &'static str, id: &str) -> anyhow::Error {
        anyhow::Error::new(ProviderError::NotFound {
            kind,
            id: id.to_string(),
        })
    }

    pub fn already_exists(kind: &'static str, id: &str) -> anyhow::Error {
        anyhow::Error::new(ProviderError::AlreadyExists {
            kind,
            id: id.to_string(),
        })
    }
}

/// True if any error in the chain is a provider `NotFound`.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ProviderError>(),
            Some(ProviderError::NotFound { .. })
        )
    })
}

pub fn is_already_exists(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ProviderError>(),
            Some(ProviderError::AlreadyExists { .. })
        )
    })
}

pub mod inventory {
    use super::HashMap;
    use serde::{Deserialize, Serialize};

    /// Read-only view of a machine image.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ImageRecord {
        pub id: String,
        pub name: Option<String>,
        /// Snapshots referenced by the image's block-device mappings.
        pub snapshot_ids: Vec<String>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ExportTaskStatus {
        pub task_id: String,
        pub status: String,
        pub status_message: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ExportRequest {
        pub image_id: String,
        pub bucket: String,
        pub prefix: Option<String>,
        /// Disk format, e.g. `RAW`, `VMDK`, `VHD`.
        pub disk_format: String,
    }

    #[derive(Clone, Debug)]
    pub struct LaunchRequest {
        pub image_id: String,
        pub instance_type: String,
        pub key_name: Option<String>,
        /// Already base64 encoded.
        pub user_data: String,
        pub instance_profile: String,
    }

    #[derive(Clone, Debug)]
    pub struct QueueMessage {
        pub message_id: String,
        pub body: String,
        pub receipt_handle: Option<String>,
        pub attributes: HashMap<String, String>,
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "aws")]
pub mod aws;
