use amibuilder_common::ProtocolError;

/// Failures surfaced to the caller of a build run or an image operation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Configuration or credentials could not be loaded. Always fatal.
    #[error("cloud provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A resource never became visible within its retry budget.
    #[error("{resource} not visible after {attempts} attempt(s)")]
    NotYetVisible { resource: String, attempts: u32 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("image name '{name}' matches {} images: {}", ids.len(), ids.join(", "))]
    AmbiguousMatch { name: String, ids: Vec<String> },

    #[error("malformed build result: {0}")]
    MalformedResult(#[from] ProtocolError),

    /// Snapshot cleanup stopped short. `remaining` lists the snapshots still
    /// to delete; the image itself is already deregistered.
    #[error("{} snapshot(s) left behind ({}): {source}", remaining.len(), remaining.join(", "))]
    SnapshotsLeft {
        remaining: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    /// A provider call failed during a step that cannot continue without it.
    #[error("{step} failed: {source}")]
    Provider {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl BuildError {
    pub fn provider(step: &'static str, source: anyhow::Error) -> Self {
        BuildError::Provider { step, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BuildError::NotFound(_))
    }
}
