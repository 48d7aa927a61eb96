use std::path::Path;

use amibuilder_providers::{is_already_exists, is_not_found, CloudProvider};
use serde_json::json;

use crate::config::WaitSettings;
use crate::error::BuildError;
use crate::logger::ActionTimer;
use crate::retry::wait_until;

pub const VMIMPORT_ROLE: &str = "vmimport";
pub const VMIMPORT_POLICY: &str = "vmimportPolicy";

/// Trust policy for the import/export service role.
pub fn vmimport_trust_policy() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "vmie.amazonaws.com" },
            "Action": "sts:AssumeRole",
            "Condition": {
                "StringEquals": { "sts:Externalid": "vmimport" }
            }
        }]
    })
}

pub fn vmimport_policy(bucket: &str, account_id: &str) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": [
                    "s3:ListBucket",
                    "s3:GetBucketLocation",
                    "s3:GetObject",
                    "s3:PutObject",
                    "s3:GetBucketAcl"
                ],
                "Resource": [
                    format!("arn:aws:s3:::{}", bucket),
                    format!("arn:aws:s3:::{}/*", bucket)
                ]
            },
            {
                "Effect": "Allow",
                "Action": [
                    "ec2:ModifySnapshotAttribute",
                    "ec2:CopySnapshot",
                    "ec2:Describe*",
                    "ec2:ImportSnapshot",
                    "ec2:RegisterImage",
                    "ec2:ExportImage"
                ],
                "Resource": "*"
            },
            {
                "Effect": "Allow",
                "Action": "iam:PassRole",
                "Resource": format!("arn:aws:iam::{}:role/{}", account_id, VMIMPORT_ROLE)
            }
        ]
    })
}

/// Object storage side of image exports.
pub struct ExportStore<'a> {
    provider: &'a dyn CloudProvider,
    waits: &'a WaitSettings,
    region: String,
}

impl<'a> ExportStore<'a> {
    pub fn new(provider: &'a dyn CloudProvider, waits: &'a WaitSettings, region: &str) -> Self {
        Self {
            provider,
            waits,
            region: region.to_string(),
        }
    }

    /// Create the bucket if needed and wait until it can be looked up.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), BuildError> {
        let timer = ActionTimer::start(
            "STORAGE_ENSURE_BUCKET",
            bucket,
            Some(json!({ "region": self.region })),
        );
        match self.provider.create_bucket(bucket, &self.region).await {
            Ok(()) => tracing::info!(bucket, region = %self.region, "🪣 [storage] bucket created"),
            Err(e) if is_already_exists(&e) => {
                tracing::info!(bucket, "🪣 [storage] bucket already exists")
            }
            Err(e) => {
                timer.failure(&e);
                return Err(BuildError::provider("create bucket", e));
            }
        }

        let provider = self.provider;
        let waited = wait_until("bucket", &self.waits.bucket, move || {
            provider.bucket_exists(bucket)
        })
        .await;
        timer.finish(waited).map(|_| ())
    }

    /// Service role the import/export service assumes to read and write the
    /// bucket. Existing role is reused; the inline policy is always refreshed.
    pub async fn ensure_vmimport_role(&self, bucket: &str, account_id: &str) -> Result<(), BuildError> {
        let trust = vmimport_trust_policy().to_string();
        match self.provider.create_role(VMIMPORT_ROLE, &trust).await {
            Ok(_) => tracing::info!(role = VMIMPORT_ROLE, "🔑 [storage] service role created"),
            Err(e) if is_already_exists(&e) => {
                tracing::debug!(role = VMIMPORT_ROLE, "🔑 [storage] service role already exists")
            }
            Err(e) => return Err(BuildError::provider("create vmimport role", e)),
        }
        let policy = vmimport_policy(bucket, account_id).to_string();
        self.provider
            .put_role_policy(VMIMPORT_ROLE, VMIMPORT_POLICY, &policy)
            .await
            .map_err(|e| BuildError::provider("put vmimport policy", e))
    }

    pub async fn list_exports(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>, BuildError> {
        self.provider
            .list_objects(bucket, prefix)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    BuildError::NotFound(format!("bucket {}", bucket))
                } else {
                    BuildError::provider("list objects", e)
                }
            })
    }

    /// Fetch one object to a local file. Returns the number of bytes written.
    pub async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64, BuildError> {
        let bytes = self.provider.get_object(bucket, key).await.map_err(|e| {
            if is_not_found(&e) {
                BuildError::NotFound(format!("object {}/{}", bucket, key))
            } else {
                BuildError::provider("get object", e)
            }
        })?;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BuildError::provider("create download directory", e.into()))?;
        }
        tokio::fs::write(destination, &bytes)
            .await
            .map_err(|e| BuildError::provider("write download", e.into()))?;
        tracing::info!(bucket, key, path = %destination.display(), bytes = bytes.len(), "⬇️ [storage] export downloaded");
        Ok(bytes.len() as u64)
    }

    /// Delete every object in the bucket. Returns how many were removed.
    pub async fn purge(&self, bucket: &str) -> Result<usize, BuildError> {
        let keys = self.list_exports(bucket, None).await?;
        let mut removed = 0;
        for key in &keys {
            match self.provider.delete_object(bucket, key).await {
                Ok(()) => removed += 1,
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(BuildError::provider("delete object", e)),
            }
        }
        tracing::info!(bucket, removed, "🧹 [storage] bucket purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use amibuilder_providers::mock::{MockBehavior, MockProvider};

    #[tokio::test]
    async fn bucket_is_awaited() {
        let mock = MockProvider::with_behavior(MockBehavior {
            bucket_visible_after: 2,
            ..MockBehavior::default()
        });
        let cfg = OrchestratorConfig::default().without_delays();
        let store = ExportStore::new(&mock, &cfg.waits, "eu-central-1");
        store.ensure_bucket("exports").await.unwrap();
        assert_eq!(mock.calls("bucket_exists"), 3);

        // Second call accepts the existing bucket.
        store.ensure_bucket("exports").await.unwrap();
    }

    #[tokio::test]
    async fn invisible_bucket_fails() {
        let mock = MockProvider::with_behavior(MockBehavior {
            bucket_visible_after: 100,
            ..MockBehavior::default()
        });
        let cfg = OrchestratorConfig::default().without_delays();
        let err = ExportStore::new(&mock, &cfg.waits, "eu-central-1")
            .ensure_bucket("exports")
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::NotYetVisible { attempts: 12, .. }));
    }

    #[tokio::test]
    async fn vmimport_role_is_idempotent() {
        let mock = MockProvider::new();
        let cfg = OrchestratorConfig::default().without_delays();
        let store = ExportStore::new(&mock, &cfg.waits, "eu-central-1");
        store.ensure_vmimport_role("exports", "123456789012").await.unwrap();
        store.ensure_vmimport_role("exports", "123456789012").await.unwrap();
        assert_eq!(mock.role_names(), vec!["vmimport".to_string()]);
        assert_eq!(mock.calls("put_role_policy"), 2);

        let doc = vmimport_policy("exports", "123456789012");
        assert_eq!(doc["Statement"][0]["Resource"][1], "arn:aws:s3:::exports/*");
        assert_eq!(
            doc["Statement"][2]["Resource"],
            "arn:aws:iam::123456789012:role/vmimport"
        );
    }

    #[tokio::test]
    async fn list_download_and_purge() {
        let mock = MockProvider::new();
        mock.seed_object("exports", "exports/ami-1.raw", b"disk-bytes");
        mock.seed_object("exports", "other/notes.txt", b"n");
        let cfg = OrchestratorConfig::default().without_delays();
        let store = ExportStore::new(&mock, &cfg.waits, "eu-central-1");

        let keys = store.list_exports("exports", Some("exports/")).await.unwrap();
        assert_eq!(keys, vec!["exports/ami-1.raw".to_string()]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ami-1.raw");
        let written = store.download("exports", &keys[0], &path).await.unwrap();
        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&path).unwrap(), b"disk-bytes");

        assert!(store
            .download("exports", "missing", &path)
            .await
            .unwrap_err()
            .is_not_found());

        assert_eq!(store.purge("exports").await.unwrap(), 2);
        assert!(mock.bucket_keys("exports").is_empty());
        assert!(store.list_exports("nope", None).await.unwrap_err().is_not_found());
    }
}
