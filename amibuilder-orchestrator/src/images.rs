use amibuilder_providers::inventory::{ExportRequest, ExportTaskStatus, ImageRecord};
use amibuilder_providers::{is_not_found, CloudProvider};
use serde_json::json;

use crate::error::BuildError;
use crate::logger::ActionTimer;

const IMAGE_ID_PREFIX: &str = "ami-";

/// Where an image export lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDestination {
    pub bucket: String,
    pub prefix: Option<String>,
    pub disk_format: String,
}

impl ExportDestination {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            prefix: Some("exports/".to_string()),
            disk_format: "RAW".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedImage {
    pub image_id: String,
    pub snapshot_ids: Vec<String>,
}

/// Lookup, removal and export of produced images.
pub struct ImageManager<'a> {
    provider: &'a dyn CloudProvider,
}

impl<'a> ImageManager<'a> {
    pub fn new(provider: &'a dyn CloudProvider) -> Self {
        Self { provider }
    }

    /// Resolve an image id or name. A name matching several images is an
    /// error rather than a silent first pick. A failed id lookup (for
    /// instance a malformed id) falls through to the name lookup.
    pub async fn resolve(&self, id_or_name: &str) -> Result<ImageRecord, BuildError> {
        let reference = id_or_name.trim();
        if reference.starts_with(IMAGE_ID_PREFIX) {
            match self.provider.describe_image(reference).await {
                Ok(Some(image)) => return Ok(image),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(reference, error = %e, "🔎 [images] id lookup failed, trying as a name");
                }
            }
        }

        let mut matches = self
            .provider
            .find_images_by_name(reference)
            .await
            .map_err(|e| BuildError::provider("find images by name", e))?;
        match matches.len() {
            0 => Err(BuildError::NotFound(format!("image {}", reference))),
            1 => Ok(matches.remove(0)),
            _ => Err(BuildError::AmbiguousMatch {
                name: reference.to_string(),
                ids: matches.into_iter().map(|i| i.id).collect(),
            }),
        }
    }

    /// True if the reference names an existing image (ambiguous names count).
    pub async fn exists(&self, id_or_name: &str) -> Result<bool, BuildError> {
        match self.resolve(id_or_name).await {
            Ok(_) => Ok(true),
            Err(BuildError::NotFound(_)) => Ok(false),
            Err(BuildError::AmbiguousMatch { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Deregister the image and return the snapshots it referenced. The
    /// snapshots are collected first since deregistration leaves them behind.
    pub async fn deregister(&self, id_or_name: &str) -> Result<Vec<String>, BuildError> {
        let image = self.resolve(id_or_name).await?;
        self.deregister_record(image).await
    }

    async fn deregister_record(&self, image: ImageRecord) -> Result<Vec<String>, BuildError> {
        let timer = ActionTimer::start(
            "IMAGE_DEREGISTER",
            &image.id,
            Some(json!({ "name": image.name, "snapshots": image.snapshot_ids })),
        );
        timer
            .finish(self.provider.deregister_image(&image.id).await)
            .map_err(|e| {
                if is_not_found(&e) {
                    BuildError::NotFound(format!("image {}", image.id))
                } else {
                    BuildError::provider("deregister image", e)
                }
            })?;
        tracing::info!(image_id = %image.id, snapshots = image.snapshot_ids.len(), "🗑️ [images] image deregistered");
        Ok(image.snapshot_ids)
    }

    /// Delete every snapshot, continuing past failures. Snapshots that are
    /// already gone count as deleted. On failure the error lists the
    /// snapshots left, to be passed back here once the cause is fixed.
    pub async fn delete_snapshots(&self, snapshot_ids: &[String]) -> Result<(), BuildError> {
        let mut remaining = Vec::new();
        let mut last_error = None;
        for snapshot_id in snapshot_ids {
            match self.provider.delete_snapshot(snapshot_id).await {
                Ok(()) => {
                    tracing::info!(snapshot_id = %snapshot_id, "🗑️ [images] snapshot deleted");
                }
                Err(e) if is_not_found(&e) => {
                    tracing::info!(snapshot_id = %snapshot_id, "👻 [images] snapshot already gone");
                }
                Err(e) => {
                    tracing::warn!(snapshot_id = %snapshot_id, error = %e, "⚠️ [images] snapshot not deleted");
                    remaining.push(snapshot_id.clone());
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            None => Ok(()),
            Some(source) => Err(BuildError::SnapshotsLeft { remaining, source }),
        }
    }

    pub async fn delete(&self, id_or_name: &str) -> Result<DeletedImage, BuildError> {
        let image = self.resolve(id_or_name).await?;
        let image_id = image.id.clone();
        let snapshot_ids = self.deregister_record(image).await?;
        self.delete_snapshots(&snapshot_ids).await?;
        Ok(DeletedImage {
            image_id,
            snapshot_ids,
        })
    }

    /// Start exporting an image to object storage. Returns the task id; the
    /// caller polls with [`ImageManager::poll_export_status`].
    pub async fn export(
        &self,
        id_or_name: &str,
        destination: &ExportDestination,
    ) -> Result<String, BuildError> {
        let image = self.resolve(id_or_name).await?;
        let request = ExportRequest {
            image_id: image.id.clone(),
            bucket: destination.bucket.clone(),
            prefix: destination.prefix.clone(),
            disk_format: destination.disk_format.clone(),
        };
        let timer = ActionTimer::start(
            "IMAGE_EXPORT",
            &image.id,
            Some(json!({ "bucket": request.bucket, "format": request.disk_format })),
        );
        let task_id = timer
            .finish(self.provider.export_image(&request).await)
            .map_err(|e| BuildError::provider("export image", e))?;
        tracing::info!(image_id = %image.id, task_id = %task_id, "📦 [images] export started");
        Ok(task_id)
    }

    /// Single status read of an export task; no provider-side effects.
    pub async fn poll_export_status(&self, task_id: &str) -> Result<ExportTaskStatus, BuildError> {
        self.provider
            .describe_export_task(task_id)
            .await
            .map_err(|e| BuildError::provider("describe export task", e))?
            .ok_or_else(|| BuildError::NotFound(format!("export task {}", task_id)))
    }
}
