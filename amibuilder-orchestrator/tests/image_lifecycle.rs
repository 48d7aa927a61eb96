// Image deletion and export flows against the in-memory provider.

mod common;

use amibuilder_orchestrator::images::{ExportDestination, ImageManager};
use amibuilder_orchestrator::resources::AccountContext;
use amibuilder_orchestrator::storage::ExportStore;
use amibuilder_orchestrator::BuildError;
use amibuilder_providers::inventory::ImageRecord;
use amibuilder_providers::mock::MockProvider;
use common::fast_config;

fn seeded() -> MockProvider {
    let mock = MockProvider::new();
    mock.seed_image(ImageRecord {
        id: "ami-0123456789abcdef0".to_string(),
        name: Some("index.unikraft.io/org/app".to_string()),
        snapshot_ids: vec!["snap-0a".to_string(), "snap-0b".to_string()],
    });
    mock
}

#[tokio::test]
async fn test_delete_by_name_removes_image_and_snapshots() {
    let mock = seeded();
    let images = ImageManager::new(&mock);
    assert!(images.exists("index.unikraft.io/org/app").await.unwrap());

    let deleted = images.delete("index.unikraft.io/org/app").await.unwrap();
    assert_eq!(deleted.image_id, "ami-0123456789abcdef0");
    assert_eq!(deleted.snapshot_ids, vec!["snap-0a".to_string(), "snap-0b".to_string()]);
    assert!(mock.image_ids().is_empty());
    assert!(mock.snapshot_ids().is_empty());

    // Gone now: a second delete is a NotFound, not a silent success.
    let err = images.delete("index.unikraft.io/org/app").await.unwrap_err();
    assert!(matches!(err, BuildError::NotFound(_)));
}

#[tokio::test]
async fn test_export_to_fresh_bucket() {
    let mock = seeded();
    let cfg = fast_config();
    let account = AccountContext::resolve(&mock, None).await.unwrap();
    let store = ExportStore::new(&mock, &cfg.waits, &account.region);

    store.ensure_bucket("ami-exports").await.unwrap();
    store
        .ensure_vmimport_role("ami-exports", &account.account_id)
        .await
        .unwrap();

    let images = ImageManager::new(&mock);
    let task = images
        .export("ami-0123456789abcdef0", &ExportDestination::new("ami-exports"))
        .await
        .unwrap();
    assert!(task.starts_with("export-ami-"));

    mock.set_export_status(&task, "completed", None);
    let status = images.poll_export_status(&task).await.unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.status_message, None);

    mock.seed_object("ami-exports", &format!("exports/{}.raw", task), b"raw");
    let listed = store.list_exports("ami-exports", Some("exports/")).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_export_without_bucket_fails() {
    let mock = seeded();
    let err = ImageManager::new(&mock)
        .export("ami-0123456789abcdef0", &ExportDestination::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Provider { step: "export image", .. }));
}
