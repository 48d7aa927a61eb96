use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use amibuilder_common::Platform;
use amibuilder_orchestrator::images::{ExportDestination, ImageManager};
use amibuilder_orchestrator::provider_manager::ProviderManager;
use amibuilder_orchestrator::resources::AccountContext;
use amibuilder_orchestrator::storage::ExportStore;
use amibuilder_orchestrator::{BuildError, BuildRequest, BuildRun, OrchestratorConfig};

fn required(key: &str) -> Result<String, BuildError> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BuildError::ProviderUnavailable(format!("{} must be set", key)))
}

/// Local file name for an object key: its last non-empty path segment.
fn default_download_path(key: &str) -> PathBuf {
    PathBuf::from(
        key.rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("export.raw"),
    )
}

async fn run() -> Result<(), BuildError> {
    let config = OrchestratorConfig::from_env()?;
    let provider_name = ProviderManager::current_provider_name();
    let provider = ProviderManager::get_provider(&provider_name, &config).await?;
    let action = env::var("AMIBUILDER_ACTION").unwrap_or_else(|_| "build".to_string());
    println!("🚀 amibuilder-orchestrator: action={} provider={}", action, provider_name);

    match action.trim() {
        "build" => {
            let image = required("AMIBUILDER_IMAGE")?;
            let platform: Platform = required("AMIBUILDER_PLATFORM")?
                .parse()
                .map_err(|e| BuildError::ProviderUnavailable(format!("AMIBUILDER_PLATFORM: {}", e)))?;
            let mut request = BuildRequest::new(&image, platform);
            request.grant_operator = env::var("AMIBUILDER_GRANT_OPERATOR")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);

            let outcome = BuildRun::new(provider, config).execute(&request).await;
            for step in &outcome.teardown.steps {
                println!("   teardown {:<24} {:?}", step.step.as_str(), step.outcome);
            }
            let elapsed = outcome.finished_at - outcome.started_at;
            let image_id = outcome.image_id?;
            println!(
                "✅ run {} produced {} in {}s",
                outcome.run_id,
                image_id,
                elapsed.num_seconds()
            );
        }
        "delete" => {
            let target = required("AMIBUILDER_TARGET")?;
            let deleted = ImageManager::new(provider.as_ref()).delete(&target).await?;
            println!(
                "🗑️ deleted {} and {} snapshot(s)",
                deleted.image_id,
                deleted.snapshot_ids.len()
            );
        }
        "export" => {
            let target = required("AMIBUILDER_TARGET")?;
            let bucket = required("AMIBUILDER_BUCKET")?;
            let account = AccountContext::resolve(provider.as_ref(), config.region.as_deref()).await?;
            let store = ExportStore::new(provider.as_ref(), &config.waits, &account.region);
            store.ensure_bucket(&bucket).await?;
            store.ensure_vmimport_role(&bucket, &account.account_id).await?;
            let task_id = ImageManager::new(provider.as_ref())
                .export(&target, &ExportDestination::new(&bucket))
                .await?;
            println!("📦 export task {}", task_id);
        }
        "export-status" => {
            let task_id = required("AMIBUILDER_TARGET")?;
            let status = ImageManager::new(provider.as_ref())
                .poll_export_status(&task_id)
                .await?;
            match status.status_message {
                Some(msg) => println!("{}: {} ({})", status.task_id, status.status, msg),
                None => println!("{}: {}", status.task_id, status.status),
            }
        }
        "download" => {
            let bucket = required("AMIBUILDER_BUCKET")?;
            let key = required("AMIBUILDER_TARGET")?;
            let path = env::var("AMIBUILDER_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_download_path(&key));
            let account = AccountContext::resolve(provider.as_ref(), config.region.as_deref()).await?;
            let bytes = ExportStore::new(provider.as_ref(), &config.waits, &account.region)
                .download(&bucket, &key, &path)
                .await?;
            println!("⬇️ {} bytes written to {}", bytes, path.display());
        }
        other => {
            return Err(BuildError::ProviderUnavailable(format!(
                "unknown AMIBUILDER_ACTION '{}'",
                other
            )))
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_path_from_key() {
        assert_eq!(default_download_path("exports/export-ami-1.raw"), PathBuf::from("export-ami-1.raw"));
        assert_eq!(default_download_path("exports/run-1/"), PathBuf::from("run-1"));
        assert_eq!(default_download_path("/"), PathBuf::from("export.raw"));
    }
}
