use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use amibuilder_common::Platform;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One platform-specific entry of an image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    /// Image the descriptor belongs to, e.g. `index.unikraft.io/org/app:latest`.
    pub reference: String,
    pub digest: String,
    pub platform: Platform,
    #[serde(default)]
    pub os_features: Vec<String>,
}

/// Filter for compatible descriptors. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformQuery {
    pub os: Option<String>,
    pub arch: Option<String>,
    /// Features the descriptor must all advertise.
    pub features: Vec<String>,
}

impl PlatformQuery {
    pub fn for_platform(platform: &Platform) -> Self {
        Self {
            os: Some(platform.os.clone()),
            arch: Some(platform.arch.clone()),
            features: Vec::new(),
        }
    }

    pub fn matches(&self, descriptor: &PlatformDescriptor) -> bool {
        if let Some(os) = self.os.as_deref().filter(|s| !s.is_empty()) {
            if os != descriptor.platform.os {
                tracing::trace!(want = os, got = %descriptor.platform.os, "🔎 [platforms] incompatible OS");
                return false;
            }
        }
        if let Some(arch) = self.arch.as_deref().filter(|s| !s.is_empty()) {
            if arch != descriptor.platform.arch {
                tracing::trace!(want = arch, got = %descriptor.platform.arch, "🔎 [platforms] incompatible architecture");
                return false;
            }
        }
        if self.features.len() > descriptor.os_features.len() {
            return false;
        }
        let available: BTreeSet<&str> = descriptor.os_features.iter().map(|s| s.as_str()).collect();
        self.features.iter().all(|f| available.contains(f.as_str()))
    }
}

/// Hex SHA-256 over the reference and the descriptor's platform. Unique per
/// (image, platform) pair so merged results never collide.
pub fn platform_checksum(descriptor: &PlatformDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(descriptor.reference.as_bytes());
    hasher.update(b"\n");
    hasher.update(descriptor.platform.os.as_bytes());
    hasher.update(b"/");
    hasher.update(descriptor.platform.arch.as_bytes());
    for feature in &descriptor.os_features {
        hasher.update(b"\n");
        hasher.update(feature.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Resolve every compatible descriptor concurrently.
///
/// Each lookup runs as its own future and yields an independent result;
/// the caller-side merge keys them by [`platform_checksum`]. Failed
/// lookups are logged and left out.
pub async fn match_descriptors<T, F, Fut>(
    descriptors: &[PlatformDescriptor],
    query: &PlatformQuery,
    resolve: F,
) -> BTreeMap<String, T>
where
    F: Fn(PlatformDescriptor) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let lookups = descriptors
        .iter()
        .filter(|d| query.matches(d))
        .cloned()
        .map(|descriptor| {
            let checksum = platform_checksum(&descriptor);
            let digest = descriptor.digest.clone();
            let lookup = resolve(descriptor);
            async move {
                match lookup.await {
                    Ok(value) => Some((checksum, value)),
                    Err(e) => {
                        tracing::warn!(digest = %digest, error = %e, "⚠️ [platforms] descriptor lookup failed");
                        None
                    }
                }
            }
        });

    join_all(lookups).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(digest: &str, os: &str, arch: &str, features: &[&str]) -> PlatformDescriptor {
        PlatformDescriptor {
            reference: "index.unikraft.io/org/app:latest".to_string(),
            digest: digest.to_string(),
            platform: Platform::new(os, arch),
            os_features: features.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn query_filters() {
        let d = descriptor("sha256:1", "linux", "x86_64", &["virtio", "9pfs"]);
        assert!(PlatformQuery::default().matches(&d));
        assert!(PlatformQuery::for_platform(&Platform::new("linux", "x86_64")).matches(&d));
        assert!(!PlatformQuery::for_platform(&Platform::new("linux", "arm64")).matches(&d));
        let q = PlatformQuery {
            features: vec!["virtio".to_string()],
            ..PlatformQuery::default()
        };
        assert!(q.matches(&d));
        let q = PlatformQuery {
            features: vec!["netdev".to_string()],
            ..PlatformQuery::default()
        };
        assert!(!q.matches(&d));
    }

    #[test]
    fn checksum_is_stable_hex() {
        let a = descriptor("sha256:1", "linux", "x86_64", &[]);
        let b = descriptor("sha256:2", "linux", "arm64", &[]);
        assert_eq!(platform_checksum(&a), platform_checksum(&a.clone()));
        assert_ne!(platform_checksum(&a), platform_checksum(&b));
        assert_eq!(platform_checksum(&a).len(), 64);
    }

    #[tokio::test]
    async fn fan_out_merges_independent_results() {
        let descriptors = vec![
            descriptor("sha256:1", "linux", "x86_64", &[]),
            descriptor("sha256:2", "linux", "arm64", &[]),
            descriptor("sha256:3", "linux", "riscv64", &[]),
            descriptor("sha256:4", "windows", "x86_64", &[]),
        ];
        let query = PlatformQuery {
            os: Some("linux".to_string()),
            ..PlatformQuery::default()
        };
        let merged = match_descriptors(&descriptors, &query, |d| async move {
            if d.platform.arch == "riscv64" {
                anyhow::bail!("manifest unavailable");
            }
            Ok(d.digest)
        })
        .await;

        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.get(&platform_checksum(&descriptors[0])),
            Some(&"sha256:1".to_string())
        );
        assert_eq!(
            merged.get(&platform_checksum(&descriptors[1])),
            Some(&"sha256:2".to_string())
        );
    }
}
