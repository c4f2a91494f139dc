pub mod custom_image;
pub mod error;
pub mod snapshot_tool;

pub use error::BackendError;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::InstanceConfig;
use crate::container::ContainerClient;
use crate::retention::RetentionPolicy;
use custom_image::CustomImageBackend;
use snapshot_tool::SnapshotToolBackend;

/// Result of a successful `Backup` call. `snapshot_id` is only populated by
/// the snapshot-tool variant.
#[derive(Debug, Clone, Default)]
pub struct BackupOutcome {
    pub snapshot_id: Option<String>,
    pub bytes_added: u64,
    pub files_new: u64,
}

/// Executes one repository operation given a staged filesystem tree. Modeled
/// as an enum rather than a trait object: callers never discriminate between
/// variants after construction, and both variants share the same small
/// inherent API.
pub enum Backend {
    SnapshotTool(SnapshotToolBackend),
    CustomImage(CustomImageBackend),
}

impl Backend {
    /// Builds the backend named by `instance`'s `repository`/`customImage`
    /// field. Config validation already guarantees exactly one is set.
    pub fn from_instance(
        instance: &InstanceConfig,
        hostname: &str,
        timeout: Duration,
        container: Arc<dyn ContainerClient>,
    ) -> Self {
        if let Some(repository) = &instance.repository {
            Backend::SnapshotTool(SnapshotToolBackend::new(
                repository.clone(),
                instance.env.clone(),
                timeout,
            ))
        } else {
            let image = instance
                .custom_image
                .clone()
                .expect("validated: repository or customImage set");
            Backend::CustomImage(CustomImageBackend::new(
                image,
                instance.env.clone(),
                instance.id.clone(),
                hostname.to_string(),
                container,
                timeout,
            ))
        }
    }

    /// Best-effort pre-flight; errors are logged, never fatal.
    pub async fn unlock(&self) -> Result<(), BackendError> {
        match self {
            Backend::SnapshotTool(b) => b.unlock().await,
            Backend::CustomImage(b) => b.unlock().await,
        }
    }

    /// Stages a snapshot of everything below `staging_root`.
    pub async fn backup(
        &self,
        staging_root: &Path,
        tags: &[String],
        cancel: CancellationToken,
    ) -> Result<BackupOutcome, BackendError> {
        match self {
            Backend::SnapshotTool(b) => b.backup(staging_root, tags, cancel).await,
            Backend::CustomImage(b) => b.backup(staging_root, tags, cancel).await,
        }
    }

    /// No-op for the custom-image variant; the image owns its own policy.
    pub async fn apply_retention(
        &self,
        policy: RetentionPolicy,
        tags: &[String],
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        match self {
            Backend::SnapshotTool(b) => b.apply_retention(policy, tags, cancel).await,
            Backend::CustomImage(b) => b.apply_retention(policy, tags, cancel).await,
        }
    }
}
