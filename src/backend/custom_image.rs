use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::BackendError;
use super::BackupOutcome;
use crate::container::{BindMount, ContainerClient, EphemeralSpec};
use crate::retention::RetentionPolicy;

/// Runs a user-supplied container image against the staged tree, bind-mounted
/// read-only at `/backup`. The image owns its own retention policy;
/// `apply_retention` is a no-op here.
pub struct CustomImageBackend {
    image: String,
    env: HashMap<String, String>,
    instance_id: String,
    hostname: String,
    container: Arc<dyn ContainerClient>,
    timeout: Duration,
}

impl CustomImageBackend {
    pub fn new(
        image: String,
        env: HashMap<String, String>,
        instance_id: String,
        hostname: String,
        container: Arc<dyn ContainerClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            image,
            env,
            instance_id,
            hostname,
            container,
            timeout,
        }
    }

    /// No pre-flight concept for an arbitrary image; always succeeds.
    pub async fn unlock(&self) -> Result<(), BackendError> {
        Ok(())
    }

    pub async fn backup(
        &self,
        staging_root: &Path,
        tags: &[String],
        cancel: CancellationToken,
    ) -> Result<BackupOutcome, BackendError> {
        let mut env = self.env.clone();
        env.insert("MARINA_INSTANCE_ID".to_string(), self.instance_id.clone());
        env.insert("MARINA_HOSTNAME".to_string(), self.hostname.clone());
        env.insert("MARINA_TAGS".to_string(), tags.join(","));

        let spec = EphemeralSpec {
            image: self.image.clone(),
            binds: vec![BindMount {
                host_path: staging_root.display().to_string(),
                container_path: "/backup".to_string(),
                read_only: true,
            }],
            env,
            cmd: Vec::new(),
        };

        let instance_id = self.instance_id.clone();
        let stdout_sink = Arc::new(move |bytes: &[u8]| {
            info!(instance_id = %instance_id, "{}", String::from_utf8_lossy(bytes).trim_end());
        });
        let instance_id = self.instance_id.clone();
        let stderr_sink = Arc::new(move |bytes: &[u8]| {
            tracing::error!(instance_id = %instance_id, "{}", String::from_utf8_lossy(bytes).trim_end());
        });

        let exit_code = self
            .container
            .run_ephemeral(spec, stdout_sink, stderr_sink, self.timeout, cancel)
            .await?;

        if exit_code != 0 {
            return Err(BackendError::NonZeroExit {
                tool: self.image.clone(),
                code: exit_code as i32,
                stderr: String::new(),
            });
        }

        Ok(BackupOutcome {
            snapshot_id: None,
            bytes_added: 0,
            files_new: 0,
        })
    }

    pub async fn apply_retention(
        &self,
        _policy: RetentionPolicy,
        _tags: &[String],
        _cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        warn!(
            image = %self.image,
            "retention is a no-op for custom-image backends; the image owns its own policy"
        );
        Ok(())
    }
}
