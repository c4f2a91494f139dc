use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::container::ContainerClient;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook exited with status {0}")]
    NonZeroExit(i64),

    #[error("container error: {0}")]
    Container(#[from] crate::container::ContainerError),
}

/// Runs a shell command inside a designated container via `/bin/sh -lc`.
pub struct HookRunner {
    container: Arc<dyn ContainerClient>,
}

impl HookRunner {
    pub fn new(container: Arc<dyn ContainerClient>) -> Self {
        Self { container }
    }

    pub async fn run(
        &self,
        container_id: &str,
        shell_line: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<(), HookError> {
        let line_for_log = shell_line.to_string();
        let stdout_sink = Arc::new(move |bytes: &[u8]| {
            info!(hook = %line_for_log, "{}", String::from_utf8_lossy(bytes).trim_end());
        });
        let line_for_log = shell_line.to_string();
        let stderr_sink = Arc::new(move |bytes: &[u8]| {
            tracing::warn!(hook = %line_for_log, "{}", String::from_utf8_lossy(bytes).trim_end());
        });

        let exit_code = self
            .container
            .exec(
                container_id,
                vec![shell_line.to_string()],
                HashMap::new(),
                stdout_sink,
                stderr_sink,
                timeout,
                cancel,
            )
            .await?;

        if exit_code != 0 {
            return Err(HookError::NonZeroExit(exit_code));
        }
        Ok(())
    }
}
