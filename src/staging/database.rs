use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::StagingError;
use crate::container::ContainerClient;
use crate::engine::target::{BackupTarget, DbKind};

/// Stages a database target by exec'ing its dump command inside the
/// container and streaming stdout into a timestamped dump file. Returns the
/// dump file path and the database kind actually used, which may have been
/// auto-detected rather than configured.
pub async fn stage(
    container: &dyn ContainerClient,
    run_root: &Path,
    target: &BackupTarget,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<(PathBuf, DbKind), StagingError> {
    let BackupTarget::Db {
        container_name,
        db_kind,
        dump_args,
        ..
    } = target
    else {
        panic!("stage_db called with a non-db target");
    };

    let summary = container
        .inspect_container(container_name)
        .await
        .map_err(|_| StagingError::DbNotRunning(container_name.clone()))?;
    if !summary.is_running() {
        return Err(StagingError::DbNotRunning(container_name.clone()));
    }

    let kind = match db_kind {
        Some(k) => *k,
        None => DbKind::detect(&summary.image)
            .ok_or_else(|| StagingError::UnknownDbKind(container_name.clone()))?,
    };

    let dest_dir = run_root.join("db").join(container_name);
    tokio::fs::create_dir_all(&dest_dir).await?;
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let dest_path = dest_dir.join(format!("{timestamp}.dump"));

    let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let stdout_buffer = buffer.clone();
    let stdout_sink = Arc::new(move |bytes: &[u8]| {
        stdout_buffer.lock().unwrap().extend_from_slice(bytes);
    });

    let container_name_for_log = container_name.clone();
    let stderr_sink = Arc::new(move |bytes: &[u8]| {
        info!(container = %container_name_for_log, "{}", String::from_utf8_lossy(bytes).trim_end());
    });

    let shell_line = kind.dump_command(dump_args);
    let exit_code = container
        .exec(
            container_name,
            vec![shell_line],
            std::collections::HashMap::new(),
            stdout_sink,
            stderr_sink,
            timeout,
            cancel,
        )
        .await?;

    let collected = Arc::try_unwrap(buffer)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();

    if exit_code != 0 {
        return Err(StagingError::DumpFailed(
            container_name.clone(),
            format!("exit code {exit_code}"),
        ));
    }

    if collected.is_empty() {
        return Err(StagingError::DumpFailed(
            container_name.clone(),
            "0-byte output".to_string(),
        ));
    }

    let mut file = tokio::fs::File::create(&dest_path).await?;
    file.write_all(&collected).await?;
    file.flush().await?;

    Ok((dest_path, kind))
}
