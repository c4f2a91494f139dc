use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error::StagingError;
use crate::container::ContainerClient;
use crate::engine::target::BackupTarget;

/// Grace period given to a container before Marina would force-kill it.
/// Matches the spec's "10s container timeout" for volume-attached stops.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct VolumeStageOutcome {
    /// Containers that staging stopped, sorted by id — callers must restart
    /// exactly this set on every exit path. The first id (lexicographically
    /// smallest) is also the deterministic hook-execution target.
    pub stopped_containers: Vec<String>,
}

/// Discovers every container with a read-write mount of `volume_name`,
/// sorted by container id for determinism.
pub async fn attached_containers(
    container: &dyn ContainerClient,
    volume_name: &str,
) -> Result<Vec<String>, StagingError> {
    let containers = container.list_containers().await?;
    let mut ids: Vec<String> = containers
        .into_iter()
        .filter(|c| {
            c.mounts.iter().any(|m| {
                m.mount_type == "volume"
                    && m.name.as_deref() == Some(volume_name)
                    && !m.read_only
            })
        })
        .map(|c| c.id)
        .collect();
    ids.sort();
    Ok(ids)
}

/// Stages a volume target: optionally stops attached containers, copies the
/// configured paths into the run root, and validates the result.
pub async fn stage(
    container: &dyn ContainerClient,
    run_root: &Path,
    target: &BackupTarget,
    cancel: CancellationToken,
) -> Result<VolumeStageOutcome, StagingError> {
    let BackupTarget::Volume {
        volume_name,
        paths,
        stop_attached,
        ..
    } = target
    else {
        panic!("stage_volume called with a non-volume target");
    };

    let host_path = container
        .volume_host_path(volume_name)
        .await
        .map_err(|_| StagingError::MissingVolume(volume_name.clone()))?;
    let host_path = PathBuf::from(host_path);

    let mut outcome = VolumeStageOutcome::default();

    if *stop_attached {
        let ids = attached_containers(container, volume_name).await?;
        for id in &ids {
            container
                .stop(id, STOP_TIMEOUT, cancel.clone())
                .await?;
            outcome.stopped_containers.push(id.clone());
        }
    }

    let dest_root = run_root.join("volume").join(volume_name);
    let mut any_path_staged = false;

    for rel_path in paths {
        let rel = rel_path.trim_start_matches('/');
        let source = if rel.is_empty() {
            host_path.clone()
        } else {
            host_path.join(rel)
        };

        if !source.exists() {
            warn!(volume = %volume_name, path = %rel_path, "configured path missing on volume, skipping");
            continue;
        }

        let dest = if rel.is_empty() {
            dest_root.clone()
        } else {
            dest_root.join(rel)
        };
        tokio::fs::create_dir_all(&dest).await?;
        copy_tree(&source, &dest).await?;
        any_path_staged = true;
    }

    if !any_path_staged {
        return Err(StagingError::AllPathsMissing(volume_name.clone()));
    }

    validate_non_empty(&dest_root, volume_name).await?;

    Ok(outcome)
}

/// Recursively copies `source` into `dest`, preserving symlinks as symlinks.
/// Both are directories (or `source` a single file rooted at `dest`).
fn copy_tree<'a>(
    source: &'a Path,
    dest: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let metadata = tokio::fs::symlink_metadata(source).await?;

        if metadata.is_symlink() {
            let link_target = tokio::fs::read_link(source).await?;
            #[cfg(unix)]
            tokio::fs::symlink(&link_target, dest).await?;
            #[cfg(not(unix))]
            let _ = link_target;
            return Ok(());
        }

        if metadata.is_dir() {
            tokio::fs::create_dir_all(dest).await?;
            let mut entries = tokio::fs::read_dir(source).await?;
            while let Some(entry) = entries.next_entry().await? {
                let child_source = entry.path();
                let child_dest = dest.join(entry.file_name());
                copy_tree(&child_source, &child_dest).await?;
            }
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, dest).await?;
        Ok(())
    })
}

/// Fails if every regular file under `root` is zero bytes. Zero-byte files
/// mixed with non-empty ones are fine.
async fn validate_non_empty(root: &Path, volume_name: &str) -> Result<(), StagingError> {
    let mut stack = vec![root.to_path_buf()];
    let mut saw_any_file = false;
    let mut saw_non_empty = false;

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else if metadata.is_file() {
                saw_any_file = true;
                if metadata.len() > 0 {
                    saw_non_empty = true;
                }
            }
        }
    }

    if saw_any_file && !saw_non_empty {
        return Err(StagingError::EmptyBackup(volume_name.to_string()));
    }

    Ok(())
}
