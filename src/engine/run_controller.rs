use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::container::ContainerClient;
use crate::engine::target::BackupTarget;
use crate::hooks::HookRunner;
use crate::retention::RetentionPolicy;
use crate::staging::{database, volume, StagingError};
use crate::store::{JobState, LogEntry, LogLevel, StatusLogStore};

/// Grace period given to a hook command inside a container.
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Pending,
    Running,
}

struct TargetOutcome {
    target_id: String,
    tag: Option<String>,
    success: bool,
    error: Option<String>,
}

/// Owns the run lifecycle for a single backup instance: `Idle -> Pending ->
/// Running -> Idle`. Fires arrive one at a time over `fire_rx`, which has
/// capacity 1; a fire that arrives while this controller is already
/// `Running` simply sits buffered in that channel (the scheduler coalesces
/// anything beyond that single slot with a WARN), so the loop re-entering
/// `recv()` immediately after finishing a run is exactly the spec's
/// "pendingRerun -> re-enter Pending" transition, with no separate flag
/// needed.
pub struct RunController {
    instance_id: String,
    targets: Vec<BackupTarget>,
    backend: Backend,
    container: Arc<dyn ContainerClient>,
    hooks: HookRunner,
    store: Arc<StatusLogStore>,
    staging_root: PathBuf,
    retention: RetentionPolicy,
    backend_timeout: Duration,
    phase: RwLock<RunPhase>,
}

impl RunController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance_id: String,
        targets: Vec<BackupTarget>,
        backend: Backend,
        container: Arc<dyn ContainerClient>,
        store: Arc<StatusLogStore>,
        staging_root: PathBuf,
        retention: RetentionPolicy,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            instance_id,
            targets,
            backend,
            hooks: HookRunner::new(container.clone()),
            container,
            store,
            staging_root,
            retention,
            backend_timeout,
            phase: RwLock::new(RunPhase::Idle),
        }
    }

    pub async fn phase(&self) -> RunPhase {
        *self.phase.read().await
    }

    /// Drives this controller's lifecycle for as long as fires arrive.
    /// Returns once `fire_rx` closes (on `Scheduler::unregister`/shutdown).
    pub fn spawn(
        self: Arc<Self>,
        mut fire_rx: mpsc::Receiver<()>,
        semaphore: Arc<Semaphore>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                *self.phase.write().await = RunPhase::Idle;

                let fire = tokio::select! {
                    f = fire_rx.recv() => f,
                    _ = shutdown.cancelled() => None,
                };
                if fire.is_none() {
                    return;
                }
                if shutdown.is_cancelled() {
                    return;
                }

                *self.phase.write().await = RunPhase::Pending;
                let permit = tokio::select! {
                    p = semaphore.clone().acquire_owned() => p,
                    _ = shutdown.cancelled() => return,
                };
                let Ok(permit) = permit else { return };

                *self.phase.write().await = RunPhase::Running;
                self.run_once(shutdown.clone()).await;
                drop(permit);
            }
        })
    }

    async fn run_once(&self, shutdown: CancellationToken) {
        let status = match self.store.begin_job(&self.instance_id).await {
            Ok(s) => s,
            Err(err) => {
                error!(instance = %self.instance_id, error = %err, "could not begin job");
                return;
            }
        };

        info!(
            instance = %self.instance_id,
            global_id = status.global_id,
            local_id = status.instance_local_id,
            "job started"
        );

        let run_root = self
            .staging_root
            .join(&self.instance_id)
            .join(status.instance_local_id.to_string());

        if let Err(err) = tokio::fs::create_dir_all(&run_root).await {
            let message = format!("failed to create staging root: {err}");
            error!(instance = %self.instance_id, error = %message, "job setup failed");
            let _ = self
                .store
                .finish_job(&self.instance_id, status.global_id, 0, self.targets.len() as u32, Some(message))
                .await;
            return;
        }

        if let Err(err) = self.backend.unlock().await {
            debug!(instance = %self.instance_id, error = %err, "backend unlock failed, ignoring");
        }

        let mut successful = 0u32;
        let mut tags: Vec<String> = Vec::new();
        let mut first_error: Option<String> = None;

        for target in &self.targets {
            if shutdown.is_cancelled() {
                break;
            }

            let outcome = self.process_target(&run_root, target, shutdown.clone()).await;
            self.log_target_outcome(&status, &outcome);

            if outcome.success {
                successful += 1;
                if let Some(tag) = outcome.tag {
                    tags.push(tag);
                }
            } else if first_error.is_none() {
                first_error = outcome.error;
            }
        }

        let total = self.targets.len() as u32;

        if !shutdown.is_cancelled() && successful > 0 {
            match self.backend.backup(&run_root, &tags, shutdown.clone()).await {
                Ok(_outcome) => {
                    if let Err(err) = self
                        .backend
                        .apply_retention(self.retention, &tags, shutdown.clone())
                        .await
                    {
                        warn!(instance = %self.instance_id, error = %err, "retention application failed, backup remains successful");
                    }
                }
                Err(err) => {
                    error!(instance = %self.instance_id, error = %err, "backend backup call failed");
                    first_error.get_or_insert_with(|| err.to_string());
                    successful = 0;
                }
            }
        }

        if shutdown.is_cancelled() {
            let reason = first_error
                .clone()
                .unwrap_or_else(|| "aborted by shutdown".to_string());
            let _ = self.store.abort_job(&self.instance_id, status.global_id, reason).await;
            self.store.append_log(log_entry(
                LogLevel::Warn,
                "job aborted by shutdown",
                Some(self.instance_id.clone()),
                Some(status.global_id),
                Some(status.instance_local_id),
            ));
        } else {
            let state = JobState::from_counts(successful, total);
            let level = match state {
                JobState::Success => LogLevel::Info,
                JobState::PartialSuccess => LogLevel::Warn,
                _ => LogLevel::Error,
            };
            let _ = self
                .store
                .finish_job(&self.instance_id, status.global_id, successful, total, first_error.clone())
                .await;
            self.store.append_log(log_entry(
                level,
                &format!("job finished: {successful}/{total} targets succeeded"),
                Some(self.instance_id.clone()),
                Some(status.global_id),
                Some(status.instance_local_id),
            ));
        }

        if let Err(err) = tokio::fs::remove_dir_all(&run_root).await {
            warn!(instance = %self.instance_id, path = %run_root.display(), error = %err, "failed to remove staging root");
        }
    }

    /// Pre-hook, then staging (skipped if the pre-hook failed), then the
    /// post-hook, always, regardless of whether the pre-hook or staging
    /// succeeded — it runs on every exit path. Any container this target
    /// stopped is always restarted before returning, even on failure or
    /// cancellation, per the LIFO deferred-cleanup pattern.
    async fn process_target(
        &self,
        run_root: &Path,
        target: &BackupTarget,
        cancel: CancellationToken,
    ) -> TargetOutcome {
        let target_id = target.id();
        let mut stopped_containers: Vec<String> = Vec::new();
        let mut error: Option<String> = None;
        let mut tag = None;
        let mut success = false;

        let pre_ok = match target.pre_hook() {
            Some(hook) => match self.run_hook(target, hook).await {
                Ok(()) => true,
                Err(err) => {
                    error = Some(format!("pre-hook failed: {err}"));
                    false
                }
            },
            None => true,
        };

        if pre_ok {
            match target {
                BackupTarget::Volume { volume_name, .. } => {
                    match volume::stage(self.container.as_ref(), run_root, target, cancel.clone()).await {
                        Ok(outcome) => {
                            stopped_containers = outcome.stopped_containers;
                            tag = Some(format!("volume:{volume_name}"));
                            success = true;
                        }
                        Err(err) => error = Some(err.to_string()),
                    }
                }
                BackupTarget::Db { .. } => {
                    match database::stage(self.container.as_ref(), run_root, target, self.backend_timeout, cancel.clone())
                        .await
                    {
                        Ok((_path, kind)) => {
                            tag = Some(format!("db:{}", kind.as_str()));
                            success = true;
                        }
                        Err(err) => error = Some(err.to_string()),
                    }
                }
            }
        }

        if let Some(hook) = target.post_hook() {
            if let Err(err) = self.run_hook(target, hook).await {
                warn!(target = %target_id, error = %err, "post-hook failed, not fatal");
            }
        }

        for id in &stopped_containers {
            if let Err(err) = self.container.start(id, cancel.clone()).await {
                error!(container = %id, error = %err, "failed to restart container stopped for backup");
            }
        }

        TargetOutcome {
            target_id,
            tag,
            success,
            error,
        }
    }

    /// Resolves the hook execution target (spec's "first attached
    /// container" for volumes is the lexicographically smallest id) and runs
    /// the given shell line inside it. A volume with no attached container is
    /// not an error: the hook is skipped with an INFO log.
    async fn run_hook(&self, target: &BackupTarget, shell_line: &str) -> Result<(), StagingError> {
        let container_id = match target {
            BackupTarget::Db { container_name, .. } => container_name.clone(),
            BackupTarget::Volume { volume_name, .. } => {
                let ids = volume::attached_containers(self.container.as_ref(), volume_name).await?;
                match ids.into_iter().next() {
                    Some(id) => id,
                    None => {
                        info!(volume = %volume_name, "no containers attached, skipping hook");
                        return Ok(());
                    }
                }
            }
        };

        self.hooks
            .run(&container_id, shell_line, HOOK_TIMEOUT, CancellationToken::new())
            .await
            .map_err(|err| StagingError::DumpFailed(container_id, err.to_string()))
    }

    fn log_target_outcome(&self, status: &crate::store::JobStatus, outcome: &TargetOutcome) {
        if outcome.success {
            self.store.append_log(LogEntry {
                id: 0,
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: format!("target {} staged successfully", outcome.target_id),
                instance_id: Some(self.instance_id.clone()),
                target_id: Some(outcome.target_id.clone()),
                job_global_id: Some(status.global_id),
                job_local_id: Some(status.instance_local_id),
            });
        } else {
            self.store.append_log(LogEntry {
                id: 0,
                timestamp: Utc::now(),
                level: LogLevel::Error,
                message: format!(
                    "target {} failed: {}",
                    outcome.target_id,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
                instance_id: Some(self.instance_id.clone()),
                target_id: Some(outcome.target_id.clone()),
                job_global_id: Some(status.global_id),
                job_local_id: Some(status.instance_local_id),
            });
        }
    }
}

fn log_entry(
    level: LogLevel,
    message: &str,
    instance_id: Option<String>,
    job_global_id: Option<u64>,
    job_local_id: Option<u64>,
) -> LogEntry {
    LogEntry {
        id: 0,
        timestamp: Utc::now(),
        level,
        message: message.to_string(),
        instance_id,
        target_id: None,
        job_global_id,
        job_local_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::backend::custom_image::CustomImageBackend;
    use crate::container::{ContainerError, ContainerSummary, EphemeralSpec, MountInfo, OutputSink, VolumeSummary};

    /// In-memory `ContainerClient` double. Covers volumes, a registry of
    /// fake containers (for DB inspection and volume-attachment lookups),
    /// scripted `exec` output/failure, a scripted `run_ephemeral` exit code,
    /// and call-tracking on `stop`/`start` so tests can assert restart
    /// behavior.
    struct FakeContainerClient {
        volumes: HashMap<String, String>,
        containers: HashMap<String, ContainerSummary>,
        exec_output: Vec<u8>,
        exec_fail_contains: Option<String>,
        exec_calls: StdMutex<Vec<String>>,
        ephemeral_delay: Duration,
        ephemeral_exit_code: i64,
        ephemeral_calls: StdMutex<Vec<EphemeralSpec>>,
        stop_calls: StdMutex<Vec<String>>,
        start_calls: StdMutex<Vec<String>>,
    }

    impl FakeContainerClient {
        fn new() -> Self {
            Self {
                volumes: HashMap::new(),
                containers: HashMap::new(),
                exec_output: Vec::new(),
                exec_fail_contains: None,
                exec_calls: StdMutex::new(Vec::new()),
                ephemeral_delay: Duration::ZERO,
                ephemeral_exit_code: 0,
                ephemeral_calls: StdMutex::new(Vec::new()),
                stop_calls: StdMutex::new(Vec::new()),
                start_calls: StdMutex::new(Vec::new()),
            }
        }

        fn with_volume(mut self, name: &str, host_path: &str) -> Self {
            self.volumes.insert(name.to_string(), host_path.to_string());
            self
        }

        fn with_container(mut self, summary: ContainerSummary) -> Self {
            self.containers.insert(summary.id.clone(), summary);
            self
        }

        fn with_exec_output(mut self, bytes: &[u8]) -> Self {
            self.exec_output = bytes.to_vec();
            self
        }

        fn with_exec_fail_contains(mut self, needle: &str) -> Self {
            self.exec_fail_contains = Some(needle.to_string());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.ephemeral_delay = delay;
            self
        }

        fn with_ephemeral_exit_code(mut self, code: i64) -> Self {
            self.ephemeral_exit_code = code;
            self
        }
    }

    #[async_trait]
    impl ContainerClient for FakeContainerClient {
        async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ContainerError> {
            Ok(self.containers.values().cloned().collect())
        }

        async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, ContainerError> {
            Ok(self
                .volumes
                .iter()
                .map(|(name, mountpoint)| VolumeSummary {
                    name: name.clone(),
                    mountpoint: mountpoint.clone(),
                    labels: HashMap::new(),
                })
                .collect())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerSummary, ContainerError> {
            self.containers
                .get(id)
                .cloned()
                .ok_or_else(|| ContainerError::ContainerNotFound(id.to_string()))
        }

        async fn stop(&self, id: &str, _timeout: Duration, _cancel: CancellationToken) -> Result<(), ContainerError> {
            self.stop_calls.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn start(&self, id: &str, _cancel: CancellationToken) -> Result<(), ContainerError> {
            self.start_calls.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn exec(
            &self,
            _id: &str,
            argv: Vec<String>,
            _env: HashMap<String, String>,
            stdout: OutputSink,
            _stderr: OutputSink,
            _timeout: Duration,
            _cancel: CancellationToken,
        ) -> Result<i64, ContainerError> {
            let line = argv.join(" ");
            self.exec_calls.lock().unwrap().push(line.clone());
            if !self.exec_output.is_empty() {
                stdout(&self.exec_output);
            }
            if self
                .exec_fail_contains
                .as_deref()
                .is_some_and(|needle| line.contains(needle))
            {
                return Ok(1);
            }
            Ok(0)
        }

        async fn run_ephemeral(
            &self,
            spec: EphemeralSpec,
            stdout: OutputSink,
            _stderr: OutputSink,
            _timeout: Duration,
            _cancel: CancellationToken,
        ) -> Result<i64, ContainerError> {
            if !self.ephemeral_delay.is_zero() {
                tokio::time::sleep(self.ephemeral_delay).await;
            }
            stdout(b"backup ok");
            self.ephemeral_calls.lock().unwrap().push(spec);
            Ok(self.ephemeral_exit_code)
        }

        async fn volume_host_path(&self, name: &str) -> Result<String, ContainerError> {
            self.volumes
                .get(name)
                .cloned()
                .ok_or_else(|| ContainerError::VolumeNotFound(name.to_string()))
        }
    }

    fn volume_target() -> BackupTarget {
        BackupTarget::Volume {
            volume_name: "data".to_string(),
            paths: vec!["/".to_string()],
            stop_attached: false,
            pre_hook: None,
            post_hook: None,
        }
    }

    fn db_target(container_name: &str) -> BackupTarget {
        BackupTarget::Db {
            container_name: container_name.to_string(),
            db_kind: None,
            dump_args: vec![],
            pre_hook: None,
            post_hook: None,
        }
    }

    async fn make_controller(
        container: Arc<FakeContainerClient>,
        targets: Vec<BackupTarget>,
        staging_root: PathBuf,
        store_path: PathBuf,
    ) -> (Arc<RunController>, Arc<StatusLogStore>) {
        let store = Arc::new(StatusLogStore::open(store_path).await.unwrap());
        let backend = Backend::CustomImage(CustomImageBackend::new(
            "test-image".to_string(),
            HashMap::new(),
            "nightly".to_string(),
            "test-host".to_string(),
            container.clone(),
            Duration::from_secs(5),
        ));
        let controller = Arc::new(RunController::new(
            "nightly".to_string(),
            targets,
            backend,
            container,
            store.clone(),
            staging_root,
            RetentionPolicy::default(),
            Duration::from_secs(5),
        ));
        (controller, store)
    }

    #[tokio::test]
    async fn happy_volume_run_reaches_success_and_cleans_up_staging_root() {
        let volume_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(volume_dir.path().join("file.txt"), b"hello")
            .await
            .unwrap();

        let staging_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let container = Arc::new(
            FakeContainerClient::new().with_volume("data", volume_dir.path().to_str().unwrap()),
        );

        let (controller, store) = make_controller(
            container.clone(),
            vec![volume_target()],
            staging_dir.path().to_path_buf(),
            store_dir.path().join("store.json"),
        )
        .await;

        controller.run_once(CancellationToken::new()).await;

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::Success);
        assert_eq!(status.last_targets_successful, 1);
        assert_eq!(status.last_targets_total, 1);
        assert!(!status.is_active);

        let run_root = staging_dir.path().join("nightly").join("1");
        assert!(!run_root.exists(), "staging root must be removed after the run");

        assert_eq!(container.ephemeral_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_volume_marks_job_failed_without_invoking_backend() {
        let staging_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        // no volumes registered at all
        let container = Arc::new(FakeContainerClient::new().with_volume("other", "/nowhere"));

        let (controller, store) = make_controller(
            container.clone(),
            vec![volume_target()],
            staging_dir.path().to_path_buf(),
            store_dir.path().join("store.json"),
        )
        .await;

        controller.run_once(CancellationToken::new()).await;

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.last_targets_successful, 0);
        assert!(status.last_error.is_some());
        assert_eq!(container.ephemeral_calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn a_fire_received_while_running_starts_a_second_run_immediately() {
        let volume_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(volume_dir.path().join("file.txt"), b"hello")
            .await
            .unwrap();

        let staging_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let container = Arc::new(
            FakeContainerClient::new()
                .with_volume("data", volume_dir.path().to_str().unwrap())
                .with_delay(Duration::from_millis(150)),
        );

        let (controller, store) = make_controller(
            container,
            vec![volume_target()],
            staging_dir.path().to_path_buf(),
            store_dir.path().join("store.json"),
        )
        .await;

        let (fire_tx, fire_rx) = mpsc::channel(1);
        let semaphore = Arc::new(Semaphore::new(4));
        let shutdown = CancellationToken::new();

        let handle = controller.clone().spawn(fire_rx, semaphore, shutdown.clone());

        fire_tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.phase().await, RunPhase::Running);

        // buffered: the controller is mid-run and hasn't called recv() again
        fire_tx.try_send(()).unwrap();
        // the channel's single buffer slot is already occupied, so a third
        // fire arriving in the same window is coalesced, not queued
        assert!(fire_tx.try_send(()).is_err(), "a third fire must not queue beyond the single buffered slot");

        tokio::time::sleep(Duration::from_millis(500)).await;

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(
            status.instance_local_id, 2,
            "three fires in the same window must still yield exactly two runs"
        );

        drop(fire_tx);
        handle.abort();
    }

    #[tokio::test]
    async fn happy_db_dump_reaches_success() {
        let staging_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let container = Arc::new(
            FakeContainerClient::new()
                .with_container(ContainerSummary {
                    id: "pg-it".to_string(),
                    name: "pg-it".to_string(),
                    image: "postgres:16-alpine".to_string(),
                    labels: HashMap::new(),
                    state: "running".to_string(),
                    mounts: vec![],
                    env: vec![],
                })
                .with_exec_output(b"-- pg_dumpall output --"),
        );

        let (controller, store) = make_controller(
            container.clone(),
            vec![db_target("pg-it")],
            staging_dir.path().to_path_buf(),
            store_dir.path().join("store.json"),
        )
        .await;

        controller.run_once(CancellationToken::new()).await;

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::Success);
        assert_eq!(status.last_targets_successful, 1);
        assert_eq!(container.ephemeral_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_volume_fails_validation_without_invoking_backend() {
        let volume_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(volume_dir.path().join("empty.txt"), b"")
            .await
            .unwrap();

        let staging_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let container = Arc::new(
            FakeContainerClient::new().with_volume("data", volume_dir.path().to_str().unwrap()),
        );

        let (controller, store) = make_controller(
            container.clone(),
            vec![volume_target()],
            staging_dir.path().to_path_buf(),
            store_dir.path().join("store.json"),
        )
        .await;

        controller.run_once(CancellationToken::new()).await;

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.last_targets_successful, 0);
        assert_eq!(
            container.ephemeral_calls.lock().unwrap().len(),
            0,
            "backend must not be invoked when staging fails validation"
        );

        // log entries are flushed to the store on a background interval
        tokio::time::sleep(Duration::from_millis(250)).await;
        let logs = store.query_logs(Some(status.global_id), 20).await;
        let joined: String = logs
            .iter()
            .map(|entry| entry.message.clone())
            .collect::<Vec<_>>()
            .join(" | ");
        assert!(joined.contains("validation failed"), "log must mention validation failed: {joined}");
        assert!(joined.contains("0 bytes"), "log must mention 0 bytes: {joined}");
    }

    #[tokio::test]
    async fn backend_crash_still_restarts_stopped_containers() {
        let volume_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(volume_dir.path().join("file.txt"), b"hello")
            .await
            .unwrap();

        let staging_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let container = Arc::new(
            FakeContainerClient::new()
                .with_volume("data", volume_dir.path().to_str().unwrap())
                .with_container(ContainerSummary {
                    id: "app1".to_string(),
                    name: "app1".to_string(),
                    image: "myapp:latest".to_string(),
                    labels: HashMap::new(),
                    state: "running".to_string(),
                    mounts: vec![MountInfo {
                        mount_type: "volume".to_string(),
                        name: Some("data".to_string()),
                        destination: "/data".to_string(),
                        read_only: false,
                    }],
                    env: vec![],
                })
                .with_ephemeral_exit_code(1),
        );

        let target = BackupTarget::Volume {
            volume_name: "data".to_string(),
            paths: vec!["/".to_string()],
            stop_attached: true,
            pre_hook: None,
            post_hook: None,
        };

        let (controller, store) = make_controller(
            container.clone(),
            vec![target],
            staging_dir.path().to_path_buf(),
            store_dir.path().join("store.json"),
        )
        .await;

        controller.run_once(CancellationToken::new()).await;

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::Failed, "a nonzero backend exit must fail the run");
        assert!(status.last_error.is_some());

        assert_eq!(*container.stop_calls.lock().unwrap(), vec!["app1".to_string()]);
        assert_eq!(
            *container.start_calls.lock().unwrap(),
            vec!["app1".to_string()],
            "the stopped container must be restarted even though the backend crashed"
        );

        let run_root = staging_dir.path().join("nightly").join("1");
        assert!(!run_root.exists(), "staging root must be removed even after a backend failure");
    }

    #[tokio::test]
    async fn pre_hook_failure_skips_staging_but_post_hook_still_runs() {
        let staging_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let container = Arc::new(FakeContainerClient::new().with_exec_fail_contains("exit 1"));

        let target = BackupTarget::Db {
            container_name: "pg-hook".to_string(),
            db_kind: Some(crate::engine::target::DbKind::Postgres),
            dump_args: vec![],
            pre_hook: Some("exit 1".to_string()),
            post_hook: Some("echo done".to_string()),
        };

        let (controller, store) = make_controller(
            container.clone(),
            vec![target],
            staging_dir.path().to_path_buf(),
            store_dir.path().join("store.json"),
        )
        .await;

        controller.run_once(CancellationToken::new()).await;

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.last_targets_successful, 0);
        assert!(
            status.last_error.as_deref().unwrap_or("").contains("pre-hook failed"),
            "error must attribute the failure to the pre-hook: {:?}",
            status.last_error
        );

        let calls = container.exec_calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.contains("exit 1")), "pre-hook must have run: {calls:?}");
        assert!(calls.iter().any(|c| c.contains("echo done")), "post-hook must still have run: {calls:?}");

        assert_eq!(
            container.ephemeral_calls.lock().unwrap().len(),
            0,
            "backend must not be invoked when every target failed"
        );
    }
}
