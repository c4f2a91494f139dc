use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use super::models::{JobState, JobStatus, LogEntry, StoreDocument};

const LOG_FLUSH_MAX_BATCH: usize = 256;
const LOG_FLUSH_INTERVAL: Duration = Duration::from_millis(200);
const LOG_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse store file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to persist store file: {0}")]
    Write(#[source] std::io::Error),

    #[error("instance {0} already has a job in progress")]
    AlreadyInProgress(String),

    #[error("job {0} not found")]
    JobNotFound(u64),
}

/// Durable `JobStatus`/`LogEntry` store backed by a single JSON file,
/// written with the same temp-write-fsync-rename sequence the rest of the
/// daemon uses for its on-disk state.
pub struct StatusLogStore {
    doc: Arc<RwLock<StoreDocument>>,
    path: PathBuf,
    save_mutex: Arc<Mutex<()>>,
    log_tx: mpsc::Sender<LogEntry>,
}

impl StatusLogStore {
    /// Opens (or creates) the store at `path`. Any job left `in_progress`
    /// from a prior run — meaning the process died before `finish_job` ran —
    /// is marked `aborted` so it never looks live again.
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let mut doc = if path.exists() {
            Self::load(&path).await?
        } else {
            debug!("no existing store found at {}, starting fresh", path.display());
            StoreDocument::new()
        };

        let now = Utc::now();
        let mut recovered = 0u32;
        for status in doc.job_status.iter_mut() {
            if status.state == JobState::InProgress {
                status.state = JobState::Aborted;
                status.is_active = false;
                status.last_completed_at = Some(now);
                status.last_error = Some("process restarted while job was running".to_string());
                status.updated_at = now;
                recovered += 1;
            }
        }
        if recovered > 0 {
            warn!(count = recovered, "recovered in-progress jobs as aborted on startup");
        }

        let save_mutex = Arc::new(Mutex::new(()));
        let doc = Arc::new(RwLock::new(doc));

        if recovered > 0 {
            let snapshot = doc.read().await.clone();
            Self::save_atomic(&path, &snapshot).await?;
        }

        let (log_tx, log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let store = Self {
            doc,
            path,
            save_mutex,
            log_tx,
        };
        store.spawn_log_flusher(log_rx);
        Ok(store)
    }

    async fn load(path: &Path) -> Result<StoreDocument, StoreError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
        let doc: StoreDocument = serde_json::from_str(&content)?;
        Ok(doc)
    }

    async fn save_atomic(path: &Path, doc: &StoreDocument) -> Result<(), StoreError> {
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(doc).map_err(StoreError::Parse)?;

        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(StoreError::Write)?;

        let temp_file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&temp_path)
            .await
            .map_err(StoreError::Write)?;
        temp_file.sync_all().await.map_err(StoreError::Write)?;
        drop(temp_file);

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(StoreError::Write)?;
        Ok(())
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.save_mutex.lock().await;
        let snapshot = self.doc.read().await.clone();
        Self::save_atomic(&self.path, &snapshot).await
    }

    /// Allocates a fresh `(global_id, instance_local_id)` pair and records a
    /// new `in_progress` status row. Fails if the instance already has a job
    /// in progress — the Job Engine is expected to check this before
    /// starting work, but the store enforces it regardless.
    pub async fn begin_job(&self, instance_id: &str) -> Result<JobStatus, StoreError> {
        let _guard = self.save_mutex.lock().await;
        let now = Utc::now();

        let snapshot = {
            let mut doc = self.doc.write().await;

            if let Some(existing) = doc.get_status(instance_id) {
                if existing.state == JobState::InProgress {
                    return Err(StoreError::AlreadyInProgress(instance_id.to_string()));
                }
            }

            let global_id = doc.next_global_id;
            doc.next_global_id += 1;

            let local_id = doc
                .instance_counters
                .entry(instance_id.to_string())
                .or_insert(0);
            *local_id += 1;
            let local_id = *local_id;

            let mut status = JobStatus::new(instance_id.to_string(), global_id, local_id, now);
            status.is_active = true;
            status.state = JobState::InProgress;
            status.last_started_at = Some(now);
            doc.upsert_status(status.clone());

            doc.clone()
        };

        Self::save_atomic(&self.path, &snapshot).await?;
        Ok(snapshot.get_status(instance_id).cloned().expect("just inserted"))
    }

    /// Finalizes a job, deriving its terminal state from target outcome
    /// counts and persisting the result.
    pub async fn finish_job(
        &self,
        instance_id: &str,
        global_id: u64,
        successful: u32,
        total: u32,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let _guard = self.save_mutex.lock().await;
        let now = Utc::now();

        let snapshot = {
            let mut doc = self.doc.write().await;
            let status = doc
                .get_status_mut(instance_id)
                .filter(|s| s.global_id == global_id)
                .ok_or(StoreError::JobNotFound(global_id))?;

            status.is_active = false;
            status.state = JobState::from_counts(successful, total);
            status.last_completed_at = Some(now);
            status.last_targets_successful = successful;
            status.last_targets_total = total;
            status.last_error = error;
            status.updated_at = now;

            doc.clone()
        };

        Self::save_atomic(&self.path, &snapshot).await
    }

    /// Marks a running job `aborted`, used on cancellation/shutdown.
    pub async fn abort_job(&self, instance_id: &str, global_id: u64, reason: String) -> Result<(), StoreError> {
        let _guard = self.save_mutex.lock().await;
        let now = Utc::now();

        let snapshot = {
            let mut doc = self.doc.write().await;
            let status = doc
                .get_status_mut(instance_id)
                .filter(|s| s.global_id == global_id)
                .ok_or(StoreError::JobNotFound(global_id))?;

            status.is_active = false;
            status.state = JobState::Aborted;
            status.last_completed_at = Some(now);
            status.last_error = Some(reason);
            status.updated_at = now;

            doc.clone()
        };

        Self::save_atomic(&self.path, &snapshot).await
    }

    pub async fn query_status(&self, instance_id: &str) -> Option<JobStatus> {
        self.doc.read().await.get_status(instance_id).cloned()
    }

    pub async fn query_all_status(&self) -> Vec<JobStatus> {
        self.doc.read().await.job_status.clone()
    }

    pub async fn query_logs(&self, job_global_id: Option<u64>, limit: usize) -> Vec<LogEntry> {
        let doc = self.doc.read().await;
        doc.logs
            .iter()
            .rev()
            .filter(|l| job_global_id.is_none() || l.job_global_id == job_global_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Enqueues a log entry for background, batched persistence. The `id`
    /// and `timestamp` fields are stamped by the flusher, not the caller.
    pub fn append_log(&self, mut entry: LogEntry) {
        entry.id = 0;
        if self.log_tx.try_send(entry).is_err() {
            warn!("log channel full or closed, dropping log entry");
        }
    }

    fn spawn_log_flusher(&self, mut log_rx: mpsc::Receiver<LogEntry>) {
        let doc = self.doc.clone();
        let path = self.path.clone();
        let save_mutex = self.save_mutex.clone();

        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(LOG_FLUSH_MAX_BATCH);
            loop {
                let got_any = tokio::select! {
                    maybe = log_rx.recv() => {
                        match maybe {
                            Some(entry) => {
                                batch.push(entry);
                                true
                            }
                            None => {
                                if !batch.is_empty() {
                                    Self::flush_batch(&doc, &path, &save_mutex, &mut batch).await;
                                }
                                return;
                            }
                        }
                    }
                    _ = tokio::time::sleep(LOG_FLUSH_INTERVAL), if !batch.is_empty() => false,
                };

                if got_any && batch.len() < LOG_FLUSH_MAX_BATCH {
                    // drain whatever else is immediately ready without waiting
                    while batch.len() < LOG_FLUSH_MAX_BATCH {
                        match log_rx.try_recv() {
                            Ok(entry) => batch.push(entry),
                            Err(_) => break,
                        }
                    }
                }

                if batch.len() >= LOG_FLUSH_MAX_BATCH || !got_any {
                    Self::flush_batch(&doc, &path, &save_mutex, &mut batch).await;
                }
            }
        });
    }

    async fn flush_batch(
        doc: &Arc<RwLock<StoreDocument>>,
        path: &Path,
        save_mutex: &Arc<Mutex<()>>,
        batch: &mut Vec<LogEntry>,
    ) {
        if batch.is_empty() {
            return;
        }

        let _guard = save_mutex.lock().await;
        let snapshot = {
            let mut doc = doc.write().await;
            for mut entry in batch.drain(..) {
                entry.id = doc.next_log_id;
                doc.next_log_id += 1;
                doc.logs.push(entry);
            }
            doc.clone()
        };

        if let Err(err) = Self::save_atomic(path, &snapshot).await {
            warn!(error = %err, "failed to flush log batch to disk");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::LogLevel;

    #[tokio::test]
    async fn begin_job_allocates_monotonic_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusLogStore::open(dir.path().join("store.json")).await.unwrap();

        let first = store.begin_job("nightly").await.unwrap();
        store
            .finish_job("nightly", first.global_id, 1, 1, None)
            .await
            .unwrap();

        let second = store.begin_job("nightly").await.unwrap();
        assert_eq!(first.global_id + 1, second.global_id);
        assert_eq!(first.instance_local_id + 1, second.instance_local_id);
    }

    #[tokio::test]
    async fn begin_job_rejects_double_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusLogStore::open(dir.path().join("store.json")).await.unwrap();

        store.begin_job("nightly").await.unwrap();
        let err = store.begin_job("nightly").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInProgress(_)));
    }

    #[tokio::test]
    async fn finish_job_derives_state_from_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusLogStore::open(dir.path().join("store.json")).await.unwrap();

        let started = store.begin_job("nightly").await.unwrap();
        store
            .finish_job("nightly", started.global_id, 1, 2, Some("one target failed".into()))
            .await
            .unwrap();

        let status = store.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::PartialSuccess);
        assert!(!status.is_active);
    }

    #[tokio::test]
    async fn reopening_recovers_in_progress_as_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = StatusLogStore::open(path.clone()).await.unwrap();
            store.begin_job("nightly").await.unwrap();
        }

        let reopened = StatusLogStore::open(path).await.unwrap();
        let status = reopened.query_status("nightly").await.unwrap();
        assert_eq!(status.state, JobState::Aborted);
        assert!(!status.is_active);
    }

    #[tokio::test]
    async fn appended_logs_eventually_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusLogStore::open(dir.path().join("store.json")).await.unwrap();

        for i in 0..5 {
            store.append_log(LogEntry {
                id: 0,
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: format!("message {i}"),
                instance_id: Some("nightly".to_string()),
                target_id: None,
                job_global_id: None,
                job_local_id: None,
            });
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        let logs = store.query_logs(None, 10).await;
        assert_eq!(logs.len(), 5);
    }
}
