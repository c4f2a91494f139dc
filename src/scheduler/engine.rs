use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::SchedulerError;

struct Entry {
    next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cron-backed scheduler. Each registered instance gets its own dispatcher
/// task that sleeps until the next fire and then tries to enqueue a run
/// request on a bounded (capacity 1) channel owned by the Job Engine. If a
/// run is already queued or running, the channel is full, the fire is
/// dropped, and a WARN is logged — "coalesced" rather than silently lost.
pub struct Scheduler {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers `instance_id` on `cron_expr`. Fires are delivered by
    /// attempting `fire_tx.try_send(())`; the caller owns a channel with
    /// capacity 1 per instance.
    pub async fn register(
        &self,
        instance_id: &str,
        cron_expr: &str,
        fire_tx: mpsc::Sender<()>,
    ) -> Result<(), SchedulerError> {
        let schedule = parse_cron(cron_expr)?;

        let mut entries = self.entries.write().await;
        if entries.contains_key(instance_id) {
            return Err(SchedulerError::AlreadyRegistered(instance_id.to_string()));
        }

        let next_run = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        let handle = spawn_dispatcher(
            instance_id.to_string(),
            schedule,
            fire_tx,
            next_run.clone(),
            cancel.clone(),
        );

        entries.insert(
            instance_id.to_string(),
            Entry {
                next_run,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    /// Removes `instance_id`'s dispatcher. Any fire already sent to the Job
    /// Engine continues running unaffected.
    pub async fn unregister(&self, instance_id: &str) -> Result<(), SchedulerError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .remove(instance_id)
            .ok_or_else(|| SchedulerError::NotRegistered(instance_id.to_string()))?;
        entry.cancel.cancel();
        entry.handle.abort();
        Ok(())
    }

    /// Atomically swaps `instance_id`'s cron expression, keeping the same
    /// fire channel.
    pub async fn replace(
        &self,
        instance_id: &str,
        new_cron_expr: &str,
        fire_tx: mpsc::Sender<()>,
    ) -> Result<(), SchedulerError> {
        let _ = self.unregister(instance_id).await;
        self.register(instance_id, new_cron_expr, fire_tx).await
    }

    pub async fn next_run(&self, instance_id: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().await;
        let entry = entries.get(instance_id)?;
        *entry.next_run.read().await
    }

    /// Stops every dispatcher. Used on process shutdown.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            entry.cancel.cancel();
            entry.handle.abort();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Config and the documented wire format use standard 5-field cron
/// (`min hour dom month dow`); the `cron` crate requires a leading seconds
/// field. A bare 5-field expression gets `0` prepended so it fires once on
/// the minute boundary instead of once per second.
pub fn parse_cron(expr: &str) -> Result<CronSchedule, SchedulerError> {
    let field_count = expr.split_whitespace().count();
    let normalized = if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };

    CronSchedule::from_str(&normalized).map_err(|source| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        source,
    })
}

fn spawn_dispatcher(
    instance_id: String,
    schedule: CronSchedule,
    fire_tx: mpsc::Sender<()>,
    next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).take(1).next() else {
                debug!(instance = %instance_id, "cron schedule has no further fires");
                return;
            };
            *next_run.write().await = Some(next);

            let now = Utc::now();
            let sleep_for = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    match fire_tx.try_send(()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(())) => {
                            warn!(instance = %instance_id, "run already queued or in progress, coalescing fire");
                        }
                        Err(TrySendError::Closed(())) => {
                            debug!(instance = %instance_id, "fire channel closed, stopping dispatcher");
                            return;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    return;
                }
            }
        }
    })
}
