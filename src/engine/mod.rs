pub mod run_controller;
pub mod target;

pub use run_controller::{RunController, RunPhase};
pub use target::{BackupTarget, DbKind};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::Backend;
use crate::config::{InstanceConfig, MarinaConfig};
use crate::container::ContainerClient;
use crate::retention;
use crate::scheduler::Scheduler;
use crate::store::StatusLogStore;

/// Owns one [`RunController`] per configured instance plus the semaphore
/// that bounds how many of them may be `Running` at once. [`JobEngine::start`]
/// registers each instance's cron schedule with the [`Scheduler`] and spawns
/// its controller task.
pub struct JobEngine {
    controllers: HashMap<String, Arc<RunController>>,
    fire_senders: HashMap<String, mpsc::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
    semaphore: Arc<Semaphore>,
}

impl JobEngine {
    /// Builds one `RunController` per instance in `config`, wired to a fresh
    /// `Backend` and sharing `container`/`store`.
    pub fn from_config(
        config: &MarinaConfig,
        container: Arc<dyn ContainerClient>,
        store: Arc<StatusLogStore>,
    ) -> anyhow::Result<Self> {
        let hostname = config.resolved_node_name();
        let staging_root = PathBuf::from(&config.staging_root);
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_instances.max(1)));

        let mut controllers = HashMap::new();
        for instance in &config.instances {
            let controller = build_controller(instance, config, &hostname, &staging_root, container.clone(), store.clone())?;
            controllers.insert(instance.id.clone(), Arc::new(controller));
        }

        Ok(Self {
            controllers,
            fire_senders: HashMap::new(),
            handles: Vec::new(),
            semaphore,
        })
    }

    /// Registers every instance's cron schedule with `scheduler` and spawns
    /// its `RunController` task. Call once at startup.
    pub async fn start(
        &mut self,
        config: &MarinaConfig,
        scheduler: &Scheduler,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        for instance in &config.instances {
            let Some(controller) = self.controllers.get(&instance.id).cloned() else {
                continue;
            };

            let (fire_tx, fire_rx) = mpsc::channel(1);
            scheduler
                .register(&instance.id, &instance.schedule, fire_tx.clone())
                .await?;
            self.fire_senders.insert(instance.id.clone(), fire_tx);

            let handle = controller.spawn(fire_rx, self.semaphore.clone(), shutdown.clone());
            self.handles.push(handle);

            info!(instance = %instance.id, "registered backup instance");
        }
        Ok(())
    }

    /// Triggers an immediate out-of-band run for `instance_id`, as if its
    /// cron schedule had just fired. Subject to the same coalescing as a
    /// real fire. Returns `false` if the instance is unknown.
    pub fn trigger(&self, instance_id: &str) -> bool {
        match self.fire_senders.get(instance_id) {
            Some(fire_tx) => fire_tx.try_send(()).is_ok(),
            None => false,
        }
    }

    /// Returns the fire channel for `instance_id`, if it is still registered.
    /// Used by schedule reload to re-register the same channel under a new
    /// cron expression.
    pub fn fire_sender(&self, instance_id: &str) -> Option<mpsc::Sender<()>> {
        self.fire_senders.get(instance_id).cloned()
    }

    pub async fn phase(&self, instance_id: &str) -> Option<RunPhase> {
        match self.controllers.get(instance_id) {
            Some(controller) => Some(controller.phase().await),
            None => None,
        }
    }

    /// Waits for every `RunController` task to exit. Callers should cancel
    /// the shared shutdown token first.
    pub async fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

fn build_controller(
    instance: &InstanceConfig,
    config: &MarinaConfig,
    hostname: &str,
    staging_root: &std::path::Path,
    container: Arc<dyn ContainerClient>,
    store: Arc<StatusLogStore>,
) -> anyhow::Result<RunController> {
    let targets: Vec<BackupTarget> = instance
        .targets
        .iter()
        .map(|t| BackupTarget::from_config(t, instance.effective_stop_attached(config.stop_attached)))
        .collect();

    let retention = retention::parse(instance.effective_retention(&config.retention));
    let timeout = instance.effective_restic_timeout(&config.restic_timeout)?;
    let backend = Backend::from_instance(instance, hostname, timeout, container.clone());

    Ok(RunController::new(
        instance.id.clone(),
        targets,
        backend,
        container,
        store,
        staging_root.to_path_buf(),
        retention,
        timeout,
    ))
}
