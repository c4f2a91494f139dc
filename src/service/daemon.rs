use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MarinaConfig;
use crate::container::docker::DockerClient;
use crate::container::ContainerClient;
use crate::engine::JobEngine;
use crate::scheduler::Scheduler;
use crate::store::StatusLogStore;

use super::signals::{setup_shutdown_handler, wait_for_reload_signal};

/// How long `shutdown_gracefully` waits for in-flight runs to finish before
/// giving up and returning anyway.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Top-level process driver: owns the scheduler, the job engine and the
/// durable store, and wires SIGINT/SIGTERM/SIGHUP into them.
pub struct MarinaDaemon {
    config: MarinaConfig,
    config_path: PathBuf,
    store: Arc<StatusLogStore>,
    container: Arc<dyn ContainerClient>,
    scheduler: Scheduler,
    engine: JobEngine,
    shutdown: CancellationToken,
}

impl MarinaDaemon {
    /// Opens the durable store at `config.db_path`. Split out from `new` so
    /// the caller can map a storage failure to its own exit code.
    pub async fn open_store(config: &MarinaConfig) -> Result<Arc<StatusLogStore>, crate::store::StoreError> {
        Ok(Arc::new(StatusLogStore::open(PathBuf::from(&config.db_path)).await?))
    }

    /// Connects to the container daemon. Split out from `new` so the caller
    /// can map a connection failure to its own exit code.
    pub fn connect_container() -> Result<Arc<dyn ContainerClient>, crate::container::ContainerError> {
        Ok(Arc::new(DockerClient::connect()?))
    }

    pub fn new(
        config: MarinaConfig,
        config_path: PathBuf,
        store: Arc<StatusLogStore>,
        container: Arc<dyn ContainerClient>,
    ) -> anyhow::Result<Self> {
        let scheduler = Scheduler::new();
        let engine = JobEngine::from_config(&config, container.clone(), store.clone())?;

        Ok(Self {
            config,
            config_path,
            store,
            container,
            scheduler,
            engine,
            shutdown: CancellationToken::new(),
        })
    }

    /// Runs until SIGINT/SIGTERM, reloading the cron schedule (not targets or
    /// backend wiring) on SIGHUP.
    pub async fn run(mut self) -> anyhow::Result<()> {
        setup_shutdown_handler(self.shutdown.clone()).await;

        self.engine
            .start(&self.config, &self.scheduler, self.shutdown.clone())
            .await?;
        info!(instances = self.config.instances.len(), "marina daemon started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = wait_for_reload_signal() => {
                    self.reload_schedule().await;
                }
            }
        }

        self.shutdown_gracefully().await;
        Ok(())
    }

    /// Re-reads the config file and re-registers each instance's cron entry.
    /// Targets, backends and already-running jobs are untouched; only the
    /// schedule itself is live-reloadable.
    async fn reload_schedule(&mut self) {
        info!("SIGHUP received, reloading cron schedules");

        let fresh = match crate::config::load(&self.config_path).await {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to reload config, keeping previous schedules");
                return;
            }
        };

        for instance in &fresh.instances {
            let Some(fire_tx) = self.engine.fire_sender(&instance.id) else {
                warn!(
                    instance = %instance.id,
                    "config reload added or removed instances; restart the process to pick this up"
                );
                continue;
            };

            if let Err(err) = self
                .scheduler
                .replace(&instance.id, &instance.schedule, fire_tx)
                .await
            {
                error!(instance = %instance.id, error = %err, "failed to re-register schedule");
            }
        }

        self.config = fresh;
    }

    async fn shutdown_gracefully(mut self) {
        self.scheduler.shutdown().await;

        match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, self.engine.join()).await {
            Ok(()) => info!("all instances stopped cleanly"),
            Err(_) => warn!(
                seconds = SHUTDOWN_GRACE_PERIOD.as_secs(),
                "grace period elapsed with runs still in flight, exiting anyway"
            ),
        }

        drop(self.container);
        drop(self.store);
    }
}
