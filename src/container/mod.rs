pub mod docker;
pub mod error;

pub use error::ContainerError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Sink for a stream of raw bytes read off a container's stdout/stderr.
/// Implementations either buffer into memory (dump capture) or forward into
/// the structured log store (INFO/ERROR streaming).
pub type OutputSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MountInfo {
    pub mount_type: String,
    pub name: Option<String>,
    pub destination: String,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub state: String,
    pub mounts: Vec<MountInfo>,
    pub env: Vec<String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Clone)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct EphemeralSpec {
    pub image: String,
    pub binds: Vec<BindMount>,
    pub env: HashMap<String, String>,
    pub cmd: Vec<String>,
}

/// Thin capability surface over a container daemon. All calls accept a
/// cancellation token; implementations must race every blocking wait against
/// it so a shutdown never leaves an orphaned exec or ephemeral container.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ContainerError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, ContainerError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary, ContainerError>;

    /// Idempotent: stopping an already-stopped container is a no-op success.
    async fn stop(
        &self,
        id: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<(), ContainerError>;

    /// Idempotent: starting an already-running container is a no-op success.
    async fn start(&self, id: &str, cancel: CancellationToken) -> Result<(), ContainerError>;

    /// Runs `argv` inside `id` via `/bin/sh -lc`, streaming stdout/stderr into
    /// the given sinks, and returns the exit code. Guarantees the exec is not
    /// left running if `cancel` fires before completion.
    async fn exec(
        &self,
        id: &str,
        argv: Vec<String>,
        env: HashMap<String, String>,
        stdout: OutputSink,
        stderr: OutputSink,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<i64, ContainerError>;

    /// Starts an ephemeral container from `spec`, waits for it to exit, and
    /// removes it. Streams stdout/stderr into the given sinks.
    async fn run_ephemeral(
        &self,
        spec: EphemeralSpec,
        stdout: OutputSink,
        stderr: OutputSink,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<i64, ContainerError>;

    /// Resolves a volume's host-visible mountpoint.
    async fn volume_host_path(&self, name: &str) -> Result<String, ContainerError>;
}
