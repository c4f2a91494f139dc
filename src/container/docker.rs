use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    ListContainersOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::volume::ListVolumesOptions;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ContainerError;
use super::{
    BindMount, ContainerClient, ContainerSummary, EphemeralSpec, MountInfo, OutputSink,
    VolumeSummary,
};

/// `ContainerClient` backed by the Docker Engine API via `bollard`.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    fn summarize(
        id: String,
        names: Vec<String>,
        image: String,
        state: String,
        labels: HashMap<String, String>,
        mounts: Vec<MountInfo>,
        env: Vec<String>,
    ) -> ContainerSummary {
        let name = names
            .into_iter()
            .next()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.clone());
        ContainerSummary {
            id,
            name,
            image,
            labels,
            state,
            mounts,
            env,
        }
    }
}

#[async_trait]
impl ContainerClient for DockerClient {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ContainerError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await?;

        Ok(summaries
            .into_iter()
            .map(|c| {
                let mounts = c
                    .mounts
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| MountInfo {
                        mount_type: m
                            .typ
                            .map(|t| format!("{t:?}").to_lowercase())
                            .unwrap_or_default(),
                        name: m.name,
                        destination: m.destination.unwrap_or_default(),
                        read_only: m.rw.map(|rw| !rw).unwrap_or(false),
                    })
                    .collect();

                Self::summarize(
                    c.id.unwrap_or_default(),
                    c.names.unwrap_or_default(),
                    c.image.unwrap_or_default(),
                    c.state.unwrap_or_default(),
                    c.labels.unwrap_or_default(),
                    mounts,
                    Vec::new(),
                )
            })
            .collect())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, ContainerError> {
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions::<String>::default()))
            .await?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| VolumeSummary {
                name: v.name,
                mountpoint: v.mountpoint,
                labels: v.labels,
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary, ContainerError> {
        let details = self.docker.inspect_container(id, None).await?;

        let state = details
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default();

        let image = details
            .config
            .as_ref()
            .and_then(|c| c.image.clone())
            .unwrap_or_default();

        let env = details
            .config
            .as_ref()
            .and_then(|c| c.env.clone())
            .unwrap_or_default();

        let labels = details
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        let mounts = details
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| MountInfo {
                mount_type: m
                    .typ
                    .map(|t| format!("{t:?}").to_lowercase())
                    .unwrap_or_default(),
                name: m.name,
                destination: m.destination.unwrap_or_default(),
                read_only: m.rw.map(|rw| !rw).unwrap_or(false),
            })
            .collect();

        Ok(Self::summarize(
            details
                .id
                .unwrap_or_else(|| id.to_string()),
            details.name.map(|n| vec![n]).unwrap_or_default(),
            image,
            state,
            labels,
            mounts,
            env,
        ))
    }

    async fn stop(
        &self,
        id: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<(), ContainerError> {
        let summary = self.inspect_container(id).await?;
        if !summary.is_running() {
            return Ok(());
        }

        let fut = self.docker.stop_container(
            id,
            Some(StopContainerOptions {
                t: timeout.as_secs() as i64,
            }),
        );

        tokio::select! {
            res = fut => res.map_err(ContainerError::from),
            _ = cancel.cancelled() => Err(ContainerError::Cancelled),
        }
    }

    async fn start(&self, id: &str, cancel: CancellationToken) -> Result<(), ContainerError> {
        let summary = self.inspect_container(id).await?;
        if summary.is_running() {
            return Ok(());
        }

        let fut = self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>);

        tokio::select! {
            res = fut => res.map_err(ContainerError::from),
            _ = cancel.cancelled() => Err(ContainerError::Cancelled),
        }
    }

    async fn exec(
        &self,
        id: &str,
        argv: Vec<String>,
        env: HashMap<String, String>,
        stdout: OutputSink,
        stderr: OutputSink,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<i64, ContainerError> {
        let env: Vec<String> = env.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        let shell_line = argv.join(" ");

        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    env: Some(env),
                    cmd: Some(vec!["/bin/sh".to_string(), "-lc".to_string(), shell_line]),
                    ..Default::default()
                },
            )
            .await?;

        let run = async {
            match self.docker.start_exec(&exec.id, None).await? {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(chunk) = output.next().await {
                        match chunk? {
                            bollard::container::LogOutput::StdOut { message } => stdout(&message),
                            bollard::container::LogOutput::StdErr { message } => stderr(&message),
                            bollard::container::LogOutput::Console { message } => stdout(&message),
                            bollard::container::LogOutput::StdIn { .. } => {}
                        }
                    }
                }
                StartExecResults::Detached => {}
            }

            let inspect = self.docker.inspect_exec(&exec.id).await?;
            Ok(inspect.exit_code.unwrap_or(-1))
        };

        tokio::select! {
            res = run => res,
            _ = cancel.cancelled() => Err(ContainerError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(ContainerError::Timeout(timeout)),
        }
    }

    async fn run_ephemeral(
        &self,
        spec: EphemeralSpec,
        stdout: OutputSink,
        stderr: OutputSink,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<i64, ContainerError> {
        let env: Vec<String> = spec
            .env
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let binds: Vec<String> = spec
            .binds
            .iter()
            .map(BindMount::to_docker_bind)
            .collect();

        let host_config = bollard::models::HostConfig {
            binds: Some(binds),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = bollard::container::Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container::<String, String>(None, config)
            .await?;
        let container_id = created.id;

        let outcome = self
            .run_ephemeral_body(&container_id, stdout, stderr, timeout, cancel)
            .await;

        let _ = self
            .docker
            .remove_container(
                &container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        outcome
    }

    async fn volume_host_path(&self, name: &str) -> Result<String, ContainerError> {
        let volume = self
            .docker
            .inspect_volume(name)
            .await
            .map_err(|_| ContainerError::VolumeNotFound(name.to_string()))?;
        Ok(volume.mountpoint)
    }
}

impl DockerClient {
    async fn run_ephemeral_body(
        &self,
        container_id: &str,
        stdout: OutputSink,
        stderr: OutputSink,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<i64, ContainerError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;

        let logs_opts = bollard::container::LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(logs_opts));

        let drain = async {
            while let Some(chunk) = stream.next().await {
                match chunk? {
                    bollard::container::LogOutput::StdOut { message } => stdout(&message),
                    bollard::container::LogOutput::StdErr { message } => stderr(&message),
                    bollard::container::LogOutput::Console { message } => stdout(&message),
                    bollard::container::LogOutput::StdIn { .. } => {}
                }
            }
            Ok::<(), bollard::errors::Error>(())
        };

        tokio::select! {
            res = drain => { res?; }
            _ = cancel.cancelled() => return Err(ContainerError::Cancelled),
            _ = tokio::time::sleep(timeout) => return Err(ContainerError::Timeout(timeout)),
        }

        let inspect = self.docker.inspect_container(container_id, None).await?;
        let exit_code = inspect
            .state
            .and_then(|s| s.exit_code)
            .unwrap_or(-1);
        debug!(container_id, exit_code, "ephemeral container finished");
        Ok(exit_code)
    }
}

impl BindMount {
    fn to_docker_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.host_path, self.container_path)
        } else {
            format!("{}:{}", self.host_path, self.container_path)
        }
    }
}
