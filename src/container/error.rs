use thiserror::Error;

/// Errors surfaced by [`super::ContainerClient`] implementations.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    #[error("container {0} is not running")]
    NotRunning(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
