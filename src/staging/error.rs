use thiserror::Error;

/// Errors surfaced while materializing a target's bytes into the staging tree.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("volume '{0}' not found")]
    MissingVolume(String),

    #[error("container '{0}' not found or not running")]
    DbNotRunning(String),

    #[error("could not determine database kind for container '{0}'")]
    UnknownDbKind(String),

    #[error("dump for '{0}' failed: {1}")]
    DumpFailed(String, String),

    #[error("validation failed: volume '{0}' staged tree contains only 0 bytes of data")]
    EmptyBackup(String),

    #[error("all configured paths were missing for volume '{0}'")]
    AllPathsMissing(String),

    #[error("container error: {0}")]
    Container(#[from] crate::container::ContainerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
