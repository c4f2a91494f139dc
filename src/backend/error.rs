use thiserror::Error;

/// Errors surfaced by a [`super::Backend`] operation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{tool} exited with status {code}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("container error: {0}")]
    Container(#[from] crate::container::ContainerError),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,
}
