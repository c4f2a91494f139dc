use thiserror::Error;

/// Errors surfaced while loading or validating a [`super::MarinaConfig`].
///
/// Every variant is fatal at startup: the process exits with code `1`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("instance '{id}' must set exactly one of repository/customImage, got {got}")]
    AmbiguousBackend { id: String, got: &'static str },

    #[error("instance '{id}' target #{index} must set exactly one of volume/db, got {got}")]
    AmbiguousTarget {
        id: String,
        index: usize,
        got: &'static str,
    },

    #[error("instance '{0}' has an empty id")]
    EmptyInstanceId(usize),

    #[error("duplicate instance id '{0}'")]
    DuplicateInstanceId(String),

    #[error("instance '{id}' has an invalid cron expression '{expr}'")]
    InvalidCron { id: String, expr: String },

    #[error("instance '{0}' has no targets")]
    NoTargets(String),
}
