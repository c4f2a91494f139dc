use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expr}': {source}")]
    InvalidCron {
        expr: String,
        source: cron::error::Error,
    },

    #[error("instance {0} is already registered")]
    AlreadyRegistered(String),

    #[error("instance {0} is not registered")]
    NotRegistered(String),
}
