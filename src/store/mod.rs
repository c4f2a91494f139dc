pub mod manager;
pub mod models;

pub use manager::{StatusLogStore, StoreError};
pub use models::{JobState, JobStatus, LogEntry, LogLevel, StoreDocument};
