pub mod engine;
pub mod error;

pub use engine::{parse_cron, Scheduler};
pub use error::SchedulerError;
