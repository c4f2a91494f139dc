pub mod database;
pub mod error;
pub mod volume;

pub use error::StagingError;
pub use volume::VolumeStageOutcome;
