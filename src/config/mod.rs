pub mod error;
pub mod loader;
pub mod models;

pub use error::ConfigError;
pub use loader::{load, resolve_path};
pub use models::{InstanceConfig, MarinaConfig, TargetConfig};
