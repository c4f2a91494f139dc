pub mod logger;

pub use logger::{init_logging, reload_logging, shutdown_logging, Rotation};
