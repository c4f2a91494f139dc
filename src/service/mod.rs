pub mod daemon;
pub mod signals;

pub use daemon::MarinaDaemon;
pub use signals::setup_shutdown_handler;
