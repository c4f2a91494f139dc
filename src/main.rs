use std::path::PathBuf;
use std::process::ExitCode;

use marina::config;
use marina::observability::{init_logging, Rotation};
use marina::service::MarinaDaemon;
use tracing::{error, info};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    let cli_path = args.get(1).map(String::as_str);
    let config_path = config::resolve_path(cli_path);

    run(config_path)
}

#[tokio::main]
async fn run(config_path: PathBuf) -> ExitCode {
    let config = match config::load(&config_path).await {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config at {}: {}", config_path.display(), err);
            return ExitCode::from(1);
        }
    };

    let rotation = Rotation::Daily;
    if let Err(err) = init_logging(
        &config.log_level,
        config.log_directory.as_deref().map(std::path::Path::new),
        rotation,
    ) {
        eprintln!("failed to initialize logging: {}", err);
        return ExitCode::from(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "marina starting");
    info!(path = %config_path.display(), "config loaded");

    let store = match MarinaDaemon::open_store(&config).await {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "failed to open status/log store");
            marina::observability::shutdown_logging();
            return ExitCode::from(2);
        }
    };

    let container = match MarinaDaemon::connect_container() {
        Ok(container) => container,
        Err(err) => {
            error!(error = %err, "failed to connect to container daemon");
            marina::observability::shutdown_logging();
            return ExitCode::from(3);
        }
    };

    let daemon = match MarinaDaemon::new(config, config_path, store, container) {
        Ok(daemon) => daemon,
        Err(err) => {
            error!(error = %err, "failed to initialize daemon");
            marina::observability::shutdown_logging();
            return ExitCode::from(3);
        }
    };

    let result = daemon.run().await;
    marina::observability::shutdown_logging();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("marina exited with error: {}", err);
            ExitCode::from(1)
        }
    }
}

fn print_help() {
    println!("marina {} - container-aware backup orchestrator", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  marinad [CONFIG_FILE]");
    println!();
    println!("CONFIG_FILE defaults to $CONFIG_FILE, or /config.yml if unset.");
}
