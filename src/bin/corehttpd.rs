//! Thin process entry point: load config, install signal handling, run.

use std::process::ExitCode;

use corehttp::{Config, Server};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match Config::from_toml_file(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config from {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let mut server = match Server::build(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to build server: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = server.shutdown_handle();
    if let Err(e) = install_signal_handlers(shutdown) {
        eprintln!("failed to install signal handlers: {e}");
        return ExitCode::FAILURE;
    }

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("server exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn install_signal_handlers(shutdown: corehttp::reactor::ShutdownHandle) -> std::io::Result<()> {
    let mut signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM])?;
    std::thread::Builder::new().name("corehttp-signals".to_string()).spawn(move || {
        if signals.forever().next().is_some() {
            shutdown.shutdown();
        }
    })?;
    Ok(())
}
