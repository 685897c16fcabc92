//! CSP billing adapter daemon entry point.

use std::path::Path;
use std::process::ExitCode;

use csp_adapter_core::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use csp_adapter_daemon::{bootstrap, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let raw = match bootstrap::read_raw_config(Path::new(&config_path)) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(err.exit_code());
        }
    };

    let config_level = raw
        .get("logging")
        .and_then(|logging| logging.get("level"))
        .and_then(|level| level.as_str())
        .map(str::to_owned);
    logging::init(config_level.as_deref());

    tracing::info!(config = %config_path, "starting CSP billing adapter");

    let mut event_loop = match bootstrap::bootstrap(raw).await {
        Ok(event_loop) => event_loop,
        Err(err) => {
            tracing::error!(error = %err, "adapter startup failed");
            return ExitCode::from(err.exit_code());
        }
    };

    match event_loop.run(shutdown_signal()).await {
        Ok(()) => {
            tracing::info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "adapter terminated");
            ExitCode::from(err.exit_code())
        }
    }
}

/// Resolves on SIGINT or SIGTERM. The loop finishes its current persist
/// step before exiting.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
