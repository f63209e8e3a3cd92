pub mod bridge;
pub mod config;
pub mod forwarder;
pub mod logging;
pub mod upstream;

use std::path::Path;

use thiserror::Error;

pub use bridge::{Bridge, BridgeReport, BridgeState, DRAIN_DEADLINE, ShutdownReason, shutdown_signal};
pub use config::{ConfigLoadError, default_config_path, load_config};
pub use forwarder::{ForwardError, HttpForwarder};
pub use upstream::Upstream;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error("failed to start forwarder: {0}")]
    Forwarder(#[from] ForwardError),
}

/// Load the config at `config_path` and relay process stdio to the backend
/// until EOF or a shutdown signal.
pub async fn serve(config_path: &Path) -> Result<BridgeReport, BridgeError> {
    let config = load_config(config_path)?;
    logging::init_logging(config.log_level);

    let forwarder = HttpForwarder::new(&config)?;
    tracing::info!(
        endpoint = %forwarder.endpoint(),
        timeout = ?forwarder.timeout(),
        version = env!("CARGO_PKG_VERSION"),
        "bridge started"
    );

    let report = Bridge::new(forwarder)
        .run(
            tokio::io::stdin(),
            tokio::io::stdout(),
            tokio::io::stderr(),
            shutdown_signal(),
        )
        .await;
    Ok(report)
}

/// [`serve`] mapped to a process exit code.
pub async fn run(config_path: &Path) -> i32 {
    match serve(config_path).await {
        Ok(report) => {
            tracing::info!(
                frames = report.frames,
                drained = report.drained,
                "bridge exited"
            );
            0
        }
        Err(err) => {
            tracing::error!(error = %err, "bridge failed to start");
            eprintln!("error: {err}");
            1
        }
    }
}
