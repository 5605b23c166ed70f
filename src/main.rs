// Main entry point for bg-removal-server.
// Parses configuration, prepares the artifact directory, builds the Axum router
// and serves until Ctrl-C / SIGTERM.

mod gate;
mod removal;
mod shutdown_signal;
mod temp_files;
mod web;
mod worker;

use clap::{Parser, ValueEnum};
use gate::AdmissionGate;
use imgly_bgremove::{ModelCache, ModelDownloader, ModelSource};
use removal::{BackgroundRemover, ColorKeyRemover, ImglyRemover};
use shutdown_signal::shutdown_signal;
use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};
use temp_files::TempFileManager;
use tracing::Level;
use web::{AppState, create_app, create_listener};

/// Command line arguments for bg-removal-server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppConfig {
    /// Hostname/IP to bind the server to.
    /// If this option is specified without value, it will default to "*", meaning the server will listen on all interfaces.
    #[arg(long, env = "BG_REMOVAL_SERVER_HOST", default_value = "localhost", num_args = 0..=1, default_missing_value = "*")]
    host: String,

    /// Port number to listen on.
    #[arg(short, long, env = "BG_REMOVAL_SERVER_PORT", default_value_t = 8000)]
    port: u16,

    /// Maximum number of background removals running at the same time.
    #[arg(long, env = "BG_REMOVAL_SERVER_MAX_CONCURRENCY", default_value_t = gate::DEFAULT_CAPACITY, value_parser = parse_capacity)]
    max_concurrency: usize,

    /// Directory for processed images waiting to be sent. Each server process
    /// works in its own subdirectory, so instances may share it.
    /// Defaults to "bg-removal-server" inside the system temp directory.
    #[arg(long, env = "BG_REMOVAL_SERVER_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Maximum accepted request body size in bytes.
    #[arg(long, env = "BG_REMOVAL_SERVER_MAX_UPLOAD_BYTES", default_value_t = web::DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Seconds to wait for a single background removal before answering with an error.
    #[arg(long, env = "BG_REMOVAL_SERVER_REMOVAL_TIMEOUT_SECS", default_value_t = web::DEFAULT_REMOVAL_TIMEOUT.as_secs())]
    removal_timeout_secs: u64,

    /// Background removal implementation.
    #[arg(long, env = "BG_REMOVAL_SERVER_REMOVER", value_enum, default_value_t = RemoverKind::Model)]
    remover: RemoverKind,

    /// RGB distance from the border colour under which pixels count as background
    /// (color-key remover only).
    #[arg(long, env = "BG_REMOVAL_SERVER_COLOR_KEY_TOLERANCE", default_value_t = removal::DEFAULT_TOLERANCE)]
    color_key_tolerance: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RemoverKind {
    /// ISNet segmentation model, downloaded into the model cache on first start.
    Model,
    /// Keys out the dominant border colour. Needs no model.
    ColorKey,
}

fn parse_capacity(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Builds the configured remover, downloading the model first if it is not cached yet.
async fn create_remover(config: &AppConfig) -> Result<Arc<dyn BackgroundRemover>, String> {
    if config.remover == RemoverKind::ColorKey {
        return Ok(Arc::new(ColorKeyRemover::new(config.color_key_tolerance)));
    }

    let model_url = ModelCache::get_default_model_url();
    let model_id = ModelCache::get_default_model_id();
    let cache = ModelCache::new().map_err(|e| e.to_string())?;
    if !cache.is_model_cached(&model_id) {
        tracing::info!("Downloading model from {}...", model_url);
        ModelDownloader::new()
            .map_err(|e| e.to_string())?
            .download_model(model_url, false)
            .await
            .map_err(|e| e.to_string())?;
    }

    let remover =
        ImglyRemover::new(ModelSource::Downloaded(model_id)).map_err(|e| e.to_string())?;
    tracing::info!("Using model {}", remover.model_name());
    Ok(Arc::new(remover))
}

/// Wraps the shutdown signal so the gate closes as soon as it fires. Requests
/// still queued for capacity then get 503 instead of waiting out the drain.
fn close_gate_on(
    gate: AdmissionGate,
    signal: impl Future<Output = ()>,
) -> impl Future<Output = ()> {
    async move {
        signal.await;
        gate.close();
        tracing::info!(
            "Admission gate closed, draining {} in-flight removal(s)",
            gate.in_flight()
        );
    }
}

#[tokio::main]
async fn main() {
    // Parse command line args and environment variables
    let config = AppConfig::parse();

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting bg-removal-server...");

    let temp_dir = config
        .temp_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("bg-removal-server"));

    let temp_files = match TempFileManager::new(&temp_dir) {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!(
                "FATAL: Failed to prepare temp dir {}: {}",
                temp_dir.display(),
                e
            );
            eprintln!("FATAL: Could not prepare temp dir. Error: {}. Exiting.", e);
            std::process::exit(1);
        }
    };

    let swept = temp_files.sweep();
    if swept > 0 {
        tracing::warn!("Removed {} stale artifact(s) from previous runs", swept);
    }
    tracing::info!("Artifacts will be written to {}", temp_files.dir().display());

    let remover = match create_remover(&config).await {
        Ok(remover) => remover,
        Err(e) => {
            tracing::error!("FATAL: Failed to prepare background remover: {}", e);
            eprintln!("FATAL: Could not prepare background remover. Error: {}. Exiting.", e);
            std::process::exit(1);
        }
    };

    let gate = AdmissionGate::new(config.max_concurrency);
    tracing::info!(
        "Admission gate allows {} concurrent removal(s)",
        gate.capacity()
    );

    let state = Arc::new(AppState {
        gate: gate.clone(),
        temp_files: temp_files.clone(),
        remover,
        removal_timeout: Duration::from_secs(config.removal_timeout_secs),
        max_upload_bytes: config.max_upload_bytes,
    });

    let app = create_app(state);
    tracing::info!("Axum router configured.");

    // --- Start HTTP Server ---
    let listener = match create_listener(&config.host, config.port).await {
        Ok((addr, l)) => {
            tracing::info!("Server successfully bound. Listening on {}", addr);
            l
        }
        Err(e) => {
            tracing::error!("FATAL: Failed to bind server: {}", e);
            eprintln!("FATAL: Could not bind server. Error: {}. Exiting.", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(close_gate_on(gate.clone(), shutdown_signal()))
        .await
    {
        tracing::error!("Server run error: {}", e);
        eprintln!("ERROR: Server shut down unexpectedly. Error: {}", e);
    }

    // Covers a serve error, where the signal never fired.
    gate.close();
    let swept = temp_files.sweep();
    if swept > 0 {
        tracing::info!("Removed {} leftover artifact(s)", swept);
    }

    tracing::info!("bg-removal-server has shut down.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::try_parse_from(["bg-removal-server"]).unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.removal_timeout_secs, 300);
        assert!(config.temp_dir.is_none());
        assert_eq!(config.remover, RemoverKind::Model);
    }

    #[test]
    fn test_remover_selection_flags() {
        let config =
            AppConfig::try_parse_from(["bg-removal-server", "--remover", "color-key"]).unwrap();
        assert_eq!(config.remover, RemoverKind::ColorKey);

        assert!(AppConfig::try_parse_from(["bg-removal-server", "--remover", "magic"]).is_err());
    }

    #[tokio::test]
    async fn test_color_key_remover_needs_no_model() {
        let config =
            AppConfig::try_parse_from(["bg-removal-server", "--remover", "color-key"]).unwrap();
        assert!(create_remover(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_gate() {
        let gate = AdmissionGate::new(1);
        let held = gate.acquire().await.unwrap();

        close_gate_on(gate.clone(), std::future::ready(())).await;

        assert!(gate.acquire().await.is_err());
        drop(held);
        assert!(gate.acquire().await.is_err());
    }

    #[test]
    fn test_host_flag_without_value_means_all_interfaces() {
        let config = AppConfig::try_parse_from(["bg-removal-server", "--host"]).unwrap();
        assert_eq!(config.host, "*");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(AppConfig::try_parse_from(["bg-removal-server", "--max-concurrency", "0"]).is_err());
        let config =
            AppConfig::try_parse_from(["bg-removal-server", "--max-concurrency", "8"]).unwrap();
        assert_eq!(config.max_concurrency, 8);
    }
}
