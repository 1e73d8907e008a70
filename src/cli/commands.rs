//! CLI command implementations
//!
//! `serve` boot sequence:
//! 1. Configuration load and validation
//! 2. Logging
//! 3. Store, clock and lineage sink
//! 4. HTTP server on a tokio runtime

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::http_server::HttpServer;
use crate::logging;
use crate::promotion::{FileLineageSink, PromotionService};
use crate::store::MemoryStore;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Main CLI entry point
///
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config, force } => init(&config, force),
        Command::Serve { config, port } => serve(&config, port),
    }
}

/// Write the default configuration to `config_path`.
pub fn init(config_path: &Path, force: bool) -> CliResult<()> {
    if config_path.exists() && !force {
        return Err(CliError::already_initialized(config_path));
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                CliError::config_error(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
    }

    let body = EngineConfig::default().to_json_pretty()?;
    fs::write(config_path, body)?;
    println!("wrote {}", config_path.display());
    Ok(())
}

/// Wire a service from configuration over an in-memory store.
pub fn build_service(config: &EngineConfig) -> CliResult<PromotionService> {
    let mut builder = PromotionService::builder(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
        .retention_days(config.snapshot_retention_days)
        .lineage_query_limit(config.lineage_query_limit);

    if let Some(path) = &config.lineage_log_path {
        let sink = FileLineageSink::open(path).map_err(|e| {
            CliError::boot_failed(format!(
                "Failed to open lineage log {}: {}",
                path.display(),
                e
            ))
        })?;
        builder = builder.lineage_sink(Arc::new(sink));
    }

    Ok(builder.build())
}

/// Load configuration and serve the promotion API until stopped.
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = EngineConfig::load(config_path)?;
    if let Some(port) = port {
        config.http.port = port;
    }

    logging::init(&config.log_filter)
        .map_err(|e| CliError::boot_failed(format!("Failed to initialize logging: {}", e)))?;

    let service = Arc::new(build_service(&config)?);
    let server = HttpServer::new(config.http.clone(), service);

    info!(
        config = %config_path.display(),
        retention_days = config.snapshot_retention_days,
        lineage_log = ?config.lineage_log_path,
        "promoter booted"
    );

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliErrorCode;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("promoter.json");

        init(&path, false).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("promoter.json");
        fs::write(&path, "{}").unwrap();

        let err = init(&path, false).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::AlreadyInitialized);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        init(&path, true).unwrap();
        assert!(EngineConfig::load(&path).is_ok());
    }

    #[test]
    fn test_build_service_with_lineage_log() {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            lineage_log_path: Some(dir.path().join("lineage.jsonl")),
            lineage_query_limit: 5,
            ..EngineConfig::default()
        };

        let service = build_service(&config).unwrap();
        assert_eq!(service.lineage().query_limit(), 5);
        assert!(dir.path().join("lineage.jsonl").exists());
    }

    #[test]
    fn test_serve_rejects_missing_config() {
        let dir = tempdir().unwrap();
        let err = serve(&dir.path().join("absent.json"), None).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
    }
}
