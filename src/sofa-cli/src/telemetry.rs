//! Logging setup for the sofa CLI
//!
//! - JSON formatted logs to a rotating file (daily, or every 10MB)
//! - Human-readable console output on stderr; stdout carries command output

use anyhow::Result;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use sofa_core::config::LogConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize file and console logging
///
/// Returns a guard that must be kept alive to ensure logs are flushed
pub fn init_telemetry(config: &LogConfig) -> Result<WorkerGuard> {
    // Create the log directory if it doesn't exist
    let log_dir = Path::new(&config.directory);
    std::fs::create_dir_all(log_dir)?;

    // Rolling file appender, rotated daily or at 10MB
    // Format: sofa.log.2026-02-04, numbered when a day exceeds the size cap
    let file_appender = RollingFileAppender::new(
        log_dir.join("sofa.log"),
        RollingConditionBasic::new()
            .daily()
            .max_size(10 * 1024 * 1024), // 10 MB
        9, // Keep up to 10 files per day (0-9)
    )?;

    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the configured filter
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    // JSON file layer for structured logging
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_current_span(true)
        .with_target(true)
        .with_thread_ids(true);

    // Console layer on stderr, stdout is reserved for command output
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // Combine all layers
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::debug!("Logging to {:?}", log_dir);

    Ok(guard)
}
