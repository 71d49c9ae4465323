//! Tracing Subscriber Initialization
//!
//! JSON log lines to stdout, and to an append-only file when
//! `telemetry.log_file` is set. `RUST_LOG` overrides the configured filter.

use std::fs::OpenOptions;
use std::sync::Mutex;

use orderflow_core::{ConfigError, OrderflowResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TelemetryConfig;

/// Install the global subscriber. Call once at startup.
pub fn init_tracer(config: &TelemetryConfig) -> OrderflowResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ConfigError::InvalidValue {
            field: "telemetry.log_filter".to_string(),
            value: config.log_filter.clone(),
            reason: e.to_string(),
        })?;

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::FileUnreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "telemetry".to_string(),
            value: config.service_name.clone(),
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(
        service_name = %config.service_name,
        log_file = ?config.log_file,
        "Telemetry initialized"
    );
    Ok(())
}
