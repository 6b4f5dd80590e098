//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize telemetry, then logging bridged into it
//! - Bind the listener and begin accepting traffic
//! - Wait for a termination signal and shut down within the deadline
//!
//! # Design Decisions
//! - Fail fast: any startup error exits with status 1
//! - Listeners start last (traffic only when ready)

use std::process::ExitCode;

use crate::config::{ConfigError, LogLevel, Settings};
use crate::http::HttpServer;
use crate::lifecycle::coordinator::Coordinator;
use crate::lifecycle::signals::await_termination;
use crate::observability::{init_logging, setup_telemetry};
use crate::security::TrustResolver;

/// Run the service to completion and report how it ended.
pub async fn run() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            report_config_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let telemetry = match setup_telemetry(&settings) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            if init_logging(settings.log_level, None).is_err() {
                eprintln!("{e}");
            } else {
                tracing::error!(err = %e, "Setting up telemetry");
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(settings.log_level, telemetry.tracer()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    log_settings(&settings);
    if settings.otel_enabled {
        tracing::info!(
            service = %settings.service_name,
            endpoint = ?settings.otel_exporter_otlp_endpoint.as_ref().map(|u| u.as_str()),
            "Telemetry enabled"
        );
    }

    let server = HttpServer::new(&settings, TrustResolver::default(), telemetry.clone());
    let mut coordinator = Coordinator::new(telemetry);
    if let Err(e) = coordinator.start(settings.bind_address(), server).await {
        tracing::error!(err = %e, "Server error");
        return ExitCode::FAILURE;
    }

    tokio::select! {
        signal = await_termination() => {
            tracing::info!(signal = %signal, "Shutdown signal received");
        }
        e = coordinator.failed() => {
            tracing::error!(err = %e, "Server error");
            return ExitCode::FAILURE;
        }
    }

    match coordinator.shutdown(settings.shutdown_timeout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

/// Configuration errors are reported before the configured logger exists.
fn report_config_error(err: &ConfigError) {
    if init_logging(LogLevel::Info, None).is_err() {
        eprintln!("{err}");
        return;
    }
    for e in err.errors() {
        tracing::error!(key = %e.key, err = %e.message, "Invalid configuration");
    }
}

fn log_settings(settings: &Settings) {
    match serde_json::to_value(settings) {
        Ok(value) => tracing::info!(settings = %value, "Configuration loaded"),
        Err(e) => tracing::warn!(err = %e, "Configuration could not be rendered"),
    }
}
