//! Configuration loading from the process environment.

use thiserror::Error;

use crate::config::schema::Settings;
use crate::config::validation::{
    parse_bool, parse_log_level, parse_path, parse_port, parse_size, parse_string, parse_timeout,
    parse_url, ValidationError,
};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),
}

impl ConfigError {
    /// Every rejected variable.
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            ConfigError::Invalid(errors) => errors,
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    ///
    /// Every variable is parsed even after a failure so the returned error
    /// lists every problem at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let mut env = EnvReader {
            lookup,
            errors: Vec::new(),
        };

        let port = env.get("PORT", parse_port, defaults.port);
        let health_endpoint = env.get("HEALTH_ENDPOINT", parse_path, defaults.health_endpoint);
        let log_level = env.get("LOG_LEVEL", parse_log_level, defaults.log_level);
        let shutdown_timeout = env.get(
            "SHUTDOWN_TIMEOUT_DURATION",
            parse_timeout,
            defaults.shutdown_timeout,
        );
        let service_name = env.get("SERVICE_NAME", parse_string, defaults.service_name);
        let service_version = env.get("SERVICE_VERSION", parse_string, defaults.service_version);
        let otel_enabled = env.get("OTEL_ENABLED", parse_bool, defaults.otel_enabled);
        let otel_exporter_otlp_endpoint = env.get(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            |v| parse_url(v).map(Some),
            defaults.otel_exporter_otlp_endpoint,
        );
        let max_allowed_request_bytes = env.get(
            "MAX_ALLOWED_REQUEST_BYTES",
            parse_size,
            defaults.max_allowed_request_bytes,
        );

        if !env.errors.is_empty() {
            return Err(ConfigError::Invalid(env.errors));
        }

        Ok(Settings {
            port,
            health_endpoint,
            log_level,
            shutdown_timeout,
            service_name,
            service_version,
            otel_enabled,
            otel_exporter_otlp_endpoint,
            max_allowed_request_bytes,
        })
    }
}

/// Reads variables and accumulates parse failures.
struct EnvReader<F> {
    lookup: F,
    errors: Vec<ValidationError>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get<T>(&mut self, key: &str, parse: impl Fn(&str) -> Result<T, String>, default: T) -> T {
        let Some(raw) = (self.lookup)(key) else {
            return default;
        };
        match parse(&raw) {
            Ok(value) => value,
            Err(message) => {
                self.errors.push(ValidationError::new(key, message));
                default
            }
        }
    }
}
