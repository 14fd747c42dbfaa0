//! Configuration validation.

use thiserror::Error;
use tracing::debug;
use viitjee_api::validate_base_url;

use super::AppConfig;

/// Validate the entire client configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_base_url(&config.api.base_url).map_err(|error| ConfigError::InvalidBaseUrl {
        reason: error.to_string(),
    })?;

    if let Some(path) = config.api.health_path.as_deref()
        && !path.starts_with('/')
    {
        return Err(ConfigError::InvalidField {
            field: "api.healthPath".to_string(),
            reason: format!("'{}' must start with '/'", path),
        });
    }

    if config.api.timeout_secs == 0 {
        return Err(ConfigError::InvalidField {
            field: "api.timeoutSecs".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    if config.query.max_entries == 0 {
        return Err(ConfigError::InvalidField {
            field: "query.maxEntries".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    debug!(base_url = %config.api.base_url, "validated client configuration");
    Ok(())
}

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{reason}")]
    InvalidBaseUrl { reason: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}
