//! Client configuration.
//! This module handles parsing and validation of the
//! ~/.config/viitjee/config.json configuration file.

mod io;
mod model;
mod validation;

pub use io::{API_BASE_ENV, CONFIG_PATH_ENV, apply_env_overrides, default_config_path, load_config, load_config_from_path, read_config, read_config_from_path};
pub use model::{ApiSettings, AppConfig, QuerySettings};
pub use validation::{ConfigError, validate_config};
