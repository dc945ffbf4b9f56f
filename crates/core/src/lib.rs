//! # tern-core
//!
//! Environment-driven configuration and logging bootstrap shared by the
//! migration engine and the `tern` CLI.

pub mod app_config;
pub mod logging;

pub use app_config::{
    mask_url_password, validate_identifier, AppConfigTrait, ConfigError, ConfigSource,
    DatabaseConfig, LogFormat, LoggingConfig, DEFAULT_MIGRATIONS_DIR, DEFAULT_MIGRATIONS_TABLE,
};
pub use logging::{init_logging, LoggingError};
