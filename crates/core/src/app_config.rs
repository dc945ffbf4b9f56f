use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Default directory scanned for migrations
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Default name of the control table inside the target database
pub const DEFAULT_MIGRATIONS_TABLE: &str = "_schema_migrations";

/// Configuration trait for environment-driven configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvVar(String),
    Default(String),
    /// Passed in directly, e.g. a command-line flag
    Explicit(String),
}

/// Connection and migration source settings
#[derive(Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub auth_token: String,
    pub migrations_dir: PathBuf,
    pub migrations_table: String,
    database_url_source: ConfigSource,
    auth_token_source: ConfigSource,
    migrations_dir_source: ConfigSource,
    migrations_table_source: ConfigSource,
}

// The auth token never goes through Debug.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("database_url", &mask_url_password(&self.database_url))
            .field("auth_token", &"***")
            .field("migrations_dir", &self.migrations_dir)
            .field("migrations_table", &self.migrations_table)
            .finish()
    }
}

impl DatabaseConfig {
    /// Build a configuration from explicit values, bypassing the environment
    pub fn new(database_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth_token: auth_token.into(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            database_url_source: ConfigSource::Explicit("database_url".to_string()),
            auth_token_source: ConfigSource::Explicit("auth_token".to_string()),
            migrations_dir_source: ConfigSource::Default(DEFAULT_MIGRATIONS_DIR.to_string()),
            migrations_table_source: ConfigSource::Default(DEFAULT_MIGRATIONS_TABLE.to_string()),
        }
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self.migrations_dir_source = ConfigSource::Explicit("migrations_dir".to_string());
        self
    }

    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self.migrations_table_source = ConfigSource::Explicit("migrations_table".to_string());
        self
    }

    /// Load from the environment, letting explicit values win over
    /// `DATABASE_URL` and `DATABASE_AUTH_TOKEN`
    pub fn from_env_with_overrides(
        database_url: Option<String>,
        auth_token: Option<String>,
    ) -> Result<Self, ConfigError> {
        let (database_url, database_url_source) = match database_url {
            Some(url) => (url, ConfigSource::Explicit("database_url".to_string())),
            None => (
                get_env_required("DATABASE_URL")?,
                ConfigSource::EnvVar("DATABASE_URL".to_string()),
            ),
        };
        let (auth_token, auth_token_source) = match auth_token {
            Some(token) => (token, ConfigSource::Explicit("auth_token".to_string())),
            None => (
                get_env_required("DATABASE_AUTH_TOKEN")?,
                ConfigSource::EnvVar("DATABASE_AUTH_TOKEN".to_string()),
            ),
        };

        let (migrations_dir, migrations_dir_source) =
            get_env_with_source("MIGRATIONS_DIR", DEFAULT_MIGRATIONS_DIR);
        let (migrations_table, migrations_table_source) =
            get_env_with_source("MIGRATIONS_TABLE", DEFAULT_MIGRATIONS_TABLE);

        Ok(DatabaseConfig {
            database_url,
            auth_token,
            migrations_dir: PathBuf::from(migrations_dir),
            migrations_table,
            database_url_source,
            auth_token_source,
            migrations_dir_source,
            migrations_table_source,
        })
    }

    /// Database URL with any embedded password replaced, safe for display
    pub fn display_url(&self) -> String {
        mask_url_password(&self.database_url)
    }
}

impl AppConfigTrait for DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_overrides(None, None)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                var: "DATABASE_URL".to_string(),
            });
        }

        let parsed = url::Url::parse(&self.database_url).map_err(|e| ConfigError::InvalidValue {
            field: "database_url".to_string(),
            value: mask_url_password(&self.database_url),
            expected: format!("a valid connection URL ({})", e),
        })?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: parsed.scheme().to_string(),
                expected: "postgres:// or postgresql:// scheme".to_string(),
            });
        }

        if self.auth_token.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                var: "DATABASE_AUTH_TOKEN".to_string(),
            });
        }

        validate_identifier("migrations_table", &self.migrations_table)?;

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert("database_url".to_string(), self.database_url_source.clone());
        sources.insert("auth_token".to_string(), self.auth_token_source.clone());
        sources.insert(
            "migrations_dir".to_string(),
            self.migrations_dir_source.clone(),
        );
        sources.insert(
            "migrations_table".to_string(),
            self.migrations_table_source.clone(),
        );
        sources
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: "format".to_string(),
                value: s.to_string(),
                expected: "compact, pretty, or json".to_string(),
            }),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl AppConfigTrait for LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let level = get_env_or_default("LOG_LEVEL", "info");
        let format = get_env_or_default("LOG_FORMAT", "compact").parse()?;

        Ok(LoggingConfig { level, format })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "level".to_string(),
                value: self.level.clone(),
                expected: "trace, debug, info, warn, or error".to_string(),
            });
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "level".to_string(),
            ConfigSource::EnvVar("LOG_LEVEL".to_string()),
        );
        sources.insert(
            "format".to_string(),
            ConfigSource::EnvVar("LOG_FORMAT".to_string()),
        );
        sources
    }
}

/// Replace the password component of a URL with `***`
pub fn mask_url_password(raw: &str) -> String {
    url::Url::parse(raw)
        .map(|mut url| {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        })
        .unwrap_or_else(|_| "***".to_string())
}

/// Accept only plain SQL identifiers: a letter or underscore followed by
/// letters, digits or underscores.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if !valid || value.len() > 63 {
        return Err(ConfigError::ValidationFailed {
            field: field.to_string(),
            reason: format!("'{}' is not a plain SQL identifier", value),
        });
    }

    Ok(())
}

fn get_env_required(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar {
            var: key.to_string(),
        }),
    }
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_with_source(key: &str, default: &str) -> (String, ConfigSource) {
    match env::var(key) {
        Ok(value) => (value, ConfigSource::EnvVar(key.to_string())),
        Err(_) => (default.to_string(), ConfigSource::Default(default.to_string())),
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}
