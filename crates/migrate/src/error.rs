//! Error types for the migration engine
//!
//! `ClientError` describes failures reported by a database client;
//! `MigrateError` classifies failures of a migration run.

use std::path::PathBuf;
use tern_core::ConfigError;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Result type alias for database client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by a `MigrationClient` implementation
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not open or keep a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// A standalone statement or query failed
    #[error("Query error: {0}")]
    Query(String),

    /// Beginning, committing or rolling back a transaction failed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A statement inside an atomic batch failed; `index` is zero-based
    #[error("Statement {index} failed: {message}")]
    Statement { index: usize, message: String },

    /// A column value could not be converted
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Errors raised by a migration run
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Required connection inputs are absent or invalid; raised before any I/O
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A migration file exists but could not be read
    #[error("Failed to read migration source {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ledger bootstrap, introspection, reset or ledger maintenance failed
    #[error("Database error while {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: ClientError,
    },

    /// The atomic batch of a migration failed; nothing from it persisted.
    /// `applied` lists the migrations this run committed before it.
    #[error("Migration {migration} failed: {source}")]
    MigrationFailed {
        migration: String,
        applied: Vec<String>,
        #[source]
        source: ClientError,
    },
}

impl MigrateError {
    pub(crate) fn database(context: impl Into<String>, source: ClientError) -> Self {
        MigrateError::Database {
            context: context.into(),
            source,
        }
    }

    /// Name of the migration that failed, when the failure belongs to one
    pub fn migration(&self) -> Option<&str> {
        match self {
            MigrateError::MigrationFailed { migration, .. } => Some(migration),
            _ => None,
        }
    }

    /// Migrations committed by the run before it failed
    pub fn applied_before_failure(&self) -> &[String] {
        match self {
            MigrateError::MigrationFailed { applied, .. } => applied,
            _ => &[],
        }
    }
}

impl From<sqlx::Error> for ClientError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => ClientError::Connection(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ClientError::Decode(err.to_string())
            }
            other => ClientError::Query(other.to_string()),
        }
    }
}
