//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system including
//! MigrationFile, MigrationRecord, and MigrationConfig structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use tern_core::{DEFAULT_MIGRATIONS_DIR, DEFAULT_MIGRATIONS_TABLE};

/// Name of the SQL file expected inside each migration directory
pub const MIGRATION_FILE_NAME: &str = "migration.sql";

/// A migration as read from the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Unique, sortable identifier (the migration directory name)
    pub name: String,
    /// Raw SQL text
    pub sql: String,
}

impl MigrationFile {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Row of the control table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    /// SHA-256 of the migration SQL at apply time
    pub checksum: String,
    pub migration_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub applied_steps_count: i64,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    /// A record counts as applied while it is not marked rolled back
    pub fn is_active(&self) -> bool {
        self.rolled_back_at.is_none()
    }
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration directories are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migrations_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }
}

/// Result of running migrations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Names of migrations that were applied, in order
    pub applied_migrations: Vec<String>,
    /// Number of migrations that were already active
    pub skipped_count: usize,
    /// Ledger records deleted by the ghost-migration repair pass
    pub repaired_migrations: Vec<String>,
    /// Tables dropped by a forced reset
    pub reset_tables: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        finished_at: Option<DateTime<Utc>>,
        applied_steps: i64,
        /// False when the file changed after it was applied
        checksum_matches: bool,
    },
    /// Active ledger record whose migration is no longer in the source
    Missing,
}

/// One line of a status report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatusEntry {
    pub name: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}
