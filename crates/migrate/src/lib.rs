//! # tern-migrate
//!
//! Applies a directory of versioned SQL migrations to a PostgreSQL database.
//! Runs are idempotent (applied migrations are recorded in a control table),
//! atomic per migration (statements and ledger record commit together) and
//! self-healing (ledger records whose tables have disappeared are dropped so
//! the migration is applied again).
//!
//! ```rust,no_run
//! use tern_migrate::{migrate, MigrateOptions};
//!
//! # async fn example() -> tern_migrate::MigrateResult<()> {
//! let options = MigrateOptions::new("postgres://app@db.internal/app", "s3cret")
//!     .with_migrations_dir("migrations");
//! let result = migrate(options).await?;
//! println!("applied {} migration(s)", result.applied_count);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod error;
pub mod migrate;
pub mod migrations;

pub use backends::{
    MigrationClient, PostgresClient, Row, SqlValue, Statement, TableName, TableSet,
};
pub use error::*;
pub use migrate::{migrate, run_and_close, MigrateOptions};
pub use migrations::*;
