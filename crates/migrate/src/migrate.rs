//! Invocation entry point
//!
//! `migrate` validates its inputs, opens a `PostgresClient` for the duration
//! of one run and closes it on every exit path.

use std::path::PathBuf;

use tern_core::{AppConfigTrait, DatabaseConfig, DEFAULT_MIGRATIONS_DIR, DEFAULT_MIGRATIONS_TABLE};

use crate::backends::{MigrationClient, PostgresClient};
use crate::error::{MigrateError, MigrateResult};
use crate::migrations::{MigrationConfig, MigrationRunResult, MigrationRunner};

/// Inputs of a migration run
#[derive(Clone)]
pub struct MigrateOptions {
    pub database_url: String,
    pub auth_token: String,
    /// Drop every table before migrating
    pub force_reset: bool,
    pub migrations_dir: PathBuf,
    pub migrations_table: String,
}

impl std::fmt::Debug for MigrateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrateOptions")
            .field("database_url", &tern_core::mask_url_password(&self.database_url))
            .field("auth_token", &"***")
            .field("force_reset", &self.force_reset)
            .field("migrations_dir", &self.migrations_dir)
            .field("migrations_table", &self.migrations_table)
            .finish()
    }
}

impl MigrateOptions {
    pub fn new(database_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth_token: auth_token.into(),
            force_reset: false,
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }

    /// Build options from an environment-loaded configuration
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            database_url: config.database_url.clone(),
            auth_token: config.auth_token.clone(),
            force_reset: false,
            migrations_dir: config.migrations_dir.clone(),
            migrations_table: config.migrations_table.clone(),
        }
    }

    pub fn with_force_reset(mut self, force_reset: bool) -> Self {
        self.force_reset = force_reset;
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    /// Reject missing or malformed connection inputs
    pub fn validate(&self) -> MigrateResult<()> {
        DatabaseConfig::new(self.database_url.clone(), self.auth_token.clone())
            .with_migrations_dir(self.migrations_dir.clone())
            .with_migrations_table(self.migrations_table.clone())
            .validate()?;
        Ok(())
    }

    fn migration_config(&self) -> MigrationConfig {
        MigrationConfig {
            migrations_dir: self.migrations_dir.clone(),
            migrations_table: self.migrations_table.clone(),
        }
    }
}

/// Bring the target database up to date with the migration directory
pub async fn migrate(options: MigrateOptions) -> MigrateResult<MigrationRunResult> {
    options.validate()?;
    let runner = MigrationRunner::new(options.migration_config())?;

    tracing::info!(
        "Migrating {} from {}",
        tern_core::mask_url_password(&options.database_url),
        options.migrations_dir.display()
    );

    let mut client = PostgresClient::connect(&options.database_url, &options.auth_token)
        .await
        .map_err(|e| MigrateError::database("connecting", e))?;

    run_and_close(&runner, &mut client, options.force_reset).await
}

/// Run with an already connected client and close it afterwards, whatever
/// the outcome. A close failure is logged and never replaces the run result.
pub async fn run_and_close(
    runner: &MigrationRunner,
    client: &mut dyn MigrationClient,
    force_reset: bool,
) -> MigrateResult<MigrationRunResult> {
    let result = runner.run(client, force_reset).await;

    if let Err(e) = client.close().await {
        tracing::warn!("Failed to close database client: {}", e);
    }

    result
}
