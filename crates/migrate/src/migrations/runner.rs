//! Migration Runner - Executes migrations against the database
//!
//! One run walks `optional reset -> ledger bootstrap -> ghost repair ->
//! pending diff -> apply loop`. Each pending migration is submitted as a
//! single atomic batch whose last statement inserts its ledger record, so a
//! record exists exactly when all of the migration's statements committed.
//! The first failing batch ends the run.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

use super::checksum::{checksum, new_record_id};
use super::definitions::{
    MigrationConfig, MigrationFile, MigrationRunResult, MigrationStatus, MigrationStatusEntry,
};
use super::ledger::MigrationLedger;
use super::repair::repair_ghost_migrations;
use super::source::{DirectorySource, MigrationSource};
use super::splitter::split_statements;
use crate::backends::{MigrationClient, Statement};
use crate::error::{ClientResult, MigrateError, MigrateResult};

/// Migration runner that executes migrations against a database
pub struct MigrationRunner {
    source: Box<dyn MigrationSource>,
    ledger: MigrationLedger,
}

impl MigrationRunner {
    /// Create a runner reading from `config.migrations_dir`
    pub fn new(config: MigrationConfig) -> MigrateResult<Self> {
        let source = DirectorySource::new(config.migrations_dir.clone());
        Self::with_source(config, Box::new(source))
    }

    /// Create a runner with an explicit migration source
    pub fn with_source(
        config: MigrationConfig,
        source: Box<dyn MigrationSource>,
    ) -> MigrateResult<Self> {
        tern_core::validate_identifier("migrations_table", &config.migrations_table)?;

        Ok(Self {
            source,
            ledger: MigrationLedger::new(config.migrations_table),
        })
    }

    /// Get the ledger
    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    /// Apply all pending migrations.
    ///
    /// With `force_reset` every table of the current schema is dropped first.
    /// Never pass it implicitly: it destroys data.
    pub async fn run(
        &self,
        client: &mut dyn MigrationClient,
        force_reset: bool,
    ) -> MigrateResult<MigrationRunResult> {
        let start_time = std::time::Instant::now();

        let reset_tables = if force_reset {
            self.reset(client).await?
        } else {
            Vec::new()
        };

        self.ledger.ensure(client).await?;

        let migrations = self.source.load()?;
        tracing::debug!(
            "Loaded {} migration(s) from {}",
            migrations.len(),
            self.source.describe()
        );

        let mut active = self.ledger.active_names(client).await?;
        let repaired_migrations =
            repair_ghost_migrations(client, &self.ledger, &mut active, &migrations).await?;

        let pending: Vec<&MigrationFile> = migrations
            .iter()
            .filter(|m| !active.contains(&m.name))
            .collect();

        let skipped_count = migrations.len() - pending.len();
        let mut applied_migrations = Vec::new();

        for migration in pending {
            match self.apply_migration(client, migration).await {
                Ok(true) => applied_migrations.push(migration.name.clone()),
                Ok(false) => {}
                Err(source) => {
                    tracing::error!("Migration {} failed: {}", migration.name, source);
                    return Err(MigrateError::MigrationFailed {
                        migration: migration.name.clone(),
                        applied: applied_migrations,
                        source,
                    });
                }
            }
        }

        let result = MigrationRunResult {
            applied_count: applied_migrations.len(),
            applied_migrations,
            skipped_count,
            repaired_migrations,
            reset_tables,
            execution_time_ms: start_time.elapsed().as_millis(),
        };

        tracing::info!(
            applied = result.applied_count,
            skipped = result.skipped_count,
            repaired = result.repaired_migrations.len(),
            "Migration run finished in {} ms",
            result.execution_time_ms
        );

        Ok(result)
    }

    /// Apply one migration as an atomic batch. Returns `false` when the
    /// migration has no statements and was skipped without a ledger record.
    async fn apply_migration(
        &self,
        client: &mut dyn MigrationClient,
        migration: &MigrationFile,
    ) -> ClientResult<bool> {
        let started_at = Utc::now();
        let statements = split_statements(&migration.sql);

        if statements.is_empty() {
            tracing::info!("Migration {} contains no statements, skipping", migration.name);
            return Ok(false);
        }

        let step_count = statements.len();
        let mut batch: Vec<Statement> = statements.into_iter().map(Statement::new).collect();
        batch.push(self.ledger.record_statement(
            &new_record_id(),
            &checksum(&migration.sql),
            &migration.name,
            started_at,
            step_count,
        )?);

        client.batch(&batch).await?;

        tracing::info!("Applied migration {} ({} statements)", migration.name, step_count);
        Ok(true)
    }

    /// Drop every table of the current schema. Other schemas are left alone.
    async fn reset(&self, client: &mut dyn MigrationClient) -> MigrateResult<Vec<String>> {
        let live = client
            .list_tables()
            .await
            .map_err(|e| MigrateError::database("listing tables for reset", e))?;

        let tables: Vec<_> = live.current_schema_tables().cloned().collect();
        tracing::warn!(
            schema = %live.current_schema,
            "Force reset: dropping {} table(s)",
            tables.len()
        );

        for table in &tables {
            let statement = Statement::new(format!(
                "DROP TABLE IF EXISTS {}.{} CASCADE",
                quote_identifier(&table.schema),
                quote_identifier(&table.name)
            ));
            client
                .execute(&statement)
                .await
                .map_err(|e| MigrateError::database(format!("dropping table {}", table), e))?;
        }

        Ok(tables.into_iter().map(|t| t.name).collect())
    }

    /// Compare the source with the ledger without changing anything
    pub async fn status(
        &self,
        client: &mut dyn MigrationClient,
    ) -> MigrateResult<Vec<MigrationStatusEntry>> {
        let migrations = self.source.load()?;

        let records = if self.ledger.exists(client).await? {
            self.ledger.records(client).await?
        } else {
            Vec::new()
        };

        let mut active: BTreeMap<String, _> = records
            .into_iter()
            .filter(|r| r.is_active())
            .map(|r| (r.migration_name.clone(), r))
            .collect();

        let mut entries = Vec::with_capacity(migrations.len());
        for migration in &migrations {
            let status = match active.remove(&migration.name) {
                Some(record) => MigrationStatus::Applied {
                    finished_at: record.finished_at,
                    applied_steps: record.applied_steps_count,
                    checksum_matches: record.checksum == checksum(&migration.sql),
                },
                None => MigrationStatus::Pending,
            };
            entries.push(MigrationStatusEntry {
                name: migration.name.clone(),
                status,
            });
        }

        entries.extend(active.into_keys().map(|name| MigrationStatusEntry {
            name,
            status: MigrationStatus::Missing,
        }));
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }

    /// Names present in the source but not active in the ledger
    pub async fn pending(&self, client: &mut dyn MigrationClient) -> MigrateResult<Vec<String>> {
        let active: BTreeSet<String> = if self.ledger.exists(client).await? {
            self.ledger.active_names(client).await?
        } else {
            BTreeSet::new()
        };

        Ok(self
            .source
            .load()?
            .into_iter()
            .filter(|m| !active.contains(&m.name))
            .map(|m| m.name)
            .collect())
    }
}

/// Double-quote an identifier, doubling embedded quotes
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let config = MigrationConfig {
            migrations_table: "bad name".to_string(),
            ..MigrationConfig::default()
        };

        assert!(matches!(
            MigrationRunner::new(config),
            Err(MigrateError::Config(_))
        ));
    }
}
