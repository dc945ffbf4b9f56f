//! Migration Ledger - the control table inside the target database
//!
//! Records which migrations are active. A record is only ever created as the
//! trailing statement of its migration's atomic batch, and only ever removed
//! by the ghost-migration repair pass.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::definitions::MigrationRecord;
use crate::backends::{MigrationClient, Row, SqlValue, Statement};
use crate::error::{ClientError, ClientResult, MigrateError, MigrateResult};

/// Access to the control table
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    table: String,
}

impl MigrationLedger {
    /// The table name must already be validated as a plain identifier. It
    /// is used unquoted, so it is kept lower-cased the way the database
    /// folds it.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into().to_lowercase(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL to create the migrations tracking table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id VARCHAR(36) PRIMARY KEY,\n    \
                checksum VARCHAR(64) NOT NULL,\n    \
                finished_at TIMESTAMPTZ,\n    \
                migration_name VARCHAR(255) NOT NULL UNIQUE,\n    \
                logs TEXT,\n    \
                rolled_back_at TIMESTAMPTZ,\n    \
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    \
                applied_steps_count INTEGER NOT NULL DEFAULT 0\n\
            )",
            self.table
        )
    }

    /// SQL to list active migration names
    pub fn active_names_sql(&self) -> String {
        format!(
            "SELECT migration_name FROM {} WHERE rolled_back_at IS NULL ORDER BY migration_name",
            self.table
        )
    }

    /// SQL to list every record
    pub fn records_sql(&self) -> String {
        format!(
            "SELECT id, checksum, migration_name, started_at, finished_at, applied_steps_count, rolled_back_at \
             FROM {} ORDER BY migration_name",
            self.table
        )
    }

    /// Issue the idempotent bootstrap
    pub async fn ensure(&self, client: &mut dyn MigrationClient) -> MigrateResult<()> {
        client
            .execute(&Statement::new(self.create_table_sql()))
            .await
            .map_err(|e| MigrateError::database("creating the migrations table", e))?;
        Ok(())
    }

    /// Whether the control table exists in the current schema, without
    /// creating it
    pub async fn exists(&self, client: &mut dyn MigrationClient) -> MigrateResult<bool> {
        let tables = client
            .list_tables()
            .await
            .map_err(|e| MigrateError::database("listing tables", e))?;
        Ok(tables.contains_current(&self.table))
    }

    /// Names of migrations whose record is not rolled back
    pub async fn active_names(
        &self,
        client: &mut dyn MigrationClient,
    ) -> MigrateResult<BTreeSet<String>> {
        let rows = client
            .fetch_all(&Statement::new(self.active_names_sql()))
            .await
            .map_err(|e| MigrateError::database("reading applied migrations", e))?;

        rows.iter()
            .map(|row| row.get_string("migration_name"))
            .collect::<ClientResult<BTreeSet<_>>>()
            .map_err(|e| MigrateError::database("reading applied migrations", e))
    }

    /// Every record in name order
    pub async fn records(
        &self,
        client: &mut dyn MigrationClient,
    ) -> MigrateResult<Vec<MigrationRecord>> {
        let rows = client
            .fetch_all(&Statement::new(self.records_sql()))
            .await
            .map_err(|e| MigrateError::database("reading migration records", e))?;

        rows.iter()
            .map(record_from_row)
            .collect::<ClientResult<Vec<_>>>()
            .map_err(|e| MigrateError::database("reading migration records", e))
    }

    /// Insert statement for one applied migration. Only ever appended to the
    /// migration's own batch, after its last statement, so `finished_at` is
    /// stamped by the database once every statement has run.
    pub fn record_statement(
        &self,
        id: &str,
        checksum: &str,
        migration_name: &str,
        started_at: DateTime<Utc>,
        applied_steps_count: usize,
    ) -> ClientResult<Statement> {
        let steps = i32::try_from(applied_steps_count).map_err(|_| {
            ClientError::Decode(format!(
                "{} statements do not fit applied_steps_count",
                applied_steps_count
            ))
        })?;

        Ok(Statement::with_params(
            format!(
                "INSERT INTO {} (id, checksum, migration_name, started_at, finished_at, applied_steps_count) \
                 VALUES ($1, $2, $3, $4, clock_timestamp(), $5)",
                self.table
            ),
            vec![
                SqlValue::from(id),
                SqlValue::from(checksum),
                SqlValue::from(migration_name),
                SqlValue::from(started_at),
                SqlValue::from(steps),
            ],
        ))
    }

    /// Hard delete a record by migration name
    pub async fn delete(
        &self,
        client: &mut dyn MigrationClient,
        migration_name: &str,
    ) -> MigrateResult<u64> {
        let statement = Statement::with_params(
            format!("DELETE FROM {} WHERE migration_name = $1", self.table),
            vec![SqlValue::from(migration_name)],
        );
        client
            .execute(&statement)
            .await
            .map_err(|e| MigrateError::database(format!("deleting ledger record {}", migration_name), e))
    }
}

fn record_from_row(row: &Row) -> ClientResult<MigrationRecord> {
    Ok(MigrationRecord {
        id: row.get_string("id")?,
        checksum: row.get_string("checksum")?,
        migration_name: row.get_string("migration_name")?,
        started_at: row.get_optional_datetime("started_at")?,
        finished_at: row.get_optional_datetime("finished_at")?,
        applied_steps_count: row.get_i64("applied_steps_count")?,
        rolled_back_at: row.get_optional_datetime("rolled_back_at")?,
    })
}
