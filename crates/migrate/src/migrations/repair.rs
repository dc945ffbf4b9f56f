//! Ghost-migration repair
//!
//! A ledger record can outlive the schema it describes (manual drops,
//! partial restores). Such a record would make the runner skip its
//! migration forever. Before diffing, every active migration that declares
//! tables via `CREATE TABLE` is checked against the live table list; if any
//! of its tables is gone, the record is deleted so the migration is applied
//! again. Reapplying is only safe for migrations written with idempotent DDL
//! (`IF NOT EXISTS` and friends); nothing here enforces that.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::definitions::MigrationFile;
use super::ledger::MigrationLedger;
use crate::backends::{MigrationClient, TableName};
use crate::error::{MigrateError, MigrateResult};

static CREATE_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bcreate\s+(?:unlogged\s+)?table\s+(?:if\s+not\s+exists\s+)?(?:(?:"(?P<qschema>[^"]+)"|(?P<schema>\w+))\s*\.\s*)?(?:"(?P<qtable>[^"]+)"|(?P<table>\w+))"#,
    )
    .expect("CREATE TABLE pattern is valid")
});

/// Tables created by `CREATE TABLE [IF NOT EXISTS] [<schema>.]<name>`
/// anywhere in the text. Unqualified names land in `default_schema`.
/// Unquoted identifiers are lower-cased and quoted ones kept as written,
/// matching how the catalog stores them.
pub fn expected_tables(sql: &str, default_schema: &str) -> BTreeSet<TableName> {
    CREATE_TABLE_RE
        .captures_iter(sql)
        .filter_map(|caps| {
            let name = identifier(&caps, "qtable", "table")?;
            let schema =
                identifier(&caps, "qschema", "schema").unwrap_or_else(|| default_schema.to_string());
            Some(TableName::new(schema, name))
        })
        .collect()
}

fn identifier(caps: &Captures<'_>, quoted: &str, bare: &str) -> Option<String> {
    caps.name(quoted)
        .map(|m| m.as_str().to_string())
        .or_else(|| caps.name(bare).map(|m| m.as_str().to_lowercase()))
}

/// Delete ledger records of active migrations whose tables are missing.
///
/// Removes the repaired names from `active` and returns them.
pub async fn repair_ghost_migrations(
    client: &mut dyn MigrationClient,
    ledger: &MigrationLedger,
    active: &mut BTreeSet<String>,
    migrations: &[MigrationFile],
) -> MigrateResult<Vec<String>> {
    if active.is_empty() {
        return Ok(Vec::new());
    }

    let live = client
        .list_tables()
        .await
        .map_err(|e| MigrateError::database("listing tables for repair", e))?;

    let sources: HashMap<&str, &str> = migrations
        .iter()
        .map(|m| (m.name.as_str(), m.sql.as_str()))
        .collect();

    let mut repaired = Vec::new();
    for name in active.iter() {
        let Some(sql) = sources.get(name.as_str()) else {
            tracing::debug!("Active migration {} has no source file, not verifying", name);
            continue;
        };

        let missing: Vec<String> = expected_tables(sql, &live.current_schema)
            .into_iter()
            .filter(|table| !live.contains(table))
            .map(|table| table.to_string())
            .collect();

        if missing.is_empty() {
            continue;
        }

        tracing::warn!(
            migration = %name,
            missing_tables = ?missing,
            "Ghost migration detected; removing ledger record so it is applied again"
        );
        ledger.delete(client, name).await?;
        repaired.push(name.clone());
    }

    for name in &repaired {
        active.remove(name);
    }

    Ok(repaired)
}
