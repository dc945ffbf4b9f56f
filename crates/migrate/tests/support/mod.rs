//! In-memory `MigrationClient` for driving the runner without a database.
//!
//! Understands just enough SQL for migration tests: CREATE SCHEMA,
//! CREATE FUNCTION, CREATE/DROP/ALTER TABLE, CREATE INDEX, INSERT, SELECT
//! and DELETE against the control table. Any other statement fails like a
//! syntax error would. Table references may be schema-qualified. Unquoted
//! identifiers fold to lower case and quoted ones keep their case, the way
//! Postgres stores them. Unqualified names resolve to `public`. Batches run
//! against a copy of the state that only replaces the real state when every
//! statement succeeded.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tern_core::DEFAULT_MIGRATIONS_TABLE;
use tern_migrate::{
    ClientError, MigrationClient, Row, SqlValue, Statement, TableName, TableSet,
    MIGRATION_FILE_NAME,
};

pub const CURRENT_SCHEMA: &str = "public";

/// `[schema.]table`, each part quoted or bare
const TABLE_REF: &str =
    r#"(?:(?:"(?P<qschema>[^"]+)"|(?P<schema>\w+))\s*\.\s*)?(?:"(?P<qtable>[^"]+)"|(?P<table>\w+))"#;

fn statement_re(prefix: &str) -> Regex {
    Regex::new(&format!(r"(?is)^{}{}", prefix, TABLE_REF)).unwrap()
}

static CREATE_SCHEMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^create\s+schema\s+(?P<guard>if\s+not\s+exists\s+)?(?:"(?P<qtable>[^"]+)"|(?P<table>\w+))"#)
        .unwrap()
});
static CREATE_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^create\s+(?:or\s+replace\s+)?function\s").unwrap());
static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    statement_re(r"create\s+(?:unlogged\s+)?table\s+(?P<guard>if\s+not\s+exists\s+)?")
});
static DROP_TABLE: Lazy<Regex> =
    Lazy::new(|| statement_re(r"drop\s+table\s+(?P<guard>if\s+exists\s+)?"));
static ALTER_TABLE: Lazy<Regex> = Lazy::new(|| statement_re(r"alter\s+table\s+"));
static CREATE_INDEX: Lazy<Regex> =
    Lazy::new(|| statement_re(r"create\s+(?:unique\s+)?index\s+\w+\s+on\s+"));
static INSERT_INTO: Lazy<Regex> = Lazy::new(|| statement_re(r"insert\s+into\s+"));
static SELECT_FROM: Lazy<Regex> = Lazy::new(|| statement_re(r"select\s+.+?\s+from\s+"));
static DELETE_FROM: Lazy<Regex> = Lazy::new(|| statement_re(r"delete\s+from\s+"));

fn identifier(caps: &Captures<'_>, quoted: &str, bare: &str) -> Option<String> {
    caps.name(quoted)
        .map(|m| m.as_str().to_string())
        .or_else(|| caps.name(bare).map(|m| m.as_str().to_lowercase()))
}

fn table_ref(caps: &Captures<'_>) -> TableName {
    let schema =
        identifier(caps, "qschema", "schema").unwrap_or_else(|| CURRENT_SCHEMA.to_string());
    let name = identifier(caps, "qtable", "table").unwrap_or_default();
    TableName::new(schema, name)
}

/// A ledger row as the fake stores it
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub id: String,
    pub checksum: String,
    pub migration_name: String,
    pub started_at: SqlValue,
    pub finished_at: SqlValue,
    pub applied_steps_count: i64,
    pub rolled_back_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct MemoryState {
    pub schemas: BTreeSet<String>,
    /// User tables and the raw INSERT statements applied to them
    pub tables: BTreeMap<TableName, Vec<String>>,
    /// Control table rows, present once the control table exists
    pub ledger: Option<Vec<LedgerRow>>,
    pub functions: usize,
    /// Every statement that committed, in order
    pub committed: Vec<String>,
    pub batches: usize,
    pub closed: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            schemas: BTreeSet::from([CURRENT_SCHEMA.to_string()]),
            tables: BTreeMap::new(),
            ledger: None,
            functions: 0,
            committed: Vec::new(),
            batches: 0,
            closed: false,
        }
    }
}

impl MemoryState {
    /// Tables of the current schema by catalog name
    pub fn table_names(&self) -> BTreeSet<String> {
        self.tables
            .keys()
            .filter(|t| t.schema == CURRENT_SCHEMA)
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn ledger_rows(&self) -> Vec<LedgerRow> {
        self.ledger.clone().unwrap_or_default()
    }

    pub fn active_names(&self) -> Vec<String> {
        self.ledger_rows()
            .into_iter()
            .filter(|r| r.rolled_back_at.is_none())
            .map(|r| r.migration_name)
            .collect()
    }
}

#[derive(Clone)]
pub struct MemoryClient {
    ledger_table: TableName,
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::with_ledger_table(DEFAULT_MIGRATIONS_TABLE)
    }

    /// The runner names its control table unquoted, so it lands folded
    pub fn with_ledger_table(table: &str) -> Self {
        Self {
            ledger_table: TableName::new(CURRENT_SCHEMA, table.to_lowercase()),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// `schema.name` or a bare name in the current schema, as stored
    fn catalog_name(table: &str) -> TableName {
        match table.split_once('.') {
            Some((schema, name)) => TableName::new(schema, name),
            None => TableName::new(CURRENT_SCHEMA, table),
        }
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(&Self::catalog_name(table))
    }

    /// Create a table behind the runner's back
    pub fn create_table(&self, table: &str) {
        let table = Self::catalog_name(table);
        let mut state = self.state();
        state.schemas.insert(table.schema.clone());
        state.tables.insert(table, Vec::new());
    }

    /// Drop a table behind the runner's back
    pub fn drop_table(&self, table: &str) {
        self.state().tables.remove(&Self::catalog_name(table));
    }

    pub fn rows(&self, table: &str) -> Vec<String> {
        self.state()
            .tables
            .get(&Self::catalog_name(table))
            .cloned()
            .unwrap_or_default()
    }

    fn apply(&self, state: &mut MemoryState, statement: &Statement) -> Result<Vec<Row>, String> {
        let sql = statement.sql.trim();

        if let Some(caps) = CREATE_SCHEMA.captures(sql) {
            let guarded = caps.name("guard").is_some();
            let name = identifier(&caps, "qtable", "table").unwrap_or_default();
            if !state.schemas.insert(name.clone()) && !guarded {
                return Err(format!("schema \"{}\" already exists", name));
            }
            return Ok(Vec::new());
        }

        if CREATE_FUNCTION.is_match(sql) {
            state.functions += 1;
            return Ok(Vec::new());
        }

        if let Some(caps) = CREATE_TABLE.captures(sql) {
            let guarded = caps.name("guard").is_some();
            let table = table_ref(&caps);
            if !state.schemas.contains(&table.schema) {
                return Err(format!("schema \"{}\" does not exist", table.schema));
            }
            if table == self.ledger_table {
                if state.ledger.is_none() {
                    state.ledger = Some(Vec::new());
                } else if !guarded {
                    return Err(format!("relation \"{}\" already exists", table.name));
                }
            } else if state.tables.contains_key(&table) {
                if !guarded {
                    return Err(format!("relation \"{}\" already exists", table.name));
                }
            } else {
                state.tables.insert(table, Vec::new());
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = DROP_TABLE.captures(sql) {
            let guarded = caps.name("guard").is_some();
            let table = table_ref(&caps);
            let existed = if table == self.ledger_table {
                state.ledger.take().is_some()
            } else {
                state.tables.remove(&table).is_some()
            };
            if !existed && !guarded {
                return Err(format!("table \"{}\" does not exist", table.name));
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = ALTER_TABLE
            .captures(sql)
            .or_else(|| CREATE_INDEX.captures(sql))
        {
            let table = table_ref(&caps);
            if !state.tables.contains_key(&table) {
                return Err(format!("relation \"{}\" does not exist", table));
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = INSERT_INTO.captures(sql) {
            let table = table_ref(&caps);
            if table == self.ledger_table {
                return self
                    .insert_ledger_row(state, sql, &statement.params)
                    .map(|_| Vec::new());
            }
            return match state.tables.get_mut(&table) {
                Some(rows) => {
                    rows.push(sql.to_string());
                    Ok(Vec::new())
                }
                None => Err(format!("relation \"{}\" does not exist", table)),
            };
        }

        if let Some(caps) = DELETE_FROM.captures(sql) {
            let table = table_ref(&caps);
            if table != self.ledger_table {
                return Err(format!("unsupported DELETE on {}", table));
            }
            let target = match statement.params.first() {
                Some(SqlValue::String(s)) => s.clone(),
                _ => return Err("DELETE expects a migration name".to_string()),
            };
            let ledger = state
                .ledger
                .as_mut()
                .ok_or_else(|| format!("relation \"{}\" does not exist", table))?;
            ledger.retain(|r| r.migration_name != target);
            return Ok(Vec::new());
        }

        if let Some(caps) = SELECT_FROM.captures(sql) {
            let table = table_ref(&caps);
            if table != self.ledger_table {
                return Err(format!("unsupported SELECT on {}", table));
            }
            let ledger = state
                .ledger
                .as_ref()
                .ok_or_else(|| format!("relation \"{}\" does not exist", table))?;
            let only_active = sql.to_lowercase().contains("rolled_back_at is null");
            let mut rows: Vec<&LedgerRow> = ledger
                .iter()
                .filter(|r| !only_active || r.rolled_back_at.is_none())
                .collect();
            rows.sort_by(|a, b| a.migration_name.cmp(&b.migration_name));
            return Ok(rows.into_iter().map(ledger_row_to_row).collect());
        }

        Err(format!("syntax error at or near \"{}\"", sql.split_whitespace().next().unwrap_or("")))
    }

    /// Parameters are id, checksum, name, started_at and step count;
    /// `clock_timestamp()` stamps `finished_at` at insert time.
    fn insert_ledger_row(
        &self,
        state: &mut MemoryState,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<(), String> {
        let ledger = state
            .ledger
            .as_mut()
            .ok_or_else(|| format!("relation \"{}\" does not exist", self.ledger_table))?;

        let text = |index: usize| match params.get(index) {
            Some(SqlValue::String(s)) => Ok(s.clone()),
            other => Err(format!("parameter ${} is not text: {:?}", index + 1, other)),
        };

        let finished_at = if sql.to_lowercase().contains("clock_timestamp()") {
            SqlValue::DateTime(chrono::Utc::now())
        } else {
            SqlValue::Null
        };

        let row = LedgerRow {
            id: text(0)?,
            checksum: text(1)?,
            migration_name: text(2)?,
            started_at: params.get(3).cloned().unwrap_or(SqlValue::Null),
            finished_at,
            applied_steps_count: params
                .get(4)
                .and_then(SqlValue::as_i64)
                .ok_or_else(|| format!("parameter $5 is not an integer: {:?}", params.get(4)))?,
            rolled_back_at: None,
        };

        if ledger.iter().any(|r| r.migration_name == row.migration_name) {
            return Err(format!(
                "duplicate key value violates unique constraint: {}",
                row.migration_name
            ));
        }

        ledger.push(row);
        Ok(())
    }
}

fn ledger_row_to_row(record: &LedgerRow) -> Row {
    Row::new(vec![
        ("id".to_string(), SqlValue::from(record.id.as_str())),
        ("checksum".to_string(), SqlValue::from(record.checksum.as_str())),
        (
            "migration_name".to_string(),
            SqlValue::from(record.migration_name.as_str()),
        ),
        ("started_at".to_string(), record.started_at.clone()),
        ("finished_at".to_string(), record.finished_at.clone()),
        (
            "applied_steps_count".to_string(),
            SqlValue::Int64(record.applied_steps_count),
        ),
        ("rolled_back_at".to_string(), SqlValue::from(record.rolled_back_at)),
    ])
}

#[async_trait]
impl MigrationClient for MemoryClient {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, ClientError> {
        let this = self.clone();
        let mut state = this.state();
        self.apply(&mut state, statement).map_err(ClientError::Query)?;
        state.committed.push(statement.sql.clone());
        Ok(0)
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Row>, ClientError> {
        let this = self.clone();
        let mut state = this.state();
        self.apply(&mut state, statement).map_err(ClientError::Query)
    }

    async fn batch(&mut self, statements: &[Statement]) -> Result<(), ClientError> {
        let this = self.clone();
        let mut state = this.state();
        let mut working = state.clone();

        for (index, statement) in statements.iter().enumerate() {
            self.apply(&mut working, statement)
                .map_err(|message| ClientError::Statement { index, message })?;
            working.committed.push(statement.sql.clone());
        }

        working.batches += 1;
        *state = working;
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<TableSet, ClientError> {
        let state = self.state();
        let mut set = TableSet::new(CURRENT_SCHEMA);
        set.tables.extend(state.tables.keys().cloned());
        if state.ledger.is_some() {
            set.tables.insert(self.ledger_table.clone());
        }
        Ok(set)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.state().closed = true;
        Ok(())
    }
}

/// Write `<root>/<name>/migration.sql`
pub fn write_migration(root: &Path, name: &str, sql: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(MIGRATION_FILE_NAME), sql).unwrap();
}
