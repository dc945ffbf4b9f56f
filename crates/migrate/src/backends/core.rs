//! Core Database Client Traits
//!
//! The migration engine talks to the target database only through
//! `MigrationClient`. Implementations must provide single statement
//! execution, table introspection and atomic batch execution.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;

use crate::error::{ClientError, ClientResult};

/// Abstract database client used by the migration engine
#[async_trait]
pub trait MigrationClient: Send {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, statement: &Statement) -> ClientResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&mut self, statement: &Statement) -> ClientResult<Vec<Row>>;

    /// Execute every statement in order as one all-or-nothing unit.
    ///
    /// On error none of the statements' effects may persist.
    async fn batch(&mut self, statements: &[Statement]) -> ClientResult<()>;

    /// The session's current schema and the user tables of every
    /// non-system schema, names exactly as the catalog stores them.
    async fn list_tables(&mut self) -> ClientResult<TableSet>;

    /// Release the underlying connection
    async fn close(&mut self) -> ClientResult<()>;
}

/// A table identified by schema and catalog name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Result of table introspection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSet {
    /// Schema unqualified names resolve to
    pub current_schema: String,
    pub tables: BTreeSet<TableName>,
}

impl TableSet {
    pub fn new(current_schema: impl Into<String>) -> Self {
        Self {
            current_schema: current_schema.into(),
            tables: BTreeSet::new(),
        }
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.tables.contains(table)
    }

    /// Whether `name` exists in the current schema
    pub fn contains_current(&self, name: &str) -> bool {
        self.tables
            .contains(&TableName::new(self.current_schema.as_str(), name))
    }

    /// Tables of the current schema, in name order
    pub fn current_schema_tables(&self) -> impl Iterator<Item = &TableName> + '_ {
        self.tables
            .iter()
            .filter(move |table| table.schema == self.current_schema)
    }
}

/// A single executable SQL command with its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// A statement without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A statement with positional parameters (`$1`, `$2`, ...)
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// Parameter and column values exchanged with the client
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    DateTime(chrono::DateTime<chrono::Utc>),
}

impl SqlValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int32(i) => Some(i64::from(*i)),
            SqlValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            SqlValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int64(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::String(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::String(value.to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for SqlValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        SqlValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// One result row: column names paired with decoded values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    /// Get a column value by name
    pub fn get(&self, name: &str) -> ClientResult<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
            .ok_or_else(|| ClientError::Decode(format!("Column '{}' not found", name)))
    }

    /// Get a non-null text column
    pub fn get_string(&self, name: &str) -> ClientResult<String> {
        self.get(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode(format!("Column '{}' is not text", name)))
    }

    /// Get a nullable timestamp column
    pub fn get_optional_datetime(
        &self,
        name: &str,
    ) -> ClientResult<Option<chrono::DateTime<chrono::Utc>>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_datetime()
            .map(Some)
            .ok_or_else(|| ClientError::Decode(format!("Column '{}' is not a timestamp", name)))
    }

    /// Get a non-null integer column
    pub fn get_i64(&self, name: &str) -> ClientResult<i64> {
        self.get(name)?
            .as_i64()
            .ok_or_else(|| ClientError::Decode(format!("Column '{}' is not an integer", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let now = chrono::Utc::now();
        let row = Row::new(vec![
            ("migration_name".to_string(), SqlValue::from("0001_init")),
            ("finished_at".to_string(), SqlValue::from(now)),
            ("rolled_back_at".to_string(), SqlValue::Null),
            ("applied_steps_count".to_string(), SqlValue::Int32(3)),
        ]);

        assert_eq!(row.get_string("migration_name").unwrap(), "0001_init");
        assert_eq!(row.get_optional_datetime("finished_at").unwrap(), Some(now));
        assert_eq!(row.get_optional_datetime("rolled_back_at").unwrap(), None);
        assert_eq!(row.get_i64("applied_steps_count").unwrap(), 3);
        assert!(matches!(row.get_i64("migration_name"), Err(ClientError::Decode(_))));
        assert!(matches!(row.get_i64("rolled_back_at"), Err(ClientError::Decode(_))));
        assert!(matches!(row.get("missing"), Err(ClientError::Decode(_))));
        assert!(row.get_string("applied_steps_count").is_err());
    }

    #[test]
    fn test_table_set_lookups() {
        let mut set = TableSet::new("public");
        set.tables.insert(TableName::new("public", "users"));
        set.tables.insert(TableName::new("audit", "events"));
        set.tables.insert(TableName::new("public", "Orders"));

        assert!(set.contains_current("users"));
        assert!(set.contains_current("Orders"));
        assert!(!set.contains_current("orders"));
        assert!(!set.contains_current("events"));
        assert!(set.contains(&TableName::new("audit", "events")));

        let current: Vec<String> = set.current_schema_tables().map(|t| t.to_string()).collect();
        assert_eq!(current, vec!["public.Orders", "public.users"]);
    }

    #[test]
    fn test_option_into_sql_value() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(7i64)), SqlValue::Int64(7));
    }
}
