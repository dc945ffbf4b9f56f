//! PostgreSQL Client Implementation
//!
//! `MigrationClient` over a single-connection sqlx pool. Postgres DDL is
//! transactional, so `batch` gets all-or-nothing semantics from a plain
//! transaction.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Postgres, Row as SqlxRow, TypeInfo};

use super::core::{MigrationClient, Row, SqlValue, Statement, TableName, TableSet};
use crate::error::{ClientError, ClientResult};

// The outer row guarantees the current schema comes back even with no tables.
const LIST_TABLES_SQL: &str = "\
    SELECT current_schema() AS current_schema, t.schemaname, t.tablename \
    FROM (SELECT 1) AS s \
    LEFT JOIN pg_catalog.pg_tables t \
        ON t.schemaname NOT IN ('pg_catalog', 'information_schema') \
        AND t.schemaname NOT LIKE 'pg\\_%' \
    ORDER BY t.schemaname, t.tablename";

/// PostgreSQL migration client
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Connect using a database URL and an auth credential. A non-empty
    /// credential replaces any password carried by the URL.
    pub async fn connect(database_url: &str, auth_token: &str) -> ClientResult<Self> {
        let mut options = PgConnectOptions::from_str(database_url)
            .map_err(|e| ClientError::Connection(format!("Invalid database URL: {}", e)))?;

        if !auth_token.is_empty() {
            options = options.password(auth_token);
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| ClientError::Connection(format!("Failed to connect to database: {}", e)))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationClient for PostgresClient {
    async fn execute(&mut self, statement: &Statement) -> ClientResult<u64> {
        let result = build_query(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| ClientError::Query(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, statement: &Statement) -> ClientResult<Vec<Row>> {
        let rows = build_query(statement)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ClientError::Query(format!("Query fetch failed: {}", e)))?;

        rows.iter().map(convert_row).collect()
    }

    async fn batch(&mut self, statements: &[Statement]) -> ClientResult<()> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| ClientError::Transaction(format!("Failed to start transaction: {}", e)))?;

        for (index, statement) in statements.iter().enumerate() {
            if let Err(e) = build_query(statement).execute(&mut *transaction).await {
                if let Err(rollback_err) = transaction.rollback().await {
                    tracing::warn!("Rollback after failed statement also failed: {}", rollback_err);
                }
                return Err(ClientError::Statement {
                    index,
                    message: e.to_string(),
                });
            }
        }

        transaction
            .commit()
            .await
            .map_err(|e| ClientError::Transaction(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    async fn list_tables(&mut self) -> ClientResult<TableSet> {
        let rows = sqlx::query(LIST_TABLES_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ClientError::Query(format!("Table introspection failed: {}", e)))?;

        let current_schema = match rows.first() {
            Some(row) => row.try_get::<Option<String>, _>("current_schema")?,
            None => None,
        }
        .ok_or_else(|| {
            ClientError::Query("No current schema: search_path names no existing schema".to_string())
        })?;

        let mut set = TableSet::new(current_schema);
        for row in &rows {
            let schema = row.try_get::<Option<String>, _>("schemaname")?;
            let table = row.try_get::<Option<String>, _>("tablename")?;
            if let (Some(schema), Some(table)) = (schema, table) {
                set.tables.insert(TableName::new(schema, table));
            }
        }

        Ok(set)
    }

    async fn close(&mut self) -> ClientResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn build_query(statement: &Statement) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_value(query, param);
    }
    query
}

/// Bind a SqlValue to a sqlx query
fn bind_value<'a>(
    query: sqlx::query::Query<'a, Postgres, PgArguments>,
    value: &SqlValue,
) -> sqlx::query::Query<'a, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int32(i) => query.bind(*i),
        SqlValue::Int64(i) => query.bind(*i),
        SqlValue::String(s) => query.bind(s.clone()),
        SqlValue::DateTime(dt) => query.bind(*dt),
    }
}

fn convert_row(row: &PgRow) -> ClientResult<Row> {
    let mut columns = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        columns.push((column.name().to_string(), postgres_value(row, index)?));
    }
    Ok(Row::new(columns))
}

/// Convert a PostgreSQL column value to SqlValue
fn postgres_value(row: &PgRow, index: usize) -> ClientResult<SqlValue> {
    let type_name = row.columns()[index].type_info().name().to_string();

    let value: SqlValue = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.into(),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(i32::from)
            .into(),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.into(),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.into(),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .into(),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|naive| naive.and_utc())
            .into(),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|u| u.to_string())
            .into(),
        _ => row.try_get::<Option<String>, _>(index).map_err(|e| {
            ClientError::Decode(format!(
                "Failed to get value as string for type '{}': {}",
                type_name, e
            ))
        })?
        .into(),
    };

    Ok(value)
}
