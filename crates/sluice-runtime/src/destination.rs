//! SQLite destination store
//!
//! Destination tables live in their own namespace of an SQLite database,
//! which may be the ledger database itself. Column types are inferred from
//! the table being written: INTEGER, REAL, BOOLEAN, or TEXT.

use async_trait::async_trait;
use serde_json::{Number, Value};
use sluice_core::table::ColumnType;
use sluice_core::{DestinationStore, Error, Table};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};

use crate::db;

type CoreResult<T> = sluice_core::Result<T>;

/// [`DestinationStore`] over an SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteDestination {
    pool: SqlitePool,
}

impl SqliteDestination {
    /// Open a destination database at `url`
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        Ok(Self {
            pool: db::connect(url).await?,
        })
    }

    /// Share an existing pool, e.g. the ledger's
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_rows(
        &self,
        conn: &mut sqlx::SqliteConnection,
        table: &str,
        data: &Table,
    ) -> Result<(), sqlx::Error> {
        let columns = data
            .columns()
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=data.columns().len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(table),
            columns,
            placeholders
        );

        for row in data.rows() {
            let mut query = sqlx::query(&sql);
            for cell in row {
                query = bind_cell(query, cell);
            }
            query.execute(&mut *conn).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for SqliteDestination {
    async fn exists(&self, table: &str) -> CoreResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::destination(table, e))?;
        let count: i64 = row.try_get("count").map_err(|e| Error::destination(table, e))?;
        Ok(count > 0)
    }

    async fn row_count(&self, table: &str) -> CoreResult<u64> {
        let sql = format!("SELECT COUNT(*) AS count FROM {}", quote_identifier(table));
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::destination(table, e))?;
        let count: i64 = row.try_get("count").map_err(|e| Error::destination(table, e))?;
        Ok(count.max(0) as u64)
    }

    async fn drop_table(&self, table: &str) -> CoreResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_identifier(table));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::destination(table, e))?;
        Ok(())
    }

    async fn create(&self, table: &str, data: &Table) -> CoreResult<()> {
        if data.columns().is_empty() {
            return Err(Error::destination(table, "cannot create a table with no columns"));
        }

        let definitions = data
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} {}", quote_identifier(c), sql_type(data.column_type(i))))
            .collect::<Vec<_>>()
            .join(", ");
        let ddl = format!("CREATE TABLE {} ({})", quote_identifier(table), definitions);

        let mut tx = self.pool.begin().await.map_err(|e| Error::destination(table, e))?;
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::destination(table, e))?;
        self.insert_rows(&mut tx, table, data)
            .await
            .map_err(|e| Error::destination(table, e))?;
        tx.commit().await.map_err(|e| Error::destination(table, e))?;

        tracing::debug!(table, rows = data.len(), "created destination table");
        Ok(())
    }

    async fn append(&self, table: &str, data: &Table) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| Error::destination(table, e))?;
        self.insert_rows(&mut tx, table, data)
            .await
            .map_err(|e| Error::destination(table, e))?;
        tx.commit().await.map_err(|e| Error::destination(table, e))?;

        tracing::debug!(table, rows = data.len(), "appended to destination table");
        Ok(())
    }

    async fn read(&self, table: &str, limit: Option<usize>) -> CoreResult<Option<Table>> {
        if !self.exists(table).await? {
            return Ok(None);
        }

        let schema = sqlx::query("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::destination(table, e))?;
        let mut columns = Vec::with_capacity(schema.len());
        let mut declared = Vec::with_capacity(schema.len());
        for row in &schema {
            let name: String = row.try_get("name").map_err(|e| Error::destination(table, e))?;
            let kind: String = row.try_get("type").map_err(|e| Error::destination(table, e))?;
            columns.push(name);
            declared.push(kind.to_uppercase());
        }

        let sql = format!("SELECT * FROM {} LIMIT ?1", quote_identifier(table));
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::destination(table, e))?;

        let mut cells = Vec::with_capacity(rows.len());
        for row in &rows {
            let decoded = declared
                .iter()
                .enumerate()
                .map(|(i, kind)| decode_cell(row, i, kind))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| Error::destination(table, e))?;
            cells.push(decoded);
        }

        Table::from_rows(columns, cells).map(Some)
    }
}

/// Quote an SQL identifier, doubling embedded quotes
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(kind: ColumnType) -> &'static str {
    match kind {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Text => "TEXT",
    }
}

fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    cell: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match cell {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None if n.is_u64() => query.bind(n.to_string()),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        structured => query.bind(structured.to_string()),
    }
}

fn decode_cell(row: &SqliteRow, index: usize, declared: &str) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();

    Ok(match storage.as_str() {
        "INTEGER" if declared == "BOOLEAN" => Value::Bool(row.try_get_unchecked::<i64, _>(index)? != 0),
        "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    })
}
