//! Data access capability consumed by query strategies
//!
//! [`DataSource`] is the only place SQL is executed. The bundled
//! [`SqliteSource`] and [`MySqlSource`] run scopes against `sqlx` pools;
//! other engines implement the trait themselves.

use async_trait::async_trait;

use super::scope::Scope;
use super::sql::{self, Dialect, Select};
use super::Record;
use crate::error::Result;

#[cfg(any(feature = "sqlite", feature = "mysql"))]
use crate::value::Value;
#[cfg(any(feature = "sqlite", feature = "mysql"))]
use std::collections::BTreeMap;
#[cfg(any(feature = "sqlite", feature = "mysql"))]
use sqlx::{Column, Row, TypeInfo, ValueRef};
#[cfg(feature = "sqlite")]
use sqlx::Sqlite;
#[cfg(feature = "sqlite")]
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
#[cfg(feature = "mysql")]
use sqlx::MySql;
#[cfg(feature = "mysql")]
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlRow};

/// Executes scopes.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Whether models should be fetched by plucking ordered ids and then
    /// refetching those ids unordered. Engines that order full rows as
    /// cheaply as ids can skip the second round trip.
    fn refetch_by_ids(&self) -> bool {
        true
    }

    /// Ordered primary keys of `scope`, honouring limit and offset.
    async fn pluck_ids(&self, scope: &Scope) -> Result<Vec<i64>>;

    /// Full records of `scope`, in the scope's order.
    async fn fetch(&self, scope: &Scope) -> Result<Vec<Record>>;

    /// Size of the filtered set, ignoring order, limit and offset.
    async fn count(&self, scope: &Scope) -> Result<u64>;

    /// A page of ids and the unpaginated total in a single round trip.
    ///
    /// `Ok(None)` means the engine cannot do this and the caller should count
    /// separately.
    async fn pluck_ids_with_found_rows(&self, _scope: &Scope) -> Result<Option<(Vec<i64>, u64)>> {
        Ok(None)
    }
}

// ============================================================================
// SQLite
// ============================================================================

#[cfg(feature = "sqlite")]
type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// [`DataSource`] over a `sqlx` SQLite pool.
#[cfg(feature = "sqlite")]
#[derive(Debug, Clone)]
pub struct SqliteSource {
    pool: SqlitePool,
    refetch_by_ids: bool,
}

#[cfg(feature = "sqlite")]
impl SqliteSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            refetch_by_ids: false,
        }
    }

    /// Force the pluck-then-refetch path (SQLite orders full rows cheaply,
    /// so it is off by default).
    pub fn with_id_refetch(mut self, enabled: bool) -> Self {
        self.refetch_by_ids = enabled;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_rows(&self, scope: &Scope, select: Select) -> Result<Vec<SqliteRow>> {
        let query = sql::build(scope, Dialect::Sqlite, select)?;
        tracing::debug!(sql = %query.sql, binds = query.binds.len(), "Executing scope query");

        let mut statement = sqlx::query(&query.sql);
        for value in &query.binds {
            statement = bind_value(statement, value);
        }

        Ok(statement.fetch_all(&self.pool).await?)
    }
}

#[cfg(feature = "sqlite")]
#[async_trait]
impl DataSource for SqliteSource {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn refetch_by_ids(&self) -> bool {
        self.refetch_by_ids
    }

    async fn pluck_ids(&self, scope: &Scope) -> Result<Vec<i64>> {
        let rows = self.fetch_rows(scope, Select::Ids).await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(Into::into))
            .collect()
    }

    async fn fetch(&self, scope: &Scope) -> Result<Vec<Record>> {
        let rows = self.fetch_rows(scope, Select::Rows).await?;
        rows.iter()
            .map(|row| Ok(Record::new(scope.class().clone(), decode_row(row)?)))
            .collect()
    }

    async fn count(&self, scope: &Scope) -> Result<u64> {
        let rows = self.fetch_rows(scope, Select::Count).await?;
        let count = match rows.first() {
            Some(row) => row.try_get::<i64, _>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[cfg(feature = "sqlite")]
fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Date(date) => query.bind(date.format("%Y-%m-%d").to_string()),
        Value::Time(time) => query.bind(time.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Record(record) => query.bind(record.id()),
        Value::Array(_) | Value::Map(_) => query.bind(value.to_json().to_string()),
    }
}

/// Decode every column of `row`. The runtime storage class picks the Rust
/// type; the declared column type turns integers into booleans and text into
/// dates or timestamps.
#[cfg(feature = "sqlite")]
fn decode_row(row: &SqliteRow) -> Result<BTreeMap<String, Value>> {
    let mut attributes = BTreeMap::new();

    for column in row.columns() {
        let index = column.ordinal();
        let declared = column.type_info().name().to_ascii_uppercase();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_ascii_uppercase();
            match storage.as_str() {
                "INTEGER" | "INT8" | "INT4" | "BOOLEAN" => {
                    let int = row.try_get::<i64, _>(index)?;
                    if declared == "BOOLEAN" {
                        Value::Bool(int != 0)
                    } else {
                        Value::Int(int)
                    }
                }
                "REAL" | "NUMERIC" => Value::Float(row.try_get::<f64, _>(index)?),
                "BLOB" => Value::String(String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(index)?).into_owned()),
                _ => {
                    let text = row.try_get::<String, _>(index)?;
                    match declared.as_str() {
                        "DATE" => Value::parse_date(&text).map(Value::Date),
                        "DATETIME" | "TIMESTAMP" => Value::parse_time(&text).map(Value::Time),
                        _ => None,
                    }
                    .unwrap_or(Value::String(text))
                }
            }
        };

        attributes.insert(column.name().to_string(), value);
    }

    Ok(attributes)
}

// ============================================================================
// MySQL
// ============================================================================

#[cfg(feature = "mysql")]
type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

/// [`DataSource`] over a `sqlx` MySQL pool.
///
/// Pages are plucked as ids and refetched. With `SQL_CALC_FOUND_ROWS` the
/// page and the unpaginated total come back without a separate count.
#[cfg(feature = "mysql")]
#[derive(Debug, Clone)]
pub struct MySqlSource {
    pool: MySqlPool,
}

#[cfg(feature = "mysql")]
impl MySqlSource {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    fn statement(scope: &Scope, select: Select) -> Result<sql::SqlQuery> {
        let query = sql::build(scope, Dialect::Mysql, select)?;
        tracing::debug!(sql = %query.sql, binds = query.binds.len(), "Executing scope query");
        Ok(query)
    }

    async fn fetch_rows(&self, scope: &Scope, select: Select) -> Result<Vec<MySqlRow>> {
        let query = Self::statement(scope, select)?;

        let mut statement = sqlx::query(&query.sql);
        for value in &query.binds {
            statement = bind_mysql_value(statement, value);
        }

        Ok(statement.fetch_all(&self.pool).await?)
    }
}

#[cfg(feature = "mysql")]
#[async_trait]
impl DataSource for MySqlSource {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    async fn pluck_ids(&self, scope: &Scope) -> Result<Vec<i64>> {
        let rows = self.fetch_rows(scope, Select::Ids).await?;
        rows.iter().map(|row| mysql_integer(row, 0)).collect()
    }

    async fn fetch(&self, scope: &Scope) -> Result<Vec<Record>> {
        let rows = self.fetch_rows(scope, Select::Rows).await?;
        rows.iter()
            .map(|row| Ok(Record::new(scope.class().clone(), decode_mysql_row(row)?)))
            .collect()
    }

    async fn count(&self, scope: &Scope) -> Result<u64> {
        let rows = self.fetch_rows(scope, Select::Count).await?;
        let count = match rows.first() {
            Some(row) => mysql_integer(row, 0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn pluck_ids_with_found_rows(&self, scope: &Scope) -> Result<Option<(Vec<i64>, u64)>> {
        let query = Self::statement(scope, Select::IdsCalcFoundRows)?;

        let mut statement = sqlx::query(&query.sql);
        for value in &query.binds {
            statement = bind_mysql_value(statement, value);
        }

        // FOUND_ROWS() is session state: it must run on the same connection.
        let mut conn = self.pool.acquire().await?;
        let rows = statement.fetch_all(&mut *conn).await?;
        let found = sqlx::query("SELECT FOUND_ROWS()").fetch_one(&mut *conn).await?;

        let ids = rows
            .iter()
            .map(|row| mysql_integer(row, 0))
            .collect::<Result<Vec<_>>>()?;
        let total = u64::try_from(mysql_integer(&found, 0)?).unwrap_or_default();
        Ok(Some((ids, total)))
    }
}

#[cfg(feature = "mysql")]
fn bind_mysql_value<'q>(query: MySqlQuery<'q>, value: &Value) -> MySqlQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Date(date) => query.bind(*date),
        Value::Time(time) => query.bind(time.naive_utc()),
        Value::Record(record) => query.bind(record.id()),
        Value::Array(_) | Value::Map(_) => query.bind(value.to_json().to_string()),
    }
}

/// Signed or unsigned integer column as `i64`.
#[cfg(feature = "mysql")]
fn mysql_integer(row: &MySqlRow, index: usize) -> Result<i64> {
    match row.try_get::<i64, _>(index) {
        Ok(int) => Ok(int),
        Err(_) => {
            let int = row.try_get::<u64, _>(index)?;
            Ok(i64::try_from(int).unwrap_or(i64::MAX))
        }
    }
}

/// Decode every column of `row` by its declared MySQL type.
#[cfg(feature = "mysql")]
fn decode_mysql_row(row: &MySqlRow) -> Result<BTreeMap<String, Value>> {
    let mut attributes = BTreeMap::new();

    for column in row.columns() {
        let index = column.ordinal();
        let declared = column.type_info().name().to_ascii_uppercase();

        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else {
            match declared.trim_end_matches(" UNSIGNED") {
                "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => Value::Int(mysql_integer(row, index)?),
                "FLOAT" | "DOUBLE" => Value::Float(row.try_get::<f64, _>(index)?),
                "DECIMAL" => {
                    let text = row.try_get_unchecked::<String, _>(index)?;
                    text.parse().map(Value::Float).unwrap_or(Value::String(text))
                }
                "DATE" => Value::Date(row.try_get::<chrono::NaiveDate, _>(index)?),
                "DATETIME" => Value::Time(row.try_get::<chrono::NaiveDateTime, _>(index)?.and_utc().fixed_offset()),
                "TIMESTAMP" => Value::Time(row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?.fixed_offset()),
                "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                    Value::String(String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(index)?).into_owned())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };

        attributes.insert(column.name().to_string(), value);
    }

    Ok(attributes)
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::db::ModelClass;
    use crate::db::scope::Direction;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE tasks (id INTEGER PRIMARY KEY, title TEXT, done BOOLEAN, due DATE, updated_at DATETIME, weight REAL)",
        )
        .execute(&pool)
        .await
        .unwrap();

        for (id, title, done) in [(1, "a", 0), (2, "b", 1), (3, "c", 0)] {
            sqlx::query(
                "INSERT INTO tasks (id, title, done, due, updated_at, weight) VALUES (?1, ?2, ?3, '2024-02-0' || ?1, '2024-02-01 10:00:0' || ?1, 1.5)",
            )
            .bind(id)
            .bind(title)
            .bind(done)
            .execute(&pool)
            .await
            .unwrap();
        }

        pool
    }

    fn class() -> Arc<ModelClass> {
        Arc::new(ModelClass::new("Task", "tasks"))
    }

    #[tokio::test]
    async fn test_decodes_declared_types() {
        let source = SqliteSource::new(pool().await);
        let records = source
            .fetch(&Scope::new(class()).where_eq("id", 2))
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id(), 2);
        assert_eq!(record.attribute("done"), Some(&Value::Bool(true)));
        assert!(matches!(record.attribute("due"), Some(Value::Date(_))));
        assert!(matches!(record.attribute("updated_at"), Some(Value::Time(_))));
        assert_eq!(record.attribute("weight"), Some(&Value::Float(1.5)));
    }

    #[tokio::test]
    async fn test_pluck_and_count() {
        let source = SqliteSource::new(pool().await);
        let scope = Scope::new(class())
            .where_eq("done", false)
            .order("id", Direction::Desc);

        assert_eq!(source.pluck_ids(&scope).await.unwrap(), vec![3, 1]);
        assert_eq!(source.count(&scope.clone().limit(1)).await.unwrap(), 2);
        assert!(source.pluck_ids_with_found_rows(&scope).await.unwrap().is_none());
    }
}

/// Runs against a live server named by `BRAINSTEM_MYSQL_URL`; skipped when
/// the variable is unset.
#[cfg(all(test, feature = "mysql"))]
mod mysql_tests {
    use super::*;
    use crate::db::ModelClass;
    use crate::db::scope::Direction;
    use sqlx::mysql::MySqlPoolOptions;
    use std::sync::Arc;

    async fn source() -> Option<MySqlSource> {
        let url = std::env::var("BRAINSTEM_MYSQL_URL").ok()?;
        let pool = MySqlPoolOptions::new().max_connections(2).connect(&url).await.unwrap();

        for statement in [
            "DROP TABLE IF EXISTS brainstem_tasks",
            "CREATE TABLE brainstem_tasks (id BIGINT PRIMARY KEY, title VARCHAR(32), done BOOLEAN, due DATE, updated_at DATETIME)",
            "INSERT INTO brainstem_tasks VALUES (1, 'a', 0, '2024-02-01', '2024-02-01 10:00:00'), (2, 'b', 1, '2024-02-02', '2024-02-01 10:00:00'), (3, 'c', 0, '2024-02-03', '2024-02-01 10:00:00')",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        Some(MySqlSource::new(pool))
    }

    fn class() -> Arc<ModelClass> {
        Arc::new(ModelClass::new("Task", "brainstem_tasks"))
    }

    #[tokio::test]
    async fn test_found_rows_counts_past_the_page() {
        let Some(source) = source().await else {
            return;
        };
        let scope = Scope::new(class())
            .where_eq("done", false)
            .order("id", Direction::Desc)
            .limit(1);

        let (ids, total) = source.pluck_ids_with_found_rows(&scope).await.unwrap().unwrap();
        assert_eq!(ids, vec![3]);
        assert_eq!(total, 2);
        assert_eq!(source.count(&scope).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_decodes_declared_types() {
        let Some(source) = source().await else {
            return;
        };
        let records = source.fetch(&Scope::new(class()).where_eq("id", 2)).await.unwrap();

        assert_eq!(records[0].attribute("done"), Some(&Value::Bool(true)));
        assert!(matches!(records[0].attribute("due"), Some(Value::Date(_))));
        assert!(matches!(records[0].attribute("updated_at"), Some(Value::Time(_))));
    }
}
