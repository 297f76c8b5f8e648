//! Record store for the showroom site.
//!
//! The site keeps three independent collections (`cars`, `gallery`, `admin`)
//! and two image buckets. This crate defines the record types, the
//! [`DataGateway`] and [`ObjectStorage`] contracts, and two backends for each:
//! the hosted REST services ([`RestGateway`], [`RestObjectStorage`]) and a
//! local SQLite/filesystem pair ([`Database`], [`LocalObjectStorage`]) used for
//! development and tests.

pub mod gateway;
pub mod rest;
pub mod storage;

use std::{fmt, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use sqlx::{
    sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row as _, Sqlite, SqlitePool,
};
use thiserror::Error;

pub use gateway::{DataGateway, Filter, Order, SelectQuery};
pub use rest::RestGateway;
pub use storage::{LocalObjectStorage, ObjectStorage, RestObjectStorage, StorageError};

/// Default SQLite busy timeout in milliseconds when the DB is under load.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// A row as exchanged with a gateway: column name to JSON value.
pub type Row = Map<String, Value>;

/// Identity column type shared by all collections.
pub type RecordId = i64;

/// The named collections the site reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Cars,
    Gallery,
    Admin,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Cars => "cars",
            Collection::Gallery => "gallery",
            Collection::Admin => "admin",
        }
    }

    /// Object-store bucket holding the collection's images, if it has any.
    pub fn bucket(&self) -> Option<&'static str> {
        match self {
            Collection::Cars => Some("cars"),
            Collection::Gallery => Some("gallery"),
            Collection::Admin => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cars" => Ok(Collection::Cars),
            "gallery" => Ok(Collection::Gallery),
            "admin" => Ok(Collection::Admin),
            other => Err(anyhow!("unknown collection: {}", other)),
        }
    }
}

/// Classified gateway failures, carried inside `anyhow::Error`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("column '{column}' is not part of collection '{collection}'")]
    UnknownColumn {
        collection: Collection,
        column: String,
    },
    #[error("value for '{collection}.{column}' has the wrong type")]
    InvalidValue {
        collection: Collection,
        column: String,
    },
    #[error("refusing to {0} every row of '{1}' without a filter")]
    Unfiltered(&'static str, Collection),
    #[error("remote gateway returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("malformed '{0}' row: {1}")]
    MalformedRow(Collection, String),
}

/// Showroom car listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Car {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub image_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Photo of showroom activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryItem {
    pub id: RecordId,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub image_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Admin login row. `admin_code` is a plaintext shared secret.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminAccount {
    pub id: RecordId,
    pub username: String,
    pub admin_code: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminAccount")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("admin_code", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Full set of writable car columns. Updates overwrite every field.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CarFields {
    pub name: String,
    pub price: f64,
    pub image_url: Option<String>,
    pub image_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GalleryFields {
    pub description: String,
    pub image_url: Option<String>,
    pub image_key: Option<String>,
}

#[derive(Clone, Serialize, PartialEq)]
pub struct AdminFields {
    pub username: String,
    pub admin_code: String,
}

impl fmt::Debug for AdminFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminFields")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Serialises a write payload into a gateway row.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value).context("failed to serialise row")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object row, got {}", other)),
    }
}

/// Decodes a gateway row into a typed record.
pub fn from_row<T: DeserializeOwned>(collection: Collection, row: Row) -> Result<T> {
    serde_json::from_value(Value::Object(row))
        .map_err(|err| GatewayError::MalformedRow(collection, err.to_string()).into())
}

/// Embedded SQLite store implementing [`DataGateway`] for local development.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes (or creates) a connection pool to the SQLite database located at
    /// the given URL (e.g. `sqlite://./showroom.db`) and applies migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));

        // An in-memory database lives and dies with its connection.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(8)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    async fn fetch_by_rowid(&self, collection: Collection, rowid: i64) -> Result<Row> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", collection.as_str());
        let row = sqlx::query(&sql)
            .bind(rowid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "{} row {} inserted but missing when reloaded",
                    collection,
                    rowid
                )
            })?;
        map_row(collection, &row)
    }
}

#[async_trait]
impl DataGateway for Database {
    async fn select(&self, collection: Collection, query: &SelectQuery) -> Result<Vec<Row>> {
        let (where_clause, binds) = where_clause(collection, &query.filters)?;
        let mut sql = format!("SELECT * FROM {}{}", collection.as_str(), where_clause);

        if let Some(order) = &query.order {
            column_kind(collection, &order.column)?;
            let direction = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(
                " ORDER BY {} {direction}, id {direction}",
                order.column
            ));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = bind_value(statement, value);
        }
        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(|row| map_row(collection, row)).collect()
    }

    async fn insert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut inserted = Vec::with_capacity(rows.len());
        for mut row in rows {
            row.remove("id");
            if !matches!(row.get("created_at"), Some(Value::String(_))) {
                row.insert("created_at".into(), Value::String(timestamp_now()));
            }

            let mut columns = Vec::with_capacity(row.len());
            let mut binds = Vec::with_capacity(row.len());
            for (column, value) in row {
                let kind = column_kind(collection, &column)?;
                binds.push(sql_value(collection, &column, kind, value)?);
                columns.push(column);
            }

            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                collection.as_str(),
                columns.join(", "),
                placeholders
            );
            let mut statement = sqlx::query(&sql);
            for value in binds {
                statement = bind_value(statement, value);
            }
            let result = statement.execute(&self.pool).await?;
            inserted.push(
                self.fetch_by_rowid(collection, result.last_insert_rowid())
                    .await?,
            );
        }
        Ok(inserted)
    }

    async fn update(&self, collection: Collection, filters: &[Filter], changes: Row) -> Result<u64> {
        if filters.is_empty() {
            return Err(GatewayError::Unfiltered("update", collection).into());
        }

        let mut assignments = Vec::with_capacity(changes.len());
        let mut binds = Vec::with_capacity(changes.len() + filters.len());
        for (column, value) in changes {
            if column == "id" || column == "created_at" {
                continue;
            }
            let kind = column_kind(collection, &column)?;
            binds.push(sql_value(collection, &column, kind, value)?);
            assignments.push(format!("{column} = ?"));
        }
        if assignments.is_empty() {
            return Ok(0);
        }

        let (where_clause, filter_binds) = where_clause(collection, filters)?;
        binds.extend(filter_binds);
        let sql = format!(
            "UPDATE {} SET {}{}",
            collection.as_str(),
            assignments.join(", "),
            where_clause
        );
        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = bind_value(statement, value);
        }
        Ok(statement.execute(&self.pool).await?.rows_affected())
    }

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<u64> {
        if filters.is_empty() {
            return Err(GatewayError::Unfiltered("delete", collection).into());
        }
        let (where_clause, binds) = where_clause(collection, filters)?;
        let sql = format!("DELETE FROM {}{}", collection.as_str(), where_clause);
        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = bind_value(statement, value);
        }
        Ok(statement.execute(&self.pool).await?.rows_affected())
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.as_str());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Real,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn columns(collection: Collection) -> &'static [(&'static str, ColumnKind)] {
    match collection {
        Collection::Cars => &[
            ("id", ColumnKind::Integer),
            ("name", ColumnKind::Text),
            ("price", ColumnKind::Real),
            ("image_url", ColumnKind::Text),
            ("image_key", ColumnKind::Text),
            ("created_at", ColumnKind::Text),
        ],
        Collection::Gallery => &[
            ("id", ColumnKind::Integer),
            ("description", ColumnKind::Text),
            ("image_url", ColumnKind::Text),
            ("image_key", ColumnKind::Text),
            ("created_at", ColumnKind::Text),
        ],
        Collection::Admin => &[
            ("id", ColumnKind::Integer),
            ("username", ColumnKind::Text),
            ("admin_code", ColumnKind::Text),
            ("created_at", ColumnKind::Text),
        ],
    }
}

// Column names are interpolated into SQL, so only whitelisted names pass.
fn column_kind(collection: Collection, column: &str) -> Result<ColumnKind> {
    columns(collection)
        .iter()
        .find(|(name, _)| *name == column)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| {
            GatewayError::UnknownColumn {
                collection,
                column: column.to_owned(),
            }
            .into()
        })
}

fn where_clause(collection: Collection, filters: &[Filter]) -> Result<(String, Vec<SqlValue>)> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut parts = Vec::with_capacity(filters.len());
    let mut binds = Vec::with_capacity(filters.len());
    for filter in filters {
        let kind = column_kind(collection, &filter.column)?;
        match sql_value(collection, &filter.column, kind, filter.value.clone())? {
            SqlValue::Null => parts.push(format!("{} IS NULL", filter.column)),
            value => {
                parts.push(format!("{} = ?", filter.column));
                binds.push(value);
            }
        }
    }
    Ok((format!(" WHERE {}", parts.join(" AND ")), binds))
}

fn sql_value(collection: Collection, column: &str, kind: ColumnKind, value: Value) -> Result<SqlValue> {
    let invalid = || GatewayError::InvalidValue {
        collection,
        column: column.to_owned(),
    };
    let converted = match (kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnKind::Integer, Value::Number(n)) => SqlValue::Integer(n.as_i64().ok_or_else(invalid)?),
        (ColumnKind::Integer, Value::String(s)) => {
            SqlValue::Integer(s.trim().parse().map_err(|_| invalid())?)
        }
        (ColumnKind::Real, Value::Number(n)) => SqlValue::Real(n.as_f64().ok_or_else(invalid)?),
        (ColumnKind::Real, Value::String(s)) => SqlValue::Real(s.trim().parse().map_err(|_| invalid())?),
        (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s),
        (ColumnKind::Text, Value::Number(n)) => SqlValue::Text(n.to_string()),
        (ColumnKind::Text, Value::Bool(b)) => SqlValue::Text(b.to_string()),
        _ => return Err(invalid().into()),
    };
    Ok(converted)
}

fn bind_value(query: SqliteQuery<'_>, value: SqlValue) -> SqliteQuery<'_> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Integer(v) => query.bind(v),
        SqlValue::Real(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
    }
}

fn map_row(collection: Collection, row: &SqliteRow) -> Result<Row> {
    let mut out = Map::new();
    for (name, kind) in columns(collection) {
        let value = match kind {
            ColumnKind::Integer => row
                .try_get::<Option<i64>, _>(*name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnKind::Real => row
                .try_get::<Option<f64>, _>(*name)?
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnKind::Text => row
                .try_get::<Option<String>, _>(*name)?
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        out.insert((*name).to_owned(), value);
    }
    Ok(out)
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
