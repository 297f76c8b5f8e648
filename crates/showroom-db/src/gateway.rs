//! Table-oriented contract shared by the hosted and local record stores.
//!
//! Every collection the site uses (`cars`, `gallery`, `admin`) is reached
//! through [`DataGateway`]. Rows travel as JSON objects so the same calls work
//! against a PostgREST endpoint and the embedded SQLite store; typed records
//! are produced with [`crate::from_row`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::{Collection, Row};

/// Equality predicate on a single column (`column = value`).
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Shorthand for the primary-key filter used by edit and delete paths.
    pub fn id(id: i64) -> Self {
        Self::eq("id", id)
    }
}

/// Sort specification for ordered selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Creation time, newest first. Every listing on the site uses this.
    pub fn newest_first() -> Self {
        Self::desc("created_at")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// All rows of a collection, newest first, optionally capped.
    pub fn newest(limit: Option<u32>) -> Self {
        Self {
            filters: Vec::new(),
            order: Some(Order::newest_first()),
            limit,
        }
    }
}

/// Remote data gateway contract.
///
/// Implementations must treat `update` and `delete` without filters as an
/// error rather than touching every row.
#[async_trait]
pub trait DataGateway: Send + Sync + 'static {
    async fn select(&self, collection: Collection, query: &SelectQuery) -> Result<Vec<Row>>;

    async fn insert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>>;

    /// Overwrites the given columns on every row matching `filters` and
    /// returns the number of rows touched.
    async fn update(&self, collection: Collection, filters: &[Filter], changes: Row) -> Result<u64>;

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<u64>;

    async fn count(&self, collection: Collection) -> Result<u64>;

    /// Single-row fetch; `None` when nothing matches.
    async fn fetch_one(&self, collection: Collection, filters: &[Filter]) -> Result<Option<Row>> {
        let query = SelectQuery {
            filters: filters.to_vec(),
            order: None,
            limit: Some(1),
        };
        Ok(self.select(collection, &query).await?.into_iter().next())
    }
}
