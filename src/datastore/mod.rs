//! Datastore driver contract and implementations.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::advisor::IndexRow;
use crate::instance::Attributes;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unsupported database backend '{0}' for retrieving indexes")]
    UnsupportedBackend(String),
    #[error("datastore: {0}")]
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AggregateSpec {
    pub kind: AggregateKind,
    pub column: String,
}

/// Page slice request; `order_by` keeps pagination deterministic.
#[derive(Clone, Debug)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
    /// Simple pagination skips the total count round-trip.
    pub simple: bool,
    pub order_by: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RowPage {
    pub items: Vec<Attributes>,
    pub total: Option<u64>,
}

/// Relational driver capabilities the engine consumes: fetch by exact-match
/// filter, insert with a write-path read, update/delete by filter, raw index
/// introspection, and a connection identity usable as a cache key. Timeouts
/// and retries are the driver's own concern.
#[async_trait]
pub trait Datastore: Send + Sync {
    fn connection_key(&self) -> String;

    async fn fetch_one(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Option<Attributes>, DatastoreError>;

    async fn fetch_all(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<Attributes>, DatastoreError>;

    async fn fetch_page(
        &self,
        table: &str,
        filters: &[(String, Value)],
        page: &PageRequest,
    ) -> Result<RowPage, DatastoreError>;

    /// One value per spec, in spec order; non-computable aggregates are null.
    async fn aggregate(
        &self,
        table: &str,
        filters: &[(String, Value)],
        specs: &[AggregateSpec],
    ) -> Result<Vec<Value>, DatastoreError>;

    /// Insert and return the stored row (strongly consistent write-path read).
    async fn insert(&self, table: &str, fields: &Attributes) -> Result<Attributes, DatastoreError>;

    async fn update(
        &self,
        table: &str,
        filters: &[(String, Value)],
        fields: &Attributes,
    ) -> Result<u64, DatastoreError>;

    async fn delete(&self, table: &str, filters: &[(String, Value)]) -> Result<u64, DatastoreError>;

    /// Raw index introspection; unsupported backends fail with
    /// `UnsupportedBackend` at first use.
    async fn index_rows(&self, table: &str) -> Result<Vec<IndexRow>, DatastoreError>;
}
