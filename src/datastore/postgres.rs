//! PostgreSQL driver on sqlx.

use crate::advisor::IndexRow;
use crate::datastore::{AggregateSpec, Datastore, DatastoreError, PageRequest, RowPage};
use crate::instance::Attributes;
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row};

pub struct PostgresStore {
    pool: PgPool,
    connection_key: String,
}

impl PostgresStore {
    /// `connection_key` identifies this connection in the index caches; use
    /// something stable per database (name or URL).
    pub fn new(pool: PgPool, connection_key: impl Into<String>) -> Self {
        Self {
            pool,
            connection_key: connection_key.into(),
        }
    }

    async fn run_query(&self, q: &QueryBuf) -> Result<Vec<PgRow>, DatastoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, DatastoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}

#[async_trait]
impl Datastore for PostgresStore {
    fn connection_key(&self) -> String {
        self.connection_key.clone()
    }

    async fn fetch_one(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Option<Attributes>, DatastoreError> {
        let q = sql::select(table, filters);
        let rows = self.run_query(&q).await?;
        Ok(rows.first().map(row_to_attributes))
    }

    async fn fetch_all(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<Attributes>, DatastoreError> {
        let q = sql::select(table, filters);
        let rows = self.run_query(&q).await?;
        Ok(rows.iter().map(row_to_attributes).collect())
    }

    async fn fetch_page(
        &self,
        table: &str,
        filters: &[(String, Value)],
        page: &PageRequest,
    ) -> Result<RowPage, DatastoreError> {
        let q = sql::select_page(table, filters, page);
        let rows = self.run_query(&q).await?;
        let items = rows.iter().map(row_to_attributes).collect();
        let total = if page.simple {
            None
        } else {
            let c = sql::count(table, filters);
            tracing::debug!(sql = %c.sql, params = ?c.params, "query");
            let mut query = sqlx::query_scalar::<_, i64>(&c.sql);
            for p in &c.params {
                query = query.bind(PgBindValue::from_json(p));
            }
            Some(query.fetch_one(&self.pool).await?.max(0) as u64)
        };
        Ok(RowPage { items, total })
    }

    async fn aggregate(
        &self,
        table: &str,
        filters: &[(String, Value)],
        specs: &[AggregateSpec],
    ) -> Result<Vec<Value>, DatastoreError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let q = sql::aggregates(table, filters, specs);
        let rows = self.run_query(&q).await?;
        let Some(row) = rows.first() else {
            return Ok(vec![Value::Null; specs.len()]);
        };
        Ok((0..specs.len())
            .map(|i| cell_to_value(row, &format!("agg{}", i)))
            .collect())
    }

    async fn insert(&self, table: &str, fields: &Attributes) -> Result<Attributes, DatastoreError> {
        let q = sql::insert(table, fields);
        let rows = self.run_query(&q).await?;
        rows.first()
            .map(row_to_attributes)
            .ok_or_else(|| DatastoreError::Other("insert returned no row".into()))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[(String, Value)],
        fields: &Attributes,
    ) -> Result<u64, DatastoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.execute(&sql::update(table, filters, fields)).await
    }

    async fn delete(&self, table: &str, filters: &[(String, Value)]) -> Result<u64, DatastoreError> {
        self.execute(&sql::delete(table, filters)).await
    }

    async fn index_rows(&self, table: &str) -> Result<Vec<IndexRow>, DatastoreError> {
        let q = sql::index_introspection(table);
        let rows = self.run_query(&q).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let sequence: i32 = row.try_get("sequence_in_index")?;
            let index_name: String = row.try_get("index_name")?;
            let column_name: String = row.try_get("column_name")?;
            out.push(IndexRow {
                sequence_in_index: sequence.max(0) as u32,
                index_name,
                column_name,
            });
        }
        Ok(out)
    }
}

fn row_to_attributes(row: &PgRow) -> Attributes {
    let mut map = Attributes::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
