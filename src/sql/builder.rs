//! Builds parameterized SELECT, INSERT, UPDATE, DELETE for the Postgres driver.

use crate::datastore::{AggregateSpec, PageRequest};
use crate::instance::Attributes;
use serde_json::Value;

pub const MAX_PAGE_SIZE: u32 = 1000;

/// Quote identifier for PostgreSQL (identifiers come from registered config only).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

fn where_clause(q: &mut QueryBuf, filters: &[(String, Value)]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|(col, val)| {
            let n = q.push_param(val.clone());
            format!("{} = ${}", quoted(col), n)
        })
        .collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// SELECT rows by exact-match filters (all primary-key columns for get paths).
pub fn select(table: &str, filters: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, filters);
    q.sql = format!("SELECT * FROM {}{}", quoted(table), where_sql);
    q
}

/// SELECT one page: filters, ORDER BY the requested columns, LIMIT/OFFSET.
pub fn select_page(table: &str, filters: &[(String, Value)], page: &PageRequest) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, filters);
    let order_sql = if page.order_by.is_empty() {
        String::new()
    } else {
        format!(
            " ORDER BY {}",
            page.order_by.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ")
        )
    };
    let per_page = page.per_page.clamp(1, MAX_PAGE_SIZE);
    let offset = (page.page.max(1) as u64 - 1) * per_page as u64;
    q.sql = format!(
        "SELECT * FROM {}{}{} LIMIT {} OFFSET {}",
        quoted(table),
        where_sql,
        order_sql,
        per_page,
        offset
    );
    q
}

/// SELECT COUNT(*) with the same filters, for length-aware pagination.
pub fn count(table: &str, filters: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, filters);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", quoted(table), where_sql);
    q
}

/// One aggregate expression per spec, aliased agg0..aggN in spec order.
pub fn aggregates(table: &str, filters: &[(String, Value)], specs: &[AggregateSpec]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let selects: Vec<String> = specs
        .iter()
        .enumerate()
        .map(|(i, spec)| format!("{}({}) AS agg{}", spec.kind.sql_name(), quoted(&spec.column), i))
        .collect();
    let where_sql = where_clause(&mut q, filters);
    q.sql = format!("SELECT {} FROM {}{}", selects.join(", "), quoted(table), where_sql);
    q
}

/// INSERT the given columns; RETURNING * supplies the canonical stored row.
pub fn insert(table: &str, fields: &Attributes) -> QueryBuf {
    let mut q = QueryBuf::new();
    if fields.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quoted(table));
        return q;
    }
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (col, val) in fields {
        let n = q.push_param(val.clone());
        cols.push(quoted(col));
        placeholders.push(format!("${}", n));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        quoted(table),
        cols.join(", "),
        placeholders.join(", ")
    );
    q
}

/// UPDATE by filters: SET only the provided columns.
pub fn update(table: &str, filters: &[(String, Value)], fields: &Attributes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let sets: Vec<String> = fields
        .iter()
        .map(|(col, val)| {
            let n = q.push_param(val.clone());
            format!("{} = ${}", quoted(col), n)
        })
        .collect();
    let where_sql = where_clause(&mut q, filters);
    q.sql = format!("UPDATE {} SET {}{}", quoted(table), sets.join(", "), where_sql);
    q
}

/// DELETE by filters.
pub fn delete(table: &str, filters: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, filters);
    q.sql = format!("DELETE FROM {}{}", quoted(table), where_sql);
    q
}

/// Index metadata for a table: (sequence in index, index name, column name).
pub fn index_introspection(table: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.push_param(Value::String(table.to_string()));
    q.sql = "SELECT array_position(ix.indkey, a.attnum) + 1 AS sequence_in_index, \
             i.relname AS index_name, a.attname AS column_name \
             FROM pg_class t, pg_class i, pg_index ix, pg_attribute a \
             WHERE t.oid = ix.indrelid AND i.oid = ix.indexrelid \
             AND a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             AND t.relkind = 'r' AND t.relname = $1"
        .into();
    q
}
