//! In-memory driver for tests and embedded use.
//!
//! Rows live in per-table vectors; filters are exact-match with lenient
//! scalar comparison (identifier values arrive as strings). Index metadata is
//! whatever the caller configured; introspection can be switched off to
//! simulate an unsupported backend, and individual tables can be failed to
//! exercise degrade paths.

use crate::advisor::IndexRow;
use crate::datastore::{AggregateKind, AggregateSpec, Datastore, DatastoreError, PageRequest, RowPage};
use crate::instance::Attributes;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
struct Table {
    rows: Vec<Attributes>,
    auto_column: Option<String>,
    next_id: i64,
}

pub struct MemoryStore {
    connection_key: String,
    tables: RwLock<HashMap<String, Table>>,
    indexes: RwLock<HashMap<String, Vec<IndexRow>>>,
    introspection: RwLock<bool>,
    failing: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(connection_key: impl Into<String>) -> Self {
        Self {
            connection_key: connection_key.into(),
            tables: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            introspection: RwLock::new(true),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Declare a table; `auto_column` gets a server-assigned id on insert.
    pub fn create_table(&self, name: &str, auto_column: Option<&str>) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(
                name.to_string(),
                Table {
                    rows: Vec::new(),
                    auto_column: auto_column.map(String::from),
                    next_id: 1,
                },
            );
        }
    }

    pub fn seed(&self, table: &str, row: Attributes) {
        if let Ok(mut tables) = self.tables.write() {
            tables.entry(table.to_string()).or_default().rows.push(row);
        }
    }

    pub fn set_index_rows(&self, table: &str, rows: Vec<IndexRow>) {
        if let Ok(mut indexes) = self.indexes.write() {
            indexes.insert(table.to_string(), rows);
        }
    }

    /// Simulate a backend without index introspection support.
    pub fn disable_index_introspection(&self) {
        if let Ok(mut flag) = self.introspection.write() {
            *flag = false;
        }
    }

    /// Every operation against this table fails from now on.
    pub fn fail_on(&self, table: &str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(table.to_string());
        }
    }

    /// Stored rows, for assertions.
    pub fn rows(&self, table: &str) -> Vec<Attributes> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    fn check(&self, table: &str) -> Result<(), DatastoreError> {
        let failing = self
            .failing
            .read()
            .map(|f| f.contains(table))
            .unwrap_or(false);
        if failing {
            return Err(DatastoreError::Other(format!("simulated failure for table {}", table)));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_repr(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Exact match with lenient scalar comparison: "7" matches 7.
fn values_match(stored: Option<&Value>, filter: &Value) -> bool {
    let stored = stored.unwrap_or(&Value::Null);
    if stored == filter {
        return true;
    }
    match (scalar_repr(stored), scalar_repr(filter)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn matches(row: &Attributes, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(col, val)| values_match(row.get(col), val))
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (x, y) => {
            let x = x.and_then(scalar_repr).unwrap_or_default();
            let y = y.and_then(scalar_repr).unwrap_or_default();
            x.cmp(&y)
        }
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    fn connection_key(&self) -> String {
        self.connection_key.clone()
    }

    async fn fetch_one(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Option<Attributes>, DatastoreError> {
        self.check(table)?;
        Ok(self
            .tables
            .read()
            .ok()
            .and_then(|tables| {
                tables
                    .get(table)
                    .and_then(|t| t.rows.iter().find(|r| matches(r, filters)).cloned())
            }))
    }

    async fn fetch_all(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<Attributes>, DatastoreError> {
        self.check(table)?;
        Ok(self
            .tables
            .read()
            .ok()
            .and_then(|tables| {
                tables
                    .get(table)
                    .map(|t| t.rows.iter().filter(|r| matches(r, filters)).cloned().collect())
            })
            .unwrap_or_default())
    }

    async fn fetch_page(
        &self,
        table: &str,
        filters: &[(String, Value)],
        page: &PageRequest,
    ) -> Result<RowPage, DatastoreError> {
        self.check(table)?;
        let mut rows: Vec<Attributes> = self.fetch_all(table, filters).await?;
        for column in page.order_by.iter().rev() {
            rows.sort_by(|a, b| compare_cells(a.get(column), b.get(column)));
        }
        let total = if page.simple { None } else { Some(rows.len() as u64) };
        let per_page = page.per_page.max(1) as usize;
        let start = (page.page.max(1) as usize - 1) * per_page;
        let items = rows.into_iter().skip(start).take(per_page).collect();
        Ok(RowPage { items, total })
    }

    async fn aggregate(
        &self,
        table: &str,
        filters: &[(String, Value)],
        specs: &[AggregateSpec],
    ) -> Result<Vec<Value>, DatastoreError> {
        self.check(table)?;
        let rows = self.fetch_all(table, filters).await?;
        Ok(specs
            .iter()
            .map(|spec| {
                let values: Vec<f64> = rows
                    .iter()
                    .filter_map(|r| r.get(&spec.column).and_then(Value::as_f64))
                    .collect();
                if values.is_empty() {
                    return Value::Null;
                }
                let result = match spec.kind {
                    AggregateKind::Sum => values.iter().sum(),
                    AggregateKind::Avg => values.iter().sum::<f64>() / values.len() as f64,
                    AggregateKind::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
                    AggregateKind::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                };
                serde_json::Number::from_f64(result)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            })
            .collect())
    }

    async fn insert(&self, table: &str, fields: &Attributes) -> Result<Attributes, DatastoreError> {
        self.check(table)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| DatastoreError::Other("table lock poisoned".into()))?;
        let entry = tables.entry(table.to_string()).or_default();
        let mut row = Attributes::new();
        if let Some(auto) = entry.auto_column.clone() {
            let provided = fields.get(&auto).map(|v| !v.is_null()).unwrap_or(false);
            if !provided {
                row.insert(auto, Value::Number(entry.next_id.into()));
                entry.next_id += 1;
            }
        }
        for (k, v) in fields {
            row.insert(k.clone(), v.clone());
        }
        entry.rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[(String, Value)],
        fields: &Attributes,
    ) -> Result<u64, DatastoreError> {
        self.check(table)?;
        if fields.is_empty() {
            return Ok(0);
        }
        let mut tables = self
            .tables
            .write()
            .map_err(|_| DatastoreError::Other("table lock poisoned".into()))?;
        let mut affected = 0;
        if let Some(entry) = tables.get_mut(table) {
            for row in entry.rows.iter_mut().filter(|r| matches(r, filters)) {
                for (k, v) in fields {
                    row.insert(k.clone(), v.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, filters: &[(String, Value)]) -> Result<u64, DatastoreError> {
        self.check(table)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| DatastoreError::Other("table lock poisoned".into()))?;
        let Some(entry) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = entry.rows.len();
        entry.rows.retain(|r| !matches(r, filters));
        Ok((before - entry.rows.len()) as u64)
    }

    async fn index_rows(&self, table: &str) -> Result<Vec<IndexRow>, DatastoreError> {
        self.check(table)?;
        let enabled = self.introspection.read().map(|f| *f).unwrap_or(true);
        if !enabled {
            return Err(DatastoreError::UnsupportedBackend("memory".into()));
        }
        Ok(self
            .indexes
            .read()
            .ok()
            .and_then(|indexes| indexes.get(table).cloned())
            .unwrap_or_default())
    }
}
