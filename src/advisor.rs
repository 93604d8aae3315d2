//! Index metadata discovery with layered caches and a degrade policy.
//!
//! Answers come from, in order: a process-lifetime cache, a TTL-bounded cache
//! (default one day), then the driver's live introspection query. Once
//! discovery fails or proves no index exists for a table, filtering hints are
//! disabled for that (connection, table) for the rest of the process.

use crate::datastore::Datastore;
use crate::descriptor::ResourceDescriptor;
use crate::error::ResourceError;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One row of index metadata, as reported by the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRow {
    pub sequence_in_index: u32,
    pub index_name: String,
    pub column_name: String,
}

/// Reports which columns lead an index so callers can be warned about
/// unfilterable queries. Cache entries are keyed by connection identity plus
/// table name so distinct connections never collide. Rebuilding a cache entry
/// concurrently is harmless; no mutual exclusion beyond the locks is needed.
pub struct IndexAdvisor {
    ttl: Duration,
    process: RwLock<HashMap<String, Vec<IndexRow>>>,
    shared: RwLock<HashMap<String, (Instant, Vec<IndexRow>)>>,
    leading: RwLock<HashMap<String, Vec<String>>>,
    disabled: RwLock<HashSet<String>>,
}

impl IndexAdvisor {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            process: RwLock::new(HashMap::new()),
            shared: RwLock::new(HashMap::new()),
            leading: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashSet::new()),
        }
    }

    fn cache_key(store: &dyn Datastore, table: &str) -> String {
        format!("{}:{}", store.connection_key(), table)
    }

    /// Index rows for a table: process cache, then TTL cache, then the live
    /// introspection query. A failing cached path falls through to the live
    /// query instead of propagating.
    pub async fn indexes_for_table(
        &self,
        store: &dyn Datastore,
        table: &str,
    ) -> Result<Vec<IndexRow>, ResourceError> {
        let key = Self::cache_key(store, table);
        let hit = self.process.read().ok().and_then(|m| m.get(&key).cloned());
        if let Some(rows) = hit {
            return Ok(rows);
        }
        let cached = self.shared.read().ok().and_then(|m| {
            m.get(&key)
                .and_then(|(stored_at, rows)| (stored_at.elapsed() < self.ttl).then(|| rows.clone()))
        });
        if let Some(rows) = cached {
            if let Ok(mut process) = self.process.write() {
                process.insert(key, rows.clone());
            }
            return Ok(rows);
        }
        let rows = store.index_rows(table).await.map_err(ResourceError::from)?;
        if let Ok(mut shared) = self.shared.write() {
            shared.insert(key.clone(), (Instant::now(), rows.clone()));
        }
        if let Ok(mut process) = self.process.write() {
            process.insert(key, rows.clone());
        }
        Ok(rows)
    }

    /// Deduplicated columns that are first (sequence 1) in some index. Any
    /// failure, or an empty answer, disables filtering hints for this table
    /// for the rest of the process.
    pub async fn first_sequence_indexed_columns(
        &self,
        store: &dyn Datastore,
        table: &str,
    ) -> Vec<String> {
        let key = Self::cache_key(store, table);
        let memo = self.leading.read().ok().and_then(|m| m.get(&key).cloned());
        let columns = match memo {
            Some(columns) => columns,
            None => {
                let columns = match self.indexes_for_table(store, table).await {
                    Ok(rows) => {
                        let mut seen = HashSet::new();
                        rows.into_iter()
                            .filter(|r| r.sequence_in_index == 1)
                            .filter(|r| seen.insert(r.column_name.clone()))
                            .map(|r| r.column_name)
                            .collect()
                    }
                    Err(e) => {
                        tracing::error!(table = %table, error = %e, "error getting indexes");
                        Vec::new()
                    }
                };
                if let Ok(mut leading) = self.leading.write() {
                    leading.insert(key.clone(), columns.clone());
                }
                columns
            }
        };
        if columns.is_empty() {
            if let Ok(mut disabled) = self.disabled.write() {
                disabled.insert(key);
            }
        }
        columns
    }

    /// Whether filtering hints are still active for this resource's table.
    pub fn filtering_required(&self, store: &dyn Datastore, descriptor: &ResourceDescriptor) -> bool {
        if !descriptor.index_filtering_required {
            return false;
        }
        let key = Self::cache_key(store, &descriptor.table);
        !self.disabled.read().map(|d| d.contains(&key)).unwrap_or(false)
    }

    /// Name of an index covering `column`; `as_first` restricts to indexes
    /// the column leads.
    pub async fn index_for_column(
        &self,
        store: &dyn Datastore,
        table: &str,
        column: &str,
        as_first: bool,
    ) -> Result<String, ResourceError> {
        let rows = self.indexes_for_table(store, table).await?;
        rows.into_iter()
            .find(|r| r.column_name == column && (!as_first || r.sequence_in_index == 1))
            .map(|r| r.index_name)
            .ok_or_else(|| ResourceError::NotFound {
                resource: format!("index for column {}", column),
            })
    }
}

impl Default for IndexAdvisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryStore;

    fn descriptor(table: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            name: "Order".into(),
            table: table.into(),
            primary_key_columns: vec!["id".into()],
            fillable_columns: Vec::new(),
            create_excluded: Vec::new(),
            update_excluded: Vec::new(),
            update_allowed_override: Vec::new(),
            relations: Vec::new(),
            auto_increment: true,
            deletable: false,
            index_filtering_required: true,
            created_at_column: None,
            updated_at_column: None,
            separator: "_".into(),
            validation: Default::default(),
        }
    }

    fn index_row(seq: u32, index: &str, column: &str) -> IndexRow {
        IndexRow {
            sequence_in_index: seq,
            index_name: index.into(),
            column_name: column.into(),
        }
    }

    #[tokio::test]
    async fn leading_columns_are_filtered_and_deduplicated() {
        let store = MemoryStore::new();
        store.set_index_rows(
            "orders",
            vec![
                index_row(1, "pk", "id"),
                index_row(1, "uq_status", "status"),
                index_row(2, "uq_status", "name"),
                index_row(1, "uq_status_2", "status"),
            ],
        );
        let advisor = IndexAdvisor::new();
        let columns = advisor.first_sequence_indexed_columns(&store, "orders").await;
        assert_eq!(columns, vec!["id", "status"]);
        assert!(advisor.filtering_required(&store, &descriptor("orders")));
    }

    #[tokio::test]
    async fn process_cache_short_circuits_later_changes() {
        let store = MemoryStore::new();
        store.set_index_rows("orders", vec![index_row(1, "pk", "id")]);
        let advisor = IndexAdvisor::new();
        assert_eq!(advisor.indexes_for_table(&store, "orders").await.unwrap().len(), 1);
        store.set_index_rows("orders", Vec::new());
        assert_eq!(advisor.indexes_for_table(&store, "orders").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn introspection_failure_disables_hints_for_the_process() {
        let store = MemoryStore::new();
        store.disable_index_introspection();
        let advisor = IndexAdvisor::new();
        let d = descriptor("orders");
        assert!(advisor.first_sequence_indexed_columns(&store, "orders").await.is_empty());
        assert!(!advisor.filtering_required(&store, &d));
        // stays disabled even if the backend would now answer
        store.set_index_rows("orders", vec![index_row(1, "pk", "id")]);
        assert!(!advisor.filtering_required(&store, &d));
    }

    #[tokio::test]
    async fn empty_index_metadata_disables_hints() {
        let store = MemoryStore::new();
        store.set_index_rows("orders", Vec::new());
        let advisor = IndexAdvisor::new();
        assert!(advisor.first_sequence_indexed_columns(&store, "orders").await.is_empty());
        assert!(!advisor.filtering_required(&store, &descriptor("orders")));
    }

    #[tokio::test]
    async fn index_for_column_honours_the_leading_flag() {
        let store = MemoryStore::new();
        store.set_index_rows(
            "orders",
            vec![index_row(2, "uq_status", "name"), index_row(1, "ix_name", "name")],
        );
        let advisor = IndexAdvisor::new();
        let name = advisor.index_for_column(&store, "orders", "name", true).await.unwrap();
        assert_eq!(name, "ix_name");
        assert!(advisor.index_for_column(&store, "orders", "missing", false).await.is_err());
    }
}
