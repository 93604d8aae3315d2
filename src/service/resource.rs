//! Descriptor-driven create/read/update/list/delete.

use crate::advisor::IndexAdvisor;
use crate::case::to_snake_case;
use crate::datastore::{AggregateSpec, Datastore, PageRequest};
use crate::descriptor::{
    RelationDescriptor, RelationKind, ResourceDescriptor, ResourceRegistry, UpdateGuard,
};
use crate::error::ResourceError;
use crate::identity;
use crate::instance::{Attributes, ResourceInstance};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 1000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Orchestrates the generic CRUD algorithm: identifier decoding, column
/// restriction, relation attachment, and index hints. Each operation is one
/// synchronous sequence of driver round-trips; nothing is cached here.
pub struct ResourceService {
    registry: Arc<ResourceRegistry>,
    store: Arc<dyn Datastore>,
    advisor: Arc<IndexAdvisor>,
    guard: UpdateGuard,
}

impl ResourceService {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        store: Arc<dyn Datastore>,
        advisor: Arc<IndexAdvisor>,
    ) -> Self {
        Self {
            registry,
            store,
            advisor,
            guard: UpdateGuard::Lenient,
        }
    }

    /// Switch forbidden-update handling to fail-loud (for test rigs).
    pub fn with_update_guard(mut self, guard: UpdateGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    /// Unexecuted page query scoped to the resource's table. Filters and
    /// pagination are layered on by the caller; nothing touches the
    /// datastore until `execute`.
    pub fn list(&self, descriptor: &Arc<ResourceDescriptor>) -> ListQuery {
        ListQuery {
            descriptor: descriptor.clone(),
            store: self.store.clone(),
            filters: Vec::new(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            simple: false,
        }
    }

    /// Columns the caller should filter on for indexed access; empty once
    /// discovery has degraded for this table.
    pub async fn index_required_on_filtering(&self, descriptor: &ResourceDescriptor) -> Vec<String> {
        if !self.advisor.filtering_required(self.store.as_ref(), descriptor) {
            return Vec::new();
        }
        self.advisor
            .first_sequence_indexed_columns(self.store.as_ref(), &descriptor.table)
            .await
    }

    /// Fetch one row by identifier, attach the requested declared relations
    /// (strictly: any failure aborts), optionally append the index hint.
    pub async fn get(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        identifier: &str,
        relations: &[String],
        append_index: bool,
    ) -> Result<ResourceInstance, ResourceError> {
        let mut instance = self.fetch_by_identifier(descriptor, identifier).await?;
        self.attach_relations(descriptor, &mut instance, relations, false).await?;
        if append_index {
            let columns = self.index_required_on_filtering(descriptor).await;
            if !columns.is_empty() {
                instance.append_index_attribute(columns);
            }
        }
        Ok(instance)
    }

    async fn fetch_by_identifier(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        identifier: &str,
    ) -> Result<ResourceInstance, ResourceError> {
        let conditions = self.extract_identifier_conditions(descriptor, identifier)?;
        let row = self
            .store
            .fetch_one(&descriptor.table, &conditions)
            .await
            .map_err(ResourceError::from)?;
        match row {
            Some(attributes) => Ok(ResourceInstance::from_row(descriptor.clone(), attributes)),
            None => Err(ResourceError::NotFound {
                resource: descriptor.name.clone(),
            }),
        }
    }

    /// Restrict the field map to externally creatable columns, stamp
    /// `created_at`, insert, and return the canonical stored row.
    pub async fn create(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        fields: &Attributes,
    ) -> Result<ResourceInstance, ResourceError> {
        let allowlist = descriptor.create_column_allowlist();
        let mut insert_fields = filter_by_keys(fields, &allowlist);
        if let Some(column) = &descriptor.created_at_column {
            if !insert_fields.contains_key(column) {
                insert_fields.insert(column.clone(), Value::String(timestamp()));
            }
        }
        let stored = self
            .store
            .insert(&descriptor.table, &insert_fields)
            .await
            .map_err(ResourceError::from)?;
        Ok(ResourceInstance::from_row(descriptor.clone(), stored))
    }

    /// Fetch the current row, apply the externally updatable subset through
    /// the guard, stamp `updated_at`, persist the changed columns, and return
    /// the instance reflecting the new values.
    pub async fn update(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        identifier: &str,
        fields: &Attributes,
    ) -> Result<ResourceInstance, ResourceError> {
        let allowlist = descriptor.update_column_allowlist();
        self.apply_and_persist(descriptor, identifier, filter_by_keys(fields, &allowlist))
            .await
    }

    /// Trusted (non-external) update path: skips the external column
    /// restriction, so `update_allowed_override` columns may change. The
    /// guard still protects the rest of `update_excluded`.
    pub async fn update_trusted(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        identifier: &str,
        fields: &Attributes,
    ) -> Result<ResourceInstance, ResourceError> {
        let allowlist = descriptor.effective_columns(true);
        self.apply_and_persist(descriptor, identifier, filter_by_keys(fields, &allowlist))
            .await
    }

    async fn apply_and_persist(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        identifier: &str,
        update_fields: Attributes,
    ) -> Result<ResourceInstance, ResourceError> {
        let mut instance = self.fetch_by_identifier(descriptor, identifier).await?;
        let conditions = self.extract_identifier_conditions(descriptor, identifier)?;
        let original_updated_at = descriptor
            .updated_at_column
            .as_ref()
            .and_then(|column| instance.get(column).cloned());
        let mut changed = instance.apply(&update_fields, self.guard)?;
        if changed.is_empty() {
            return Ok(instance);
        }
        if let Some(column) = &descriptor.updated_at_column {
            // An explicitly empty updated_at pins the stored value.
            let pinned = matches!(update_fields.get(column), Some(Value::String(s)) if s.is_empty());
            if pinned {
                changed.remove(column);
                instance.set_raw(column, original_updated_at.unwrap_or(Value::Null));
            } else {
                let stamp = Value::String(timestamp());
                instance.set_raw(column, stamp.clone());
                changed.insert(column.clone(), stamp);
            }
        }
        self.store
            .update(&descriptor.table, &conditions, &changed)
            .await
            .map_err(ResourceError::from)?;
        Ok(instance)
    }

    /// Deleting is opt-in per descriptor; the default is forbidden.
    pub async fn delete(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        identifier: &str,
    ) -> Result<bool, ResourceError> {
        if !descriptor.deletable {
            return Err(ResourceError::OperationNotPermitted {
                resource: descriptor.name.clone(),
            });
        }
        let conditions = self.extract_identifier_conditions(descriptor, identifier)?;
        let affected = self
            .store
            .delete(&descriptor.table, &conditions)
            .await
            .map_err(ResourceError::from)?;
        Ok(affected > 0)
    }

    /// Whether a failed update may fall back to create: only for externally
    /// keyed resources whose request body supplies the whole identity.
    pub fn is_update_or_create_able(&self, descriptor: &ResourceDescriptor, body: &Attributes) -> bool {
        if descriptor.auto_increment || !descriptor.has_identity() {
            return false;
        }
        descriptor
            .primary_key_columns
            .iter()
            .all(|column| body.contains_key(column))
    }

    pub fn extract_identifier_conditions(
        &self,
        descriptor: &ResourceDescriptor,
        identifier: &str,
    ) -> Result<Vec<(String, Value)>, ResourceError> {
        identity::decode(descriptor, identifier)
    }

    /// Attach each requested, declared relation; undeclared names are
    /// silently ignored. `tolerant` keeps going on per-relation failures
    /// (export/list contexts); the request-path `get` aborts on the first.
    pub async fn attach_relations(
        &self,
        descriptor: &Arc<ResourceDescriptor>,
        instance: &mut ResourceInstance,
        relations: &[String],
        tolerant: bool,
    ) -> Result<(), ResourceError> {
        for requested in relations {
            let name = to_snake_case(requested);
            let Some((relation, target)) = self.registry.resolve_relation(descriptor, &name) else {
                continue;
            };
            match self.load_relation(&relation, &target, instance).await {
                Ok(value) => instance.attach_relation(&relation.name, value),
                Err(e) if tolerant => {
                    tracing::error!(
                        resource = %descriptor.name,
                        relation = %relation.name,
                        error = %e,
                        "failed to attach relation"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn load_relation(
        &self,
        relation: &RelationDescriptor,
        target: &Arc<ResourceDescriptor>,
        instance: &ResourceInstance,
    ) -> Result<Value, ResourceError> {
        let local = instance.get(&relation.local_key).cloned().unwrap_or(Value::Null);
        let rows = self
            .store
            .fetch_all(&target.table, &[(relation.foreign_key.clone(), local)])
            .await
            .map_err(ResourceError::from)?;
        Ok(match relation.kind {
            RelationKind::ToOne => rows
                .into_iter()
                .next()
                .map(Value::Object)
                .unwrap_or(Value::Null),
            RelationKind::ToMany => Value::Array(rows.into_iter().map(Value::Object).collect()),
        })
    }

    /// Aggregates computed with the same filters the page used.
    pub async fn aggregate(
        &self,
        descriptor: &ResourceDescriptor,
        filters: &[(String, Value)],
        specs: &[AggregateSpec],
    ) -> Result<Vec<Value>, ResourceError> {
        self.store
            .aggregate(&descriptor.table, filters, specs)
            .await
            .map_err(ResourceError::from)
    }
}

fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn filter_by_keys(fields: &Attributes, keys: &[String]) -> Attributes {
    fields
        .iter()
        .filter(|(k, _)| keys.iter().any(|key| key == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Unexecuted, filterable page query returned by `ResourceService::list`.
pub struct ListQuery {
    descriptor: Arc<ResourceDescriptor>,
    store: Arc<dyn Datastore>,
    filters: Vec<(String, Value)>,
    page: u32,
    per_page: u32,
    simple: bool,
}

impl ListQuery {
    pub fn filter(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push((column.into(), value));
        self
    }

    pub fn filters(mut self, filters: Vec<(String, Value)>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }

    pub fn simple(mut self, simple: bool) -> Self {
        self.simple = simple;
        self
    }

    pub fn filter_pairs(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub async fn execute(&self) -> Result<Page, ResourceError> {
        let request = PageRequest {
            page: self.page,
            per_page: self.per_page,
            simple: self.simple,
            order_by: self.descriptor.primary_key_columns.clone(),
        };
        let rows = self
            .store
            .fetch_page(&self.descriptor.table, &self.filters, &request)
            .await
            .map_err(ResourceError::from)?;
        Ok(Page {
            items: rows
                .items
                .into_iter()
                .map(|attributes| ResourceInstance::from_row(self.descriptor.clone(), attributes))
                .collect(),
            per_page: self.per_page,
            current_page: self.page,
            total: rows.total,
        })
    }
}

pub struct Page {
    pub items: Vec<ResourceInstance>,
    pub per_page: u32,
    pub current_page: u32,
    pub total: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryStore;
    use crate::descriptor::{RegistryBuilder, RelationDescriptor, RelationKind};
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().unwrap().clone()
    }

    fn order_descriptor() -> ResourceDescriptor {
        ResourceDescriptor {
            name: "Order".into(),
            table: "orders".into(),
            primary_key_columns: vec!["id".into()],
            fillable_columns: vec!["name".into(), "status".into()],
            create_excluded: Vec::new(),
            update_excluded: vec!["status".into()],
            update_allowed_override: Vec::new(),
            relations: vec![RelationDescriptor {
                name: "items".into(),
                target: "OrderItem".into(),
                kind: RelationKind::ToMany,
                local_key: "id".into(),
                foreign_key: "order_id".into(),
            }],
            auto_increment: true,
            deletable: false,
            index_filtering_required: true,
            created_at_column: Some("created_at".into()),
            updated_at_column: Some("updated_at".into()),
            separator: "_".into(),
            validation: Default::default(),
        }
    }

    fn item_descriptor() -> ResourceDescriptor {
        ResourceDescriptor {
            name: "OrderItem".into(),
            table: "order_items".into(),
            primary_key_columns: vec!["id".into()],
            fillable_columns: vec!["order_id".into(), "sku".into()],
            create_excluded: Vec::new(),
            update_excluded: Vec::new(),
            update_allowed_override: Vec::new(),
            relations: Vec::new(),
            auto_increment: true,
            deletable: true,
            index_filtering_required: true,
            created_at_column: None,
            updated_at_column: None,
            separator: "_".into(),
            validation: Default::default(),
        }
    }

    fn listing_descriptor() -> ResourceDescriptor {
        ResourceDescriptor {
            name: "Listing".into(),
            table: "listings".into(),
            primary_key_columns: vec!["tenant".into(), "sku".into()],
            fillable_columns: vec!["tenant".into(), "sku".into(), "price".into()],
            create_excluded: Vec::new(),
            update_excluded: Vec::new(),
            update_allowed_override: Vec::new(),
            relations: Vec::new(),
            auto_increment: false,
            deletable: true,
            index_filtering_required: true,
            created_at_column: None,
            updated_at_column: None,
            separator: "_".into(),
            validation: Default::default(),
        }
    }

    struct Rig {
        store: Arc<MemoryStore>,
        service: ResourceService,
    }

    fn rig() -> Rig {
        let registry = Arc::new(
            RegistryBuilder::new()
                .register(order_descriptor())
                .register(item_descriptor())
                .register(listing_descriptor())
                .build()
                .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        store.create_table("orders", Some("id"));
        store.create_table("order_items", Some("id"));
        store.create_table("listings", None);
        let service = ResourceService::new(registry, store.clone(), Arc::new(IndexAdvisor::new()));
        Rig { store, service }
    }

    #[tokio::test]
    async fn create_strips_excluded_columns_and_assigns_identity() {
        let r = rig();
        let d = r.service.registry().get("Order").unwrap();
        let created = r
            .service
            .create(&d, &attrs(json!({"name": "a", "status": "x", "id": 999})))
            .await
            .unwrap();
        assert_eq!(created.get("id"), Some(&json!(1)));
        assert_eq!(created.get("name"), Some(&json!("a")));
        assert_eq!(created.get("status"), Some(&json!("x")));
        assert!(created.get("created_at").is_some());
    }

    #[tokio::test]
    async fn get_missing_row_is_not_found() {
        let r = rig();
        let d = r.service.registry().get("Order").unwrap();
        let err = r.service.get(&d, "missing-id", &[], true).await.unwrap_err();
        assert!(matches!(err, ResourceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_keeps_forbidden_columns_without_raising() {
        let r = rig();
        let d = r.service.registry().get("Order").unwrap();
        let created = r
            .service
            .create(&d, &attrs(json!({"name": "a", "status": "open"})))
            .await
            .unwrap();
        let id = created.primary_key_identifier().unwrap();
        let updated = r
            .service
            .update(&d, &id, &attrs(json!({"name": "b", "status": "closed"})))
            .await
            .unwrap();
        assert_eq!(updated.get("name"), Some(&json!("b")));
        assert_eq!(updated.get("status"), Some(&json!("open")));
        let stored = r.store.rows("orders").pop().unwrap();
        assert_eq!(stored.get("status"), Some(&json!("open")));
        assert!(stored.get("updated_at").is_some());
    }

    #[tokio::test]
    async fn strict_guard_turns_forbidden_trusted_updates_into_errors() {
        let r = rig();
        let service = ResourceService::new(
            r.service.registry().clone(),
            r.store.clone(),
            Arc::new(IndexAdvisor::new()),
        )
        .with_update_guard(UpdateGuard::Strict);
        let d = service.registry().get("Order").unwrap();
        let created = service
            .create(&d, &attrs(json!({"name": "a", "status": "open"})))
            .await
            .unwrap();
        let id = created.primary_key_identifier().unwrap();
        let err = service
            .update_trusted(&d, &id, &attrs(json!({"status": "closed"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Development(_)));
    }

    #[tokio::test]
    async fn trusted_updates_may_change_override_columns() {
        let r = rig();
        let registry = Arc::new(
            RegistryBuilder::new()
                .register(ResourceDescriptor {
                    update_excluded: vec!["name".into(), "status".into()],
                    update_allowed_override: vec!["name".into()],
                    ..order_descriptor()
                })
                .register(item_descriptor())
                .register(listing_descriptor())
                .build()
                .unwrap(),
        );
        let service = ResourceService::new(registry, r.store.clone(), Arc::new(IndexAdvisor::new()));
        let d = service.registry().get("Order").unwrap();
        let created = service
            .create(&d, &attrs(json!({"name": "a", "status": "open"})))
            .await
            .unwrap();
        let id = created.primary_key_identifier().unwrap();
        // external update cannot touch either column
        let updated = service
            .update(&d, &id, &attrs(json!({"name": "b", "status": "closed"})))
            .await
            .unwrap();
        assert_eq!(updated.get("name"), Some(&json!("a")));
        // trusted update may change the override column, not the guarded one
        let updated = service
            .update_trusted(&d, &id, &attrs(json!({"name": "b", "status": "closed"})))
            .await
            .unwrap();
        assert_eq!(updated.get("name"), Some(&json!("b")));
        assert_eq!(updated.get("status"), Some(&json!("open")));
    }

    #[tokio::test]
    async fn update_without_changes_is_a_no_op() {
        let r = rig();
        let d = r.service.registry().get("Order").unwrap();
        let created = r
            .service
            .create(&d, &attrs(json!({"name": "a", "status": "open"})))
            .await
            .unwrap();
        let id = created.primary_key_identifier().unwrap();
        let updated = r.service.update(&d, &id, &attrs(json!({"name": "a"}))).await.unwrap();
        // no stamp when nothing changed
        assert!(updated.get("updated_at").is_none());
    }

    #[tokio::test]
    async fn composite_identifiers_resolve_rows() {
        let r = rig();
        let d = r.service.registry().get("Listing").unwrap();
        r.service
            .create(&d, &attrs(json!({"tenant": "t1", "sku": "s1", "price": 5})))
            .await
            .unwrap();
        let got = r.service.get(&d, "t1_s1", &[], false).await.unwrap();
        assert_eq!(got.get("price"), Some(&json!(5)));
        assert_eq!(got.primary_key_identifier().unwrap(), "t1_s1");
    }

    #[tokio::test]
    async fn delete_is_forbidden_unless_opted_in() {
        let r = rig();
        let order = r.service.registry().get("Order").unwrap();
        let err = r.service.delete(&order, "1").await.unwrap_err();
        assert!(matches!(err, ResourceError::OperationNotPermitted { .. }));

        let item = r.service.registry().get("OrderItem").unwrap();
        let created = r
            .service
            .create(&item, &attrs(json!({"order_id": 1, "sku": "s"})))
            .await
            .unwrap();
        let id = created.primary_key_identifier().unwrap();
        assert!(r.service.delete(&item, &id).await.unwrap());
        assert!(!r.service.delete(&item, &id).await.unwrap());
    }

    #[tokio::test]
    async fn upsert_ability_requires_external_identity() {
        let r = rig();
        let order = r.service.registry().get("Order").unwrap();
        // auto-increment identity: never upsertable, whatever the body says
        assert!(!r.service.is_update_or_create_able(&order, &attrs(json!({"id": 1}))));
        let listing = r.service.registry().get("Listing").unwrap();
        assert!(r
            .service
            .is_update_or_create_able(&listing, &attrs(json!({"tenant": "t", "sku": "s"}))));
        assert!(!r.service.is_update_or_create_able(&listing, &attrs(json!({"tenant": "t"}))));
    }

    #[tokio::test]
    async fn relations_attach_under_their_declared_name() {
        let r = rig();
        let order = r.service.registry().get("Order").unwrap();
        let created = r
            .service
            .create(&order, &attrs(json!({"name": "a", "status": "open"})))
            .await
            .unwrap();
        let id = created.primary_key_identifier().unwrap();
        r.store.seed("order_items", attrs(json!({"id": 10, "order_id": 1, "sku": "s1"})));
        r.store.seed("order_items", attrs(json!({"id": 11, "order_id": 1, "sku": "s2"})));
        r.store.seed("order_items", attrs(json!({"id": 12, "order_id": 2, "sku": "s3"})));
        let got = r.service.get(&order, &id, &["items".into()], false).await.unwrap();
        let items = got.get("items").unwrap().as_array().unwrap();
        assert_eq!(items.len(), 2);
        // undeclared relation names are ignored, not errors
        assert!(r.service.get(&order, &id, &["ghost".into()], false).await.is_ok());
    }

    #[tokio::test]
    async fn strict_get_aborts_on_relation_failure_but_tolerant_attach_continues() {
        let r = rig();
        let order = r.service.registry().get("Order").unwrap();
        let created = r
            .service
            .create(&order, &attrs(json!({"name": "a", "status": "open"})))
            .await
            .unwrap();
        let id = created.primary_key_identifier().unwrap();
        r.store.fail_on("order_items");
        let err = r.service.get(&order, &id, &["items".into()], false).await.unwrap_err();
        assert!(matches!(err, ResourceError::Datastore(_)));

        let mut instance = r.service.get(&order, &id, &[], false).await.unwrap();
        r.service
            .attach_relations(&order, &mut instance, &["items".into()], true)
            .await
            .unwrap();
        assert!(instance.get("items").is_none());
    }

    #[tokio::test]
    async fn list_query_executes_lazily_with_filters() {
        let r = rig();
        let order = r.service.registry().get("Order").unwrap();
        for (name, status) in [("a", "open"), ("b", "open"), ("c", "closed")] {
            r.service
                .create(&order, &attrs(json!({"name": name, "status": status})))
                .await
                .unwrap();
        }
        let page = r
            .service
            .list(&order)
            .filter("status", json!("open"))
            .per_page(1)
            .page(2)
            .execute()
            .await
            .unwrap();
        assert_eq!(page.total, Some(2));
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].get("name"), Some(&json!("b")));
        assert_eq!(page.current_page, 2);
    }
}
