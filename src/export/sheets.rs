//! Sheet construction: flatten relation values and deduplicate repeated rows.

use crate::case::to_snake_case;
use crate::descriptor::{ResourceDescriptor, ResourceRegistry};
use crate::instance::{Attributes, ResourceInstance};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Placeholder for nested values a flat sheet cannot carry.
pub const ARRAY_PLACEHOLDER: &str = "array not exported";

/// One sheet: a titled list of ordered rows. Headers are the keys of the
/// first row; an empty sheet has empty headers.
#[derive(Clone, Debug)]
pub struct Sheet {
    pub title: String,
    pub rows: Vec<Attributes>,
}

impl Sheet {
    pub fn headers(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Sheets for a page of instances: an optional focus sheet first, then
    /// the main page (minus columns flattened into relation sheets), then one
    /// sheet per resolvable relation. Relation sheets are best-effort:
    /// unknown names are skipped, never errors.
    pub fn build(
        registry: &ResourceRegistry,
        descriptor: &Arc<ResourceDescriptor>,
        items: &[ResourceInstance],
        focus: Option<&ResourceInstance>,
        relations: &[String],
    ) -> Self {
        let mut relation_names: Vec<String> = relations.iter().map(|r| to_snake_case(r)).collect();
        let mut sheets = Vec::new();

        if let Some(focus) = focus {
            if !focus.descriptor().name.is_empty() {
                sheets.push(Sheet {
                    title: focus.descriptor().name.clone(),
                    rows: vec![focus.serialized_attributes()],
                });
                remove_focus_relation(registry, descriptor, focus, &mut relation_names);
            }
        }

        sheets.push(main_sheet(descriptor, items, &relation_names));

        for name in &relation_names {
            let Some((relation, target)) = registry.resolve_relation(descriptor, name) else {
                tracing::debug!(
                    resource = %descriptor.name,
                    relation = %name,
                    "skipping unresolvable relation sheet"
                );
                continue;
            };
            sheets.push(relation_sheet(&target.name, &relation.name, items));
        }

        Workbook { sheets }
    }
}

/// Drop the relation whose target type matches the focus instance, so a
/// self-referential relation does not produce a duplicate sheet.
fn remove_focus_relation(
    registry: &ResourceRegistry,
    descriptor: &Arc<ResourceDescriptor>,
    focus: &ResourceInstance,
    relation_names: &mut Vec<String>,
) {
    for declared in &descriptor.relations {
        if let Some((_, target)) = registry.resolve_relation(descriptor, &declared.name) {
            if target.name == focus.descriptor().name {
                relation_names.retain(|n| n != &declared.name);
                return;
            }
        }
    }
}

fn main_sheet(
    descriptor: &Arc<ResourceDescriptor>,
    items: &[ResourceInstance],
    relation_names: &[String],
) -> Sheet {
    let rows = items
        .iter()
        .map(|instance| {
            instance
                .serialized_attributes()
                .into_iter()
                .filter(|(key, _)| !relation_names.iter().any(|n| n == key))
                .collect()
        })
        .collect();
    Sheet {
        title: descriptor.name.clone(),
        rows,
    }
}

/// A sheet of flattened relation values: a single associative row counts as
/// one row, a list contributes one row per element, and exact structural
/// duplicates collapse to the first occurrence.
fn relation_sheet(title: &str, relation_name: &str, items: &[ResourceInstance]) -> Sheet {
    let mut rows: Vec<Attributes> = Vec::new();
    for instance in items {
        match instance.get(relation_name) {
            Some(Value::Object(row)) => rows.push(stringify_row(row)),
            Some(Value::Array(list)) => {
                for element in list {
                    if let Value::Object(row) = element {
                        rows.push(stringify_row(row));
                    }
                }
            }
            _ => continue,
        }
    }
    Sheet {
        title: title.to_string(),
        rows: dedup_rows(rows),
    }
}

fn stringify_row(row: &Attributes) -> Attributes {
    row.iter()
        .map(|(key, value)| (key.clone(), Value::String(cell_string(value))))
        .collect()
}

/// Relation-sheet cell rendering: nested structures collapse to a
/// placeholder, null becomes the literal "null".
pub(crate) fn cell_string(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => ARRAY_PLACEHOLDER.into(),
        Value::Null => "null".into(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn dedup_rows(rows: Vec<Attributes>) -> Vec<Attributes> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key = serde_json::to_string(row).unwrap_or_default();
            seen.insert(key)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{RegistryBuilder, RelationDescriptor, RelationKind};
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().unwrap().clone()
    }

    fn registry() -> ResourceRegistry {
        let order = ResourceDescriptor {
            name: "Order".into(),
            table: "orders".into(),
            primary_key_columns: vec!["id".into()],
            fillable_columns: vec!["name".into()],
            create_excluded: Vec::new(),
            update_excluded: Vec::new(),
            update_allowed_override: Vec::new(),
            relations: vec![
                RelationDescriptor {
                    name: "items".into(),
                    target: "OrderItem".into(),
                    kind: RelationKind::ToMany,
                    local_key: "id".into(),
                    foreign_key: "order_id".into(),
                },
                RelationDescriptor {
                    name: "parent".into(),
                    target: "Order".into(),
                    kind: RelationKind::ToOne,
                    local_key: "parent_id".into(),
                    foreign_key: "id".into(),
                },
            ],
            auto_increment: true,
            deletable: false,
            index_filtering_required: true,
            created_at_column: None,
            updated_at_column: None,
            separator: "_".into(),
            validation: Default::default(),
        };
        let item = ResourceDescriptor {
            name: "OrderItem".into(),
            table: "order_items".into(),
            primary_key_columns: vec!["id".into()],
            fillable_columns: vec!["order_id".into(), "sku".into()],
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
        };
        RegistryBuilder::new().register(order).register(item).build().unwrap()
    }

    fn order_with_items(registry: &ResourceRegistry, id: i64, items: Value) -> ResourceInstance {
        let descriptor = registry.get("Order").unwrap();
        let mut instance =
            ResourceInstance::from_row(descriptor, attrs(json!({"id": id, "name": format!("o{}", id)})));
        instance.attach_relation("items", items);
        instance
    }

    #[test]
    fn list_shaped_relations_flatten_one_row_per_element() {
        let registry = registry();
        let a = order_with_items(
            &registry,
            1,
            json!([{"id": 10, "sku": "s1"}, {"id": 11, "sku": "s2"}]),
        );
        let workbook =
            Workbook::build(&registry, &registry.get("Order").unwrap(), &[a], None, &["items".into()]);
        assert_eq!(workbook.sheets.len(), 2);
        let items = &workbook.sheets[1];
        assert_eq!(items.title, "OrderItem");
        assert_eq!(items.rows.len(), 2);
        assert_eq!(items.rows[0].get("sku"), Some(&json!("s1")));
    }

    #[test]
    fn associative_relation_values_are_one_row() {
        let registry = registry();
        let a = order_with_items(&registry, 1, json!({"id": 10, "sku": "s1", "meta": {"x": 1}}));
        let workbook =
            Workbook::build(&registry, &registry.get("Order").unwrap(), &[a], None, &["items".into()]);
        let items = &workbook.sheets[1];
        assert_eq!(items.rows.len(), 1);
        assert_eq!(items.rows[0].get("meta"), Some(&json!(ARRAY_PLACEHOLDER)));
    }

    #[test]
    fn duplicate_relation_rows_collapse_to_one() {
        let registry = registry();
        let shared = json!([{"id": 10, "sku": "s1", "note": null}]);
        let a = order_with_items(&registry, 1, shared.clone());
        let b = order_with_items(&registry, 2, shared);
        let workbook =
            Workbook::build(&registry, &registry.get("Order").unwrap(), &[a, b], None, &["items".into()]);
        let items = &workbook.sheets[1];
        assert_eq!(items.rows.len(), 1);
        assert_eq!(items.rows[0].get("note"), Some(&json!("null")));
    }

    #[test]
    fn main_sheet_drops_flattened_relation_columns() {
        let registry = registry();
        let a = order_with_items(&registry, 1, json!([{"id": 10}]));
        let workbook =
            Workbook::build(&registry, &registry.get("Order").unwrap(), &[a], None, &["items".into()]);
        let main = &workbook.sheets[0];
        assert_eq!(main.title, "Order");
        assert!(main.rows[0].get("items").is_none());
        assert_eq!(main.rows[0].get("primary_key_identifier"), Some(&json!("1")));
    }

    #[test]
    fn focus_sheet_comes_first_and_prunes_self_referential_relations() {
        let registry = registry();
        let descriptor = registry.get("Order").unwrap();
        let focus = ResourceInstance::from_row(descriptor.clone(), attrs(json!({"id": 9, "name": "focus"})));
        let a = order_with_items(&registry, 1, json!([{"id": 10}]));
        let workbook = Workbook::build(
            &registry,
            &descriptor,
            &[a],
            Some(&focus),
            &["items".into(), "parent".into()],
        );
        // focus, main, items; "parent" targets Order and is pruned
        assert_eq!(workbook.sheets.len(), 3);
        assert_eq!(workbook.sheets[0].title, "Order");
        assert_eq!(workbook.sheets[0].rows.len(), 1);
        assert_eq!(workbook.sheets[2].title, "OrderItem");
    }

    #[test]
    fn unknown_relations_are_skipped_silently() {
        let registry = registry();
        let a = order_with_items(&registry, 1, json!([]));
        let workbook =
            Workbook::build(&registry, &registry.get("Order").unwrap(), &[a], None, &["ghost".into()]);
        assert_eq!(workbook.sheets.len(), 1);
    }

    #[test]
    fn empty_sheets_have_empty_headers() {
        let sheet = Sheet { title: "Order".into(), rows: Vec::new() };
        assert!(sheet.headers().is_empty());
    }

    #[test]
    fn absent_or_scalar_relation_values_contribute_nothing() {
        let registry = registry();
        let descriptor = registry.get("Order").unwrap();
        let mut a = ResourceInstance::from_row(descriptor.clone(), attrs(json!({"id": 1})));
        a.attach_relation("items", json!("not a collection"));
        let b = ResourceInstance::from_row(descriptor.clone(), attrs(json!({"id": 2})));
        let workbook = Workbook::build(&registry, &descriptor, &[a, b], None, &["items".into()]);
        assert_eq!(workbook.sheets[1].rows.len(), 0);
    }
}
