//! Static per-resource metadata: identity shape, writable column sets, relations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved pagination query-parameter names; colliding columns are reported.
const RESERVED_PARAMS: [&str; 2] = ["page", "limit"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// A named link to another resource, resolved through the registry by name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Attachment key on the instance (snake_case).
    pub name: String,
    /// Resource name of the related entity.
    pub target: String,
    pub kind: RelationKind,
    /// Our column used in the join.
    pub local_key: String,
    /// Their column used in the join.
    pub foreign_key: String,
}

/// Policy for attempts to change a column in `update_excluded`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateGuard {
    /// Keep the stored value and log the attempt as a developer error.
    #[default]
    Lenient,
    /// Raise instead, for test rigs that want these attempts loud.
    Strict,
}

/// Per-column validation rule vocabulary, checked by `RequestValidator`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Display name, used in errors and export sheet titles.
    pub name: String,
    pub table: String,
    /// Ordered identity columns; empty means update/delete are not possible.
    #[serde(default)]
    pub primary_key_columns: Vec<String>,
    /// Columns writable through create/update requests.
    #[serde(default)]
    pub fillable_columns: Vec<String>,
    /// Stripped from external create payloads (server-assigned fields).
    #[serde(default)]
    pub create_excluded: Vec<String>,
    /// Never changed after creation through external requests.
    #[serde(default)]
    pub update_excluded: Vec<String>,
    /// Subset of `update_excluded` writable by trusted code paths.
    #[serde(default)]
    pub update_allowed_override: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
    /// Identity is server-assigned (blocks upsert-by-identity fallback).
    #[serde(default)]
    pub auto_increment: bool,
    /// Delete is forbidden unless a resource opts in.
    #[serde(default)]
    pub deletable: bool,
    #[serde(default = "default_true")]
    pub index_filtering_required: bool,
    #[serde(default)]
    pub created_at_column: Option<String>,
    #[serde(default)]
    pub updated_at_column: Option<String>,
    /// Separator for composite identifiers; key values must not contain it.
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

fn default_true() -> bool {
    true
}

fn default_separator() -> String {
    "_".into()
}

impl ResourceDescriptor {
    pub fn has_identity(&self) -> bool {
        !self.primary_key_columns.is_empty()
    }

    /// Fillable columns, optionally unioned with the primary key, deduplicated
    /// in declaration order. Warns when a column collides with a reserved
    /// pagination parameter.
    pub fn effective_columns(&self, including_primary: bool) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut columns: Vec<String> = Vec::new();
        let primary: Vec<&String> = if including_primary {
            self.primary_key_columns.iter().filter(|c| !c.is_empty()).collect()
        } else {
            Vec::new()
        };
        for column in primary.into_iter().chain(self.fillable_columns.iter()) {
            if seen.insert(column.clone()) {
                columns.push(column.clone());
            }
        }
        let reserved: Vec<&String> = columns
            .iter()
            .filter(|c| RESERVED_PARAMS.contains(&c.as_str()))
            .collect();
        if !reserved.is_empty() {
            tracing::warn!(
                resource = %self.name,
                columns = ?reserved,
                "resource uses reserved query parameters as columns"
            );
        }
        columns
    }

    /// Create exclusions always include primary-key columns that are not
    /// externally settable (not fillable).
    pub fn effective_create_excluded(&self) -> Vec<String> {
        let mut out = self.create_excluded.clone();
        for pk in &self.primary_key_columns {
            if !self.fillable_columns.contains(pk) && !out.contains(pk) {
                out.push(pk.clone());
            }
        }
        out
    }

    /// Columns an external create request may set.
    pub fn create_column_allowlist(&self) -> Vec<String> {
        let excluded = self.effective_create_excluded();
        self.effective_columns(false)
            .into_iter()
            .filter(|c| !excluded.contains(c))
            .collect()
    }

    /// Columns an external update request may set.
    pub fn update_column_allowlist(&self) -> Vec<String> {
        self.effective_columns(false)
            .into_iter()
            .filter(|c| !self.update_excluded.contains(c))
            .collect()
    }

    /// Columns that must never change once the row exists.
    pub fn guarded_update_columns(&self) -> Vec<String> {
        self.update_excluded
            .iter()
            .filter(|c| !self.update_allowed_override.contains(*c))
            .cloned()
            .collect()
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }
}
