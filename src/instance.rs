//! A materialized resource row: ordered attributes plus identity helpers.

use crate::descriptor::{ResourceDescriptor, UpdateGuard};
use crate::error::ResourceError;
use crate::identity;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Ordered column -> value mapping (`serde_json` is built with
/// `preserve_order`, so insertion order is retained).
pub type Attributes = Map<String, Value>;

#[derive(Clone, Debug)]
pub struct ResourceInstance {
    descriptor: Arc<ResourceDescriptor>,
    attributes: Attributes,
    exists: bool,
}

impl ResourceInstance {
    /// A row read from (or returned by) the datastore.
    pub fn from_row(descriptor: Arc<ResourceDescriptor>, attributes: Attributes) -> Self {
        Self {
            descriptor,
            attributes,
            exists: true,
        }
    }

    /// A not-yet-persisted instance.
    pub fn new(descriptor: Arc<ResourceDescriptor>, attributes: Attributes) -> Self {
        Self {
            descriptor,
            attributes,
            exists: false,
        }
    }

    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        &self.descriptor
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Set one attribute. On an existing row, changing a column in
    /// `update_excluded` minus `update_allowed_override` keeps the stored
    /// value; the attempt is logged (or raised under `UpdateGuard::Strict`).
    pub fn set_attribute(
        &mut self,
        column: &str,
        value: Value,
        guard: UpdateGuard,
    ) -> Result<(), ResourceError> {
        if self.exists && self.descriptor.guarded_update_columns().iter().any(|c| c == column) {
            let current = self.attributes.get(column).cloned().unwrap_or(Value::Null);
            if value != current {
                if guard == UpdateGuard::Strict {
                    return Err(ResourceError::Development(format!(
                        "attempted to update ignored column {} on {}",
                        column, self.descriptor.name
                    )));
                }
                tracing::error!(
                    resource = %self.descriptor.name,
                    column = %column,
                    attempted = %value,
                    "attempted to update an ignored column; keeping stored value"
                );
                return Ok(());
            }
        }
        self.attributes.insert(column.to_string(), value);
        Ok(())
    }

    /// Apply a field map through the guard; returns the subset that changed.
    pub fn apply(
        &mut self,
        fields: &Attributes,
        guard: UpdateGuard,
    ) -> Result<Attributes, ResourceError> {
        let mut changed = Attributes::new();
        for (column, value) in fields {
            let before = self.attributes.get(column).cloned();
            self.set_attribute(column, value.clone(), guard)?;
            let after = self.attributes.get(column).cloned();
            if after != before {
                changed.insert(column.clone(), after.unwrap_or(Value::Null));
            }
        }
        Ok(changed)
    }

    /// Set an attribute directly, bypassing the update guard.
    pub fn set_raw(&mut self, column: &str, value: Value) {
        self.attributes.insert(column.to_string(), value);
    }

    pub fn primary_key_filter(&self) -> Result<Vec<(String, Value)>, ResourceError> {
        if !self.descriptor.has_identity() {
            return Err(ResourceError::Development(format!(
                "no primary key metadata declared for {}",
                self.descriptor.name
            )));
        }
        Ok(self
            .descriptor
            .primary_key_columns
            .iter()
            .map(|c| (c.clone(), self.attributes.get(c).cloned().unwrap_or(Value::Null)))
            .collect())
    }

    pub fn primary_key_identifier(&self) -> Result<String, ResourceError> {
        identity::encode(&self.descriptor, &self.attributes)
    }

    /// Attach a loaded relation under its attachment key.
    pub fn attach_relation(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }

    pub fn append_index_attribute(&mut self, columns: Vec<String>) {
        self.attributes.insert(
            "index_required_on_filtering".into(),
            Value::Array(columns.into_iter().map(Value::String).collect()),
        );
    }

    /// Attributes as rendered to callers, with the derived
    /// `primary_key_identifier` appended.
    pub fn serialized_attributes(&self) -> Attributes {
        let mut out = self.attributes.clone();
        if self.descriptor.has_identity() {
            if let Ok(id) = identity::encode(&self.descriptor, &self.attributes) {
                out.insert("primary_key_identifier".into(), Value::String(id));
            }
        }
        out
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.serialized_attributes())
    }
}
