//! Registry of descriptors, validated once at startup and shared behind `Arc`.

use crate::descriptor::{RelationDescriptor, ResourceDescriptor};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
pub struct RegistryBuilder {
    descriptors: Vec<ResourceDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, descriptor: ResourceDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate column-set invariants and relation references, then freeze.
    pub fn build(self) -> Result<ResourceRegistry, ConfigError> {
        let mut resources: HashMap<String, Arc<ResourceDescriptor>> = HashMap::new();
        for descriptor in &self.descriptors {
            if resources.contains_key(&descriptor.name) {
                return Err(ConfigError::DuplicateResource(descriptor.name.clone()));
            }
            validate_column_sets(descriptor)?;
            resources.insert(descriptor.name.clone(), Arc::new(descriptor.clone()));
        }
        for descriptor in &self.descriptors {
            let mut relation_names = HashSet::new();
            for relation in &descriptor.relations {
                if !relation_names.insert(relation.name.as_str()) {
                    return Err(ConfigError::ColumnSet {
                        resource: descriptor.name.clone(),
                        detail: format!("duplicate relation name '{}'", relation.name),
                    });
                }
                if !resources.contains_key(&relation.target) {
                    return Err(ConfigError::UnknownRelationTarget {
                        resource: descriptor.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                }
            }
        }
        Ok(ResourceRegistry { resources })
    }
}

fn validate_column_sets(descriptor: &ResourceDescriptor) -> Result<(), ConfigError> {
    let fillable_or_pk: HashSet<&String> = descriptor
        .fillable_columns
        .iter()
        .chain(descriptor.primary_key_columns.iter())
        .collect();
    for column in &descriptor.create_excluded {
        if !fillable_or_pk.contains(column) {
            return Err(ConfigError::ColumnSet {
                resource: descriptor.name.clone(),
                detail: format!("create_excluded column '{}' is neither fillable nor a key", column),
            });
        }
    }
    for column in &descriptor.update_excluded {
        if !descriptor.fillable_columns.contains(column) {
            return Err(ConfigError::ColumnSet {
                resource: descriptor.name.clone(),
                detail: format!("update_excluded column '{}' is not fillable", column),
            });
        }
    }
    for column in &descriptor.update_allowed_override {
        if !descriptor.update_excluded.contains(column) {
            return Err(ConfigError::ColumnSet {
                resource: descriptor.name.clone(),
                detail: format!("update_allowed_override column '{}' is not update_excluded", column),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct ResourceRegistry {
    resources: HashMap<String, Arc<ResourceDescriptor>>,
}

impl ResourceRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<ResourceDescriptor>> {
        self.resources.get(name).cloned()
    }

    /// Look up a declared relation and its target descriptor by name.
    pub fn resolve_relation(
        &self,
        descriptor: &ResourceDescriptor,
        name: &str,
    ) -> Option<(RelationDescriptor, Arc<ResourceDescriptor>)> {
        let relation = descriptor.relation(name)?;
        let target = self.get(&relation.target)?;
        Some((relation.clone(), target))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceDescriptor>> {
        self.resources.values()
    }
}
