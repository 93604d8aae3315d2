//! Resource descriptors and the registry built from them at startup.

mod registry;
mod types;

pub use registry::{RegistryBuilder, ResourceRegistry};
pub use types::{RelationDescriptor, RelationKind, ResourceDescriptor, UpdateGuard, ValidationRule};
