//! Resource engine: declarative CRUD resources over a relational datastore.
//!
//! A `ResourceDescriptor` describes one persisted entity (identity shape,
//! writable columns, relations); the `ResourceService` runs the generic
//! create/read/update/list/delete algorithm against any `Datastore` driver,
//! and the export module flattens a page of rows (plus requested relations)
//! into a multi-sheet tabular archive.

pub mod advisor;
pub mod case;
pub mod datastore;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod handlers;
pub mod identity;
pub mod instance;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;

pub use advisor::{IndexAdvisor, IndexRow};
pub use datastore::{Datastore, DatastoreError, MemoryStore, PageRequest, PostgresStore, RowPage};
pub use descriptor::{
    RegistryBuilder, RelationDescriptor, RelationKind, ResourceDescriptor, ResourceRegistry,
    UpdateGuard, ValidationRule,
};
pub use error::{ConfigError, ResourceError};
pub use export::{write_zip, Workbook};
pub use instance::{Attributes, ResourceInstance};
pub use response::PageEnvelope;
pub use routes::{common_routes, resource_routes};
pub use service::{ListQuery, Page, RequestValidator, ResourceService};
pub use state::AppState;
