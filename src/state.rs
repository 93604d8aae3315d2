//! Shared application state, wired once at startup.

use crate::advisor::IndexAdvisor;
use crate::datastore::Datastore;
use crate::descriptor::ResourceRegistry;
use crate::service::ResourceService;
use std::sync::Arc;

/// Everything the handlers need: the validated registry, the driver, the
/// index advisor, and the service built over them. The advisor owns the only
/// cross-request mutable state (its caches).
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ResourceRegistry>,
    pub store: Arc<dyn Datastore>,
    pub advisor: Arc<IndexAdvisor>,
    pub service: Arc<ResourceService>,
}

impl AppState {
    pub fn new(registry: Arc<ResourceRegistry>, store: Arc<dyn Datastore>) -> Self {
        let advisor = Arc::new(IndexAdvisor::new());
        let service = Arc::new(ResourceService::new(
            registry.clone(),
            store.clone(),
            advisor.clone(),
        ));
        Self {
            registry,
            store,
            advisor,
            service,
        }
    }
}
