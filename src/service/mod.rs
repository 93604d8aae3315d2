//! Generic resource operations over a datastore driver.

mod resource;
mod validation;

pub use resource::{ListQuery, Page, ResourceService, DEFAULT_PER_PAGE};
pub use validation::RequestValidator;
