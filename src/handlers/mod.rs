//! HTTP handlers for resource CRUD and export.

pub mod resource;

pub use resource::*;
