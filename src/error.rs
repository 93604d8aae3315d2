//! Typed errors, safe client messages, and HTTP mapping.

use crate::datastore::DatastoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Registry/descriptor misconfiguration, detected when the registry is built.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),
    #[error("resource {resource}: relation '{relation}' targets unknown resource '{target}'")]
    UnknownRelationTarget {
        resource: String,
        relation: String,
        target: String,
    },
    #[error("resource {resource}: {detail}")]
    ColumnSet { resource: String, detail: String },
    #[error("config load: {0}")]
    Load(String),
}

/// Field-level validation failure carrying a field -> messages map.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationErrors {
    pub message: String,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self {
            message: "The given data was invalid.".into(),
            errors: BTreeMap::new(),
        }
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut out = Self::new();
        out.add(field, message.into());
        out
    }

    pub fn add(&mut self, field: &str, message: String) {
        self.errors.entry(field.to_string()).or_default().push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Default for ValidationErrors {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("identity: {0}")]
    Identity(String),
    #[error("delete is not enabled for {resource}")]
    OperationNotPermitted { resource: String },
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),
    #[error("development error: {0}")]
    Development(String),
    #[error("export: {0}")]
    Export(String),
    #[error(transparent)]
    Datastore(DatastoreError),
}

impl From<DatastoreError> for ResourceError {
    fn from(e: DatastoreError) -> Self {
        match e {
            DatastoreError::UnsupportedBackend(backend) => ResourceError::UnsupportedBackend(backend),
            other => ResourceError::Datastore(other),
        }
    }
}

pub const GENERIC_FAILURE: &str = "Something went wrong. Please contact us mentioning current time.";

impl ResourceError {
    /// Client-facing message. Datastore details are pattern-matched for known
    /// safe substrings; everything else collapses to a generic failure line.
    /// The full error is always logged before it is collapsed.
    pub fn safe_message(&self) -> String {
        match self {
            ResourceError::NotFound { resource } => format!("{} not found.", resource),
            ResourceError::Validation(v) => v.message.clone(),
            ResourceError::OperationNotPermitted { .. } => "Forbidden".into(),
            ResourceError::Datastore(e) => sanitize_datastore_message(&e.to_string()),
            ResourceError::Identity(_)
            | ResourceError::Development(_)
            | ResourceError::UnsupportedBackend(_)
            | ResourceError::Export(_) => {
                tracing::error!(error = %self, "internal error");
                GENERIC_FAILURE.into()
            }
        }
    }
}

/// Keep duplicate-key details, hide everything else a database error may leak.
fn sanitize_datastore_message(raw: &str) -> String {
    tracing::error!(error = %raw, "datastore error");
    let lower = raw.to_lowercase();
    for marker in ["duplicate entry", "duplicate key"] {
        if let Some(pos) = lower.find(marker) {
            let tail = &raw[pos..];
            let end = lower[pos..]
                .find(" for key")
                .or_else(|| tail.find('\n'))
                .unwrap_or(tail.len());
            return tail[..end].trim_end().to_string();
        }
    }
    GENERIC_FAILURE.into()
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

impl IntoResponse for ResourceError {
    fn into_response(self) -> Response {
        let errors = match &self {
            ResourceError::Validation(v) => Some(v.errors.clone()),
            _ => None,
        };
        let body = ErrorBody {
            message: self.safe_message(),
            errors,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_entry_detail_is_kept() {
        let msg = sanitize_datastore_message(
            "SQLSTATE[23000]: Duplicate entry 'a-1' for key 'orders.uq_orders_sku'",
        );
        assert_eq!(msg, "Duplicate entry 'a-1'");
    }

    #[test]
    fn duplicate_key_detail_is_kept() {
        let msg = sanitize_datastore_message(
            "error returned from database: duplicate key value violates unique constraint \"orders_pkey\"",
        );
        assert!(msg.starts_with("duplicate key value"));
    }

    #[test]
    fn unknown_database_errors_collapse() {
        let msg = sanitize_datastore_message("syntax error at or near \"SELCT\" on line 1");
        assert_eq!(msg, GENERIC_FAILURE);
    }

    #[test]
    fn not_found_names_the_resource() {
        let err = ResourceError::NotFound {
            resource: "Order".into(),
        };
        assert_eq!(err.safe_message(), "Order not found.");
    }

    #[test]
    fn development_errors_are_not_leaked() {
        let err = ResourceError::Development("missing primary key metadata".into());
        assert_eq!(err.safe_message(), GENERIC_FAILURE);
    }
}
