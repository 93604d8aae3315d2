//! Resource CRUD handlers: list (with export trigger), get, create, update
//! with upsert fallback, delete.

use crate::datastore::{AggregateKind, AggregateSpec};
use crate::descriptor::ResourceDescriptor;
use crate::error::{ErrorBody, ResourceError, ValidationErrors};
use crate::export::{write_zip, Workbook};
use crate::response::PageEnvelope;
use crate::service::{Page, RequestValidator, DEFAULT_PER_PAGE};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Query parameters consumed by the engine itself; anything else that names a
/// column becomes an exact-match filter.
const RESERVED_PARAMS: &[&str] = &[
    "page",
    "limit",
    "simplePaginate",
    "logError",
    "withRelations",
    "sum",
    "avg",
    "min",
    "max",
];

const EXPORT_ACCEPT: &str = "application/zip";

fn error_response(err: &ResourceError) -> Response {
    let errors = match err {
        ResourceError::Validation(v) => Some(v.errors.clone()),
        _ => None,
    };
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: err.safe_message(),
            errors,
        }),
    )
        .into_response()
}

fn body_to_map(value: Value) -> Result<Map<String, Value>, ResourceError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ResourceError::Validation(ValidationErrors::single(
            "body",
            "body must be a JSON object",
        ))),
    }
}

fn csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

struct ListParams {
    page: u32,
    per_page: u32,
    simple: bool,
    log_errors: bool,
    relations: Vec<String>,
    filters: Vec<(String, Value)>,
    aggregates: Vec<AggregateSpec>,
}

fn parse_list_params(descriptor: &ResourceDescriptor, params: &HashMap<String, String>) -> ListParams {
    let page = params.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let per_page = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PER_PAGE)
        .max(1);
    let mut aggregates = Vec::new();
    for (kind, key) in [
        (AggregateKind::Sum, "sum"),
        (AggregateKind::Avg, "avg"),
        (AggregateKind::Min, "min"),
        (AggregateKind::Max, "max"),
    ] {
        if let Some(raw) = params.get(key) {
            for column in csv_list(raw) {
                aggregates.push(AggregateSpec { kind, column });
            }
        }
    }
    let columns = descriptor.effective_columns(true);
    let filters = params
        .iter()
        .filter(|(k, _)| !RESERVED_PARAMS.contains(&k.as_str()))
        .filter(|(k, _)| columns.iter().any(|c| c == *k))
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    ListParams {
        page: page.max(1),
        per_page,
        simple: params.contains_key("simplePaginate"),
        log_errors: params.contains_key("logError"),
        relations: params.get("withRelations").map(|v| csv_list(v)).unwrap_or_default(),
        filters,
        aggregates,
    }
}

async fn run_list(
    state: &AppState,
    descriptor: &Arc<ResourceDescriptor>,
    options: &ListParams,
) -> Result<(Page, Vec<Value>), ResourceError> {
    let query = state
        .service
        .list(descriptor)
        .filters(options.filters.clone())
        .page(options.page)
        .per_page(options.per_page)
        .simple(options.simple);
    let mut page = query.execute().await?;
    if !options.relations.is_empty() {
        for instance in &mut page.items {
            state
                .service
                .attach_relations(descriptor, instance, &options.relations, true)
                .await?;
        }
    }
    let aggregates = if options.aggregates.is_empty() {
        Vec::new()
    } else {
        state
            .service
            .aggregate(descriptor, &options.filters, &options.aggregates)
            .await?
    };
    Ok((page, aggregates))
}

fn apply_aggregates(envelope: &mut PageEnvelope, specs: &[AggregateSpec], values: Vec<Value>) {
    for (spec, value) in specs.iter().zip(values) {
        let block = match spec.kind {
            AggregateKind::Sum => envelope.sums.get_or_insert_with(Map::new),
            AggregateKind::Avg => envelope.avgs.get_or_insert_with(Map::new),
            AggregateKind::Min => envelope.mins.get_or_insert_with(Map::new),
            AggregateKind::Max => envelope.maxs.get_or_insert_with(Map::new),
        };
        block.insert(spec.column.clone(), value);
    }
}

fn archive_response(name: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}.zip\"", name);
    (
        [
            (header::CONTENT_TYPE, EXPORT_ACCEPT.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

/// GET /:resource: paginated list, or a tabular archive when the caller
/// accepts application/zip. Any list failure degrades to the empty envelope;
/// export mechanism failures surface.
pub async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(descriptor) = state.registry.get(&resource) else {
        return error_response(&ResourceError::NotFound { resource });
    };
    let options = parse_list_params(&descriptor, &params);
    let wants_export = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == EXPORT_ACCEPT)
        .unwrap_or(false);

    let (page, aggregates) = match run_list(&state, &descriptor, &options).await {
        Ok(out) => out,
        Err(e) => {
            if options.log_errors {
                tracing::error!(resource = %descriptor.name, error = %e, params = ?params, "list failed");
            }
            return (StatusCode::OK, Json(PageEnvelope::empty(options.per_page))).into_response();
        }
    };

    if wants_export {
        let workbook = Workbook::build(&state.registry, &descriptor, &page.items, None, &options.relations);
        return match write_zip(&workbook) {
            Ok(bytes) => archive_response(&descriptor.name, bytes),
            Err(e) => {
                tracing::error!(resource = %descriptor.name, error = %e, "export failed");
                error_response(&e)
            }
        };
    }

    let mut envelope = PageEnvelope::from_page(page);
    let hints = state.service.index_required_on_filtering(&descriptor).await;
    if !hints.is_empty() {
        envelope.index_required_on_filtering = Some(hints);
    }
    apply_aggregates(&mut envelope, &options.aggregates, aggregates);
    (StatusCode::OK, Json(envelope)).into_response()
}

/// GET /:resource/:identifier: one row, with optional relations attached.
pub async fn get_one(
    State(state): State<AppState>,
    Path((resource, identifier)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(descriptor) = state.registry.get(&resource) else {
        return error_response(&ResourceError::NotFound { resource });
    };
    let relations = params.get("withRelations").map(|v| csv_list(v)).unwrap_or_default();
    match state.service.get(&descriptor, &identifier, &relations, true).await {
        Ok(instance) => (StatusCode::OK, Json(instance.into_value())).into_response(),
        Err(e) => {
            tracing::error!(resource = %descriptor.name, identifier = %identifier, error = %e, "get failed");
            error_response(&e)
        }
    }
}

async fn create_inner(
    state: &AppState,
    descriptor: &Arc<ResourceDescriptor>,
    body: Map<String, Value>,
) -> Result<Value, ResourceError> {
    let validated = RequestValidator::validate(&body, &descriptor.validation)?;
    let instance = state.service.create(descriptor, &validated).await?;
    Ok(instance.into_value())
}

/// POST /:resource: validate, create, return the stored row.
pub async fn create(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(descriptor) = state.registry.get(&resource) else {
        return error_response(&ResourceError::NotFound { resource });
    };
    let body = match body_to_map(body) {
        Ok(map) => map,
        Err(e) => return error_response(&e),
    };
    match create_inner(&state, &descriptor, body).await {
        Ok(value) => (StatusCode::CREATED, Json(value)).into_response(),
        Err(e) => {
            if !matches!(e, ResourceError::Validation(_)) {
                tracing::error!(resource = %descriptor.name, error = %e, "create failed");
            }
            error_response(&e)
        }
    }
}

/// PATCH /:resource/:identifier: update; a missing row falls back to create
/// when the resource is externally keyed and the body carries the identity.
pub async fn update(
    State(state): State<AppState>,
    Path((resource, identifier)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(descriptor) = state.registry.get(&resource) else {
        return error_response(&ResourceError::NotFound { resource });
    };
    let raw = match body_to_map(body) {
        Ok(map) => map,
        Err(e) => return error_response(&e),
    };
    let validated = match RequestValidator::validate_partial(&raw, &descriptor.validation) {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    match state.service.update(&descriptor, &identifier, &validated).await {
        Ok(instance) => (StatusCode::OK, Json(instance.into_value())).into_response(),
        Err(ResourceError::NotFound { .. })
            if state.service.is_update_or_create_able(&descriptor, &raw) =>
        {
            match create_inner(&state, &descriptor, raw).await {
                Ok(value) => (StatusCode::CREATED, Json(value)).into_response(),
                Err(e) => {
                    if !matches!(e, ResourceError::Validation(_)) {
                        tracing::error!(resource = %descriptor.name, error = %e, "upsert create failed");
                    }
                    error_response(&e)
                }
            }
        }
        Err(e) => {
            tracing::error!(resource = %descriptor.name, identifier = %identifier, error = %e, "update failed");
            error_response(&e)
        }
    }
}

/// DELETE /:resource/:identifier: 204 when a row went away, 400 otherwise.
pub async fn delete_one(
    State(state): State<AppState>,
    Path((resource, identifier)): Path<(String, String)>,
) -> Response {
    let Some(descriptor) = state.registry.get(&resource) else {
        return error_response(&ResourceError::NotFound { resource });
    };
    match state.service.delete(&descriptor, &identifier).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::BAD_REQUEST.into_response(),
        Err(e) => {
            tracing::error!(resource = %descriptor.name, identifier = %identifier, error = %e, "delete failed");
            error_response(&e)
        }
    }
}
