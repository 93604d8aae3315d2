//! Resource CRUD routes. Paths are parameterized; handlers resolve the
//! resource by its path segment.

use crate::handlers::resource::{create, delete_one, get_one, list, update};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Router};

const BODY_LIMIT_BYTES: usize = 1024 * 1024;

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/:resource", get(list).post(create))
        .route(
            "/:resource/:identifier",
            get(get_one).patch(update).delete(delete_one),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .with_state(state)
}
