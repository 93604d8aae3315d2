//! Example server: builds the registry from a JSON descriptor file, connects
//! the Postgres driver, and mounts common + resource routes.

use axum::Router;
use resource_engine::{
    common_routes, resource_routes, AppState, PostgresStore, RegistryBuilder, ResourceDescriptor,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resource_engine=info".parse()?))
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/resources".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let descriptors_path = std::env::var("RESOURCES_PATH").unwrap_or_else(|_| "resources.json".into());
    let descriptors: Vec<ResourceDescriptor> =
        serde_json::from_str(&tokio::fs::read_to_string(&descriptors_path).await?)?;
    let mut builder = RegistryBuilder::new();
    for descriptor in descriptors {
        builder = builder.register(descriptor);
    }
    let registry = Arc::new(builder.build()?);

    // The connection key scopes the index caches to this database.
    let store = Arc::new(PostgresStore::new(pool, database_url));
    let state = AppState::new(registry, store);

    let app = Router::new()
        .merge(common_routes())
        .nest("/api/v1", resource_routes(state));

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
