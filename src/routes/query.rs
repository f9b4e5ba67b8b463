//! Read-side endpoints: path compilation and existence checks.
//!
//! Path and expression parsing happen upstream; `/query/compile` takes the
//! already-resolved path and options as JSON and returns the SQL the core
//! would run for them, together with the table its rows belong to.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ApiError;
use crate::model::EntityType;
use crate::query::{QueryOptions, RenderedQuery, ResourcePath, TableRef};
use crate::SensorThingsStore;

// ---

pub fn router() -> Router<SensorThingsStore> {
    // ---
    Router::new()
        .route("/query/compile", post(compile))
        .route("/exists/{entity_type}/{id}", get(exists))
}

#[derive(Debug, Deserialize)]
struct CompileRequest {
    path: ResourcePath,
    #[serde(default)]
    options: Option<QueryOptions>,
}

#[derive(Debug, Serialize)]
struct CompileResponse {
    main: TableRef,
    query: RenderedQuery,
    count: RenderedQuery,
}

async fn compile(
    State(store): State<SensorThingsStore>,
    Json(request): Json<CompileRequest>,
) -> Result<Json<CompileResponse>, ApiError> {
    // ---
    let compiled = store.compile_query(&request.path, request.options.as_ref())?;
    let query = compiled.render();
    debug!(main = %compiled.main.entity_type, sql = %query.sql, "compiled path");

    Ok(Json(CompileResponse {
        count: compiled.render_count(),
        main: compiled.main,
        query,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExistsResponse {
    entity_type: EntityType,
    id: i64,
    exists: bool,
}

async fn exists(
    State(store): State<SensorThingsStore>,
    Path((entity_type, id)): Path<(String, i64)>,
) -> Result<Json<ExistsResponse>, ApiError> {
    // ---
    let entity_type: EntityType = entity_type.parse()?;
    let exists = store.exists_by_id(entity_type, id).await?;
    Ok(Json(ExistsResponse {
        entity_type,
        id,
        exists,
    }))
}
