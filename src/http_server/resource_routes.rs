//! Resource HTTP Routes
//!
//! Direct reads and edits of one environment's copy of a resource, and the
//! staging/production comparison view.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};

use super::errors::{api_error, bad_request, json_body, ApiError};
use super::identity::caller_from_headers;
use crate::promotion::{PromotionError, PromotionService, VersionComparison};
use crate::resource::{Environment, ResourceDocument, ResourceDraft};

pub fn resource_routes(state: Arc<PromotionService>) -> Router {
    Router::new()
        .route(
            "/resources/:env/:id",
            put(save_handler).get(get_handler).delete(delete_handler),
        )
        .route("/comparisons/:id", get(comparison_handler))
        .with_state(state)
}

fn parse_env(raw: &str) -> Result<Environment, ApiError> {
    raw.parse().map_err(bad_request)
}

async fn save_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path((env, id)): Path<(String, String)>,
    draft: Result<Json<ResourceDraft>, JsonRejection>,
) -> Result<Json<ResourceDocument>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let env = parse_env(&env)?;
    let draft = json_body(draft)?;
    let doc = state
        .editor()
        .save(env, &id, draft, &caller)
        .map_err(api_error)?;
    Ok(Json(doc))
}

async fn get_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path((env, id)): Path<(String, String)>,
) -> Result<Json<ResourceDocument>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let env = parse_env(&env)?;
    let doc = state.editor().get(env, &id).map_err(api_error)?;
    if !caller.is_superadmin() && !caller.belongs_to(&doc.organization_id) {
        return Err(api_error(PromotionError::unauthorized(format!(
            "resource {} belongs to another organization",
            id
        ))));
    }
    Ok(Json(doc))
}

async fn delete_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path((env, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let env = parse_env(&env)?;
    state.editor().delete(env, &id, &caller).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn comparison_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<VersionComparison>, ApiError> {
    caller_from_headers(&headers)?;
    let comparison = state.compare(&id).map_err(api_error)?;
    Ok(Json(comparison))
}
