//! Promotion HTTP Routes
//!
//! Request lifecycle endpoints: open, inspect, approve, reject, cancel,
//! resolve conflicts, execute and roll back.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::{api_error, bad_request, json_body, optional_json_body, ApiError};
use super::identity::caller_from_headers;
use crate::promotion::{
    Caller, ConflictResolution, ExecutionResult, OpenPromotion, PromotionError, PromotionRequest,
    PromotionService, RollbackOutcome, StatusFilter,
};

// ==================
// Request/Response Types
// ==================

/// A request as returned by the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionView {
    #[serde(flatten)]
    pub request: PromotionRequest,
    pub summary: String,
    pub is_ready_to_execute: bool,
}

impl From<PromotionRequest> for PromotionView {
    fn from(request: PromotionRequest) -> Self {
        Self {
            summary: request.summary(),
            is_ready_to_execute: request.is_ready_to_execute(),
            request,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PromotionListResponse {
    pub promotions: Vec<PromotionView>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromotionsQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveBody {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictBody {
    pub resolution: ConflictResolution,
    #[serde(default)]
    pub merged_value: Option<Value>,
}

// ==================
// Promotion Routes
// ==================

pub fn promotion_routes(state: Arc<PromotionService>) -> Router {
    Router::new()
        .route("/promotions", post(open_handler).get(list_handler))
        .route("/promotions/:id", get(get_handler))
        .route("/promotions/:id/approve", post(approve_handler))
        .route("/promotions/:id/reject", post(reject_handler))
        .route("/promotions/:id/cancel", post(cancel_handler))
        .route("/promotions/:id/execute", post(execute_handler))
        .route("/promotions/:id/rollback", post(rollback_handler))
        .route(
            "/promotions/:id/conflicts/:field/resolve",
            post(resolve_conflict_handler),
        )
        .with_state(state)
}

fn ensure_visible(caller: &Caller, request: &PromotionRequest) -> Result<(), ApiError> {
    if caller.is_superadmin() || caller.belongs_to(&request.organization_id) {
        Ok(())
    } else {
        Err(api_error(PromotionError::unauthorized(format!(
            "promotion request {} belongs to another organization",
            request.id
        ))))
    }
}

// ==================
// Handlers
// ==================

async fn open_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    body: Result<Json<OpenPromotion>, JsonRejection>,
) -> Result<(StatusCode, Json<PromotionView>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    let body = json_body(body)?;
    let request = state.workflow().open(body, &caller).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

async fn list_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Query(query): Query<ListPromotionsQuery>,
) -> Result<Json<PromotionListResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let organization_id = query
        .organization_id
        .or_else(|| caller.organization_id.clone())
        .ok_or_else(|| bad_request("organizationId is required"))?;

    if !caller.is_superadmin() && !caller.belongs_to(&organization_id) {
        return Err(api_error(PromotionError::unauthorized(format!(
            "cannot list promotions of organization {}",
            organization_id
        ))));
    }

    let filter = query
        .status
        .as_deref()
        .map(str::parse::<StatusFilter>)
        .transpose()
        .map_err(api_error)?;

    let promotions: Vec<PromotionView> = state
        .workflow()
        .list(&organization_id, filter)
        .map_err(api_error)?
        .into_iter()
        .map(PromotionView::from)
        .collect();
    let total = promotions.len();
    Ok(Json(PromotionListResponse { promotions, total }))
}

async fn get_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<PromotionView>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let request = state.workflow().get(id).map_err(api_error)?;
    ensure_visible(&caller, &request)?;
    Ok(Json(request.into()))
}

async fn approve_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Result<Json<ApproveBody>, JsonRejection>,
) -> Result<Json<PromotionView>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let body: ApproveBody = optional_json_body(body)?;
    let request = state
        .workflow()
        .approve(id, &caller, body.notes)
        .map_err(api_error)?;
    Ok(Json(request.into()))
}

async fn reject_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Result<Json<RejectBody>, JsonRejection>,
) -> Result<Json<PromotionView>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    // No body falls through to the engine's missing-reason check.
    let body: RejectBody = optional_json_body(body)?;
    let reason = body.reason.unwrap_or_default();
    let request = state
        .workflow()
        .reject(id, &caller, &reason)
        .map_err(api_error)?;
    Ok(Json(request.into()))
}

async fn cancel_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<PromotionView>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let request = state.workflow().cancel(id, &caller).map_err(api_error)?;
    Ok(Json(request.into()))
}

async fn execute_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let result = state.engine().execute(id, &caller).map_err(api_error)?;
    Ok(Json(result))
}

async fn rollback_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<RollbackOutcome>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let outcome = state.rollback(id, &caller).map_err(api_error)?;
    Ok(Json(outcome))
}

async fn resolve_conflict_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path((id, field)): Path<(Uuid, String)>,
    body: Result<Json<ResolveConflictBody>, JsonRejection>,
) -> Result<Json<PromotionView>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let body = json_body(body)?;
    let request = state
        .workflow()
        .resolve_conflict(id, &caller, &field, body.resolution, body.merged_value)
        .map_err(api_error)?;
    Ok(Json(request.into()))
}
