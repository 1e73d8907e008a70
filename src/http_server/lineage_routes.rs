//! Lineage HTTP Routes

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{api_error, bad_request, ApiError};
use super::identity::caller_from_headers;
use crate::promotion::{DataLineageEvent, LineageAction, LineageFilter, PromotionError, PromotionService};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub action: Option<LineageAction>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LineageResponse {
    pub events: Vec<DataLineageEvent>,
    pub total: usize,
}

impl From<Vec<DataLineageEvent>> for LineageResponse {
    fn from(events: Vec<DataLineageEvent>) -> Self {
        Self {
            total: events.len(),
            events,
        }
    }
}

pub fn lineage_routes(state: Arc<PromotionService>) -> Router {
    Router::new()
        .route("/lineage", get(organization_lineage_handler))
        .route("/lineage/:resource_id", get(resource_lineage_handler))
        .with_state(state)
}

/// Organization-wide history, newest first.
async fn organization_lineage_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Query(query): Query<LineageQuery>,
) -> Result<Json<LineageResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let organization_id = query
        .organization_id
        .or_else(|| caller.organization_id.clone())
        .ok_or_else(|| bad_request("organizationId is required"))?;
    if !caller.is_superadmin() && !caller.belongs_to(&organization_id) {
        return Err(api_error(PromotionError::unauthorized(format!(
            "cannot read lineage of organization {}",
            organization_id
        ))));
    }

    let mut filter =
        LineageFilter::for_organization(organization_id).between(query.since, query.until);
    filter.action = query.action;

    let events = state
        .lineage()
        .query_organization(&filter, query.limit)
        .map_err(api_error)?;
    Ok(Json(events.into()))
}

/// Full history of one resource, oldest first.
async fn resource_lineage_handler(
    State(state): State<Arc<PromotionService>>,
    headers: HeaderMap,
    Path(resource_id): Path<String>,
) -> Result<Json<LineageResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let mut events = state.lineage().query(&resource_id).map_err(api_error)?;
    if !caller.is_superadmin() {
        events.retain(|e| caller.belongs_to(&e.organization_id));
    }
    Ok(Json(events.into()))
}
