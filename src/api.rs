//! HTTP API handlers for Watchpost.
//!
//! The transport layer stays thin: handlers validate nothing themselves,
//! they hand requests to the engine and map its typed errors to status
//! codes. Timestamps are always server-assigned here, never taken from
//! clients, so cooldown arithmetic cannot be spoofed by a caller.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::live::{LiveFeed, Overlay};
use crate::model::{IncidentChanges, IncidentListQuery, LiveSnapshot, ObjectStat, SubmitRequest};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub live: LiveFeed,
}

fn error_response(err: &EngineError) -> (StatusCode, Json<serde_json::Value>) {
    (err.status_code(), Json(json!({ "error": err.to_string() })))
}

/// POST /detections - Submit a detection event through the dedup and
/// correlation pipeline.
///
/// Returns `201 Created` when a new log entry was written, `200 OK` when
/// the event was folded into a recent one. The body carries the full
/// pipeline outcome either way.
#[instrument(skip(state), fields(camera_id = request.camera_id, weapon_type = %request.weapon_type))]
pub async fn post_detection(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> impl IntoResponse {
    let now = Utc::now();

    match state
        .engine
        .submit(
            request.camera_id,
            &request.weapon_type,
            request.confidence,
            request.user_id,
            &request.location,
            now,
        )
        .await
    {
        Ok(outcome) => {
            let status = if outcome.is_new_log {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(json!(outcome)))
        }
        Err(e) => {
            warn!(error = %e, "Failed to process detection");
            error_response(&e)
        }
    }
}

/// Request body for PUT /incidents/{id}.
#[derive(Debug, Deserialize)]
pub struct UpdateIncidentRequest {
    /// The acting user; their role drives the permission policy.
    pub user_id: i64,
    #[serde(flatten)]
    pub changes: IncidentChanges,
}

/// PUT /incidents/{id} - Update an incident's status, assignment,
/// priority, or notes.
#[instrument(skip(state, request), fields(user_id = request.user_id))]
pub async fn put_incident(
    State(state): State<AppState>,
    Path(incident_id): Path<i64>,
    Json(request): Json<UpdateIncidentRequest>,
) -> impl IntoResponse {
    let now = Utc::now();

    match state
        .engine
        .update_incident(incident_id, request.user_id, &request.changes, now)
        .await
    {
        Ok(incident) => (StatusCode::OK, Json(json!({ "incident": incident }))),
        Err(e) => {
            warn!(incident_id, error = %e, "Failed to update incident");
            error_response(&e)
        }
    }
}

/// GET /incidents/{id} - Incident detail with its audit trail.
#[instrument(skip(state))]
pub async fn get_incident(
    State(state): State<AppState>,
    Path(incident_id): Path<i64>,
) -> impl IntoResponse {
    match state.engine.incident_detail(incident_id).await {
        Ok((incident, actions)) => (
            StatusCode::OK,
            Json(json!({ "incident": incident, "actions": actions })),
        ),
        Err(e) => {
            warn!(incident_id, error = %e, "Failed to fetch incident");
            error_response(&e)
        }
    }
}

/// GET /incidents - List incidents, newest first, optionally filtered by
/// status and assignee.
#[instrument(skip(state))]
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentListQuery>,
) -> impl IntoResponse {
    match state
        .engine
        .list_incidents(query.status, query.assigned_to, query.limit)
        .await
    {
        Ok(incidents) => {
            info!(count = incidents.len(), "Incidents listed");
            (StatusCode::OK, Json(json!({ "incidents": incidents })))
        }
        Err(e) => {
            warn!(error = %e, "Failed to list incidents");
            error_response(&e)
        }
    }
}

/// DELETE /users/{id} - Administratively delete a user and their
/// dependent records (detections, aggregates, audit rows); incidents
/// survive with the assignment cleared.
#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    match state.engine.delete_user(user_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": "User deleted" }))),
        Err(e) => {
            warn!(user_id, error = %e, "Failed to delete user");
            error_response(&e)
        }
    }
}

/// Request body for POST /live. The timestamp is always stamped
/// server-side.
#[derive(Debug, Deserialize)]
pub struct PublishLiveRequest {
    pub detected: bool,
    #[serde(default)]
    pub objects: std::collections::HashMap<String, ObjectStat>,
}

/// POST /live - Publish the latest detection snapshot from the feed.
#[instrument(skip(state, request), fields(detected = request.detected))]
pub async fn post_live(
    State(state): State<AppState>,
    Json(request): Json<PublishLiveRequest>,
) -> impl IntoResponse {
    state
        .live
        .publish(LiveSnapshot {
            detected: request.detected,
            objects: request.objects,
            timestamp: None,
        })
        .await;

    StatusCode::ACCEPTED
}

/// GET /live - Read the current snapshot plus its derived overlay.
#[instrument(skip(state))]
pub async fn get_live(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.live.read().await;
    let overlay = Overlay::from_snapshot(&snapshot);
    (
        StatusCode::OK,
        Json(json!({ "snapshot": snapshot, "overlay": overlay })),
    )
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
