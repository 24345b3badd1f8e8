//! Admin mutation endpoints for the out-of-band "web/config UI":
//! schedule edits, retirement, inhibit toggles, and notification rule
//! management, alongside the client-facing lifecycle endpoints.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crab_core::model::{JobRef, NotificationRule};
use crab_core::schedule::validate as validate_schedule;

use crate::error::ProtocolError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetScheduleRequest {
    pub spec: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub grace_period_secs: Option<i64>,
    #[serde(default)]
    pub timeout_secs: Option<i64>,
}

/// `POST /api/0/jobs/:id/schedule`
pub async fn set_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetScheduleRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    validate_schedule(&req.spec)?;
    let job_ref = JobRef(id);
    state
        .store
        .set_schedule(
            job_ref,
            &req.spec,
            req.timezone.as_deref(),
            req.grace_period_secs,
            req.timeout_secs,
        )
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// `POST /api/0/jobs/:id/retire`
pub async fn retire_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ProtocolError> {
    state.store.retire_job(JobRef(id)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// `POST /api/0/jobs/:id/inhibit`
pub async fn set_inhibit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ProtocolError> {
    state.store.set_inhibit(JobRef(id), true).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// `DELETE /api/0/jobs/:id/inhibit`
pub async fn clear_inhibit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ProtocolError> {
    state.store.set_inhibit(JobRef(id), false).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// `GET /api/0/notifications`
pub async fn get_notifications(State(state): State<AppState>) -> Result<impl IntoResponse, ProtocolError> {
    let rules = state.store.get_notifications().await?;
    Ok(Json(json!({ "notifications": rules })))
}

/// `PUT /api/0/notifications` — full, transactional replace.
pub async fn put_notifications(
    State(state): State<AppState>,
    Json(rules): Json<Vec<NotificationRule>>,
) -> Result<impl IntoResponse, ProtocolError> {
    state.store.set_notifications(rules).await?;
    Ok(Json(json!({ "status": "ok" })))
}
