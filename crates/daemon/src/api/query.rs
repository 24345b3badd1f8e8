//! Query/read API: job lists, per-job timelines and raw
//! event payloads, all served from a consistent Store snapshot — never
//! a dirty read from the monitor's in-memory cache.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crab_core::event_filter::derive;
use crab_core::model::JobRef;

use crate::error::ProtocolError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub include_retired: bool,
}

/// `GET /api/0/jobs`
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ProtocolError> {
    let jobs = state.store.get_jobs(q.include_retired).await?;

    let mut views = Vec::with_capacity(jobs.len());
    for job in jobs {
        let events = state.store.get_events(job.job_ref, None, Some(50)).await?;
        let timeout = job.timeout_secs.map(chrono::Duration::seconds);
        let status = derive(&events, timeout, Utc::now());
        views.push(json!({
            "job": job,
            "current_state": status.current_state,
        }));
    }
    Ok(Json(json!({ "jobs": views })))
}

/// `GET /api/0/jobs/:id`
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ProtocolError> {
    let job_ref = JobRef(id);
    let job = state.store.get_job(job_ref).await?;
    let events = state.store.get_events(job_ref, None, Some(200)).await?;
    let timeout = job.timeout_secs.map(chrono::Duration::seconds);
    let status = derive(&events, timeout, Utc::now());
    Ok(Json(json!({
        "job": job,
        "current_state": status.current_state,
        "last_start": status.last_start,
        "last_finish": status.last_finish,
        "streak_counts": status.streak_counts.iter().map(|(k, v)| (k.as_str(), v)).collect::<std::collections::HashMap<_, _>>(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub since: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /api/0/jobs/:id/events`
pub async fn get_job_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<EventsQuery>,
) -> Result<impl IntoResponse, ProtocolError> {
    let job_ref = JobRef(id);
    // Confirm the job exists so a bad id 404s rather than returning [].
    state.store.get_job(job_ref).await?;
    let since = q.since.map(crab_core::model::EventId);
    let events = state.store.get_events(job_ref, since, q.limit).await?;
    Ok(Json(json!({ "events": events })))
}
