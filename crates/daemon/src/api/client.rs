//! Client protocol handler: the HTTP JSON endpoints the job
//! wrapper (`crabsh`) calls to register, start, finish and query a job.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crab_core::event_filter::derive;
use crab_core::model::EventKind;
use crab_store::EventPayload;

use crate::error::ProtocolError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct FinishRequest {
    pub command: String,
    pub status: i32,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
}

/// `PUT /api/0/crab/<host>` — register with no crabid (command-keyed).
pub async fn register_no_id(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    register(state, host, None, req).await
}

/// `PUT /api/0/crab/<host>/<id>` — register with a crabid.
pub async fn register_with_id(
    State(state): State<AppState>,
    Path((host, id)): Path<(String, String)>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    register(state, host, Some(id), req).await
}

async fn register(
    state: AppState,
    host: String,
    crabid: Option<String>,
    req: RegisterRequest,
) -> Result<impl IntoResponse, ProtocolError> {
    let job_ref = state
        .store
        .ensure_job(&host, crabid.as_deref(), &req.command)
        .await?;
    Ok(Json(json!({ "status": "ok", "job_ref": job_ref.0 })))
}

/// `PUT /api/0/crab/<host>/start` — log START, no crabid.
pub async fn start_no_id(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    start(state, host, None, req).await
}

/// `PUT /api/0/crab/<host>/<id>/start` — log START.
pub async fn start_with_id(
    State(state): State<AppState>,
    Path((host, id)): Path<(String, String)>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    start(state, host, Some(id), req).await
}

async fn start(
    state: AppState,
    host: String,
    crabid: Option<String>,
    req: StartRequest,
) -> Result<impl IntoResponse, ProtocolError> {
    // A START with no prior registration implicitly registers,
    // and auto-supersedes when the stored command differs from the one
    // the caller reports — `ensure_job` already implements both.
    let job_ref = state
        .store
        .ensure_job(&host, crabid.as_deref(), &req.command)
        .await?;
    let job = state.store.get_job(job_ref).await?;
    state.store.log_start(job_ref, Utc::now()).await?;

    // Inhibition is per-(host, crabid-or-command): it does not affect
    // event logging, only this response flag.
    Ok(Json(json!({ "status": "ok", "inhibit": job.inhibited })))
}

/// `PUT /api/0/crab/<host>/finish` — log FINISH, no crabid.
pub async fn finish_no_id(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<FinishRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    finish(state, host, None, req).await
}

/// `PUT /api/0/crab/<host>/<id>/finish` — log FINISH.
pub async fn finish_with_id(
    State(state): State<AppState>,
    Path((host, id)): Path<(String, String)>,
    Json(req): Json<FinishRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    finish(state, host, Some(id), req).await
}

async fn finish(
    state: AppState,
    host: String,
    crabid: Option<String>,
    req: FinishRequest,
) -> Result<impl IntoResponse, ProtocolError> {
    let job_ref = state
        .store
        .ensure_job(&host, crabid.as_deref(), &req.command)
        .await?;
    state
        .store
        .append_event(
            job_ref,
            EventKind::Finish,
            Utc::now(),
            Some(EventPayload {
                status_code: Some(req.status),
                stdout: req.stdout.map(String::into_bytes),
                stderr: req.stderr.map(String::into_bytes),
            }),
        )
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub command: String,
    /// One of the non-terminal-path event kinds a wrapper can observe
    /// client-side: `ALREADYRUNNING`, `INHIBITED`, `COULDNOTSTART`, `WARN`.
    /// START/FINISH/MISSED/TIMEOUT go through their own endpoints or the
    /// monitor.
    pub kind: String,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
}

/// `PUT /api/0/crab/<host>/event` — report a client-observed event kind
/// the wrapper needs that isn't START or FINISH (e.g. the wrapper
/// reporting `INHIBITED`).
pub async fn report_no_id(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<ReportRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    report(state, host, None, req).await
}

/// `PUT /api/0/crab/<host>/<id>/event`
pub async fn report_with_id(
    State(state): State<AppState>,
    Path((host, id)): Path<(String, String)>,
    Json(req): Json<ReportRequest>,
) -> Result<impl IntoResponse, ProtocolError> {
    report(state, host, Some(id), req).await
}

async fn report(
    state: AppState,
    host: String,
    crabid: Option<String>,
    req: ReportRequest,
) -> Result<impl IntoResponse, ProtocolError> {
    let kind: EventKind = req
        .kind
        .parse()
        .map_err(|e: String| ProtocolError::BadRequest(e))?;
    if matches!(
        kind,
        EventKind::Start | EventKind::Finish | EventKind::Missed | EventKind::Timeout
    ) {
        return Err(ProtocolError::BadRequest(format!(
            "{} is reported through its own endpoint, not /event",
            kind.as_str()
        )));
    }

    let job_ref = state.store.ensure_job(&host, crabid.as_deref(), &req.command).await?;
    state
        .store
        .append_event(
            job_ref,
            kind,
            Utc::now(),
            Some(EventPayload {
                status_code: req.status,
                stdout: req.stdout.map(String::into_bytes),
                stderr: req.stderr.map(String::into_bytes),
            }),
        )
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// `GET /api/0/crab/<host>` — current state + recent events, no crabid.
pub async fn get_no_id(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<impl IntoResponse, ProtocolError> {
    get(state, host, None).await
}

/// `GET /api/0/crab/<host>/<id>` — current state + recent events.
pub async fn get_with_id(
    State(state): State<AppState>,
    Path((host, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ProtocolError> {
    get(state, host, Some(id)).await
}

async fn get(state: AppState, host: String, crabid: Option<String>) -> Result<impl IntoResponse, ProtocolError> {
    let jobs = state.store.get_jobs(false).await?;
    let job = jobs
        .into_iter()
        .find(|j| j.host == host && j.crabid.as_deref() == crabid.as_deref())
        .ok_or(ProtocolError::NotFound)?;

    let events = state.store.get_events(job.job_ref, None, Some(50)).await?;
    let timeout = job.timeout_secs.map(chrono::Duration::seconds);
    let status = derive(&events, timeout, Utc::now());

    Ok(Json(json!({
        "status": "ok",
        "job": job,
        "current_state": status.current_state,
        "events": events,
    })))
}
