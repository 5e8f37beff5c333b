// src/api/handlers.rs

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::{auth, types::*, ApiState};
use crate::core::projection::{ExplorationLog, IterationProgress, IterationReport, RunResults};
use crate::core::types::RunProgress;
use crate::infra::errors::SkillForgeError;

pub type ApiResult<T> = Result<Json<Envelope<T>>, (StatusCode, Json<Envelope<()>>)>;

fn status_for(e: &SkillForgeError) -> StatusCode {
    match e {
        e if e.is_state_error() => StatusCode::CONFLICT,
        SkillForgeError::ProjectNotFound(_) | SkillForgeError::SkillNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SkillForgeError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T, SkillForgeError>) -> ApiResult<T> {
    match result {
        Ok(data) => Ok(Json(Envelope::success(data))),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!("API request failed: {}", e);
            }
            let error = ApiError::from(&e);
            Err((status, Json(Envelope::failure(error.code, error.message))))
        }
    }
}

// ─── Evaluation run ─────────────────────────────────────────────────

/// POST /api/v1/projects/{id}/evaluation/start
pub async fn evaluation_start(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RunProgress> {
    auth::check_auth(&state, &headers)?;
    respond(state.runs.start(&id))
}

/// POST /api/v1/projects/{id}/evaluation/pause
pub async fn evaluation_pause(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RunProgress> {
    auth::check_auth(&state, &headers)?;
    respond(state.runs.pause(&id))
}

/// POST /api/v1/projects/{id}/evaluation/resume
pub async fn evaluation_resume(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RunProgress> {
    auth::check_auth(&state, &headers)?;
    respond(state.runs.resume(&id))
}

/// POST /api/v1/projects/{id}/evaluation/stop
pub async fn evaluation_stop(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RunProgress> {
    auth::check_auth(&state, &headers)?;
    respond(state.runs.stop(&id))
}

/// GET /api/v1/projects/{id}/evaluation/progress
pub async fn evaluation_progress(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RunProgress> {
    auth::check_auth(&state, &headers)?;
    respond(Ok(state.runs.get_progress(&id)))
}

/// GET /api/v1/projects/{id}/evaluation/results
pub async fn evaluation_results(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RunResults> {
    auth::check_auth(&state, &headers)?;
    respond(state.runs.get_results(&id))
}

/// POST /api/v1/projects/{id}/evaluation/cases/{case_id}/retry
pub async fn evaluation_retry_case(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((id, case_id)): Path<(String, String)>,
) -> ApiResult<RunProgress> {
    auth::check_auth(&state, &headers)?;
    respond(state.runs.retry_case(&id, &case_id))
}

// ─── Iteration ──────────────────────────────────────────────────────

/// POST /api/v1/projects/{id}/iteration/start
pub async fn iteration_start(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<IterationStartRequest>,
) -> ApiResult<IterationProgress> {
    auth::check_auth(&state, &headers)?;
    if body.seed_skill_id.trim().is_empty() {
        return respond(Err(SkillForgeError::InvalidParameter(
            "seed_skill_id cannot be empty".into(),
        )));
    }
    let params = body.into_params(&state.iteration_defaults);
    respond(state.iterations.start(&id, params))
}

/// POST /api/v1/projects/{id}/iteration/stop
pub async fn iteration_stop(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<IterationProgress> {
    auth::check_auth(&state, &headers)?;
    respond(state.iterations.stop(&id))
}

/// GET /api/v1/projects/{id}/iteration/progress
pub async fn iteration_progress(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<IterationProgress> {
    auth::check_auth(&state, &headers)?;
    respond(Ok(state.iterations.get_progress(&id)))
}

/// GET /api/v1/projects/{id}/iteration/report
pub async fn iteration_report(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Option<IterationReport>> {
    auth::check_auth(&state, &headers)?;
    respond(state.iterations.get_report(&id))
}

/// GET /api/v1/projects/{id}/iteration/log
pub async fn iteration_log(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<ExplorationLog> {
    auth::check_auth(&state, &headers)?;
    respond(state.iterations.get_exploration_log(&id))
}

// ─── Notifications ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    pub project: Option<String>,
}

/// GET /api/v1/events — Server-sent stream of progress events.
pub async fn events(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(filter): Query<EventFilter>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<Envelope<()>>)>
{
    auth::check_auth(&state, &headers)?;

    let mut rx = state.events.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if filter.project.as_deref().is_some_and(|p| p != event.project_id()) {
                        continue;
                    }
                    match Event::default().json_data(&event) {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => tracing::warn!("Failed to encode event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event subscriber lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /api/v1/health — Simple health check.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
