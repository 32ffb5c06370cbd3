//! HTTP endpoint handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::{error, info, warn};

use super::responses::{
    CreateTimerRequest, HealthResponse, InsertStepRequest, MarkResponse, MoveStepRequest, NameRequest, RunResponse,
    StatusResponse, TimerView, UpdateTimerRequest,
};
use crate::{
    model::{step::StepId, step::StepKind, timer::Timer},
    state::{AppError, AppState, RunState},
    utils::time::format_duration_ms,
};

type ApiResult<T> = Result<Json<T>, StatusCode>;

/// Log a failed request and map it to a status code
fn reject(action: &str, e: AppError) -> StatusCode {
    let status = match &e {
        AppError::TimerNotFound(_) | AppError::StepNotFound(_) | AppError::LogNotFound(_) => StatusCode::NOT_FOUND,
        AppError::Locked(_) | AppError::NotRunning(_) | AppError::NotStopwatch(_) => StatusCode::CONFLICT,
        AppError::InvalidName | AppError::InvalidPlacement => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Failed to {}: {}", action, e);
    } else {
        warn!("Refused to {}: {}", action, e);
    }
    status
}

fn view(state: &AppState, timer: Timer) -> TimerView {
    let run = state.runner.snapshot(&timer.id);
    TimerView { timer, run }
}

/// Handle GET /timers
pub async fn list_timers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TimerView>> {
    let views = state.list_timers().into_iter().map(|timer| view(&state, timer)).collect();
    Json(views)
}

/// Handle POST /timers
pub async fn create_timer_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTimerRequest>,
) -> Result<(StatusCode, Json<TimerView>), StatusCode> {
    let timer = state
        .create_timer(&request.name, request.mode)
        .await
        .map_err(|e| reject("create timer", e))?;
    Ok((StatusCode::CREATED, Json(view(&state, timer))))
}

/// Handle GET /timers/:id
pub async fn get_timer_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<TimerView> {
    let timer = state.get_timer(&id).map_err(|e| reject("get timer", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle PATCH /timers/:id - rename and/or lock
pub async fn update_timer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTimerRequest>,
) -> ApiResult<TimerView> {
    let timer = state
        .update_timer(&id, request.name.as_deref(), request.locked)
        .await
        .map_err(|e| reject("update timer", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle DELETE /timers/:id
pub async fn delete_timer_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    match state.delete_timer(&id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => reject("delete timer", e),
    }
}

/// Handle POST /timers/:id/steps
pub async fn insert_step_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<InsertStepRequest>,
) -> ApiResult<TimerView> {
    let timer = state
        .insert_step(&id, &request.target, request.step)
        .await
        .map_err(|e| reject("insert step", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle PUT /timers/:id/steps/:step_id
pub async fn replace_step_handler(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(String, String)>,
    Json(kind): Json<StepKind>,
) -> ApiResult<TimerView> {
    let timer = state
        .replace_step(&id, &StepId::from(step_id), kind)
        .await
        .map_err(|e| reject("edit step", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle DELETE /timers/:id/steps/:step_id
pub async fn delete_step_handler(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(String, String)>,
) -> ApiResult<TimerView> {
    let timer = state
        .delete_step(&id, &StepId::from(step_id))
        .await
        .map_err(|e| reject("delete step", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle POST /timers/:id/steps/:step_id/move
pub async fn move_step_handler(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(String, String)>,
    Json(request): Json<MoveStepRequest>,
) -> ApiResult<TimerView> {
    let timer = state
        .move_step(&id, &StepId::from(step_id), &request.target)
        .await
        .map_err(|e| reject("move step", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle POST /timers/:id/steps/:step_id/duplicate
pub async fn duplicate_step_handler(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(String, String)>,
) -> ApiResult<TimerView> {
    let timer = state
        .duplicate_step(&id, &StepId::from(step_id))
        .await
        .map_err(|e| reject("duplicate step", e))?;
    Ok(Json(view(&state, timer)))
}

fn run_response(action: &str, id: &str, result: Result<RunState, AppError>) -> ApiResult<RunResponse> {
    let run = result.map_err(|e| reject(action, e))?;
    info!("{} endpoint called for timer {}", action, id);
    Ok(Json(RunResponse::new(id, format!("Timer {}: {}", id, action), run)))
}

/// Handle POST /timers/:id/start
pub async fn start_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<RunResponse> {
    run_response("start", &id, state.start(&id))
}

/// Handle POST /timers/:id/pause
pub async fn pause_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<RunResponse> {
    run_response("pause", &id, state.pause(&id))
}

/// Handle POST /timers/:id/restart
pub async fn restart_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<RunResponse> {
    run_response("restart", &id, state.restart(&id))
}

/// Handle POST /timers/:id/stop
pub async fn stop_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<RunResponse> {
    run_response("stop", &id, state.stop(&id))
}

/// Handle GET /timers/:id/run
pub async fn run_state_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<RunState> {
    state.run_state(&id).map(Json).map_err(|e| reject("read run state", e))
}

/// Handle POST /timers/:id/mark - body is optional
pub async fn mark_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Option<Json<NameRequest>>,
) -> ApiResult<MarkResponse> {
    let name = request.and_then(|Json(request)| request.name);
    let log = state.mark(&id, name.as_deref()).await.map_err(|e| reject("mark", e))?;
    let display = format_duration_ms(log.elapsed_ms);
    Ok(Json(MarkResponse { log, display }))
}

/// Handle POST /timers/:id/reset
pub async fn reset_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<TimerView> {
    let timer = state.reset(&id).await.map_err(|e| reject("reset stopwatch", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle PATCH /timers/:id/logs/:log_id
pub async fn rename_log_handler(
    State(state): State<Arc<AppState>>,
    Path((id, log_id)): Path<(String, String)>,
    Json(request): Json<NameRequest>,
) -> ApiResult<TimerView> {
    let name = request.name.unwrap_or_default();
    let timer = state
        .rename_log(&id, &log_id, &name)
        .await
        .map_err(|e| reject("rename log", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle DELETE /timers/:id/logs/:log_id
pub async fn delete_log_handler(
    State(state): State<Arc<AppState>>,
    Path((id, log_id)): Path<(String, String)>,
) -> ApiResult<TimerView> {
    let timer = state
        .delete_log(&id, &log_id)
        .await
        .map_err(|e| reject("delete log", e))?;
    Ok(Json(view(&state, timer)))
}

/// Handle GET /status - Return current server status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let timers = state.list_timers();
    let running = timers.iter().filter(|timer| state.runner.is_running(&timer.id)).count();
    let (last_action, last_action_time) = state.get_last_action();

    Json(StatusResponse {
        timers: timers.len(),
        running,
        uptime: state.get_uptime(),
        port: state.port,
        host: state.host.clone(),
        last_action,
        last_action_time,
    })
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
