//! HTTP API module
//!
//! This module contains all HTTP endpoint handlers and response structures.

pub mod handlers;
pub mod responses;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use handlers::*;

/// Create the HTTP router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/timers", get(list_timers_handler).post(create_timer_handler))
        .route(
            "/timers/:id",
            get(get_timer_handler)
                .patch(update_timer_handler)
                .delete(delete_timer_handler),
        )
        .route("/timers/:id/steps", post(insert_step_handler))
        .route(
            "/timers/:id/steps/:step_id",
            axum::routing::put(replace_step_handler).delete(delete_step_handler),
        )
        .route("/timers/:id/steps/:step_id/move", post(move_step_handler))
        .route("/timers/:id/steps/:step_id/duplicate", post(duplicate_step_handler))
        // run control
        .route("/timers/:id/start", post(start_handler))
        .route("/timers/:id/pause", post(pause_handler))
        .route("/timers/:id/restart", post(restart_handler))
        .route("/timers/:id/stop", post(stop_handler))
        .route("/timers/:id/run", get(run_state_handler))
        // stopwatch
        .route("/timers/:id/mark", post(mark_handler))
        .route("/timers/:id/reset", post(reset_handler))
        .route(
            "/timers/:id/logs/:log_id",
            axum::routing::patch(rename_log_handler).delete(delete_log_handler),
        )
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runner::TimerRunner,
        services::audio::AudioChannel,
        test_support::{FakeNotifier, FakePlayer, DEFAULT_SOUND},
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let audio = Arc::new(AudioChannel::new(Arc::new(FakePlayer::lasting(Duration::from_millis(10)))));
        let runner = TimerRunner::new(audio, Arc::new(FakeNotifier::granted()), DEFAULT_SOUND);
        let state = AppState::new(20554, "127.0.0.1".to_string(), runner, None, Vec::new());
        create_router(Arc::new(state))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn builds_and_runs_a_timer() {
        let app = app();
        let (status, timer) = call(&app, Method::POST, "/timers", Some(json!({"name": "Tea"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(timer["mode"], "sequence");
        let id = timer["id"].as_str().unwrap().to_string();

        let insert = json!({
            "target": {"kind": "rootEnd"},
            "step": {"type": "wait", "amount": 5, "unit": "minutes"}
        });
        let (status, timer) = call(&app, Method::POST, &format!("/timers/{}/steps", id), Some(insert)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(timer["steps"][0]["type"], "wait");
        let step_id = timer["steps"][0]["id"].as_str().unwrap().to_string();

        let (status, run) = call(&app, Method::POST, &format!("/timers/{}/start", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["run"]["status"], "running");
        assert_eq!(run["run"]["activeStepId"], step_id);

        let (_, run) = call(&app, Method::POST, &format!("/timers/{}/stop", id), None).await;
        assert_eq!(run["run"]["status"], "idle");
        assert_eq!(run["run"]["lastOutcome"], "aborted");

        let (_, status_body) = call(&app, Method::GET, "/status", None).await;
        assert_eq!(status_body["timers"], 1);
        assert_eq!(status_body["last_action"], "stop");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = app();
        let (status, _) = call(&app, Method::GET, "/timers/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::POST, "/timers", Some(json!({"name": "  "}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, timer) = call(&app, Method::POST, "/timers", Some(json!({"name": "Locked", "mode": "alarm"}))).await;
        let id = timer["id"].as_str().unwrap().to_string();
        let (status, timer) = call(
            &app,
            Method::PATCH,
            &format!("/timers/{}", id),
            Some(json!({"locked": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(timer["locked"], true);

        let insert = json!({
            "target": {"kind": "rootStart"},
            "step": {"type": "notify", "title": "Hi"}
        });
        let (status, _) = call(&app, Method::POST, &format!("/timers/{}/steps", id), Some(insert)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::DELETE, &format!("/timers/{}/steps/missing", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::POST, &format!("/timers/{}/reset", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::DELETE, &format!("/timers/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::GET, &format!("/timers/{}/run", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stopwatch_marks_over_http() {
        let app = app();
        let (_, timer) = call(&app, Method::POST, "/timers", Some(json!({"name": "Run", "mode": "stopwatch"}))).await;
        let id = timer["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, Method::POST, &format!("/timers/{}/mark", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        call(&app, Method::POST, &format!("/timers/{}/start", id), None).await;
        let (status, mark) = call(&app, Method::POST, &format!("/timers/{}/mark", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mark["log"]["name"], "Lap 1");
        let log_id = mark["log"]["id"].as_str().unwrap().to_string();

        let (status, timer) = call(
            &app,
            Method::PATCH,
            &format!("/timers/{}/logs/{}", id, log_id),
            Some(json!({"name": "Warmup"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(timer["logs"][0]["name"], "Warmup");

        let (status, timer) = call(&app, Method::POST, &format!("/timers/{}/reset", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(timer["run"]["elapsedMs"], 0);
        assert!(timer.get("logs").is_none());
    }
}
