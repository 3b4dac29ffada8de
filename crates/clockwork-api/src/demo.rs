//! Demo pages contrasting failures surfaced over HTTP with failures surfaced
//! over a WebSocket progress stream.

use anyhow::Context;
use axum::{Json, extract::State};
use serde_json::{Value, json};

use clockwork_types::api::TaskIdsResponse;
use clockwork_worker::tasks::Task;

use crate::error::ApiError;
use crate::state::AppState;

const STEPS: u32 = 100;

pub async fn index() -> Json<Value> {
    Json(json!({
        "http": "/tasks/http/",
        "http_error": "/tasks/http_error/",
        "ws": "/tasks/ws/",
        "ws_error": "/tasks/ws_error/",
    }))
}

pub async fn http(State(state): State<AppState>) -> Result<Json<TaskIdsResponse>, ApiError> {
    start(&state, Task::HttpTask { number: STEPS }).await
}

/// Fails inside the request itself, before anything is queued, so the client sees a 500.
pub async fn http_error(State(state): State<AppState>) -> Result<Json<TaskIdsResponse>, ApiError> {
    let number = std::iter::empty::<u32>()
        .next()
        .context("StopIteration: no step count to start from")?;
    start(&state, Task::HttpTask { number }).await
}

pub async fn ws(State(state): State<AppState>) -> Result<Json<TaskIdsResponse>, ApiError> {
    start(&state, Task::WsTask { number: STEPS }).await
}

/// Queues a task that fails part-way; the failure arrives over the progress socket.
pub async fn ws_error(State(state): State<AppState>) -> Result<Json<TaskIdsResponse>, ApiError> {
    start(&state, Task::WsErrorTask).await
}

async fn start(state: &AppState, task: Task) -> Result<Json<TaskIdsResponse>, ApiError> {
    let task_id = state.queue.enqueue(task).await?;
    Ok(Json(TaskIdsResponse { task_ids: vec![task_id] }))
}
