use axum::{Json, extract::State};
use serde_json::{Value, json};

use clockwork_types::api::HomeResponse;
use clockwork_worker::tasks::Task;

use crate::error::ApiError;
use crate::state::AppState;

/// Room the home page listens on for broadcast notifications.
pub const HOME_ROOM: &str = "broadcast";

pub async fn home() -> Json<HomeResponse> {
    Json(HomeResponse {
        room_name: HOME_ROOM.into(),
    })
}

/// Queue the worker smoke test.
pub async fn queue_smoke_test(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.queue.enqueue(Task::TestFunc).await?;
    Ok("Done")
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("Not Found".into())
}
