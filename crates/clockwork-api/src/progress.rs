use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use clockwork_types::tasks::ProgressReport;

use crate::error::ApiError;
use crate::state::AppState;

/// Polled by the progress bar of HTTP-reported tasks.
pub async fn task_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ProgressReport>, ApiError> {
    let id: Uuid = task_id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("No task {}", task_id)))?;
    Ok(Json(state.queue.report(id).await))
}
