use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use clockwork_types::api::CreateNotificationRequest;
use clockwork_types::events::{GatewayEvent, NOTIFICATION_BROADCAST_GROUP};
use clockwork_types::models::BroadcastNotification;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_notifications(State(state): State<AppState>) -> Result<Json<Vec<BroadcastNotification>>, ApiError> {
    let notifications = state.db(|db| db.list_notifications()).await?;
    Ok(Json(notifications))
}

/// Store a notification; the beat scheduler broadcasts it once `broadcast_on` passes.
pub async fn create_notification(
    State(state): State<AppState>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::field("message", "This field is required."));
    }

    let broadcast_on = req.broadcast_on;
    let notification = state
        .db(move |db| db.create_notification(&message, broadcast_on))
        .await?;
    info!("notification {} scheduled for {}", notification.id, notification.broadcast_on);

    Ok((StatusCode::CREATED, Json(notification)))
}

/// Push a fixed message to everyone on the home page.
pub async fn test_notification(State(state): State<AppState>) -> &'static str {
    let reached = state
        .dispatcher
        .group_send(
            NOTIFICATION_BROADCAST_GROUP,
            GatewayEvent::SendNotification {
                message: "Notification".into(),
            },
        )
        .await;
    info!("test notification reached {} clients", reached);
    "Done"
}
