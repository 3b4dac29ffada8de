use serde::{Deserialize, Serialize};

use crate::tasks::ProgressReport;

/// Group joined by clients of the home page (room `broadcast`).
pub const NOTIFICATION_BROADCAST_GROUP: &str = "notification_broadcast";

/// Group name for a notification room.
pub fn notification_group(room_name: &str) -> String {
    format!("notification_{}", room_name)
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A broadcast notification or a mail-completion notice
    SendNotification { message: String },

    /// A background task advanced or finished
    UpdateTaskProgress(ProgressReport),
}
