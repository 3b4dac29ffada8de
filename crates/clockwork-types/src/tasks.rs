use serde::{Deserialize, Serialize};

/// Lifecycle of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Progress,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub pending: bool,
    pub current: u64,
    pub total: u64,
    pub percent: f64,
    pub description: Option<String>,
}

impl ProgressInfo {
    pub fn new(current: u64, total: u64, description: Option<String>) -> Self {
        Self {
            pending: false,
            current,
            total,
            percent: percent(current, total),
            description,
        }
    }

    pub fn pending() -> Self {
        Self {
            pending: true,
            current: 0,
            total: 100,
            percent: 0.0,
            description: None,
        }
    }

    pub fn finished() -> Self {
        Self::new(100, 100, None)
    }
}

/// Snapshot of a task as served by the polling endpoint and pushed over the
/// progress WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub state: TaskStatus,
    pub complete: bool,
    /// `None` until the task completes.
    pub success: Option<bool>,
    pub progress: ProgressInfo,
    pub result: Option<serde_json::Value>,
}

/// `current / total * 100`, rounded to two decimals; 0 when `total` is 0.
pub fn percent(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = current as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
