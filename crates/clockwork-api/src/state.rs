use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::error;

use clockwork_db::Database;
use clockwork_gateway::dispatcher::Dispatcher;
use clockwork_worker::mail::Mailer;
use clockwork_worker::queue::TaskQueue;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub queue: TaskQueue,
    pub dispatcher: Dispatcher,
    pub mailer: Mailer,
    pub settings: Settings,
}

/// Request-time settings the handlers need.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Signs JWTs and account tokens
    pub secret: String,
    /// Prefix for links in outgoing mail, without trailing slash
    pub base_url: String,
    pub from_email: String,
    /// Lifetime of activation and password-reset links
    pub password_reset_timeout: Duration,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow!("database task failed"))
            })?
            .map_err(ApiError::Internal)
    }

    /// Absolute link for a path starting with `/`.
    pub fn link(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }
}
