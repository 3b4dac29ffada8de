mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use clockwork_api::accounts;
use clockwork_api::state::{AppStateInner, Settings};
use clockwork_db::Database;
use clockwork_gateway::connection;
use clockwork_gateway::dispatcher::Dispatcher;
use clockwork_types::events::GatewayEvent;
use clockwork_worker::TaskContext;
use clockwork_worker::beat;
use clockwork_worker::queue::TaskQueue;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    queue: TaskQueue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clockwork=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(if config.db_path == ":memory:" {
        Database::open_in_memory()?
    } else {
        Database::open(&PathBuf::from(&config.db_path))?
    });

    if let Some(admin) = config.admin.clone() {
        seed_admin(db.clone(), admin).await?;
    }

    // Channel layer, mail and workers
    let dispatcher = Dispatcher::new();
    let mailer = config.mailer()?;
    let queue = TaskQueue::start(
        TaskContext {
            db: db.clone(),
            mailer: mailer.clone(),
            dispatcher: dispatcher.clone(),
            from_email: config.email.from.clone(),
            step_delay: config.demo_step_delay,
        },
        config.workers,
    );

    // Beat: due notifications and crontab schedules
    tokio::spawn(beat::run_beat_loop(db.clone(), queue.clone(), config.beat_interval));

    let app_state = Arc::new(AppStateInner {
        db,
        queue: queue.clone(),
        dispatcher: dispatcher.clone(),
        mailer,
        settings: Settings {
            secret: config.secret.clone(),
            base_url: config.base_url.clone(),
            from_email: config.email.from.clone(),
            password_reset_timeout: config.password_reset_timeout,
        },
    });

    let ws_routes = Router::new()
        .route("/ws/notification/{room_name}/", get(notification_ws))
        .route("/ws/progress/{task_id}/", get(progress_ws))
        .with_state(ServerState { dispatcher, queue });

    let app = clockwork_api::router(app_state)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Clock Work listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn seed_admin(db: Arc<Database>, admin: config::AdminSeed) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        if db.get_account_by_email(&accounts::normalize_email(&admin.email))?.is_some() {
            return Ok(());
        }
        if let Some(existing) = db.get_account_by_username(admin.username.trim())? {
            warn!("admin username {} already belongs to {}, not seeding", admin.username, existing);
            return Ok(());
        }
        let account = accounts::create_superuser(&db, &admin.email, &admin.username, &admin.password)?;
        info!("created admin account {}", account);
        Ok(())
    })
    .await?
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn notification_ws(
    State(state): State<ServerState>,
    Path(room_name): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_notification_connection(socket, state.dispatcher, room_name))
}

async fn progress_ws(
    State(state): State<ServerState>,
    Path(task_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(id) = task_id.parse::<Uuid>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let queue = state.queue.clone();
    let snapshot = async move { GatewayEvent::UpdateTaskProgress(queue.report(id).await) };
    ws.on_upgrade(move |socket| connection::handle_progress_connection(socket, state.dispatcher, id.to_string(), snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(email: &str, username: &str) -> config::AdminSeed {
        config::AdminSeed {
            email: email.into(),
            username: username.into(),
            password: "adminpass123".into(),
        }
    }

    #[tokio::test]
    async fn test_seed_admin_is_idempotent_and_skips_taken_username() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed_admin(db.clone(), seed("admin@example.com", "admin")).await.unwrap();
        seed_admin(db.clone(), seed("admin@example.com", "admin")).await.unwrap();

        // Same username under another address is left alone rather than failing startup
        seed_admin(db.clone(), seed("other@example.com", "admin")).await.unwrap();
        assert!(db.get_account_by_email("other@example.com").unwrap().is_none());

        let admin = db.get_account_by_username("admin").unwrap().unwrap();
        assert!(admin.is_superuser);
        assert!(admin.is_active);
    }
}
