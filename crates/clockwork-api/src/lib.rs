pub mod accounts;
pub mod auth;
pub mod demo;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod notifications;
pub mod pages;
pub mod progress;
pub mod state;
pub mod tokens;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::middleware::{require_admin, require_auth};
use crate::state::AppState;

/// Every HTTP route. WebSocket routes are mounted by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(pages::home))
        .route("/test", get(pages::queue_smoke_test))
        .route("/health", get(pages::health))
        // Accounts
        .route("/register/", post(auth::register))
        .route("/login/", post(auth::login))
        .route("/logout/", get(auth::logout))
        .route("/activate/{uidb64}/{token}/", get(auth::activate))
        .route("/password_reset/", post(auth::password_reset))
        .route("/reset/{uidb64}/{token}/", post(auth::password_reset_confirm))
        // Mail
        .route("/sendmailtoall/", get(mail::send_mail_to_all))
        .route("/send_mail/", post(mail::send_mail))
        .route("/websocket_send_mail/", post(mail::websocket_send_mail))
        .route("/schedule_mail/", post(mail::schedule_mail))
        .route("/ws_view/", get(mail::ws_view))
        .route("/celery-progress/{task_id}/", get(progress::task_progress))
        .route("/test/notification/", get(notifications::test_notification))
        // Demo
        .route("/tasks/", get(demo::index))
        .route("/tasks/http/", get(demo::http))
        .route("/tasks/http_error/", get(demo::http_error))
        .route("/tasks/ws/", get(demo::ws))
        .route("/tasks/ws_error/", get(demo::ws_error));

    let protected_routes = Router::new()
        .route("/account/", get(auth::get_account).post(auth::update_account))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route(
            "/notifications/",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .layer(from_fn_with_state(state.clone(), require_admin))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .fallback(pages::not_found)
        .with_state(state)
}
