mod common;

use axum::http::StatusCode;
use serde_json::json;

use clockwork_api::accounts;
use clockwork_types::tasks::TaskStatus;
use common::TestApp;

async fn login(app: &TestApp, email: &str, password: &str) -> String {
    let res = app
        .post_json("/login/", &json!({"email": email, "password": password}), None)
        .await;
    res.value()["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn home_health_and_fallback() {
    let app = TestApp::new();
    assert_eq!(app.get("/", None).await.value(), json!({"room_name": "broadcast"}));
    assert_eq!(app.get("/health", None).await.status, StatusCode::OK);
    assert_eq!(app.get("/test", None).await.text(), "Done");

    let res = app.get("/no/such/page/", None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.value(), json!({"error": "Not Found", "status": 404}));
}

#[tokio::test]
async fn notifications_are_admin_only() {
    let app = TestApp::new();
    let db = app.state.db.clone();
    accounts::create_superuser(&db, "admin@example.com", "admin", "adminpass123").unwrap();
    let user = accounts::create_user(&db, "user@example.com", "user", "userpass123").unwrap();
    db.set_account_active(user.id, true).unwrap();

    assert_eq!(app.get("/notifications/", None).await.status, StatusCode::UNAUTHORIZED);

    let user_token = login(&app, "user@example.com", "userpass123").await;
    assert_eq!(app.get("/notifications/", Some(&user_token)).await.status, StatusCode::FORBIDDEN);

    let admin_token = login(&app, "admin@example.com", "adminpass123").await;
    let res = app
        .post_json(
            "/notifications/",
            &json!({"message": "Server maintenance", "broadcast_on": "2030-01-01T09:00:00Z"}),
            Some(&admin_token),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.value()["sent"], false);

    app.post_json(
        "/notifications/",
        &json!({"message": "Later", "broadcast_on": "2031-01-01T09:00:00Z"}),
        Some(&admin_token),
    )
    .await;

    let res = app.get("/notifications/", Some(&admin_token)).await;
    let list = res.value();
    assert_eq!(list.as_array().unwrap().len(), 2);
    assert_eq!(list[0]["message"], "Later");

    let res = app
        .post_json(
            "/notifications/",
            &json!({"message": "  ", "broadcast_on": "2030-01-01T09:00:00Z"}),
            Some(&admin_token),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn http_error_fails_synchronously() {
    let app = TestApp::new();
    let res = app.get("/tasks/http_error/", None).await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn demo_tasks_report_outcomes() {
    let app = TestApp::new();
    assert_eq!(app.get("/tasks/", None).await.status, StatusCode::OK);

    let res = app.get("/tasks/http/", None).await;
    let task_id = res.value()["task_ids"][0].as_str().unwrap().to_string();
    let report = app.wait_for_task(&task_id).await;
    assert_eq!(report.state, TaskStatus::Success);
    assert!(report.result.unwrap().as_u64().unwrap() < 1000);

    let res = app.get("/tasks/ws_error/", None).await;
    let task_id = res.value()["task_ids"][0].as_str().unwrap().to_string();
    let report = app.wait_for_task(&task_id).await;
    assert_eq!(report.state, TaskStatus::Failure);
    assert_eq!(report.success, Some(false));
    assert!(report.result.unwrap().as_str().unwrap().contains("StopIteration"));

    let res = app.get("/ws_view/", None).await;
    assert_eq!(res.value()["task_ids"].as_array().unwrap().len(), 1);
}
