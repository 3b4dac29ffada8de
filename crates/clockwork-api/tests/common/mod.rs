#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;

use clockwork_api::state::{AppState, AppStateInner, Settings};
use clockwork_db::Database;
use clockwork_gateway::dispatcher::Dispatcher;
use clockwork_types::tasks::ProgressReport;
use clockwork_worker::TaskContext;
use clockwork_worker::mail::{Mailer, Outbox};
use clockwork_worker::queue::TaskQueue;

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    pub state: AppState,
    pub outbox: Outbox,
}

impl TestApp {
    pub fn new() -> Self {
        let outbox = Outbox::new();
        let db = Arc::new(Database::open_in_memory().expect("in-memory database"));
        let dispatcher = Dispatcher::new();
        let mailer = Mailer::Memory(outbox.clone());
        let from_email = "noreply@clockwork.local".to_string();

        let queue = TaskQueue::start(
            TaskContext {
                db: db.clone(),
                mailer: mailer.clone(),
                dispatcher: dispatcher.clone(),
                from_email: from_email.clone(),
                step_delay: Duration::from_millis(1),
            },
            2,
        );

        let state = Arc::new(AppStateInner {
            db,
            queue,
            dispatcher,
            mailer,
            settings: Settings {
                secret: SECRET.into(),
                base_url: "http://testserver".into(),
                from_email,
                password_reset_timeout: Duration::from_secs(259_200),
            },
        });
        Self { state, outbox }
    }

    pub fn router(&self) -> Router {
        clockwork_api::router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        TestResponse {
            status,
            headers,
            body: bytes.to_vec(),
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).expect("request")).await
    }

    pub async fn post_json<T: Serialize>(&self, uri: &str, body: &T, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = serde_json::to_string(body).expect("json body");
        self.send(builder.body(Body::from(body)).expect("request")).await
    }

    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> TestResponse {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, form_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("request");
        self.send(request).await
    }

    /// Poll the progress endpoint until the task completes.
    pub async fn wait_for_task(&self, task_id: &str) -> ProgressReport {
        for _ in 0..500 {
            let report: ProgressReport = self.get(&format!("/celery-progress/{}/", task_id), None).await.json();
            if report.complete {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not complete", task_id);
    }
}

fn form_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            b' ' => "+".to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("JSON body")
    }

    pub fn value(&self) -> Value {
        self.json()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
