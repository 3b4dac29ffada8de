use axum::{
    Form, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};

use clockwork_types::api::{ScheduleMailForm, ScheduleMailResponse, SendMailForm, SendMailResponse, TaskIdsResponse};
use clockwork_worker::cron::Crontab;
use clockwork_worker::tasks::{MailJob, Task};

use crate::error::ApiError;
use crate::state::AppState;

/// Schedule used when the form leaves the time out: 01:57 every day.
const DEFAULT_MINUTE: &str = "57";
const DEFAULT_HOUR: &str = "1";

pub async fn send_mail_to_all(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.queue.enqueue(Task::SendMailToAll).await?;
    Ok("Done")
}

pub async fn send_mail(State(state): State<AppState>, Form(form): Form<SendMailForm>) -> impl IntoResponse {
    queue_mail(&state, form, false).await
}

pub async fn websocket_send_mail(State(state): State<AppState>, Form(form): Form<SendMailForm>) -> impl IntoResponse {
    queue_mail(&state, form, true).await
}

async fn queue_mail(state: &AppState, form: SendMailForm, websocket: bool) -> (StatusCode, Json<SendMailResponse>) {
    let failed = || {
        (
            StatusCode::BAD_REQUEST,
            Json(SendMailResponse {
                status: "Failed".into(),
                message: "Notes Can't be Sent".into(),
                task_id: None,
            }),
        )
    };

    let emails = form.recipients();
    if emails.is_empty() {
        return failed();
    }
    let job = MailJob {
        emails,
        headline: form.headline.unwrap_or_default(),
        content: form.content.unwrap_or_default(),
    };
    let task = if websocket {
        Task::WebSocketSendMail(job)
    } else {
        Task::SendMail(job)
    };

    match state.queue.enqueue(task).await {
        Ok(task_id) => (
            StatusCode::OK,
            Json(SendMailResponse {
                status: "Success".into(),
                message: "Notes Send".into(),
                task_id: Some(task_id),
            }),
        ),
        Err(e) => {
            warn!(error.cause_chain = ?e, "could not queue mail");
            failed()
        }
    }
}

/// Store a periodic mail-out. The outcome is reported in the body's `status`.
pub async fn schedule_mail(State(state): State<AppState>, Form(form): Form<ScheduleMailForm>) -> Json<ScheduleMailResponse> {
    match create_schedule(&state, form).await {
        Ok(name) => {
            info!("scheduled {}", name);
            Json(ScheduleMailResponse {
                status: 200,
                message: "Reminder Scheduled".into(),
            })
        }
        Err(e) => {
            warn!(error.message = %e, "could not schedule mail");
            Json(ScheduleMailResponse {
                status: 400,
                message: "Reminder Can't be Scheduled".into(),
            })
        }
    }
}

async fn create_schedule(state: &AppState, form: ScheduleMailForm) -> Result<String, ApiError> {
    let minute = field_or(form.minute, DEFAULT_MINUTE);
    let hour = field_or(form.hour, DEFAULT_HOUR);
    Crontab::parse(&minute, &hour, "*", "*", "*").map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let emails: Vec<String> = form
        .emails
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let task = if emails.is_empty() {
        Task::SendMailToAll
    } else {
        Task::SendMailWithSchedule(MailJob {
            emails,
            headline: form.headline.unwrap_or_default(),
            content: form.content.unwrap_or_default(),
        })
    };
    let (task_name, args) = task.into_parts()?;

    state
        .db(move |db| {
            let (schedule, _) = db.get_or_create_crontab(&minute, &hour, "*", "*", "*")?;
            let periodic = db.create_numbered_periodic_task("schedule_mail_task_", task_name, &args, schedule.id)?;
            Ok(periodic.name)
        })
        .await
}

fn field_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Start the WebSocket-reported demo task used by the mail page.
pub async fn ws_view(State(state): State<AppState>) -> Result<Json<TaskIdsResponse>, ApiError> {
    let task_id = state.queue.enqueue(Task::WsTask { number: 100 }).await?;
    Ok(Json(TaskIdsResponse { task_ids: vec![task_id] }))
}
