use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use clockwork_types::events::{GatewayEvent, NOTIFICATION_BROADCAST_GROUP};

use crate::TaskContext;
use crate::progress::ProgressRecorder;

pub const SEND_MAIL_TO_ALL_SUBJECT: &str = "Hi! Celery Testing";
pub const SEND_MAIL_TO_ALL_BODY: &str =
    "You have received this email as a test message from CLOCK WORK Reminder & Notes";

/// Recipients and text of a mail-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailJob {
    pub emails: Vec<String>,
    pub headline: String,
    pub content: String,
}

/// Every task the queue knows how to run. Serialized as
/// `{"task": name, "args": {...}}`; periodic tasks store the two halves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum Task {
    /// Fixed test message to every active account
    SendMailToAll,
    /// One mail per recipient, progress polled over HTTP
    SendMail(MailJob),
    /// One mail per recipient, progress pushed over WebSocket
    WebSocketSendMail(MailJob),
    /// One mail per recipient, then a notice to the broadcast group
    SendMailWithSchedule(MailJob),
    BroadcastNotification { notification_id: i64 },
    TestFunc,
    HttpTask { number: u32 },
    HttpErrorTask,
    WsTask { number: u32 },
    WsErrorTask,
}

impl Task {
    /// Rebuild a task from its registered name and JSON arguments.
    pub fn from_parts(name: &str, args: Value) -> Result<Self> {
        let value = if args.is_null() {
            json!({ "task": name })
        } else {
            json!({ "task": name, "args": args })
        };
        serde_json::from_value(value).with_context(|| format!("unknown task or bad arguments for '{}'", name))
    }

    /// Registered name and JSON arguments, the inverse of [`Task::from_parts`].
    pub fn into_parts(self) -> Result<(&'static str, Value)> {
        let name = self.name();
        let mut value = serde_json::to_value(&self)?;
        let args = value.get_mut("args").map(Value::take).unwrap_or(Value::Null);
        Ok((name, args))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMailToAll => "send_mail_to_all",
            Self::SendMail(_) => "send_mail",
            Self::WebSocketSendMail(_) => "web_socket_send_mail",
            Self::SendMailWithSchedule(_) => "send_mail_with_schedule",
            Self::BroadcastNotification { .. } => "broadcast_notification",
            Self::TestFunc => "test_func",
            Self::HttpTask { .. } => "http_task",
            Self::HttpErrorTask => "http_error_task",
            Self::WsTask { .. } => "ws_task",
            Self::WsErrorTask => "ws_error_task",
        }
    }

    pub fn reports_over_websocket(&self) -> bool {
        matches!(self, Self::WebSocketSendMail(_) | Self::WsTask { .. } | Self::WsErrorTask)
    }

    pub async fn run(self, ctx: &TaskContext, progress: &ProgressRecorder) -> Result<Value> {
        match self {
            Self::SendMailToAll => send_mail_to_all(ctx).await,
            Self::SendMail(job) | Self::WebSocketSendMail(job) => send_mail_with_progress(ctx, progress, job).await,
            Self::SendMailWithSchedule(job) => send_mail_and_notify(ctx, job).await,
            Self::BroadcastNotification { notification_id } => broadcast_notification(ctx, notification_id).await,
            Self::TestFunc => {
                for i in 0..10 {
                    info!("test_func tick {}", i);
                }
                Ok(json!("Done"))
            }
            Self::HttpTask { number } | Self::WsTask { number } => count(ctx, progress, number).await,
            Self::HttpErrorTask | Self::WsErrorTask => count_then_fail(ctx, progress).await,
        }
    }
}

async fn send_mail_to_all(ctx: &TaskContext) -> Result<Value> {
    let db = ctx.db.clone();
    let emails = tokio::task::spawn_blocking(move || db.list_active_emails()).await??;

    let sent = ctx
        .mailer
        .send_mail(SEND_MAIL_TO_ALL_SUBJECT, SEND_MAIL_TO_ALL_BODY, &ctx.from_email, &emails, true)
        .await?;
    info!("send_mail_to_all: {} of {} delivered", sent, emails.len());
    Ok(json!("Done"))
}

async fn send_mail_with_progress(ctx: &TaskContext, progress: &ProgressRecorder, job: MailJob) -> Result<Value> {
    let total = job.emails.len() as u64;
    for (i, email) in job.emails.iter().enumerate() {
        ctx.mailer
            .send_mail(&job.headline, &job.content, &ctx.from_email, std::slice::from_ref(email), true)
            .await?;
        progress
            .set_progress(i as u64 + 1, total, Some(format!("Sending Notes to {}", email)))
            .await;
    }
    Ok(json!("Done"))
}

async fn send_mail_and_notify(ctx: &TaskContext, job: MailJob) -> Result<Value> {
    ctx.mailer
        .send_mail(&job.headline, &job.content, &ctx.from_email, &job.emails, true)
        .await?;

    let message = format!("Mail send to [{}] with headline {}", job.emails.join(", "), job.headline);
    ctx.dispatcher
        .group_send(NOTIFICATION_BROADCAST_GROUP, GatewayEvent::SendNotification { message })
        .await;
    Ok(json!("Done"))
}

async fn broadcast_notification(ctx: &TaskContext, notification_id: i64) -> Result<Value> {
    let db = ctx.db.clone();
    let notification = tokio::task::spawn_blocking(move || db.get_notification(notification_id))
        .await??
        .ok_or_else(|| anyhow!("Not Found"))?;

    if notification.sent {
        return Ok(json!("Already sent"));
    }

    let reached = ctx
        .dispatcher
        .group_send(
            NOTIFICATION_BROADCAST_GROUP,
            GatewayEvent::SendNotification {
                message: notification.message,
            },
        )
        .await;

    let db = ctx.db.clone();
    tokio::task::spawn_blocking(move || db.mark_notification_sent(notification_id)).await??;
    info!("notification {} broadcast to {} clients", notification_id, reached);
    Ok(json!("Done"))
}

async fn count(ctx: &TaskContext, progress: &ProgressRecorder, number: u32) -> Result<Value> {
    let total = u64::from(number);
    for i in 0..total {
        tokio::time::sleep(ctx.step_delay).await;
        progress.set_progress(i + 1, total, None).await;
    }
    Ok(json!(rand::random_range(0..1000u32)))
}

async fn count_then_fail(ctx: &TaskContext, progress: &ProgressRecorder) -> Result<Value> {
    const STEPS: u64 = 5;
    let mut steps = 0..STEPS;
    for i in steps.by_ref() {
        tokio::time::sleep(ctx.step_delay).await;
        progress.set_progress(i + 1, STEPS * 2, None).await;
    }
    // The demo's failure: pulling from an iterator that has run dry
    let next = steps.next().context("StopIteration: no more steps to run")?;
    Ok(json!(next))
}
