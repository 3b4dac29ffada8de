use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

/// A single outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Where mail goes. Selected once at startup from `EMAIL_BACKEND`.
#[derive(Clone)]
pub enum Mailer {
    /// JSON email API (Postmark-compatible)
    Http(HttpMailer),
    /// Kept in memory; tests read it back
    Memory(Outbox),
    /// Logged and dropped
    Console,
}

impl Mailer {
    pub async fn send(&self, message: &EmailMessage) -> Result<()> {
        match self {
            Self::Http(http) => http.send(message).await,
            Self::Memory(outbox) => {
                outbox.push(message.clone());
                Ok(())
            }
            Self::Console => {
                info!(
                    from = %message.from,
                    to = %message.to,
                    subject = %message.subject,
                    "email:\n{}",
                    message.body
                );
                Ok(())
            }
        }
    }

    /// Send one message per recipient. Returns how many were delivered.
    ///
    /// With `fail_silently` a failed recipient is logged and skipped; without it
    /// the first failure is returned.
    pub async fn send_mail(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        recipients: &[String],
        fail_silently: bool,
    ) -> Result<usize> {
        let mut delivered = 0;
        for to in recipients {
            let message = EmailMessage {
                from: from.to_string(),
                to: to.clone(),
                subject: subject.to_string(),
                body: body.to_string(),
            };
            match self.send(&message).await {
                Ok(()) => delivered += 1,
                Err(e) if fail_silently => {
                    warn!(error.cause_chain = ?e, "failed to send mail to {}", to);
                }
                Err(e) => return Err(e.context(format!("failed to send mail to {}", to))),
            }
        }
        Ok(delivered)
    }
}

/// Client for an HTTP email API.
#[derive(Clone)]
pub struct HttpMailer {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
}

impl HttpMailer {
    pub fn new(base_url: String, token: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build email HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let url = format!("{}/email", self.base_url);
        let body = SendEmailRequest {
            from: &message.from,
            to: &message.to,
            subject: &message.subject,
            text_body: &message.body,
        };
        self.http
            .post(&url)
            .header("X-Postmark-Server-Token", &self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("email API unreachable at {}", url))?
            .error_for_status()
            .context("email API rejected the message")?;
        Ok(())
    }
}

/// In-memory mailbox shared by every clone.
#[derive(Clone, Default)]
pub struct Outbox {
    messages: Arc<Mutex<Vec<EmailMessage>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: EmailMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }

    pub fn messages(&self) -> Vec<EmailMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}
