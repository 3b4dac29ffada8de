//! Database row types. Timestamps are stored as RFC 3339 text and ids as text;
//! conversion into the `clockwork-types` models happens here so the API layer
//! never sees raw rows.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use clockwork_types::models::{Account, BroadcastNotification, CrontabSchedule, PeriodicTask};

pub struct AccountRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: String,
    pub last_login: Option<String>,
}

impl TryFrom<AccountRow> for Account {
    type Error = anyhow::Error;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            id: Uuid::parse_str(&row.id).with_context(|| format!("corrupt account id '{}'", row.id))?,
            email: row.email,
            username: row.username,
            password: row.password,
            is_active: row.is_active,
            is_admin: row.is_admin,
            is_staff: row.is_staff,
            is_superuser: row.is_superuser,
            date_joined: parse_timestamp(&row.date_joined)?,
            last_login: row.last_login.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

pub struct NotificationRow {
    pub id: i64,
    pub message: String,
    pub broadcast_on: String,
    pub sent: bool,
    pub created_at: String,
}

impl TryFrom<NotificationRow> for BroadcastNotification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(BroadcastNotification {
            id: row.id,
            message: row.message,
            broadcast_on: parse_timestamp(&row.broadcast_on)?,
            sent: row.sent,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

pub struct PeriodicTaskRow {
    pub id: i64,
    pub name: String,
    pub task: String,
    pub args: String,
    pub crontab: CrontabSchedule,
    pub enabled: bool,
    pub last_run_at: Option<String>,
    pub total_run_count: i64,
}

impl TryFrom<PeriodicTaskRow> for PeriodicTask {
    type Error = anyhow::Error;

    fn try_from(row: PeriodicTaskRow) -> Result<Self> {
        Ok(PeriodicTask {
            id: row.id,
            args: serde_json::from_str(&row.args)
                .with_context(|| format!("corrupt args on periodic task '{}'", row.name))?,
            name: row.name,
            task: row.task,
            crontab: row.crontab,
            enabled: row.enabled,
            last_run_at: row.last_run_at.as_deref().map(parse_timestamp).transpose()?,
            total_run_count: row.total_run_count,
        })
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Accepts RFC 3339 as written by this crate, and SQLite's own
/// `YYYY-MM-DD HH:MM:SS` (naive UTC) for rows written by hand.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .with_context(|| format!("corrupt timestamp '{}'", s))
}
