use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Account;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the login/activation handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password1: String,
    pub password2: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountUpdateRequest {
    pub email: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPasswordRequest {
    pub new_password1: String,
    pub new_password2: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            email: a.email,
            username: a.username,
            is_active: a.is_active,
            is_admin: a.is_admin,
            date_joined: a.date_joined,
            last_login: a.last_login,
        }
    }
}

// -- Mail dispatch --

/// Form posted by the mail pages. `emails` is a space separated list.
#[derive(Debug, Deserialize)]
pub struct SendMailForm {
    pub headline: Option<String>,
    pub emails: Option<String>,
    pub content: Option<String>,
}

impl SendMailForm {
    /// Split the recipient field on whitespace, dropping empty entries.
    pub fn recipients(&self) -> Vec<String> {
        self.emails
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleMailForm {
    pub minute: Option<String>,
    pub hour: Option<String>,
    pub headline: Option<String>,
    pub emails: Option<String>,
    pub content: Option<String>,
}

/// Response shape of the AJAX mail endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMailResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleMailResponse {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskIdsResponse {
    pub task_ids: Vec<Uuid>,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNotificationRequest {
    pub message: String,
    pub broadcast_on: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HomeResponse {
    pub room_name: String,
}
