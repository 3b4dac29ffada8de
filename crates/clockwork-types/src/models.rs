use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user. Identified by email; the password is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Account {
    /// Admins hold every permission.
    pub fn has_perm(&self, _perm: &str) -> bool {
        self.is_admin
    }

    pub fn has_module_perms(&self, _app_label: &str) -> bool {
        true
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.email)
    }
}

/// A message relayed to every client of the broadcast group once `broadcast_on` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastNotification {
    pub id: i64,
    pub message: String,
    pub broadcast_on: DateTime<Utc>,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrontabSchedule {
    pub id: i64,
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
    pub day_of_month: String,
    pub month_of_year: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicTask {
    pub id: i64,
    pub name: String,
    pub task: String,
    pub args: serde_json::Value,
    pub crontab: CrontabSchedule,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(is_admin: bool) -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "test@example.com".into(),
            username: "testuser".into(),
            password: String::new(),
            is_active: true,
            is_admin,
            is_staff: false,
            is_superuser: false,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    #[test]
    fn test_permissions_follow_admin_flag() {
        assert!(account(true).has_perm("any_permission"));
        assert!(!account(false).has_perm("any_permission"));
        assert!(account(false).has_module_perms("any_app"));
    }

    #[test]
    fn test_display_uses_email() {
        assert_eq!(account(false).to_string(), "test@example.com");
    }

    #[test]
    fn test_password_not_serialized() {
        let mut a = account(false);
        a.password = "secret-hash".into();
        let json = serde_json::to_string(&a).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
