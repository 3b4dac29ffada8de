use crate::models::{AccountRow, NotificationRow, PeriodicTaskRow, format_timestamp};
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use clockwork_types::models::{Account, BroadcastNotification, CrontabSchedule, PeriodicTask};

const ACCOUNT_COLUMNS: &str = "id, email, username, password, is_active, is_admin, is_staff, \
                               is_superuser, date_joined, last_login";

const PERIODIC_TASK_SELECT: &str = "SELECT p.id, p.name, p.task, p.args, p.enabled, p.last_run_at, \
     p.total_run_count, c.id, c.minute, c.hour, c.day_of_week, c.day_of_month, c.month_of_year
     FROM periodic_tasks p JOIN crontab_schedules c ON p.crontab_id = c.id";

/// Fields of an account that does not exist yet. The password is already hashed.
pub struct NewAccount<'a> {
    pub id: Uuid,
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub is_active: bool,
    pub is_admin: bool,
}

impl Database {
    // -- Accounts --

    pub fn insert_account(&self, new: &NewAccount<'_>) -> Result<Account> {
        let id = new.id.to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, email, username, password, is_active, is_admin, is_staff, is_superuser, date_joined)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6, ?7)",
                rusqlite::params![
                    id,
                    new.email,
                    new.username,
                    new.password_hash,
                    new.is_active,
                    new.is_admin,
                    format_timestamp(Utc::now()),
                ],
            )?;
            query_account(conn, "id", &id)?
                .ok_or_else(|| anyhow::anyhow!("account {} vanished after insert", id))
        })
    }

    pub fn get_account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        self.with_conn(|conn| query_account(conn, "id", &id.to_string()))
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| query_account(conn, "email", email))
    }

    pub fn get_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| query_account(conn, "username", username))
    }

    /// True if another account (not `exclude`) already uses this email.
    pub fn email_taken(&self, email: &str, exclude: Option<Uuid>) -> Result<bool> {
        self.with_conn(|conn| column_taken(conn, "email", email, exclude))
    }

    pub fn username_taken(&self, username: &str, exclude: Option<Uuid>) -> Result<bool> {
        self.with_conn(|conn| column_taken(conn, "username", username, exclude))
    }

    pub fn set_account_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![active, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn set_account_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET password = ?1 WHERE id = ?2",
                rusqlite::params![password_hash, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn update_account_profile(&self, id: Uuid, email: &str, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET email = ?1, username = ?2 WHERE id = ?3",
                rusqlite::params![email, username, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET last_login = ?1 WHERE id = ?2",
                rusqlite::params![format_timestamp(at), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Recipients of the "mail everyone" task.
    pub fn list_active_emails(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT email FROM accounts WHERE is_active = 1 ORDER BY date_joined")?;
            let emails = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(emails)
        })
    }

    // -- Broadcast notifications --

    pub fn create_notification(
        &self,
        message: &str,
        broadcast_on: DateTime<Utc>,
    ) -> Result<BroadcastNotification> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO broadcast_notifications (message, broadcast_on, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![message, format_timestamp(broadcast_on), format_timestamp(Utc::now())],
            )?;
            let id = conn.last_insert_rowid();
            query_notification(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("notification {} vanished after insert", id))
        })
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<BroadcastNotification>> {
        self.with_conn(|conn| query_notification(conn, id))
    }

    /// All notifications, latest `broadcast_on` first.
    pub fn list_notifications(&self) -> Result<Vec<BroadcastNotification>> {
        self.with_conn(|conn| {
            query_notifications(
                conn,
                "SELECT id, message, broadcast_on, sent, created_at FROM broadcast_notifications
                 ORDER BY julianday(broadcast_on) DESC, id DESC",
                [],
            )
        })
    }

    /// Unsent notifications whose time has come, oldest first.
    pub fn due_unsent_notifications(&self, now: DateTime<Utc>) -> Result<Vec<BroadcastNotification>> {
        // Compared as julian days: rows may hold RFC 3339 or SQLite's `YYYY-MM-DD HH:MM:SS`,
        // which do not sort together as text.
        self.with_conn(|conn| {
            query_notifications(
                conn,
                "SELECT id, message, broadcast_on, sent, created_at FROM broadcast_notifications
                 WHERE sent = 0 AND julianday(broadcast_on) <= julianday(?1)
                 ORDER BY julianday(broadcast_on) ASC, id ASC",
                [format_timestamp(now)],
            )
        })
    }

    pub fn mark_notification_sent(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE broadcast_notifications SET sent = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Crontab schedules & periodic tasks --

    /// Returns the schedule and whether it was created by this call.
    pub fn get_or_create_crontab(
        &self,
        minute: &str,
        hour: &str,
        day_of_week: &str,
        day_of_month: &str,
        month_of_year: &str,
    ) -> Result<(CrontabSchedule, bool)> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO crontab_schedules (minute, hour, day_of_week, day_of_month, month_of_year)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (minute, hour, day_of_week, day_of_month, month_of_year),
            )?;
            let schedule = conn.query_row(
                "SELECT id, minute, hour, day_of_week, day_of_month, month_of_year FROM crontab_schedules
                 WHERE minute = ?1 AND hour = ?2 AND day_of_week = ?3 AND day_of_month = ?4 AND month_of_year = ?5",
                (minute, hour, day_of_week, day_of_month, month_of_year),
                |row| crontab_from_row(row, 0),
            )?;
            Ok((schedule, inserted > 0))
        })
    }

    pub fn create_periodic_task(
        &self,
        name: &str,
        task: &str,
        args: &serde_json::Value,
        crontab_id: i64,
    ) -> Result<PeriodicTask> {
        let args = serde_json::to_string(args)?;
        self.with_conn(|conn| insert_periodic_task(conn, name, task, &args, crontab_id))
    }

    /// Create a periodic task named `{prefix}{n}`, where `n` is the number of
    /// periodic tasks before this one. Counting and inserting share one lock,
    /// so concurrent callers get distinct names.
    pub fn create_numbered_periodic_task(
        &self,
        prefix: &str,
        task: &str,
        args: &serde_json::Value,
        crontab_id: i64,
    ) -> Result<PeriodicTask> {
        let args = serde_json::to_string(args)?;
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM periodic_tasks", [], |r| r.get(0))?;
            let name = format!("{}{}", prefix, count);
            insert_periodic_task(conn, &name, task, &args, crontab_id)
        })
    }

    pub fn count_periodic_tasks(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM periodic_tasks", [], |r| r.get(0))?)
        })
    }

    pub fn enabled_periodic_tasks(&self) -> Result<Vec<PeriodicTask>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE p.enabled = 1 ORDER BY p.id", PERIODIC_TASK_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], periodic_task_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(PeriodicTask::try_from).collect()
        })
    }

    pub fn record_periodic_run(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE periodic_tasks SET last_run_at = ?1, total_run_count = total_run_count + 1 WHERE id = ?2",
                rusqlite::params![format_timestamp(at), id],
            )?;
            Ok(())
        })
    }
}

fn insert_periodic_task(conn: &Connection, name: &str, task: &str, args: &str, crontab_id: i64) -> Result<PeriodicTask> {
    conn.execute(
        "INSERT INTO periodic_tasks (name, task, args, crontab_id) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![name, task, args, crontab_id],
    )?;
    let id = conn.last_insert_rowid();
    let sql = format!("{} WHERE p.id = ?1", PERIODIC_TASK_SELECT);
    let row = conn.query_row(&sql, [id], periodic_task_from_row)?;
    PeriodicTask::try_from(row)
}

fn query_account(conn: &Connection, column: &str, value: &str) -> Result<Option<Account>> {
    let sql = format!("SELECT {} FROM accounts WHERE {} = ?1", ACCOUNT_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(AccountRow {
                id: row.get(0)?,
                email: row.get(1)?,
                username: row.get(2)?,
                password: row.get(3)?,
                is_active: row.get(4)?,
                is_admin: row.get(5)?,
                is_staff: row.get(6)?,
                is_superuser: row.get(7)?,
                date_joined: row.get(8)?,
                last_login: row.get(9)?,
            })
        })
        .optional()?;

    row.map(Account::try_from).transpose()
}

fn column_taken(conn: &Connection, column: &str, value: &str, exclude: Option<Uuid>) -> Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM accounts WHERE {} = ?1 AND id != ?2", column);
    let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
    let count: i64 = conn.query_row(&sql, [value, exclude.as_str()], |r| r.get(0))?;
    Ok(count > 0)
}

fn query_notification(conn: &Connection, id: i64) -> Result<Option<BroadcastNotification>> {
    let mut rows = query_notifications(
        conn,
        "SELECT id, message, broadcast_on, sent, created_at FROM broadcast_notifications WHERE id = ?1",
        [id],
    )?;
    Ok(rows.pop())
}

fn query_notifications<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<BroadcastNotification>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(NotificationRow {
                id: row.get(0)?,
                message: row.get(1)?,
                broadcast_on: row.get(2)?,
                sent: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(BroadcastNotification::try_from).collect()
}

fn crontab_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<CrontabSchedule> {
    Ok(CrontabSchedule {
        id: row.get(offset)?,
        minute: row.get(offset + 1)?,
        hour: row.get(offset + 2)?,
        day_of_week: row.get(offset + 3)?,
        day_of_month: row.get(offset + 4)?,
        month_of_year: row.get(offset + 5)?,
    })
}

fn periodic_task_from_row(row: &Row<'_>) -> rusqlite::Result<PeriodicTaskRow> {
    Ok(PeriodicTaskRow {
        id: row.get(0)?,
        name: row.get(1)?,
        task: row.get(2)?,
        args: row.get(3)?,
        enabled: row.get(4)?,
        last_run_at: row.get(5)?,
        total_run_count: row.get(6)?,
        crontab: crontab_from_row(row, 7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_timestamp;
    use chrono::Duration;

    fn new_account<'a>(email: &'a str, username: &'a str) -> NewAccount<'a> {
        NewAccount {
            id: Uuid::new_v4(),
            email,
            username,
            password_hash: "hash",
            is_active: false,
            is_admin: false,
        }
    }

    #[test]
    fn test_account_roundtrip_and_uniqueness() {
        let db = Database::open_in_memory().unwrap();
        let account = db.insert_account(&new_account("test@example.com", "testuser")).unwrap();
        assert_eq!(account.email, "test@example.com");
        assert!(!account.is_active);

        // Same email under another username is rejected by the UNIQUE constraint
        let err = db.insert_account(&new_account("test@example.com", "testuser2")).unwrap_err();
        assert!(crate::is_constraint_violation(&err));
        assert!(!crate::is_constraint_violation(&anyhow::anyhow!("unrelated")));

        assert!(db.email_taken("test@example.com", None).unwrap());
        assert!(!db.email_taken("test@example.com", Some(account.id)).unwrap());
        assert!(db.username_taken("testuser", None).unwrap());

        db.set_account_active(account.id, true).unwrap();
        let reloaded = db.get_account_by_email("test@example.com").unwrap().unwrap();
        assert!(reloaded.is_active);
        assert_eq!(db.list_active_emails().unwrap(), vec!["test@example.com".to_string()]);
    }

    #[test]
    fn test_notifications_ordered_by_broadcast_on_desc() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let first = db.create_notification("first", now + Duration::hours(1)).unwrap();
        let second = db.create_notification("second", now + Duration::hours(2)).unwrap();
        assert!(!first.sent);

        let all = db.list_notifications().unwrap();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn test_due_unsent_notifications() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let past = db.create_notification("past", now - Duration::minutes(5)).unwrap();
        db.create_notification("future", now + Duration::minutes(5)).unwrap();

        let due = db.due_unsent_notifications(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, past.id);

        db.mark_notification_sent(past.id).unwrap();
        assert!(db.due_unsent_notifications(now).unwrap().is_empty());
    }

    #[test]
    fn test_hand_written_broadcast_time_is_compared_as_time() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO broadcast_notifications (message, broadcast_on, created_at)
                 VALUES ('manual', '2024-03-01 12:00:00', '2024-03-01 09:00:00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let morning = parse_timestamp("2024-03-01T08:00:00+00:00").unwrap();
        assert!(db.due_unsent_notifications(morning).unwrap().is_empty());

        let noon = parse_timestamp("2024-03-01T12:00:00.5+00:00").unwrap();
        let due = db.due_unsent_notifications(noon).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, "manual");
    }

    #[test]
    fn test_crontab_get_or_create_and_periodic_tasks() {
        let db = Database::open_in_memory().unwrap();
        let (schedule, created) = db.get_or_create_crontab("57", "1", "*", "*", "*").unwrap();
        assert!(created);
        let (again, created) = db.get_or_create_crontab("57", "1", "*", "*", "*").unwrap();
        assert!(!created);
        assert_eq!(schedule, again);

        let task = db
            .create_periodic_task("schedule_mail_task_0", "send_mail_to_all", &serde_json::Value::Null, schedule.id)
            .unwrap();
        assert_eq!(task.crontab.hour, "1");
        assert_eq!(db.count_periodic_tasks().unwrap(), 1);
        assert!(db.create_periodic_task("schedule_mail_task_0", "send_mail_to_all", &serde_json::Value::Null, schedule.id).is_err());

        let now = Utc::now();
        db.record_periodic_run(task.id, now).unwrap();
        let tasks = db.enabled_periodic_tasks().unwrap();
        assert_eq!(tasks[0].total_run_count, 1);
        assert!(tasks[0].last_run_at.is_some());
    }

    #[test]
    fn test_numbered_periodic_tasks_get_distinct_names() {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());
        let (schedule, _) = db.get_or_create_crontab("57", "1", "*", "*", "*").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.create_numbered_periodic_task("schedule_mail_task_", "send_mail_to_all", &serde_json::Value::Null, schedule.id)
                        .unwrap()
                        .name
                })
            })
            .collect();
        let mut names: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"schedule_mail_task_0".to_string()));
        assert!(names.contains(&"schedule_mail_task_7".to_string()));
    }
}
