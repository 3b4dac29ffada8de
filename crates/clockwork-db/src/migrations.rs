use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("running migration v1 (accounts, notifications, beat)");
        conn.execute_batch(
            "
            CREATE TABLE accounts (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                username      TEXT NOT NULL UNIQUE,
                password      TEXT NOT NULL,
                is_active     INTEGER NOT NULL DEFAULT 0,
                is_admin      INTEGER NOT NULL DEFAULT 0,
                is_staff      INTEGER NOT NULL DEFAULT 0,
                is_superuser  INTEGER NOT NULL DEFAULT 0,
                date_joined   TEXT NOT NULL,
                last_login    TEXT
            );

            CREATE TABLE broadcast_notifications (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                message       TEXT NOT NULL,
                broadcast_on  TEXT NOT NULL,
                sent          INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_due
                ON broadcast_notifications(sent, broadcast_on);

            CREATE TABLE crontab_schedules (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                minute         TEXT NOT NULL DEFAULT '*',
                hour           TEXT NOT NULL DEFAULT '*',
                day_of_week    TEXT NOT NULL DEFAULT '*',
                day_of_month   TEXT NOT NULL DEFAULT '*',
                month_of_year  TEXT NOT NULL DEFAULT '*',
                UNIQUE(minute, hour, day_of_week, day_of_month, month_of_year)
            );

            CREATE TABLE periodic_tasks (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                name             TEXT NOT NULL UNIQUE,
                task             TEXT NOT NULL,
                args             TEXT NOT NULL DEFAULT 'null',
                crontab_id       INTEGER NOT NULL REFERENCES crontab_schedules(id),
                enabled          INTEGER NOT NULL DEFAULT 1,
                last_run_at      TEXT,
                total_run_count  INTEGER NOT NULL DEFAULT 0
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
