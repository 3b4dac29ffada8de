use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use clockwork_db::Database;

use crate::cron::Crontab;
use crate::queue::TaskQueue;
use crate::tasks::Task;

/// How long finished task results stay queryable.
const RESULT_TTL: chrono::Duration = chrono::Duration::days(1);

/// What one tick put on the queue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub notifications: usize,
    pub periodic: usize,
}

/// Turns due notifications and matching crontabs into queued tasks.
pub struct Beat {
    db: Arc<Database>,
    queue: TaskQueue,
    /// Notifications already handed to the queue but not yet marked sent
    in_flight: HashSet<i64>,
}

impl Beat {
    pub fn new(db: Arc<Database>, queue: TaskQueue) -> Self {
        Self {
            db,
            queue,
            in_flight: HashSet::new(),
        }
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> anyhow::Result<TickSummary> {
        let mut summary = TickSummary::default();

        let db = self.db.clone();
        let due = tokio::task::spawn_blocking(move || db.due_unsent_notifications(now)).await??;

        // Forget ids that were sent (or deleted) since the last tick
        self.in_flight.retain(|id| due.iter().any(|n| n.id == *id));

        for notification in due {
            if !self.in_flight.insert(notification.id) {
                continue;
            }
            self.queue
                .enqueue(Task::BroadcastNotification {
                    notification_id: notification.id,
                })
                .await?;
            summary.notifications += 1;
        }

        let db = self.db.clone();
        let periodic = tokio::task::spawn_blocking(move || db.enabled_periodic_tasks()).await??;

        for entry in periodic {
            let cron = match Crontab::from_schedule(&entry.crontab) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!("periodic task '{}' has a bad schedule: {}", entry.name, e);
                    continue;
                }
            };
            if !cron.is_due(entry.last_run_at, now) {
                continue;
            }
            let task = match Task::from_parts(&entry.task, entry.args.clone()) {
                Ok(task) => task,
                Err(e) => {
                    warn!("periodic task '{}': {:#}", entry.name, e);
                    continue;
                }
            };

            let id = self.queue.enqueue(task).await?;
            let db = self.db.clone();
            tokio::task::spawn_blocking(move || db.record_periodic_run(entry.id, now)).await??;
            debug!("periodic task '{}' queued as {}", entry.name, id);
            summary.periodic += 1;
        }

        let pruned = self.queue.prune_finished(now - RESULT_TTL).await;
        if pruned > 0 {
            debug!("pruned {} finished task results", pruned);
        }

        Ok(summary)
    }
}

/// Background loop driving [`Beat::tick`] every `interval`.
pub async fn run_beat_loop(db: Arc<Database>, queue: TaskQueue, interval: Duration) {
    let mut beat = Beat::new(db, queue);
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match beat.tick(Utc::now()).await {
            Ok(summary) => {
                if summary != TickSummary::default() {
                    info!(
                        "Beat: queued {} notifications, {} periodic tasks",
                        summary.notifications, summary.periodic
                    );
                }
            }
            Err(e) => {
                warn!("Beat error: {:#}", e);
            }
        }
    }
}
