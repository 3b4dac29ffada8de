use uuid::Uuid;

use clockwork_types::tasks::ProgressInfo;

use crate::queue::TaskQueue;

/// Handed to a running task so it can report how far along it is.
pub struct ProgressRecorder {
    queue: TaskQueue,
    task_id: Uuid,
}

impl ProgressRecorder {
    pub(crate) fn new(queue: TaskQueue, task_id: Uuid) -> Self {
        Self { queue, task_id }
    }

    /// Move the task to `PROGRESS` with `current` of `total` steps done.
    pub async fn set_progress(&self, current: u64, total: u64, description: Option<String>) {
        self.queue
            .set_progress(self.task_id, ProgressInfo::new(current, total, description))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Outbox;
    use crate::queue::tests::{insert_record, test_context};
    use clockwork_types::tasks::TaskStatus;

    #[tokio::test]
    async fn test_set_progress_updates_report() {
        // Recorded but never handed to a worker
        let queue = TaskQueue::start(test_context(&Outbox::new()), 1);
        let id = Uuid::new_v4();
        insert_record(&queue, id, false).await;
        let recorder = ProgressRecorder::new(queue.clone(), id);

        recorder.set_progress(1, 4, Some("Sending Notes to a@x.io".into())).await;
        let record = queue.record(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Progress);
        assert_eq!(record.progress.percent, 25.0);
        assert_eq!(record.progress.description.as_deref(), Some("Sending Notes to a@x.io"));
    }
}
