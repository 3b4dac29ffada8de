use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use clockwork_gateway::dispatcher::Dispatcher;
use clockwork_types::events::GatewayEvent;
use clockwork_types::tasks::{ProgressInfo, ProgressReport, TaskStatus};

use crate::TaskContext;
use crate::progress::ProgressRecorder;
use crate::tasks::Task;

/// Stored state of one task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub name: &'static str,
    pub status: TaskStatus,
    pub progress: ProgressInfo,
    pub result: Option<Value>,
    /// Publish state changes to the task's channel-layer group
    pub websocket: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn report(&self) -> ProgressReport {
        let complete = self.status.is_complete();
        ProgressReport {
            state: self.status,
            complete,
            success: complete.then_some(self.status == TaskStatus::Success),
            progress: if complete { ProgressInfo::finished() } else { self.progress.clone() },
            result: self.result.clone(),
        }
    }
}

struct Job {
    id: Uuid,
    task: Task,
}

/// In-process task queue with a fixed pool of workers.
///
/// Tasks run in arrival order per worker; across workers there is no ordering.
/// A failed task is recorded and logged, never retried.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tx: mpsc::UnboundedSender<Job>,
    records: RwLock<HashMap<Uuid, TaskRecord>>,
    dispatcher: Dispatcher,
}

impl TaskQueue {
    /// Create the queue and spawn `workers` worker tasks on the current runtime.
    pub fn start(ctx: TaskContext, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            inner: Arc::new(QueueInner {
                tx,
                records: RwLock::new(HashMap::new()),
                dispatcher: ctx.dispatcher.clone(),
            }),
        };

        let rx = Arc::new(Mutex::new(rx));
        let workers = workers.max(1);
        for worker_id in 0..workers {
            tokio::spawn(run_worker(worker_id, queue.clone(), ctx.clone(), rx.clone()));
        }
        info!("task queue started with {} workers", workers);

        queue
    }

    /// Queue a task. Returns its id immediately; the task starts `PENDING`.
    pub async fn enqueue(&self, task: Task) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let record = TaskRecord {
            name: task.name(),
            status: TaskStatus::Pending,
            progress: ProgressInfo::pending(),
            result: None,
            websocket: task.reports_over_websocket(),
            finished_at: None,
        };
        self.inner.records.write().await.insert(id, record);

        debug!("enqueue {} ({})", task.name(), id);
        if self.inner.tx.send(Job { id, task }).is_err() {
            self.inner.records.write().await.remove(&id);
            anyhow::bail!("task queue is shut down");
        }
        Ok(id)
    }

    pub async fn record(&self, id: Uuid) -> Option<TaskRecord> {
        self.inner.records.read().await.get(&id).cloned()
    }

    /// Progress report for a task. Unknown ids report as pending.
    pub async fn report(&self, id: Uuid) -> ProgressReport {
        match self.record(id).await {
            Some(record) => record.report(),
            None => ProgressReport {
                state: TaskStatus::Pending,
                complete: false,
                success: None,
                progress: ProgressInfo::pending(),
                result: None,
            },
        }
    }

    pub(crate) async fn set_progress(&self, id: Uuid, progress: ProgressInfo) {
        self.update(id, |record| {
            record.status = TaskStatus::Progress;
            record.progress = progress;
        })
        .await;
    }

    async fn finish(&self, id: Uuid, outcome: Result<Value, String>) {
        self.update(id, |record| {
            record.finished_at = Some(Utc::now());
            match outcome {
                Ok(value) => {
                    record.status = TaskStatus::Success;
                    record.result = Some(value);
                }
                Err(message) => {
                    record.status = TaskStatus::Failure;
                    record.result = Some(Value::String(message));
                }
            }
        })
        .await;
    }

    /// Apply a change to a record, then publish the new state if the task
    /// reports over WebSocket.
    async fn update<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut TaskRecord),
    {
        let published = {
            let mut records = self.inner.records.write().await;
            let Some(record) = records.get_mut(&id) else {
                warn!("state change for unknown task {}", id);
                return;
            };
            f(record);
            record.websocket.then(|| record.report())
        };

        if let Some(report) = published {
            self.inner
                .dispatcher
                .group_send(&id.to_string(), GatewayEvent::UpdateTaskProgress(report))
                .await;
        }
    }

    /// Drop finished records older than `before`. Returns how many were removed.
    pub async fn prune_finished(&self, before: DateTime<Utc>) -> usize {
        let mut records = self.inner.records.write().await;
        let len = records.len();
        records.retain(|_, r| r.finished_at.is_none_or(|at| at >= before));
        len - records.len()
    }
}

async fn run_worker(
    worker_id: usize,
    queue: TaskQueue,
    ctx: TaskContext,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(Job { id, task }) = job else {
            break;
        };

        let name = task.name();
        debug!("worker {} running {} ({})", worker_id, name, id);

        // Run in its own task so a panicking body fails the task, not the worker
        let recorder = ProgressRecorder::new(queue.clone(), id);
        let body_ctx = ctx.clone();
        let outcome = tokio::spawn(async move { task.run(&body_ctx, &recorder).await }).await;

        let outcome = match outcome {
            Ok(Ok(value)) => {
                info!("task {} ({}) succeeded", name, id);
                Ok(value)
            }
            Ok(Err(e)) => {
                error!(error.cause_chain = ?e, error.message = %e, "task {} ({}) failed", name, id);
                Err(format!("{:#}", e))
            }
            Err(e) => {
                error!(error.message = %e, "task {} ({}) panicked", name, id);
                Err("task panicked".to_string())
            }
        };
        queue.finish(id, outcome).await;
    }
    debug!("worker {} stopped", worker_id);
}
