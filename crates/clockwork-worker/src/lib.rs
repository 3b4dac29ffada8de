//! Background work: the task queue and its workers, progress reporting, mail
//! backends, task bodies, and the beat scheduler that feeds the queue.

pub mod beat;
pub mod cron;
pub mod mail;
pub mod progress;
pub mod queue;
pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use clockwork_db::Database;
use clockwork_gateway::dispatcher::Dispatcher;

use crate::mail::Mailer;

/// Everything a task body may touch. Cheap to clone.
#[derive(Clone)]
pub struct TaskContext {
    pub db: Arc<Database>,
    pub mailer: Mailer,
    pub dispatcher: Dispatcher,
    /// Sender address for every outgoing mail
    pub from_email: String,
    /// Pause between steps of the demo counting tasks
    pub step_delay: Duration,
}
