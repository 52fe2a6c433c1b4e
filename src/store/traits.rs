//! The `TaskStore` trait: async persistence contract for the scheduler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::store::model::{ScheduledTask, TaskRunRecord};

/// Backend-agnostic store for scheduled tasks and run records.
///
/// The scheduler loop and task runner are the only consumers; they treat
/// every method as fallible and convert failures into log entries or
/// error run records rather than crashing.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks, regardless of status. Used to build the per-group
    /// snapshot a worker consults while running.
    async fn get_all_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError>;

    /// Tasks with `next_run <= now` and status `Active`.
    async fn get_due_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError>;

    /// Re-fetch a task by id; `None` if it was deleted.
    async fn get_task_by_id(&self, id: &str) -> Result<Option<ScheduledTask>, StoreError>;

    /// Append one run record to the audit trail.
    async fn log_task_run(&self, record: &TaskRunRecord) -> Result<(), StoreError>;

    /// Persist a task's next fire time and a short human-readable summary
    /// of its last run.
    async fn update_task_after_run(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
        last_result_summary: &str,
    ) -> Result<(), StoreError>;
}
