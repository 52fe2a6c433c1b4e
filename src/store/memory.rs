//! In-memory `TaskStore` backend.
//!
//! Suitable for tests and single-process embedders; the run-record trail
//! lives only as long as the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::model::{ScheduledTask, TaskRunRecord, TaskStatus};
use crate::store::traits::TaskStore;

/// In-memory task store backed by `tokio::sync::RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
    runs: RwLock<Vec<TaskRunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task definition.
    pub async fn upsert_task(&self, task: ScheduledTask) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Change a task's status in place. Returns `false` if the id is
    /// unknown.
    pub async fn set_task_status(&self, id: &str, status: TaskStatus) -> bool {
        match self.tasks.write().await.get_mut(id) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the recorded run history, oldest first.
    pub async fn runs(&self) -> Vec<TaskRunRecord> {
        self.runs.read().await.clone()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_all_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let mut tasks: Vec<ScheduledTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn get_due_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let now = Utc::now();
        let mut due: Vec<ScheduledTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == TaskStatus::Active)
            .filter(|t| t.next_run.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run.cmp(&b.next_run));
        Ok(due)
    }

    async fn get_task_by_id(&self, id: &str) -> Result<Option<ScheduledTask>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn log_task_run(&self, record: &TaskRunRecord) -> Result<(), StoreError> {
        self.runs.write().await.push(record.clone());
        Ok(())
    }

    async fn update_task_after_run(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
        last_result_summary: &str,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        task.next_run = next_run;
        task.last_result = Some(last_result_summary.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::model::{ContextMode, RunStatus, ScheduleType};

    fn task(id: &str, status: TaskStatus, next_run: Option<DateTime<Utc>>) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            group_folder: "family".to_string(),
            chat_id: "chat-1".to_string(),
            prompt: "check the calendar".to_string(),
            schedule_type: ScheduleType::Interval,
            schedule_value: "60000".to_string(),
            status,
            context_mode: ContextMode::Isolated,
            next_run,
            last_result: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn due_tasks_filter_by_status_and_time() {
        let store = MemoryStore::new();
        let past = Utc::now() - Duration::minutes(1);
        let future = Utc::now() + Duration::minutes(5);

        store.upsert_task(task("due", TaskStatus::Active, Some(past))).await;
        store
            .upsert_task(task("paused", TaskStatus::Paused, Some(past)))
            .await;
        store
            .upsert_task(task("later", TaskStatus::Active, Some(future)))
            .await;
        store.upsert_task(task("never", TaskStatus::Active, None)).await;

        let due = store.get_due_tasks().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "due");
    }

    #[tokio::test]
    async fn update_after_run_sets_next_run() {
        let store = MemoryStore::new();
        store
            .upsert_task(task("t", TaskStatus::Active, Some(Utc::now())))
            .await;

        let next = Utc::now() + Duration::minutes(10);
        store
            .update_task_after_run("t", Some(next), "Completed")
            .await
            .unwrap();
        let stored = store.get_task_by_id("t").await.unwrap().unwrap();
        assert_eq!(stored.next_run, Some(next));

        store.update_task_after_run("t", None, "Completed").await.unwrap();
        let stored = store.get_task_by_id("t").await.unwrap().unwrap();
        assert_eq!(stored.next_run, None);
    }

    #[tokio::test]
    async fn update_after_run_unknown_task_errors() {
        let store = MemoryStore::new();
        let result = store.update_task_after_run("ghost", None, "x").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn run_records_append() {
        let store = MemoryStore::new();
        for status in [RunStatus::Success, RunStatus::Error] {
            store
                .log_task_run(&TaskRunRecord {
                    id: uuid::Uuid::new_v4(),
                    task_id: "t".to_string(),
                    run_at: Utc::now(),
                    duration_ms: 12,
                    status,
                    result: None,
                    error: None,
                })
                .await
                .unwrap();
        }
        let runs = store.runs().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert_eq!(runs[1].status, RunStatus::Error);
    }
}
