//! Persisted domain model for scheduled tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a task's next fire time is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Cron expression evaluated in the configured timezone.
    Cron,
    /// Fixed millisecond interval from the end of each run.
    Interval,
    /// Fires once; no next run is ever computed.
    Once,
}

/// Lifecycle status of a scheduled task. Only `Active` tasks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

/// Conversation context handed to the worker when a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Continue the group's current live session, if one exists.
    Group,
    /// Run with no session continuation.
    Isolated,
}

/// A persisted recurring (or one-shot) task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    /// Folder of the owning group under the groups directory.
    pub group_folder: String,
    /// Chat identifier the task is keyed by in the admission queue.
    pub chat_id: String,
    /// Prompt/payload handed to the worker.
    pub prompt: String,
    pub schedule_type: ScheduleType,
    /// Cron expression or millisecond count, stored as text; unused for
    /// `Once`.
    pub schedule_value: String,
    pub status: TaskStatus,
    pub context_mode: ContextMode,
    /// Next due time; `None` once a `Once` task has fired.
    pub next_run: Option<DateTime<Utc>>,
    /// Short summary of the last run's outcome.
    pub last_result: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a single task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

/// Append-only audit record for one task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunRecord {
    pub id: Uuid,
    pub task_id: String,
    pub run_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}
