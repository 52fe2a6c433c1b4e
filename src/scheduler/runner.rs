//! Task runner: executes one admitted scheduled task end to end and
//! persists the outcome.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::container::{ProcessHandle, WorkerParams, WorkerStatus};
use crate::error::{Error, Result, WorkerError};
use crate::scheduler::SchedulerDeps;
use crate::store::{ContextMode, RunStatus, ScheduleType, ScheduledTask, TaskRunRecord};

/// Run a scheduled task: resolve its group, snapshot visible tasks, invoke
/// the worker, then persist a run record and the task's next fire time.
///
/// Operational failures (missing group, worker error) end up in the run
/// record; only store/schedule failures propagate, and the admission queue
/// logs those.
pub async fn run_task(task: ScheduledTask, deps: Arc<SchedulerDeps>) -> Result<()> {
    let started = Instant::now();
    let run_at = Utc::now();

    tracing::info!(task_id = %task.id, group = %task.group_folder, "running scheduled task");

    let group_dir = deps.config.groups_dir.join(&task.group_folder);
    std::fs::create_dir_all(&group_dir).map_err(WorkerError::from)?;

    let groups = deps.registry.registered_groups();
    let Some(group) = groups
        .values()
        .find(|g| g.folder == task.group_folder)
        .cloned()
    else {
        tracing::error!(
            task_id = %task.id,
            group_folder = %task.group_folder,
            "group not found for task"
        );
        deps.store
            .log_task_run(&TaskRunRecord {
                id: Uuid::new_v4(),
                task_id: task.id.clone(),
                run_at,
                duration_ms: started.elapsed().as_millis() as u64,
                status: RunStatus::Error,
                result: None,
                error: Some(format!("Group not found: {}", task.group_folder)),
            })
            .await?;
        return Ok(());
    };

    // Refresh the snapshot the worker reads, limited to its own group.
    let is_main = task.group_folder == deps.config.main_group_folder;
    let visible: Vec<ScheduledTask> = deps
        .store
        .get_all_tasks()
        .await?
        .into_iter()
        .filter(|t| t.group_folder == task.group_folder)
        .collect();
    deps.runner
        .write_tasks_snapshot(&task.group_folder, is_main, &visible)?;

    // Group context mode continues the group's live session, if any.
    let session_id = match task.context_mode {
        ContextMode::Group => deps.registry.sessions().get(&task.group_folder).cloned(),
        ContextMode::Isolated => None,
    };

    let params = WorkerParams {
        prompt: task.prompt.clone(),
        session_id,
        group_folder: task.group_folder.clone(),
        chat_id: task.chat_id.clone(),
        is_main,
    };

    let queue = Arc::clone(&deps.queue);
    let chat_id = task.chat_id.clone();
    let on_spawn = move |handle: Arc<dyn ProcessHandle>, container_name: Option<&str>| {
        queue.register_process(&chat_id, &handle, container_name);
    };

    let mut result: Option<String> = None;
    let mut error: Option<String> = None;
    match deps.runner.run_worker(&group, params, &on_spawn).await {
        Ok(output) => match output.status {
            WorkerStatus::Error => {
                error = Some(
                    output
                        .error
                        .unwrap_or_else(|| "Unknown error".to_string()),
                );
            }
            WorkerStatus::Success => {
                if let Some(worker_result) = output.result {
                    result = worker_result.user_message.or(worker_result.internal_log);
                }
            }
        },
        Err(err) => {
            error = Some(err.to_string());
            tracing::error!(task_id = %task.id, %err, "task failed");
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    if error.is_none() {
        tracing::info!(task_id = %task.id, duration_ms, "task completed");
    }

    deps.store
        .log_task_run(&TaskRunRecord {
            id: Uuid::new_v4(),
            task_id: task.id.clone(),
            run_at,
            duration_ms,
            status: if error.is_some() {
                RunStatus::Error
            } else {
                RunStatus::Success
            },
            result: result.clone(),
            error: error.clone(),
        })
        .await?;

    let next_run = next_run_after(&task, Utc::now(), deps.config.timezone)?;

    let summary = match (&error, &result) {
        (Some(e), _) => format!("Error: {e}"),
        (None, Some(r)) => truncate(r, 200),
        (None, None) => "Completed".to_string(),
    };
    deps.store
        .update_task_after_run(&task.id, next_run, &summary)
        .await?;

    Ok(())
}

/// Compute a task's next fire time after `now`.
///
/// `Once` tasks yield `None`; their status is left untouched, since
/// re-activation policy belongs to the store layer.
pub fn next_run_after(
    task: &ScheduledTask,
    now: DateTime<Utc>,
    timezone: Tz,
) -> Result<Option<DateTime<Utc>>> {
    match task.schedule_type {
        ScheduleType::Cron => {
            let schedule = parse_cron(&task.schedule_value)?;
            Ok(schedule
                .after(&now.with_timezone(&timezone))
                .next()
                .map(|at| at.with_timezone(&Utc)))
        }
        ScheduleType::Interval => {
            let ms: i64 = task.schedule_value.trim().parse().map_err(|e| {
                Error::Schedule(format!(
                    "invalid interval '{}': {e}",
                    task.schedule_value
                ))
            })?;
            Ok(Some(now + chrono::Duration::milliseconds(ms)))
        }
        ScheduleType::Once => Ok(None),
    }
}

/// Parse a cron expression. The `cron` crate wants a seconds field;
/// standard five-field expressions get one prepended.
fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| Error::Schedule(format!("invalid cron '{expr}': {e}")))
}

/// First `max` bytes of `s`, backed off to a char boundary.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
