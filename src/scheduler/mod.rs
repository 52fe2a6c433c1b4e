//! Scheduler loop: turns persisted task definitions into admitted work.
//!
//! The loop polls the task store on a fixed interval, re-validates each due
//! task, and requests admission from the [`GroupQueue`]; it never runs a
//! task directly, so all concurrency decisions stay in one place.

pub mod runner;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::SchedulerConfig;
use crate::container::AgentRunner;
use crate::error::Result;
use crate::queue::GroupQueue;
use crate::registry::{GroupRegistry, MessageSender};
use crate::store::{TaskStatus, TaskStore};

/// Everything the scheduler and task runner need, bundled for injection.
pub struct SchedulerDeps {
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<GroupQueue>,
    pub runner: Arc<dyn AgentRunner>,
    pub registry: Arc<dyn GroupRegistry>,
    /// Outbound capability for collaborators; the core never sends.
    pub sender: Arc<dyn MessageSender>,
    pub config: SchedulerConfig,
}

/// Polls for due tasks and routes them into the admission queue.
pub struct Scheduler {
    deps: Arc<SchedulerDeps>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps) -> Arc<Self> {
        Arc::new(Self {
            deps: Arc::new(deps),
            running: AtomicBool::new(false),
        })
    }

    /// Start the polling loop. Idempotent: returns `false` (and does
    /// nothing) if the loop is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("scheduler loop already running, skipping duplicate start");
            return false;
        }
        tracing::info!(
            poll_interval_ms = self.deps.config.poll_interval.as_millis() as u64,
            "scheduler loop started"
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(err) = scheduler.poll_once().await {
                    tracing::error!(%err, "error in scheduler loop");
                }
                tokio::time::sleep(scheduler.deps.config.poll_interval).await;
            }
        });
        true
    }

    /// One loop iteration: enqueue every task that is due and still active.
    pub async fn poll_once(&self) -> Result<()> {
        let due = self.deps.store.get_due_tasks().await?;
        if !due.is_empty() {
            tracing::info!(count = due.len(), "found due tasks");
        }

        for task in due {
            // Re-check status: the task may have been paused or deleted
            // between the due query and now.
            let Some(current) = self.deps.store.get_task_by_id(&task.id).await? else {
                continue;
            };
            if current.status != TaskStatus::Active {
                continue;
            }

            let deps = Arc::clone(&self.deps);
            let chat_id = current.chat_id.clone();
            let task_id = current.id.clone();
            self.deps.queue.enqueue_task(
                &chat_id,
                &task_id,
                Box::pin(async move { runner::run_task(current, deps).await }),
            );
        }
        Ok(())
    }
}
