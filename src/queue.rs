//! Admission queue for per-group worker containers.
//!
//! `GroupQueue` is the single decision point for whether a unit of work
//! runs now, waits, or is dropped (during shutdown). It enforces two
//! invariants: at most one active unit of work per group, and at most
//! `max_concurrent` active units globally. Freed slots drain the owning
//! group first (tasks before message checks), then the global FIFO of
//! groups that were blocked on the cap.
//!
//! Every mutation of queue state happens under one mutex, and the lock is
//! never held across an `.await`, so the whole admit-or-queue decision is a
//! single atomic step, and admitted work runs on supervised spawned tasks
//! that re-enter the queue only to settle.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::task::JoinError;

use crate::config::QueueConfig;
use crate::container::{ProcessHandle, stop_container};
use crate::error::Result;

/// Collaborator that drains a group's unread messages. Returns `Ok(true)`
/// on success; `Ok(false)` or `Err` triggers the backoff retry path.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, group_id: &str) -> Result<bool>;
}

/// Opaque unit of work admitted on behalf of a group.
pub type TaskFuture = BoxFuture<'static, Result<()>>;

struct QueuedTask {
    id: String,
    work: TaskFuture,
}

struct GroupState {
    active: bool,
    pending_message_check: bool,
    pending_tasks: VecDeque<QueuedTask>,
    /// The execution collaborator owns the process; the queue only
    /// signals it at shutdown.
    process: Option<Weak<dyn ProcessHandle>>,
    container_name: Option<String>,
    retry_count: u32,
}

impl GroupState {
    fn new() -> Self {
        Self {
            active: false,
            pending_message_check: false,
            pending_tasks: VecDeque::new(),
            process: None,
            container_name: None,
            retry_count: 0,
        }
    }
}

struct QueueInner {
    groups: HashMap<String, GroupState>,
    active_count: usize,
    waiting_groups: VecDeque<String>,
    processor: Option<Arc<dyn MessageProcessor>>,
    shutting_down: bool,
}

impl QueueInner {
    fn group_mut(&mut self, group_id: &str) -> &mut GroupState {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(GroupState::new)
    }

    fn push_waiting(&mut self, group_id: &str) {
        if !self.waiting_groups.iter().any(|g| g == group_id) {
            self.waiting_groups.push_back(group_id.to_string());
        }
    }
}

/// Per-group serialization plus a global concurrency cap.
pub struct GroupQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
}

impl GroupQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(QueueInner {
                groups: HashMap::new(),
                active_count: 0,
                waiting_groups: VecDeque::new(),
                processor: None,
                shutting_down: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // Work settles under this lock with pure state updates; a poisoned
        // lock still holds consistent state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the message-processing collaborator.
    pub fn set_message_processor(&self, processor: Arc<dyn MessageProcessor>) {
        self.lock().processor = Some(processor);
    }

    /// Signal that a group may have new messages worth processing.
    /// Coalesced: repeated calls while the group is busy collapse into a
    /// single pending check.
    pub fn enqueue_message_check(self: &Arc<Self>, group_id: &str) {
        let mut inner = self.lock();
        if inner.shutting_down {
            return;
        }

        let at_cap = inner.active_count >= self.config.max_concurrent;
        let state = inner.group_mut(group_id);

        if state.active {
            state.pending_message_check = true;
            tracing::debug!(group_id, "worker active, message check queued");
            return;
        }

        if at_cap {
            state.pending_message_check = true;
            inner.push_waiting(group_id);
            tracing::debug!(
                group_id,
                active_count = inner.active_count,
                "at concurrency limit, message check queued"
            );
            return;
        }

        self.admit_message_check(&mut inner, group_id, "messages");
    }

    /// Request admission for a discrete unit of work. Re-enqueueing a task
    /// id already pending for the group is a no-op.
    pub fn enqueue_task(self: &Arc<Self>, group_id: &str, task_id: &str, work: TaskFuture) {
        let mut inner = self.lock();
        if inner.shutting_down {
            return;
        }

        let at_cap = inner.active_count >= self.config.max_concurrent;
        let state = inner.group_mut(group_id);

        if state.pending_tasks.iter().any(|t| t.id == task_id) {
            tracing::debug!(group_id, task_id, "task already queued, skipping");
            return;
        }

        let task = QueuedTask {
            id: task_id.to_string(),
            work,
        };

        if state.active {
            state.pending_tasks.push_back(task);
            tracing::debug!(group_id, task_id, "worker active, task queued");
            return;
        }

        if at_cap {
            state.pending_tasks.push_back(task);
            inner.push_waiting(group_id);
            tracing::debug!(
                group_id,
                task_id,
                active_count = inner.active_count,
                "at concurrency limit, task queued"
            );
            return;
        }

        self.admit_task(&mut inner, group_id, task);
    }

    /// Record the live worker handle for a currently-running group so
    /// shutdown can signal it. Called by the execution collaborator right
    /// after it spawns a worker.
    pub fn register_process(
        &self,
        group_id: &str,
        handle: &Arc<dyn ProcessHandle>,
        container_name: Option<&str>,
    ) {
        let mut inner = self.lock();
        let state = inner.group_mut(group_id);
        state.process = Some(Arc::downgrade(handle));
        state.container_name = container_name.map(str::to_string);
    }

    // ── Admission ───────────────────────────────────────────────────

    fn admit_message_check(self: &Arc<Self>, inner: &mut QueueInner, group_id: &str, reason: &str) {
        let state = inner.group_mut(group_id);
        state.active = true;
        state.pending_message_check = false;
        inner.active_count += 1;

        tracing::debug!(
            group_id,
            reason,
            active_count = inner.active_count,
            "starting message check for group"
        );

        let processor = inner.processor.clone();
        let queue = Arc::clone(self);
        let gid = group_id.to_string();
        tokio::spawn(async move {
            // Run the collaborator on its own task so a panic surfaces as a
            // JoinError here instead of tearing down the supervisor.
            let outcome = match processor {
                Some(processor) => {
                    let g = gid.clone();
                    Some(tokio::spawn(async move { processor.process(&g).await }).await)
                }
                None => None,
            };
            queue.settle_message_check(&gid, outcome);
        });
    }

    fn admit_task(self: &Arc<Self>, inner: &mut QueueInner, group_id: &str, task: QueuedTask) {
        let state = inner.group_mut(group_id);
        state.active = true;
        inner.active_count += 1;

        tracing::debug!(
            group_id,
            task_id = %task.id,
            active_count = inner.active_count,
            "running queued task"
        );

        let queue = Arc::clone(self);
        let gid = group_id.to_string();
        let QueuedTask { id, work } = task;
        tokio::spawn(async move {
            let outcome = tokio::spawn(work).await;
            queue.settle_task(&gid, &id, outcome);
        });
    }

    // ── Settlement ──────────────────────────────────────────────────

    fn settle_message_check(
        self: &Arc<Self>,
        group_id: &str,
        outcome: Option<std::result::Result<Result<bool>, JoinError>>,
    ) {
        let mut inner = self.lock();
        match outcome {
            None => {}
            Some(Ok(Ok(true))) => inner.group_mut(group_id).retry_count = 0,
            Some(Ok(Ok(false))) => self.schedule_retry(&mut inner, group_id),
            Some(Ok(Err(err))) => {
                tracing::error!(group_id, %err, "error processing messages for group");
                self.schedule_retry(&mut inner, group_id);
            }
            Some(Err(err)) => {
                tracing::error!(group_id, %err, "message check panicked");
                self.schedule_retry(&mut inner, group_id);
            }
        }
        self.release_and_drain(&mut inner, group_id);
    }

    fn settle_task(
        self: &Arc<Self>,
        group_id: &str,
        task_id: &str,
        outcome: std::result::Result<Result<()>, JoinError>,
    ) {
        let mut inner = self.lock();
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(group_id, task_id, %err, "error running task"),
            Err(err) => tracing::error!(group_id, task_id, %err, "task panicked"),
        }
        self.release_and_drain(&mut inner, group_id);
    }

    /// Unconditional cleanup for every settlement path: clear the group's
    /// execution state, free the slot, then look for the next unit of work.
    fn release_and_drain(self: &Arc<Self>, inner: &mut QueueInner, group_id: &str) {
        let state = inner.group_mut(group_id);
        state.active = false;
        state.process = None;
        state.container_name = None;
        inner.active_count -= 1;
        self.drain(inner, group_id);
    }

    // ── Retry ───────────────────────────────────────────────────────

    fn schedule_retry(self: &Arc<Self>, inner: &mut QueueInner, group_id: &str) {
        let state = inner.group_mut(group_id);
        state.retry_count += 1;
        let retry_count = state.retry_count;

        if retry_count > self.config.max_retries {
            tracing::error!(
                group_id,
                retry_count,
                "max retries exceeded, dropping messages (will retry on next incoming message)"
            );
            state.retry_count = 0;
            return;
        }

        let delay = retry_delay(self.config.retry_base_delay, retry_count);
        tracing::info!(
            group_id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "scheduling message check retry with backoff"
        );

        let queue = Arc::clone(self);
        let gid = group_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !queue.is_shutting_down() {
                queue.enqueue_message_check(&gid);
            }
        });
    }

    // ── Drain ───────────────────────────────────────────────────────

    /// After a group's work settles: keep that group busy first (tasks
    /// before message checks), then hand the slot to waiting groups.
    fn drain(self: &Arc<Self>, inner: &mut QueueInner, group_id: &str) {
        if inner.shutting_down {
            return;
        }

        if let Some(task) = inner.group_mut(group_id).pending_tasks.pop_front() {
            self.admit_task(inner, group_id, task);
            return;
        }

        if inner.group_mut(group_id).pending_message_check {
            self.admit_message_check(inner, group_id, "drain");
            return;
        }

        self.drain_waiting(inner);
    }

    fn drain_waiting(self: &Arc<Self>, inner: &mut QueueInner) {
        while inner.active_count < self.config.max_concurrent {
            let Some(next) = inner.waiting_groups.pop_front() else {
                return;
            };

            if let Some(task) = inner.group_mut(&next).pending_tasks.pop_front() {
                self.admit_task(inner, &next, task);
            } else if inner.group_mut(&next).pending_message_check {
                self.admit_message_check(inner, &next, "drain");
            }
            // Neither pending: stale entry, skip it.
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Stop admitting work, signal every live worker, and wait up to
    /// `grace_period` for them to die before force-killing survivors.
    pub async fn shutdown(&self, grace_period: Duration) {
        let live = {
            let mut inner = self.lock();
            inner.shutting_down = true;
            tracing::info!(
                active_count = inner.active_count,
                grace_ms = grace_period.as_millis() as u64,
                "group queue shutting down"
            );

            let mut live: Vec<(String, Arc<dyn ProcessHandle>, Option<String>)> = Vec::new();
            for (gid, state) in &inner.groups {
                if let Some(handle) = state.process.as_ref().and_then(Weak::upgrade)
                    && handle.is_alive()
                {
                    live.push((gid.clone(), handle, state.container_name.clone()));
                }
            }
            live
        };

        if live.is_empty() {
            return;
        }

        for (gid, handle, container_name) in &live {
            if let Some(name) = container_name {
                tracing::info!(group_id = %gid, container = %name, "stopping container");
                stop_container(name);
            } else {
                tracing::info!(group_id = %gid, pid = ?handle.pid(), "terminating worker process");
                handle.terminate();
            }
        }

        let deadline = tokio::time::Instant::now() + grace_period;
        loop {
            if live.iter().all(|(_, handle, _)| !handle.is_alive()) {
                return;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(Duration::from_millis(500))).await;
        }

        for (gid, handle, _) in &live {
            if handle.is_alive() {
                tracing::warn!(group_id = %gid, pid = ?handle.pid(), "grace period elapsed, killing worker");
                handle.kill();
            }
        }
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Number of currently executing units of work.
    pub fn active_count(&self) -> usize {
        self.lock().active_count
    }

    /// Whether a unit of work is currently executing for the group.
    pub fn is_active(&self, group_id: &str) -> bool {
        self.lock().groups.get(group_id).is_some_and(|s| s.active)
    }

    /// Number of tasks queued behind the group's current work.
    pub fn pending_task_count(&self, group_id: &str) -> usize {
        self.lock()
            .groups
            .get(group_id)
            .map_or(0, |s| s.pending_tasks.len())
    }

    /// Whether the group has a live registered process handle.
    pub fn has_live_process(&self, group_id: &str) -> bool {
        self.lock()
            .groups
            .get(group_id)
            .and_then(|s| s.process.as_ref())
            .and_then(Weak::upgrade)
            .is_some_and(|h| h.is_alive())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    #[cfg(test)]
    fn retry_count(&self, group_id: &str) -> u32 {
        self.lock()
            .groups
            .get(group_id)
            .map_or(0, |s| s.retry_count)
    }
}

/// Exponential backoff: `base × 2^(retry_count − 1)`.
fn retry_delay(base: Duration, retry_count: u32) -> Duration {
    base * 2u32.saturating_pow(retry_count.saturating_sub(1))
}
