//! Execution-collaborator contract.
//!
//! The orchestration core never spawns worker containers itself; an
//! [`AgentRunner`] implementation does. The core only needs a handle it
//! can signal at shutdown and a success/error outcome to interpret.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::registry::RegisteredGroup;
use crate::store::ScheduledTask;

/// Lookup-only view of a live worker process. The execution collaborator
/// owns the process lifecycle; the queue holds a `Weak` reference to this
/// and uses it solely for shutdown signaling.
pub trait ProcessHandle: Send + Sync {
    /// OS pid, if the worker runs as a raw process.
    fn pid(&self) -> Option<u32>;

    /// Whether the process is still running.
    fn is_alive(&self) -> bool;

    /// Graceful termination signal (SIGTERM-equivalent).
    fn terminate(&self);

    /// Forced kill (SIGKILL-equivalent).
    fn kill(&self);
}

/// Callback invoked by the runner once a worker process exists, so the
/// queue can register it for shutdown signaling.
pub type OnProcessSpawned<'a> =
    dyn Fn(Arc<dyn ProcessHandle>, Option<&str>) + Send + Sync + 'a;

/// Per-run parameters handed to the worker.
#[derive(Debug, Clone)]
pub struct WorkerParams {
    pub prompt: String,
    /// Session to continue, when the task runs in group context mode.
    pub session_id: Option<String>,
    pub group_folder: String,
    pub chat_id: String,
    pub is_main: bool,
}

/// Terminal status reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Success,
    Error,
}

/// Payload of a successful worker run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Text meant for the chat, if the worker produced one.
    pub user_message: Option<String>,
    /// Text meant only for the run log.
    pub internal_log: Option<String>,
}

/// Outcome of one worker run.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub status: WorkerStatus,
    pub error: Option<String>,
    pub result: Option<WorkerResult>,
}

/// Spawns and supervises worker containers on behalf of the core.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one worker for `group`. Implementations call `on_spawn` as soon
    /// as the underlying process exists.
    async fn run_worker(
        &self,
        group: &RegisteredGroup,
        params: WorkerParams,
        on_spawn: &OnProcessSpawned<'_>,
    ) -> Result<WorkerOutput, WorkerError>;

    /// Write the task snapshot a worker consults while running, filtered
    /// to its own group.
    fn write_tasks_snapshot(
        &self,
        group_folder: &str,
        is_main: bool,
        tasks: &[ScheduledTask],
    ) -> Result<(), WorkerError>;
}

/// Ask the container runtime to stop a named container gracefully.
/// Fire-and-forget: failures are logged, never surfaced, since this only
/// runs during shutdown.
pub fn stop_container(name: &str) {
    match tokio::process::Command::new("container")
        .arg("stop")
        .arg(name)
        .spawn()
    {
        Ok(mut child) => {
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        Err(err) => {
            tracing::warn!(container = %name, %err, "failed to invoke container stop");
        }
    }
}
