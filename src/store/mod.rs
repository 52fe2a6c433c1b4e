//! Persistence contract for scheduled tasks and their run history.
//!
//! The orchestration core never owns a storage engine; it talks to
//! whatever backend the embedder provides through [`TaskStore`].
//! [`MemoryStore`] is a complete in-process backend used by tests and
//! small embedders.

mod memory;
mod model;
mod traits;

pub use memory::MemoryStore;
pub use model::{ContextMode, RunStatus, ScheduleType, ScheduledTask, TaskRunRecord, TaskStatus};
pub use traits::TaskStore;
