//! Registry-collaborator contract: which groups exist, and which live
//! session (if any) each group currently has.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A chat group registered with the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredGroup {
    /// Chat identifier (queue key).
    pub id: String,
    /// Human-readable group name.
    pub name: String,
    /// Folder under the groups directory holding the group's workspace.
    pub folder: String,
}

/// Live view of registered groups and their sessions. Implementations are
/// expected to be cheap snapshots of in-memory state.
pub trait GroupRegistry: Send + Sync {
    /// Current groups, keyed by chat identifier.
    fn registered_groups(&self) -> HashMap<String, RegisteredGroup>;

    /// Current live sessions, keyed by group folder.
    fn sessions(&self) -> HashMap<String, String>;
}

/// Outbound message capability. Carried in the scheduler's dependency
/// bundle for collaborators; the core itself never sends.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Fixed registry backed by plain maps. Convenient for tests and
/// single-tenant embedders.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    pub groups: HashMap<String, RegisteredGroup>,
    pub sessions: HashMap<String, String>,
}

impl GroupRegistry for StaticRegistry {
    fn registered_groups(&self) -> HashMap<String, RegisteredGroup> {
        self.groups.clone()
    }

    fn sessions(&self) -> HashMap<String, String> {
        self.sessions.clone()
    }
}
