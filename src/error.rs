//! Error types for Group Runner.

/// Top-level error type for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Invalid schedule: {0}")]
    Schedule(String),

    #[error("Send failed for chat {chat_id}: {reason}")]
    Send { chat_id: String, reason: String },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence-contract errors. Backends map their native failures into
/// these; the core only logs or records them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the execution collaborator (container spawning and the
/// tasks snapshot it consumes).
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker spawn failed for group {group}: {reason}")]
    SpawnFailed { group: String, reason: String },

    #[error("Worker for group {group} failed: {reason}")]
    Failed { group: String, reason: String },

    #[error("Tasks snapshot write failed: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the orchestration core.
pub type Result<T> = std::result::Result<T, Error>;
