use thiserror::Error;

use crate::eyca::EycaError;

#[derive(Debug, Error)]
pub enum CardflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("EYCA API error: {0}")]
    Eyca(#[from] EycaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors surfaced by the document and table stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The record was modified since it was read (optimistic concurrency).
    #[error("version conflict (expected {expected:?}, found {found:?})")]
    Conflict {
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while reading or appending an instance history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Instance ids embed the subject, so they stay out of the message.
    #[error("instance history is empty or missing")]
    Empty(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("instance not found")]
    InstanceNotFound(String),

    #[error("instance stopped without reaching a terminal state")]
    Abandoned(String),

    #[error("no orchestration registered as {0}")]
    UnknownOrchestration(String),

    #[error("cannot encode orchestration input: {0}")]
    Encode(#[from] serde_json::Error),
}
