use thiserror::Error;

/// Unified error type for the invisibrow workspace.
#[derive(Debug, Error)]
pub enum InvisibrowError {
    /// Memory database (SQLite) read/write failure.
    #[error("memory store error: {0}")]
    Memory(String),

    /// Session/task JSON persistence failure.
    #[error("store error: {0}")]
    Store(String),

    /// LLM transport or response-shape failure.
    #[error("llm error: {0}")]
    Llm(String),

    /// Browser driver failure (navigation, snapshot, input).
    #[error("browser error: {0}")]
    Browser(String),

    /// Task scheduling failure.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),
}
