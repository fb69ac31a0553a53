//! Error types for the phonepilot engine.

/// Top-level error type for the task-execution and scheduling engine.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration error (bad run parameters, missing task text).
    #[error("config error: {0}")]
    Config(String),

    /// Task logic raised or returned a failure. Carries the raw failure text.
    #[error("{0}")]
    Task(String),

    /// A pending input request received no response within the ceiling.
    #[error("input timeout after 5 minutes")]
    PromptTimeout,

    /// The run was terminated by a user stop request.
    #[error("task terminated by user")]
    Terminated,

    /// A start request arrived while a run was already active.
    #[error("a run is already in progress")]
    RunInProgress,

    /// Scheduler configuration rejected.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AgentError>;
