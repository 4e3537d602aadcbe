use std::time::Duration;

/// Errors raised by an engine gateway or while driving one.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine instance could not be constructed.
    #[error("engine creation failed: {0}")]
    Create(String),

    /// The engine rejected or could not run an invocation.
    #[error("engine invocation failed: {0}")]
    Invoke(String),

    /// An external engine program could not be started.
    #[error("failed to spawn engine program {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The invocation exceeded the caller's deadline.
    #[error("engine invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The engine was interrupted by shutdown.
    #[error("engine invocation interrupted")]
    Interrupted,

    /// The invocation panicked on the blocking pool.
    #[error("engine invocation panicked")]
    Panicked,
}

pub type Result<T> = std::result::Result<T, EngineError>;
