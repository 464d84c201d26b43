use thiserror::Error;

/// Failure classes that map to distinct process exit codes, so the scheduler
/// can tell "fix the config" apart from "retry on the next tick".
#[derive(Debug, Error)]
pub enum RunError {
    /// Fatal and non-retryable (missing source path, bad glob, invalid policy).
    #[error("configuration error: {0}")]
    Config(String),

    /// Retryable on the next scheduled invocation (disk full, permission race).
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// A problem with already-written data, not the current operation.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Another invocation holds the lock. Expected under scheduler overlap.
    #[error("{0}")]
    LockHeld(String),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 2,
            RunError::Transient(_) => 3,
            RunError::Integrity(_) => 4,
            RunError::LockHeld(_) => 0,
        }
    }
}

pub fn config_error(msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(RunError::Config(msg.into()))
}

pub fn transient_error(msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(RunError::Transient(msg.into()))
}

pub fn integrity_error(msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(RunError::Integrity(msg.into()))
}

/// Find the typed failure class anywhere in an `anyhow` chain.
pub fn classify(err: &anyhow::Error) -> Option<&RunError> {
    err.chain().find_map(|cause| cause.downcast_ref::<RunError>())
}

/// Exit code for an error chain; unclassified failures get a generic 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    classify(err).map(RunError::exit_code).unwrap_or(1)
}
