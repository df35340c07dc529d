use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Flat discriminant of [`ExecutionError`], for branching and serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Compile,
    Runtime,
    Timeout,
    ResourceExhausted,
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Compile => "compile",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }

    /// True for failures caused by the submitted program rather than the service
    pub fn is_user_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::Compile | ErrorKind::Runtime | ErrorKind::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a run can fail.
///
/// **Ordering of the pipeline:**
/// - `Validation` is raised before any filesystem or process work
/// - `ResourceExhausted` only on the pooled acquire
/// - `Compile` stops the pipeline, no execute step is attempted
/// - `Runtime` / `Timeout` come out of the execute step
/// - `Infrastructure` covers sandbox create/transfer/destroy and local I/O
///
/// None of these are retried by the orchestrator.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Validation(String),

    /// Raw compiler diagnostics, verbatim
    #[error("{diagnostics}")]
    Compile { diagnostics: String },

    #[error("{message}")]
    Runtime {
        exit_code: Option<i64>,
        message: String,
    },

    #[error("Execution timed out after {}ms", limit.as_millis())]
    Timeout { limit: Duration },

    #[error("No sandbox became available within {}ms", waited.as_millis())]
    ResourceExhausted { waited: Duration },

    #[error("Infrastructure failure: {0:#}")]
    Infrastructure(#[source] anyhow::Error),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Validation(_) => ErrorKind::Validation,
            ExecutionError::Compile { .. } => ErrorKind::Compile,
            ExecutionError::Runtime { .. } => ErrorKind::Runtime,
            ExecutionError::Timeout { .. } => ErrorKind::Timeout,
            ExecutionError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            ExecutionError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<anyhow::Error> for ExecutionError {
    fn from(err: anyhow::Error) -> Self {
        ExecutionError::Infrastructure(err)
    }
}
