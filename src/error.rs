//! Error hierarchy for the graph execution core.

use thiserror::Error;

/// All failure modes the core can report.
///
/// `support()` predicates return `bool` directly and never raise
/// [`CoreError::Unsupported`] themselves; that variant is raised only when a
/// caller asks the graph to `finalize()` or `run()` while one of its ops is
/// unsupported.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("op '{0}' is not supported by the engine")]
    Unsupported(String),

    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("kernel execution failed in op '{0}': {1}")]
    Kernel(String, String),

    #[error("run cancelled")]
    Cancelled,
}

pub type CoreResult<T> = Result<T, CoreError>;
