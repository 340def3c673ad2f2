use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    /// Logs the backend error and keeps only a short context for callers.
    pub fn storage<E: std::fmt::Display>(context: &str, err: E) -> Self {
        tracing::error!(error = %err, "{context}");
        CoreError::Storage(context.to_string())
    }
}
