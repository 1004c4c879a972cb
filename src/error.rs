//! Failures reported to clients inside the `{"error": ...}` envelope.
//!
//! The rendered message is the wire contract: clients match on these strings,
//! so variants map one-to-one onto the texts they have always seen.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// The request body is not a JSON object.
    #[error("Invalid JSON in request body: {0}")]
    InvalidJson(String),

    #[error("Missing required field 'tool'")]
    MissingTool,

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A required parameter is absent, null or empty.
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    /// A lookup by name found nothing; the message names what was missing.
    #[error("{0}")]
    NotFound(String),

    /// The entry exists but its content cannot be returned as text.
    #[error("{0}")]
    Unreadable(String),

    /// The decompiler handle failed its liveness check.
    #[error("Service unavailable: no live decompiler session")]
    Unavailable,

    /// A collaborator fault, already prefixed with the failing action.
    #[error("{0}")]
    Failed(String),

    /// A handler panicked.
    #[error("Unexpected error while processing request: {0}")]
    Unexpected(String),

    /// Path other than `/invoke` or `/tools`.
    #[error("Not found")]
    NoRoute,
}

impl ToolError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn missing(parameter: impl Into<String>) -> Self {
        Self::MissingParameter(parameter.into())
    }
}

/// Converts collaborator errors into [`ToolError::Failed`] with the action
/// that failed as prefix, e.g. `Error fetching class: <cause>`.
pub trait ToolResultExt<T> {
    fn or_failed(self, action: &str) -> Result<T, ToolError>;
}

impl<T> ToolResultExt<T> for anyhow::Result<T> {
    fn or_failed(self, action: &str) -> Result<T, ToolError> {
        self.map_err(|e| ToolError::Failed(format!("{action}: {e:#}")))
    }
}
