//! Error taxonomy for the upload pipeline.

use crate::object_store::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the upload and playback paths
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Asset {0} not found")]
    NotFound(Uuid),

    #[error("User {user_id} does not own asset {asset_id}")]
    Forbidden { asset_id: Uuid, user_id: Uuid },

    #[error("{tool} failed: {message}")]
    UpstreamTool { tool: String, message: String },

    #[error("Object storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to persist asset metadata: {0}")]
    Persistence(String),

    #[error("Staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn upstream(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UpstreamTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Forbidden { .. } => "forbidden",
            Error::UpstreamTool { .. } => "upstream_tool",
            Error::Storage(_) => "storage",
            Error::Persistence(_) => "persistence",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_message() {
        let err = Error::upstream("ffprobe", "exit status 1");
        assert_eq!(err.to_string(), "ffprobe failed: exit status 1");
        assert_eq!(err.kind(), "upstream_tool");
    }
}
