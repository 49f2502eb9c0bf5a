// src/error.rs
// Error taxonomy shared by the dispatcher, tools, and telemetry

use thiserror::Error;

/// Stable error codes attached to telemetry events and client-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ToolNotFound,
    ToolDisabled,
    FeatureDisabled,
    InvalidArguments,
    ConfirmationDeclined,
    NotConnected,
    ConnectionFailed,
    ForbiddenWriteOperation,
    ForbiddenReadOperation,
    AtlasSearchNotSupported,
    AtlasVectorSearchIndexNotFound,
    AtlasVectorSearchInvalidQuery,
    EmbeddingServiceError,
    EmbeddingDimensionMismatch,
    Cancelled,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolNotFound => "ToolNotFound",
            Self::ToolDisabled => "ToolDisabled",
            Self::FeatureDisabled => "FeatureDisabled",
            Self::InvalidArguments => "InvalidArguments",
            Self::ConfirmationDeclined => "ConfirmationDeclined",
            Self::NotConnected => "NotConnected",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::ForbiddenWriteOperation => "ForbiddenWriteOperation",
            Self::ForbiddenReadOperation => "ForbiddenReadOperation",
            Self::AtlasSearchNotSupported => "AtlasSearchNotSupported",
            Self::AtlasVectorSearchIndexNotFound => "AtlasVectorSearchIndexNotFound",
            Self::AtlasVectorSearchInvalidQuery => "AtlasVectorSearchInvalidQuery",
            Self::EmbeddingServiceError => "EmbeddingServiceError",
            Self::EmbeddingDimensionMismatch => "EmbeddingDimensionMismatch",
            Self::Cancelled => "Cancelled",
            Self::Unexpected => "Unexpected",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type. Everything that can go wrong inside a tool execution is
/// funneled through here so the dispatcher can render it uniformly.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("tool '{0}' is disabled by the server configuration")]
    ToolDisabled(String),

    #[error("tool '{name}' requires the '{feature}' preview feature to be enabled")]
    FeatureDisabled { name: String, feature: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(
        "not connected to MongoDB. No connection string is configured; use the 'connect' tool first"
    )]
    NotConnected,

    #[error("failed to connect to MongoDB: {0}")]
    ConnectionFailed(String),

    #[error("{0}")]
    ForbiddenWriteOperation(String),

    #[error("{0}")]
    ForbiddenReadOperation(String),

    #[error("the connected cluster does not support Atlas Search")]
    AtlasSearchNotSupported,

    #[error("vector search index '{name}' not found on {namespace}")]
    AtlasVectorSearchIndexNotFound { name: String, namespace: String },

    #[error("{0}")]
    AtlasVectorSearchInvalidQuery(String),

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("{0}")]
    EmbeddingDimensionMismatch(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON serialization error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unexpected(String),
}

/// Convenience type alias for Result using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Classified code for telemetry and client display.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ToolNotFound(_) => ErrorCode::ToolNotFound,
            Self::ToolDisabled(_) => ErrorCode::ToolDisabled,
            Self::FeatureDisabled { .. } => ErrorCode::FeatureDisabled,
            Self::InvalidArguments(_) => ErrorCode::InvalidArguments,
            Self::NotConnected => ErrorCode::NotConnected,
            Self::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            Self::ForbiddenWriteOperation(_) => ErrorCode::ForbiddenWriteOperation,
            Self::ForbiddenReadOperation(_) => ErrorCode::ForbiddenReadOperation,
            Self::AtlasSearchNotSupported => ErrorCode::AtlasSearchNotSupported,
            Self::AtlasVectorSearchIndexNotFound { .. } => {
                ErrorCode::AtlasVectorSearchIndexNotFound
            }
            Self::AtlasVectorSearchInvalidQuery(_) => ErrorCode::AtlasVectorSearchInvalidQuery,
            Self::EmbeddingService(_) => ErrorCode::EmbeddingServiceError,
            Self::EmbeddingDimensionMismatch(_) => ErrorCode::EmbeddingDimensionMismatch,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Mongo(_) | Self::Http(_) | Self::Json(_) | Self::Bson(_) | Self::Io(_) => {
                ErrorCode::Unexpected
            }
            Self::Unexpected(_) => ErrorCode::Unexpected,
        }
    }
}

impl From<String> for ServerError {
    fn from(s: String) -> Self {
        ServerError::Unexpected(s)
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ServerError::Cancelled
        } else {
            ServerError::Unexpected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ErrorCode::ToolNotFound.as_str(), "ToolNotFound");
        assert_eq!(
            ErrorCode::ForbiddenWriteOperation.as_str(),
            "ForbiddenWriteOperation"
        );
        assert_eq!(
            ErrorCode::AtlasVectorSearchInvalidQuery.as_str(),
            "AtlasVectorSearchInvalidQuery"
        );
    }

    #[test]
    fn error_maps_to_code() {
        let err = ServerError::ToolDisabled("drop-database".into());
        assert_eq!(err.code(), ErrorCode::ToolDisabled);

        let err = ServerError::EmbeddingService("boom".into());
        assert_eq!(err.code(), ErrorCode::EmbeddingServiceError);

        let err = ServerError::Cancelled;
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }

    #[test]
    fn not_connected_mentions_connect_tool() {
        let msg = ServerError::NotConnected.to_string();
        assert!(msg.contains("connect"));
    }
}
