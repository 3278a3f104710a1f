//! Error types for BioGraph services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Resource errors (4xxx)
    NotFound,
    EntityNotFound,
    SnapshotNotFound,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    GraphStoreTransport,

    // External service errors (8xxx)
    EntityExtractionFailed,
    EmbeddingError,
    VectorUnavailable,
    LlmError,
    AllModelsFailed,
    ExternalServiceError,

    // Ingest errors (85xx)
    ParserFatal,
    ChunkingMismatch,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    IoError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::EntityNotFound => 4002,
            ErrorCode::SnapshotNotFound => 4003,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::GraphStoreTransport => 7003,

            // External (8xxx)
            ErrorCode::EntityExtractionFailed => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::VectorUnavailable => 8003,
            ErrorCode::LlmError => 8004,
            ErrorCode::AllModelsFailed => 8005,
            ErrorCode::ExternalServiceError => 8006,

            // Ingest (85xx)
            ErrorCode::ParserFatal => 8501,
            ErrorCode::ChunkingMismatch => 8502,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::IoError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Entity not found: {query}")]
    EntityNotFound { query: String },

    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    /// Transport failure against the graph store. Callers treat this as
    /// "no path" after logging.
    #[error("Graph store transport error: {message}")]
    GraphStoreTransport { message: String },

    // External service errors
    #[error("Entity extraction failed: {detail}")]
    EntityExtractionFailed { detail: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Vector index unavailable: {message}")]
    VectorUnavailable { message: String },

    #[error("Generative model error: {message}")]
    LlmError { message: String },

    #[error("All model candidates failed: {detail}")]
    AllModelsFailed { detail: String },

    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Ingest errors
    #[error("Dump header could not be parsed for {table}: {message}")]
    ParserFatal { table: String, message: String },

    #[error("Chunking parameters do not match shard metadata: {detail}")]
    ChunkingMismatch { detail: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::EntityNotFound { .. } => ErrorCode::EntityNotFound,
            AppError::SnapshotNotFound { .. } => ErrorCode::SnapshotNotFound,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::GraphStoreTransport { .. } => ErrorCode::GraphStoreTransport,
            AppError::EntityExtractionFailed { .. } => ErrorCode::EntityExtractionFailed,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::VectorUnavailable { .. } => ErrorCode::VectorUnavailable,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::AllModelsFailed { .. } => ErrorCode::AllModelsFailed,
            AppError::ExternalService { .. } => ErrorCode::ExternalServiceError,
            AppError::HttpClient(_) => ErrorCode::ExternalServiceError,
            AppError::ParserFatal { .. } => ErrorCode::ParserFatal,
            AppError::ChunkingMismatch { .. } => ErrorCode::ChunkingMismatch,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Io(_) => ErrorCode::IoError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. } |
            AppError::EntityNotFound { .. } |
            AppError::SnapshotNotFound { .. } => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            AppError::Database(_) |
            AppError::DatabaseConnection { .. } |
            AppError::GraphStoreTransport { .. } |
            AppError::ParserFatal { .. } |
            AppError::ChunkingMismatch { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Io(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EntityExtractionFailed { .. } |
            AppError::EmbeddingError { .. } |
            AppError::VectorUnavailable { .. } |
            AppError::LlmError { .. } |
            AppError::AllModelsFailed { .. } |
            AppError::ExternalService { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                detail: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::EntityNotFound { query: "BRCA1".into() };
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_extraction_failure_is_bad_gateway() {
        let err = AppError::EntityExtractionFailed { detail: "all fallbacks failed".into() };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation { message: "query too long".into() };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }
}
