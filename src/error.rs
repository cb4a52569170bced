/// Unified error types for the DID agent
use crate::{did::DidError, ticket::TicketError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the agent
#[derive(Error, Debug)]
pub enum AgentError {
    /// Ticket admission errors
    #[error(transparent)]
    Ticket(#[from] TicketError),

    /// DID model errors
    #[error(transparent)]
    Did(#[from] DidError),

    /// Process request without a ticket
    #[error("empty request")]
    EmptyRequest,

    /// DID method not in the configured list
    #[error("non supported method")]
    UnsupportedMethod,

    /// Not found errors
    #[error("{0}")]
    NotFound(String),

    /// Storage backend errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Delete requested on a backend with immutable records
    #[error("{0} entries cannot be removed")]
    ImmutableRecord(String),

    /// Database errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blockchain client errors
    #[error("ledger error: {0}")]
    Ledger(String),

    /// No blockchain client configured
    #[error("ledger client not configured")]
    LedgerUnavailable,

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert AgentError to HTTP response
impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AgentError::Ticket(_)
            | AgentError::Did(_)
            | AgentError::EmptyRequest
            | AgentError::UnsupportedMethod
            | AgentError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "InvalidArgument", self.to_string())
            }
            AgentError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            AgentError::ImmutableRecord(_) => {
                (StatusCode::CONFLICT, "FailedPrecondition", self.to_string())
            }
            AgentError::LedgerUnavailable | AgentError::Ledger(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Unavailable", self.to_string())
            }
            AgentError::Database(_) | AgentError::Internal(_) | AgentError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal",
                "Internal server error".to_string(), // Don't leak details
            ),
            AgentError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal",
                self.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
