//! Domain error types for server operations.
//!
//! Startup failures are wrapped in a rootcause `Report` by `main`. Request
//! failures are turned into user-safe responses here; details go to the
//! logs only.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gist_analytics_query::QueryError;
use rootcause::prelude::Report;
use serde_json::json;
use std::fmt;

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// An outbound HTTP client could not be built.
    HttpClient { details: String },
    /// The listen address could not be bound.
    Bind { addr: String, details: String },
    /// The server stopped with an I/O error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {}", details),
            Self::HttpClient { details } => {
                write!(f, "failed to build HTTP client: {}", details)
            }
            Self::Bind { addr, details } => {
                write!(f, "failed to bind to '{}': {}", addr, details)
            }
            Self::Serve { details } => write!(f, "server error: {}", details),
        }
    }
}

impl std::error::Error for StartupError {}

/// Errors returned by the JSON API.
#[derive(Debug)]
pub enum ApiError {
    /// A query parameter was out of range.
    BadRequest { details: String },
    /// The analytics store failed.
    Query(Report<QueryError>),
}

impl From<Report<QueryError>> for ApiError {
    fn from(report: Report<QueryError>) -> Self {
        match report.current_context() {
            QueryError::InvalidInput { details } => Self::BadRequest {
                details: details.clone(),
            },
            _ => Self::Query(report),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        Self::from(Report::from(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest { details } => (StatusCode::BAD_REQUEST, details),
            Self::Query(report) => {
                tracing::error!(error = %report, "analytics query failed");
                if report.current_context().is_transient() {
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "The analytics store is unavailable. Please try again.".to_string(),
                    )
                } else {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "The analytics query failed.".to_string(),
                    )
                }
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
