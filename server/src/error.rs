//! Error responses in the `{success: false, error}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use pricematch::error::{AuthError, DatabaseError, MatchError, PriceListError, PricematchError};
use pricematch::{JobError, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    }

    /// Logs `err` and answers with the generic `context` message.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "{}", context);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, context)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken
            | AuthError::InvalidToken(_)
            | AuthError::TokenExpired
            | AuthError::WrongTokenType
            | AuthError::TokenRevoked
            | AuthError::UserNotFound => ApiError::unauthorized("Unauthorized"),
            AuthError::InvalidCredentials => ApiError::unauthorized("Invalid credentials"),
            AuthError::NotApproved | AuthError::Inactive => {
                ApiError::new(StatusCode::FORBIDDEN, err.to_string())
            }
            AuthError::Forbidden => ApiError::forbidden(),
            AuthError::WeakPassword(_) | AuthError::InvalidEmail => {
                ApiError::bad_request(err.to_string())
            }
            AuthError::EmailTaken => ApiError::bad_request("User with this email already exists"),
            AuthError::Hash(_) | AuthError::Database(_) => {
                ApiError::internal("Authentication failed", err)
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(message) => ApiError::bad_request(message),
            other => ApiError::internal("Database error", other),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => ApiError::not_found("Job not found"),
            JobError::ResultNotFound(_) => ApiError::not_found("Result not found"),
            JobError::InvalidTransition { .. }
            | JobError::UnknownMethod(_)
            | JobError::UnknownStatus(_)
            | JobError::InvalidCorrection(_)
            | JobError::NoItems
            | JobError::Spreadsheet(_) => ApiError::bad_request(err.to_string()),
            JobError::Match(
                MatchError::NotConfigured(_) | MatchError::EmptyCatalogue | MatchError::NoMatch(_),
            ) => ApiError::bad_request(err.to_string()),
            other => ApiError::internal("Job operation failed", other),
        }
    }
}

impl From<PriceListError> for ApiError {
    fn from(err: PriceListError) -> Self {
        match err {
            PriceListError::UnsupportedFormat(_) => {
                ApiError::bad_request("Only CSV and Excel (.xlsx) files are supported")
            }
            PriceListError::Csv(e) => ApiError::bad_request(format!("Invalid CSV file: {}", e)),
            PriceListError::Spreadsheet(_) => ApiError::bad_request("Invalid Excel file"),
            PriceListError::NoItems => ApiError::bad_request(err.to_string()),
            PriceListError::Database(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::not_found("File not found"),
            other => ApiError::internal("Storage operation failed", other),
        }
    }
}

impl From<PricematchError> for ApiError {
    fn from(err: PricematchError) -> Self {
        match err {
            PricematchError::Auth(e) => e.into(),
            PricematchError::Database(e) => e.into(),
            PricematchError::Job(e) => e.into(),
            PricematchError::Storage(e) => e.into(),
            PricematchError::PriceList(e) => e.into(),
            other => ApiError::internal("Internal server error", other),
        }
    }
}
