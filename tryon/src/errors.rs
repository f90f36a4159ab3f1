use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Errors surfaced by the HTTP layer.
///
/// Logical try-on failures (unknown product, missing asset, remote failure) are not represented
/// here: they are reported inside a `200` body so that clients can inspect `error_kind`. This
/// type covers requests that cannot be processed at all.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data (malformed multipart, missing or unparsable fields)
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

impl From<minijinja::Error> for Error {
    fn from(err: minijinja::Error) -> Self {
        Error::Internal {
            operation: format!("render page: {err:#}"),
        }
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let bad = Error::BadRequest {
            message: "product_id is required".to_string(),
        };
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.user_message(), "product_id is required");

        let missing = Error::NotFound {
            resource: "Product".to_string(),
            id: "nope".to_string(),
        };
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(missing.user_message(), "Product with ID nope not found");
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let err = Error::Internal {
            operation: "read /etc/secret".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Internal server error");
    }
}
