use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;
use thiserror::Error;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

/// Successful response envelope: `{"success": true, ...value}`.
#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{message}")]
    ValidationError { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    NotRecognized { message: String },
    #[error("{message}")]
    Conflict { message: String },
    #[error("{kind}: {message}")]
    InternalError { kind: &'static str, message: String },
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl Error {
    pub fn validation<S: Into<String>>(msg: S) -> Error {
        Error::ValidationError {
            message: msg.into(),
        }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn internal<S: Into<String>>(kind: &'static str, msg: S) -> Error {
        Error::InternalError {
            kind,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidCredentials | Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::ValidationError { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } | Error::NotRecognized { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(self) -> ErrorBody {
        let (error, message) = match self {
            Error::InvalidCredentials => ("InvalidCredentials", "Invalid credentials".to_string()),
            Error::Unauthorized => ("Unauthorized", "Unauthorized".to_string()),
            Error::ValidationError { message } => ("ValidationError", message),
            Error::NotFound { message } => ("NotFound", message),
            Error::NotRecognized { message } => ("NotRecognized", message),
            Error::Conflict { message } => ("Conflict", message),
            Error::InternalError { kind, message } => {
                log::error!("{}: {}", kind, message);
                ("InternalError", "Internal server error".to_string())
            }
        };
        ErrorBody {
            success: false,
            error,
            message,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.body())).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::InternalError {
            kind: "DatabaseError",
            message: err.to_string(),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "PasswordHashError",
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::InternalError {
            kind: "TaskError",
            message: err.to_string(),
        }
    }
}

impl From<crate::token::TokenError> for Error {
    fn from(err: crate::token::TokenError) -> Self {
        Self::InternalError {
            kind: "TokenError",
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError {
            kind: "Unknown",
            message: err.to_string(),
        }
    }
}
