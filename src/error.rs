//! Unified gateway error model.
//! Every failure leaving the pipeline is one `AppError` variant with a stable code and a
//! human-readable message; the HTTP layer maps variants to status codes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Unauthenticated { code: String, message: String },
    AuthorizationDenied { code: String, message: String },
    Validation { code: String, message: String },
    Syntax { code: String, message: String },
    PermissionDenied { code: String, message: String },
    NotFound { code: String, message: String },
    Timeout { code: String, message: String },
    MissingParameter { code: String, message: String },
    Database { code: String, message: String },
    Internal { code: String, message: String },
}

/// Stable error kind exposed to callers alongside the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    AuthorizationDenied,
    ValidationError,
    SyntaxError,
    PermissionDenied,
    NotFound,
    Timeout,
    MissingParameter,
    GenericDatabaseError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::AuthorizationDenied => "authorization_denied",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MissingParameter => "missing_parameter",
            ErrorKind::GenericDatabaseError => "generic_database_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Unauthenticated { code, .. }
            | AppError::AuthorizationDenied { code, .. }
            | AppError::Validation { code, .. }
            | AppError::Syntax { code, .. }
            | AppError::PermissionDenied { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Timeout { code, .. }
            | AppError::MissingParameter { code, .. }
            | AppError::Database { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthenticated { message, .. }
            | AppError::AuthorizationDenied { message, .. }
            | AppError::Validation { message, .. }
            | AppError::Syntax { message, .. }
            | AppError::PermissionDenied { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Timeout { message, .. }
            | AppError::MissingParameter { message, .. }
            | AppError::Database { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            AppError::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            AppError::Validation { .. } => ErrorKind::ValidationError,
            AppError::Syntax { .. } => ErrorKind::SyntaxError,
            AppError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::Timeout { .. } => ErrorKind::Timeout,
            AppError::MissingParameter { .. } => ErrorKind::MissingParameter,
            AppError::Database { .. } => ErrorKind::GenericDatabaseError,
            AppError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Ad-hoc statements are never assumed safe to re-run.
    pub fn retriable(&self) -> bool { false }

    pub fn unauthenticated<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthenticated { code: code.into(), message: msg.into() } }
    pub fn denied<S: Into<String>>(code: S, msg: S) -> Self { AppError::AuthorizationDenied { code: code.into(), message: msg.into() } }
    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn syntax<S: Into<String>>(code: S, msg: S) -> Self { AppError::Syntax { code: code.into(), message: msg.into() } }
    pub fn permission<S: Into<String>>(code: S, msg: S) -> Self { AppError::PermissionDenied { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn timeout<S: Into<String>>(code: S, msg: S) -> Self { AppError::Timeout { code: code.into(), message: msg.into() } }
    pub fn missing_parameter<S: Into<String>>(code: S, msg: S) -> Self { AppError::MissingParameter { code: code.into(), message: msg.into() } }
    pub fn database<S: Into<String>>(code: S, msg: S) -> Self { AppError::Database { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Unauthenticated { .. } => 401,
            AppError::AuthorizationDenied { .. } => 403,
            AppError::Validation { .. } => 400,
            AppError::Syntax { .. } => 400,
            AppError::PermissionDenied { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Timeout { .. } => 408,
            AppError::MissingParameter { .. } => 400,
            AppError::Database { .. } => 400,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}
