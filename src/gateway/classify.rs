//! Engine failure → stable error taxonomy.

use tracing::error;

use crate::db::{EngineFailure, FailureOrigin, MISSING_BIND_MESSAGE};
use crate::error::AppError;

pub const MISSING_PARAMETER_HINT: &str =
    "Missing query parameter. Ensure params include p_date_from, p_date_to, p_object_id (use null if not needed).";

/// Case-insensitive substring rules, first match wins. Never fails.
pub fn classify(failure: &EngineFailure) -> AppError {
    let msg = failure.message.as_str();
    let low = msg.to_lowercase();

    if failure.origin == FailureOrigin::Pool {
        if low.contains("timeout") {
            return AppError::timeout("pool_timeout", "Timed out waiting for a database connection");
        }
        error!(target: "sqlgate::gateway", error = %failure, "connection pool failure");
        return AppError::internal("database_unavailable".to_string(), format!("Database unavailable: {}", msg));
    }

    if low.contains("syntax error") {
        return AppError::syntax("syntax_error".to_string(), format!("SQL Syntax Error: {}", msg));
    }
    if low.contains("permission denied") {
        return AppError::permission("permission_denied".to_string(), format!("Permission denied: {}", msg));
    }
    if low.contains("does not exist") {
        return AppError::not_found("not_found".to_string(), format!("Table or column not found: {}", msg));
    }
    if low.contains("statement timeout") || low.contains("timeout") {
        return AppError::timeout("statement_timeout", "Query timeout exceeded");
    }
    if low.contains(MISSING_BIND_MESSAGE) {
        return AppError::missing_parameter("missing_parameter", MISSING_PARAMETER_HINT);
    }

    error!(target: "sqlgate::gateway", error = %failure, "SQL execution error");
    AppError::database("database_error".to_string(), format!("Database error: {}", msg))
}
