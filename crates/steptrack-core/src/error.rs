// Copyright (C) 2026 Steptrack Maintainers
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for steptrack-core.
//!
//! Missing records are never errors in this crate (reads return `None` or
//! empty collections); `TrackerError` covers store failures and invalid input.

use std::fmt;

/// Result type using TrackerError
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors that can occur while tracking node execution details.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TrackerError {
    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A payload could not be serialized or deserialized.
    PayloadError {
        /// The node execution the payload belongs to.
        node_execution_id: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl TrackerError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::PayloadError { .. } => "PAYLOAD_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::PayloadError {
                node_execution_id,
                details,
            } => {
                write!(
                    f,
                    "Payload error for node execution '{}': {}",
                    node_execution_id, details
                )
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<sqlx::Error> for TrackerError {
    fn from(err: sqlx::Error) -> Self {
        TrackerError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TrackerError::ValidationError {
                field: "node_execution_id".to_string(),
                message: "must not be empty".to_string(),
            }
            .error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            TrackerError::PayloadError {
                node_execution_id: "n1".to_string(),
                details: "not json".to_string(),
            }
            .error_code(),
            "PAYLOAD_ERROR"
        );
        assert_eq!(
            TrackerError::DatabaseError {
                operation: "insert".to_string(),
                details: "connection refused".to_string(),
            }
            .error_code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = TrackerError::ValidationError {
            field: "name".to_string(),
            message: "must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error for 'name': must not be empty"
        );

        let err = TrackerError::PayloadError {
            node_execution_id: "node-1".to_string(),
            details: "invalid utf-8".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Payload error for node execution 'node-1': invalid utf-8"
        );

        let err = TrackerError::DatabaseError {
            operation: "update".to_string(),
            details: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Database error during 'update': connection refused"
        );
    }
}
