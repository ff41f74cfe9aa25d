//! Shared primitives for all Rust crates in privsync.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across privsync crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl std::fmt::Display for NonEmptyString {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Common error categories for grant reconciliation.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed configuration input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Scope is not compatible with the object type.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// Privilege keyword is unknown, illegal for the object type, or mixed with ALL PRIVILEGES.
    #[error("invalid privilege: {0}")]
    InvalidPrivilege(String),

    /// The database could not be reached or the connection failed mid-call.
    #[error("connection error: {0}")]
    Connection(String),

    /// The database executed the statement and rejected it.
    #[error("statement `{statement}` failed: {message}")]
    SqlExecution {
        /// Statement text that was sent to the database.
        statement: String,
        /// Database-provided failure description.
        message: String,
    },

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::{AppError, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn sql_execution_error_names_the_statement() {
        let error = AppError::SqlExecution {
            statement: "GRANT SELECT ON TABLE \"s\".\"t\" TO \"r\"".to_owned(),
            message: "relation \"s.t\" does not exist".to_owned(),
        };

        let rendered = error.to_string();
        assert!(rendered.contains("GRANT SELECT ON TABLE"));
        assert!(rendered.contains("does not exist"));
    }
}
