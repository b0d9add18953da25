//! Error types for fieldsync.
//!
//! This module defines all error types used throughout the fieldsync crate,
//! from form loading and validation through storage and sync.

use std::path::PathBuf;
use thiserror::Error;

/// A single field that failed constraint validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// The main error type for fieldsync operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Form Errors ===
    /// The requested form key is not in the catalog.
    #[error("form definition for '{key}' not found in config")]
    FormNotFound {
        /// The unknown form key.
        key: String,
    },

    /// Fetching a form definition failed.
    #[error("failed to load form definition from {location}: {message}")]
    FormFetch {
        /// Where the definition was fetched from.
        location: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A form definition could not be parsed or is malformed.
    #[error("invalid form definition '{location}': {message}")]
    FormParse {
        /// Where the definition was fetched from.
        location: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Field constraints were not met.
    #[error("{} field(s) failed validation: {}", violations.len(), join_violations(violations))]
    Validation {
        /// Every failing field.
        violations: Vec<FieldViolation>,
    },

    // === Sync Errors ===
    /// The request to the sync endpoint never completed.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a failure status or an unusable body.
    #[error("server error: {message}")]
    Server {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// Server-provided or synthesized message.
        message: String,
    },

    /// No sync endpoint is configured.
    #[error("sync endpoint not configured")]
    EndpointNotConfigured,

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for fieldsync operations.
pub type Result<T> = std::result::Result<T, Error>;

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a form fetch error.
    #[must_use]
    pub fn form_fetch(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FormFetch {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a form parse error.
    #[must_use]
    pub fn form_parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FormParse {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a server error.
    #[must_use]
    pub fn server(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a local validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error means the catalog has no such form.
    #[must_use]
    pub fn is_form_not_found(&self) -> bool {
        matches!(self, Self::FormNotFound { .. })
    }

    /// Check if this error leaves records waiting in the local queue.
    ///
    /// Network, server and missing-endpoint failures all end with the
    /// affected records retained locally.
    #[must_use]
    pub fn is_retained_locally(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::EndpointNotConfigured
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::EndpointNotConfigured;
        assert_eq!(err.to_string(), "sync endpoint not configured");

        let err = Error::network("connection refused");
        assert_eq!(err.to_string(), "network error: connection refused");
    }

    #[test]
    fn test_form_not_found_display() {
        let err = Error::FormNotFound {
            key: "health".to_string(),
        };
        assert!(err.to_string().contains("'health'"));
        assert!(err.is_form_not_found());
        assert!(!Error::internal("x").is_form_not_found());
    }

    #[test]
    fn test_validation_error_lists_fields() {
        let err = Error::Validation {
            violations: vec![
                FieldViolation {
                    field: "patientId".to_string(),
                    reason: "required".to_string(),
                },
                FieldViolation {
                    field: "age".to_string(),
                    reason: "must be a number".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 field(s)"));
        assert!(msg.contains("patientId: required"));
        assert!(msg.contains("age: must be a number"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_retained_locally() {
        assert!(Error::network("down").is_retained_locally());
        assert!(Error::server(Some(500), "boom").is_retained_locally());
        assert!(Error::EndpointNotConfigured.is_retained_locally());
        assert!(!Error::internal("bug").is_retained_locally());
    }

    #[test]
    fn test_form_fetch_and_parse_display() {
        let err = Error::form_fetch("forms/health.json", "404 Not Found");
        let msg = err.to_string();
        assert!(msg.contains("forms/health.json"));
        assert!(msg.contains("404"));

        let err = Error::form_parse("forms/health.json", "expected value");
        assert!(err.to_string().contains("expected value"));
    }

    #[test]
    fn test_server_error_display() {
        let err = Error::server(Some(502), "Submission issue: bad gateway");
        assert_eq!(
            err.to_string(),
            "server error: Submission issue: bad gateway"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "endpoint must be an http(s) URL".to_string(),
        };
        assert!(err.to_string().contains("http(s) URL"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
