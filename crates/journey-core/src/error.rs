//! Error types for the journey engine.

use std::path::PathBuf;

use thiserror::Error;

/// Comprehensive error type for all journey engine operations.
#[derive(Error, Debug)]
pub enum JourneyError {
    /// Database connection or query errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: rusqlite::Error,
    },
    /// Referenced record does not exist or fails a status precondition
    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    /// Operation collides with existing state (duplicate enrollment, held
    /// lease, edits on an active journey)
    #[error("Conflict: {message}")]
    Conflict { message: String },
    /// A step's dispatch failed; the failure is already recorded on the
    /// execution row
    #[error("Step {step_id} failed: {message}")]
    Execution { step_id: u64, message: String },
    /// Journey graph failed structural validation
    #[error("Journey failed validation: {}", errors.join("; "))]
    Validation { errors: Vec<String> },
    /// Invalid input validation errors
    #[error("Invalid input for field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },
    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    /// File system operation errors
    #[error("File system error at path '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// XDG directory specification errors
    #[error("XDG directory error: {0}")]
    XdgDirectory(String),
    /// External collaborator (email, AI) errors
    #[error("{service} error: {message}")]
    Collaborator {
        service: &'static str,
        message: String,
    },
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Builder for creating database errors with optional context.
pub struct DatabaseErrorBuilder {
    message: String,
}

impl DatabaseErrorBuilder {
    /// Create a new database error builder with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build the error with the given source.
    pub fn with_source(self, source: rusqlite::Error) -> JourneyError {
        JourneyError::Database {
            message: self.message,
            source,
        }
    }
}

/// Builder for creating input validation errors.
pub struct InvalidInputBuilder {
    field: String,
}

impl InvalidInputBuilder {
    /// Create a new invalid input error builder for a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Build the error with the given reason.
    pub fn with_reason(self, reason: impl Into<String>) -> JourneyError {
        JourneyError::InvalidInput {
            field: self.field,
            reason: reason.into(),
        }
    }
}

impl JourneyError {
    /// Creates a builder for database errors.
    pub fn database(message: impl Into<String>) -> DatabaseErrorBuilder {
        DatabaseErrorBuilder::new(message)
    }

    /// Creates a builder for input validation errors.
    pub fn invalid_input(field: impl Into<String>) -> InvalidInputBuilder {
        InvalidInputBuilder::new(field)
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a collaborator error for the named service.
    pub fn collaborator(service: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service,
            message: message.into(),
        }
    }

    /// True for SQLite lock contention that outlasted the busy timeout. The
    /// same call may succeed when retried.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database {
                source: rusqlite::Error::SqliteFailure(failure, _),
                ..
            } => matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Creates an error for a blocking task that could not be joined.
    pub(crate) fn join(error: tokio::task::JoinError) -> Self {
        Self::Configuration {
            message: format!("Task join error: {error}"),
        }
    }
}

/// Specialized extension trait for database-related Results.
pub trait DatabaseResultExt<T> {
    /// Map database errors with a message.
    fn db_context(self, message: &str) -> Result<T>;
}

impl<T> DatabaseResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db_context(self, message: &str) -> Result<T> {
        self.map_err(|e| JourneyError::database(message).with_source(e))
    }
}

/// Maps a missing row to [`JourneyError::NotFound`] and everything else to a
/// database error.
pub trait NotFoundExt<T> {
    fn or_not_found(self, entity: &'static str, id: u64, message: &str) -> Result<T>;
}

impl<T> NotFoundExt<T> for std::result::Result<T, rusqlite::Error> {
    fn or_not_found(self, entity: &'static str, id: u64, message: &str) -> Result<T> {
        self.map_err(|e| {
            if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                JourneyError::NotFound { entity, id }
            } else {
                JourneyError::database(message).with_source(e)
            }
        })
    }
}

/// Result type alias for journey engine operations
pub type Result<T> = std::result::Result<T, JourneyError>;
