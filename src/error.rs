//! Error types for next-ledger.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unable to read {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no item for location={location} treatment={treatment}")]
    NotFound { location: String, treatment: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("failed to {action} (treatment={treatment}): {source}")]
    Query {
        action: &'static str,
        treatment: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to {action} (treatment={treatment}, location={location}): {source}")]
    Write {
        action: &'static str,
        treatment: String,
        location: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure class, used for exit codes and log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments or malformed input.
    Validation,
    /// Unreadable file or unavailable store path.
    Resource,
    /// Storage engine failure.
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::NotFound { .. } | Error::Config(_) => {
                ErrorKind::Validation
            }
            Error::Resource { .. } => ErrorKind::Resource,
            Error::Storage(sqlx::Error::Io(_)) => ErrorKind::Resource,
            Error::Storage(_)
            | Error::Query { .. }
            | Error::Write { .. }
            | Error::Migration(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Internal => 1,
            ErrorKind::Validation => 2,
            ErrorKind::Resource => 3,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
