//! Error types for Orgmigrate.
//!
//! All errors are represented by the `MigrateError` enum. Per-record failures
//! during execution are not errors of this type: they are captured as
//! [`RecordError`](crate::RecordError)s inside the migration result.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Orgmigrate operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum MigrateError {
    /// Engine-level errors (wiring, missing collaborators).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML, row decoding).
    #[error("{0}")]
    Convert(String),

    /// Relationship catalog lookups failed.
    #[error("{0}")]
    Catalog(String),

    /// Reading from the source organization failed.
    #[error("{0}")]
    Source(String),

    /// A target store call was rejected.
    #[error("{0}")]
    Store(String),

    /// The target store cannot be reached at all. Fatal to the session.
    #[error("target store unreachable: {0}")]
    Unreachable(String),

    /// Distinct object types depend on each other through include edges.
    #[error("cyclic dependency between object types: {}", object_types.join(", "))]
    CyclicDependency {
        object_types: Vec<String>,
    },

    /// Plan construction errors other than cycles.
    #[error("{0}")]
    Plan(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),
}

impl MigrateError {
    /// Whether the error must stop the whole session rather than one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MigrateError::Unreachable(_))
    }
}

impl From<MigrateError> for String {
    fn from(val: MigrateError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for MigrateError {
    fn from(error: std::io::Error) -> Self {
        MigrateError::IoError(error.to_string())
    }
}

impl From<MigrateError> for std::io::Error {
    fn from(val: MigrateError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for MigrateError {
    fn from(_: FromUtf8Error) -> Self {
        MigrateError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for MigrateError {
    fn from(error: serde_json::Error) -> Self {
        MigrateError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for MigrateError {
    fn from(error: toml::de::Error) -> Self {
        MigrateError::Config(error.to_string())
    }
}

impl From<globset::Error> for MigrateError {
    fn from(error: globset::Error) -> Self {
        MigrateError::Config(error.to_string())
    }
}

impl From<regex::Error> for MigrateError {
    fn from(error: regex::Error) -> Self {
        MigrateError::Config(error.to_string())
    }
}

impl From<sqlx::Error> for MigrateError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                MigrateError::Unreachable(error.to_string())
            }
            _ => MigrateError::Store(error.to_string()),
        }
    }
}
