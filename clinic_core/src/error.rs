//! Error types for the clinic_core library.

use std::fmt;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of record an error refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Treatment,
    TreatmentType,
    Patient,
    Clinician,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Treatment => "treatment",
            EntityKind::TreatmentType => "treatment type",
            EntityKind::Patient => "patient",
            EntityKind::Clinician => "clinician",
        };
        f.write_str(name)
    }
}

/// Coarse classification of an [`Error`], used by callers to decide
/// whether to retry, pick a different target, or give up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Persisted medium unreadable/unwritable or holding bad records
    Storage,
    /// Referenced id does not exist
    NotFound,
    /// Treatment status does not permit the operation
    InvalidState,
    /// Caller supplied an illegal value
    Validation,
    /// Configuration could not be loaded
    Config,
}

/// Core error type for clinic_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A persisted record could not be parsed
    #[error("malformed record in {collection} at line {line}: {reason}")]
    Malformed {
        collection: &'static str,
        line: u64,
        reason: String,
    },

    /// Persisted collections disagree with each other
    #[error("inconsistent {collection}: {reason}")]
    Inconsistent {
        collection: &'static str,
        reason: String,
    },

    /// Referenced record does not exist
    #[error("{kind} {id} not found (while trying to {operation})")]
    NotFound {
        kind: EntityKind,
        id: String,
        operation: &'static str,
    },

    /// Operation not permitted in the treatment's current state
    #[error("cannot {operation} treatment {id}: {reason}")]
    InvalidState {
        id: String,
        operation: &'static str,
        reason: String,
    },

    /// Rejected input value
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: &str, operation: &'static str) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
            operation,
        }
    }

    pub(crate) fn invalid_state(id: &str, operation: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidState {
            id: id.to_string(),
            operation,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Json(_)
            | Error::Csv(_)
            | Error::Malformed { .. }
            | Error::Inconsistent { .. } => ErrorKind::Storage,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Toml(_) | Error::Config(_) => ErrorKind::Config,
        }
    }
}
