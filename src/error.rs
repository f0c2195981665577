// Typed errors returned by the task store

use thiserror::Error;

/// Failures surfaced to callers of [`crate::TaskStore`]
///
/// None of these are fatal: after any error the store and its subscribers
/// are left at the last committed state.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation referenced a record that does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A field failed validation before anything was written
    #[error("validation failed for {field}: {reason}")]
    ValidationFailed { field: &'static str, reason: String },

    /// The durable commit failed and was rolled back
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// A subscriber received events out of protocol order
    #[error("change protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn task_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "task",
            id: id.to_string(),
        }
    }

    pub(crate) fn group_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "group",
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::ValidationFailed {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::ValidationFailed { .. })
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::PersistenceFailure(_))
    }
}

impl From<eyre::Report> for Error {
    fn from(report: eyre::Report) -> Self {
        Error::PersistenceFailure(format!("{:#}", report))
    }
}
