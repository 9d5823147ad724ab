use std::fmt;

use super::domain::{Amount, GradeLevel, SchoolYear};
use super::repository::{GradeSourceError, RepositoryError};

/// Business-rule and collaborator failures surfaced by every ledger operation.
///
/// Rule violations are detected before anything is written, so an `Err` always means the
/// ledger is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(
        "tuition for {level} in {school_year} is already {existing}; refusing {attempted}"
    )]
    Conflict {
        level: GradeLevel,
        school_year: SchoolYear,
        existing: Amount,
        attempted: Amount,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(
        "reinscription blocked by arrears: {school_year} still owes {reliquat}, settlement supplied {supplied}"
    )]
    BlockedByArrears {
        school_year: SchoolYear,
        reliquat: Amount,
        supplied: Amount,
    },
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Grades(#[from] GradeSourceError),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable tag for API payloads.
    pub const fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::Conflict { .. } => "conflict_error",
            LedgerError::InvalidState(_) => "invalid_state_error",
            LedgerError::BlockedByArrears { .. } => "blocked_by_arrears_error",
            LedgerError::NotFound { .. } => "not_found_error",
            LedgerError::Repository(_) | LedgerError::Grades(_) => "internal_error",
        }
    }
}
