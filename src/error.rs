use thiserror::Error;

/// Failure kinds surfaced by the stores and the allocation engine.
///
/// Preconditions are checked in a fixed order per operation, so the first
/// failing check determines which variant the caller sees.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("operation not permitted")]
    Forbidden,

    #[error("pending request limit reached ({0})")]
    LimitExceeded(usize),

    #[error("conflict: {0}")]
    Conflict(#[from] Conflict),
}

/// Reasons a well-formed transition cannot proceed.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Conflict {
    #[error("requester is already committed to another team")]
    CommittedElsewhere,

    #[error("project team is full")]
    TeamFull,

    #[error("cohort mismatch: team is from {team}, requester is from {requester}")]
    CohortMismatch { team: String, requester: String },

    #[error("entity is held by a concurrent operation, retry")]
    Busy,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
