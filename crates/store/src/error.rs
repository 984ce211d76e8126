use thiserror::Error;

use crate::types::{MovieId, UserId};

/// The single tagged-failure type produced by the Store and threaded up through
/// every other crate. `code()` gives the transport layer a mechanical mapping to
/// the SCREAMING_SNAKE error codes without this crate knowing anything about HTTP.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("movie {0} not found")]
    MovieNotFound(MovieId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("movie {0} has no embedding")]
    EmbeddingNotFound(MovieId),

    #[error("user {0} has no profile")]
    ProfileNotFound(UserId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::MovieNotFound(_) => "MOVIE_NOT_FOUND",
            DomainError::UserNotFound(_) => "USER_NOT_FOUND",
            DomainError::EmbeddingNotFound(_) => "EMBEDDING_NOT_FOUND",
            DomainError::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            DomainError::InvalidArgument(_) => "INVALID_ARGUMENT",
            DomainError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            DomainError::IndexUnavailable(_) | DomainError::Internal(_) => "INTERNAL",
        }
    }

    /// Only `Internal` and exhausted `Transient` failures are error-severity; everything
    /// else is an expected, typed outcome and should log at debug/info.
    pub fn is_internal(&self) -> bool {
        matches!(self, DomainError::Internal(_) | DomainError::IndexUnavailable(_))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Internal(err.to_string())
    }
}
