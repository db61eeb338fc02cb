use super::domain::UnknownValue;
use super::repository::RepositoryError;
use crate::auth::AuthError;

/// Error raised by the clearance workflow.
#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
    #[error("authentication required: {0}")]
    Unauthenticated(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl ClearanceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

impl From<RepositoryError> for ClearanceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(detail) => Self::Conflict(detail),
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::StaleState(detail) => Self::InvalidTransition(detail),
            RepositoryError::Unavailable(detail) => Self::Unavailable(detail),
        }
    }
}

impl From<UnknownValue> for ClearanceError {
    fn from(value: UnknownValue) -> Self {
        Self::InvalidArgument(value.to_string())
    }
}

impl From<AuthError> for ClearanceError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials
            | AuthError::TokenExpired
            | AuthError::TokenInvalid(_) => Self::Unauthenticated(value.to_string()),
            AuthError::Crypto(detail) => Self::UpstreamFailure(detail),
        }
    }
}
