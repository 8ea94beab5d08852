use ulid::Ulid;

use crate::model::Span;

use super::validation::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("invalid submission: {0}")]
    Validation(ValidationErrors),
    #[error("[{}, {}) overlaps approved request {conflicting}", .span.start, .span.end)]
    Overlap { span: Span, conflicting: Ulid },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl From<ValidationErrors> for EngineError {
    fn from(errors: ValidationErrors) -> Self {
        EngineError::Validation(errors)
    }
}
