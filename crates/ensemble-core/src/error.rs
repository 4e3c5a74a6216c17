//! Error taxonomy for ensemble construction and dispatch.

use ensemble_expand::ExpandError;

/// Coarse error classification, stable across variants that carry extra
/// context (e.g. expansion errors surfacing through a dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    TypeMismatch,
    LengthMismatch,
    Identity,
    DispatchInconsistency,
    Membership,
    /// A member, loader or worker failed while executing.
    Execution,
}

/// Ensemble errors.
#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("length mismatch in {context}: expected {expected}, got {actual}")]
    LengthMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("identity error: {0}")]
    Identity(String),

    #[error("inconsistent attribute type '{attr}': {detail}")]
    DispatchInconsistency { attr: String, detail: String },

    #[error("membership error for '{key}': {reason}")]
    Membership { key: String, reason: String },

    #[error("argument expansion failed: {0}")]
    Expand(#[from] ExpandError),

    #[error("member '{id}' failed in '{method}': {source}")]
    Member {
        id: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("loader failed for argument set {index}: {source}")]
    Load {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("{} of {submitted} parallel work units failed: {}", .failures.len(), .failures.join("; "))]
    Worker {
        submitted: usize,
        failures: Vec<String>,
    },
}

impl EnsembleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnsembleError::Configuration(_) => ErrorKind::Configuration,
            EnsembleError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            EnsembleError::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            EnsembleError::Identity(_) => ErrorKind::Identity,
            EnsembleError::DispatchInconsistency { .. } => ErrorKind::DispatchInconsistency,
            EnsembleError::Membership { .. } => ErrorKind::Membership,
            EnsembleError::Expand(e) => match e {
                ExpandError::Configuration(_) => ErrorKind::Configuration,
                ExpandError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
                ExpandError::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            },
            EnsembleError::Member { .. } | EnsembleError::Load { .. } | EnsembleError::Worker { .. } => {
                ErrorKind::Execution
            }
        }
    }

    pub(crate) fn membership(key: impl Into<String>, reason: impl Into<String>) -> Self {
        EnsembleError::Membership {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        EnsembleError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type for ensemble operations.
pub type Result<T> = std::result::Result<T, EnsembleError>;
