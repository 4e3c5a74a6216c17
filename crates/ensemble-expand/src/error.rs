//! Error types for ensemble-expand

use thiserror::Error;

/// Errors raised while turning expansion directives into argument lists
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    /// Conflicting or malformed directives
    #[error("Invalid expansion directives: {0}")]
    Configuration(String),

    /// A value selected for expansion is not a sequence, or a directive
    /// entry has an unsupported shape
    #[error("Argument '{name}' has the wrong type: expected {expected}")]
    TypeMismatch { name: String, expected: String },

    /// Sequences that must advance together have different lengths
    #[error("Length mismatch in {context}: {detail}")]
    LengthMismatch { context: String, detail: String },
}

impl ExpandError {
    pub(crate) fn not_a_sequence(name: &str) -> Self {
        ExpandError::TypeMismatch {
            name: name.to_string(),
            expected: "a list of values".to_string(),
        }
    }
}
