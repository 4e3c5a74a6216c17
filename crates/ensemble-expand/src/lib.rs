//! Ensemble-Expand: argument list expansion for ensemble fan-out
//!
//! Turns one set of keyword arguments plus expansion directives into an
//! ordered list of fully resolved argument maps, one per call.
//!
//! ## Layer 0 - Pure expansion
//!
//! No knowledge of ensembles or members; the dispatcher and the batch loader
//! in `ensemble-core` both drive their fan-out from here.
//!
//! ## Key Components
//!
//! - `expand_arguments`: inner, outer and parallel-outer expansion
//! - `Expansion`, `OuterSlot`, `ProductMode`: the directives
//! - `ExpandError`: configuration, type and length failures

mod directive;
mod error;
mod expand;

use std::collections::BTreeMap;

use serde_json::Value;

pub use directive::{Expansion, OuterSlot, ProductMode};
pub use error::ExpandError;
pub use expand::expand_arguments;

/// Keyword arguments: parameter name to scalar or sequence value.
pub type ArgMap = BTreeMap<String, Value>;

/// Result type for expansion operations
pub type Result<T> = std::result::Result<T, ExpandError>;

/// Convert a JSON object into an [`ArgMap`].
pub fn to_arg_map(value: Value) -> Result<ArgMap> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ExpandError::TypeMismatch {
            name: other.to_string(),
            expected: "an object of keyword arguments".to_string(),
        }),
    }
}
