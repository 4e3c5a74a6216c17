//! Result recasting: decides the shape of a dispatch outcome.
//!
//! The per-member result set becomes one of:
//! - nothing, when every member returned `None`
//! - a plain ordered list of values, when no member object came back
//! - a list of member objects, when all of them are shared (axes)
//! - a fresh [`Ensemble`], when every result is a member object
//!
//! Mixing values and member objects is a dispatch inconsistency.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::ensemble::{Ensemble, EnsembleOptions};
use crate::error::{EnsembleError, Result};
use crate::member::{id_of, Attribute, Item, Member, TypeRegistry, DEFAULT_ID_KEY, PARENT_ID_KEY};
use crate::metrics::METRICS;
use crate::obs::emit_recast;

/// Shape of a dispatch outcome.
#[derive(Debug, Clone)]
pub enum Recast {
    /// Every member returned `None`.
    Suppressed,
    Values(Vec<Value>),
    /// Shared member objects that can not form an ensemble.
    Members(Vec<Box<dyn Member>>),
    Ensemble(Ensemble),
}

impl Recast {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Recast::Suppressed)
    }

    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            Recast::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn into_members(self) -> Option<Vec<Box<dyn Member>>> {
        match self {
            Recast::Members(members) => Some(members),
            _ => None,
        }
    }

    pub fn into_ensemble(self) -> Option<Ensemble> {
        match self {
            Recast::Ensemble(ensemble) => Some(ensemble),
            _ => None,
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Recast::Suppressed => "suppressed",
            Recast::Values(_) => "values",
            Recast::Members(_) => "members",
            Recast::Ensemble(_) => "ensemble",
        }
    }
}

/// What the recaster needs to know about the source ensemble.
#[derive(Debug, Clone)]
pub struct RecastContext<'a> {
    /// Attribute or method that produced the results.
    pub attr: &'a str,
    pub idkey: &'a str,
    pub registry: Arc<TypeRegistry>,
}

/// Classify `results` (one per entry of `originals`, same order).
///
/// When neither the result names nor their parent names are unique, the
/// id of each original member is written into the corresponding result
/// under the source ensemble's id key. Results are owned by the recast at
/// that point, so originals are never touched.
pub fn recast(
    results: Vec<Item>,
    originals: &[Box<dyn Member>],
    context: &RecastContext<'_>,
) -> Result<Recast> {
    METRICS.inc_recasts();
    let outcome = classify(results, originals, context)?;
    emit_recast(context.attr, outcome.shape());
    Ok(outcome)
}

fn classify(
    results: Vec<Item>,
    originals: &[Box<dyn Member>],
    context: &RecastContext<'_>,
) -> Result<Recast> {
    if results.is_empty() {
        return Ok(Recast::Values(Vec::new()));
    }
    if results.iter().all(Item::is_none) {
        return Ok(Recast::Suppressed);
    }

    let total = results.len();
    let member_count = results
        .iter()
        .filter(|item| matches!(item, Item::Member(_)))
        .count();

    if member_count == 0 {
        let values = results
            .into_iter()
            .filter_map(|item| match item {
                Item::Value(value) => Some(value),
                Item::Member(_) => None,
            })
            .collect();
        return Ok(Recast::Values(values));
    }
    if member_count != total {
        return Err(EnsembleError::DispatchInconsistency {
            attr: context.attr.to_string(),
            detail: format!("{member_count} of {total} results are member objects"),
        });
    }

    let mut members: Vec<Box<dyn Member>> = results
        .into_iter()
        .filter_map(|item| match item {
            Item::Member(member) => Some(member),
            Item::Value(_) => None,
        })
        .collect();

    // shared objects (axes) are often the same object behind several members
    if members.iter().all(|m| m.is_shared()) {
        return Ok(Recast::Members(members));
    }

    let basetype = members[0].type_name().to_string();
    if let Some(odd) = members
        .iter()
        .find(|m| !context.registry.conforms(m.type_name(), &basetype))
    {
        return Err(EnsembleError::DispatchInconsistency {
            attr: context.attr.to_string(),
            detail: format!(
                "resulting members have inconsistent types '{}' and '{}'",
                basetype,
                odd.type_name()
            ),
        });
    }

    let idkey = if has_unique_ids(&members, DEFAULT_ID_KEY) {
        DEFAULT_ID_KEY.to_string()
    } else if has_unique_ids(&members, PARENT_ID_KEY) {
        PARENT_ID_KEY.to_string()
    } else {
        inject_original_ids(&mut members, originals, context)?;
        context.idkey.to_string()
    };
    debug!(attr = %context.attr, idkey = %idkey, members = members.len(), "recasting results as ensemble");

    let options = EnsembleOptions::new()
        .with_basetype(&basetype)
        .with_idkey(&idkey)
        .with_registry(Arc::clone(&context.registry));
    Ensemble::new(members, options).map(Recast::Ensemble)
}

fn has_unique_ids(members: &[Box<dyn Member>], key: &str) -> bool {
    let mut seen = HashSet::with_capacity(members.len());
    members.iter().all(|member| match member.attribute(key) {
        Some(Attribute::Value(Value::String(id))) if !id.is_empty() => seen.insert(id),
        _ => false,
    })
}

fn inject_original_ids(
    members: &mut [Box<dyn Member>],
    originals: &[Box<dyn Member>],
    context: &RecastContext<'_>,
) -> Result<()> {
    if members.len() != originals.len() {
        return Err(EnsembleError::LengthMismatch {
            context: format!("recast of '{}'", context.attr),
            expected: originals.len(),
            actual: members.len(),
        });
    }
    for (result, original) in members.iter_mut().zip(originals) {
        let id = id_of(original.as_ref(), context.idkey)?;
        result
            .set_attribute(context.idkey, Value::String(id.clone()))
            .map_err(|source| EnsembleError::Member {
                id,
                method: format!("set {}", context.idkey),
                source,
            })?;
    }
    Ok(())
}
