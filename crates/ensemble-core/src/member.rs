//! Member capability surface and type registry.
//!
//! Members are domain objects (datasets, variables, axes, ...) reached only
//! through the [`Member`] trait: generic attribute access by name, method
//! invocation by name, and a type tag checked against the ensemble's
//! basetype via an explicit [`TypeRegistry`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EnsembleError, Result};
use crate::ArgMap;

/// Attribute names that hold the conventional member name and the name of
/// the parent container (e.g. the dataset a variable belongs to).
pub const DEFAULT_ID_KEY: &str = "name";
pub const PARENT_ID_KEY: &str = "parent_name";

/// A domain object that can be held by an [`Ensemble`](crate::Ensemble).
pub trait Member: fmt::Debug + Send + 'static {
    /// Type tag used for basetype conformance.
    fn type_name(&self) -> &str;

    /// Resolve an attribute by name; `None` when the member has no such
    /// attribute.
    fn attribute(&self, name: &str) -> Option<Attribute>;

    /// Invoke the method `method`.
    fn call(&mut self, method: &str, args: &[Value], kwargs: &ArgMap) -> anyhow::Result<Item>;

    /// Overwrite (or create) a plain attribute.
    fn set_attribute(&mut self, name: &str, value: Value) -> anyhow::Result<()>;

    fn clone_member(&self) -> Box<dyn Member>;

    /// Shared objects (e.g. axes referenced by several variables) are never
    /// re-wrapped into an ensemble of their own.
    fn is_shared(&self) -> bool {
        false
    }

    /// One-line description.
    fn summary(&self) -> String {
        match self.attribute(DEFAULT_ID_KEY) {
            Some(Attribute::Value(Value::String(name))) => {
                format!("{} '{}'", self.type_name(), name)
            }
            _ => self.type_name().to_string(),
        }
    }
}

impl Clone for Box<dyn Member> {
    fn clone(&self) -> Self {
        self.clone_member()
    }
}

/// A resolved member attribute.
#[derive(Debug, Clone)]
pub enum Attribute {
    Value(Value),
    /// A child container object (e.g. a variable of a dataset).
    Member(Box<dyn Member>),
    /// The name refers to a callable method.
    Method,
}

impl Attribute {
    pub fn is_method(&self) -> bool {
        matches!(self, Attribute::Method)
    }
}

/// Outcome of one per-member attribute read or method call.
#[derive(Debug, Clone)]
pub enum Item {
    Value(Value),
    Member(Box<dyn Member>),
}

impl Item {
    /// The `None` outcome.
    pub fn none() -> Self {
        Item::Value(Value::Null)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Item::Value(Value::Null))
    }

    pub fn as_member(&self) -> Option<&dyn Member> {
        match self {
            Item::Member(member) => Some(member.as_ref()),
            Item::Value(_) => None,
        }
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Item::Value(value)
    }
}

impl From<Box<dyn Member>> for Item {
    fn from(member: Box<dyn Member>) -> Self {
        Item::Member(member)
    }
}

/// Read the id-key attribute of `member` as a non-empty string.
pub fn id_of(member: &dyn Member, idkey: &str) -> Result<String> {
    match member.attribute(idkey) {
        Some(Attribute::Value(Value::String(id))) if !id.is_empty() => Ok(id),
        Some(Attribute::Value(Value::String(_))) => Err(EnsembleError::Identity(format!(
            "{} has an empty id key '{}'",
            member.type_name(),
            idkey
        ))),
        Some(other) => Err(EnsembleError::Identity(format!(
            "member id key '{}' should be a string, found {:?}",
            idkey, other
        ))),
        None => Err(EnsembleError::Identity(format!(
            "{} has no id key attribute '{}'",
            member.type_name(),
            idkey
        ))),
    }
}

/// A registered member type and its parent type, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub parent: Option<String>,
}

/// Explicit name → type mapping used for basetype checks.
///
/// A type conforms to a basetype when it is the basetype or one of its
/// registered descendants. Unregistered types only conform to themselves.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, optionally as a subtype of `parent`.
    pub fn with_type(mut self, name: &str, parent: Option<&str>) -> Self {
        self.register(name, parent);
        self
    }

    pub fn register(&mut self, name: &str, parent: Option<&str>) {
        self.types.insert(
            name.to_string(),
            TypeDescriptor {
                name: name.to_string(),
                parent: parent.map(str::to_string),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn conforms(&self, type_name: &str, basetype: &str) -> bool {
        let mut current = Some(type_name);
        // bounded walk guards against cyclic registrations
        for _ in 0..=self.types.len() {
            match current {
                Some(name) if name == basetype => return true,
                Some(name) => {
                    current = self
                        .types
                        .get(name)
                        .and_then(|descriptor| descriptor.parent.as_deref());
                }
                None => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeVariable, Label};

    #[test]
    fn test_registry_conformance_follows_parents() {
        let registry = TypeRegistry::new()
            .with_type("Variable", None)
            .with_type("Axis", Some("Variable"))
            .with_type("TimeAxis", Some("Axis"));

        assert!(registry.conforms("TimeAxis", "Variable"));
        assert!(registry.conforms("Axis", "Axis"));
        assert!(!registry.conforms("Variable", "Axis"));
        assert!(registry.conforms("Unregistered", "Unregistered"));
        assert!(!registry.conforms("Unregistered", "Variable"));
    }

    #[test]
    fn test_registry_survives_cycles() {
        let registry = TypeRegistry::new()
            .with_type("A", Some("B"))
            .with_type("B", Some("A"));
        assert!(!registry.conforms("A", "C"));
        assert!(registry.conforms("A", "B"));
    }

    #[test]
    fn test_id_of_requires_non_empty_string() {
        let label = Label::new("A");
        assert_eq!(id_of(&label, "name").unwrap(), "A");

        let empty = Label::new("");
        assert!(matches!(
            id_of(&empty, "name"),
            Err(EnsembleError::Identity(_))
        ));

        let var = FakeVariable::new("precip", &[1.0, 2.0]);
        // numeric attribute is not a usable id
        assert!(matches!(id_of(&var, "size"), Err(EnsembleError::Identity(_))));
        assert!(matches!(
            id_of(&var, "no_such_attribute"),
            Err(EnsembleError::Identity(_))
        ));
    }

    #[test]
    fn test_item_none() {
        assert!(Item::none().is_none());
        assert!(!Item::from(Value::from(1)).is_none());
    }
}
