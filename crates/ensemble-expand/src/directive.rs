//! Expansion directives: which keyword arguments get expanded, and how.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ExpandError;

/// One slot of an outer (Cartesian) product.
///
/// A `Parallel` slot names several arguments that advance in lock-step; it
/// contributes its shared length to the product exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OuterSlot {
    Single(String),
    Parallel(Vec<String>),
}

impl OuterSlot {
    pub fn single(name: impl Into<String>) -> Self {
        OuterSlot::Single(name.into())
    }

    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OuterSlot::Parallel(names.into_iter().map(Into::into).collect())
    }

    /// Argument names covered by this slot, in declaration order.
    pub fn names(&self) -> &[String] {
        match self {
            OuterSlot::Single(name) => std::slice::from_ref(name),
            OuterSlot::Parallel(names) => names,
        }
    }
}

impl From<&str> for OuterSlot {
    fn from(name: &str) -> Self {
        OuterSlot::Single(name.to_string())
    }
}

impl From<String> for OuterSlot {
    fn from(name: String) -> Self {
        OuterSlot::Single(name)
    }
}

impl TryFrom<&Value> for OuterSlot {
    type Error = ExpandError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(name) => Ok(OuterSlot::Single(name.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name.clone()),
                    other => Err(ExpandError::TypeMismatch {
                        name: other.to_string(),
                        expected: "an argument name".to_string(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(OuterSlot::Parallel),
            other => Err(ExpandError::TypeMismatch {
                name: other.to_string(),
                expected: "an argument name or a list of argument names".to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for OuterSlot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        OuterSlot::try_from(&value).map_err(serde::de::Error::custom)
    }
}

/// Product used when legacy expansion names are redirected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ProductMode {
    Inner,
    #[default]
    Outer,
}

impl FromStr for ProductMode {
    type Err = ExpandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(ProductMode::Inner),
            "outer" => Ok(ProductMode::Outer),
            other => Err(ExpandError::Configuration(format!(
                "unsupported product mode '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for ProductMode {
    type Error = ExpandError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ProductMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductMode::Inner => write!(f, "inner"),
            ProductMode::Outer => write!(f, "outer"),
        }
    }
}

/// Complete set of expansion directives for one call.
///
/// `None` means "not supplied", which matters for the legacy path: `legacy`
/// may not be combined with an explicit `inner` or `outer` list, even an
/// empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expansion {
    pub inner: Option<Vec<String>>,
    pub outer: Option<Vec<OuterSlot>>,
    #[serde(alias = "expand")]
    pub legacy: Option<Vec<OuterSlot>>,
    pub mode: ProductMode,
}

impl Expansion {
    /// No expansion at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn inner<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::none().with_inner(names)
    }

    pub fn outer<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OuterSlot>,
    {
        Self::none().with_outer(slots)
    }

    /// Legacy form: one list of names, redirected by `mode`.
    pub fn legacy<I, S>(slots: I, mode: ProductMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OuterSlot>,
    {
        Expansion {
            legacy: Some(slots.into_iter().map(Into::into).collect()),
            mode,
            ..Self::default()
        }
    }

    pub fn with_inner<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_outer<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OuterSlot>,
    {
        self.outer = Some(slots.into_iter().map(Into::into).collect());
        self
    }

    /// `true` when any directive was supplied, even an empty one.
    pub fn is_requested(&self) -> bool {
        self.inner.is_some() || self.outer.is_some() || self.legacy.is_some()
    }

    /// `true` when at least one directive names an argument.
    pub fn names_anything(&self) -> bool {
        let non_empty = |list: &Option<Vec<OuterSlot>>| list.as_ref().is_some_and(|l| !l.is_empty());
        non_empty(&self.outer)
            || non_empty(&self.legacy)
            || self.inner.as_ref().is_some_and(|l| !l.is_empty())
    }

    /// Redirect the legacy list into `inner` or `outer`, returning the
    /// resolved `(inner, outer)` pair.
    pub fn resolve(&self) -> Result<(Vec<String>, Vec<OuterSlot>), ExpandError> {
        let Some(legacy) = &self.legacy else {
            return Ok((
                self.inner.clone().unwrap_or_default(),
                self.outer.clone().unwrap_or_default(),
            ));
        };
        if self.inner.is_some() || self.outer.is_some() {
            return Err(ExpandError::Configuration(
                "legacy expansion list can not be mixed with inner or outer lists".to_string(),
            ));
        }
        match self.mode {
            ProductMode::Outer => Ok((Vec::new(), legacy.clone())),
            ProductMode::Inner => {
                let inner = legacy
                    .iter()
                    .map(|slot| match slot {
                        OuterSlot::Single(name) => Ok(name.clone()),
                        OuterSlot::Parallel(names) => Err(ExpandError::TypeMismatch {
                            name: names.join(","),
                            expected: "a single argument name for inner expansion".to_string(),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((inner, Vec::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_mode_parses_case_insensitively() {
        assert_eq!("Inner".parse::<ProductMode>().unwrap(), ProductMode::Inner);
        assert_eq!("OUTER".parse::<ProductMode>().unwrap(), ProductMode::Outer);
        let err = "diagonal".parse::<ProductMode>().unwrap_err();
        assert!(matches!(err, ExpandError::Configuration(_)));
    }

    #[test]
    fn test_outer_slot_from_json_shapes() {
        assert_eq!(
            OuterSlot::try_from(&json!("arg1")).unwrap(),
            OuterSlot::single("arg1")
        );
        assert_eq!(
            OuterSlot::try_from(&json!(["arg1", "arg2"])).unwrap(),
            OuterSlot::parallel(["arg1", "arg2"])
        );
        assert!(matches!(
            OuterSlot::try_from(&json!(42)),
            Err(ExpandError::TypeMismatch { .. })
        ));
        assert!(matches!(
            OuterSlot::try_from(&json!(["arg1", 3])),
            Err(ExpandError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_expansion_deserializes_from_config() {
        let expansion: Expansion = serde_json::from_value(json!({
            "outer": [["arg1", "arg2"], "arg3"],
            "inner": ["arg4"]
        }))
        .unwrap();
        assert_eq!(
            expansion.outer.unwrap(),
            vec![OuterSlot::parallel(["arg1", "arg2"]), OuterSlot::single("arg3")]
        );
        assert_eq!(expansion.inner.unwrap(), vec!["arg4".to_string()]);
        assert_eq!(expansion.mode, ProductMode::Outer);

        let bad: Result<Expansion, _> = serde_json::from_value(json!({ "outer": [1.5] }));
        assert!(bad.is_err());
        let bad_mode: Result<Expansion, _> =
            serde_json::from_value(json!({ "expand": ["a"], "mode": "sideways" }));
        assert!(bad_mode.is_err());
    }

    #[test]
    fn test_legacy_redirects_by_mode() {
        let (inner, outer) = Expansion::legacy(["a", "b"], ProductMode::Inner)
            .resolve()
            .unwrap();
        assert_eq!(inner, vec!["a".to_string(), "b".to_string()]);
        assert!(outer.is_empty());

        let (inner, outer) = Expansion::legacy(["a"], ProductMode::Outer).resolve().unwrap();
        assert!(inner.is_empty());
        assert_eq!(outer, vec![OuterSlot::single("a")]);
    }

    #[test]
    fn test_legacy_mixed_with_explicit_lists_is_rejected() {
        let expansion = Expansion::legacy(["a"], ProductMode::Outer).with_inner(["b"]);
        assert!(matches!(
            expansion.resolve(),
            Err(ExpandError::Configuration(_))
        ));
    }

    #[test]
    fn test_parallel_group_cannot_be_inner() {
        let expansion = Expansion::legacy(
            vec![OuterSlot::parallel(["a", "b"])],
            ProductMode::Inner,
        );
        assert!(matches!(
            expansion.resolve(),
            Err(ExpandError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_requested_versus_naming() {
        assert!(!Expansion::none().is_requested());
        let empty = Expansion::inner(Vec::<String>::new());
        assert!(empty.is_requested());
        assert!(!empty.names_anything());
        assert!(Expansion::outer(["x"]).names_anything());
    }
}
