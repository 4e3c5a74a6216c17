//! In-memory fake members (testing only)
//!
//! Provides `FakeDataset`, `FakeVariable`, `FakeAxis` and `Label` that
//! satisfy the [`Member`] contract without any file or numerical backend.

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};

use crate::member::{Attribute, Item, Member, TypeRegistry, DEFAULT_ID_KEY, PARENT_ID_KEY};
use crate::ArgMap;

/// Registry with the geographic type hierarchy: axes are variables.
pub fn geo_registry() -> TypeRegistry {
    TypeRegistry::new()
        .with_type("Dataset", None)
        .with_type("Variable", None)
        .with_type("Axis", Some("Variable"))
        .with_type("Label", None)
}

/// Look up an argument by keyword first, then by position.
fn argument<'a>(args: &'a [Value], kwargs: &'a ArgMap, pos: usize, name: &str) -> Option<&'a Value> {
    kwargs.get(name).or_else(|| args.get(pos))
}

fn string_value(value: Value, attr: &str) -> anyhow::Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => bail!("attribute '{attr}' expects a string, got {other}"),
    }
}

fn midpoint(values: &[f64]) -> Option<f64> {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => Some((first + last) / 2.0),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// FakeAxis
// ---------------------------------------------------------------------------

/// Coordinate axis; axes are shared between variables.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeAxis {
    pub name: String,
    pub coord: Vec<f64>,
}

impl FakeAxis {
    pub fn new(name: &str, coord: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            coord: coord.to_vec(),
        }
    }
}

impl Member for FakeAxis {
    fn type_name(&self) -> &str {
        "Axis"
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        match name {
            "name" => Some(Attribute::Value(json!(self.name))),
            "coord" => Some(Attribute::Value(json!(self.coord))),
            "size" => Some(Attribute::Value(json!(self.coord.len()))),
            // midpoint of the coordinate values
            "mean" => Some(Attribute::Value(json!(midpoint(&self.coord)))),
            "limits" => Some(Attribute::Method),
            _ => None,
        }
    }

    fn call(&mut self, method: &str, _args: &[Value], _kwargs: &ArgMap) -> anyhow::Result<Item> {
        match method {
            "limits" => {
                let first = self.coord.first().copied();
                let last = self.coord.last().copied();
                Ok(Item::Value(json!([first, last])))
            }
            other => bail!("axis has no method '{other}'"),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
        match name {
            "name" => self.name = string_value(value, name)?,
            other => bail!("axis attribute '{other}' is read-only"),
        }
        Ok(())
    }

    fn clone_member(&self) -> Box<dyn Member> {
        Box::new(self.clone())
    }

    fn is_shared(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// FakeVariable
// ---------------------------------------------------------------------------

/// A named data series, optionally attached to a parent dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeVariable {
    pub name: String,
    pub parent_name: Option<String>,
    pub units: String,
    pub data: Vec<f64>,
}

impl FakeVariable {
    pub fn new(name: &str, data: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            parent_name: None,
            units: "none".to_string(),
            data: data.to_vec(),
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent_name = Some(parent.to_string());
        self
    }

    pub fn mean(&self) -> Option<f64> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.iter().sum::<f64>() / self.data.len() as f64)
        }
    }
}

impl Member for FakeVariable {
    fn type_name(&self) -> &str {
        "Variable"
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        match name {
            "name" => Some(Attribute::Value(json!(self.name))),
            "parent_name" => Some(Attribute::Value(json!(self.parent_name))),
            "units" => Some(Attribute::Value(json!(self.units))),
            "data" => Some(Attribute::Value(json!(self.data))),
            "size" => Some(Attribute::Value(json!(self.data.len()))),
            "mean" | "scale" | "copy" => Some(Attribute::Method),
            _ => None,
        }
    }

    fn call(&mut self, method: &str, args: &[Value], kwargs: &ArgMap) -> anyhow::Result<Item> {
        match method {
            "mean" => Ok(Item::Value(json!(self.mean()))),
            "scale" => {
                let factor = argument(args, kwargs, 0, "factor")
                    .and_then(Value::as_f64)
                    .context("scale requires a numeric 'factor'")?;
                self.data.iter_mut().for_each(|x| *x *= factor);
                Ok(Item::none())
            }
            "copy" => {
                let mut copy = self.clone();
                if let Some(name) = argument(args, kwargs, 0, "name") {
                    copy.name = string_value(name.clone(), "name")?;
                }
                Ok(Item::Member(Box::new(copy)))
            }
            other => bail!("variable '{}' has no method '{other}'", self.name),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
        match name {
            "name" => self.name = string_value(value, name)?,
            "units" => self.units = string_value(value, name)?,
            PARENT_ID_KEY => self.parent_name = Some(string_value(value, name)?),
            other => bail!("variable attribute '{other}' can not be set"),
        }
        Ok(())
    }

    fn clone_member(&self) -> Box<dyn Member> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeDataset
// ---------------------------------------------------------------------------

/// A named collection of variables on a shared time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeDataset {
    pub name: String,
    pub title: String,
    pub loaded: bool,
    pub time: FakeAxis,
    pub variables: Vec<FakeVariable>,
}

impl FakeDataset {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: format!("Dataset {name}"),
            loaded: false,
            time: FakeAxis::new("time", &[1.0, 2.0, 3.0]),
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, name: &str, data: &[f64]) -> Self {
        self.variables.push(FakeVariable::new(name, data));
        self
    }

    /// Variable `name`, tagged with this dataset as its parent.
    pub fn variable(&self, name: &str) -> Option<FakeVariable> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.clone().with_parent(&self.name))
    }
}

impl Member for FakeDataset {
    fn type_name(&self) -> &str {
        "Dataset"
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        match name {
            "name" => Some(Attribute::Value(json!(self.name))),
            "title" => Some(Attribute::Value(json!(self.title))),
            "loaded" => Some(Attribute::Value(json!(self.loaded))),
            "variables" => Some(Attribute::Value(json!(self
                .variables
                .iter()
                .map(|v| v.name.as_str())
                .collect::<Vec<_>>()))),
            "time" => Some(Attribute::Member(Box::new(self.time.clone()))),
            "load" | "variable" | "has_variable" | "add_variable" | "remove_variable" | "mean"
            | "copy" | "rename" | "fail" => Some(Attribute::Method),
            other => self
                .variable(other)
                .map(|v| Attribute::Member(Box::new(v))),
        }
    }

    fn call(&mut self, method: &str, args: &[Value], kwargs: &ArgMap) -> anyhow::Result<Item> {
        let name_arg = || -> anyhow::Result<String> {
            let value = argument(args, kwargs, 0, "name")
                .ok_or_else(|| anyhow!("'{method}' requires a variable 'name'"))?;
            string_value(value.clone(), "name")
        };
        match method {
            "load" => {
                self.loaded = true;
                Ok(Item::none())
            }
            "variable" => {
                let name = name_arg()?;
                let var = self
                    .variable(&name)
                    .ok_or_else(|| anyhow!("dataset '{}' has no variable '{name}'", self.name))?;
                Ok(Item::Member(Box::new(var)))
            }
            "has_variable" => {
                let name = name_arg()?;
                Ok(Item::Value(json!(self.variables.iter().any(|v| v.name == name))))
            }
            "add_variable" => {
                let name = name_arg()?;
                let data: Vec<f64> = match argument(args, kwargs, 1, "data") {
                    Some(value) => serde_json::from_value(value.clone())
                        .context("'data' must be a list of numbers")?,
                    None => Vec::new(),
                };
                self.variables.push(FakeVariable::new(&name, &data));
                Ok(Item::none())
            }
            "remove_variable" => {
                let name = name_arg()?;
                let before = self.variables.len();
                self.variables.retain(|v| v.name != name);
                Ok(Item::Value(json!(self.variables.len() < before)))
            }
            "mean" => {
                let name = name_arg()?;
                let var = self
                    .variable(&name)
                    .ok_or_else(|| anyhow!("dataset '{}' has no variable '{name}'", self.name))?;
                Ok(Item::Value(json!(var.mean())))
            }
            "copy" => {
                let mut copy = self.clone();
                if let Some(name) = argument(args, kwargs, 0, "name") {
                    copy.name = string_value(name.clone(), "name")?;
                }
                Ok(Item::Member(Box::new(copy)))
            }
            "rename" => {
                self.name = name_arg()?;
                Ok(Item::none())
            }
            "fail" => bail!("dataset '{}' failed on purpose", self.name),
            other => bail!("dataset '{}' has no method '{other}'", self.name),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
        match name {
            DEFAULT_ID_KEY => self.name = string_value(value, name)?,
            "title" => self.title = string_value(value, name)?,
            "loaded" => {
                self.loaded = value
                    .as_bool()
                    .ok_or_else(|| anyhow!("'loaded' expects a boolean"))?
            }
            other => bail!("dataset attribute '{other}' can not be set"),
        }
        Ok(())
    }

    fn clone_member(&self) -> Box<dyn Member> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Label
// ---------------------------------------------------------------------------

/// A string-like member whose id is its own text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub text: String,
}

impl Label {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl Member for Label {
    fn type_name(&self) -> &str {
        "Label"
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        match name {
            "name" => Some(Attribute::Value(json!(self.text))),
            "len" => Some(Attribute::Value(json!(self.text.len()))),
            "upper" | "suffixed" | "echo" | "wait" => Some(Attribute::Method),
            _ => None,
        }
    }

    fn call(&mut self, method: &str, args: &[Value], kwargs: &ArgMap) -> anyhow::Result<Item> {
        match method {
            "upper" => Ok(Item::Value(json!(self.text.to_uppercase()))),
            "suffixed" => {
                let suffix = argument(args, kwargs, 0, "suffix")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                Ok(Item::Member(Box::new(Label::new(&format!(
                    "{}{}",
                    self.text, suffix
                )))))
            }
            // returns exactly what this member received
            "echo" => Ok(Item::Value(json!({ "args": args, "kwargs": kwargs }))),
            "wait" => {
                let millis = argument(args, kwargs, 0, "millis")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                std::thread::sleep(std::time::Duration::from_millis(millis));
                Ok(Item::Value(json!(self.text)))
            }
            other => bail!("label has no method '{other}'"),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
        match name {
            "name" => self.text = string_value(value, name)?,
            other => bail!("label attribute '{other}' can not be set"),
        }
        Ok(())
    }

    fn clone_member(&self) -> Box<dyn Member> {
        Box::new(self.clone())
    }

    fn summary(&self) -> String {
        format!("'{}'", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_exposes_variables_as_members() {
        let ds = FakeDataset::new("obs").with_variable("precip", &[1.0, 3.0]);
        match ds.attribute("precip") {
            Some(Attribute::Member(var)) => {
                assert_eq!(var.type_name(), "Variable");
                match var.attribute(PARENT_ID_KEY) {
                    Some(Attribute::Value(v)) => assert_eq!(v, json!("obs")),
                    other => panic!("unexpected parent attribute: {other:?}"),
                }
            }
            other => panic!("unexpected attribute: {other:?}"),
        }
        assert!(ds.attribute("missing").is_none());
        assert!(ds.attribute("load").unwrap().is_method());
    }

    #[test]
    fn test_variable_scale_mutates_data() {
        let mut var = FakeVariable::new("t2m", &[1.0, 2.0]);
        let kwargs: ArgMap = [("factor".to_string(), json!(2.0))].into_iter().collect();
        var.call("scale", &[], &kwargs).unwrap();
        assert_eq!(var.data, vec![2.0, 4.0]);
        assert!(var.call("scale", &[], &ArgMap::new()).is_err());
    }

    #[test]
    fn test_label_echo_reports_arguments() {
        let mut label = Label::new("A");
        let out = label.call("echo", &[json!(1)], &ArgMap::new()).unwrap();
        match out {
            Item::Value(v) => assert_eq!(v["args"], json!([1])),
            Item::Member(_) => panic!("echo returns a value"),
        }
    }

    #[test]
    fn test_geo_registry_axis_is_variable() {
        let registry = geo_registry();
        assert!(registry.conforms("Axis", "Variable"));
        assert!(!registry.conforms("Dataset", "Variable"));
    }
}
