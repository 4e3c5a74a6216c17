//! The ensemble container.
//!
//! Holds an ordered list of same-basetype members, each identified by the
//! string value of its id-key attribute. The id → position index lives in
//! its own map and is rebuilt after every mutation.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatch::{BoundDispatcher, Dispatch};
use crate::error::{EnsembleError, Result};
use crate::member::{id_of, Attribute, Item, Member, TypeRegistry, DEFAULT_ID_KEY};
use crate::recast::{recast, Recast, RecastContext};
use crate::ArgMap;

/// Ensemble attribute names that member ids and broadcast attributes may
/// not shadow.
pub const RESERVED_NAMES: &[&str] = &[
    "members", "index", "basetype", "idkey", "name", "title", "extra", "registry", "len",
];

/// Construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleOptions {
    /// Defaults to the type of the first member.
    pub basetype: Option<String>,
    pub idkey: String,
    pub name: String,
    pub title: String,
    /// Additional ensemble-level attributes.
    pub extra: ArgMap,
    #[serde(skip)]
    pub registry: Arc<TypeRegistry>,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            basetype: None,
            idkey: DEFAULT_ID_KEY.to_string(),
            name: String::new(),
            title: String::new(),
            extra: ArgMap::new(),
            registry: Arc::new(TypeRegistry::new()),
        }
    }
}

impl EnsembleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_basetype(mut self, basetype: &str) -> Self {
        self.basetype = Some(basetype.to_string());
        self
    }

    pub fn with_idkey(mut self, idkey: &str) -> Self {
        self.idkey = idkey.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }
}

/// A member given either by id or as an object.
#[derive(Debug, Clone, Copy)]
pub enum MemberRef<'a> {
    Key(&'a str),
    Instance(&'a dyn Member),
}

impl<'a> From<&'a str> for MemberRef<'a> {
    fn from(key: &'a str) -> Self {
        MemberRef::Key(key)
    }
}

impl<'a> From<&'a String> for MemberRef<'a> {
    fn from(key: &'a String) -> Self {
        MemberRef::Key(key.as_str())
    }
}

impl<'a> From<&'a dyn Member> for MemberRef<'a> {
    fn from(member: &'a dyn Member) -> Self {
        MemberRef::Instance(member)
    }
}

/// Item selection for [`Ensemble::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Key(String),
    /// Negative positions count from the end.
    Index(isize),
    Range(Range<usize>),
    Many(Vec<Selector>),
}

impl From<&str> for Selector {
    fn from(key: &str) -> Self {
        Selector::Key(key.to_string())
    }
}

impl From<String> for Selector {
    fn from(key: String) -> Self {
        Selector::Key(key)
    }
}

impl From<isize> for Selector {
    fn from(position: isize) -> Self {
        Selector::Index(position)
    }
}

impl From<Range<usize>> for Selector {
    fn from(range: Range<usize>) -> Self {
        Selector::Range(range)
    }
}

impl<T: Into<Selector>> From<Vec<T>> for Selector {
    fn from(items: Vec<T>) -> Self {
        Selector::Many(items.into_iter().map(Into::into).collect())
    }
}

/// Result of [`Ensemble::get`].
#[derive(Debug)]
pub enum Selection<'a> {
    Member(&'a dyn Member),
    Members(&'a [Box<dyn Member>]),
    Ensemble(Ensemble),
    /// Plain attribute dispatched across all members.
    Attribute(Recast),
}

impl<'a> Selection<'a> {
    pub fn into_member(self) -> Option<&'a dyn Member> {
        match self {
            Selection::Member(member) => Some(member),
            _ => None,
        }
    }

    pub fn into_ensemble(self) -> Option<Ensemble> {
        match self {
            Selection::Ensemble(ensemble) => Some(ensemble),
            _ => None,
        }
    }

    pub fn into_attribute(self) -> Option<Recast> {
        match self {
            Selection::Attribute(recast) => Some(recast),
            _ => None,
        }
    }
}

/// An ordered, id-indexed collection of same-basetype members.
#[derive(Debug, Clone)]
pub struct Ensemble {
    pub(crate) members: Vec<Box<dyn Member>>,
    index: HashMap<String, usize>,
    basetype: String,
    pub(crate) idkey: String,
    name: String,
    title: String,
    extra: ArgMap,
    pub(crate) registry: Arc<TypeRegistry>,
}

impl Ensemble {
    /// Build an ensemble from `members`.
    ///
    /// The basetype defaults to the first member's type; an empty member
    /// list therefore needs an explicit basetype.
    pub fn new(members: Vec<Box<dyn Member>>, options: EnsembleOptions) -> Result<Self> {
        let basetype = match options.basetype {
            Some(basetype) => basetype,
            None => members
                .first()
                .map(|m| m.type_name().to_string())
                .ok_or_else(|| {
                    EnsembleError::Configuration(
                        "can not infer the basetype of an empty ensemble".to_string(),
                    )
                })?,
        };
        if let Some(key) = options
            .extra
            .keys()
            .find(|key| RESERVED_NAMES.contains(&key.as_str()))
        {
            return Err(EnsembleError::Identity(format!(
                "extra attribute '{key}' shadows a reserved ensemble attribute"
            )));
        }

        let mut ensemble = Ensemble {
            members: Vec::with_capacity(members.len()),
            index: HashMap::with_capacity(members.len()),
            basetype,
            idkey: options.idkey,
            name: options.name,
            title: options.title,
            extra: options.extra,
            registry: options.registry,
        };
        for member in members {
            ensemble.check_type(member.as_ref())?;
            let id = ensemble.check_new_id(member.as_ref())?;
            ensemble.index.insert(id, ensemble.members.len());
            ensemble.members.push(member);
        }
        debug!(
            ensemble = %ensemble.name,
            basetype = %ensemble.basetype,
            members = ensemble.members.len(),
            "ensemble created"
        );
        Ok(ensemble)
    }

    /// Same as [`Ensemble::new`] for a vector of concrete members.
    pub fn from_members<M: Member>(members: Vec<M>, options: EnsembleOptions) -> Result<Self> {
        let boxed = members
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn Member>)
            .collect();
        Self::new(boxed, options)
    }

    pub fn basetype(&self) -> &str {
        &self.basetype
    }

    pub fn idkey(&self) -> &str {
        &self.idkey
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn extra(&self) -> &ArgMap {
        &self.extra
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Box<dyn Member>] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Member> + '_ {
        self.members.iter().map(|m| m.as_ref())
    }

    /// Member ids in member order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids = vec![String::new(); self.members.len()];
        for (id, &position) in &self.index {
            if let Some(slot) = ids.get_mut(position) {
                slot.clone_from(id);
            }
        }
        ids
    }

    /// Index lookup only; use [`Ensemble::has`] for the checked variant.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Whether the member (by id or instance) is in the ensemble.
    ///
    /// List and index are cross-checked; any disagreement is a
    /// membership error.
    pub fn has<'a>(&self, member: impl Into<MemberRef<'a>>) -> Result<bool> {
        match member.into() {
            MemberRef::Key(key) => self.has_key(key),
            MemberRef::Instance(member) => {
                self.check_type(member)?;
                let id = id_of(member, &self.idkey)?;
                if !self.has_key(&id)? {
                    return Ok(false);
                }
                if self.holds(&id, member) {
                    Ok(true)
                } else {
                    Err(EnsembleError::membership(
                        id,
                        "a different member holds this id",
                    ))
                }
            }
        }
    }

    /// Whether the member indexed under `id` is this very object.
    fn holds(&self, id: &str, member: &dyn Member) -> bool {
        self.index
            .get(id)
            .and_then(|&position| self.members.get(position))
            .is_some_and(|held| std::ptr::addr_eq(&**held, member))
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        match self.index.get(key) {
            Some(&position) => {
                let stored = self
                    .members
                    .get(position)
                    .map(|m| id_of(m.as_ref(), &self.idkey))
                    .transpose()?;
                if stored.as_deref() == Some(key) {
                    Ok(true)
                } else {
                    Err(EnsembleError::membership(
                        key,
                        format!("index points at position {position} holding a different member"),
                    ))
                }
            }
            None => {
                let listed = self
                    .members
                    .iter()
                    .any(|m| id_of(m.as_ref(), &self.idkey).is_ok_and(|id| id == key));
                if listed {
                    Err(EnsembleError::membership(key, "member listed but not indexed"))
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Append a member. Returns whether it is present afterwards.
    pub fn add(&mut self, member: Box<dyn Member>) -> Result<bool> {
        self.check_type(member.as_ref())?;
        let id = self.check_new_id(member.as_ref())?;
        self.index.insert(id.clone(), self.members.len());
        self.members.push(member);
        debug!(ensemble = %self.name, member = %id, "member added");
        self.has_key(&id)
    }

    /// Append a member under an explicit key, which must be its id.
    pub fn add_named(&mut self, key: &str, member: Box<dyn Member>) -> Result<bool> {
        let id = id_of(member.as_ref(), &self.idkey)?;
        if id != key {
            return Err(EnsembleError::Identity(format!(
                "key '{key}' does not match member id '{id}'"
            )));
        }
        self.add(member)
    }

    /// Insert a member at `position` (clamped to the end).
    pub fn insert(&mut self, position: usize, member: Box<dyn Member>) -> Result<bool> {
        self.check_type(member.as_ref())?;
        let id = self.check_new_id(member.as_ref())?;
        let position = position.min(self.members.len());
        self.members.insert(position, member);
        self.reindex()?;
        debug!(ensemble = %self.name, member = %id, position, "member inserted");
        self.has_key(&id)
    }

    /// Remove a member. Returns `Ok(false)` when it was not present.
    ///
    /// An instance is removed only if it is the stored object itself; a
    /// different object sharing its id is not a member.
    pub fn remove<'a>(&mut self, member: impl Into<MemberRef<'a>>) -> Result<bool> {
        let id = match member.into() {
            MemberRef::Key(key) => key.to_string(),
            MemberRef::Instance(member) => {
                self.check_type(member)?;
                let id = id_of(member, &self.idkey)?;
                if !self.has_key(&id)? || !self.holds(&id, member) {
                    return Ok(false);
                }
                id
            }
        };
        Ok(self.take(&id)?.is_some())
    }

    /// Remove and return the member with id `key`.
    pub fn take(&mut self, key: &str) -> Result<Option<Box<dyn Member>>> {
        if !self.has_key(key)? {
            return Ok(None);
        }
        let position = self
            .index
            .get(key)
            .copied()
            .ok_or_else(|| EnsembleError::membership(key, "member vanished from the index"))?;
        let member = self.members.remove(position);
        self.reindex()?;
        debug!(ensemble = %self.name, member = %key, "member removed");
        if self.has_key(key)? {
            return Err(EnsembleError::membership(key, "member still present after removal"));
        }
        Ok(Some(member))
    }

    /// Add every member of `members`; each must be new.
    pub fn extend<I>(&mut self, members: I) -> Result<()>
    where
        I: IntoIterator<Item = Box<dyn Member>>,
    {
        for member in members {
            if !self.add(member)? {
                return Err(EnsembleError::membership(
                    self.name.clone(),
                    "member not present after add",
                ));
            }
        }
        Ok(())
    }

    /// Remove a member that must be present.
    pub fn subtract<'a>(&mut self, member: impl Into<MemberRef<'a>>) -> Result<()> {
        let member = member.into();
        if self.remove(member)? {
            Ok(())
        } else {
            let key = match member {
                MemberRef::Key(key) => key.to_string(),
                MemberRef::Instance(m) => m.summary(),
            };
            Err(EnsembleError::membership(key, "not a member of this ensemble"))
        }
    }

    /// Append all members of `other`.
    pub fn merge(&mut self, other: Ensemble) -> Result<()> {
        self.extend(other.members)
    }

    /// Select members by id, position, range or a list of those.
    ///
    /// A key that is not a member id is dispatched as a plain attribute
    /// across all members.
    pub fn get(&self, selector: impl Into<Selector>) -> Result<Selection<'_>> {
        match selector.into() {
            Selector::Key(key) => {
                if self.has_key(&key)? {
                    self.member_at_key(&key).map(Selection::Member)
                } else {
                    self.attribute(&key).map(Selection::Attribute)
                }
            }
            Selector::Index(position) => self.member_at(position).map(Selection::Member),
            Selector::Range(range) => self
                .members
                .get(range.clone())
                .map(Selection::Members)
                .ok_or_else(|| {
                    EnsembleError::membership(
                        format!("{}..{}", range.start, range.end),
                        format!("range out of bounds for {} members", self.members.len()),
                    )
                }),
            Selector::Many(selectors) => {
                let mut picked = Vec::with_capacity(selectors.len());
                for selector in &selectors {
                    let member = match selector {
                        Selector::Key(key) => {
                            if !self.has_key(key)? {
                                return Err(EnsembleError::membership(
                                    key.clone(),
                                    "not a member of this ensemble",
                                ));
                            }
                            self.member_at_key(key)?
                        }
                        Selector::Index(position) => self.member_at(*position)?,
                        other => {
                            return Err(EnsembleError::type_mismatch(
                                "member key or position",
                                format!("{other:?}"),
                            ))
                        }
                    };
                    picked.push(member.clone_member());
                }
                Ensemble::new(picked, self.derived_options()).map(Selection::Ensemble)
            }
        }
    }

    /// Read a plain attribute from every member and recast the results.
    pub fn attribute(&self, attr: &str) -> Result<Recast> {
        let attributes = self.collect_attributes(attr)?;
        if attributes.iter().any(Attribute::is_method) {
            return Err(EnsembleError::DispatchInconsistency {
                attr: attr.to_string(),
                detail: "is a method, use dispatch to call it".to_string(),
            });
        }
        self.recast_attributes(attr, attributes)
    }

    /// Resolve `attr` across all members.
    ///
    /// Plain attributes are recast immediately; methods yield a
    /// [`BoundDispatcher`] that calls them on every member.
    pub fn dispatch(&mut self, attr: &str) -> Result<Dispatch<'_>> {
        let attributes = self.collect_attributes(attr)?;
        let methods = attributes.iter().filter(|a| a.is_method()).count();
        if methods == 0 {
            self.recast_attributes(attr, attributes).map(Dispatch::Value)
        } else if methods == attributes.len() {
            Ok(Dispatch::Method(BoundDispatcher::new(self, attr)))
        } else {
            Err(EnsembleError::DispatchInconsistency {
                attr: attr.to_string(),
                detail: format!(
                    "{methods} of {} members expose it as a method",
                    attributes.len()
                ),
            })
        }
    }

    /// Set an attribute on every member.
    ///
    /// All-or-nothing: when a member rejects the value, or the new values
    /// leave ids that clash, no member is changed.
    pub fn broadcast_attribute(&mut self, name: &str, value: Value) -> Result<()> {
        if RESERVED_NAMES.contains(&name) || self.extra.contains_key(name) {
            return Err(EnsembleError::Identity(format!(
                "'{name}' is an ensemble attribute and can not be broadcast"
            )));
        }
        let mut members = self.members.clone();
        for member in &mut members {
            let id = id_of(member.as_ref(), &self.idkey)?;
            member
                .set_attribute(name, value.clone())
                .map_err(|source| EnsembleError::Member {
                    id,
                    method: format!("set {name}"),
                    source,
                })?;
        }
        self.commit_members(members)
    }

    pub(crate) fn recast_context<'a>(&'a self, attr: &'a str) -> RecastContext<'a> {
        RecastContext {
            attr,
            idkey: &self.idkey,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Rebuild the id index from the member list, re-validating ids.
    pub(crate) fn reindex(&mut self) -> Result<()> {
        let index = self.build_index(&self.members)?;
        self.index = index;
        Ok(())
    }

    /// Replace the member list once its ids index cleanly.
    ///
    /// On error the current members and index are kept.
    pub(crate) fn commit_members(&mut self, members: Vec<Box<dyn Member>>) -> Result<()> {
        let index = self.build_index(&members)?;
        self.members = members;
        self.index = index;
        Ok(())
    }

    fn build_index(&self, members: &[Box<dyn Member>]) -> Result<HashMap<String, usize>> {
        let mut index = HashMap::with_capacity(members.len());
        for (position, member) in members.iter().enumerate() {
            let id = id_of(member.as_ref(), &self.idkey)?;
            self.check_reserved(&id)?;
            if index.insert(id.clone(), position).is_some() {
                return Err(EnsembleError::Identity(format!(
                    "duplicate member id '{id}'"
                )));
            }
        }
        Ok(index)
    }

    fn derived_options(&self) -> EnsembleOptions {
        EnsembleOptions {
            basetype: Some(self.basetype.clone()),
            idkey: self.idkey.clone(),
            name: self.name.clone(),
            title: self.title.clone(),
            extra: self.extra.clone(),
            registry: Arc::clone(&self.registry),
        }
    }

    fn collect_attributes(&self, attr: &str) -> Result<Vec<Attribute>> {
        self.members
            .iter()
            .map(|member| {
                member.attribute(attr).ok_or_else(|| {
                    let id = id_of(member.as_ref(), &self.idkey).unwrap_or_else(|_| member.summary());
                    EnsembleError::membership(attr, format!("attribute missing on member '{id}'"))
                })
            })
            .collect()
    }

    fn recast_attributes(&self, attr: &str, attributes: Vec<Attribute>) -> Result<Recast> {
        let items = attributes
            .into_iter()
            .filter_map(|attribute| match attribute {
                Attribute::Value(value) => Some(Item::Value(value)),
                Attribute::Member(member) => Some(Item::Member(member)),
                Attribute::Method => None,
            })
            .collect();
        recast(items, &self.members, &self.recast_context(attr))
    }

    fn member_at(&self, position: isize) -> Result<&dyn Member> {
        let len = self.members.len() as isize;
        let resolved = if position < 0 { position + len } else { position };
        if (0..len).contains(&resolved) {
            Ok(self.members[resolved as usize].as_ref())
        } else {
            Err(EnsembleError::membership(
                position.to_string(),
                format!("position out of range for {len} members"),
            ))
        }
    }

    fn member_at_key(&self, key: &str) -> Result<&dyn Member> {
        self.index
            .get(key)
            .and_then(|&position| self.members.get(position))
            .map(|m| m.as_ref())
            .ok_or_else(|| EnsembleError::membership(key, "not a member of this ensemble"))
    }

    fn check_type(&self, member: &dyn Member) -> Result<()> {
        if self.registry.conforms(member.type_name(), &self.basetype) {
            Ok(())
        } else {
            Err(EnsembleError::type_mismatch(
                self.basetype.clone(),
                member.type_name(),
            ))
        }
    }

    fn check_reserved(&self, id: &str) -> Result<()> {
        if RESERVED_NAMES.contains(&id) || self.extra.contains_key(id) {
            Err(EnsembleError::Identity(format!(
                "member id '{id}' would overwrite an ensemble attribute"
            )))
        } else {
            Ok(())
        }
    }

    fn check_new_id(&self, member: &dyn Member) -> Result<String> {
        let id = id_of(member, &self.idkey)?;
        self.check_reserved(&id)?;
        if self.index.contains_key(&id) {
            return Err(EnsembleError::Identity(format!(
                "member id '{id}' already exists in ensemble"
            )));
        }
        Ok(id)
    }
}

impl<'a> IntoIterator for &'a Ensemble {
    type Item = &'a Box<dyn Member>;
    type IntoIter = std::slice::Iter<'a, Box<dyn Member>>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

impl PartialEq for Ensemble {
    fn eq(&self, other: &Self) -> bool {
        self.members.len() == other.members.len()
            && self.members.iter().zip(&other.members).all(|(a, b)| {
                a.type_name() == b.type_name()
                    && id_of(a.as_ref(), &self.idkey).ok() == id_of(b.as_ref(), &other.idkey).ok()
            })
    }
}

impl fmt::Display for Ensemble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return write!(
                f,
                "Ensemble {}, {} Members ({})",
                self.name,
                self.members.len(),
                self.basetype
            );
        }
        writeln!(f, "Ensemble: {}", self.name)?;
        writeln!(f, "  {}", self.title)?;
        writeln!(f, "Members:")?;
        for member in &self.members {
            writeln!(f, "  {}", member.summary())?;
        }
        writeln!(f, "Basetype: {}", self.basetype)?;
        write!(f, "Id key: {}", self.idkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{geo_registry, FakeAxis, FakeDataset, FakeVariable, Label};
    use serde_json::json;

    fn labels(texts: &[&str]) -> Ensemble {
        let members = texts.iter().map(|t| Label::new(t)).collect();
        Ensemble::from_members(members, EnsembleOptions::new().with_name("labels")).unwrap()
    }

    #[test]
    fn test_abc_label_scenario() {
        let mut ens = labels(&["A", "B", "C"]);
        assert_eq!(ens.len(), 3);
        assert!(ens.has("A").unwrap());
        assert!(ens.has("B").unwrap());

        let last = ens.get(-1isize).unwrap().into_member().unwrap();
        let last_id = id_of(last, "name").unwrap();
        assert_eq!(last_id, "C");
        assert!(ens.remove(last_id.as_str()).unwrap());
        assert!(!ens.has("C").unwrap());
        assert_eq!(ens.len(), 2);
        assert_eq!(ens.ids(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_empty_ensemble_needs_basetype() {
        let err = Ensemble::new(Vec::new(), EnsembleOptions::new()).unwrap_err();
        assert!(matches!(err, EnsembleError::Configuration(_)));

        let ens = Ensemble::new(Vec::new(), EnsembleOptions::new().with_basetype("Dataset")).unwrap();
        assert!(ens.is_empty());
        assert_eq!(ens.basetype(), "Dataset");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = Ensemble::from_members(
            vec![Label::new("A"), Label::new("A")],
            EnsembleOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EnsembleError::Identity(_)));
    }

    #[test]
    fn test_reserved_and_extra_ids_rejected() {
        let err = Ensemble::from_members(vec![Label::new("title")], EnsembleOptions::new())
            .unwrap_err();
        assert!(matches!(err, EnsembleError::Identity(_)));

        let err = Ensemble::from_members(
            vec![Label::new("region")],
            EnsembleOptions::new().with_extra("region", json!("NA")),
        )
        .unwrap_err();
        assert!(matches!(err, EnsembleError::Identity(_)));

        let err = Ensemble::from_members(
            vec![Label::new("A")],
            EnsembleOptions::new().with_extra("basetype", json!("x")),
        )
        .unwrap_err();
        assert!(matches!(err, EnsembleError::Identity(_)));
    }

    #[test]
    fn test_wrong_basetype_rejected() {
        let mut ens = labels(&["A"]);
        let err = ens.add(Box::new(FakeDataset::new("obs"))).unwrap_err();
        assert!(matches!(err, EnsembleError::TypeMismatch { .. }));
        assert_eq!(ens.len(), 1);

        let ds = FakeDataset::new("obs");
        let err = ens.has(MemberRef::Instance(&ds)).unwrap_err();
        assert!(matches!(err, EnsembleError::TypeMismatch { .. }));
    }

    #[test]
    fn test_subtypes_conform_through_registry() {
        let registry = Arc::new(geo_registry());
        let members: Vec<Box<dyn Member>> = vec![
            Box::new(FakeVariable::new("precip", &[1.0])) as Box<dyn Member>,
            Box::new(FakeAxis::new("time", &[1.0, 2.0])),
        ];
        let ens = Ensemble::new(
            members,
            EnsembleOptions::new()
                .with_basetype("Variable")
                .with_registry(registry),
        )
        .unwrap();
        assert_eq!(ens.len(), 2);
    }

    #[test]
    fn test_insert_keeps_index_in_sync() {
        let mut ens = labels(&["A", "C"]);
        assert!(ens.insert(1, Box::new(Label::new("B"))).unwrap());
        assert_eq!(ens.ids(), vec!["A", "B", "C"]);
        assert!(ens.insert(99, Box::new(Label::new("D"))).unwrap());
        assert_eq!(ens.ids(), vec!["A", "B", "C", "D"]);
        let second = ens.get(1isize).unwrap().into_member().unwrap();
        assert_eq!(id_of(second, "name").unwrap(), "B");
    }

    #[test]
    fn test_remove_absent_is_false() {
        let mut ens = labels(&["A"]);
        assert!(!ens.remove("Z").unwrap());
        let stranger = Label::new("Z");
        assert!(!ens.remove(MemberRef::Instance(&stranger)).unwrap());
        assert!(ens.subtract("Z").is_err());
    }

    #[test]
    fn test_instance_membership_is_by_identity() {
        let mut ens = labels(&["A", "B"]);
        let held = ens.members()[0].clone_member();
        assert!(ens.has(MemberRef::Instance(ens.members()[0].as_ref())).unwrap());

        // same id, different object
        let err = ens.has(MemberRef::Instance(held.as_ref())).unwrap_err();
        assert!(matches!(err, EnsembleError::Membership { .. }));
        assert!(!ens.remove(MemberRef::Instance(held.as_ref())).unwrap());
        assert_eq!(ens.ids(), vec!["A", "B"]);

        let stranger = Label::new("Z");
        assert!(!ens.has(MemberRef::Instance(&stranger)).unwrap());
    }

    #[test]
    fn test_add_named_checks_key() {
        let mut ens = labels(&["A"]);
        assert!(ens.add_named("B", Box::new(Label::new("B"))).unwrap());
        let err = ens.add_named("C", Box::new(Label::new("D"))).unwrap_err();
        assert!(matches!(err, EnsembleError::Identity(_)));
        assert_eq!(ens.ids(), vec!["A", "B"]);
        assert!(ens.add_named("A", Box::new(Label::new("A"))).is_err());
    }

    #[test]
    fn test_get_key_falls_back_to_attribute() {
        let ens = labels(&["A", "BB"]);
        let lens = ens.get("len").unwrap().into_attribute().unwrap();
        assert_eq!(lens.into_values().unwrap(), vec![json!(1), json!(2)]);

        let err = ens.get("upper").unwrap_err();
        assert!(matches!(err, EnsembleError::DispatchInconsistency { .. }));
        let err = ens.get("nope").unwrap_err();
        assert!(matches!(err, EnsembleError::Membership { .. }));
    }

    #[test]
    fn test_get_range_and_many() {
        let ens = labels(&["A", "B", "C"]);
        match ens.get(1usize..3).unwrap() {
            Selection::Members(members) => assert_eq!(members.len(), 2),
            other => panic!("unexpected selection {other:?}"),
        }
        assert!(ens.get(2usize..5).is_err());

        let picked = ens
            .get(vec![Selector::from("C"), Selector::Index(0)])
            .unwrap()
            .into_ensemble()
            .unwrap();
        assert_eq!(picked.ids(), vec!["C", "A"]);
        assert_eq!(picked.name(), "labels");

        let err = ens.get(vec!["A", "missing"]).unwrap_err();
        assert!(matches!(err, EnsembleError::Membership { .. }));
        assert!(ens.get(5isize).is_err());
        assert!(ens.get(-4isize).is_err());
    }

    #[test]
    fn test_extend_subtract_merge() {
        let mut ens = labels(&["A"]);
        ens.extend(vec![Box::new(Label::new("B")) as Box<dyn Member>])
            .unwrap();
        ens.merge(labels(&["C", "D"])).unwrap();
        assert_eq!(ens.ids(), vec!["A", "B", "C", "D"]);
        ens.subtract("B").unwrap();
        assert_eq!(ens.ids(), vec!["A", "C", "D"]);

        assert!(ens.merge(labels(&["A"])).is_err());
    }

    #[test]
    fn test_equality_is_by_type_and_id() {
        assert_eq!(labels(&["A", "B"]), labels(&["A", "B"]));
        assert_ne!(labels(&["A", "B"]), labels(&["B", "A"]));
        assert_ne!(labels(&["A"]), labels(&["A", "B"]));
    }

    #[test]
    fn test_broadcast_attribute() {
        let mut ens = Ensemble::from_members(
            vec![FakeDataset::new("obs"), FakeDataset::new("model")],
            EnsembleOptions::new(),
        )
        .unwrap();
        ens.broadcast_attribute("title", json!("shared")).unwrap_err();
        ens.broadcast_attribute("loaded", json!(true)).unwrap();
        let loaded = ens.attribute("loaded").unwrap().into_values().unwrap();
        assert_eq!(loaded, vec![json!(true), json!(true)]);
    }

    #[test]
    fn test_broadcast_failure_surfaces_member_error() {
        let mut ens = labels(&["A", "B"]);
        let err = ens.broadcast_attribute("text", json!("X")).unwrap_err();
        assert!(matches!(err, EnsembleError::Member { .. }));

        let mut ens = Ensemble::from_members(
            vec![FakeVariable::new("a", &[]), FakeVariable::new("b", &[])],
            EnsembleOptions::new(),
        )
        .unwrap();
        ens.broadcast_attribute("units", json!("mm")).unwrap();
        let units = ens.attribute("units").unwrap().into_values().unwrap();
        assert_eq!(units, vec![json!("mm"), json!("mm")]);
    }

    #[test]
    fn test_broadcast_duplicate_id_leaves_ensemble_untouched() {
        let variable = |units: &str| FakeVariable {
            units: units.to_string(),
            ..FakeVariable::new("precip", &[])
        };
        let mut ens = Ensemble::from_members(
            vec![variable("a"), variable("b")],
            EnsembleOptions::new().with_idkey("units"),
        )
        .unwrap();

        let err = ens.broadcast_attribute("units", json!("mm")).unwrap_err();
        assert!(matches!(err, EnsembleError::Identity(_)));
        assert_eq!(ens.ids(), vec!["a", "b"]);
        assert!(ens.has("a").unwrap());
        assert!(!ens.has("mm").unwrap());
        let units = ens.attribute("units").unwrap().into_values().unwrap();
        assert_eq!(units, vec![json!("a"), json!("b")]);
        assert!(ens.take("b").unwrap().is_some());
    }

    #[test]
    fn test_broadcast_partial_failure_changes_nothing() {
        let mut ens = Ensemble::new(
            vec![
                Box::new(FakeVariable::new("precip", &[])) as Box<dyn Member>,
                Box::new(FakeAxis::new("time", &[])),
            ],
            EnsembleOptions::new()
                .with_basetype("Variable")
                .with_registry(Arc::new(geo_registry())),
        )
        .unwrap();
        // the variable accepts units, the axis does not
        let err = ens.broadcast_attribute("units", json!("mm")).unwrap_err();
        assert!(matches!(err, EnsembleError::Member { .. }));
        let first = ens.get(0isize).unwrap().into_member().unwrap();
        assert!(matches!(
            first.attribute("units"),
            Some(Attribute::Value(units)) if units == json!("none")
        ));
    }

    #[test]
    fn test_display_forms() {
        let ens = Ensemble::from_members(
            vec![Label::new("A"), Label::new("B")],
            EnsembleOptions::new().with_name("letters").with_title("Some letters"),
        )
        .unwrap();
        assert_eq!(format!("{ens:#}"), "Ensemble letters, 2 Members (Label)");
        let long = ens.to_string();
        assert!(long.contains("Some letters"));
        assert!(long.contains("'A'"));
        assert!(long.contains("Id key: name"));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: EnsembleOptions =
            serde_json::from_value(json!({ "name": "ens", "basetype": "Dataset" })).unwrap();
        assert_eq!(options.idkey, "name");
        assert_eq!(options.basetype.as_deref(), Some("Dataset"));
        assert!(options.extra.is_empty());
    }
}
