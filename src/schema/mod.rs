//! # Schema Registry
//!
//! The [`Hierarchy`] is the authoritative description of one corpus:
//! which levels exist and how they nest, what typed properties and subsets
//! each level carries, which subannotation types hang off which level, and
//! the speaker/discourse property sets.
//!
//! This module holds the pure data structure and its validation rules.
//! Mutations that also touch the graph live on the corpus handle, which
//! computes each change on a clone, applies it to the store, persists the
//! snapshot and only then installs the clone in the [`SchemaRegistry`].

mod persist;
mod registry;
mod value_type;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

pub use persist::{SchemaSnapshot, SNAPSHOT_VERSION};
pub use registry::SchemaRegistry;
pub use value_type::ValueType;

/// Property name → declared type. Ordered so batch columns are stable.
pub type PropertySpec = BTreeMap<String, ValueType>;

/// Properties every token node carries.
pub const TOKEN_BUILTINS: &[&str] = &["id", "begin", "end", "duration", "discourse", "speaker"];
/// Properties every type node carries.
pub const TYPE_BUILTINS: &[&str] = &["id", "label"];
/// Properties every subannotation node carries.
pub const SUBANNOTATION_BUILTINS: &[&str] = &["id", "begin", "end", "duration", "label"];
/// Speaker and discourse nodes are keyed by name.
pub const NAMED_BUILTINS: &[&str] = &["name"];

/// Path steps with fixed meaning.
pub const RESERVED_STEPS: &[&str] = &["previous", "following", "speaker", "discourse"];
/// Labels the graph encoding uses for itself.
pub const RESERVED_LABELS: &[&str] = &["anchor", "Speaker", "Discourse", "CorpusMeta"];

/// Who a property belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", content = "owner", rename_all = "snake_case")]
pub enum PropertyOwner {
    /// Type records of a level.
    Type(String),
    /// Token records of a level.
    Token(String),
    /// Nodes of a subannotation type.
    Subannotation(String),
    Speaker,
    Discourse,
}

impl PropertyOwner {
    pub fn type_of(level: impl Into<String>) -> Self {
        PropertyOwner::Type(level.into())
    }

    pub fn token_of(level: impl Into<String>) -> Self {
        PropertyOwner::Token(level.into())
    }

    pub fn builtins(&self) -> &'static [&'static str] {
        match self {
            PropertyOwner::Type(_) => TYPE_BUILTINS,
            PropertyOwner::Token(_) => TOKEN_BUILTINS,
            PropertyOwner::Subannotation(_) => SUBANNOTATION_BUILTINS,
            PropertyOwner::Speaker | PropertyOwner::Discourse => NAMED_BUILTINS,
        }
    }
}

impl std::fmt::Display for PropertyOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyOwner::Type(l) => write!(f, "{l} types"),
            PropertyOwner::Token(l) => write!(f, "{l} tokens"),
            PropertyOwner::Subannotation(s) => write!(f, "{s} subannotations"),
            PropertyOwner::Speaker => f.write_str("speakers"),
            PropertyOwner::Discourse => f.write_str("discourses"),
        }
    }
}

/// Whether a subset tags type records or individual tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsetKind {
    Type,
    Token,
}

/// A registered subannotation type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubannotationSpec {
    /// Level whose tokens it annotates.
    pub level: String,
    pub properties: PropertySpec,
}

/// A property that was removed, with the type it had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetiredProperty {
    pub owner: PropertyOwner,
    pub name: String,
    pub value_type: ValueType,
}

/// The schema of one corpus.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Hierarchy {
    corpus: String,
    /// Lowest (finest-grained) level first; each level is contained by the next.
    levels: Vec<String>,
    type_properties: BTreeMap<String, PropertySpec>,
    token_properties: BTreeMap<String, PropertySpec>,
    type_subsets: BTreeMap<String, BTreeSet<String>>,
    token_subsets: BTreeMap<String, BTreeSet<String>>,
    subannotations: BTreeMap<String, SubannotationSpec>,
    speaker_properties: PropertySpec,
    discourse_properties: PropertySpec,
    retired: Vec<RetiredProperty>,
}

// ============================================================================
// Queries
// ============================================================================

impl Hierarchy {
    pub fn new(corpus: impl Into<String>) -> Self {
        Self { corpus: corpus.into(), ..Self::default() }
    }

    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    /// Levels, lowest first.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn has_level(&self, level: &str) -> bool {
        self.levels.iter().any(|l| l == level)
    }

    pub fn lowest(&self) -> Option<&str> {
        self.levels.first().map(String::as_str)
    }

    pub fn highest(&self) -> Option<&str> {
        self.levels.last().map(String::as_str)
    }

    /// Position in the chain, 0 being the lowest level.
    pub fn depth(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// The level that contains `level`.
    pub fn parent_of(&self, level: &str) -> Option<&str> {
        let i = self.depth(level)?;
        self.levels.get(i + 1).map(String::as_str)
    }

    /// The level `level` contains.
    pub fn child_of(&self, level: &str) -> Option<&str> {
        let i = self.depth(level)?;
        i.checked_sub(1).map(|c| self.levels[c].as_str())
    }

    /// Label carried by the type records of `level`.
    pub fn type_label(level: &str) -> String {
        format!("{level}_type")
    }

    /// Registered (non-builtin) properties of `owner`.
    pub fn properties(&self, owner: &PropertyOwner) -> Option<&PropertySpec> {
        match owner {
            PropertyOwner::Type(l) => self.type_properties.get(l),
            PropertyOwner::Token(l) => self.token_properties.get(l),
            PropertyOwner::Subannotation(s) => self.subannotations.get(s).map(|s| &s.properties),
            PropertyOwner::Speaker => Some(&self.speaker_properties),
            PropertyOwner::Discourse => Some(&self.discourse_properties),
        }
    }

    pub fn property_type(&self, owner: &PropertyOwner, name: &str) -> Option<ValueType> {
        self.properties(owner).and_then(|p| p.get(name)).copied()
    }

    pub fn type_properties(&self, level: &str) -> impl Iterator<Item = (&String, &ValueType)> {
        self.type_properties.get(level).into_iter().flatten()
    }

    pub fn token_properties(&self, level: &str) -> impl Iterator<Item = (&String, &ValueType)> {
        self.token_properties.get(level).into_iter().flatten()
    }

    pub fn subset_kind(&self, level: &str, subset: &str) -> Option<SubsetKind> {
        if self.type_subsets.get(level).is_some_and(|s| s.contains(subset)) {
            Some(SubsetKind::Type)
        } else if self.token_subsets.get(level).is_some_and(|s| s.contains(subset)) {
            Some(SubsetKind::Token)
        } else {
            None
        }
    }

    pub fn subsets(&self, level: &str, kind: SubsetKind) -> impl Iterator<Item = &String> {
        let map = match kind {
            SubsetKind::Type => &self.type_subsets,
            SubsetKind::Token => &self.token_subsets,
        };
        map.get(level).into_iter().flatten()
    }

    pub fn subannotation(&self, name: &str) -> Option<&SubannotationSpec> {
        self.subannotations.get(name)
    }

    /// Subannotation types annotating tokens of `level`.
    pub fn subannotations_of<'a>(&'a self, level: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.subannotations
            .iter()
            .filter(move |(_, spec)| spec.level == level)
            .map(|(name, _)| name)
    }

    pub fn subannotation_names(&self) -> impl Iterator<Item = &String> {
        self.subannotations.keys()
    }

    pub fn retired(&self) -> &[RetiredProperty] {
        &self.retired
    }

    fn retired_type(&self, owner: &PropertyOwner, name: &str) -> Option<ValueType> {
        self.retired
            .iter()
            .find(|r| r.owner == *owner && r.name == name)
            .map(|r| r.value_type)
    }
}

// ============================================================================
// Validation
// ============================================================================

fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Schema(format!("{kind} name must not be empty")));
    }
    if name.contains('.') {
        return Err(Error::Schema(format!("{kind} name '{name}' must not contain '.'")));
    }
    Ok(())
}

impl Hierarchy {
    /// Names that would be ambiguous as a level, subannotation or subset.
    fn check_label_free(&self, kind: &str, name: &str) -> Result<()> {
        check_name(kind, name)?;
        let clash = if RESERVED_STEPS.contains(&name) || RESERVED_LABELS.contains(&name) {
            Some("a reserved name")
        } else if TOKEN_BUILTINS.contains(&name) || TYPE_BUILTINS.contains(&name) {
            Some("a builtin property")
        } else if name == self.corpus {
            Some("the corpus name")
        } else if name.ends_with("_type") {
            Some("in the type-label namespace")
        } else if self.has_level(name) {
            Some("already a level")
        } else if self.subannotations.contains_key(name) {
            Some("already a subannotation type")
        } else {
            None
        };
        match clash {
            Some(why) => Err(Error::Schema(format!("{kind} name '{name}' is {why}"))),
            None => Ok(()),
        }
    }

    /// A path step must not shadow a type or token property of any level.
    fn check_not_property(&self, kind: &str, name: &str) -> Result<()> {
        let owner = self
            .type_properties
            .iter()
            .chain(&self.token_properties)
            .find(|(_, spec)| spec.contains_key(name))
            .map(|(level, _)| level);
        match owner {
            Some(level) => Err(Error::Schema(format!(
                "{kind} name '{name}' is already a property of level '{level}'"
            ))),
            None => Ok(()),
        }
    }

    fn require_level(&self, level: &str) -> Result<()> {
        if self.has_level(level) {
            Ok(())
        } else {
            Err(Error::Schema(format!("no level '{level}' in corpus '{}'", self.corpus)))
        }
    }

    fn require_owner(&self, owner: &PropertyOwner) -> Result<()> {
        match owner {
            PropertyOwner::Type(l) | PropertyOwner::Token(l) => self.require_level(l),
            PropertyOwner::Subannotation(s) if !self.subannotations.contains_key(s) => {
                Err(Error::Schema(format!("no subannotation type '{s}'")))
            }
            _ => Ok(()),
        }
    }

    fn is_subset_name(&self, name: &str) -> bool {
        self.type_subsets.values().chain(self.token_subsets.values()).any(|s| s.contains(name))
    }
}

// ============================================================================
// Mutations (pure; the corpus handle applies them to the graph)
// ============================================================================

impl Hierarchy {
    /// Add `level`, contained by `parent` (or on top when `parent` is None).
    ///
    /// Returns `false` when the level already exists with the same parent.
    pub fn add_level(&mut self, level: &str, parent: Option<&str>) -> Result<bool> {
        if self.has_level(level) {
            if self.parent_of(level) == parent {
                return Ok(false);
            }
            return Err(Error::Schema(format!(
                "level '{level}' already exists with parent {:?}",
                self.parent_of(level)
            )));
        }
        self.check_label_free("level", level)?;
        self.check_not_property("level", level)?;
        if self.is_subset_name(level) {
            return Err(Error::Schema(format!("level name '{level}' is already a subset")));
        }
        match parent {
            None => self.levels.push(level.to_owned()),
            Some(p) => {
                let i = self
                    .depth(p)
                    .ok_or_else(|| Error::Schema(format!("parent level '{p}' does not exist")))?;
                self.levels.insert(i, level.to_owned());
            }
        }
        self.type_properties.entry(level.to_owned()).or_default();
        self.token_properties.entry(level.to_owned()).or_default();
        Ok(true)
    }

    /// Remove `level`; its child becomes contained by its parent.
    ///
    /// Returns the subannotation types that were detached with it.
    pub fn remove_level(&mut self, level: &str) -> Result<Vec<String>> {
        let i = self
            .depth(level)
            .ok_or_else(|| Error::Schema(format!("no level '{level}' in corpus '{}'", self.corpus)))?;
        self.levels.remove(i);
        for (owner, spec) in [
            (PropertyOwner::Type(level.to_owned()), self.type_properties.remove(level)),
            (PropertyOwner::Token(level.to_owned()), self.token_properties.remove(level)),
        ] {
            for (name, value_type) in spec.unwrap_or_default() {
                self.retire(owner.clone(), name, value_type);
            }
        }
        self.type_subsets.remove(level);
        self.token_subsets.remove(level);
        let detached: Vec<String> = self.subannotations_of(level).cloned().collect();
        for name in &detached {
            self.subannotations.remove(name);
        }
        Ok(detached)
    }

    fn retire(&mut self, owner: PropertyOwner, name: String, value_type: ValueType) {
        self.retired.retain(|r| !(r.owner == owner && r.name == name));
        self.retired.push(RetiredProperty { owner, name, value_type });
    }

    fn spec_mut(&mut self, owner: &PropertyOwner) -> Option<&mut PropertySpec> {
        match owner {
            PropertyOwner::Type(l) => self.type_properties.get_mut(l),
            PropertyOwner::Token(l) => self.token_properties.get_mut(l),
            PropertyOwner::Subannotation(s) => self.subannotations.get_mut(s).map(|s| &mut s.properties),
            PropertyOwner::Speaker => Some(&mut self.speaker_properties),
            PropertyOwner::Discourse => Some(&mut self.discourse_properties),
        }
    }

    /// Register a property. Re-adding with the same type is a no-op (`false`);
    /// a different type, now or in the retired ledger, is a schema error.
    pub fn add_property(&mut self, owner: &PropertyOwner, name: &str, value_type: ValueType) -> Result<bool> {
        self.require_owner(owner)?;
        check_name("property", name)?;
        if owner.builtins().contains(&name) {
            return Err(Error::Schema(format!("'{name}' is a builtin property of {owner}")));
        }
        if matches!(owner, PropertyOwner::Type(_) | PropertyOwner::Token(_))
            && (RESERVED_STEPS.contains(&name) || self.has_level(name) || self.subannotations.contains_key(name))
        {
            return Err(Error::Schema(format!("property name '{name}' would be ambiguous in attribute paths")));
        }
        if let PropertyOwner::Type(l) | PropertyOwner::Token(l) = owner {
            // A level's type and token properties share one path namespace.
            let other = match owner {
                PropertyOwner::Type(_) => PropertyOwner::Token(l.clone()),
                _ => PropertyOwner::Type(l.clone()),
            };
            if self.property_type(&other, name).is_some() {
                return Err(Error::Schema(format!("'{name}' is already registered on {other}")));
            }
        }
        if let Some(existing) = self.property_type(owner, name) {
            if existing == value_type {
                return Ok(false);
            }
            return Err(Error::Schema(format!(
                "property '{name}' of {owner} is {existing}, not {value_type}; use migrate_property_type"
            )));
        }
        if let Some(previous) = self.retired_type(owner, name) {
            if previous != value_type {
                return Err(Error::Schema(format!(
                    "property '{name}' of {owner} was removed as {previous}; re-adding it as {value_type} \
                     requires migrate_property_type"
                )));
            }
        }
        self.retired.retain(|r| !(r.owner == *owner && r.name == name));
        if let Some(spec) = self.spec_mut(owner) {
            spec.insert(name.to_owned(), value_type);
        }
        Ok(true)
    }

    /// Unregister a property, remembering its type.
    pub fn remove_property(&mut self, owner: &PropertyOwner, name: &str) -> Result<ValueType> {
        self.require_owner(owner)?;
        let removed = self
            .spec_mut(owner)
            .and_then(|spec| spec.remove(name))
            .ok_or_else(|| Error::Schema(format!("no property '{name}' on {owner}")))?;
        self.retire(owner.clone(), name.to_owned(), removed);
        Ok(removed)
    }

    /// Change the declared type of a current or retired property.
    ///
    /// Returns the previous type when the property was live.
    pub fn migrate_property(&mut self, owner: &PropertyOwner, name: &str, value_type: ValueType) -> Result<Option<ValueType>> {
        self.require_owner(owner)?;
        if let Some(spec) = self.spec_mut(owner) {
            if let Some(current) = spec.get_mut(name) {
                let previous = *current;
                *current = value_type;
                return Ok(Some(previous));
            }
        }
        if self.retired_type(owner, name).is_some() {
            self.retired.retain(|r| !(r.owner == *owner && r.name == name));
            self.add_property(owner, name, value_type)?;
            return Ok(None);
        }
        Err(Error::Schema(format!("no property '{name}' on {owner} to migrate")))
    }

    /// Register a subset. Returns `false` when it already exists with this kind.
    pub fn add_subset(&mut self, level: &str, kind: SubsetKind, subset: &str) -> Result<bool> {
        self.require_level(level)?;
        match self.subset_kind(level, subset) {
            Some(k) if k == kind => return Ok(false),
            Some(k) => {
                return Err(Error::Schema(format!(
                    "'{subset}' is already a {k:?} subset of {level}"
                )));
            }
            None => {}
        }
        self.check_label_free("subset", subset)?;
        let map = match kind {
            SubsetKind::Type => &mut self.type_subsets,
            SubsetKind::Token => &mut self.token_subsets,
        };
        map.entry(level.to_owned()).or_default().insert(subset.to_owned());
        Ok(true)
    }

    pub fn remove_subset(&mut self, level: &str, subset: &str) -> Result<SubsetKind> {
        self.require_level(level)?;
        let kind = self
            .subset_kind(level, subset)
            .ok_or_else(|| Error::Schema(format!("no subset '{subset}' on {level}")))?;
        let map = match kind {
            SubsetKind::Type => &mut self.type_subsets,
            SubsetKind::Token => &mut self.token_subsets,
        };
        if let Some(set) = map.get_mut(level) {
            set.remove(subset);
        }
        Ok(kind)
    }

    /// Register a subannotation type on `level`, merging new properties
    /// into an existing registration.
    pub fn add_subannotation(&mut self, name: &str, level: &str, properties: &PropertySpec) -> Result<bool> {
        self.require_level(level)?;
        if let Some(existing) = self.subannotations.get(name) {
            if existing.level != level {
                return Err(Error::Schema(format!(
                    "subannotation type '{name}' already annotates {}",
                    existing.level
                )));
            }
        } else {
            self.check_label_free("subannotation", name)?;
            self.check_not_property("subannotation", name)?;
            if self.is_subset_name(name) {
                return Err(Error::Schema(format!("subannotation name '{name}' is already a subset")));
            }
            self.subannotations.insert(
                name.to_owned(),
                SubannotationSpec { level: level.to_owned(), properties: PropertySpec::new() },
            );
            let owner = PropertyOwner::Subannotation(name.to_owned());
            for (prop, value_type) in properties {
                self.add_property(&owner, prop, *value_type)?;
            }
            return Ok(true);
        }
        let owner = PropertyOwner::Subannotation(name.to_owned());
        let mut changed = false;
        for (prop, value_type) in properties {
            changed |= self.add_property(&owner, prop, *value_type)?;
        }
        Ok(changed)
    }

    pub fn remove_subannotation(&mut self, name: &str) -> Result<SubannotationSpec> {
        self.subannotations
            .remove(name)
            .ok_or_else(|| Error::Schema(format!("no subannotation type '{name}'")))
    }
}

/// Infer a property spec from concrete values. Nulls are ignored; ints and
/// floats in one column unify to float.
pub fn infer_spec<'a>(maps: impl IntoIterator<Item = &'a PropertyMap>) -> Result<PropertySpec> {
    let mut spec = PropertySpec::new();
    for map in maps {
        for (name, value) in map {
            if value.is_null() {
                continue;
            }
            let inferred = ValueType::of(value).ok_or_else(|| {
                Error::Schema(format!("property '{name}' has unsupported {} value", value.type_name()))
            })?;
            match spec.get(name) {
                None => {
                    spec.insert(name.clone(), inferred);
                }
                Some(existing) => {
                    let unified = existing.unify(inferred).ok_or_else(|| {
                        Error::Schema(format!("property '{name}' mixes {existing} and {inferred} values"))
                    })?;
                    spec.insert(name.clone(), unified);
                }
            }
        }
    }
    Ok(spec)
}

/// Value a registered property takes on a node that does not supply it.
pub fn value_or_default(value: Option<&Value>, value_type: ValueType) -> Result<Value> {
    match value {
        None | Some(Value::Null) => Ok(value_type.default_value()),
        Some(v) => value_type.coerce(v.clone()),
    }
}
