//! Schema operations on the corpus handle.
//!
//! Each operation edits the hierarchy and brings stored nodes in line in the
//! same step: new properties get their typed default on every existing node,
//! removed properties and subsets are stripped from the graph.

use super::statements::{self, owner_label, DEFAULT};
use super::{Bound, Corpus};
use crate::model::{PropertyMap, Value};
use crate::schema::{Hierarchy, PropertyOwner, PropertySpec, SubsetKind, ValueType};
use crate::storage::StorageBackend;
use crate::{Error, Result};

fn with_default(value: Value) -> PropertyMap {
    PropertyMap::from([(DEFAULT.to_owned(), value)])
}

fn no_params() -> PropertyMap {
    PropertyMap::new()
}

impl<B: StorageBackend> Corpus<B> {
    /// Add a level contained by `parent`, or on top of the chain when
    /// `parent` is `None`.
    ///
    /// Inserting between two existing levels is only allowed while the
    /// lower one holds no tokens, since its tokens would lose their
    /// containers.
    pub fn add_level(&self, level: &str, parent: Option<&str>) -> Result<bool> {
        let current = self.hierarchy()?;
        if !current.has_level(level) {
            if let Some(child) = parent.and_then(|p| current.child_of(p)) {
                if self.token_count(child)? > 0 {
                    return Err(Error::Schema(format!(
                        "cannot insert '{level}' between '{}' and '{child}': '{child}' already has tokens",
                        parent.unwrap_or_default()
                    )));
                }
            }
        }
        self.update_schema("add_level", |h| Ok((h.add_level(level, parent)?, Vec::new())))
    }

    /// Remove a level with its tokens, types and subannotations. Its child
    /// level is re-attached to its parent.
    pub fn remove_level(&self, level: &str) -> Result<()> {
        let corpus = self.name().to_owned();
        self.update_schema("remove_level", |h| {
            let child = h.child_of(level).map(str::to_owned);
            let parent = h.parent_of(level).map(str::to_owned);
            let detached = h.remove_level(level)?;

            let mut bound: Vec<Bound> = Vec::new();
            if let (Some(child), Some(parent)) = (&child, &parent) {
                bound.push((statements::relink(&corpus, child, level, parent), no_params()));
            }
            for name in &detached {
                bound.push((statements::delete_all(&corpus, name), no_params()));
            }
            bound.push((statements::delete_all(&corpus, level), no_params()));
            bound.push((statements::delete_all(&corpus, &Hierarchy::type_label(level)), no_params()));
            Ok(((), bound))
        })
    }

    /// Register a property and set its typed default on existing nodes.
    pub fn add_property(&self, owner: &PropertyOwner, name: &str, value_type: ValueType) -> Result<bool> {
        self.add_property_with_default(owner, name, value_type, value_type.default_value())
    }

    /// As [`Self::add_property`], with an explicit default for existing nodes.
    pub fn add_property_with_default(
        &self,
        owner: &PropertyOwner,
        name: &str,
        value_type: ValueType,
        default: Value,
    ) -> Result<bool> {
        let default = value_type.coerce(default)?;
        let corpus = self.name().to_owned();
        self.update_schema("add_property", |h| {
            let added = h.add_property(owner, name, value_type)?;
            let bound = if added {
                vec![(statements::fill_default(&corpus, owner, name), with_default(default))]
            } else {
                Vec::new()
            };
            Ok((added, bound))
        })
    }

    pub fn add_type_property(&self, level: &str, name: &str, value_type: ValueType) -> Result<bool> {
        self.add_property(&PropertyOwner::type_of(level), name, value_type)
    }

    pub fn add_token_property(&self, level: &str, name: &str, value_type: ValueType) -> Result<bool> {
        self.add_property(&PropertyOwner::token_of(level), name, value_type)
    }

    pub fn add_speaker_property(&self, name: &str, value_type: ValueType) -> Result<bool> {
        self.add_property(&PropertyOwner::Speaker, name, value_type)
    }

    pub fn add_discourse_property(&self, name: &str, value_type: ValueType) -> Result<bool> {
        self.add_property(&PropertyOwner::Discourse, name, value_type)
    }

    /// Unregister a property and remove it from every node. Its type is
    /// remembered; re-adding it with another type needs
    /// [`Self::migrate_property_type`].
    pub fn remove_property(&self, owner: &PropertyOwner, name: &str) -> Result<ValueType> {
        let corpus = self.name().to_owned();
        self.update_schema("remove_property", |h| {
            let removed = h.remove_property(owner, name)?;
            Ok((removed, vec![(statements::remove_property(&corpus, owner, name), no_params())]))
        })
    }

    pub fn remove_type_property(&self, level: &str, name: &str) -> Result<ValueType> {
        self.remove_property(&PropertyOwner::type_of(level), name)
    }

    pub fn remove_token_property(&self, level: &str, name: &str) -> Result<ValueType> {
        self.remove_property(&PropertyOwner::token_of(level), name)
    }

    /// Change a property's type. Existing values are rewritten to the new
    /// type's default; nothing is coerced.
    pub fn migrate_property_type(&self, owner: &PropertyOwner, name: &str, value_type: ValueType) -> Result<Option<ValueType>> {
        let corpus = self.name().to_owned();
        self.update_schema("migrate_property_type", |h| {
            let previous = h.migrate_property(owner, name, value_type)?;
            let bound = vec![(statements::overwrite(&corpus, owner, name), with_default(value_type.default_value()))];
            Ok((previous, bound))
        })
    }

    /// Register a subset. Tagging happens through enrichment or
    /// [`crate::QueryBuilder::create_subset`].
    pub fn add_subset(&self, level: &str, kind: SubsetKind, subset: &str) -> Result<bool> {
        self.update_schema("add_subset", |h| Ok((h.add_subset(level, kind, subset)?, Vec::new())))
    }

    /// Unregister a subset and strip its label from the graph.
    pub fn remove_subset(&self, level: &str, subset: &str) -> Result<SubsetKind> {
        let corpus = self.name().to_owned();
        self.update_schema("remove_subset", |h| {
            let kind = h.remove_subset(level, subset)?;
            let label = subset_label(level, kind);
            Ok((kind, vec![(statements::remove_label(&corpus, &label, subset), no_params())]))
        })
    }

    /// Register a subannotation type on `level` (merging properties into an
    /// existing registration).
    pub fn add_subannotation_type(&self, name: &str, level: &str, properties: &PropertySpec) -> Result<bool> {
        let corpus = self.name().to_owned();
        self.update_schema("add_subannotation_type", |h| {
            let existing: PropertySpec = h.subannotation(name).map(|s| s.properties.clone()).unwrap_or_default();
            let changed = h.add_subannotation(name, level, properties)?;
            let owner = PropertyOwner::Subannotation(name.to_owned());
            let bound = properties
                .iter()
                .filter(|(p, _)| !existing.contains_key(*p))
                .map(|(p, vt)| (statements::fill_default(&corpus, &owner, p), with_default(vt.default_value())))
                .collect();
            Ok((changed, bound))
        })
    }

    /// Unregister a subannotation type and delete its nodes.
    pub fn remove_subannotation_type(&self, name: &str) -> Result<()> {
        let corpus = self.name().to_owned();
        self.update_schema("remove_subannotation_type", |h| {
            h.remove_subannotation(name)?;
            Ok(((), vec![(statements::delete_all(&corpus, name), no_params())]))
        })
    }
}

/// Register every property of `spec` on `owner` that is not yet known.
///
/// A registered float property accepts integer values; any other type
/// disagreement is a schema error.
pub(crate) fn register_properties(h: &mut Hierarchy, corpus: &str, owner: &PropertyOwner, spec: &PropertySpec) -> Result<Vec<Bound>> {
    let mut bound = Vec::new();
    for (name, inferred) in spec {
        match h.property_type(owner, name) {
            Some(existing) if existing == *inferred => {}
            Some(ValueType::Float) if *inferred == ValueType::Integer => {}
            _ => {
                if h.add_property(owner, name, *inferred)? {
                    bound.push((statements::fill_default(corpus, owner, name), with_default(inferred.default_value())));
                }
            }
        }
    }
    Ok(bound)
}

/// Label a subset lives on.
pub(crate) fn subset_label(level: &str, kind: SubsetKind) -> String {
    owner_label(&match kind {
        SubsetKind::Type => PropertyOwner::type_of(level),
        SubsetKind::Token => PropertyOwner::token_of(level),
    })
}

#[cfg(test)]
mod tests {
    use crate::corpus::Corpus;
    use crate::schema::{PropertyOwner, SubsetKind, ValueType};
    use crate::Error;

    fn corpus() -> Corpus {
        let corpus = Corpus::open_memory("demo").unwrap();
        corpus.add_level("word", None).unwrap();
        corpus.add_level("phone", Some("word")).unwrap();
        corpus
    }

    #[test]
    fn test_readding_property_with_other_type_is_rejected() {
        let corpus = corpus();
        corpus.add_token_property("phone", "stress", ValueType::Integer).unwrap();
        corpus.remove_token_property("phone", "stress").unwrap();
        let err = corpus.add_token_property("phone", "stress", ValueType::String).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));

        let owner = PropertyOwner::token_of("phone");
        assert_eq!(corpus.migrate_property_type(&owner, "stress", ValueType::String).unwrap(), None);
        assert_eq!(corpus.hierarchy().unwrap().property_type(&owner, "stress"), Some(ValueType::String));
    }

    #[test]
    fn test_same_type_readd_is_a_noop() {
        let corpus = corpus();
        assert!(corpus.add_type_property("word", "transcription", ValueType::String).unwrap());
        assert!(!corpus.add_type_property("word", "transcription", ValueType::String).unwrap());
    }

    #[test]
    fn test_remove_level_relinks_chain() {
        let corpus = corpus();
        corpus.add_level("syllable", Some("word")).unwrap();
        assert_eq!(corpus.hierarchy().unwrap().levels(), &["phone", "syllable", "word"]);
        corpus.add_subset("syllable", SubsetKind::Token, "stressed").unwrap();
        corpus.remove_level("syllable").unwrap();
        let h = corpus.hierarchy().unwrap();
        assert_eq!(h.parent_of("phone"), Some("word"));
        assert_eq!(h.subset_kind("syllable", "stressed"), None);
    }
}
