//! # Bulk Loader
//!
//! Turns one staged discourse into a [`LoadPlan`]: an ordered list of bulk
//! steps, each a single idempotent statement over a flat [`Batch`]. The
//! plan is pure; the corpus handle runs it, one committed transaction per
//! step, chunked at the configured batch size.
//!
//! Step order: speakers, type batches (lowest level first), the anchor
//! batch, token batches (lowest first), containment batches, and finally
//! the discourse marker that `has_discourse` checks.

mod batch;
pub mod hashing;
pub mod statements;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::cypher::ast::Statement;
use crate::model::{PropertyMap, Value};
use crate::schema::{value_or_default, Hierarchy, PropertySpec, ValueType};
use crate::staging::{time_key, AnnotationToken, DiscourseStage};
use crate::{Error, Result};

pub use batch::Batch;
pub use hashing::{anchor_key, token_key, type_key, TokenSlot, CONTENT_KEY_VERSION};

/// What a load did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { discourse: String, types: usize, tokens: usize, anchors: usize },
    /// Already present and `skip_existing` was set.
    Skipped { discourse: String },
}

impl LoadOutcome {
    pub fn discourse(&self) -> &str {
        match self {
            LoadOutcome::Loaded { discourse, .. } | LoadOutcome::Skipped { discourse } => discourse,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, LoadOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    Speakers,
    Types(String),
    Anchors,
    Tokens(String),
    Containment { level: String, parent: String },
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Speakers => f.write_str("speakers"),
            StepKind::Types(level) => write!(f, "types:{level}"),
            StepKind::Anchors => f.write_str("anchors"),
            StepKind::Tokens(level) => write!(f, "tokens:{level}"),
            StepKind::Containment { level, parent } => write!(f, "containment:{level}->{parent}"),
        }
    }
}

/// One bulk step: a statement run once per chunk of its batch.
#[derive(Debug, Clone)]
pub struct LoadStep {
    pub kind: StepKind,
    pub statement: Statement,
    pub batch: Batch,
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub discourse: String,
    pub steps: Vec<LoadStep>,
    /// Written last, as the discourse node's properties.
    pub discourse_properties: PropertyMap,
}

impl LoadPlan {
    pub fn step(&self, kind: &StepKind) -> Option<&LoadStep> {
        self.steps.iter().find(|s| &s.kind == kind)
    }

    fn rows(&self, pred: impl Fn(&StepKind) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.kind)).map(|s| s.batch.len()).sum()
    }

    pub fn outcome(&self) -> LoadOutcome {
        LoadOutcome::Loaded {
            discourse: self.discourse.clone(),
            types: self.rows(|k| matches!(k, StepKind::Types(_))),
            tokens: self.rows(|k| matches!(k, StepKind::Tokens(_))),
            anchors: self.rows(|k| matches!(k, StepKind::Anchors)),
        }
    }
}

/// Column layout of a level's token batch.
pub fn token_columns(hierarchy: &Hierarchy, level: &str) -> Vec<String> {
    let mut columns: Vec<String> = ["from_anchor_id", "to_anchor_id", "type_key", "token_id", "begin", "end", "speaker"]
        .into_iter()
        .map(String::from)
        .collect();
    columns.extend(hierarchy.token_properties(level).map(|(name, _)| name.clone()));
    if hierarchy.parent_of(level).is_some() {
        columns.push("parent_id".into());
    }
    columns
}

/// Column layout of a level's type batch.
pub fn type_columns(hierarchy: &Hierarchy, level: &str) -> Vec<String> {
    let mut columns = vec!["type_key".to_string(), "label".to_string()];
    columns.extend(hierarchy.type_properties(level).map(|(name, _)| name.clone()));
    columns
}

/// Type properties a token supplies with a non-default value, coerced to
/// their registered types. This is the content a type key is computed from:
/// a property left out and one given its default store the same record, and
/// registering a new property later keeps existing keys stable.
fn supplied(token: &AnnotationToken, spec: &PropertySpec) -> Result<PropertyMap> {
    let mut content = PropertyMap::new();
    for (name, v) in token.type_properties.iter().filter(|(_, v)| !v.is_null()) {
        let vt = spec.get(name).copied().or_else(|| ValueType::of(v)).ok_or_else(|| {
            Error::Schema(format!("type property '{name}' has unsupported {} value", v.type_name()))
        })?;
        let value = vt.coerce(v.clone())?;
        if value != vt.default_value() {
            content.insert(name.clone(), value);
        }
    }
    Ok(content)
}

fn registered_values<'a>(
    props: &PropertyMap,
    spec: impl Iterator<Item = (&'a String, &'a ValueType)>,
) -> Result<Vec<Value>> {
    spec.map(|(name, vt)| value_or_default(props.get(name), *vt)).collect()
}

/// Plan the bulk load of `stage` into `corpus`.
///
/// `hierarchy` must already contain every staged level, with the same
/// parents the discourse declares, and every property the tokens carry.
pub fn plan_discourse(corpus: &str, stage: &DiscourseStage, hierarchy: &Hierarchy, precision: u32) -> Result<LoadPlan> {
    let discourse = stage.name();

    let mut speakers = Batch::new("speakers", vec!["name".into()]);
    for speaker in stage.speakers() {
        speakers.push(vec![Value::String(speaker)])?;
    }

    let mut anchors: BTreeMap<(String, i64), f64> = BTreeMap::new();
    let mut type_steps = Vec::new();
    let mut token_steps = Vec::new();
    let mut containment_steps = Vec::new();

    for staged in stage.levels() {
        let level = staged.level();
        let parent = hierarchy.parent_of(level);
        if !hierarchy.has_level(level) || parent != staged.contained_by.as_deref() {
            return Err(Error::Schema(format!(
                "level '{level}' is contained by {:?} in discourse '{discourse}' but by {:?} in the corpus",
                staged.contained_by,
                parent
            )));
        }
        let type_spec: PropertySpec =
            hierarchy.type_properties(level).map(|(k, v)| (k.clone(), *v)).collect();

        let mut types = Batch::new(format!("{level}_types"), type_columns(hierarchy, level));
        let mut seen_types = HashSet::new();
        let mut tokens = Batch::new(format!("{level}_tokens"), token_columns(hierarchy, level));
        let mut links = Batch::new(format!("{level}_containment"), vec!["token_id".into(), "parent_id".into()]);

        for speaker in staged.buffer.speakers() {
            let slot = TokenSlot { corpus, discourse, level, speaker };
            for (ordinal, token) in staged.buffer.track(speaker).iter().enumerate() {
                let content = supplied(token, &type_spec)?;
                let tkey = type_key(corpus, &token.label, &content);
                if seen_types.insert(tkey.clone()) {
                    let mut row = vec![Value::String(tkey.clone()), Value::String(token.label.clone())];
                    row.extend(registered_values(&content, hierarchy.type_properties(level))?);
                    types.push(row)?;
                }

                let (bk, ek) = (time_key(token.begin, precision), time_key(token.end, precision));
                anchors.insert((speaker.clone(), bk), token.begin);
                anchors.insert((speaker.clone(), ek), token.end);
                let token_id = token_key(slot, ordinal, bk, ek);

                let mut row = vec![
                    Value::String(anchor_key(corpus, discourse, speaker, bk)),
                    Value::String(anchor_key(corpus, discourse, speaker, ek)),
                    Value::String(tkey),
                    Value::String(token_id.clone()),
                    Value::Float(token.begin),
                    Value::Float(token.end),
                    Value::String(speaker.clone()),
                ];
                row.extend(registered_values(&token.token_properties, hierarchy.token_properties(level))?);

                if let Some(parent_level) = parent {
                    let parent_id = parent_token_id(stage, corpus, parent_level, speaker, staged.parent(speaker, ordinal), precision)
                        .ok_or_else(|| Error::ShapeMismatch {
                            discourse: discourse.to_owned(),
                            message: format!("{level} '{}' has no {parent_level} container", token.label),
                        })?;
                    row.push(Value::String(parent_id.clone()));
                    links.push(vec![Value::String(token_id), Value::String(parent_id)])?;
                }
                tokens.push(row)?;
            }
        }

        let type_props: Vec<String> = type_spec.keys().cloned().collect();
        let token_props: Vec<String> = hierarchy.token_properties(level).map(|(k, _)| k.clone()).collect();
        type_steps.push(LoadStep {
            kind: StepKind::Types(level.to_owned()),
            statement: statements::types(corpus, level, &type_props),
            batch: types,
        });
        token_steps.push(LoadStep {
            kind: StepKind::Tokens(level.to_owned()),
            statement: statements::tokens(corpus, level, &token_props),
            batch: tokens,
        });
        if let Some(parent_level) = parent {
            containment_steps.push(LoadStep {
                kind: StepKind::Containment { level: level.to_owned(), parent: parent_level.to_owned() },
                statement: statements::containment(corpus, level, parent_level),
                batch: links,
            });
        }
    }

    let mut anchor_batch = Batch::new("anchors", vec!["anchor_id".into(), "time".into(), "speaker".into()]);
    for ((speaker, key), time) in anchors {
        anchor_batch.push(vec![
            Value::String(anchor_key(corpus, discourse, &speaker, key)),
            Value::Float(time),
            Value::String(speaker),
        ])?;
    }

    let mut steps = vec![LoadStep { kind: StepKind::Speakers, statement: statements::speakers(corpus), batch: speakers }];
    steps.extend(type_steps);
    steps.push(LoadStep { kind: StepKind::Anchors, statement: statements::anchors(corpus), batch: anchor_batch });
    steps.extend(token_steps);
    steps.extend(containment_steps);

    Ok(LoadPlan {
        discourse: discourse.to_owned(),
        steps,
        discourse_properties: stage.properties().clone(),
    })
}

fn parent_token_id(
    stage: &DiscourseStage,
    corpus: &str,
    parent_level: &str,
    speaker: &str,
    index: Option<usize>,
    precision: u32,
) -> Option<String> {
    let index = index?;
    let parent = stage.level(parent_level)?;
    let token = parent.buffer.track(speaker).get(index)?;
    let slot = TokenSlot { corpus, discourse: stage.name(), level: parent_level, speaker };
    Some(token_key(slot, index, time_key(token.begin, precision), time_key(token.end, precision)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StagingConfig;
    use crate::schema::PropertyOwner;
    use crate::staging::{ParsedDiscourse, ParsedLevel};
    use pretty_assertions::assert_eq;

    fn stage() -> DiscourseStage {
        let parsed = ParsedDiscourse::new("d1")
            .level(ParsedLevel::new("word").token(AnnotationToken::new("the", 0.0, 0.2)).token(
                AnnotationToken::new("the", 0.2, 0.4).token_property("stressed", true),
            ))
            .level(
                ParsedLevel::new("phone")
                    .contained_by("word")
                    .token(AnnotationToken::new("dh", 0.0, 0.1))
                    .token(AnnotationToken::new("ah", 0.1, 0.2))
                    .token(AnnotationToken::new("dh", 0.2, 0.3))
                    .token(AnnotationToken::new("iy", 0.3, 0.4)),
            );
        DiscourseStage::build(parsed, &StagingConfig::default(), 6).unwrap()
    }

    fn hierarchy() -> Hierarchy {
        let mut h = Hierarchy::new("c");
        h.add_level("word", None).unwrap();
        h.add_level("phone", Some("word")).unwrap();
        h.add_property(&PropertyOwner::token_of("word"), "stressed", ValueType::Boolean).unwrap();
        h
    }

    #[test]
    fn test_step_order() {
        let plan = plan_discourse("c", &stage(), &hierarchy(), 6).unwrap();
        let kinds: Vec<String> = plan.steps.iter().map(|s| s.kind.to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "speakers",
                "types:phone",
                "types:word",
                "anchors",
                "tokens:phone",
                "tokens:word",
                "containment:phone->word",
            ]
        );
    }

    #[test]
    fn test_types_are_deduplicated() {
        let plan = plan_discourse("c", &stage(), &hierarchy(), 6).unwrap();
        assert_eq!(plan.step(&StepKind::Types("word".into())).unwrap().batch.len(), 1);
        assert_eq!(plan.step(&StepKind::Types("phone".into())).unwrap().batch.len(), 3);
        assert_eq!(plan.step(&StepKind::Anchors).unwrap().batch.len(), 5);
        assert_eq!(
            plan.outcome(),
            LoadOutcome::Loaded { discourse: "d1".into(), types: 4, tokens: 6, anchors: 5 }
        );
    }

    #[test]
    fn test_default_type_value_shares_the_omitted_key() {
        let parsed = ParsedDiscourse::new("d1").level(
            ParsedLevel::new("word")
                .token(AnnotationToken::new("cat", 0.0, 0.3))
                .token(AnnotationToken::new("cat", 0.3, 0.6).type_property("transcription", ""))
                .token(AnnotationToken::new("cat", 0.6, 0.9).type_property("transcription", "k.ae.t")),
        );
        let stage = DiscourseStage::build(parsed, &StagingConfig::default(), 6).unwrap();
        let mut h = Hierarchy::new("c");
        h.add_level("word", None).unwrap();
        h.add_property(&PropertyOwner::type_of("word"), "transcription", ValueType::String).unwrap();

        let plan = plan_discourse("c", &stage, &h, 6).unwrap();
        let types = &plan.step(&StepKind::Types("word".into())).unwrap().batch;
        assert_eq!(types.len(), 2);
        let tokens = &plan.step(&StepKind::Tokens("word".into())).unwrap().batch;
        let key = tokens.column_index("type_key").unwrap();
        assert_eq!(tokens.rows[0][key], tokens.rows[1][key]);
        assert_ne!(tokens.rows[0][key], tokens.rows[2][key]);
    }

    #[test]
    fn test_token_columns_and_defaults() {
        let plan = plan_discourse("c", &stage(), &hierarchy(), 6).unwrap();
        let words = &plan.step(&StepKind::Tokens("word".into())).unwrap().batch;
        assert_eq!(
            words.columns,
            vec!["from_anchor_id", "to_anchor_id", "type_key", "token_id", "begin", "end", "speaker", "stressed"]
        );
        let stressed = words.column_index("stressed").unwrap();
        assert_eq!(words.rows[0][stressed], Value::Bool(false));
        assert_eq!(words.rows[1][stressed], Value::Bool(true));

        let phones = &plan.step(&StepKind::Tokens("phone".into())).unwrap().batch;
        assert_eq!(phones.columns.last().map(String::as_str), Some("parent_id"));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let a = plan_discourse("c", &stage(), &hierarchy(), 6).unwrap();
        let b = plan_discourse("c", &stage(), &hierarchy(), 6).unwrap();
        for (x, y) in a.steps.iter().zip(&b.steps) {
            assert_eq!(x.batch, y.batch);
        }
    }

    #[test]
    fn test_parent_mismatch_is_schema_error() {
        let mut h = Hierarchy::new("c");
        h.add_level("phone", None).unwrap();
        h.add_level("word", None).unwrap();
        h.add_level("syllable", Some("word")).unwrap();
        let err = plan_discourse("c", &stage(), &h, 6).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
