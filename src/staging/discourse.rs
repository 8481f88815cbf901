//! Whole-discourse validation and containment linking.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{AnnotationToken, ColumnTarget, ParsedDiscourse, StagingBuffer};
use crate::config::StagingConfig;
use crate::model::PropertyMap;
use crate::{Error, Result};

/// One staged level plus the index of each token's container.
#[derive(Debug, Clone)]
pub struct StagedLevel {
    pub buffer: StagingBuffer,
    pub contained_by: Option<String>,
    /// Per speaker: for every token of the track, its parent's index in the
    /// parent level's track for the same speaker.
    parents: BTreeMap<String, Vec<usize>>,
}

impl StagedLevel {
    pub fn level(&self) -> &str {
        self.buffer.level()
    }

    /// Parent index of token `index` of `speaker`'s track.
    pub fn parent(&self, speaker: &str, index: usize) -> Option<usize> {
        self.parents.get(speaker)?.get(index).copied()
    }
}

/// A validated discourse, levels ordered lowest first.
#[derive(Debug, Clone)]
pub struct DiscourseStage {
    name: String,
    properties: PropertyMap,
    levels: Vec<StagedLevel>,
}

impl DiscourseStage {
    /// Validate `parsed` and stage every level.
    ///
    /// Any problem is a `ShapeMismatch` and nothing is kept: the level
    /// chain must be linear, aligned columns must match their level's token
    /// count, and every token of a contained level must lie inside a token
    /// of its parent level for the same speaker.
    pub fn build(parsed: ParsedDiscourse, config: &StagingConfig, precision: u32) -> Result<Self> {
        let ParsedDiscourse { name, levels: parsed_levels, properties } = parsed;
        let shape = |message: String| Error::ShapeMismatch { discourse: name.clone(), message };
        if name.trim().is_empty() {
            return Err(shape("discourse name must not be empty".into()));
        }

        let order = chain_order(&parsed_levels).map_err(&shape)?;

        let mut by_name: HashMap<String, super::ParsedLevel> =
            parsed_levels.into_iter().map(|l| (l.level.clone(), l)).collect();
        let mut levels: Vec<StagedLevel> = Vec::with_capacity(order.len());
        for level_name in order {
            let Some(mut level) = by_name.remove(&level_name) else {
                continue;
            };
            for column in std::mem::take(&mut level.aligned_columns) {
                if column.values.len() != level.tokens.len() {
                    return Err(shape(format!(
                        "aligned column '{}' has {} values for {} {} tokens",
                        column.name,
                        column.values.len(),
                        level.tokens.len(),
                        level.level
                    )));
                }
                for (token, value) in level.tokens.iter_mut().zip(column.values) {
                    let target = match column.target {
                        ColumnTarget::Type => &mut token.type_properties,
                        ColumnTarget::Token => &mut token.token_properties,
                    };
                    target.insert(column.name.clone(), value);
                }
            }
            for token in &mut level.tokens {
                if token.speaker.is_empty() {
                    token.speaker.clone_from(&name);
                }
            }
            let buffer = StagingBuffer::build(&name, &level.level, level.tokens, config, precision)?;
            levels.push(StagedLevel { buffer, contained_by: level.contained_by, parents: BTreeMap::new() });
        }

        // Lowest level last in `levels` so far (walked from the top); link
        // each level to the one before it.
        for i in 1..levels.len() {
            let (upper, lower) = levels.split_at_mut(i);
            let parent = &upper[i - 1];
            let child = &mut lower[0];
            child.parents = link(&name, parent, child)?;
        }
        levels.reverse();

        Ok(Self { name, properties, levels })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Staged levels, lowest first.
    pub fn levels(&self) -> &[StagedLevel] {
        &self.levels
    }

    pub fn level(&self, name: &str) -> Option<&StagedLevel> {
        self.levels.iter().find(|l| l.level() == name)
    }

    pub fn speakers(&self) -> BTreeSet<String> {
        self.levels
            .iter()
            .flat_map(|l| l.buffer.speakers().cloned())
            .collect()
    }

    pub fn token_count(&self) -> usize {
        self.levels.iter().map(|l| l.buffer.len()).sum()
    }
}

/// Level names from the top of the containment chain down.
fn chain_order(levels: &[super::ParsedLevel]) -> std::result::Result<Vec<String>, String> {
    let mut seen = BTreeSet::new();
    for level in levels {
        if !seen.insert(level.level.as_str()) {
            return Err(format!("level '{}' appears twice", level.level));
        }
    }
    let mut child_of: HashMap<&str, &str> = HashMap::new();
    let mut roots = Vec::new();
    for level in levels {
        match level.contained_by.as_deref() {
            None => roots.push(level.level.as_str()),
            Some(parent) if !seen.contains(parent) => {
                return Err(format!(
                    "level '{}' is contained by '{parent}', which has no tokens in this discourse",
                    level.level
                ));
            }
            Some(parent) => {
                if let Some(other) = child_of.insert(parent, level.level.as_str()) {
                    return Err(format!(
                        "levels '{other}' and '{}' are both contained by '{parent}'",
                        level.level
                    ));
                }
            }
        }
    }
    if levels.is_empty() {
        return Ok(Vec::new());
    }
    let [root] = roots.as_slice() else {
        return Err(format!("expected one top level, found {}", roots.len()));
    };
    let mut order = vec![root.to_string()];
    let mut at = *root;
    while let Some(next) = child_of.get(at) {
        order.push(next.to_string());
        at = *next;
    }
    if order.len() != levels.len() {
        return Err("level containment chain is cyclic".into());
    }
    Ok(order)
}

fn link(discourse: &str, parent: &StagedLevel, child: &StagedLevel) -> Result<BTreeMap<String, Vec<usize>>> {
    let shape = |message: String| Error::ShapeMismatch { discourse: discourse.to_owned(), message };
    let mut parents = BTreeMap::new();
    for speaker in child.buffer.speakers() {
        if parent.buffer.track(speaker).is_empty() {
            return Err(shape(format!(
                "speaker '{speaker}' has {} tokens but no {} tokens",
                child.level(),
                parent.level()
            )));
        }
        let indices = child
            .buffer
            .track(speaker)
            .iter()
            .map(|token| {
                parent
                    .buffer
                    .container_of(token.begin, token.end, speaker)
                    .ok_or_else(|| shape(uncontained(token, child.level(), parent.level())))
            })
            .collect::<Result<Vec<_>>>()?;
        parents.insert(speaker.clone(), indices);
    }
    Ok(parents)
}

fn uncontained(token: &AnnotationToken, level: &str, parent: &str) -> String {
    format!(
        "{level} '{}' [{}, {}] of speaker '{}' is not contained by any {parent}",
        token.label, token.begin, token.end, token.speaker
    )
}

#[cfg(test)]
mod tests {
    use super::super::{AnnotationToken, ParsedLevel};
    use super::*;
    use crate::model::Value;

    fn cat() -> ParsedDiscourse {
        ParsedDiscourse::new("d1")
            .level(
                ParsedLevel::new("phone")
                    .contained_by("word")
                    .token(AnnotationToken::new("k", 0.0, 0.1))
                    .token(AnnotationToken::new("ae", 0.1, 0.3))
                    .token(AnnotationToken::new("t", 0.3, 0.4)),
            )
            .level(ParsedLevel::new("word").token(AnnotationToken::new("cat", 0.0, 0.4)))
    }

    #[test]
    fn test_levels_come_out_lowest_first() {
        let stage = DiscourseStage::build(cat(), &StagingConfig::default(), 6).unwrap();
        let names: Vec<&str> = stage.levels().iter().map(|l| l.level()).collect();
        assert_eq!(names, vec!["phone", "word"]);
        let phones = &stage.levels()[0];
        assert_eq!(phones.parent("d1", 2), Some(0));
        assert_eq!(stage.speakers().into_iter().collect::<Vec<_>>(), vec!["d1".to_string()]);
    }

    #[test]
    fn test_uncontained_token_is_rejected() {
        let parsed = ParsedDiscourse::new("d1")
            .level(ParsedLevel::new("word").token(AnnotationToken::new("cat", 0.0, 0.4)))
            .level(
                ParsedLevel::new("phone")
                    .contained_by("word")
                    .token(AnnotationToken::new("s", 0.35, 0.5)),
            );
        let err = DiscourseStage::build(parsed, &StagingConfig::default(), 6).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_aligned_column_length_must_match() {
        let parsed = ParsedDiscourse::new("d1").level(
            ParsedLevel::new("word")
                .token(AnnotationToken::new("cat", 0.0, 0.4))
                .aligned("pos", ColumnTarget::Token, vec![Value::from("NN"), Value::from("VB")]),
        );
        assert!(DiscourseStage::build(parsed, &StagingConfig::default(), 6).is_err());
    }

    #[test]
    fn test_aligned_column_fills_properties() {
        let parsed = ParsedDiscourse::new("d1").level(
            ParsedLevel::new("word")
                .token(AnnotationToken::new("cat", 0.0, 0.4))
                .aligned("transcription", ColumnTarget::Type, vec![Value::from("k ae t")]),
        );
        let stage = DiscourseStage::build(parsed, &StagingConfig::default(), 6).unwrap();
        let token = &stage.levels()[0].buffer.track("d1")[0];
        assert_eq!(token.type_properties.get("transcription"), Some(&Value::from("k ae t")));
    }

    #[test]
    fn test_branching_chain_is_rejected() {
        let parsed = ParsedDiscourse::new("d1")
            .level(ParsedLevel::new("word").token(AnnotationToken::new("cat", 0.0, 0.4)))
            .level(ParsedLevel::new("phone").contained_by("word"))
            .level(ParsedLevel::new("syllable").contained_by("word"));
        assert!(DiscourseStage::build(parsed, &StagingConfig::default(), 6).is_err());
    }

    #[test]
    fn test_missing_parent_track_is_rejected() {
        let parsed = ParsedDiscourse::new("d1")
            .level(ParsedLevel::new("word").token(AnnotationToken::new("cat", 0.0, 0.4).speaker("a")))
            .level(
                ParsedLevel::new("phone")
                    .contained_by("word")
                    .token(AnnotationToken::new("k", 0.0, 0.1).speaker("b")),
            );
        assert!(DiscourseStage::build(parsed, &StagingConfig::default(), 6).is_err());
    }
}
