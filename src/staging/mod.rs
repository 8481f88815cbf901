//! # Discourse Staging
//!
//! Parser output for one discourse is staged here before the bulk loader
//! sees it. A [`StagingBuffer`] holds one level's tokens, split into
//! per-speaker tracks sorted by begin time, and answers point and range
//! lookups. [`DiscourseStage`] validates a whole discourse (level chain,
//! aligned columns, containment) so that nothing malformed reaches the
//! store.
//!
//! Buffers are write-once, read-many and are dropped once their discourse
//! has been committed.

mod discourse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::StagingConfig;
use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

pub use discourse::{DiscourseStage, StagedLevel};

// ============================================================================
// Parser-facing input types
// ============================================================================

/// One annotation as a parser delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationToken {
    pub label: String,
    pub begin: f64,
    pub end: f64,
    /// Empty means "the discourse's default speaker".
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub type_properties: PropertyMap,
    #[serde(default)]
    pub token_properties: PropertyMap,
}

impl AnnotationToken {
    pub fn new(label: impl Into<String>, begin: f64, end: f64) -> Self {
        Self {
            label: label.into(),
            begin,
            end,
            speaker: String::new(),
            type_properties: PropertyMap::new(),
            token_properties: PropertyMap::new(),
        }
    }

    /// A point annotation.
    pub fn point(label: impl Into<String>, time: f64) -> Self {
        Self::new(label, time, time)
    }

    pub fn speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = speaker.into();
        self
    }

    pub fn type_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.type_properties.insert(key.into(), value.into());
        self
    }

    pub fn token_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.token_properties.insert(key.into(), value.into());
        self
    }

    pub fn is_point(&self) -> bool {
        self.begin == self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.begin
    }

    /// Whether this token lies inside `[begin, end]`.
    pub fn within(&self, begin: f64, end: f64) -> bool {
        begin <= self.begin && self.end <= end
    }

    fn overlaps(&self, begin: f64, end: f64) -> bool {
        if self.is_point() || begin == end {
            self.begin <= end && begin <= self.end
        } else {
            self.begin < end && begin < self.end
        }
    }
}

/// Whether an aligned column feeds type or token properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnTarget {
    Type,
    Token,
}

/// A property delivered as its own tier, one value per token of the level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedColumn {
    pub name: String,
    pub target: ColumnTarget,
    pub values: Vec<Value>,
}

/// One level of one discourse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLevel {
    pub level: String,
    /// The level whose tokens contain these ones.
    #[serde(default)]
    pub contained_by: Option<String>,
    pub tokens: Vec<AnnotationToken>,
    #[serde(default)]
    pub aligned_columns: Vec<AlignedColumn>,
}

impl ParsedLevel {
    pub fn new(level: impl Into<String>) -> Self {
        Self { level: level.into(), contained_by: None, tokens: Vec::new(), aligned_columns: Vec::new() }
    }

    pub fn contained_by(mut self, parent: impl Into<String>) -> Self {
        self.contained_by = Some(parent.into());
        self
    }

    pub fn token(mut self, token: AnnotationToken) -> Self {
        self.tokens.push(token);
        self
    }

    pub fn tokens(mut self, tokens: impl IntoIterator<Item = AnnotationToken>) -> Self {
        self.tokens.extend(tokens);
        self
    }

    pub fn aligned(mut self, name: impl Into<String>, target: ColumnTarget, values: Vec<Value>) -> Self {
        self.aligned_columns.push(AlignedColumn { name: name.into(), target, values });
        self
    }
}

/// Everything a parser yields for one discourse.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedDiscourse {
    pub name: String,
    pub levels: Vec<ParsedLevel>,
    /// Discourse-level properties (recording date, channel, ...).
    #[serde(default)]
    pub properties: PropertyMap,
}

impl ParsedDiscourse {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn level(mut self, level: ParsedLevel) -> Self {
        self.levels.push(level);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Time keys
// ============================================================================

/// Integer time at `precision` decimal places; equal keys mean "same instant".
pub fn time_key(time: f64, precision: u32) -> i64 {
    (time * 10f64.powi(precision as i32)).round() as i64
}

/// `time` rounded to `precision` decimal places.
pub fn round_time(time: f64, precision: u32) -> f64 {
    time_key(time, precision) as f64 / 10f64.powi(precision as i32)
}

// ============================================================================
// StagingBuffer
// ============================================================================

/// Begin-time index over one track.
#[derive(Debug, Clone)]
enum TrackIndex {
    /// Every begin time.
    Full(Vec<f64>),
    /// The begin time of every `stride`-th token.
    Sparse { stride: usize, checkpoints: Vec<f64> },
}

#[derive(Debug, Clone)]
struct Track {
    tokens: Vec<AnnotationToken>,
    index: TrackIndex,
}

impl Track {
    fn new(tokens: Vec<AnnotationToken>, config: &StagingConfig) -> Self {
        let index = if tokens.len() > config.sparse_threshold {
            let stride = config.checkpoint_stride.max(1);
            TrackIndex::Sparse {
                stride,
                checkpoints: tokens.iter().step_by(stride).map(|t| t.begin).collect(),
            }
        } else {
            TrackIndex::Full(tokens.iter().map(|t| t.begin).collect())
        };
        Self { tokens, index }
    }

    /// Number of tokens whose begin satisfies `pred` (a prefix, since
    /// tokens are sorted by begin).
    fn count_prefix(&self, pred: impl Fn(f64) -> bool) -> usize {
        match &self.index {
            TrackIndex::Full(begins) => begins.partition_point(|b| pred(*b)),
            TrackIndex::Sparse { stride, checkpoints } => {
                let k = checkpoints.partition_point(|b| pred(*b));
                if k == 0 {
                    return 0;
                }
                let start = (k - 1) * stride;
                let end = (start + stride).min(self.tokens.len());
                start + self.tokens[start..end].iter().take_while(|t| pred(t.begin)).count()
            }
        }
    }

    fn locate(&self, time: f64) -> Option<usize> {
        let i = self.count_prefix(|b| b <= time).checked_sub(1)?;
        let t = &self.tokens[i];
        if (t.begin <= time && time < t.end) || t.end == time {
            Some(i)
        } else {
            None
        }
    }

    fn range(&self, begin: f64, end: f64) -> impl Iterator<Item = (usize, &AnnotationToken)> {
        let start = self.count_prefix(|b| b < begin).saturating_sub(1);
        self.tokens[start..]
            .iter()
            .enumerate()
            .map(move |(i, t)| (start + i, t))
            .take_while(move |(_, t)| t.begin <= end)
            .filter(move |(_, t)| t.overlaps(begin, end))
    }
}

/// One level's tokens for one discourse, split into per-speaker tracks.
#[derive(Debug, Clone)]
pub struct StagingBuffer {
    level: String,
    tracks: BTreeMap<String, Track>,
    len: usize,
}

impl StagingBuffer {
    /// Stage `tokens`, rounding times to `precision` places.
    ///
    /// Fails with `ShapeMismatch` on non-finite times, `begin > end`, or
    /// overlapping tokens within one speaker's track.
    pub fn build(
        discourse: &str,
        level: &str,
        tokens: Vec<AnnotationToken>,
        config: &StagingConfig,
        precision: u32,
    ) -> Result<Self> {
        let shape = |message: String| Error::ShapeMismatch { discourse: discourse.to_owned(), message };
        let len = tokens.len();
        let mut by_speaker: BTreeMap<String, Vec<AnnotationToken>> = BTreeMap::new();
        for mut t in tokens {
            if !t.begin.is_finite() || !t.end.is_finite() {
                return Err(shape(format!("{level} '{}' has a non-finite time", t.label)));
            }
            t.begin = round_time(t.begin, precision);
            t.end = round_time(t.end, precision);
            if t.begin > t.end {
                return Err(shape(format!(
                    "{level} '{}' begins at {} after it ends at {}",
                    t.label, t.begin, t.end
                )));
            }
            by_speaker.entry(t.speaker.clone()).or_default().push(t);
        }

        let mut tracks = BTreeMap::new();
        for (speaker, mut list) in by_speaker {
            list.sort_by(|a, b| a.begin.total_cmp(&b.begin).then(a.end.total_cmp(&b.end)));
            for pair in list.windows(2) {
                if pair[1].begin < pair[0].end {
                    return Err(shape(format!(
                        "{level} tokens '{}' [{}, {}] and '{}' [{}, {}] of speaker '{speaker}' overlap",
                        pair[0].label, pair[0].begin, pair[0].end, pair[1].label, pair[1].begin, pair[1].end,
                    )));
                }
            }
            tracks.insert(speaker, Track::new(list, config));
        }
        Ok(Self { level: level.to_owned(), tracks, len })
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn speakers(&self) -> impl Iterator<Item = &String> {
        self.tracks.keys()
    }

    /// One speaker's tokens in time order.
    pub fn track(&self, speaker: &str) -> &[AnnotationToken] {
        self.tracks.get(speaker).map(|t| t.tokens.as_slice()).unwrap_or(&[])
    }

    /// All tokens, speaker by speaker, each track in time order.
    pub fn iter(&self) -> impl Iterator<Item = &AnnotationToken> {
        self.tracks.values().flat_map(|t| t.tokens.iter())
    }

    pub fn is_sparse(&self, speaker: &str) -> bool {
        self.tracks
            .get(speaker)
            .is_some_and(|t| matches!(t.index, TrackIndex::Sparse { .. }))
    }

    /// The token covering `time`: `begin <= time < end` wins, a token ending
    /// exactly at `time` is the fallback. Without a speaker, tracks are
    /// searched in speaker-name order.
    pub fn lookup(&self, time: f64, speaker: Option<&str>) -> Option<&AnnotationToken> {
        self.selected(speaker)
            .into_iter()
            .find_map(|track| track.locate(time).map(|i| &track.tokens[i]))
    }

    /// Index of the covering token within `speaker`'s track.
    pub fn locate(&self, time: f64, speaker: &str) -> Option<usize> {
        self.tracks.get(speaker)?.locate(time)
    }

    /// Tokens overlapping `[begin, end]`, in begin order per speaker.
    pub fn lookup_range(&self, begin: f64, end: f64, speaker: Option<&str>) -> Vec<&AnnotationToken> {
        self.selected(speaker)
            .into_iter()
            .flat_map(|track| track.range(begin, end).map(|(_, t)| t))
            .collect()
    }

    /// Index (within `speaker`'s track) of the token that contains
    /// `[begin, end]`, if any.
    pub fn container_of(&self, begin: f64, end: f64, speaker: &str) -> Option<usize> {
        let track = self.tracks.get(speaker)?;
        track
            .range(begin, end)
            .find(|(_, t)| begin >= t.begin && end <= t.end)
            .map(|(i, _)| i)
    }

    fn selected(&self, speaker: Option<&str>) -> Vec<&Track> {
        self.tracks
            .iter()
            .filter(|(name, _)| speaker.is_none_or(|s| s == name.as_str()))
            .map(|(_, track)| track)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(threshold: usize) -> StagingConfig {
        StagingConfig { sparse_threshold: threshold, checkpoint_stride: 4 }
    }

    fn word_buffer(threshold: usize) -> StagingBuffer {
        let tokens = vec![
            AnnotationToken::new("the", 0.0, 0.2),
            AnnotationToken::new("cat", 0.2, 0.6),
            AnnotationToken::new("sat", 0.8, 1.1),
        ];
        StagingBuffer::build("d1", "word", tokens, &config(threshold), 6).unwrap()
    }

    #[test]
    fn test_lookup_prefers_interval_start() {
        let buf = word_buffer(512);
        assert_eq!(buf.lookup(0.2, None).map(|t| t.label.as_str()), Some("cat"));
        assert_eq!(buf.lookup(0.1, None).map(|t| t.label.as_str()), Some("the"));
        // Gap between 0.6 and 0.8, except the boundary of "cat".
        assert_eq!(buf.lookup(0.6, None).map(|t| t.label.as_str()), Some("cat"));
        assert!(buf.lookup(0.7, None).is_none());
        assert_eq!(buf.lookup(1.1, None).map(|t| t.label.as_str()), Some("sat"));
    }

    #[test]
    fn test_lookup_range_overlap() {
        let buf = word_buffer(512);
        let labels: Vec<&str> = buf.lookup_range(0.5, 0.9, None).iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["cat", "sat"]);
        // Touching is not overlapping.
        let labels: Vec<&str> = buf.lookup_range(0.6, 0.8, None).iter().map(|t| t.label.as_str()).collect();
        assert!(labels.is_empty());
    }

    #[test]
    fn test_speaker_filter() {
        let tokens = vec![
            AnnotationToken::new("a", 0.0, 1.0).speaker("s1"),
            AnnotationToken::new("b", 0.0, 1.0).speaker("s2"),
        ];
        let buf = StagingBuffer::build("d1", "word", tokens, &config(512), 6).unwrap();
        assert_eq!(buf.lookup(0.5, Some("s2")).map(|t| t.label.as_str()), Some("b"));
        assert_eq!(buf.lookup_range(0.0, 1.0, None).len(), 2);
    }

    #[test]
    fn test_lookup_result_outlives_speaker_name() {
        let tokens = vec![AnnotationToken::new("a", 0.0, 1.0).speaker("s1")];
        let buf = StagingBuffer::build("d1", "word", tokens, &config(512), 6).unwrap();
        let (found, overlapping) = {
            let speaker = String::from("s1");
            (buf.lookup(0.5, Some(&speaker)), buf.lookup_range(0.0, 1.0, Some(speaker.as_str())))
        };
        assert_eq!(found.map(|t| t.label.as_str()), Some("a"));
        assert_eq!(overlapping.len(), 1);
    }

    #[test]
    fn test_overlap_within_speaker_is_shape_mismatch() {
        let tokens = vec![AnnotationToken::new("a", 0.0, 0.5), AnnotationToken::new("b", 0.4, 0.9)];
        let err = StagingBuffer::build("d1", "word", tokens, &config(512), 6).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_reversed_interval_is_shape_mismatch() {
        let tokens = vec![AnnotationToken::new("a", 0.5, 0.1)];
        assert!(StagingBuffer::build("d1", "word", tokens, &config(512), 6).is_err());
    }

    fn contiguous(durations: &[u32]) -> Vec<AnnotationToken> {
        let mut t = 0u32;
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let tok = AnnotationToken::new(format!("t{i}"), t as f64 / 100.0, (t + d) as f64 / 100.0);
                t += d + (i as u32 % 3); // occasional gaps
                tok
            })
            .collect()
    }

    proptest! {
        #[test]
        fn sparse_and_full_indexes_agree(
            durations in prop::collection::vec(1u32..20, 1..200),
            at in 0u32..5000,
        ) {
            let tokens = contiguous(&durations);
            let full = StagingBuffer::build("d", "phone", tokens.clone(), &config(10_000), 6).unwrap();
            let sparse = StagingBuffer::build("d", "phone", tokens.clone(), &config(0), 6).unwrap();
            prop_assert!(sparse.is_sparse(""));
            let time = at as f64 / 100.0;

            let brute = tokens.iter().find(|t| t.begin <= time && time < t.end)
                .or_else(|| tokens.iter().find(|t| t.end == time));
            prop_assert_eq!(full.lookup(time, None).map(|t| &t.label), brute.map(|t| &t.label));
            prop_assert_eq!(sparse.lookup(time, None).map(|t| &t.label), brute.map(|t| &t.label));

            let hi = time + 0.15;
            let expected: Vec<&String> = tokens.iter().filter(|t| t.begin < hi && time < t.end).map(|t| &t.label).collect();
            let got: Vec<&String> = sparse.lookup_range(time, hi, None).iter().map(|t| &t.label).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
