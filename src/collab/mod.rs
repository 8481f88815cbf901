//! Interfaces to the systems around a corpus.
//!
//! Parsers, the lexicon side-store and the acoustic track store live outside
//! this crate. Each is a trait here, with a small in-memory implementation
//! for embedding and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::PropertyMap;
use crate::staging::ParsedDiscourse;
use crate::{Error, Result};

// ============================================================================
// Parsed input
// ============================================================================

/// Yields parsed discourses, e.g. from a directory of annotation files.
pub trait DiscourseSource {
    /// Names of the discourses this source can produce, in load order.
    fn discourses(&self) -> Result<Vec<String>>;

    fn parse(&self, name: &str) -> Result<ParsedDiscourse>;
}

/// Already-parsed discourses held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    discourses: Vec<ParsedDiscourse>,
}

impl MemorySource {
    pub fn new(discourses: impl IntoIterator<Item = ParsedDiscourse>) -> Self {
        Self { discourses: discourses.into_iter().collect() }
    }
}

impl DiscourseSource for MemorySource {
    fn discourses(&self) -> Result<Vec<String>> {
        Ok(self.discourses.iter().map(|d| d.name.clone()).collect())
    }

    fn parse(&self, name: &str) -> Result<ParsedDiscourse> {
        self.discourses
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("discourse '{name}'")))
    }
}

// ============================================================================
// Lexicon
// ============================================================================

/// Word-level lexical metadata keyed by label (frequency, transcription, ...).
pub trait LexiconSource {
    fn lookup(&self, label: &str) -> Result<Option<PropertyMap>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLexicon {
    entries: HashMap<String, PropertyMap>,
}

impl MemoryLexicon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, label: impl Into<String>, properties: PropertyMap) -> Self {
        self.entries.insert(label.into(), properties);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LexiconSource for MemoryLexicon {
    fn lookup(&self, label: &str) -> Result<Option<PropertyMap>> {
        Ok(self.entries.get(label).cloned())
    }
}

// ============================================================================
// Tracks
// ============================================================================

/// Identifies one time series: `(discourse, speaker, channel)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub discourse: String,
    pub speaker: String,
    /// e.g. "pitch", "F1"
    pub channel: String,
}

impl TrackKey {
    pub fn new(discourse: impl Into<String>, speaker: impl Into<String>, channel: impl Into<String>) -> Self {
        Self { discourse: discourse.into(), speaker: speaker.into(), channel: channel.into() }
    }
}

/// Store of `(time, value)` samples.
pub trait TrackStore {
    /// Replace the samples of `key`.
    fn save(&self, key: &TrackKey, samples: Vec<(f64, f64)>) -> Result<()>;

    /// Samples with `begin <= time <= end`, ascending by time.
    fn samples(&self, key: &TrackKey, begin: f64, end: f64) -> Result<Vec<(f64, f64)>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTrackStore {
    tracks: Arc<RwLock<BTreeMap<TrackKey, Vec<(f64, f64)>>>>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackStore for MemoryTrackStore {
    fn save(&self, key: &TrackKey, mut samples: Vec<(f64, f64)>) -> Result<()> {
        if let Some((t, _)) = samples.iter().find(|(t, _)| !t.is_finite()) {
            return Err(Error::ExecutionError(format!(
                "track {}/{}/{} has a non-finite time {t}",
                key.discourse, key.speaker, key.channel
            )));
        }
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.tracks.write().insert(key.clone(), samples);
        Ok(())
    }

    fn samples(&self, key: &TrackKey, begin: f64, end: f64) -> Result<Vec<(f64, f64)>> {
        let tracks = self.tracks.read();
        let Some(track) = tracks.get(key) else {
            return Ok(Vec::new());
        };
        let from = track.partition_point(|(t, _)| *t < begin);
        let to = track.partition_point(|(t, _)| *t <= end);
        Ok(track[from..to.max(from)].to_vec())
    }
}

/// A token's slice of one track.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTrack {
    pub id: String,
    pub key: TrackKey,
    pub begin: f64,
    pub end: f64,
    pub samples: Vec<(f64, f64)>,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Polled between discourses during long imports, never mid-batch.
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shared flag another thread can trip.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl Cancellation for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    #[test]
    fn test_track_slices_are_ordered_and_inclusive() {
        let store = MemoryTrackStore::new();
        let key = TrackKey::new("d1", "s1", "pitch");
        store.save(&key, vec![(0.3, 120.0), (0.1, 100.0), (0.2, 110.0), (0.5, 90.0)]).unwrap();
        assert_eq!(store.samples(&key, 0.1, 0.3).unwrap(), vec![(0.1, 100.0), (0.2, 110.0), (0.3, 120.0)]);
        assert!(store.samples(&key, 0.6, 0.4).unwrap().is_empty());
        assert!(store.samples(&TrackKey::new("d2", "s1", "pitch"), 0.0, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(!NeverCancel.is_cancelled());
    }

    #[test]
    fn test_memory_lexicon_lookup() {
        let mut props = PropertyMap::new();
        props.insert("frequency".into(), Value::Int(42));
        let lexicon = MemoryLexicon::new().entry("cat", props);
        assert_eq!(lexicon.lookup("cat").unwrap().unwrap().get("frequency"), Some(&Value::Int(42)));
        assert!(lexicon.lookup("dog").unwrap().is_none());
    }
}
