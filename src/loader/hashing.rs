//! Content keys for type, token and anchor records.
//!
//! Every key is the hex SHA-256 of a canonical byte encoding: the encoder
//! version, a domain tag, then length-prefixed fields. Property maps are
//! encoded sorted by name and null values are left out, so a key depends
//! only on content and never on map iteration order.

use sha2::{Digest, Sha256};

use crate::model::{PropertyMap, Value};

/// Bump when the canonical encoding changes; every stored key changes with it.
pub const CONTENT_KEY_VERSION: u32 = 1;

pub struct KeyEncoder {
    hasher: Sha256,
}

impl KeyEncoder {
    pub fn new(domain: &str) -> Self {
        let mut encoder = Self { hasher: Sha256::new() };
        encoder.hasher.update(CONTENT_KEY_VERSION.to_be_bytes());
        encoder.str(domain);
        encoder
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.hasher.update((s.len() as u64).to_be_bytes());
        self.hasher.update(s.as_bytes());
        self
    }

    pub fn int(&mut self, i: i64) -> &mut Self {
        self.hasher.update(i.to_be_bytes());
        self
    }

    pub fn value(&mut self, value: &Value) -> &mut Self {
        match value {
            Value::Null => self.hasher.update(b"n"),
            Value::Bool(b) => self.hasher.update([b'b', u8::from(*b)]),
            Value::Int(i) => {
                self.hasher.update(b"i");
                self.int(*i);
            }
            Value::Float(f) => {
                // -0.0 and 0.0 are the same content.
                let f = if *f == 0.0 { 0.0 } else { *f };
                self.hasher.update(b"f");
                self.hasher.update(f.to_bits().to_be_bytes());
            }
            Value::String(s) => {
                self.hasher.update(b"s");
                self.str(s);
            }
            Value::List(items) => {
                self.hasher.update(b"l");
                self.hasher.update((items.len() as u64).to_be_bytes());
                for item in items {
                    self.value(item);
                }
            }
            Value::Map(map) => {
                self.hasher.update(b"m");
                self.props(map);
            }
            Value::Node(_) | Value::Relationship(_) => self.hasher.update(b"x"),
        }
        self
    }

    /// Non-null entries, sorted by key.
    pub fn props(&mut self, map: &PropertyMap) -> &mut Self {
        let mut entries: Vec<(&String, &Value)> = map.iter().filter(|(_, v)| !v.is_null()).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        self.hasher.update((entries.len() as u64).to_be_bytes());
        for (k, v) in entries {
            self.str(k);
            self.value(v);
        }
        self
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Key of a type record: label plus type properties, scoped to the corpus.
pub fn type_key(corpus: &str, label: &str, type_properties: &PropertyMap) -> String {
    let mut e = KeyEncoder::new("type");
    e.str(corpus).str(label).props(type_properties);
    e.finish()
}

/// Where a token sits: its discourse, level and speaker track.
#[derive(Debug, Clone, Copy)]
pub struct TokenSlot<'a> {
    pub corpus: &'a str,
    pub discourse: &'a str,
    pub level: &'a str,
    pub speaker: &'a str,
}

/// Key of a token: its slot, its position in the track and its rounded
/// interval.
pub fn token_key(slot: TokenSlot<'_>, ordinal: usize, begin_key: i64, end_key: i64) -> String {
    let mut e = KeyEncoder::new("token");
    e.str(slot.corpus)
        .str(slot.discourse)
        .str(slot.level)
        .str(slot.speaker)
        .int(ordinal as i64)
        .int(begin_key)
        .int(end_key);
    e.finish()
}

/// Key of an anchor. Anchors are per speaker so adjacency never crosses
/// speakers.
pub fn anchor_key(corpus: &str, discourse: &str, speaker: &str, time_key: i64) -> String {
    let mut e = KeyEncoder::new("anchor");
    e.str(corpus).str(discourse).str(speaker).int(time_key);
    e.finish()
}

/// Key of a subannotation: the annotated token, the subannotation type and
/// its position among that token's subannotations.
pub fn subannotation_key(token_id: &str, kind: &str, ordinal: usize) -> String {
    let mut e = KeyEncoder::new("subannotation");
    e.str(token_id).str(kind).int(ordinal as i64);
    e.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::props;
    use proptest::prelude::*;

    #[test]
    fn test_type_key_ignores_nulls() {
        let a = props([("transcription", Value::from("k ae t")), ("freq", Value::Null)]);
        let b = props([("transcription", "k ae t")]);
        assert_eq!(type_key("c", "cat", &a), type_key("c", "cat", &b));
    }

    #[test]
    fn test_type_key_is_corpus_scoped() {
        let p = PropertyMap::new();
        assert_ne!(type_key("c1", "cat", &p), type_key("c2", "cat", &p));
    }

    #[test]
    fn test_length_prefix_separates_fields() {
        let p = PropertyMap::new();
        assert_ne!(type_key("ab", "c", &p), type_key("a", "bc", &p));
    }

    #[test]
    fn test_anchor_keys_are_per_speaker() {
        assert_ne!(anchor_key("c", "d", "s1", 100), anchor_key("c", "d", "s2", 100));
        assert_eq!(anchor_key("c", "d", "s1", 100).len(), 64);
    }

    proptest! {
        #[test]
        fn type_key_ignores_insertion_order(
            entries in prop::collection::btree_map("[a-z]{1,6}", -1000i64..1000, 0..8),
            label in "[a-z]{1,8}",
        ) {
            let forward: PropertyMap = entries.iter().map(|(k, v)| (k.clone(), Value::Int(*v))).collect();
            let backward: PropertyMap = entries.iter().rev().map(|(k, v)| (k.clone(), Value::Int(*v))).collect();
            prop_assert_eq!(type_key("c", &label, &forward), type_key("c", &label, &backward));

            let mut changed = forward.clone();
            changed.insert("zz_extra".into(), Value::Bool(true));
            prop_assert_ne!(type_key("c", &label, &forward), type_key("c", &label, &changed));
        }
    }
}
