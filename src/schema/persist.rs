//! Versioned schema snapshots.
//!
//! A snapshot is JSON with an explicit `version`. It is stored on the
//! corpus's `CorpusMeta` node and, when configured, mirrored to a file.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Hierarchy;
use crate::{Error, Result};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub hierarchy: Hierarchy,
}

impl SchemaSnapshot {
    pub fn new(hierarchy: Hierarchy) -> Self {
        Self { version: SNAPSHOT_VERSION, saved_at: Utc::now(), hierarchy }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(text)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Schema(format!(
                "unsupported schema snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Write atomically: a sibling temp file renamed over the target.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertyOwner, ValueType};

    #[test]
    fn test_file_round_trip_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");

        let mut h = Hierarchy::new("demo");
        h.add_level("word", None).unwrap();
        h.add_level("phone", Some("word")).unwrap();
        h.add_property(&PropertyOwner::type_of("word"), "transcription", ValueType::String).unwrap();

        SchemaSnapshot::new(h.clone()).write_file(&path).unwrap();
        let loaded = SchemaSnapshot::read_file(&path).unwrap();
        assert_eq!(loaded.hierarchy, h);
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut snap = serde_json::to_value(SchemaSnapshot::new(Hierarchy::new("demo"))).unwrap();
        snap["version"] = serde_json::json!(99);
        let err = SchemaSnapshot::from_json(&snap.to_string()).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
