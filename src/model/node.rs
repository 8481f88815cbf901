//! Graph nodes.
//!
//! Every annotation record (token, type, anchor, subannotation, speaker,
//! discourse) is stored as one node. Labels carry the record kind, the
//! corpus name and any subset memberships; properties carry the rest.

use serde::{Deserialize, Serialize};
use super::{PropertyMap, Value};

/// Store-assigned node identifier. Annotation records are addressed by
/// their `id` property instead; this one never leaves the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Kept in insertion order, without duplicates.
    pub labels: Vec<String>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(id: NodeId, labels: Vec<String>, properties: PropertyMap) -> Self {
        let mut node = Self { id, labels: Vec::with_capacity(labels.len()), properties };
        for label in labels {
            node.add_label(&label);
        }
        node
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Whether the node carries every one of `labels`, e.g. `phone` and the
    /// corpus name.
    pub fn has_all(&self, labels: &[String]) -> bool {
        labels.iter().all(|l| self.has_label(l))
    }

    /// Returns `false` if the label was already present.
    pub fn add_label(&mut self, label: &str) -> bool {
        if self.has_label(label) {
            return false;
        }
        self.labels.push(label.to_owned());
        true
    }

    /// Returns `false` if the label was absent.
    pub fn remove_label(&mut self, label: &str) -> bool {
        let before = self.labels.len();
        self.labels.retain(|l| l != label);
        self.labels.len() != before
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property value, `Null` when unset.
    pub fn property(&self, key: &str) -> Value {
        self.properties.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Setting `Null` removes the property. Returns the previous value.
    pub fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        if value.is_null() {
            self.properties.remove(key)
        } else {
            self.properties.insert(key.to_owned(), value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_stay_unique() {
        let mut node = Node::new(NodeId(1), vec!["phone".into(), "demo".into(), "phone".into()], PropertyMap::new());
        assert_eq!(node.labels, vec!["phone", "demo"]);
        assert!(!node.add_label("demo"));
        assert!(node.add_label("sibilant"));
        assert!(node.has_all(&["phone".into(), "sibilant".into()]));
        assert!(node.remove_label("sibilant"));
        assert!(!node.remove_label("sibilant"));
    }

    #[test]
    fn test_null_unsets() {
        let mut node = Node::new(NodeId(1), vec!["word".into()], PropertyMap::new());
        assert_eq!(node.set("stressed", Value::Bool(true)), None);
        assert_eq!(node.set("stressed", Value::Null), Some(Value::Bool(true)));
        assert_eq!(node.property("stressed"), Value::Null);
    }
}
