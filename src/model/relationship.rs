//! Graph edges.
//!
//! The corpus graph uses a small fixed set of edge types: `is_a` (token to
//! type), `starts_at` / `ends_at` (token to anchor), `contained_by` (token
//! to its container) and `annotates` (subannotation to token). None of them
//! carry properties in practice, but the store allows it.

use serde::{Deserialize, Serialize};
use super::{NodeId, PropertyMap};

/// Store-assigned edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rel#{}", self.0)
    }
}

/// Which edges of a node to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: String,
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(id: RelId, src: NodeId, dst: NodeId, rel_type: impl Into<String>, properties: PropertyMap) -> Self {
        Self { id, src, dst, rel_type: rel_type.into(), properties }
    }

    /// Whether this edge leaves (or enters) `node` in direction `dir`.
    pub fn touches(&self, node: NodeId, dir: Direction) -> bool {
        match dir {
            Direction::Outgoing => self.src == node,
            Direction::Incoming => self.dst == node,
            Direction::Both => self.src == node || self.dst == node,
        }
    }

    /// The far end as seen from `from`.
    pub fn other_node(&self, from: NodeId) -> Option<NodeId> {
        if from == self.src {
            Some(self.dst)
        } else if from == self.dst {
            Some(self.src)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_filters() {
        let rel = Relationship::new(RelId(1), NodeId(1), NodeId(2), "contained_by", PropertyMap::new());
        assert!(rel.touches(NodeId(1), Direction::Outgoing));
        assert!(!rel.touches(NodeId(1), Direction::Incoming));
        assert!(rel.touches(NodeId(2), Direction::Both));
        assert_eq!(rel.other_node(NodeId(2)), Some(NodeId(1)));
        assert_eq!(rel.other_node(NodeId(3)), None);
    }
}
