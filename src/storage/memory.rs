//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! All graph state sits behind one `RwLock` so that indexes, constraints and
//! the per-transaction undo journal always agree with each other.
//!
//! ## Semantics
//!
//! - **Rollback is real**: every write is journaled on its `MemoryTx`, and
//!   `rollback_tx()` replays the journal backwards.
//! - **No isolation**: writes are visible to other transactions before
//!   commit. Schema mutation is single-writer by contract anyway.
//! - **Indexes**: label sets are always maintained; property indexes exist
//!   for every `create_index()` / unique constraint and back
//!   `nodes_by_property()`.
//! - **Fault injection**: [`MemoryBackend::set_offline`] and
//!   [`MemoryBackend::fail_writes_after`] make the store report
//!   [`Error::Connectivity`], so callers can exercise partial-load paths.
//!
//! Use this backend for:
//! - Testing the loader, compiler and executor end to end
//! - Embedding tiergraph in applications that don't need an external store

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::model::*;
use crate::tx::{Transaction, TxMode, TxId};
use crate::index::IndexType;
use crate::{Error, Result};
use super::{BackendCapabilities, ConstraintType, StorageBackend};

type IndexMap = hashbrown::HashMap<String, BTreeSet<NodeId>>;

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: RwLock<GraphState>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
    offline: AtomicBool,
    /// Remaining successful writes before the store "goes away".
    write_budget: Mutex<Option<u64>>,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, Node>,
    relationships: HashMap<RelId, Relationship>,
    /// node_id → relationship IDs touching it
    adjacency: HashMap<NodeId, Vec<RelId>>,
    /// label → node IDs, ordered by creation
    label_index: HashMap<String, BTreeSet<NodeId>>,
    /// (label, property) → index key → node IDs
    property_index: hashbrown::HashMap<(String, String), IndexMap>,
    constraints: hashbrown::HashMap<(String, String), ConstraintType>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(GraphState::default()),
                next_node_id: AtomicU64::new(1),
                next_rel_id: AtomicU64::new(1),
                next_tx_id: AtomicU64::new(1),
                offline: AtomicBool::new(false),
                write_budget: Mutex::new(None),
            }),
        }
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Let `writes` more write primitives succeed, then fail every write with
    /// [`Error::Connectivity`]. `None` removes the limit.
    pub fn fail_writes_after(&self, writes: Option<u64>) {
        *self.inner.write_budget.lock() = writes;
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::Connectivity("memory backend is offline".into()));
        }
        Ok(())
    }

    fn check_write(&self, tx: &MemoryTx) -> Result<()> {
        self.check_online()?;
        if tx.is_read_only() {
            return Err(Error::TxError(format!("write attempted in read-only {}", tx.id)));
        }
        let mut budget = self.inner.write_budget.lock();
        if let Some(remaining) = budget.as_mut() {
            if *remaining == 0 {
                return Err(Error::Connectivity("connection lost during write".into()));
            }
            *remaining -= 1;
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Key under which a value is stored in a property index.
/// Numbers are normalised so `1` and `1.0` collide, as Cypher equality does.
fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(format!("s:{s}")),
        Value::Int(i) => Some(format!("n:{i}")),
        Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(format!("n:{}", *f as i64)),
        Value::Float(f) => Some(format!("f:{f}")),
        Value::Bool(b) => Some(format!("b:{b}")),
        _ => None,
    }
}

// ============================================================================
// GraphState helpers (index maintenance)
// ============================================================================

impl GraphState {
    fn index_insert(&mut self, node: &Node) {
        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().insert(node.id);
        }
        for ((label, key), index) in self.property_index.iter_mut() {
            if !node.has_label(label) {
                continue;
            }
            if let Some(k) = node.get(key).and_then(index_key) {
                index.entry(k).or_default().insert(node.id);
            }
        }
    }

    fn index_remove(&mut self, node: &Node) {
        for label in &node.labels {
            if let Some(ids) = self.label_index.get_mut(label) {
                ids.remove(&node.id);
            }
        }
        for ((label, key), index) in self.property_index.iter_mut() {
            if !node.has_label(label) {
                continue;
            }
            if let Some(k) = node.get(key).and_then(index_key) {
                if let Some(ids) = index.get_mut(&k) {
                    ids.remove(&node.id);
                }
            }
        }
    }

    /// Reject `props` under `labels` if it would duplicate a unique value
    /// or omit a required one.
    fn check_constraints(&self, labels: &[String], props: &PropertyMap, except: Option<NodeId>) -> Result<()> {
        for ((label, key), constraint) in &self.constraints {
            if !labels.iter().any(|l| l == label) {
                continue;
            }
            match constraint {
                ConstraintType::Unique => {
                    let Some(k) = props.get(key).and_then(index_key) else { continue };
                    let clash = self
                        .property_index
                        .get(&(label.clone(), key.clone()))
                        .and_then(|idx| idx.get(&k))
                        .is_some_and(|ids| ids.iter().any(|id| Some(*id) != except));
                    if clash {
                        return Err(Error::ConstraintViolation(format!(
                            "node with label '{label}' already has {key} = {}",
                            props[key]
                        )));
                    }
                }
                ConstraintType::Exists => {
                    if props.get(key).is_none_or(Value::is_null) {
                        return Err(Error::ConstraintViolation(format!(
                            "nodes with label '{label}' must have property '{key}'"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn insert_node(&mut self, node: Node) {
        self.index_insert(&node);
        self.adjacency.entry(node.id).or_default();
        self.nodes.insert(node.id, node);
    }

    fn take_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        self.adjacency.remove(&id);
        self.index_remove(&node);
        Some(node)
    }

    fn insert_relationship(&mut self, rel: Relationship) {
        self.adjacency.entry(rel.src).or_default().push(rel.id);
        if rel.src != rel.dst {
            self.adjacency.entry(rel.dst).or_default().push(rel.id);
        }
        self.relationships.insert(rel.id, rel);
    }

    fn take_relationship(&mut self, id: RelId) -> Option<Relationship> {
        let rel = self.relationships.remove(&id)?;
        for end in [rel.src, rel.dst] {
            if let Some(rels) = self.adjacency.get_mut(&end) {
                rels.retain(|rid| *rid != id);
            }
        }
        Some(rel)
    }

    /// Replace a node's labels/properties, keeping indexes in sync.
    fn update_node(&mut self, id: NodeId, f: impl FnOnce(&mut Node)) -> Result<()> {
        let mut node = self.nodes.get(&id).cloned().ok_or_else(|| Error::NotFound(format!("{id}")))?;
        self.index_remove(&node);
        f(&mut node);
        self.index_insert(&node);
        self.nodes.insert(id, node);
        Ok(())
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// Undo record for one write primitive.
#[derive(Debug)]
enum Undo {
    CreatedNode(NodeId),
    CreatedRel(RelId),
    DeletedNode(Node),
    DeletedRel(Relationship),
    Property { node: NodeId, key: String, old: Option<Value> },
    Label { node: NodeId, label: String, added: bool },
}

/// In-memory transaction carrying its undo journal.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    journal: Vec<Undo>,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    fn shutdown(&self) -> Result<()> { Ok(()) }

    fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        self.check_online()?;
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx { id, mode, journal: Vec::new() })
    }

    fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        self.check_online()?;
        tracing::trace!(tx = %tx.id, writes = tx.journal.len(), "commit");
        Ok(())
    }

    fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        let mut state = self.inner.state.write();
        let undone = tx.journal.len();
        for entry in tx.journal.into_iter().rev() {
            match entry {
                Undo::CreatedNode(id) => {
                    state.take_node(id);
                }
                Undo::CreatedRel(id) => {
                    state.take_relationship(id);
                }
                Undo::DeletedNode(node) => state.insert_node(node),
                Undo::DeletedRel(rel) => state.insert_relationship(rel),
                Undo::Property { node, key, old } => {
                    let _ = state.update_node(node, |n| {
                        n.set(&key, old.unwrap_or(Value::Null));
                    });
                }
                Undo::Label { node, label, added } => {
                    let _ = state.update_node(node, |n| {
                        if added {
                            n.remove_label(&label);
                        } else {
                            n.add_label(&label);
                        }
                    });
                }
            }
        }
        tracing::debug!(tx = %tx.id, undone, "rollback");
        Ok(())
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    fn create_node(&self, tx: &mut MemoryTx, labels: &[&str], props: PropertyMap) -> Result<NodeId> {
        self.check_write(tx)?;
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let mut state = self.inner.state.write();
        state.check_constraints(&labels, &props, None)?;

        let id = NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed));
        state.insert_node(Node::new(id, labels, props));
        tx.journal.push(Undo::CreatedNode(id));
        Ok(id)
    }

    fn get_node(&self, _tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        self.check_online()?;
        Ok(self.inner.state.read().nodes.get(&id).cloned())
    }

    fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<bool> {
        self.check_write(tx)?;
        let mut state = self.inner.state.write();
        if let Some(rels) = state.adjacency.get(&id) {
            if !rels.is_empty() {
                return Err(Error::ConstraintViolation(format!(
                    "Cannot delete node {id} with {} relationships. Delete relationships first.",
                    rels.len()
                )));
            }
        }
        match state.take_node(id) {
            Some(node) => {
                tx.journal.push(Undo::DeletedNode(node));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_node_property(&self, tx: &mut MemoryTx, id: NodeId, key: &str, val: Value) -> Result<()> {
        self.check_write(tx)?;
        let mut state = self.inner.state.write();
        let node = state.nodes.get(&id).ok_or_else(|| Error::NotFound(format!("{id}")))?;
        let old = node.properties.get(key).cloned();
        let mut next = node.properties.clone();
        next.insert(key.to_string(), val.clone());
        let labels = node.labels.clone();
        state.check_constraints(&labels, &next, Some(id))?;
        state.update_node(id, |n| {
            n.set(key, val);
        })?;
        tx.journal.push(Undo::Property { node: id, key: key.to_string(), old });
        Ok(())
    }

    fn remove_node_property(&self, tx: &mut MemoryTx, id: NodeId, key: &str) -> Result<()> {
        self.check_write(tx)?;
        let mut state = self.inner.state.write();
        let old = state
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("{id}")))?
            .properties
            .get(key)
            .cloned();
        if old.is_none() {
            return Ok(());
        }
        state.update_node(id, |n| {
            n.set(key, Value::Null);
        })?;
        tx.journal.push(Undo::Property { node: id, key: key.to_string(), old });
        Ok(())
    }

    fn add_label(&self, tx: &mut MemoryTx, id: NodeId, label: &str) -> Result<()> {
        self.check_write(tx)?;
        let mut state = self.inner.state.write();
        let node = state.nodes.get(&id).ok_or_else(|| Error::NotFound(format!("{id}")))?;
        if node.has_label(label) {
            return Ok(());
        }
        let props = node.properties.clone();
        state.check_constraints(&[label.to_string()], &props, Some(id))?;
        state.update_node(id, |n| {
            n.add_label(label);
        })?;
        tx.journal.push(Undo::Label { node: id, label: label.to_string(), added: true });
        Ok(())
    }

    fn remove_label(&self, tx: &mut MemoryTx, id: NodeId, label: &str) -> Result<()> {
        self.check_write(tx)?;
        let mut state = self.inner.state.write();
        let node = state.nodes.get(&id).ok_or_else(|| Error::NotFound(format!("{id}")))?;
        if !node.has_label(label) {
            return Ok(());
        }
        state.update_node(id, |n| {
            n.remove_label(label);
        })?;
        tx.journal.push(Undo::Label { node: id, label: label.to_string(), added: false });
        Ok(())
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    fn create_relationship(
        &self,
        tx: &mut MemoryTx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        self.check_write(tx)?;
        let mut state = self.inner.state.write();
        if !state.nodes.contains_key(&src) {
            return Err(Error::NotFound(format!("source {src}")));
        }
        if !state.nodes.contains_key(&dst) {
            return Err(Error::NotFound(format!("target {dst}")));
        }

        let id = RelId(self.inner.next_rel_id.fetch_add(1, Ordering::Relaxed));
        state.insert_relationship(Relationship::new(id, src, dst, rel_type, props));
        tx.journal.push(Undo::CreatedRel(id));
        Ok(id)
    }

    fn get_relationship(&self, _tx: &MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        self.check_online()?;
        Ok(self.inner.state.read().relationships.get(&id).cloned())
    }

    fn delete_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<bool> {
        self.check_write(tx)?;
        let removed = self.inner.state.write().take_relationship(id);
        match removed {
            Some(rel) => {
                tx.journal.push(Undo::DeletedRel(rel));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    fn get_relationships(
        &self,
        _tx: &MemoryTx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        self.check_online()?;
        let state = self.inner.state.read();
        let Some(rel_ids) = state.adjacency.get(&node) else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        for rid in rel_ids {
            if let Some(rel) = state.relationships.get(rid) {
                let matches_dir = rel.touches(node, dir);
                let matches_type = rel_type.is_none_or(|t| rel.rel_type == t);
                if matches_dir && matches_type {
                    result.push(rel.clone());
                }
            }
        }
        Ok(result)
    }

    // ========================================================================
    // Index
    // ========================================================================

    fn create_index(&self, label: &str, property: &str, _index_type: IndexType) -> Result<()> {
        self.check_online()?;
        let mut state = self.inner.state.write();
        let key = (label.to_string(), property.to_string());
        if state.property_index.contains_key(&key) {
            return Ok(());
        }
        let mut index = IndexMap::new();
        if let Some(ids) = state.label_index.get(label) {
            for id in ids {
                if let Some(k) = state.nodes.get(id).and_then(|n| n.get(property)).and_then(index_key) {
                    index.entry(k).or_default().insert(*id);
                }
            }
        }
        state.property_index.insert(key, index);
        Ok(())
    }

    fn drop_index(&self, label: &str, property: &str) -> Result<()> {
        self.check_online()?;
        let mut state = self.inner.state.write();
        let key = (label.to_string(), property.to_string());
        if state.constraints.get(&key) == Some(&ConstraintType::Unique) {
            return Err(Error::ConstraintViolation(format!(
                "index on :{label}({property}) backs a unique constraint"
            )));
        }
        state.property_index.remove(&key);
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    fn node_count(&self, _tx: &MemoryTx) -> Result<u64> {
        self.check_online()?;
        Ok(self.inner.state.read().nodes.len() as u64)
    }

    fn relationship_count(&self, _tx: &MemoryTx) -> Result<u64> {
        self.check_online()?;
        Ok(self.inner.state.read().relationships.len() as u64)
    }

    fn labels(&self, _tx: &MemoryTx) -> Result<Vec<String>> {
        self.check_online()?;
        let state = self.inner.state.read();
        let mut labels: Vec<String> = state
            .label_index
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(l, _)| l.clone())
            .collect();
        labels.sort();
        Ok(labels)
    }

    // ========================================================================
    // Scan
    // ========================================================================

    fn all_nodes(&self, _tx: &MemoryTx) -> Result<Vec<Node>> {
        self.check_online()?;
        let state = self.inner.state.read();
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    fn nodes_by_label(&self, _tx: &MemoryTx, label: &str) -> Result<Vec<Node>> {
        self.check_online()?;
        let state = self.inner.state.read();
        Ok(state
            .label_index
            .get(label)
            .map(|ids| ids.iter().filter_map(|id| state.nodes.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    fn nodes_by_property(&self, _tx: &MemoryTx, label: &str, key: &str, value: &Value) -> Result<Vec<Node>> {
        self.check_online()?;
        let state = self.inner.state.read();
        if let Some(index) = state.property_index.get(&(label.to_string(), key.to_string())) {
            let Some(k) = index_key(value) else {
                return Ok(Vec::new());
            };
            return Ok(index
                .get(&k)
                .map(|ids| ids.iter().filter_map(|id| state.nodes.get(id).cloned()).collect())
                .unwrap_or_default());
        }
        // No index: scan the label set.
        Ok(state
            .label_index
            .get(label)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.nodes.get(id))
                    .filter(|n| n.get(key).and_then(|v| v.cypher_eq(value)) == Some(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    fn create_constraint(&self, label: &str, property: &str, constraint_type: ConstraintType) -> Result<()> {
        self.check_online()?;
        if constraint_type == ConstraintType::Unique {
            self.create_index(label, property, IndexType::Unique)?;
        }
        let mut state = self.inner.state.write();
        let key = (label.to_string(), property.to_string());
        if let Some(existing) = state.constraints.get(&key) {
            if *existing == constraint_type {
                return Ok(());
            }
            return Err(Error::ConstraintViolation(format!(
                "a different constraint already exists on :{label}({property})"
            )));
        }
        if constraint_type == ConstraintType::Unique {
            let duplicated = state
                .property_index
                .get(&key)
                .is_some_and(|idx| idx.values().any(|ids| ids.len() > 1));
            if duplicated {
                return Err(Error::ConstraintViolation(format!(
                    "existing :{label} nodes share values of '{property}'"
                )));
            }
        }
        state.constraints.insert(key, constraint_type);
        Ok(())
    }

    fn drop_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.check_online()?;
        self.inner
            .state
            .write()
            .constraints
            .remove(&(label.to_string(), property.to_string()));
        Ok(())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            accepts_cypher: false,
            ordered_collections: true,
            supports_constraints: true,
            max_batch_size: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_create_and_get_node() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();

        let id = db.create_node(&mut tx, &["phone"], props(&[("id", Value::from("p1"))])).unwrap();
        let node = db.get_node(&tx, id).unwrap().unwrap();

        assert_eq!(node.labels, vec!["phone"]);
        assert_eq!(node.get("id"), Some(&Value::from("p1")));
    }

    #[test]
    fn test_cannot_delete_connected_node() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();

        let a = db.create_node(&mut tx, &["phone"], PropertyMap::new()).unwrap();
        let b = db.create_node(&mut tx, &["word"], PropertyMap::new()).unwrap();
        db.create_relationship(&mut tx, a, b, "contained_by", PropertyMap::new()).unwrap();

        assert!(db.delete_node(&mut tx, a).is_err());
        assert!(db.detach_delete_node(&mut tx, a).unwrap());
        assert!(db.get_node(&tx, a).unwrap().is_none());
        assert_eq!(db.relationship_count(&tx).unwrap(), 0);
    }

    #[test]
    fn test_unique_constraint_rejects_duplicates() {
        let db = MemoryBackend::new();
        db.create_constraint("phone", "id", ConstraintType::Unique).unwrap();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();

        db.create_node(&mut tx, &["phone"], props(&[("id", Value::from("p1"))])).unwrap();
        let err = db.create_node(&mut tx, &["phone"], props(&[("id", Value::from("p1"))])).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));

        // Same id under another label is fine.
        db.create_node(&mut tx, &["word"], props(&[("id", Value::from("p1"))])).unwrap();
    }

    #[test]
    fn test_property_index_lookup_follows_updates() {
        let db = MemoryBackend::new();
        db.create_index("Speaker", "name", IndexType::BTree).unwrap();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();

        let id = db.create_node(&mut tx, &["Speaker"], props(&[("name", Value::from("s1"))])).unwrap();
        assert_eq!(db.nodes_by_property(&tx, "Speaker", "name", &Value::from("s1")).unwrap().len(), 1);

        db.set_node_property(&mut tx, id, "name", Value::from("s2")).unwrap();
        assert!(db.nodes_by_property(&tx, "Speaker", "name", &Value::from("s1")).unwrap().is_empty());
        assert_eq!(db.nodes_by_property(&tx, "Speaker", "name", &Value::from("s2")).unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_undoes_writes() {
        let db = MemoryBackend::new();
        let mut setup = db.begin_tx(TxMode::ReadWrite).unwrap();
        let keep = db.create_node(&mut setup, &["word"], props(&[("label", Value::from("cat"))])).unwrap();
        db.commit_tx(setup).unwrap();

        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let extra = db.create_node(&mut tx, &["phone"], PropertyMap::new()).unwrap();
        db.create_relationship(&mut tx, extra, keep, "contained_by", PropertyMap::new()).unwrap();
        db.set_node_property(&mut tx, keep, "label", Value::from("dog")).unwrap();
        db.add_label(&mut tx, keep, "noun").unwrap();
        db.rollback_tx(tx).unwrap();

        let tx = db.begin_tx(TxMode::ReadOnly).unwrap();
        assert_eq!(db.node_count(&tx).unwrap(), 1);
        assert_eq!(db.relationship_count(&tx).unwrap(), 0);
        let node = db.get_node(&tx, keep).unwrap().unwrap();
        assert_eq!(node.get("label"), Some(&Value::from("cat")));
        assert!(!node.has_label("noun"));
        assert!(db.nodes_by_label(&tx, "noun").unwrap().is_empty());
    }

    #[test]
    fn test_write_budget_reports_connectivity() {
        let db = MemoryBackend::new();
        db.fail_writes_after(Some(1));
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        db.create_node(&mut tx, &["phone"], PropertyMap::new()).unwrap();
        let err = db.create_node(&mut tx, &["phone"], PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_read_only_tx_rejects_writes() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadOnly).unwrap();
        assert!(matches!(
            db.create_node(&mut tx, &["phone"], PropertyMap::new()),
            Err(Error::TxError(_))
        ));
    }

    #[test]
    fn test_offline_backend() {
        let db = MemoryBackend::new();
        db.set_offline(true);
        assert!(matches!(db.begin_tx(TxMode::ReadOnly), Err(Error::Connectivity(_))));
        db.set_offline(false);
        assert!(db.begin_tx(TxMode::ReadOnly).is_ok());
    }
}
