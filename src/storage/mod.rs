//! # Storage Backend Trait
//!
//! This is THE contract between tiergraph and any graph store.
//! Every primitive the statement executor needs is defined here; backends
//! that speak Cypher natively can instead accept rendered statements through
//! [`StorageBackend::execute_raw`] and advertise it via capabilities.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory for testing/embedding |

pub mod memory;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::index::IndexType;
use crate::{Error, Result};

pub use memory::MemoryBackend;

// ============================================================================
// Backend Configuration
// ============================================================================

/// Configuration for selecting a storage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory (no persistence beyond the process)
    #[default]
    Memory,
}

// ============================================================================
// Constraint types
// ============================================================================

/// Type of constraint to create on a label+property pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintType {
    /// Property value must be unique for nodes with this label.
    Unique,
    /// Property must exist on all nodes with this label.
    Exists,
}

// ============================================================================
// Backend capabilities
// ============================================================================

/// What a backend can do. Consulted by the corpus handle and the hydrator.
///
/// All fields default to false / empty. Backends override via `capabilities()`.
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// Statements are sent as rendered Cypher through `execute_raw`
    /// instead of being interpreted by [`crate::execution`].
    pub accepts_cypher: bool,
    /// Pattern comprehensions come back sorted by their projections.
    pub ordered_collections: bool,
    pub supports_constraints: bool,
    pub max_batch_size: Option<usize>,
}

// ============================================================================
// Raw result
// ============================================================================

/// Result of a raw (backend-native) statement.
///
/// This lightweight type lives in the storage layer so that `execute_raw()`
/// can return structured results without importing from the execution module.
#[derive(Debug, Clone, Default)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, Value>>,
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The universal storage contract.
///
/// Calls are synchronous and blocking; a backend talking to a remote store
/// must map connection loss and timeouts to [`Error::Connectivity`] and
/// credential failures to [`Error::Authorization`] instead of hanging.
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes.
    fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction.
    fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction.
    fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties.
    fn create_node(&self, tx: &mut Self::Tx, labels: &[&str], props: PropertyMap) -> Result<NodeId>;

    /// Get a node by ID. Returns None if not found.
    fn get_node(&self, tx: &Self::Tx, id: NodeId) -> Result<Option<Node>>;

    /// Delete a node. Returns true if it existed.
    /// Fails if the node still has relationships.
    fn delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool>;

    /// Set a property on a node (upsert).
    fn set_node_property(&self, tx: &mut Self::Tx, id: NodeId, key: &str, val: Value) -> Result<()>;

    /// Remove a property from a node.
    fn remove_node_property(&self, tx: &mut Self::Tx, id: NodeId, key: &str) -> Result<()>;

    /// Add a label to a node.
    fn add_label(&self, tx: &mut Self::Tx, id: NodeId, label: &str) -> Result<()>;

    /// Remove a label from a node.
    fn remove_label(&self, tx: &mut Self::Tx, id: NodeId, label: &str) -> Result<()>;

    /// Delete a node and all its relationships in one operation.
    /// Cypher: `DETACH DELETE n`
    ///
    /// Default: get all relationships, delete each, then delete the node.
    fn detach_delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool> {
        let rels = self.get_relationships(tx, id, Direction::Both, None)?;
        for rel in &rels {
            self.delete_relationship(tx, rel.id)?;
        }
        self.delete_node(tx, id)
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship between two nodes.
    fn create_relationship(
        &self,
        tx: &mut Self::Tx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId>;

    /// Get a relationship by ID.
    fn get_relationship(&self, tx: &Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    /// Delete a relationship. Returns true if it existed.
    fn delete_relationship(&self, tx: &mut Self::Tx, id: RelId) -> Result<bool>;

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Get all relationships of a node, optionally filtered by direction and type.
    fn get_relationships(
        &self,
        tx: &Self::Tx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>>;

    // ========================================================================
    // Index
    // ========================================================================

    /// Create an index on a label+property combination.
    fn create_index(&self, label: &str, property: &str, index_type: IndexType) -> Result<()>;

    /// Drop an index.
    fn drop_index(&self, label: &str, property: &str) -> Result<()>;

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Total number of nodes.
    fn node_count(&self, tx: &Self::Tx) -> Result<u64>;

    /// Total number of relationships.
    fn relationship_count(&self, tx: &Self::Tx) -> Result<u64>;

    /// All distinct labels in the graph.
    fn labels(&self, tx: &Self::Tx) -> Result<Vec<String>>;

    // ========================================================================
    // Scan
    // ========================================================================

    /// Return all nodes (no label filter).
    fn all_nodes(&self, tx: &Self::Tx) -> Result<Vec<Node>>;

    /// Find all nodes with a given label.
    fn nodes_by_label(&self, tx: &Self::Tx, label: &str) -> Result<Vec<Node>>;

    /// Find nodes by label + property value (index-backed if available).
    fn nodes_by_property(&self, tx: &Self::Tx, label: &str, key: &str, value: &Value) -> Result<Vec<Node>>;

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Create a schema constraint. Cypher: `CREATE CONSTRAINT ...`
    ///
    /// Default returns "not supported".
    fn create_constraint(&self, _label: &str, _property: &str, _constraint_type: ConstraintType) -> Result<()> {
        Err(Error::ExecutionError("constraints not supported".into()))
    }

    /// Drop a schema constraint.
    ///
    /// Default returns "not supported".
    fn drop_constraint(&self, _label: &str, _property: &str) -> Result<()> {
        Err(Error::ExecutionError("constraints not supported".into()))
    }

    // ========================================================================
    // Escape hatch
    // ========================================================================

    /// Pass-through for backend-native Cypher.
    ///
    /// Only called when `capabilities().accepts_cypher` is set.
    fn execute_raw(&self, _tx: &mut Self::Tx, _query: &str, _params: &PropertyMap) -> Result<RawResult> {
        Err(Error::ExecutionError("raw query execution not supported".into()))
    }

    // ========================================================================
    // Capability negotiation
    // ========================================================================

    /// Report what this backend can do.
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}
