//! Index management.

use serde::{Deserialize, Serialize};

/// Type of index to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    /// Equality lookups on a label+property pair (e.g. `phone_type.label`).
    BTree,
    /// Unique lookups; backs the `id` constraints on annotation labels.
    Unique,
}
