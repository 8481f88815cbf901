//! Transaction management.
//!
//! The bulk loader opens one read-write transaction per logical step
//! (type batch, anchor batch, token batch, edge batch) and commits it before
//! starting the next, so a failed load can leave earlier steps committed.

use serde::{Deserialize, Serialize};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Transaction trait that all backends must implement.
pub trait Transaction: Send {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;

    fn is_read_only(&self) -> bool {
        self.mode() == TxMode::ReadOnly
    }
}
