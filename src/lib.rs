//! # tiergraph: time-aligned annotation corpora on a property graph
//!
//! Stores spoken-language annotation tiers (phones, words, utterances, ...)
//! as a typed hierarchy of interval tokens, and compiles chained attribute
//! paths into parameterized Cypher.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between corpus logic and storage
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross all boundaries
//! 3. **AST, not strings**: every statement is a `cypher::ast::Statement`; user values
//!    only ever travel as bound parameters
//! 4. **Explicit schema**: the `Hierarchy` is owned by the `Corpus` handle, persisted
//!    after every mutation and reloaded on open
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiergraph::{AnnotationToken, Corpus, Filter, ParsedDiscourse, ParsedLevel};
//!
//! # fn example() -> tiergraph::Result<()> {
//! let corpus = Corpus::open_memory("demo")?;
//!
//! let discourse = ParsedDiscourse::new("d1")
//!     .level(ParsedLevel::new("utterance").token(AnnotationToken::new("", 0.0, 0.4)))
//!     .level(ParsedLevel::new("word").contained_by("utterance")
//!         .token(AnnotationToken::new("cat", 0.0, 0.4)))
//!     .level(ParsedLevel::new("phone").contained_by("word")
//!         .token(AnnotationToken::new("k", 0.0, 0.1))
//!         .token(AnnotationToken::new("ae", 0.1, 0.3))
//!         .token(AnnotationToken::new("t", 0.3, 0.4)));
//! corpus.load_discourse(discourse)?;
//!
//! let rows = corpus
//!     .query("phone")
//!     .filter(Filter::eq("phone.label", "k"))
//!     .column("phone.word.label", "word_label")
//!     .all()?;
//! assert_eq!(rows[0].get_as::<String>("word_label")?, "cat");
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | (default) | In-memory graph for testing/embedding |
//!
//! Backends that speak Cypher natively set `accepts_cypher` and receive the
//! rendered statement text through `StorageBackend::execute_raw`.

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cypher;
pub mod execution;
pub mod storage;
pub mod tx;
pub mod index;
pub mod config;
pub mod schema;
pub mod staging;
pub mod loader;
pub mod query;
pub mod collab;
pub mod corpus;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap,
    NodeId, RelId, Direction,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    StorageBackend, BackendConfig, ConstraintType,
    BackendCapabilities, MemoryBackend, RawResult,
};

// ============================================================================
// Re-exports: Transactions
// ============================================================================

pub use tx::{Transaction, TxMode, TxId};

// ============================================================================
// Re-exports: Execution
// ============================================================================

pub use execution::{ExecutionStats, QueryResult, ResultRow, FromValue};

// ============================================================================
// Re-exports: Corpus layers
// ============================================================================

pub use config::{CorpusConfig, LoaderConfig, StagingConfig};
pub use schema::{Hierarchy, PropertyOwner, SubsetKind, ValueType};
pub use staging::{AnnotationToken, ParsedDiscourse, ParsedLevel, StagingBuffer};
pub use loader::{Batch, LoadOutcome};
pub use query::{Aggregate, AggregateFunction, Comparison, CompiledQuery, Filter, Operand, QueryBuilder, Row, Step};
pub use collab::{
    Cancellation, CancellationToken, DiscourseSource, LexiconSource, MemoryLexicon,
    MemorySource, MemoryTrackStore, NeverCancel, TokenTrack, TrackKey, TrackStore,
};
pub use corpus::{Corpus, ImportReport, SubannotationRecord, ValidationReport};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid level/property/subset reference or schema conflict.
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid attribute path '{path}' at step '{step}': {reason}")]
    InvalidPath { path: String, step: String, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Staged levels of one discourse disagree; nothing was written.
    #[error("Shape mismatch in discourse '{discourse}': {message}")]
    ShapeMismatch { discourse: String, message: String },

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Schema,
    ShapeMismatch,
    Connectivity,
    Authorization,
    ConstraintViolation,
    Execution,
    Cancelled,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Schema(_) | Error::InvalidPath { .. } | Error::InvalidQuery(_) => ErrorKind::Schema,
            Error::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Error::Connectivity(_) => ErrorKind::Connectivity,
            Error::Authorization(_) => ErrorKind::Authorization,
            Error::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Io(_) | Error::Config(_) | Error::Serialization(_) => ErrorKind::Io,
            Error::TypeError { .. }
            | Error::ExecutionError(_)
            | Error::StorageError(_)
            | Error::TxError(_)
            | Error::NotFound(_) => ErrorKind::Execution,
        }
    }

    /// Only transient store unavailability is worth retrying, and only by
    /// the caller.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_is_retryable() {
        assert!(Error::Connectivity("timeout".into()).is_retryable());
        assert!(!Error::Authorization("bad credentials".into()).is_retryable());
        assert!(!Error::ConstraintViolation("dup".into()).is_retryable());
        assert!(!Error::Schema("no such level".into()).is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        let e = Error::InvalidPath { path: "phone.foo".into(), step: "foo".into(), reason: "unknown".into() };
        assert_eq!(e.kind(), ErrorKind::Schema);
        let e = Error::ShapeMismatch { discourse: "d1".into(), message: "overlap".into() };
        assert_eq!(e.kind(), ErrorKind::ShapeMismatch);
        assert!(e.to_string().contains("d1"));
    }
}
