//! The corpus handle.
//!
//! A [`Corpus`] owns a storage backend, its configuration and the schema
//! cache. Everything that touches the graph goes through it: schema
//! mutations (`schema_ops`), discourse loads and resets (`load`),
//! enrichment (`enrich`) and queries ([`Corpus::query`]).

mod enrich;
mod load;
mod schema_ops;
pub mod statements;

use std::sync::Arc;

use chrono::SecondsFormat;
use tracing::{debug, info, warn};

use crate::config::CorpusConfig;
use crate::cypher::ast::Statement;
use crate::cypher::render::render;
use crate::execution::{self, QueryResult};
use crate::loader;
use crate::model::{props, PropertyMap, Value};
use crate::query::QueryBuilder;
use crate::schema::{Hierarchy, SchemaRegistry, SchemaSnapshot};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::tx::TxMode;
use crate::{Error, Result};

pub use enrich::{SubannotationRecord, ValidationReport};
pub use load::ImportReport;

/// A statement with its parameters.
pub(crate) type Bound = (Statement, PropertyMap);

/// Handle to one corpus in one store.
pub struct Corpus<B: StorageBackend = MemoryBackend> {
    backend: B,
    config: CorpusConfig,
    schema: SchemaRegistry,
}

impl<B: StorageBackend> Corpus<B> {
    /// Open (or initialize) the corpus `config.name` in `backend`.
    ///
    /// The schema is read from the corpus's `CorpusMeta` node, falling back
    /// to the configured schema file, then to an empty hierarchy.
    pub fn open(backend: B, config: CorpusConfig) -> Result<Self> {
        config.validate()?;
        let corpus = Self { schema: SchemaRegistry::new(Hierarchy::new(&config.name)), backend, config };
        let hierarchy = match corpus.read_snapshot()? {
            Some(h) => h,
            None => match &corpus.config.schema_path {
                Some(path) if path.exists() => SchemaSnapshot::read_file(path)?.hierarchy,
                _ => Hierarchy::new(&corpus.config.name),
            },
        };
        if hierarchy.corpus() != corpus.config.name {
            return Err(Error::Schema(format!(
                "schema snapshot belongs to corpus '{}', not '{}'",
                hierarchy.corpus(),
                corpus.config.name
            )));
        }
        corpus.ensure_constraints(&hierarchy)?;
        info!(corpus = %corpus.config.name, levels = ?hierarchy.levels(), "opened corpus");
        corpus.schema.install(hierarchy);
        Ok(corpus)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current schema. A cache marked stale by a failed mutation is
    /// reloaded from persisted metadata first.
    pub fn hierarchy(&self) -> Result<Arc<Hierarchy>> {
        if self.schema.is_stale() {
            warn!(corpus = %self.name(), "schema cache is stale; reloading");
            self.reload_schema()?;
        }
        Ok(self.schema.get())
    }

    /// Replace the cached schema with the persisted one.
    pub fn reload_schema(&self) -> Result<()> {
        let hierarchy = self.read_snapshot()?.unwrap_or_else(|| Hierarchy::new(self.name()));
        self.schema.install(hierarchy);
        Ok(())
    }

    /// Start a query over the tokens of `level`.
    pub fn query(&self, level: impl Into<String>) -> QueryBuilder<'_, B> {
        QueryBuilder::new(self, level)
    }

    /// Whether `discourse` finished loading. Partial loads never count.
    pub fn has_discourse(&self, discourse: &str) -> Result<bool> {
        let result = self.read(&statements::discourse_exists(self.name()), &props([(statements::NAME, discourse)]))?;
        let count = result.rows.first().map(|r| r.get::<i64>("count")).transpose()?.unwrap_or(0);
        Ok(count > 0)
    }

    /// Names of all loaded discourses.
    pub fn discourses(&self) -> Result<Vec<String>> {
        self.names("Discourse")
    }

    pub fn speakers(&self) -> Result<Vec<String>> {
        self.names("Speaker")
    }

    fn names(&self, label: &str) -> Result<Vec<String>> {
        let result = self.read(&statements::names(self.name(), label), &PropertyMap::new())?;
        result.rows.iter().map(|r| r.get::<String>("name")).collect()
    }

    /// Tokens stored at `level`.
    pub fn token_count(&self, level: &str) -> Result<u64> {
        self.count_label(level)
    }

    /// Type records stored for `level`.
    pub fn type_count(&self, level: &str) -> Result<u64> {
        self.count_label(&Hierarchy::type_label(level))
    }

    fn count_label(&self, label: &str) -> Result<u64> {
        let result = self.read(&statements::count(self.name(), label), &PropertyMap::new())?;
        let n = result.rows.first().map(|r| r.get::<i64>("count")).transpose()?.unwrap_or(0);
        Ok(u64::try_from(n).unwrap_or(0))
    }

    // ========================================================================
    // Statement plumbing
    // ========================================================================

    pub(crate) fn ordered_collections(&self) -> bool {
        self.backend.capabilities().ordered_collections
    }

    fn run(&self, tx: &mut B::Tx, statement: &Statement, params: &PropertyMap) -> Result<QueryResult> {
        if self.backend.capabilities().accepts_cypher {
            let text = render(statement);
            debug!(statement = %text, "execute_raw");
            Ok(self.backend.execute_raw(tx, &text, params)?.into())
        } else {
            execution::execute(&self.backend, tx, statement, params)
        }
    }

    /// Run `f` in a transaction: commit on success, roll back on failure.
    fn in_tx<R>(&self, mode: TxMode, f: impl FnOnce(&mut B::Tx) -> Result<R>) -> Result<R> {
        let mut tx = self.backend.begin_tx(mode)?;
        match f(&mut tx) {
            Ok(out) => {
                self.backend.commit_tx(tx)?;
                Ok(out)
            }
            Err(e) => {
                if let Err(rollback) = self.backend.rollback_tx(tx) {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    pub(crate) fn read(&self, statement: &Statement, params: &PropertyMap) -> Result<QueryResult> {
        self.in_tx(TxMode::ReadOnly, |tx| self.run(tx, statement, params))
    }

    /// Run `statements` in one read-write transaction.
    pub(crate) fn write_all(&self, statements: &[Bound]) -> Result<u64> {
        self.in_tx(TxMode::ReadWrite, |tx| {
            let mut touched = 0;
            for (statement, params) in statements {
                let stats = self.run(tx, statement, params)?.stats;
                touched += stats.properties_set + stats.labels_added + stats.nodes_created + stats.nodes_deleted;
            }
            Ok(touched)
        })
    }

    // ========================================================================
    // Schema persistence
    // ========================================================================

    fn read_snapshot(&self) -> Result<Option<Hierarchy>> {
        let result = self.read(&statements::load_schema(), &props([(statements::NAME, self.name())]))?;
        let Some(row) = result.rows.first() else {
            return Ok(None);
        };
        let text: String = row.get(statements::HIERARCHY)?;
        Ok(Some(SchemaSnapshot::from_json(&text)?.hierarchy))
    }

    fn ensure_constraints(&self, hierarchy: &Hierarchy) -> Result<()> {
        if !self.backend.capabilities().supports_constraints {
            return Ok(());
        }
        let bound: Vec<Bound> =
            loader::statements::constraints(hierarchy).into_iter().map(|s| (s, PropertyMap::new())).collect();
        self.write_all(&bound).map(|_| ())
    }

    /// Apply a schema mutation.
    ///
    /// `change` edits a clone of the current hierarchy and returns the graph
    /// statements that bring existing data in line. Those statements and the
    /// new snapshot are written in one transaction; only then is the clone
    /// installed. If anything fails after the store was touched, the cache
    /// is marked stale so the next access reloads the persisted schema.
    pub(crate) fn update_schema<R>(
        &self,
        operation: &str,
        change: impl FnOnce(&mut Hierarchy) -> Result<(R, Vec<Bound>)>,
    ) -> Result<R> {
        let current = self.hierarchy()?;
        let mut next = (*current).clone();
        let (out, mut bound) = change(&mut next)?;
        if next == *current && bound.is_empty() {
            return Ok(out);
        }

        let snapshot = SchemaSnapshot::new(next);
        let mut params = PropertyMap::new();
        params.insert(statements::NAME.into(), Value::from(self.name()));
        params.insert(statements::HIERARCHY.into(), Value::String(snapshot.to_json()?));
        params.insert(
            statements::SAVED_AT.into(),
            Value::String(snapshot.saved_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        bound.push((statements::save_schema(), params));

        let applied = self
            .write_all(&bound)
            .and_then(|_| self.ensure_constraints(&snapshot.hierarchy))
            .and_then(|_| match &self.config.schema_path {
                Some(path) => snapshot.write_file(path),
                None => Ok(()),
            });
        if let Err(e) = applied {
            self.schema.mark_stale();
            warn!(corpus = %self.name(), operation, error = %e, "schema mutation failed; cache marked stale");
            return Err(e);
        }

        info!(corpus = %self.name(), operation, statements = bound.len() - 1, "schema updated");
        self.schema.install(snapshot.hierarchy);
        Ok(out)
    }
}

impl Corpus<MemoryBackend> {
    /// A fresh corpus in a new in-memory store.
    pub fn open_memory(name: &str) -> Result<Self> {
        Self::open(MemoryBackend::new(), CorpusConfig::new(name))
    }
}
