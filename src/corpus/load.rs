//! Discourse loads, corpus imports and resets.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::schema_ops::register_properties;
use super::{statements, Bound, Corpus};
use crate::collab::{Cancellation, DiscourseSource};
use crate::cypher::render::render;
use crate::loader::statements::{discourse_marker, DISCOURSE, ROWS, SPEAKER_DEFAULTS};
use crate::loader::{self, LoadOutcome, LoadPlan};
use crate::model::{props, PropertyMap, Value};
use crate::schema::{infer_spec, value_or_default, Hierarchy, PropertyOwner, PropertySpec};
use crate::staging::{DiscourseStage, ParsedDiscourse};
use crate::{Error, Result};

/// What a corpus-wide import did, discourse by discourse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
}

fn defaults(spec: Option<&PropertySpec>) -> HashMap<String, Value> {
    spec.into_iter()
        .flatten()
        .map(|(name, vt)| (name.clone(), vt.default_value()))
        .collect()
}

impl<B: crate::storage::StorageBackend> Corpus<B> {
    /// Stage, validate and bulk-load one parsed discourse.
    ///
    /// Levels and properties the discourse introduces are registered first.
    /// Nothing is written when staging fails. The discourse only counts as
    /// present once its marker, the last write, has committed.
    pub fn load_discourse(&self, parsed: ParsedDiscourse) -> Result<LoadOutcome> {
        let name = parsed.name.clone();
        if self.has_discourse(&name)? {
            if self.config().loader.skip_existing {
                info!(corpus = %self.name(), discourse = %name, "discourse already loaded; skipping");
                return Ok(LoadOutcome::Skipped { discourse: name });
            }
            return Err(Error::ConstraintViolation(format!(
                "discourse '{name}' is already loaded in corpus '{}'",
                self.name()
            )));
        }

        let precision = self.config().loader.time_precision;
        let stage = DiscourseStage::build(parsed, &self.config().staging, precision)?;
        self.register_discourse_schema(&stage)?;
        let hierarchy = self.hierarchy()?;
        let plan = loader::plan_discourse(self.name(), &stage, &hierarchy, precision)?;

        match self.execute_plan(&plan, &hierarchy) {
            Ok(()) => {
                let outcome = plan.outcome();
                info!(corpus = %self.name(), discourse = %name, tokens = stage.token_count(), "discourse loaded");
                Ok(outcome)
            }
            Err(e) => {
                warn!(corpus = %self.name(), discourse = %name, error = %e, "discourse load failed");
                Err(e)
            }
        }
    }

    /// Register the levels and properties `stage` uses that the schema does
    /// not know yet. New levels are added top-down so each finds its parent.
    fn register_discourse_schema(&self, stage: &DiscourseStage) -> Result<()> {
        let current = self.hierarchy()?;
        for staged in stage.levels() {
            let level = staged.level();
            if current.has_level(level) {
                continue;
            }
            if let Some(child) = staged.contained_by.as_deref().and_then(|p| current.child_of(p)) {
                if self.token_count(child)? > 0 {
                    return Err(Error::Schema(format!(
                        "discourse '{}' inserts level '{level}' above '{child}', which already has tokens",
                        stage.name()
                    )));
                }
            }
        }

        let corpus = self.name().to_owned();
        self.update_schema("register_discourse", |h| {
            let mut bound: Vec<Bound> = Vec::new();
            for staged in stage.levels().iter().rev() {
                let level = staged.level();
                if !h.has_level(level) {
                    h.add_level(level, staged.contained_by.as_deref())?;
                }
                let type_spec = infer_spec(staged.buffer.iter().map(|t| &t.type_properties))?;
                bound.extend(register_properties(h, &corpus, &PropertyOwner::type_of(level), &type_spec)?);
                let token_spec = infer_spec(staged.buffer.iter().map(|t| &t.token_properties))?;
                bound.extend(register_properties(h, &corpus, &PropertyOwner::token_of(level), &token_spec)?);
            }
            let discourse_spec = infer_spec(std::iter::once(stage.properties()))?;
            bound.extend(register_properties(h, &corpus, &PropertyOwner::Discourse, &discourse_spec)?);
            Ok(((), bound))
        })
    }

    /// Run every step of `plan` in its own transaction, then the marker.
    fn execute_plan(&self, plan: &LoadPlan, hierarchy: &Hierarchy) -> Result<()> {
        let mut batch_size = self.config().loader.batch_size;
        if let Some(max) = self.backend().capabilities().max_batch_size {
            batch_size = batch_size.min(max);
        }
        let speaker_defaults = Value::Map(defaults(hierarchy.properties(&PropertyOwner::Speaker)));

        for step in &plan.steps {
            let bound: Vec<Bound> = step
                .batch
                .chunks(batch_size)
                .map(|chunk| {
                    let mut params = PropertyMap::new();
                    params.insert(ROWS.into(), step.batch.to_param(chunk));
                    params.insert(DISCOURSE.into(), Value::from(plan.discourse.as_str()));
                    params.insert(SPEAKER_DEFAULTS.into(), speaker_defaults.clone());
                    (step.statement.clone(), params)
                })
                .collect();
            if bound.is_empty() {
                continue;
            }
            self.write_all(&bound)?;
            debug!(
                discourse = %plan.discourse,
                step = %step.kind,
                rows = step.batch.len(),
                chunks = bound.len(),
                statement_bytes = render(&step.statement).len(),
                "bulk step committed"
            );
        }

        let mut marker = defaults(hierarchy.properties(&PropertyOwner::Discourse));
        for (name, value) in &plan.discourse_properties {
            let coerced = match hierarchy.property_type(&PropertyOwner::Discourse, name) {
                Some(vt) => value_or_default(Some(value), vt)?,
                None => value.clone(),
            };
            marker.insert(name.clone(), coerced);
        }
        let mut params = props([(statements::NAME, plan.discourse.as_str())]);
        params.insert("props".into(), Value::Map(marker));
        self.write_all(&[(discourse_marker(self.name()), params)])?;
        Ok(())
    }

    /// Load every discourse `source` lists, checking `cancel` before each.
    ///
    /// Cancellation never interrupts a discourse mid-load; what finished
    /// stays loaded.
    pub fn import(&self, source: &dyn DiscourseSource, cancel: &dyn Cancellation) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for name in source.discourses()? {
            if cancel.is_cancelled() {
                warn!(corpus = %self.name(), loaded = ?report.loaded, next = %name, "import cancelled");
                return Err(Error::Cancelled(format!(
                    "import into '{}' stopped before '{name}' after {} discourse(s)",
                    self.name(),
                    report.loaded.len()
                )));
            }
            match self.load_discourse(source.parse(&name)?)? {
                LoadOutcome::Skipped { discourse } => report.skipped.push(discourse),
                LoadOutcome::Loaded { discourse, .. } => report.loaded.push(discourse),
            }
        }
        info!(corpus = %self.name(), loaded = report.loaded.len(), skipped = report.skipped.len(), "import finished");
        Ok(report)
    }

    /// Delete one discourse: its marker first, then tokens with their
    /// subannotations, then anchors. Type and speaker records are shared
    /// and stay.
    pub fn reset_discourse(&self, discourse: &str) -> Result<()> {
        let hierarchy = self.hierarchy()?;
        let params = props([(statements::NAME, discourse)]);
        let mut bound: Vec<Bound> = vec![(statements::delete_marker(self.name()), params.clone())];
        for level in hierarchy.levels() {
            bound.push((statements::delete_discourse_tokens(self.name(), level), params.clone()));
        }
        bound.push((statements::delete_discourse_anchors(self.name()), params));
        self.write_all(&bound)?;
        info!(corpus = %self.name(), discourse, "discourse reset");
        Ok(())
    }

    /// Delete the whole corpus graph and its schema.
    pub fn reset(&self) -> Result<()> {
        let bound: Vec<Bound> = vec![
            (statements::delete_corpus(self.name()), PropertyMap::new()),
            (statements::delete_schema(), props([(statements::NAME, self.name())])),
        ];
        if let Err(e) = self.write_all(&bound) {
            self.schema.mark_stale();
            return Err(e);
        }
        if let Some(path) = &self.config().schema_path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.schema.install(Hierarchy::new(self.name()));
        info!(corpus = %self.name(), "corpus reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{CancellationToken, MemorySource, NeverCancel};
    use crate::config::CorpusConfig;
    use crate::staging::{AnnotationToken, ParsedLevel};
    use crate::storage::MemoryBackend;
    use crate::ValueType;

    fn discourse(name: &str) -> ParsedDiscourse {
        ParsedDiscourse::new(name)
            .property("recorded", 1999)
            .level(
                ParsedLevel::new("word")
                    .token(AnnotationToken::new("cat", 0.0, 0.3).type_property("frequency", 12.5))
                    .token(AnnotationToken::new("sat", 0.3, 0.6).type_property("frequency", 3.0)),
            )
            .level(
                ParsedLevel::new("phone")
                    .contained_by("word")
                    .tokens([
                        AnnotationToken::new("k", 0.0, 0.1),
                        AnnotationToken::new("ae", 0.1, 0.2),
                        AnnotationToken::new("t", 0.2, 0.3),
                        AnnotationToken::new("s", 0.3, 0.4),
                        AnnotationToken::new("ae", 0.4, 0.5),
                        AnnotationToken::new("t", 0.5, 0.6),
                    ]),
            )
    }

    #[test]
    fn test_load_registers_schema() {
        let corpus = Corpus::open_memory("demo").unwrap();
        let outcome = corpus.load_discourse(discourse("d1")).unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded { discourse: "d1".into(), types: 6, tokens: 8, anchors: 7 }
        );
        let h = corpus.hierarchy().unwrap();
        assert_eq!(h.levels(), &["phone", "word"]);
        assert_eq!(h.property_type(&PropertyOwner::type_of("word"), "frequency"), Some(ValueType::Float));
        assert_eq!(h.property_type(&PropertyOwner::Discourse, "recorded"), Some(ValueType::Integer));
        assert!(corpus.has_discourse("d1").unwrap());
        assert_eq!(corpus.token_count("phone").unwrap(), 6);
        assert_eq!(corpus.type_count("phone").unwrap(), 4);
    }

    #[test]
    fn test_second_load_is_rejected_or_skipped() {
        let corpus = Corpus::open_memory("demo").unwrap();
        corpus.load_discourse(discourse("d1")).unwrap();
        let err = corpus.load_discourse(discourse("d1")).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));

        let skipping = Corpus::open(corpus.backend().clone(), CorpusConfig::new("demo").skip_existing(true)).unwrap();
        assert!(skipping.load_discourse(discourse("d1")).unwrap().is_skipped());
        assert_eq!(skipping.token_count("word").unwrap(), 2);
    }

    #[test]
    fn test_import_and_cancel() {
        let corpus = Corpus::open_memory("demo").unwrap();
        let source = MemorySource::new([discourse("d1"), discourse("d2")]);
        let report = corpus.import(&source, &NeverCancel).unwrap();
        assert_eq!(report.loaded, vec!["d1", "d2"]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let other = Corpus::open_memory("demo").unwrap();
        let err = other.import(&source, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(other.discourses().unwrap().is_empty());
    }

    #[test]
    fn test_reset_discourse_keeps_shared_records() {
        let corpus = Corpus::open_memory("demo").unwrap();
        corpus.load_discourse(discourse("d1")).unwrap();
        corpus.load_discourse(discourse("d2")).unwrap();
        corpus.reset_discourse("d1").unwrap();
        assert!(!corpus.has_discourse("d1").unwrap());
        assert_eq!(corpus.discourses().unwrap(), vec!["d2"]);
        assert_eq!(corpus.token_count("phone").unwrap(), 6);
        assert_eq!(corpus.type_count("phone").unwrap(), 4);
        assert_eq!(corpus.speakers().unwrap(), vec!["d1", "d2"]);
    }

    #[test]
    fn test_reset_clears_graph_and_schema() {
        let corpus = Corpus::open_memory("demo").unwrap();
        corpus.load_discourse(discourse("d1")).unwrap();
        corpus.reset().unwrap();
        assert!(corpus.hierarchy().unwrap().is_empty());
        assert_eq!(corpus.token_count("phone").unwrap(), 0);
        let reopened = Corpus::open(corpus.backend().clone(), CorpusConfig::new("demo")).unwrap();
        assert!(reopened.hierarchy().unwrap().is_empty());
    }
}
