//! Enrichment: properties, subsets and subannotations added after load.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::info;

use super::schema_ops::{register_properties, subset_label};
use super::{statements, Bound, Corpus};
use crate::collab::LexiconSource;
use crate::loader::hashing::subannotation_key;
use crate::loader::statements::ROWS;
use crate::model::{PropertyMap, Value};
use crate::schema::{infer_spec, value_or_default, Hierarchy, PropertyOwner, PropertySpec, SubsetKind};
use crate::staging::time_key;
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// One subannotation to attach to an existing token.
#[derive(Debug, Clone, PartialEq)]
pub struct SubannotationRecord {
    pub token_id: String,
    pub begin: f64,
    pub end: f64,
    pub label: String,
    pub properties: PropertyMap,
}

impl SubannotationRecord {
    pub fn new(token_id: impl Into<String>, label: impl Into<String>, begin: f64, end: f64) -> Self {
        Self { token_id: token_id.into(), begin, end, label: label.into(), properties: PropertyMap::new() }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Result of [`Corpus::validate_hierarchy`]. Each list holds token ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub checked: usize,
    /// `begin > end`.
    pub inverted: Vec<String>,
    /// Interval reaches outside the container's.
    pub uncontained: Vec<String>,
    /// No container at a level that has a parent.
    pub orphans: Vec<String>,
    /// Container ids whose contained tokens leave part of the container
    /// uncovered. Levels that model pauses have these legitimately, so they
    /// do not make the report invalid.
    pub gaps: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.inverted.is_empty() && self.uncontained.is_empty() && self.orphans.is_empty()
    }

    pub fn is_gapless(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// Whether `children`, sorted by begin, tile `[begin, end]` exactly.
fn tiles(begin: i64, end: i64, children: &mut [(i64, i64)]) -> bool {
    children.sort_unstable();
    let mut cursor = begin;
    for &(b, e) in children.iter() {
        if b != cursor {
            return false;
        }
        cursor = e;
    }
    cursor == end
}

/// Coerce `values` to the types registered for `owner`.
fn coerce_to(h: &Hierarchy, owner: &PropertyOwner, values: &PropertyMap) -> Result<HashMap<String, Value>> {
    values
        .iter()
        .map(|(name, value)| {
            let coerced = match h.property_type(owner, name) {
                Some(vt) => value_or_default(Some(value), vt)?,
                None => value.clone(),
            };
            Ok((name.clone(), coerced))
        })
        .collect()
}

fn keyed_rows(rows: impl IntoIterator<Item = (String, HashMap<String, Value>)>) -> Value {
    Value::List(
        rows.into_iter()
            .map(|(key, values)| {
                Value::Map(HashMap::from([
                    ("key".to_owned(), Value::String(key)),
                    (statements::VALUES.to_owned(), Value::Map(values)),
                ]))
            })
            .collect(),
    )
}

fn rows_param(rows: Value) -> PropertyMap {
    PropertyMap::from([(ROWS.to_owned(), rows)])
}

impl<B: StorageBackend> Corpus<B> {
    fn require_level(&self, level: &str) -> Result<()> {
        if self.hierarchy()?.has_level(level) {
            Ok(())
        } else {
            Err(Error::Schema(format!("unknown level '{level}'")))
        }
    }

    /// Register `spec` on `owner` without any other schema change.
    fn register(&self, operation: &str, owner: &PropertyOwner, spec: &PropertySpec) -> Result<()> {
        let corpus = self.name().to_owned();
        self.update_schema(operation, |h| Ok(((), register_properties(h, &corpus, owner, spec)?)))
    }

    /// Copy lexicon entries onto the type records of `level`, matched by
    /// label. Returns the number of labels found in the lexicon.
    pub fn enrich_lexicon(&self, level: &str, lexicon: &dyn LexiconSource) -> Result<usize> {
        self.require_level(level)?;
        let result = self.read(&statements::type_labels(self.name(), level), &PropertyMap::new())?;
        let mut found: BTreeMap<String, PropertyMap> = BTreeMap::new();
        for row in &result.rows {
            let label: String = row.get("label")?;
            if let Some(entry) = lexicon.lookup(&label)? {
                found.insert(label, entry);
            }
        }
        if found.is_empty() {
            return Ok(0);
        }

        let owner = PropertyOwner::type_of(level);
        self.register("enrich_lexicon", &owner, &infer_spec(found.values())?)?;
        let h = self.hierarchy()?;
        let rows = found
            .iter()
            .map(|(label, entry)| Ok((label.clone(), coerce_to(&h, &owner, entry)?)))
            .collect::<Result<Vec<_>>>()?;
        let statement = statements::merge_properties(self.name(), &Hierarchy::type_label(level), "label");
        self.write_all(&[(statement, rows_param(keyed_rows(rows)))])?;
        info!(corpus = %self.name(), level, labels = found.len(), "lexicon enrichment applied");
        Ok(found.len())
    }

    /// Register the type subset `subset` and tag the type records whose
    /// label is in `labels`.
    pub fn add_type_subset(&self, level: &str, subset: &str, labels: &[&str]) -> Result<()> {
        self.add_subset(level, SubsetKind::Type, subset)?;
        let rows = Value::List(labels.iter().map(|l| Value::from(*l)).collect());
        let statement = statements::tag(self.name(), &Hierarchy::type_label(level), "label", subset);
        self.write_all(&[(statement, rows_param(rows))])?;
        info!(corpus = %self.name(), level, subset, labels = labels.len(), "type subset tagged");
        Ok(())
    }

    pub(crate) fn tag_tokens(&self, level: &str, subset: &str, ids: &[String]) -> Result<usize> {
        self.add_subset(level, SubsetKind::Token, subset)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let label = subset_label(level, SubsetKind::Token);
        let rows = Value::List(ids.iter().map(Value::from).collect());
        self.write_all(&[(statements::tag(self.name(), &label, "id", subset), rows_param(rows))])?;
        info!(corpus = %self.name(), level, subset, tokens = ids.len(), "token subset tagged");
        Ok(ids.len())
    }

    pub(crate) fn set_token_properties(&self, level: &str, ids: &[String], properties: PropertyMap) -> Result<usize> {
        self.require_level(level)?;
        let owner = PropertyOwner::token_of(level);
        for name in properties.keys() {
            if owner.builtins().contains(&name.as_str()) {
                return Err(Error::Schema(format!("'{name}' is a built-in token field and cannot be set")));
            }
        }
        self.register("set_token_properties", &owner, &infer_spec(std::iter::once(&properties))?)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let hierarchy = self.hierarchy()?;
        let values = coerce_to(&hierarchy, &owner, &properties)?;
        let mut params = rows_param(Value::List(ids.iter().map(Value::from).collect()));
        params.insert(statements::VALUES.into(), Value::Map(values));
        self.write_all(&[(statements::set_on_ids(self.name(), level), params)])?;
        Ok(ids.len())
    }

    /// Merge properties onto speakers by name. Unknown speakers are ignored.
    pub fn enrich_speakers(&self, properties: &BTreeMap<String, PropertyMap>) -> Result<()> {
        self.enrich_named(PropertyOwner::Speaker, "Speaker", properties)
    }

    /// Merge properties onto discourses by name. Unknown discourses are ignored.
    pub fn enrich_discourses(&self, properties: &BTreeMap<String, PropertyMap>) -> Result<()> {
        self.enrich_named(PropertyOwner::Discourse, "Discourse", properties)
    }

    fn enrich_named(&self, owner: PropertyOwner, label: &str, properties: &BTreeMap<String, PropertyMap>) -> Result<()> {
        if properties.is_empty() {
            return Ok(());
        }
        self.register("enrich_named", &owner, &infer_spec(properties.values())?)?;
        let h = self.hierarchy()?;
        let rows = properties
            .iter()
            .map(|(name, values)| Ok((name.clone(), coerce_to(&h, &owner, values)?)))
            .collect::<Result<Vec<_>>>()?;
        self.write_all(&[(statements::merge_properties(self.name(), label, "name"), rows_param(keyed_rows(rows)))])?;
        info!(corpus = %self.name(), label, records = properties.len(), "named records enriched");
        Ok(())
    }

    /// Attach subannotations of type `name` to tokens of `level`, registering
    /// the type and its properties as needed. Re-running with the same
    /// records writes nothing new. Returns the number of records; a record
    /// naming no stored token fails the whole call with `NotFound`.
    pub fn add_subannotations(&self, name: &str, level: &str, records: &[SubannotationRecord]) -> Result<usize> {
        if let Some(record) = records.iter().find(|r| !(r.begin <= r.end)) {
            return Err(Error::Schema(format!(
                "{name} subannotation '{}' on token '{}' ends before it begins",
                record.label, record.token_id
            )));
        }
        self.require_level(level)?;
        self.require_tokens(level, records)?;
        let spec = infer_spec(records.iter().map(|r| &r.properties))?;
        self.add_subannotation_type(name, level, &spec)?;
        if records.is_empty() {
            return Ok(0);
        }

        let h = self.hierarchy()?;
        let registered: PropertySpec = h.subannotation(name).map(|s| s.properties.clone()).unwrap_or_default();
        let mut ordinals: HashMap<&str, usize> = HashMap::new();
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let ordinal = ordinals.entry(record.token_id.as_str()).or_default();
            let mut row: HashMap<String, Value> = HashMap::new();
            row.insert("id".into(), Value::String(subannotation_key(&record.token_id, name, *ordinal)));
            row.insert("token_id".into(), Value::from(&record.token_id));
            row.insert("begin".into(), Value::Float(record.begin));
            row.insert("end".into(), Value::Float(record.end));
            row.insert("label".into(), Value::from(&record.label));
            for (prop, vt) in &registered {
                row.insert(prop.clone(), value_or_default(record.properties.get(prop), *vt)?);
            }
            rows.push(Value::Map(row));
            *ordinal += 1;
        }

        let columns: Vec<String> = registered.keys().cloned().collect();
        let statement = statements::subannotations(self.name(), level, name, &columns);
        let bound: Vec<Bound> = rows
            .chunks(self.config().loader.batch_size.max(1))
            .map(|chunk| (statement.clone(), rows_param(Value::List(chunk.to_vec()))))
            .collect();
        self.write_all(&bound)?;
        info!(corpus = %self.name(), level, subannotation = name, records = records.len(), "subannotations added");
        Ok(records.len())
    }

    /// Every record must name a stored token of `level`.
    fn require_tokens(&self, level: &str, records: &[SubannotationRecord]) -> Result<()> {
        let wanted: BTreeSet<&str> = records.iter().map(|r| r.token_id.as_str()).collect();
        if wanted.is_empty() {
            return Ok(());
        }
        let mut params = PropertyMap::new();
        params.insert(statements::IDS.into(), Value::List(wanted.iter().map(|id| Value::from(*id)).collect()));
        let result = self.read(&statements::existing_ids(self.name(), level), &params)?;
        let found = result.rows.iter().map(|row| row.get::<String>("id")).collect::<Result<HashSet<_>>>()?;
        let missing: Vec<&str> = wanted.into_iter().filter(|id| !found.contains(*id)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::NotFound(format!("{level} tokens {}", missing.join(", "))))
    }

    /// Check every stored token: its interval is well formed and, below
    /// the top level, lies inside exactly the container it is linked to.
    /// Containers whose tokens do not cover them end to end (compared at
    /// the loader's time precision) are listed as gaps.
    pub fn validate_hierarchy(&self) -> Result<ValidationReport> {
        let h = self.hierarchy()?;
        let precision = self.config().loader.time_precision;
        let mut report = ValidationReport::default();
        for level in h.levels() {
            let parent = h.parent_of(level);
            let mut spans: BTreeMap<String, ((i64, i64), Vec<(i64, i64)>)> = BTreeMap::new();
            let result = self.read(&statements::containment_check(self.name(), level, parent), &PropertyMap::new())?;
            for row in &result.rows {
                let id: String = row.get("id")?;
                let begin: f64 = row.get("begin")?;
                let end: f64 = row.get("end")?;
                report.checked += 1;
                if begin > end {
                    report.inverted.push(id.clone());
                }
                if parent.is_none() {
                    continue;
                }
                let container: (Option<f64>, Option<f64>) = (row.get("parent_begin")?, row.get("parent_end")?);
                match container {
                    (Some(pb), Some(pe)) => {
                        if begin < pb || end > pe {
                            report.uncontained.push(id);
                        }
                        let parent_id: String = row.get("parent_id")?;
                        spans
                            .entry(parent_id)
                            .or_insert_with(|| ((time_key(pb, precision), time_key(pe, precision)), Vec::new()))
                            .1
                            .push((time_key(begin, precision), time_key(end, precision)));
                    }
                    _ => report.orphans.push(id),
                }
            }
            for (parent_id, ((pb, pe), mut children)) in spans {
                if !tiles(pb, pe, &mut children) {
                    report.gaps.push(parent_id);
                }
            }
        }
        report.inverted.sort();
        report.uncontained.sort();
        report.orphans.sort();
        report.gaps.sort();
        info!(
            corpus = %self.name(),
            checked = report.checked,
            valid = report.is_valid(),
            gaps = report.gaps.len(),
            "hierarchy validated"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::MemoryLexicon;
    use crate::model::props;
    use crate::query::Filter;
    use crate::staging::{AnnotationToken, ParsedDiscourse, ParsedLevel};
    use crate::ValueType;

    fn loaded() -> Corpus {
        let corpus = Corpus::open_memory("demo").unwrap();
        corpus
            .load_discourse(
                ParsedDiscourse::new("d1")
                    .level(ParsedLevel::new("word").tokens([
                        AnnotationToken::new("cat", 0.0, 0.3).speaker("s1"),
                        AnnotationToken::new("sat", 0.3, 0.6).speaker("s1"),
                    ]))
                    .level(ParsedLevel::new("phone").contained_by("word").tokens([
                        AnnotationToken::new("k", 0.0, 0.1).speaker("s1"),
                        AnnotationToken::new("ae", 0.1, 0.2).speaker("s1"),
                        AnnotationToken::new("t", 0.2, 0.3).speaker("s1"),
                        AnnotationToken::new("s", 0.3, 0.45).speaker("s1"),
                        AnnotationToken::new("ae", 0.45, 0.5).speaker("s1"),
                        AnnotationToken::new("t", 0.5, 0.6).speaker("s1"),
                    ])),
            )
            .unwrap();
        corpus
    }

    #[test]
    fn test_lexicon_enrichment_registers_and_sets() {
        let corpus = loaded();
        let lexicon = MemoryLexicon::new()
            .entry("cat", props([("frequency", 12)]))
            .entry("dog", props([("frequency", 3)]));
        assert_eq!(corpus.enrich_lexicon("word", &lexicon).unwrap(), 1);
        let h = corpus.hierarchy().unwrap();
        assert_eq!(h.property_type(&PropertyOwner::type_of("word"), "frequency"), Some(ValueType::Integer));
        assert!(matches!(corpus.enrich_lexicon("syllable", &lexicon), Err(Error::Schema(_))));
    }

    #[test]
    fn test_subannotations_are_idempotent() {
        let corpus = loaded();
        let ids = corpus.query("phone").ids().unwrap();
        let records: Vec<SubannotationRecord> = ids
            .iter()
            .map(|id| SubannotationRecord::new(id.clone(), "burst", 0.0, 0.01).property("strength", 0.5))
            .collect();
        assert_eq!(corpus.add_subannotations("burst", "phone", &records).unwrap(), 6);
        corpus.add_subannotations("burst", "phone", &records).unwrap();
        let spec = corpus.hierarchy().unwrap().subannotation("burst").cloned().unwrap();
        assert_eq!(spec.level, "phone");
        assert_eq!(spec.properties.get("strength"), Some(&ValueType::Float));
    }

    #[test]
    fn test_subannotation_on_unknown_token_fails_before_writing() {
        let corpus = loaded();
        let real = corpus.query("phone").ids().unwrap().remove(0);
        let records = [
            SubannotationRecord::new(real, "b", 0.0, 0.01),
            SubannotationRecord::new("no-such-token", "b", 0.0, 0.01),
        ];
        let err = corpus.add_subannotations("burst", "phone", &records).unwrap_err();
        assert!(matches!(err, Error::NotFound(ref m) if m.contains("no-such-token")), "{err:?}");
        assert!(corpus.hierarchy().unwrap().subannotation("burst").is_none());
    }

    #[test]
    fn test_speaker_enrichment() {
        let corpus = loaded();
        let mut by_name = BTreeMap::new();
        by_name.insert("s1".to_owned(), props([("age", 34)]));
        corpus.enrich_speakers(&by_name).unwrap();
        assert_eq!(
            corpus.hierarchy().unwrap().property_type(&PropertyOwner::Speaker, "age"),
            Some(ValueType::Integer)
        );
    }

    #[test]
    fn test_loaded_corpus_validates() {
        let corpus = loaded();
        let report = corpus.validate_hierarchy().unwrap();
        assert_eq!(report.checked, 8);
        assert!(report.is_valid(), "{report:?}");
        assert!(report.is_gapless(), "{report:?}");
    }

    #[test]
    fn test_uncovered_container_is_reported_as_gap() {
        let corpus = Corpus::open_memory("demo").unwrap();
        corpus
            .load_discourse(
                ParsedDiscourse::new("d1")
                    .level(ParsedLevel::new("word").tokens([
                        AnnotationToken::new("cat", 0.0, 0.3),
                        AnnotationToken::new("sat", 0.3, 0.6),
                    ]))
                    .level(ParsedLevel::new("phone").contained_by("word").tokens([
                        AnnotationToken::new("k", 0.0, 0.1),
                        AnnotationToken::new("t", 0.2, 0.3),
                        AnnotationToken::new("s", 0.3, 0.6),
                    ])),
            )
            .unwrap();
        let cat = corpus.query("word").filter(Filter::eq("word.label", "cat")).ids().unwrap();

        let report = corpus.validate_hierarchy().unwrap();
        assert!(report.is_valid(), "{report:?}");
        assert!(!report.is_gapless());
        assert_eq!(report.gaps, cat);
    }

    #[test]
    fn test_tiles() {
        assert!(tiles(0, 10, &mut [(5, 10), (0, 5)]));
        assert!(!tiles(0, 10, &mut [(0, 4), (5, 10)]));
        assert!(!tiles(0, 10, &mut [(0, 5)]));
    }

    #[test]
    fn test_inverted_subannotation_rejected() {
        let corpus = loaded();
        let err = corpus
            .add_subannotations("burst", "phone", &[SubannotationRecord::new("x", "b", 0.2, 0.1)])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
