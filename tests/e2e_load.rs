//! End-to-end tests for staging and bulk loading.
//!
//! Each test loads parsed discourses into a `MemoryBackend` corpus through
//! `Corpus::load_discourse` / `Corpus::import` and checks what the graph
//! holds afterwards.

use pretty_assertions::assert_eq;
use tiergraph::{
    AnnotationToken, Corpus, CorpusConfig, Error, ErrorKind, Filter, LoadOutcome, MemoryBackend,
    MemorySource, NeverCancel, ParsedDiscourse, ParsedLevel, PropertyOwner, ValueType,
};

fn cat_sat(name: &str) -> ParsedDiscourse {
    ParsedDiscourse::new(name)
        .level(ParsedLevel::new("utterance").token(AnnotationToken::new("", 0.0, 0.6)))
        .level(
            ParsedLevel::new("word")
                .contained_by("utterance")
                .token(AnnotationToken::new("cat", 0.0, 0.3))
                .token(AnnotationToken::new("sat", 0.3, 0.6)),
        )
        .level(ParsedLevel::new("phone").contained_by("word").tokens([
            AnnotationToken::new("k", 0.0, 0.1),
            AnnotationToken::new("ae", 0.1, 0.2),
            AnnotationToken::new("t", 0.2, 0.3),
            AnnotationToken::new("s", 0.3, 0.4),
            AnnotationToken::new("ae", 0.4, 0.5),
            AnnotationToken::new("t", 0.5, 0.6),
        ]))
}

// ============================================================================
// 1. A load registers the level chain and writes every record once
// ============================================================================

#[test]
fn test_load_builds_hierarchy_and_records() {
    let corpus = Corpus::open_memory("demo").unwrap();
    corpus.load_discourse(cat_sat("d1")).unwrap();

    let h = corpus.hierarchy().unwrap();
    assert_eq!(h.levels(), &["phone", "word", "utterance"]);
    assert_eq!(h.parent_of("phone"), Some("word"));
    assert_eq!(h.parent_of("word"), Some("utterance"));

    assert_eq!(corpus.token_count("phone").unwrap(), 6);
    assert_eq!(corpus.token_count("word").unwrap(), 2);
    assert_eq!(corpus.token_count("utterance").unwrap(), 1);
    assert_eq!(corpus.type_count("phone").unwrap(), 4);
    assert_eq!(corpus.discourses().unwrap(), vec!["d1"]);
    assert_eq!(corpus.speakers().unwrap(), vec!["d1"]);
}

// ============================================================================
// 2. Type records are shared across discourses
// ============================================================================

#[test]
fn test_types_are_deduplicated_across_discourses() {
    let corpus = Corpus::open_memory("demo").unwrap();
    corpus.load_discourse(cat_sat("d1")).unwrap();
    corpus.load_discourse(cat_sat("d2")).unwrap();

    assert_eq!(corpus.type_count("phone").unwrap(), 4);
    assert_eq!(corpus.type_count("word").unwrap(), 2);
    assert_eq!(corpus.token_count("phone").unwrap(), 12);
}

// ============================================================================
// 3. Re-loading: rejected by default, skipped on request
// ============================================================================

#[test]
fn test_reload_rejected_then_skipped() {
    let backend = MemoryBackend::new();
    let corpus = Corpus::open(backend.clone(), CorpusConfig::new("demo")).unwrap();
    corpus.load_discourse(cat_sat("d1")).unwrap();

    let err = corpus.load_discourse(cat_sat("d1")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let skipping = Corpus::open(backend, CorpusConfig::new("demo").skip_existing(true)).unwrap();
    let outcome = skipping.load_discourse(cat_sat("d1")).unwrap();
    assert_eq!(outcome, LoadOutcome::Skipped { discourse: "d1".into() });
    assert_eq!(skipping.token_count("phone").unwrap(), 6);
}

// ============================================================================
// 4. Containment edges link every token to its container
// ============================================================================

#[test]
fn test_containment_edges() {
    let corpus = Corpus::open_memory("demo").unwrap();
    corpus.load_discourse(cat_sat("d1")).unwrap();

    let rows = corpus
        .query("phone")
        .column("phone.label", "phone")
        .column("phone.word.label", "word")
        .column("phone.word.utterance.id", "utterance")
        .order_by("phone.begin")
        .all()
        .unwrap();
    let pairs: Vec<(String, String)> = rows
        .iter()
        .map(|r| (r.get_as::<String>("phone").unwrap(), r.get_as::<String>("word").unwrap()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("k".to_string(), "cat".to_string()),
            ("ae".into(), "cat".into()),
            ("t".into(), "cat".into()),
            ("s".into(), "sat".into()),
            ("ae".into(), "sat".into()),
            ("t".into(), "sat".into()),
        ]
    );
    let utterance: String = rows[0].get_as("utterance").unwrap();
    assert!(rows.iter().all(|r| r.get_as::<String>("utterance").unwrap() == utterance));

    let report = corpus.validate_hierarchy().unwrap();
    assert_eq!(report.checked, 9);
    assert!(report.is_valid());
    assert!(report.is_gapless(), "{report:?}");
}

// ============================================================================
// 5. A discourse with a token outside its container writes nothing
// ============================================================================

#[test]
fn test_shape_mismatch_writes_nothing() {
    let corpus = Corpus::open_memory("demo").unwrap();
    let broken = ParsedDiscourse::new("d1")
        .level(ParsedLevel::new("word").token(AnnotationToken::new("cat", 0.0, 0.3)))
        .level(
            ParsedLevel::new("phone")
                .contained_by("word")
                .token(AnnotationToken::new("k", 0.0, 0.1))
                .token(AnnotationToken::new("s", 0.5, 0.6)),
        );

    let err = corpus.load_discourse(broken).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert!(!corpus.has_discourse("d1").unwrap());
    assert!(corpus.hierarchy().unwrap().is_empty());
}

// ============================================================================
// 6. A load interrupted by the store never counts as present, and retrying
//    it converges without duplicates
// ============================================================================

#[test]
fn test_interrupted_load_is_not_present_and_retry_converges() {
    let backend = MemoryBackend::new();
    let corpus = Corpus::open(backend.clone(), CorpusConfig::new("demo")).unwrap();
    corpus.load_discourse(cat_sat("d1")).unwrap();

    backend.fail_writes_after(Some(20));
    let err = corpus.load_discourse(cat_sat("d2")).unwrap_err();
    assert!(err.is_retryable());
    backend.fail_writes_after(None);

    assert!(!corpus.has_discourse("d2").unwrap());
    assert_eq!(corpus.discourses().unwrap(), vec!["d1"]);

    corpus.load_discourse(cat_sat("d2")).unwrap();
    assert!(corpus.has_discourse("d2").unwrap());
    assert_eq!(corpus.token_count("phone").unwrap(), 12);
    assert_eq!(corpus.type_count("phone").unwrap(), 4);
}

// ============================================================================
// 7. Properties are inferred and registered from the parsed tokens
// ============================================================================

#[test]
fn test_properties_registered_and_defaulted() {
    let corpus = Corpus::open_memory("demo").unwrap();
    let discourse = ParsedDiscourse::new("d1")
        .property("year", 2001)
        .level(
            ParsedLevel::new("word")
                .token(AnnotationToken::new("cat", 0.0, 0.3).type_property("transcription", "k.ae.t"))
                .token(AnnotationToken::new("sat", 0.3, 0.6).token_property("stressed", true)),
        );
    corpus.load_discourse(discourse).unwrap();

    let h = corpus.hierarchy().unwrap();
    assert_eq!(h.property_type(&PropertyOwner::type_of("word"), "transcription"), Some(ValueType::String));
    assert_eq!(h.property_type(&PropertyOwner::token_of("word"), "stressed"), Some(ValueType::Boolean));
    assert_eq!(h.property_type(&PropertyOwner::Discourse, "year"), Some(ValueType::Integer));

    let unstressed = corpus.query("word").filter(Filter::eq("word.stressed", false)).count().unwrap();
    assert_eq!(unstressed, 1);
    let rows = corpus
        .query("word")
        .filter(Filter::eq("word.label", "sat"))
        .column("word.transcription", "transcription")
        .column("word.discourse.year", "year")
        .all()
        .unwrap();
    assert_eq!(rows[0].get_as::<String>("transcription").unwrap(), "");
    assert_eq!(rows[0].get_as::<i64>("year").unwrap(), 2001);
}

#[test]
fn test_default_type_property_does_not_split_types() {
    let corpus = Corpus::open_memory("demo").unwrap();
    let discourse = |name: &str, transcription: Option<&str>| {
        let cat = AnnotationToken::new("cat", 0.3, 0.6);
        let cat = match transcription {
            Some(t) => cat.type_property("transcription", t),
            None => cat,
        };
        ParsedDiscourse::new(name).level(
            ParsedLevel::new("word")
                .token(AnnotationToken::new("cat", 0.0, 0.3))
                .token(cat),
        )
    };
    corpus.load_discourse(discourse("d1", Some(""))).unwrap();
    assert_eq!(corpus.type_count("word").unwrap(), 1);

    corpus.load_discourse(discourse("d2", None)).unwrap();
    assert_eq!(corpus.type_count("word").unwrap(), 1);

    corpus.load_discourse(discourse("d3", Some("k.ae.t"))).unwrap();
    assert_eq!(corpus.type_count("word").unwrap(), 2);
}

// ============================================================================
// 8. Import pulls every discourse from a source
// ============================================================================

#[test]
fn test_import_reports_loaded_and_skipped() {
    let backend = MemoryBackend::new();
    let corpus = Corpus::open(backend.clone(), CorpusConfig::new("demo")).unwrap();
    corpus.load_discourse(cat_sat("d1")).unwrap();

    let skipping = Corpus::open(backend, CorpusConfig::new("demo").skip_existing(true)).unwrap();
    let source = MemorySource::new([cat_sat("d1"), cat_sat("d2"), cat_sat("d3")]);
    let report = skipping.import(&source, &NeverCancel).unwrap();
    assert_eq!(report.loaded, vec!["d2", "d3"]);
    assert_eq!(report.skipped, vec!["d1"]);
    assert_eq!(skipping.discourses().unwrap(), vec!["d1", "d2", "d3"]);
}

// ============================================================================
// 9. Small batches still load everything
// ============================================================================

#[test]
fn test_chunked_batches() {
    let corpus = Corpus::open(MemoryBackend::new(), CorpusConfig::new("demo").batch_size(2)).unwrap();
    corpus.load_discourse(cat_sat("d1")).unwrap();
    assert_eq!(corpus.token_count("phone").unwrap(), 6);
    assert!(corpus.validate_hierarchy().unwrap().is_valid());
}
