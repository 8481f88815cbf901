//! End-to-end tests for the query builder: path resolution, compilation,
//! execution against `MemoryBackend` and hydration.

use pretty_assertions::assert_eq;
use tiergraph::model::props;
use tiergraph::{
    Aggregate, AnnotationToken, Comparison, Corpus, ErrorKind, Error, Filter, MemoryTrackStore,
    ParsedDiscourse, ParsedLevel, SubannotationRecord, TrackKey, TrackStore, Value,
};

/// "cat sat" then "kiss", one utterance each.
fn corpus() -> Corpus {
    let corpus = Corpus::open_memory("demo").unwrap();
    corpus
        .load_discourse(
            ParsedDiscourse::new("d1")
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
                ])),
        )
        .unwrap();
    corpus
        .load_discourse(
            ParsedDiscourse::new("d2")
                .level(ParsedLevel::new("utterance").token(AnnotationToken::new("", 0.0, 0.3)))
                .level(
                    ParsedLevel::new("word")
                        .contained_by("utterance")
                        .token(AnnotationToken::new("kiss", 0.0, 0.3)),
                )
                .level(ParsedLevel::new("phone").contained_by("word").tokens([
                    AnnotationToken::new("k", 0.0, 0.1),
                    AnnotationToken::new("ih", 0.1, 0.2),
                    AnnotationToken::new("s", 0.2, 0.3),
                ])),
        )
        .unwrap();
    corpus
}

fn strings(rows: &[tiergraph::Row], column: &str) -> Vec<String> {
    rows.iter().map(|r| r.get_as::<String>(column).unwrap()).collect()
}

// ============================================================================
// 1. Filter on a phone, project its word
// ============================================================================

#[test]
fn test_phone_word_label() {
    let corpus = corpus();
    let rows = corpus
        .query("phone")
        .filter(Filter::eq("phone.label", "k"))
        .filter(Filter::eq("phone.discourse", "d1"))
        .column("phone.word.label", "word_label")
        .all()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), &["word_label".to_string()]);
    assert_eq!(rows[0].get_as::<String>("word_label").unwrap(), "cat");
}

// ============================================================================
// 2. Default columns
// ============================================================================

#[test]
fn test_default_columns() {
    let corpus = corpus();
    let rows = corpus.query("word").order_by("word.label").all().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(strings(&rows, "label"), vec!["cat", "kiss", "sat"]);
    assert_eq!(strings(&rows, "discourse"), vec!["d1", "d2", "d1"]);
    assert_eq!(rows[2].get_as::<f64>("begin").unwrap(), 0.3);
}

// ============================================================================
// 3. previous / following stay inside one discourse
// ============================================================================

#[test]
fn test_previous_and_following() {
    let corpus = corpus();
    let rows = corpus
        .query("phone")
        .filter(Filter::eq("phone.label", "s"))
        .column("phone.discourse", "discourse")
        .column("phone.previous.label", "previous")
        .column("phone.following.label", "following")
        .order_by("discourse")
        .all()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_as::<String>("previous").unwrap(), "t");
    assert_eq!(rows[0].get_as::<String>("following").unwrap(), "ae");
    assert_eq!(rows[1].get_as::<String>("previous").unwrap(), "ih");
    assert_eq!(rows[1].get("following"), Some(&Value::Null));
}

// ============================================================================
// 4. Filters across paths and operators
// ============================================================================

#[test]
fn test_filter_operators() {
    let corpus = corpus();
    let count = |filter: Filter| corpus.query("phone").filter(filter).count().unwrap();

    assert_eq!(count(Filter::is_in("phone.label", ["k", "s"])), 4);
    assert_eq!(count(Filter::not_in("phone.label", ["k", "s"])), 5);
    assert_eq!(count(Filter::regex("phone.label", "[aeiou].*")), 3);
    assert_eq!(count(Filter::gte("phone.begin", 0.3)), 3);
    assert_eq!(count(Filter::eq("phone.word.label", "sat")), 3);
    assert_eq!(count(Filter::eq("phone.following.label", "ae")), 2);
    assert_eq!(count(Filter::paths("phone.begin", Comparison::Eq, "phone.word.begin")), 3);
}

// ============================================================================
// 5. Children come back as an ordered list
// ============================================================================

#[test]
fn test_children_column_is_ordered() {
    let corpus = corpus();
    let rows = corpus
        .query("word")
        .filter(Filter::eq("word.label", "sat"))
        .column("word.phone.label", "phones")
        .all()
        .unwrap();
    assert_eq!(rows[0].get_as::<Vec<String>>("phones").unwrap(), vec!["s", "ae", "t"]);

    let any_s = corpus.query("word").filter(Filter::eq("word.phone.label", "s")).count().unwrap();
    assert_eq!(any_s, 2);
}

#[test]
fn test_grandchildren_column_is_in_time_order() {
    let corpus = corpus();
    let rows = corpus
        .query("utterance")
        .filter(Filter::eq("utterance.discourse", "d1"))
        .column("utterance.phone.label", "phones")
        .all()
        .unwrap();
    assert_eq!(rows[0].get_as::<Vec<String>>("phones").unwrap(), vec!["k", "ae", "t", "s", "ae", "t"]);
}

#[test]
fn test_nested_subannotations_follow_token_then_own_time() {
    let corpus = corpus();
    let phones = corpus
        .query("phone")
        .filter(Filter::eq("phone.word.label", "cat"))
        .column("phone.id", "id")
        .column("phone.begin", "begin")
        .all()
        .unwrap();
    assert_eq!(phones.len(), 3);

    // Labels sort against their time order, so only the time keys can order them.
    let records: Vec<SubannotationRecord> = phones
        .iter()
        .flat_map(|row| {
            let id: String = row.get_as("id").unwrap();
            let begin: f64 = row.get_as("begin").unwrap();
            [
                SubannotationRecord::new(id.clone(), "x", begin, begin + 0.01),
                SubannotationRecord::new(id, "a", begin + 0.01, begin + 0.02),
            ]
        })
        .collect();
    assert_eq!(corpus.add_subannotations("burst", "phone", &records).unwrap(), 6);

    let rows = corpus
        .query("word")
        .filter(Filter::eq("word.label", "cat"))
        .column("word.phone.burst.label", "bursts")
        .all()
        .unwrap();
    assert_eq!(rows[0].get_as::<Vec<String>>("bursts").unwrap(), vec!["x", "a", "x", "a", "x", "a"]);
}

// ============================================================================
// 6. Type subsets
// ============================================================================

#[test]
fn test_type_subset() {
    let corpus = corpus();
    corpus.add_type_subset("phone", "sibilant", &["s", "z", "sh"]).unwrap();

    let sibilants = corpus.query("phone").filter(Filter::in_subset("phone", "sibilant")).count().unwrap();
    assert_eq!(sibilants, 2);
    let others = corpus.query("phone").filter(Filter::not_in_subset("phone", "sibilant")).count().unwrap();
    assert_eq!(others, 7);
    let before = corpus
        .query("phone")
        .filter(Filter::in_subset("phone.following", "sibilant"))
        .column("phone.label", "label")
        .order_by("label")
        .all()
        .unwrap();
    assert_eq!(strings(&before, "label"), vec!["ih", "t"]);
}

// ============================================================================
// 7. Token subsets and property enrichment from a query
// ============================================================================

#[test]
fn test_create_subset_and_set_properties() {
    let corpus = corpus();
    let tagged = corpus
        .query("phone")
        .filter(Filter::eq("phone.label", "t"))
        .create_subset("final_t")
        .unwrap();
    assert_eq!(tagged, 2);
    assert_eq!(corpus.query("phone").filter(Filter::in_subset("phone", "final_t")).count().unwrap(), 2);

    let updated = corpus
        .query("word")
        .filter(Filter::eq("word.label", "cat"))
        .set_properties(props([("animate", true)]))
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(corpus.query("word").filter(Filter::eq("word.animate", true)).count().unwrap(), 1);
    assert_eq!(corpus.query("word").filter(Filter::eq("word.animate", false)).count().unwrap(), 2);
}

// ============================================================================
// 8. Grouped aggregates
// ============================================================================

#[test]
fn test_grouped_aggregates() {
    let corpus = corpus();
    let rows = corpus
        .query("phone")
        .column("phone.word.label", "word")
        .group_by("word")
        .order_by("word")
        .aggregate([Aggregate::count(), Aggregate::max("phone.end").named("last_end")])
        .unwrap();
    assert_eq!(strings(&rows, "word"), vec!["cat", "kiss", "sat"]);
    let counts: Vec<i64> = rows.iter().map(|r| r.get_as("count").unwrap()).collect();
    assert_eq!(counts, vec![3, 3, 3]);
    assert_eq!(rows[2].get_as::<f64>("last_end").unwrap(), 0.6);

    let total = corpus.query("phone").aggregate([Aggregate::count()]).unwrap();
    assert_eq!(total[0].get_as::<i64>("count").unwrap(), 9);
}

// ============================================================================
// 9. Paging
// ============================================================================

#[test]
fn test_limit_and_offset() {
    let corpus = corpus();
    let rows = corpus
        .query("phone")
        .filter(Filter::eq("phone.discourse", "d1"))
        .column("phone.label", "label")
        .order_by("phone.begin")
        .offset(2)
        .limit(2)
        .all()
        .unwrap();
    assert_eq!(strings(&rows, "label"), vec!["t", "s"]);
}

// ============================================================================
// 10. Literals are bound, never spliced
// ============================================================================

#[test]
fn test_to_cypher_binds_literals() {
    let corpus = corpus();
    let text = corpus
        .query("phone")
        .filter(Filter::eq("phone.label", "k' OR 1=1"))
        .column("phone.word.label", "word_label")
        .to_cypher()
        .unwrap();
    assert!(text.contains("$p0"), "{text}");
    assert!(!text.contains("OR 1=1"), "{text}");

    let rows = corpus.query("phone").filter(Filter::eq("phone.label", "k' OR 1=1")).all().unwrap();
    assert!(rows.is_empty());
}

// ============================================================================
// 11. Malformed queries fail before touching the store
// ============================================================================

#[test]
fn test_query_errors() {
    let corpus = corpus();

    let err = corpus.query("phone").column("phone.syllable.label", "x").all().unwrap_err();
    assert!(matches!(err, Error::InvalidPath { ref step, .. } if step == "syllable"));

    let err = corpus.query("phone").filter(Filter::eq("phone.begin", "soon")).all().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);

    let err = corpus.query("word").aggregate([Aggregate::max("word.phone.begin")]).unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));

    let err = corpus
        .query("phone")
        .column("phone.word.label", "word")
        .group_by("word")
        .count()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));

    let err = corpus.query("phone").filter(Filter::regex("phone.label", "(")).all().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);

    let err = corpus.query("phone").filter(Filter::in_subset("phone", "nasal")).all().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
}

// ============================================================================
// 12. Track slices per token
// ============================================================================

#[test]
fn test_tracks_slice_to_token_intervals() {
    let corpus = corpus();
    let store = MemoryTrackStore::new();
    let samples = vec![(0.5, 95.0), (0.0, 120.0), (0.1, 118.0), (0.2, 110.0), (0.25, 104.0), (0.35, 99.0)];
    store.save(&TrackKey::new("d1", "d1", "pitch"), samples).unwrap();

    let tracks = corpus
        .query("word")
        .filter(Filter::eq("word.label", "cat"))
        .tracks(&store, "pitch")
        .unwrap();
    assert_eq!(tracks.len(), 1);
    let times: Vec<f64> = tracks[0].samples.iter().map(|(t, _)| *t).collect();
    assert_eq!(times, vec![0.0, 0.1, 0.2, 0.25]);
    assert_eq!(tracks[0].key, TrackKey::new("d1", "d1", "pitch"));
}
