//! Bulk write statements, one per loader step.
//!
//! Each statement unwinds a `$rows` parameter (see [`super::Batch::to_param`])
//! and merges on the record's `id`, so re-running a step writes nothing new.

use crate::cypher::ast::*;
use crate::schema::Hierarchy;
use crate::storage::ConstraintType;

pub const ROWS: &str = "rows";
pub const DISCOURSE: &str = "discourse";
/// Typed defaults of the registered speaker properties.
pub const SPEAKER_DEFAULTS: &str = "speaker_defaults";

pub(crate) fn row(key: &str) -> Expr {
    Expr::prop("row", key)
}

pub(crate) fn unwind() -> Option<Unwind> {
    Some(Unwind { expr: Expr::param(ROWS), alias: "row".into() })
}

pub(crate) fn node(alias: &str, label: &str, corpus: &str) -> NodePattern {
    NodePattern::new(alias).label(label).label(corpus)
}

pub(crate) fn set(variable: &str, key: &str, value: Expr) -> SetItem {
    SetItem::Property { variable: variable.into(), key: key.into(), value }
}

pub(crate) fn merge(pattern: Pattern, on_create: Vec<SetItem>) -> WriteClause {
    WriteClause::Merge(MergeClause { pattern, on_create, on_match: Vec::new() })
}

/// `UNWIND $rows AS row MERGE (s:Speaker:<corpus> {name: row.name}) ON CREATE SET s += $speaker_defaults`
pub fn speakers(corpus: &str) -> Statement {
    Statement::Write(WriteQuery {
        unwind: unwind(),
        clauses: vec![merge(
            Pattern::node(node("s", "Speaker", corpus).property("name", row("name"))),
            vec![SetItem::MergeProperties { variable: "s".into(), value: Expr::param(SPEAKER_DEFAULTS) }],
        )],
    })
}

/// Merge type records of `level`; `properties` are the batch's property columns.
pub fn types(corpus: &str, level: &str, properties: &[String]) -> Statement {
    let mut on_create = vec![set("t", "label", row("label"))];
    on_create.extend(properties.iter().map(|p| set("t", p, row(p))));
    Statement::Write(WriteQuery {
        unwind: unwind(),
        clauses: vec![merge(
            Pattern::node(node("t", &Hierarchy::type_label(level), corpus).property("id", row("type_key"))),
            on_create,
        )],
    })
}

/// Merge the anchors of one discourse.
pub fn anchors(corpus: &str) -> Statement {
    Statement::Write(WriteQuery {
        unwind: unwind(),
        clauses: vec![merge(
            Pattern::node(node("a", "anchor", corpus).property("id", row("anchor_id"))),
            vec![
                set("a", "time", row("time")),
                set("a", "discourse", Expr::param(DISCOURSE)),
                set("a", "speaker", row("speaker")),
            ],
        )],
    })
}

/// Merge tokens of `level` and attach them to their type and anchors.
pub fn tokens(corpus: &str, level: &str, properties: &[String]) -> Statement {
    let mut on_create = vec![
        set("n", "begin", row("begin")),
        set("n", "end", row("end")),
        set("n", "discourse", Expr::param(DISCOURSE)),
        set("n", "speaker", row("speaker")),
    ];
    on_create.extend(properties.iter().map(|p| set("n", p, row(p))));

    let bound = |alias: &str| NodePattern::new(alias);
    Statement::Write(WriteQuery {
        unwind: unwind(),
        clauses: vec![
            WriteClause::Match(MatchClause::new(vec![
                Pattern::node(node("t", &Hierarchy::type_label(level), corpus).property("id", row("type_key"))),
                Pattern::node(node("b", "anchor", corpus).property("id", row("from_anchor_id"))),
                Pattern::node(node("e", "anchor", corpus).property("id", row("to_anchor_id"))),
            ])),
            merge(Pattern::node(node("n", level, corpus).property("id", row("token_id"))), on_create),
            merge(Pattern::node(bound("n")).rel("is_a", PatternDirection::Right, bound("t")), Vec::new()),
            merge(Pattern::node(bound("n")).rel("starts_at", PatternDirection::Right, bound("b")), Vec::new()),
            merge(Pattern::node(bound("n")).rel("ends_at", PatternDirection::Right, bound("e")), Vec::new()),
        ],
    })
}

/// Attach tokens of `level` to their containers at `parent`.
pub fn containment(corpus: &str, level: &str, parent: &str) -> Statement {
    Statement::Write(WriteQuery {
        unwind: unwind(),
        clauses: vec![
            WriteClause::Match(MatchClause::new(vec![
                Pattern::node(node("c", level, corpus).property("id", row("token_id"))),
                Pattern::node(node("p", parent, corpus).property("id", row("parent_id"))),
            ])),
            merge(
                Pattern::node(NodePattern::new("c")).rel("contained_by", PatternDirection::Right, NodePattern::new("p")),
                Vec::new(),
            ),
        ],
    })
}

/// The completion marker: `MERGE (d:Discourse:<corpus> {name: $name}) SET d += $props`.
pub fn discourse_marker(corpus: &str) -> Statement {
    Statement::Write(WriteQuery {
        unwind: None,
        clauses: vec![
            merge(Pattern::node(node("d", "Discourse", corpus).property("name", Expr::param("name"))), Vec::new()),
            WriteClause::Set(vec![SetItem::MergeProperties { variable: "d".into(), value: Expr::param("props") }]),
        ],
    })
}

/// Uniqueness constraints on `id` for every label a load writes, plus
/// lookup indexes on the name-keyed labels.
pub fn constraints(hierarchy: &Hierarchy) -> Vec<Statement> {
    let mut labels: Vec<String> = vec!["anchor".into()];
    for level in hierarchy.levels() {
        labels.push(level.clone());
        labels.push(Hierarchy::type_label(level));
    }
    labels.extend(hierarchy.subannotation_names().cloned());

    let mut out: Vec<Statement> = labels
        .into_iter()
        .map(|label| {
            Statement::Schema(SchemaCommand::CreateConstraint {
                label,
                property: "id".into(),
                constraint_type: ConstraintType::Unique,
            })
        })
        .collect();
    out.extend(["Speaker", "Discourse", "CorpusMeta"].into_iter().map(|label| {
        Statement::Schema(SchemaCommand::CreateIndex { label: label.into(), property: "name".into() })
    }));
    out
}
