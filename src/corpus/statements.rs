//! Maintenance statements: schema-driven property rewrites, subset tagging,
//! enrichment, resets and the schema snapshot on the `CorpusMeta` node.
//!
//! Values always travel as parameters; only labels and property names,
//! which the registry has already validated, are spliced into the AST.

use crate::cypher::ast::*;
use crate::loader::statements::{merge, node, row, set, unwind};
use crate::schema::{Hierarchy, PropertyOwner};

pub const NAME: &str = "name";
pub const DEFAULT: &str = "default";
pub const VALUES: &str = "values";
pub const HIERARCHY: &str = "hierarchy";
pub const SAVED_AT: &str = "saved_at";
pub const IDS: &str = "ids";

/// Label carried by the nodes of `owner`.
pub fn owner_label(owner: &PropertyOwner) -> String {
    match owner {
        PropertyOwner::Type(level) => Hierarchy::type_label(level),
        PropertyOwner::Token(level) => level.clone(),
        PropertyOwner::Subannotation(name) => name.clone(),
        PropertyOwner::Speaker => "Speaker".into(),
        PropertyOwner::Discourse => "Discourse".into(),
    }
}

fn all(label: &str, corpus: &str) -> MatchClause {
    MatchClause::new(vec![Pattern::node(node("n", label, corpus))])
}

fn write(unwind: Option<Unwind>, clauses: Vec<WriteClause>) -> Statement {
    Statement::Write(WriteQuery { unwind, clauses })
}

fn detach_delete(variables: &[&str]) -> WriteClause {
    WriteClause::Delete(DeleteClause { variables: variables.iter().map(|v| (*v).to_owned()).collect(), detach: true })
}

fn read(matches: Vec<MatchClause>, items: Vec<(Expr, &str)>, distinct: bool, order: Option<&str>) -> Statement {
    Statement::Query(Query {
        matches,
        return_clause: ReturnClause {
            distinct,
            items: items.into_iter().map(|(expr, alias)| ReturnItem { expr, alias: alias.into() }).collect(),
        },
        order_by: order.map(|o| OrderExpr { expr: Expr::var(o), ascending: true }).into_iter().collect(),
        skip: None,
        limit: None,
    })
}

/// `MATCH (n:<owner>:<corpus>) WHERE n.<name> IS NULL SET n.<name> = $default`
pub fn fill_default(corpus: &str, owner: &PropertyOwner, name: &str) -> Statement {
    let matched = all(&owner_label(owner), corpus).filter(Some(Expr::is_null(Expr::prop("n", name))));
    write(None, vec![WriteClause::Match(matched), WriteClause::Set(vec![set("n", name, Expr::param(DEFAULT))])])
}

/// Rewrite every value of `name` to `$default`.
pub fn overwrite(corpus: &str, owner: &PropertyOwner, name: &str) -> Statement {
    write(
        None,
        vec![WriteClause::Match(all(&owner_label(owner), corpus)), WriteClause::Set(vec![set("n", name, Expr::param(DEFAULT))])],
    )
}

pub fn remove_property(corpus: &str, owner: &PropertyOwner, name: &str) -> Statement {
    write(
        None,
        vec![
            WriteClause::Match(all(&owner_label(owner), corpus)),
            WriteClause::Remove(vec![RemoveItem::Property { variable: "n".into(), key: name.into() }]),
        ],
    )
}

/// Strip the `subset` label from every node carrying `label`.
pub fn remove_label(corpus: &str, label: &str, subset: &str) -> Statement {
    write(
        None,
        vec![
            WriteClause::Match(all(label, corpus)),
            WriteClause::Remove(vec![RemoveItem::Label { variable: "n".into(), label: subset.into() }]),
        ],
    )
}

/// `UNWIND $rows AS row MATCH (n:<label>:<corpus> {<key>: row}) SET n:<subset>`
pub fn tag(corpus: &str, label: &str, key: &str, subset: &str) -> Statement {
    write(
        unwind(),
        vec![
            WriteClause::Match(MatchClause::new(vec![Pattern::node(node("n", label, corpus).property(key, Expr::var("row")))])),
            WriteClause::Set(vec![SetItem::Label { variable: "n".into(), label: subset.into() }]),
        ],
    )
}

/// `UNWIND $rows AS row MATCH (n:<label>:<corpus> {<key>: row.key}) SET n += row.values`
pub fn merge_properties(corpus: &str, label: &str, key: &str) -> Statement {
    write(
        unwind(),
        vec![
            WriteClause::Match(MatchClause::new(vec![Pattern::node(node("n", label, corpus).property(key, row("key")))])),
            WriteClause::Set(vec![SetItem::MergeProperties { variable: "n".into(), value: row(VALUES) }]),
        ],
    )
}

/// `UNWIND $rows AS row MATCH (n:<level>:<corpus> {id: row}) SET n += $values`
pub fn set_on_ids(corpus: &str, level: &str) -> Statement {
    write(
        unwind(),
        vec![
            WriteClause::Match(MatchClause::new(vec![Pattern::node(node("n", level, corpus).property("id", Expr::var("row")))])),
            WriteClause::Set(vec![SetItem::MergeProperties { variable: "n".into(), value: Expr::param(VALUES) }]),
        ],
    )
}

pub fn delete_all(corpus: &str, label: &str) -> Statement {
    write(None, vec![WriteClause::Match(all(label, corpus)), detach_delete(&["n"])])
}

/// Attach the children of `removed` directly to its parent.
pub fn relink(corpus: &str, child: &str, removed: &str, parent: &str) -> Statement {
    let pattern = Pattern::node(node("c", child, corpus))
        .rel("contained_by", PatternDirection::Right, node("m", removed, corpus))
        .rel("contained_by", PatternDirection::Right, node("p", parent, corpus));
    write(
        None,
        vec![
            WriteClause::Match(MatchClause::new(vec![pattern])),
            merge(
                Pattern::node(NodePattern::new("c")).rel("contained_by", PatternDirection::Right, NodePattern::new("p")),
                Vec::new(),
            ),
        ],
    )
}

/// Tokens of one discourse at `level`, with their subannotations.
pub fn delete_discourse_tokens(corpus: &str, level: &str) -> Statement {
    let tokens = MatchClause::new(vec![Pattern::node(node("n", level, corpus).property("discourse", Expr::param(NAME)))]);
    let subs = MatchClause::optional(vec![
        Pattern::node(NodePattern::new("s")).rel("annotates", PatternDirection::Right, NodePattern::new("n")),
    ]);
    write(None, vec![WriteClause::Match(tokens), WriteClause::Match(subs), detach_delete(&["s", "n"])])
}

pub fn delete_discourse_anchors(corpus: &str) -> Statement {
    let anchors = MatchClause::new(vec![Pattern::node(node("n", "anchor", corpus).property("discourse", Expr::param(NAME)))]);
    write(None, vec![WriteClause::Match(anchors), detach_delete(&["n"])])
}

pub fn delete_marker(corpus: &str) -> Statement {
    let marker = MatchClause::new(vec![Pattern::node(node("n", "Discourse", corpus).property("name", Expr::param(NAME)))]);
    write(None, vec![WriteClause::Match(marker), detach_delete(&["n"])])
}

/// Every node labelled with the corpus name.
pub fn delete_corpus(corpus: &str) -> Statement {
    let everything = MatchClause::new(vec![Pattern::node(NodePattern::new("n").label(corpus))]);
    write(None, vec![WriteClause::Match(everything), detach_delete(&["n"])])
}

/// Merge subannotations of type `name` and attach them to their tokens.
pub fn subannotations(corpus: &str, level: &str, name: &str, properties: &[String]) -> Statement {
    let mut on_create = vec![
        set("s", "begin", row("begin")),
        set("s", "end", row("end")),
        set("s", "label", row("label")),
    ];
    on_create.extend(properties.iter().map(|p| set("s", p, row(p))));
    write(
        unwind(),
        vec![
            WriteClause::Match(MatchClause::new(vec![Pattern::node(node("n", level, corpus).property("id", row("token_id")))])),
            merge(Pattern::node(node("s", name, corpus).property("id", row("id"))), on_create),
            merge(
                Pattern::node(NodePattern::new("s")).rel("annotates", PatternDirection::Right, NodePattern::new("n")),
                Vec::new(),
            ),
        ],
    )
}

/// `MERGE (m:CorpusMeta {name: $name}) SET m.hierarchy = $hierarchy, m.saved_at = $saved_at`
pub fn save_schema() -> Statement {
    write(
        None,
        vec![
            merge(Pattern::node(NodePattern::new("m").label("CorpusMeta").property("name", Expr::param(NAME))), Vec::new()),
            WriteClause::Set(vec![set("m", HIERARCHY, Expr::param(HIERARCHY)), set("m", SAVED_AT, Expr::param(SAVED_AT))]),
        ],
    )
}

pub fn load_schema() -> Statement {
    let meta = MatchClause::new(vec![Pattern::node(NodePattern::new("m").label("CorpusMeta").property("name", Expr::param(NAME)))]);
    read(vec![meta], vec![(Expr::prop("m", HIERARCHY), HIERARCHY)], false, None)
}

pub fn delete_schema() -> Statement {
    let meta = MatchClause::new(vec![Pattern::node(NodePattern::new("m").label("CorpusMeta").property("name", Expr::param(NAME)))]);
    write(None, vec![WriteClause::Match(meta), detach_delete(&["m"])])
}

/// `MATCH (d:Discourse:<corpus> {name: $name}) RETURN count(d) AS count`
pub fn discourse_exists(corpus: &str) -> Statement {
    let marker = MatchClause::new(vec![Pattern::node(node("d", "Discourse", corpus).property("name", Expr::param(NAME)))]);
    read(vec![marker], vec![(Expr::call("count", vec![Expr::var("d")]), "count")], false, None)
}

/// Names of all nodes of a name-keyed label, sorted.
pub fn names(corpus: &str, label: &str) -> Statement {
    read(vec![all(label, corpus)], vec![(Expr::prop("n", "name"), "name")], false, Some("name"))
}

pub fn count(corpus: &str, label: &str) -> Statement {
    read(vec![all(label, corpus)], vec![(Expr::call("count", vec![Expr::var("n")]), "count")], false, None)
}

/// Distinct labels of a level's type records.
pub fn type_labels(corpus: &str, level: &str) -> Statement {
    read(
        vec![all(&Hierarchy::type_label(level), corpus)],
        vec![(Expr::prop("n", "label"), "label")],
        true,
        Some("label"),
    )
}

/// Ids among `$ids` that name a token of `level`.
pub fn existing_ids(corpus: &str, level: &str) -> Statement {
    let matched = all(level, corpus).filter(Some(Expr::in_list(Expr::prop("n", "id"), Expr::param(IDS))));
    read(vec![matched], vec![(Expr::prop("n", "id"), "id")], false, None)
}

/// Each token of `level` with the interval of its container, if any.
pub fn containment_check(corpus: &str, level: &str, parent: Option<&str>) -> Statement {
    let mut matches = vec![all(level, corpus)];
    let mut items = vec![
        (Expr::prop("n", "id"), "id"),
        (Expr::prop("n", "begin"), "begin"),
        (Expr::prop("n", "end"), "end"),
    ];
    if let Some(parent) = parent {
        matches.push(MatchClause::optional(vec![
            Pattern::node(NodePattern::new("n")).rel("contained_by", PatternDirection::Right, node("p", parent, corpus)),
        ]));
        items.push((Expr::prop("p", "id"), "parent_id"));
        items.push((Expr::prop("p", "begin"), "parent_begin"));
        items.push((Expr::prop("p", "end"), "parent_end"));
    }
    read(matches, items, false, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::render::render;

    #[test]
    fn test_existing_ids_binds_the_id_list() {
        assert_eq!(render(&existing_ids("demo", "phone")), "MATCH (n:phone:demo) WHERE n.id IN $ids RETURN n.id AS id");
    }

    #[test]
    fn test_fill_default_only_touches_missing_values() {
        let text = render(&fill_default("demo", &PropertyOwner::type_of("word"), "frequency"));
        assert_eq!(
            text,
            "MATCH (n:word_type:demo) WHERE n.frequency IS NULL SET n.frequency = $default"
        );
    }

    #[test]
    fn test_tag_binds_ids() {
        let text = render(&tag("demo", "phone", "id", "pause"));
        assert_eq!(text, "UNWIND $rows AS row MATCH (n:phone:demo {id: row}) SET n:pause");
    }
}
