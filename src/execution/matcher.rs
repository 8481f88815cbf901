//! Pattern matching: extend a binding along a node/relationship chain.

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::StorageBackend;
use crate::Result;
use super::eval::{eval, is_true, Binding, EvalContext};

/// One partial match: bindings so far, the node at the frontier, and the
/// relationships already used (a relationship is traversed once per match).
struct Partial {
    binding: Binding,
    at: NodeId,
    used: Vec<RelId>,
}

/// All ways `pattern` matches under `binding`. Each result extends `binding`.
pub(crate) fn match_pattern<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    pattern: &Pattern,
    binding: &Binding,
) -> Result<Vec<Binding>> {
    let bound = |n: Option<&NodePattern>| {
        n.and_then(|n| n.alias.as_ref()).is_some_and(|a| binding.contains_key(a))
    };
    // Anchor on whichever end is already bound; otherwise prefer a labelled start.
    let reverse = !bound(pattern.first_node())
        && (bound(pattern.last_node())
            || (pattern.first_node().is_some_and(|n| n.labels.is_empty())
                && pattern.last_node().is_some_and(|n| !n.labels.is_empty())));
    let owned;
    let pattern = if reverse {
        owned = pattern.reversed();
        &owned
    } else {
        pattern
    };

    let mut elements = pattern.elements.iter();
    let Some(PatternElement::Node(start)) = elements.next() else {
        return Ok(Vec::new());
    };

    let mut frontier = Vec::new();
    for node in start_candidates(ctx, tx, start, binding)? {
        let at = node.id;
        if let Some(b) = bind_node(ctx, tx, start, node, binding)? {
            frontier.push(Partial { at, binding: b, used: Vec::new() });
        }
    }

    while let Some(element) = elements.next() {
        let PatternElement::Relationship(rel) = element else { continue };
        let Some(PatternElement::Node(target)) = elements.next() else { break };
        let dir = match rel.direction {
            PatternDirection::Right => Direction::Outgoing,
            PatternDirection::Left => Direction::Incoming,
            PatternDirection::Both => Direction::Both,
        };
        let single_type = match rel.rel_types.as_slice() {
            [t] => Some(t.as_str()),
            _ => None,
        };

        let mut next = Vec::new();
        for partial in frontier {
            for r in ctx.backend.get_relationships(tx, partial.at, dir, single_type)? {
                if partial.used.contains(&r.id) {
                    continue;
                }
                if !rel.rel_types.is_empty() && !rel.rel_types.iter().any(|t| *t == r.rel_type) {
                    continue;
                }
                let Some(other_id) = r.other_node(partial.at) else { continue };
                let Some(other) = ctx.backend.get_node(tx, other_id)? else { continue };
                let Some(mut b) = bind_node(ctx, tx, target, other, &partial.binding)? else {
                    continue;
                };
                if let Some(alias) = &rel.alias {
                    b.insert(alias.clone(), Value::Relationship(Box::new(r.clone())));
                }
                let mut used = partial.used.clone();
                used.push(r.id);
                next.push(Partial { at: other_id, binding: b, used });
            }
        }
        frontier = next;
    }

    Ok(frontier.into_iter().map(|p| p.binding).collect())
}

/// Apply a MATCH clause to every incoming row.
///
/// OPTIONAL MATCH keeps a row whose patterns found nothing, binding the
/// clause's new aliases to null.
pub(crate) fn apply_match<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    clause: &MatchClause,
    rows: Vec<Binding>,
) -> Result<Vec<Binding>> {
    let mut out = Vec::new();
    for row in rows {
        let mut matched = vec![row.clone()];
        for pattern in &clause.patterns {
            let mut extended = Vec::new();
            for b in &matched {
                extended.extend(match_pattern(ctx, tx, pattern, b)?);
            }
            matched = extended;
            if matched.is_empty() {
                break;
            }
        }
        if let Some(predicate) = &clause.where_clause {
            let mut kept = Vec::with_capacity(matched.len());
            for b in matched {
                if is_true(ctx, tx, &b, predicate)? {
                    kept.push(b);
                }
            }
            matched = kept;
        }
        if matched.is_empty() && clause.optional {
            let mut padded = row;
            for alias in clause_aliases(clause) {
                padded.entry(alias).or_insert(Value::Null);
            }
            out.push(padded);
        } else {
            out.extend(matched);
        }
    }
    Ok(out)
}

fn clause_aliases(clause: &MatchClause) -> Vec<String> {
    let mut aliases = Vec::new();
    for pattern in &clause.patterns {
        for element in &pattern.elements {
            let alias = match element {
                PatternElement::Node(n) => &n.alias,
                PatternElement::Relationship(r) => &r.alias,
            };
            if let Some(a) = alias {
                aliases.push(a.clone());
            }
        }
    }
    aliases
}

/// Nodes the first element of a pattern may stand for.
fn start_candidates<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    start: &NodePattern,
    binding: &Binding,
) -> Result<Vec<Node>> {
    if let Some(alias) = &start.alias {
        if let Some(v) = binding.get(alias) {
            return Ok(match v {
                Value::Node(n) => ctx.backend.get_node(tx, n.id)?.into_iter().collect(),
                _ => Vec::new(),
            });
        }
    }
    let Some(label) = start.labels.first() else {
        return ctx.backend.all_nodes(tx);
    };
    if let Some((key, expr)) = start.properties.first() {
        let value = eval(ctx, tx, binding, expr)?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        return ctx.backend.nodes_by_property(tx, label, key, &value);
    }
    ctx.backend.nodes_by_label(tx, label)
}

/// Check `node` against `np` and return the extended binding if it fits.
fn bind_node<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    np: &NodePattern,
    node: Node,
    binding: &Binding,
) -> Result<Option<Binding>> {
    if !node.has_all(&np.labels) {
        return Ok(None);
    }
    for (key, expr) in &np.properties {
        let expected = eval(ctx, tx, binding, expr)?;
        if node.get(key).and_then(|v| v.cypher_eq(&expected)) != Some(true) {
            return Ok(None);
        }
    }
    let mut b = binding.clone();
    if let Some(alias) = &np.alias {
        match binding.get(alias) {
            Some(Value::Node(existing)) if existing.id != node.id => return Ok(None),
            Some(Value::Node(_)) => {}
            Some(_) => return Ok(None),
            None => {}
        }
        b.insert(alias.clone(), Value::Node(Box::new(node)));
    }
    Ok(Some(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tx::TxMode;

    /// phone(k) -contained_by-> word(cat); word(dog) with no phones.
    fn fixture() -> MemoryBackend {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let k = db.create_node(&mut tx, &["phone"], props([("label", "k")])).unwrap();
        let cat = db.create_node(&mut tx, &["word"], props([("label", "cat")])).unwrap();
        db.create_node(&mut tx, &["word"], props([("label", "dog")])).unwrap();
        db.create_relationship(&mut tx, k, cat, "contained_by", PropertyMap::new()).unwrap();
        db.commit_tx(tx).unwrap();
        db
    }

    #[test]
    fn test_match_follows_relationship() {
        let db = fixture();
        let tx = db.begin_tx(TxMode::ReadOnly).unwrap();
        let params = PropertyMap::new();
        let ctx = EvalContext::new(&db, &params);
        let pattern = Pattern::node(NodePattern::new("p").label("phone"))
            .rel("contained_by", PatternDirection::Right, NodePattern::new("w").label("word"));

        let rows = match_pattern(&ctx, &tx, &pattern, &Binding::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["w"].as_node().and_then(|n| n.get("label")), Some(&Value::from("cat")));
    }

    #[test]
    fn test_optional_match_pads_with_null() {
        let db = fixture();
        let tx = db.begin_tx(TxMode::ReadOnly).unwrap();
        let params = PropertyMap::new();
        let ctx = EvalContext::new(&db, &params);

        let words = apply_match(
            &ctx,
            &tx,
            &MatchClause::new(vec![Pattern::node(NodePattern::new("w").label("word"))]),
            vec![Binding::new()],
        )
        .unwrap();
        let optional = MatchClause::optional(vec![Pattern::node(NodePattern::new("w"))
            .rel("contained_by", PatternDirection::Left, NodePattern::new("p").label("phone"))]);
        let rows = apply_match(&ctx, &tx, &optional, words).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r["p"].is_null()));
        assert!(rows.iter().any(|r| r["p"].as_node().is_some()));
    }
}
