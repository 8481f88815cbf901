//! Write pipeline: UNWIND, then MATCH / MERGE / CREATE / SET / REMOVE / DELETE.

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::StorageBackend;
use crate::{Error, Result};
use super::eval::{eval, Binding, EvalContext};
use super::matcher::{apply_match, match_pattern};
use super::ExecutionStats;

pub(crate) fn execute_write<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &mut B::Tx,
    query: &WriteQuery,
    stats: &mut ExecutionStats,
) -> Result<()> {
    let mut rows = match &query.unwind {
        Some(unwind) => match eval(ctx, tx, &Binding::new(), &unwind.expr)? {
            Value::List(items) => items
                .into_iter()
                .map(|item| Binding::from([(unwind.alias.clone(), item)]))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(Error::TypeError { expected: "LIST".into(), got: other.type_name().into() });
            }
        },
        None => vec![Binding::new()],
    };

    for clause in &query.clauses {
        rows = match clause {
            WriteClause::Match(m) => apply_match(ctx, tx, m, rows)?,
            WriteClause::Merge(m) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    out.extend(merge(ctx, tx, m, row, stats)?);
                }
                out
            }
            WriteClause::Create(c) => {
                let mut out = Vec::with_capacity(rows.len());
                for mut row in rows {
                    for pattern in &c.patterns {
                        row = create_pattern(ctx, tx, pattern, row, stats)?;
                    }
                    out.push(row);
                }
                out
            }
            WriteClause::Set(items) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    out.push(apply_set(ctx, tx, items, row, stats)?);
                }
                out
            }
            WriteClause::Remove(items) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    out.push(apply_remove(ctx, tx, items, row, stats)?);
                }
                out
            }
            WriteClause::Delete(d) => {
                for row in &rows {
                    delete(ctx, tx, d, row, stats)?;
                }
                rows
            }
        };
    }
    Ok(())
}

fn merge<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &mut B::Tx,
    clause: &MergeClause,
    row: Binding,
    stats: &mut ExecutionStats,
) -> Result<Vec<Binding>> {
    let found = match_pattern(ctx, tx, &clause.pattern, &row)?;
    if found.is_empty() {
        let created = create_pattern(ctx, tx, &clause.pattern, row, stats)?;
        return Ok(vec![apply_set(ctx, tx, &clause.on_create, created, stats)?]);
    }
    let mut out = Vec::with_capacity(found.len());
    for b in found {
        out.push(apply_set(ctx, tx, &clause.on_match, b, stats)?);
    }
    Ok(out)
}

/// Create every unbound node of `pattern`, then every relationship.
fn create_pattern<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &mut B::Tx,
    pattern: &Pattern,
    mut row: Binding,
    stats: &mut ExecutionStats,
) -> Result<Binding> {
    let mut ids = Vec::new();
    for np in pattern.nodes() {
        let existing = np.alias.as_ref().and_then(|a| row.get(a));
        let id = match existing {
            Some(Value::Node(n)) => n.id,
            Some(other) => {
                return Err(Error::TypeError { expected: "NODE".into(), got: other.type_name().into() });
            }
            None => {
                let mut props = PropertyMap::new();
                for (key, expr) in &np.properties {
                    let v = eval(ctx, tx, &row, expr)?;
                    if !v.is_null() {
                        props.insert(key.clone(), v);
                    }
                }
                let labels: Vec<&str> = np.labels.iter().map(String::as_str).collect();
                let id = ctx.backend.create_node(tx, &labels, props)?;
                stats.nodes_created += 1;
                if let Some(alias) = &np.alias {
                    bind_fresh(ctx, tx, &mut row, alias, id)?;
                }
                id
            }
        };
        ids.push(id);
    }

    let rels = pattern.elements.iter().filter_map(|e| match e {
        PatternElement::Relationship(r) => Some(r),
        PatternElement::Node(_) => None,
    });
    for (i, rel) in rels.enumerate() {
        let rel_type = rel.rel_types.first().ok_or_else(|| {
            Error::ExecutionError("relationships must have exactly one type to be created".into())
        })?;
        let (src, dst) = match rel.direction {
            PatternDirection::Left => (ids[i + 1], ids[i]),
            _ => (ids[i], ids[i + 1]),
        };
        let rid = ctx.backend.create_relationship(tx, src, dst, rel_type, PropertyMap::new())?;
        stats.relationships_created += 1;
        if let Some(alias) = &rel.alias {
            if let Some(r) = ctx.backend.get_relationship(tx, rid)? {
                row.insert(alias.clone(), Value::Relationship(Box::new(r)));
            }
        }
    }
    Ok(row)
}

fn bound_node(row: &Binding, variable: &str) -> Result<Option<NodeId>> {
    match row.get(variable) {
        Some(Value::Node(n)) => Ok(Some(n.id)),
        Some(Value::Null) => Ok(None),
        Some(other) => Err(Error::TypeError { expected: "NODE".into(), got: other.type_name().into() }),
        None => Err(Error::ExecutionError(format!("variable `{variable}` not defined"))),
    }
}

/// Re-read a node so later clauses see the write.
fn bind_fresh<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    row: &mut Binding,
    variable: &str,
    id: NodeId,
) -> Result<()> {
    if let Some(node) = ctx.backend.get_node(tx, id)? {
        row.insert(variable.to_owned(), Value::Node(Box::new(node)));
    }
    Ok(())
}

fn apply_set<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &mut B::Tx,
    items: &[SetItem],
    mut row: Binding,
    stats: &mut ExecutionStats,
) -> Result<Binding> {
    for item in items {
        match item {
            SetItem::Property { variable, key, value } => {
                let v = eval(ctx, tx, &row, value)?;
                let Some(id) = bound_node(&row, variable)? else { continue };
                if v.is_null() {
                    ctx.backend.remove_node_property(tx, id, key)?;
                } else {
                    ctx.backend.set_node_property(tx, id, key, v)?;
                }
                stats.properties_set += 1;
                bind_fresh(ctx, tx, &mut row, variable, id)?;
            }
            SetItem::MergeProperties { variable, value } => {
                let map = match eval(ctx, tx, &row, value)? {
                    Value::Map(m) => m,
                    Value::Null => continue,
                    other => {
                        return Err(Error::TypeError { expected: "MAP".into(), got: other.type_name().into() });
                    }
                };
                let Some(id) = bound_node(&row, variable)? else { continue };
                for (key, v) in map {
                    if v.is_null() {
                        ctx.backend.remove_node_property(tx, id, &key)?;
                    } else {
                        ctx.backend.set_node_property(tx, id, &key, v)?;
                    }
                    stats.properties_set += 1;
                }
                bind_fresh(ctx, tx, &mut row, variable, id)?;
            }
            SetItem::Label { variable, label } => {
                let Some(id) = bound_node(&row, variable)? else { continue };
                ctx.backend.add_label(tx, id, label)?;
                stats.labels_added += 1;
                bind_fresh(ctx, tx, &mut row, variable, id)?;
            }
        }
    }
    Ok(row)
}

fn apply_remove<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &mut B::Tx,
    items: &[RemoveItem],
    mut row: Binding,
    stats: &mut ExecutionStats,
) -> Result<Binding> {
    for item in items {
        match item {
            RemoveItem::Property { variable, key } => {
                let Some(id) = bound_node(&row, variable)? else { continue };
                ctx.backend.remove_node_property(tx, id, key)?;
                stats.properties_set += 1;
                bind_fresh(ctx, tx, &mut row, variable, id)?;
            }
            RemoveItem::Label { variable, label } => {
                let Some(id) = bound_node(&row, variable)? else { continue };
                ctx.backend.remove_label(tx, id, label)?;
                stats.labels_removed += 1;
                bind_fresh(ctx, tx, &mut row, variable, id)?;
            }
        }
    }
    Ok(row)
}

fn delete<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &mut B::Tx,
    clause: &DeleteClause,
    row: &Binding,
    stats: &mut ExecutionStats,
) -> Result<()> {
    for variable in &clause.variables {
        match row.get(variable) {
            Some(Value::Node(n)) => {
                // Rows may share a node; a second delete is a no-op.
                if ctx.backend.get_node(tx, n.id)?.is_none() {
                    continue;
                }
                let rels = ctx.backend.get_relationships(tx, n.id, Direction::Both, None)?.len() as u64;
                let deleted = if clause.detach {
                    ctx.backend.detach_delete_node(tx, n.id)?
                } else {
                    ctx.backend.delete_node(tx, n.id)?
                };
                if deleted {
                    stats.nodes_deleted += 1;
                    if clause.detach {
                        stats.relationships_deleted += rels;
                    }
                }
            }
            Some(Value::Relationship(r)) => {
                if ctx.backend.delete_relationship(tx, r.id)? {
                    stats.relationships_deleted += 1;
                }
            }
            Some(Value::Null) => {}
            Some(other) => {
                return Err(Error::TypeError { expected: "NODE or RELATIONSHIP".into(), got: other.type_name().into() });
            }
            None => return Err(Error::ExecutionError(format!("variable `{variable}` not defined"))),
        }
    }
    Ok(())
}
