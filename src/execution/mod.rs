//! Statement execution engine.
//!
//! Interprets [`Statement`]s directly against a [`StorageBackend`]'s
//! primitives. Backends that report `accepts_cypher` skip this module and
//! receive rendered text instead; both paths produce a [`QueryResult`].

mod aggregate;
mod eval;
mod matcher;
mod write;

use std::collections::HashMap;
use std::time::Instant;

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::{RawResult, StorageBackend};
use crate::index::IndexType;
use crate::{Error, Result};
use eval::{eval, Binding, EvalContext};

/// Query execution result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<RawResult> for QueryResult {
    fn from(raw: RawResult) -> Self {
        Self {
            columns: raw.columns,
            rows: raw.rows.into_iter().map(|values| ResultRow { values }).collect(),
            stats: ExecutionStats::default(),
        }
    }
}

/// A single row in the result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    pub values: HashMap<String, Value>,
}

impl ResultRow {
    /// Get a typed value from the row.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let val = self.values.get(key)
            .ok_or_else(|| Error::NotFound(format!("Column '{key}'")))?;
        T::from_value(val)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub execution_time_ms: u64,
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

fn type_error(expected: &str, val: &Value) -> Error {
    Error::TypeError { expected: expected.into(), got: val.type_name().into() }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for Node {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Node(n) => Ok(*n.clone()),
            _ => Err(type_error("Node", val)),
        }
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::String(s) => Ok(s.clone()),
            _ => Err(type_error("String", val)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| type_error("Integer", val))
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_float().ok_or_else(|| type_error("Float", val))
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_bool().ok_or_else(|| type_error("Boolean", val))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => Err(type_error("List", val)),
        }
    }
}

/// Execute a statement against a storage backend inside `tx`.
pub fn execute<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    stmt: &Statement,
    params: &PropertyMap,
) -> Result<QueryResult> {
    let started = Instant::now();
    let ctx = EvalContext::new(backend, params);
    let mut result = match stmt {
        Statement::Query(q) => execute_query(&ctx, tx, q)?,
        Statement::Write(w) => {
            let mut stats = ExecutionStats::default();
            write::execute_write(&ctx, tx, w, &mut stats)?;
            QueryResult { stats, ..QueryResult::default() }
        }
        Statement::Schema(s) => {
            execute_schema(backend, s)?;
            QueryResult::default()
        }
    };
    result.stats.execution_time_ms = started.elapsed().as_millis() as u64;
    Ok(result)
}

fn execute_schema<B: StorageBackend>(backend: &B, cmd: &SchemaCommand) -> Result<()> {
    match cmd {
        SchemaCommand::CreateIndex { label, property } => backend.create_index(label, property, IndexType::BTree),
        SchemaCommand::DropIndex { label, property } => backend.drop_index(label, property),
        SchemaCommand::CreateConstraint { label, property, constraint_type } => {
            backend.create_constraint(label, property, *constraint_type)
        }
        SchemaCommand::DropConstraint { label, property } => backend.drop_constraint(label, property),
    }
}

/// One output row plus the scope ORDER BY evaluates in.
struct Projected {
    values: Vec<Value>,
    scope: Binding,
}

fn execute_query<B: StorageBackend>(ctx: &EvalContext<'_, B>, tx: &B::Tx, q: &Query) -> Result<QueryResult> {
    let mut rows = vec![Binding::new()];
    for clause in &q.matches {
        rows = matcher::apply_match(ctx, tx, clause, rows)?;
    }

    let items = &q.return_clause.items;
    let columns: Vec<String> = items.iter().map(|i| i.alias.clone()).collect();
    let aggregating = items.iter().any(|i| i.expr.contains_aggregate());

    let mut projected = Vec::new();
    if aggregating {
        for group in group_rows(ctx, tx, items, rows)? {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(aggregate::eval_grouped(ctx, tx, &group, &item.expr)?);
            }
            let scope = columns.iter().cloned().zip(values.iter().cloned()).collect();
            projected.push(Projected { values, scope });
        }
    } else {
        for row in rows {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(ctx, tx, &row, &item.expr)?);
            }
            let mut scope = row;
            for (c, v) in columns.iter().zip(&values) {
                scope.insert(c.clone(), v.clone());
            }
            projected.push(Projected { values, scope });
        }
    }

    if q.return_clause.distinct {
        let mut unique: Vec<Projected> = Vec::with_capacity(projected.len());
        for p in projected {
            if !unique.iter().any(|u| same_values(&u.values, &p.values)) {
                unique.push(p);
            }
        }
        projected = unique;
    }

    if !q.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(projected.len());
        for p in projected {
            let mut keys = Vec::with_capacity(q.order_by.len());
            for o in &q.order_by {
                keys.push(eval(ctx, tx, &p.scope, &o.expr)?);
            }
            keyed.push((keys, p));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), o) in a.iter().zip(b).zip(&q.order_by) {
                let ord = x.sort_cmp(y);
                let ord = if o.ascending { ord } else { ord.reverse() };
                if ord.is_ne() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        projected = keyed.into_iter().map(|(_, p)| p).collect();
    }

    let empty = Binding::new();
    let skip = match &q.skip {
        Some(e) => count_arg(eval(ctx, tx, &empty, e)?, "SKIP")?,
        None => 0,
    };
    let limit = match &q.limit {
        Some(e) => Some(count_arg(eval(ctx, tx, &empty, e)?, "LIMIT")?),
        None => None,
    };

    let rows = projected
        .into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .map(|p| ResultRow { values: columns.iter().cloned().zip(p.values).collect() })
        .collect();

    Ok(QueryResult { columns, rows, stats: ExecutionStats::default() })
}

/// Group rows by the non-aggregate RETURN items, keeping first-seen order.
fn group_rows<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    items: &[ReturnItem],
    rows: Vec<Binding>,
) -> Result<Vec<Vec<Binding>>> {
    let key_exprs: Vec<&Expr> = items
        .iter()
        .filter(|i| !i.expr.contains_aggregate())
        .map(|i| &i.expr)
        .collect();
    if key_exprs.is_empty() {
        // One group, even when empty: count() over nothing is 0.
        return Ok(vec![rows]);
    }

    let mut keys: Vec<Vec<Value>> = Vec::new();
    let mut groups: Vec<Vec<Binding>> = Vec::new();
    for row in rows {
        let key = key_exprs
            .iter()
            .map(|e| eval(ctx, tx, &row, e))
            .collect::<Result<Vec<_>>>()?;
        match keys.iter().position(|k| same_values(k, &key)) {
            Some(i) => groups[i].push(row),
            None => {
                keys.push(key);
                groups.push(vec![row]);
            }
        }
    }
    Ok(groups)
}

/// Grouping equality: nulls group together.
fn same_values(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.sort_cmp(y).is_eq())
}

fn count_arg(v: Value, clause: &str) -> Result<usize> {
    match v.as_int() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(Error::ExecutionError(format!("{clause} expects a non-negative integer, got {v}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tx::TxMode;
    use pretty_assertions::assert_eq;

    fn run(db: &MemoryBackend, stmt: &Statement, params: &PropertyMap) -> QueryResult {
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let result = execute(db, &mut tx, stmt, params).unwrap();
        db.commit_tx(tx).unwrap();
        result
    }

    fn load_words(db: &MemoryBackend) {
        let rows = Value::List(vec![
            Value::Map(props([("label", Value::from("cat")), ("dur", Value::from(0.4))])),
            Value::Map(props([("label", Value::from("dog")), ("dur", Value::from(0.2))])),
            Value::Map(props([("label", Value::from("cat")), ("dur", Value::from(0.6))])),
        ]);
        let write = Statement::Write(WriteQuery {
            unwind: Some(Unwind { expr: Expr::param("rows"), alias: "row".into() }),
            clauses: vec![WriteClause::Create(CreateClause {
                patterns: vec![Pattern::node(
                    NodePattern::new("w")
                        .label("word")
                        .property("label", Expr::prop("row", "label"))
                        .property("dur", Expr::prop("row", "dur")),
                )],
            })],
        });
        let stats = run(db, &write, &props([("rows", rows)])).stats;
        assert_eq!(stats.nodes_created, 3);
    }

    #[test]
    fn test_group_and_order() {
        let db = MemoryBackend::new();
        load_words(&db);
        let q = Statement::Query(Query {
            matches: vec![MatchClause::new(vec![Pattern::node(NodePattern::new("w").label("word"))])],
            return_clause: ReturnClause {
                distinct: false,
                items: vec![
                    ReturnItem { expr: Expr::prop("w", "label"), alias: "label".into() },
                    ReturnItem { expr: Expr::call("count", vec![Expr::Star]), alias: "n".into() },
                    ReturnItem { expr: Expr::call("avg", vec![Expr::prop("w", "dur")]), alias: "mean".into() },
                ],
            },
            order_by: vec![OrderExpr { expr: Expr::var("n"), ascending: false }],
            skip: None,
            limit: None,
        });
        let result = run(&db, &q, &PropertyMap::new());
        assert_eq!(result.columns, vec!["label", "n", "mean"]);
        assert_eq!(result.rows[0].get::<String>("label").unwrap(), "cat");
        assert_eq!(result.rows[0].get::<i64>("n").unwrap(), 2);
        assert!((result.rows[0].get::<f64>("mean").unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(result.rows[1].get::<i64>("n").unwrap(), 1);
    }

    #[test]
    fn test_count_over_no_rows_is_zero() {
        let db = MemoryBackend::new();
        let q = Statement::Query(Query {
            matches: vec![MatchClause::new(vec![Pattern::node(NodePattern::new("w").label("word"))])],
            return_clause: ReturnClause {
                distinct: false,
                items: vec![ReturnItem { expr: Expr::call("count", vec![Expr::var("w")]), alias: "n".into() }],
            },
            order_by: vec![],
            skip: None,
            limit: None,
        });
        let result = run(&db, &q, &PropertyMap::new());
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get::<i64>("n").unwrap(), 0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let db = MemoryBackend::new();
        let merge = Statement::Write(WriteQuery {
            unwind: Some(Unwind { expr: Expr::param("rows"), alias: "row".into() }),
            clauses: vec![WriteClause::Merge(MergeClause {
                pattern: Pattern::node(NodePattern::new("t").label("word_type").property("id", Expr::prop("row", "id"))),
                on_create: vec![SetItem::Property {
                    variable: "t".into(),
                    key: "label".into(),
                    value: Expr::prop("row", "label"),
                }],
                on_match: vec![],
            })],
        });
        let rows = Value::List(vec![
            Value::Map(props([("id", "a"), ("label", "cat")])),
            Value::Map(props([("id", "a"), ("label", "cat")])),
        ]);
        let params = props([("rows", rows)]);
        assert_eq!(run(&db, &merge, &params).stats.nodes_created, 1);
        assert_eq!(run(&db, &merge, &params).stats.nodes_created, 0);

        let tx = db.begin_tx(TxMode::ReadOnly).unwrap();
        let types = db.nodes_by_label(&tx, "word_type").unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].get("label"), Some(&Value::from("cat")));
    }

    #[test]
    fn test_skip_and_limit() {
        let db = MemoryBackend::new();
        load_words(&db);
        let q = Statement::Query(Query {
            matches: vec![MatchClause::new(vec![Pattern::node(NodePattern::new("w").label("word"))])],
            return_clause: ReturnClause {
                distinct: true,
                items: vec![ReturnItem { expr: Expr::prop("w", "label"), alias: "label".into() }],
            },
            order_by: vec![OrderExpr { expr: Expr::var("label"), ascending: true }],
            skip: Some(Expr::int(1)),
            limit: Some(Expr::int(5)),
        });
        let result = run(&db, &q, &PropertyMap::new());
        let labels: Vec<String> = result.rows.iter().map(|r| r.get("label").unwrap()).collect();
        assert_eq!(labels, vec!["dog"]);
    }
}
