//! Aggregate functions over grouped rows.

use std::cmp::Ordering;

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::StorageBackend;
use crate::{Error, Result};
use super::eval::{eval, Binding, EvalContext};

/// Evaluate a RETURN expression over one group.
///
/// Aggregate calls consume the whole group; anything outside them is
/// evaluated against the group's first row (the grouping keys agree there).
pub(crate) fn eval_grouped<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    rows: &[Binding],
    expr: &Expr,
) -> Result<Value> {
    match expr {
        Expr::FunctionCall { name, args, distinct } if is_aggregate_function(name) => {
            aggregate(ctx, tx, rows, name, args, *distinct)
        }
        Expr::BinaryOp { left, op, right } if expr.contains_aggregate() => {
            let l = literal_of(eval_grouped(ctx, tx, rows, left)?);
            let r = literal_of(eval_grouped(ctx, tx, rows, right)?);
            let empty = Binding::new();
            eval(ctx, tx, &empty, &Expr::BinaryOp { left: Box::new(l), op: *op, right: Box::new(r) })
        }
        Expr::FunctionCall { name, args, distinct } if expr.contains_aggregate() => {
            let args = args
                .iter()
                .map(|a| eval_grouped(ctx, tx, rows, a).map(literal_of))
                .collect::<Result<Vec<_>>>()?;
            let empty = Binding::new();
            eval(ctx, tx, &empty, &Expr::FunctionCall { name: name.clone(), args, distinct: *distinct })
        }
        _ => match rows.first() {
            Some(first) => eval(ctx, tx, first, expr),
            None => Ok(Value::Null),
        },
    }
}

/// Re-inject an already computed value as an expression.
fn literal_of(v: Value) -> Expr {
    match v {
        Value::Null => Expr::Literal(Literal::Null),
        Value::Bool(b) => Expr::Literal(Literal::Bool(b)),
        Value::Int(i) => Expr::Literal(Literal::Int(i)),
        Value::Float(f) => Expr::Literal(Literal::Float(f)),
        Value::String(s) => Expr::Literal(Literal::String(s)),
        Value::List(items) => Expr::List(items.into_iter().map(literal_of).collect()),
        // Graph values never appear under arithmetic over aggregates.
        _ => Expr::Literal(Literal::Null),
    }
}

fn aggregate<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    rows: &[Binding],
    name: &str,
    args: &[Expr],
    distinct: bool,
) -> Result<Value> {
    if name == "count" && matches!(args.first(), Some(Expr::Star)) {
        return Ok(Value::Int(rows.len() as i64));
    }
    let Some(arg) = args.first() else {
        return Err(Error::ExecutionError(format!("{name}() needs an argument")));
    };

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let v = eval(ctx, tx, row, arg)?;
        if !v.is_null() {
            values.push(v);
        }
    }
    if distinct {
        let mut unique: Vec<Value> = Vec::with_capacity(values.len());
        for v in values {
            if !unique.iter().any(|u| u.cypher_eq(&v) == Some(true)) {
                unique.push(v);
            }
        }
        values = unique;
    }

    match name {
        "count" => Ok(Value::Int(values.len() as i64)),
        "collect" => Ok(Value::List(values)),
        "min" => Ok(values.into_iter().min_by(|a, b| a.sort_cmp(b)).unwrap_or(Value::Null)),
        "max" => Ok(values.into_iter().max_by(|a, b| a.sort_cmp(b)).unwrap_or(Value::Null)),
        "sum" => {
            if values.iter().all(|v| matches!(v, Value::Int(_))) {
                Ok(Value::Int(values.iter().filter_map(Value::as_int).sum()))
            } else {
                Ok(Value::Float(numbers(name, &values)?.iter().sum()))
            }
        }
        "avg" => {
            let nums = numbers(name, &values)?;
            if nums.is_empty() {
                return Ok(Value::Null);
            }
            Ok(Value::Float(nums.iter().sum::<f64>() / nums.len() as f64))
        }
        "stDev" => {
            let nums = numbers(name, &values)?;
            if nums.len() < 2 {
                return Ok(Value::Float(0.0));
            }
            let mean = nums.iter().sum::<f64>() / nums.len() as f64;
            let var = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (nums.len() - 1) as f64;
            Ok(Value::Float(var.sqrt()))
        }
        "percentileCont" | "percentileDisc" => {
            let q = match args.get(1) {
                Some(e) => {
                    let empty = Binding::new();
                    let first = rows.first().unwrap_or(&empty);
                    eval(ctx, tx, first, e)?.as_float()
                }
                None => None,
            }
            .ok_or_else(|| Error::ExecutionError(format!("{name}() needs a percentile argument")))?;
            if !(0.0..=1.0).contains(&q) {
                return Err(Error::ExecutionError(format!("{name}() percentile must be in [0, 1], got {q}")));
            }
            let mut nums = numbers(name, &values)?;
            if nums.is_empty() {
                return Ok(Value::Null);
            }
            nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            Ok(Value::Float(if name == "percentileCont" {
                percentile_cont(&nums, q)
            } else {
                let idx = ((q * nums.len() as f64).ceil() as usize).saturating_sub(1);
                nums[idx.min(nums.len() - 1)]
            }))
        }
        _ => Err(Error::ExecutionError(format!("unknown aggregate {name}()"))),
    }
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
pub(crate) fn percentile_cont(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn numbers(name: &str, values: &[Value]) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_float().ok_or_else(|| Error::TypeError {
                expected: format!("NUMBER in {name}()"),
                got: v.type_name().into(),
            })
        })
        .collect()
}
