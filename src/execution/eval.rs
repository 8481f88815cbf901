//! Expression evaluation with Cypher's three-valued logic.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::StorageBackend;
use crate::{Error, Result};
use super::matcher;

/// Variable bindings for one row in flight.
pub(crate) type Binding = HashMap<String, Value>;

/// Shared state for evaluating one statement.
pub(crate) struct EvalContext<'a, B: StorageBackend> {
    pub backend: &'a B,
    pub params: &'a PropertyMap,
    /// Comprehension results come back sorted by projection.
    pub sort_comprehensions: bool,
    regexes: RefCell<HashMap<String, Regex>>,
}

impl<'a, B: StorageBackend> EvalContext<'a, B> {
    pub fn new(backend: &'a B, params: &'a PropertyMap) -> Self {
        Self {
            backend,
            params,
            sort_comprehensions: backend.capabilities().ordered_collections,
            regexes: RefCell::new(HashMap::new()),
        }
    }

    /// `=~` matches the whole string.
    fn regex_is_match(&self, pattern: &str, text: &str) -> Result<bool> {
        let mut cache = self.regexes.borrow_mut();
        if !cache.contains_key(pattern) {
            let re = Regex::new(&format!("^(?:{pattern})$"))
                .map_err(|e| Error::ExecutionError(format!("invalid regex '{pattern}': {e}")))?;
            cache.insert(pattern.to_owned(), re);
        }
        Ok(cache.get(pattern).is_some_and(|re| re.is_match(text)))
    }
}

/// Evaluate a predicate; only `true` passes.
pub(crate) fn is_true<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    binding: &Binding,
    expr: &Expr,
) -> Result<bool> {
    Ok(eval(ctx, tx, binding, expr)?.is_truthy())
}

pub(crate) fn eval<B: StorageBackend>(
    ctx: &EvalContext<'_, B>,
    tx: &B::Tx,
    binding: &Binding,
    expr: &Expr,
) -> Result<Value> {
    match expr {
        Expr::Literal(l) => Ok(literal(l)),
        Expr::Variable(name) => binding
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ExecutionError(format!("variable `{name}` not defined"))),
        Expr::Property { expr, key } => property(eval(ctx, tx, binding, expr)?, key),
        Expr::Parameter(name) => ctx
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ExecutionError(format!("missing parameter ${name}"))),
        Expr::FunctionCall { name, args, .. } => {
            if is_aggregate_function(name) {
                return Err(Error::ExecutionError(format!(
                    "aggregate {name}() is only allowed in RETURN"
                )));
            }
            let args = args
                .iter()
                .map(|a| eval(ctx, tx, binding, a))
                .collect::<Result<Vec<_>>>()?;
            scalar_function(name, args)
        }
        Expr::BinaryOp { left, op, right } => {
            let l = eval(ctx, tx, binding, left)?;
            // Short-circuit where the left side decides.
            match (op, &l) {
                (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let r = eval(ctx, tx, binding, right)?;
            binary(ctx, *op, l, r)
        }
        Expr::UnaryOp { op, expr } => match (op, eval(ctx, tx, binding, expr)?) {
            (_, Value::Null) => Ok(Value::Null),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Negate, Value::Int(i)) => Ok(Value::Int(-i)),
            (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Not, v) => Err(type_error("BOOLEAN", &v)),
            (UnaryOp::Negate, v) => Err(type_error("NUMBER", &v)),
        },
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|e| eval(ctx, tx, binding, e))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expr::MapLiteral(items) => {
            let mut map = HashMap::with_capacity(items.len());
            for (k, e) in items {
                map.insert(k.clone(), eval(ctx, tx, binding, e)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Exists(pattern) => Ok(Value::Bool(
            !matcher::match_pattern(ctx, tx, pattern, binding)?.is_empty(),
        )),
        Expr::PatternComprehension { pattern, where_clause, projection } => {
            let mut out = Vec::new();
            for row in matcher::match_pattern(ctx, tx, pattern, binding)? {
                if let Some(w) = where_clause {
                    if !is_true(ctx, tx, &row, w)? {
                        continue;
                    }
                }
                out.push(eval(ctx, tx, &row, projection)?);
            }
            if ctx.sort_comprehensions {
                out.sort_by(|a, b| a.sort_cmp(b));
            }
            Ok(Value::List(out))
        }
        Expr::Quantifier { kind, variable, list, predicate } => {
            let items = match eval(ctx, tx, binding, list)? {
                Value::Null => return Ok(Value::Null),
                Value::List(items) => items,
                other => return Err(type_error("LIST", &other)),
            };
            let mut scope = binding.clone();
            let mut hits = 0usize;
            for item in &items {
                scope.insert(variable.clone(), item.clone());
                if is_true(ctx, tx, &scope, predicate)? {
                    hits += 1;
                }
            }
            Ok(Value::Bool(match kind {
                QuantifierKind::Any => hits > 0,
                QuantifierKind::All => hits == items.len(),
                QuantifierKind::None => hits == 0,
            }))
        }
        Expr::In { expr, list } => {
            let needle = eval(ctx, tx, binding, expr)?;
            match eval(ctx, tx, binding, list)? {
                Value::Null => Ok(Value::Null),
                Value::List(items) => Ok(in_list(&needle, &items)),
                other => Err(type_error("LIST", &other)),
            }
        }
        Expr::IsNull { expr, negated } => {
            let null = eval(ctx, tx, binding, expr)?.is_null();
            Ok(Value::Bool(null != *negated))
        }
        Expr::HasLabel { expr, label } => match eval(ctx, tx, binding, expr)? {
            Value::Null => Ok(Value::Null),
            Value::Node(n) => Ok(Value::Bool(n.has_label(label))),
            other => Err(type_error("NODE", &other)),
        },
        Expr::StringOp { left, op, right } => {
            match (eval(ctx, tx, binding, left)?, eval(ctx, tx, binding, right)?) {
                (Value::String(l), Value::String(r)) => Ok(Value::Bool(match op {
                    StringOp::StartsWith => l.starts_with(&r),
                    StringOp::EndsWith => l.ends_with(&r),
                    StringOp::Contains => l.contains(&r),
                })),
                _ => Ok(Value::Null),
            }
        }
        Expr::Star => Err(Error::ExecutionError("`*` is only valid inside count()".into())),
    }
}

pub(crate) fn literal(l: &Literal) -> Value {
    match l {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn property(base: Value, key: &str) -> Result<Value> {
    match base {
        Value::Null => Ok(Value::Null),
        Value::Node(n) => Ok(n.property(key)),
        Value::Relationship(r) => Ok(r.properties.get(key).cloned().unwrap_or(Value::Null)),
        Value::Map(mut m) => Ok(m.remove(key).unwrap_or(Value::Null)),
        other => Err(type_error("NODE or MAP", &other)),
    }
}

fn in_list(needle: &Value, items: &[Value]) -> Value {
    if needle.is_null() {
        return Value::Null;
    }
    let mut unknown = false;
    for item in items {
        match needle.cypher_eq(item) {
            Some(true) => return Value::Bool(true),
            Some(false) => {}
            None => unknown = true,
        }
    }
    if unknown { Value::Null } else { Value::Bool(false) }
}

fn type_error(expected: &str, got: &Value) -> Error {
    Error::TypeError { expected: expected.into(), got: got.type_name().into() }
}

fn bool_or_null(v: Option<bool>) -> Value {
    v.map(Value::Bool).unwrap_or(Value::Null)
}

fn binary<B: StorageBackend>(ctx: &EvalContext<'_, B>, op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    use BinaryOp::*;
    match op {
        And | Or | Xor => {
            let (a, b) = (l.as_bool(), r.as_bool());
            if (!l.is_null() && a.is_none()) || (!r.is_null() && b.is_none()) {
                return Err(Error::TypeError { expected: "BOOLEAN".into(), got: format!("{} {}", l.type_name(), r.type_name()) });
            }
            Ok(match op {
                And => match (a, b) {
                    (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                },
                Or => match (a, b) {
                    (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                },
                _ => match (a, b) {
                    (Some(x), Some(y)) => Value::Bool(x ^ y),
                    _ => Value::Null,
                },
            })
        }
        Eq => Ok(bool_or_null(l.cypher_eq(&r))),
        Neq => Ok(bool_or_null(l.cypher_eq(&r).map(|b| !b))),
        Lt | Lte | Gt | Gte => Ok(bool_or_null(l.cypher_cmp(&r).map(|o| match op {
            Lt => o == Ordering::Less,
            Lte => o != Ordering::Greater,
            Gt => o == Ordering::Greater,
            _ => o != Ordering::Less,
        }))),
        RegexMatch => match (&l, &r) {
            (Value::String(text), Value::String(pattern)) => Ok(Value::Bool(ctx.regex_is_match(pattern, text)?)),
            _ => Ok(Value::Null),
        },
        Add | Sub | Mul | Div => arithmetic(op, l, r),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match (op, l, r) {
        (_, Value::Null, _) | (_, _, Value::Null) => Ok(Value::Null),
        (BinaryOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (BinaryOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (op, Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => Ok(Value::Int(a.wrapping_add(b))),
            BinaryOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
            BinaryOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
            _ if b == 0 => Err(Error::ExecutionError("division by zero".into())),
            _ => Ok(Value::Int(a / b)),
        },
        (op, a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                _ => x / y,
            })),
            _ => Err(Error::TypeError {
                expected: "NUMBER".into(),
                got: format!("{} and {}", a.type_name(), b.type_name()),
            }),
        },
    }
}

/// Non-aggregate functions.
fn scalar_function(name: &str, mut args: Vec<Value>) -> Result<Value> {
    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::ExecutionError(format!("{name}() takes {n} argument(s), got {}", args.len())))
        }
    };
    match name {
        "coalesce" => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
        "size" => {
            arity(1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::List(l) => Ok(Value::Int(l.len() as i64)),
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(type_error("LIST or STRING", other)),
            }
        }
        "head" | "last" => {
            arity(1)?;
            match args.swap_remove(0) {
                Value::List(l) => {
                    let picked = if name == "head" { l.into_iter().next() } else { l.into_iter().last() };
                    Ok(picked.unwrap_or(Value::Null))
                }
                Value::Null => Ok(Value::Null),
                other => Err(type_error("LIST", &other)),
            }
        }
        "toLower" | "toUpper" => {
            arity(1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::String(if name == "toLower" { s.to_lowercase() } else { s.to_uppercase() })),
                Value::Null => Ok(Value::Null),
                other => Err(type_error("STRING", other)),
            }
        }
        "toString" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            })
        }
        "toInteger" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Int(i) => Value::Int(*i),
                Value::Float(f) => Value::Int(f.trunc() as i64),
                Value::String(s) => s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null),
                Value::Bool(b) => Value::Int(*b as i64),
                _ => Value::Null,
            })
        }
        "toFloat" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Int(i) => Value::Float(*i as f64),
                Value::Float(f) => Value::Float(*f),
                Value::String(s) => s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        "toBoolean" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Bool(b) => Value::Bool(*b),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
                Value::Int(i) => Value::Bool(*i != 0),
                _ => Value::Null,
            })
        }
        "abs" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Int(i) => Value::Int(i.abs()),
                Value::Float(f) => Value::Float(f.abs()),
                _ => Value::Null,
            })
        }
        "round" => {
            arity(1)?;
            Ok(args[0].as_float().map(|f| Value::Float(f.round())).unwrap_or(Value::Null))
        }
        "id" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Node(n) => Value::Int(n.id.0 as i64),
                Value::Relationship(r) => Value::Int(r.id.0 as i64),
                _ => Value::Null,
            })
        }
        "labels" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Node(n) => Value::List(n.labels.iter().map(Value::from).collect()),
                _ => Value::Null,
            })
        }
        "type" => {
            arity(1)?;
            Ok(match &args[0] {
                Value::Relationship(r) => Value::String(r.rel_type.clone()),
                _ => Value::Null,
            })
        }
        "keys" => {
            arity(1)?;
            let mut keys: Vec<String> = match &args[0] {
                Value::Node(n) => n.properties.keys().cloned().collect(),
                Value::Map(m) => m.keys().cloned().collect(),
                _ => return Ok(Value::Null),
            };
            keys.sort();
            Ok(Value::from(keys))
        }
        _ => Err(Error::ExecutionError(format!("unknown function {name}()"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tx::TxMode;
    use crate::StorageBackend;

    fn eval_str(expr: &Expr, params: &PropertyMap) -> Value {
        let db = MemoryBackend::new();
        let tx = db.begin_tx(TxMode::ReadOnly).unwrap();
        let ctx = EvalContext::new(&db, params);
        eval(&ctx, &tx, &Binding::new(), expr).unwrap()
    }

    #[test]
    fn test_null_propagates_through_comparison() {
        let e = Expr::binary(Expr::Literal(Literal::Null), BinaryOp::Eq, Expr::int(1));
        assert_eq!(eval_str(&e, &PropertyMap::new()), Value::Null);
    }

    #[test]
    fn test_and_with_false_wins_over_null() {
        let e = Expr::binary(
            Expr::Literal(Literal::Null),
            BinaryOp::And,
            Expr::Literal(Literal::Bool(false)),
        );
        assert_eq!(eval_str(&e, &PropertyMap::new()), Value::Bool(false));
    }

    #[test]
    fn test_regex_matches_whole_string() {
        let mut params = PropertyMap::new();
        params.insert("re".into(), Value::from("s|z"));
        let hit = Expr::binary(Expr::Literal(Literal::String("z".into())), BinaryOp::RegexMatch, Expr::param("re"));
        let miss = Expr::binary(Expr::Literal(Literal::String("sh".into())), BinaryOp::RegexMatch, Expr::param("re"));
        assert_eq!(eval_str(&hit, &params), Value::Bool(true));
        assert_eq!(eval_str(&miss, &params), Value::Bool(false));
    }

    #[test]
    fn test_in_list() {
        let mut params = PropertyMap::new();
        params.insert("set".into(), Value::from(vec!["s", "z"]));
        let e = Expr::in_list(Expr::Literal(Literal::String("z".into())), Expr::param("set"));
        assert_eq!(eval_str(&e, &params), Value::Bool(true));
    }

    #[test]
    fn test_missing_parameter_is_an_error() {
        let db = MemoryBackend::new();
        let tx = db.begin_tx(TxMode::ReadOnly).unwrap();
        let params = PropertyMap::new();
        let ctx = EvalContext::new(&db, &params);
        assert!(eval(&ctx, &tx, &Binding::new(), &Expr::param("p0")).is_err());
    }
}
