//! Result hydration: native rows → [`Row`]s keyed by declared column names.

use std::sync::Arc;

use super::compile::ColumnInfo;
use crate::execution::{FromValue, QueryResult};
use crate::model::Value;
use crate::schema::ValueType;
use crate::{Error, Result};

/// One hydrated result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        let i = self.columns.iter().position(|c| c == column)?;
        self.values.get(i)
    }

    /// Typed access; multi-valued columns come back as `Vec<T>`.
    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T> {
        let value = self.get(column).ok_or_else(|| Error::NotFound(format!("column '{column}'")))?;
        T::from_value(value)
    }

    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        let columns = self.columns;
        self.values
            .into_iter()
            .enumerate()
            .map(move |(i, v)| (columns[i].clone(), v))
    }
}

/// Map `result` onto `columns`.
///
/// Multi-valued columns arrive as `[order_key, value]` pairs. They are
/// sorted by key unless the backend already returns comprehensions in
/// order, then reduced to the bare values.
pub fn hydrate(result: QueryResult, columns: &[ColumnInfo], ordered: bool) -> Result<Vec<Row>> {
    let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
    let mut rows = Vec::with_capacity(result.rows.len());
    for mut raw in result.rows {
        let mut values = Vec::with_capacity(columns.len());
        for info in columns {
            let value = raw.values.remove(&info.name).ok_or_else(|| {
                Error::ExecutionError(format!("result row is missing column '{}'", info.name))
            })?;
            let value = if info.multi { multi_value(&info.name, value, ordered)? } else { value };
            values.push(widen(value, info.value_type));
        }
        rows.push(Row { columns: Arc::clone(&names), values });
    }
    Ok(rows)
}

fn multi_value(column: &str, value: Value, ordered: bool) -> Result<Value> {
    let items = match value {
        Value::Null => return Ok(Value::List(Vec::new())),
        Value::List(items) => items,
        other => {
            return Err(Error::TypeError {
                expected: format!("LIST for column '{column}'"),
                got: other.type_name().into(),
            });
        }
    };
    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::List(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or(Value::Null);
                let key = pair.pop().unwrap_or(Value::Null);
                pairs.push((key, value));
            }
            other => {
                return Err(Error::TypeError {
                    expected: format!("[key, value] pair in column '{column}'"),
                    got: other.type_name().into(),
                });
            }
        }
    }
    if !ordered {
        pairs.sort_by(|a, b| a.0.sort_cmp(&b.0));
    }
    Ok(Value::List(pairs.into_iter().map(|(_, v)| v).collect()))
}

/// Integers read from a float column come back as floats.
fn widen(value: Value, value_type: Option<ValueType>) -> Value {
    match (value, value_type) {
        (Value::Int(i), Some(ValueType::Float)) => Value::Float(i as f64),
        (Value::List(items), Some(ValueType::Float)) => {
            Value::List(items.into_iter().map(|v| widen(v, Some(ValueType::Float))).collect())
        }
        (v, _) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ResultRow;
    use pretty_assertions::assert_eq;

    fn info(name: &str, multi: bool, value_type: ValueType) -> ColumnInfo {
        ColumnInfo { name: name.into(), multi, value_type: Some(value_type) }
    }

    fn result(rows: Vec<Vec<(&str, Value)>>) -> QueryResult {
        QueryResult {
            columns: Vec::new(),
            rows: rows
                .into_iter()
                .map(|r| ResultRow { values: r.into_iter().map(|(k, v)| (k.to_string(), v)).collect() })
                .collect(),
            stats: Default::default(),
        }
    }

    fn pair(key: f64, value: &str) -> Value {
        Value::List(vec![Value::Float(key), value.into()])
    }

    #[test]
    fn test_unordered_multi_values_are_sorted_by_key() {
        let raw = result(vec![vec![("phones", Value::List(vec![pair(0.3, "t"), pair(0.0, "k"), pair(0.1, "ae")]))]]);
        let rows = hydrate(raw, &[info("phones", true, ValueType::String)], false).unwrap();
        assert_eq!(rows[0].get_as::<Vec<String>>("phones").unwrap(), vec!["k", "ae", "t"]);
    }

    #[test]
    fn test_ordered_multi_values_keep_source_order() {
        let raw = result(vec![vec![("phones", Value::List(vec![pair(0.3, "t"), pair(0.0, "k")]))]]);
        let rows = hydrate(raw, &[info("phones", true, ValueType::String)], true).unwrap();
        assert_eq!(rows[0].get_as::<Vec<String>>("phones").unwrap(), vec!["t", "k"]);
    }

    #[test]
    fn test_float_columns_widen_and_columns_keep_declared_order() {
        let raw = result(vec![vec![("b", Value::Int(2)), ("a", "x".into())]]);
        let rows = hydrate(raw, &[info("a", false, ValueType::String), info("b", false, ValueType::Float)], true)
            .unwrap();
        assert_eq!(rows[0].columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(rows[0].get("b"), Some(&Value::Float(2.0)));
        assert!(matches!(rows[0].get_as::<f64>("missing"), Err(Error::NotFound(_))));
    }
}
