//! Property maps and the `props` builder for statement parameters.

use std::collections::HashMap;
use super::Value;

/// A map of property names to values.
pub type PropertyMap = HashMap<String, Value>;

/// Build a `PropertyMap` from borrowed pairs. Handy for statement parameters.
pub fn props<'a, I, V>(pairs: I) -> PropertyMap
where
    I: IntoIterator<Item = (&'a str, V)>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.to_owned(), v.into())).collect()
}
