// Dynamic input/output shapes: inputs and outputs are untyped ordered
// mappings of scalars, sequences, and nested mappings (spec.md §3, §9).
//
// A statically-typed target represents this as a tagged union; the
// `OrderedMap` preserves insertion order so the comparator's canonical-json
// path stays stable across processes (spec.md §4.5).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single dynamically-typed value flowing through a node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(OrderedMap),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&OrderedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    /// Kind name used in type_mismatch reports, stable across runs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Canonical string rendering used by the router hash (spec.md §4.5):
    /// key order is fixed (OrderedMap preserves insertion order, and the
    /// router always canonicalizes via `canonical_json`), numeric types
    /// render via their natural string form.
    pub fn canonical_json(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Value::String(s) => format!("{:?}", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::canonical_json).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Map(m) => m.canonical_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_json())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Ordered mapping of named inputs/outputs, keyed by string.
///
/// Backed by `BTreeMap` for deterministic iteration: callers supply keys in
/// whatever order they like, but once stored, iteration (and therefore the
/// canonical-json encoding) is in sorted key order, which is what keeps the
/// routing hash stable across processes (spec.md §4.5).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderedMap(BTreeMap<String, Value>);

impl OrderedMap {
    pub fn new() -> Self {
        OrderedMap(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn canonical_json(&self) -> String {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{:?}:{}", k, v.canonical_json()))
            .collect();
        format!("{{{}}}", parts.join(","))
    }
}

impl FromIterator<(String, Value)> for OrderedMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        OrderedMap(iter.into_iter().collect())
    }
}

impl IntoIterator for OrderedMap {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[macro_export]
macro_rules! omap {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut m = $crate::value::OrderedMap::new();
        $(m.insert($key, $value);)*
        m
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_stable_regardless_of_insertion_order() {
        let mut a = OrderedMap::new();
        a.insert("x", 1i64).insert("y", 2i64);

        let mut b = OrderedMap::new();
        b.insert("y", 2i64).insert("x", 1i64);

        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn float_whole_numbers_render_with_one_decimal() {
        let v = Value::Float(10.0);
        assert_eq!(v.canonical_json(), "10.0");
    }

    #[test]
    fn kind_name_distinguishes_int_and_float() {
        assert_eq!(Value::Int(1).kind_name(), "int");
        assert_eq!(Value::Float(1.0).kind_name(), "float");
    }
}
