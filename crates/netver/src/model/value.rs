//! Tagged attribute values.
//!
//! Node and link attributes are schema-less bags. They are kept as an
//! explicit tagged value tree instead of an opaque JSON blob so tolerance
//! rules in the diff engine have a well-defined meaning per variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Open attribute bag of a node or link version.
pub type Attributes = BTreeMap<String, Value>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// Missing value.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// IEEE 754 double. Non-finite values serialize to JSON `null`.
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Lenient numeric coercion.
    ///
    /// Missing values and blank text coerce to NaN; numbers, booleans and
    /// numeric text coerce to their value. Anything else is not numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Null => Some(f64::NAN),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(f64::NAN)
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
            Value::List(_) | Value::Map(_) => None,
        }
    }

    /// Renders this value as an external key (`n`, `a`, `b` columns).
    ///
    /// Integral floats render without a fractional part so `1001.0` and
    /// `1001` address the same node.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.is_finite() => {
                if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
                    Some(format!("{}", *f as i64))
                } else {
                    Some(f.to_string())
                }
            }
            Value::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            _ => None,
        }
    }

    /// Converts to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.clone())
    }

    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
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

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Lower-cases attribute keys. When two keys collide after folding, the
/// first one in key order wins.
pub fn normalize_keys(attributes: Attributes) -> Attributes {
    let mut out = Attributes::new();
    for (key, value) in attributes {
        out.entry(key.to_lowercase()).or_insert(value);
    }
    out
}

/// Drops null entries, the form in which edited properties are shipped.
pub fn non_null(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(_, v)| !v.is_null() && !matches!(v, Value::Float(f) if f.is_nan()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
