//! Cache key derivation.
//!
//! A cache key identifies one endpoint path plus query-parameter
//! combination. Two semantically identical parameter sets must produce
//! byte-identical keys regardless of the order the caller listed them in,
//! so parameters are sorted by name before serialization.

use std::collections::BTreeMap;
use std::fmt;

/// A single query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{s}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Derive the cache key for an endpoint path and optional parameters.
///
/// Parameters with a `None` value are dropped entirely; the remainder are
/// sorted ascending by name and serialized as `key=value` pairs joined by
/// `&`, appended to the path after `?`. An empty parameter set yields the
/// bare path. When the same name appears twice the last value wins.
///
/// # Example
/// ```
/// use fetch_cache::derive_key;
///
/// let key = derive_key("/api/manuals", &[("page", Some(2.into())), ("q", None)]);
/// assert_eq!(key, "/api/manuals?page=2");
/// ```
pub fn derive_key(path: &str, params: &[(&str, Option<ParamValue>)]) -> String {
    let filtered: BTreeMap<&str, &ParamValue> = params
        .iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| (*name, v)))
        .collect();

    if filtered.is_empty() {
        return path.to_string();
    }

    let query: Vec<String> = filtered
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();

    format!("{}?{}", path, query.join("&"))
}
