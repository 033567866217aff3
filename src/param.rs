//! Parameter value storage types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single parameter value.
///
/// Numeric parameters use `Float` or `Int`, choice parameters store the
/// chosen label in `Choice`, and boolean parameters use `Bool`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Float(f64),
    /// A categorical value.
    Choice(String),
}

impl ParamValue {
    /// Return the value as `f64` for numeric variants.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Bool(_) | ParamValue::Choice(_) => None,
        }
    }

    /// Return the value as `i64` for the `Int` variant.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the value as `bool` for the `Bool` variant.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the label for the `Choice` variant.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Choice(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Choice(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Choice(v)
    }
}

/// A parameterization: parameter name to value.
///
/// Ordered so that equality, hashing of the serialized form, and display
/// are deterministic.
pub type Parameters = BTreeMap<String, ParamValue>;

/// Build a [`Parameters`] map from `(name, value)` pairs.
///
/// # Examples
///
/// ```
/// use stagewise::{ParamValue, params};
///
/// let p = params([("x", 0.5.into()), ("layers", ParamValue::Int(3))]);
/// assert_eq!(p["x"], ParamValue::Float(0.5));
/// ```
pub fn params<K: Into<String>>(pairs: impl IntoIterator<Item = (K, ParamValue)>) -> Parameters {
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
