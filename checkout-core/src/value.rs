//! Values read from control points and used as comparison targets

use std::fmt;

use serde::{Deserialize, Serialize};

/// A primitive (or list of primitives) read from a live source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed integer (also used for enum indices)
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    Str(String),
    /// Array-valued signal or tool result
    List(Vec<Value>),
}

impl Value {
    /// Numeric value for integers and floats only
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric value, with booleans coerced to 0/1
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        }
    }

    /// True for integers and floats
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }

    /// The value rendered as a string, as used by `treat_as_string`
    pub fn to_string_value(&self) -> Value {
        match self {
            Self::Str(_) => self.clone(),
            other => Self::Str(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Bool(true).as_f64(), None);
        assert_eq!(Value::Bool(true).as_numeric(), Some(1.0));
        assert_eq!(Value::from("3").as_numeric(), None);
    }

    #[test]
    fn string_casting_matches_across_int_and_float() {
        assert_eq!(Value::Int(5).to_string_value(), Value::Float(5.0).to_string_value());
        assert_eq!(Value::List(vec![1.into(), "a".into()]).to_string(), "[1, a]");
    }

    #[test]
    fn untagged_json_prefers_integers() {
        let v: Value = serde_json::from_str("5").unwrap();
        assert_eq!(v, Value::Int(5));
        let v: Value = serde_json::from_str("5.5").unwrap();
        assert_eq!(v, Value::Float(5.5));
    }
}
