//! Equality with absolute/relative tolerance

use serde::{Deserialize, Serialize};

use crate::dynamic::DynamicValue;
use crate::errors::{EvaluationError, EvaluationResult};
use crate::value::Value;

/// Target and tolerances for `Equals` / `NotEquals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equality {
    /// Static target
    pub value: Value,
    /// Absolute tolerance
    #[serde(default)]
    pub atol: f64,
    /// Relative tolerance, scaled by the target magnitude
    #[serde(default)]
    pub rtol: f64,
    /// Target read from a live source instead of `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_dynamic: Option<DynamicValue>,
}

impl Equality {
    /// Exact target
    pub fn new(value: impl Into<Value>) -> Self {
        Self { value: value.into(), atol: 0.0, rtol: 0.0, value_dynamic: None }
    }

    /// Set tolerances
    pub fn with_tolerance(mut self, atol: f64, rtol: f64) -> Self {
        self.atol = atol;
        self.rtol = rtol;
        self
    }

    /// `|observed - target| <= atol + rtol * |target|`
    pub fn within(&self, observed: f64, target: f64) -> bool {
        (observed - target).abs() <= self.atol + self.rtol * target.abs()
    }

    /// Equality predicate for one observed/target pair
    pub fn matches(&self, observed: &Value, target: &Value, as_string: bool) -> EvaluationResult<bool> {
        if as_string {
            return Ok(observed.to_string() == target.to_string());
        }
        match (observed, target) {
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (o, t) in a.iter().zip(b) {
                    if !self.matches(o, t, false)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => match (observed.as_numeric(), target.as_numeric()) {
                (Some(o), Some(t)) => Ok(self.within(o, t)),
                _ => Err(EvaluationError::TypeMismatch {
                    observed: observed.type_name(),
                    target: target.type_name(),
                }),
            },
        }
    }

    /// Tolerance suffix for descriptions
    pub(crate) fn tolerance_text(&self) -> String {
        match (self.atol > 0.0, self.rtol > 0.0) {
            (false, false) => String::new(),
            (true, false) => format!(" ± {}", self.atol),
            _ => format!(" (atol={}, rtol={})", self.atol, self.rtol),
        }
    }
}
