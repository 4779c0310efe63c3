//! Ordering and range predicates over numeric observations

use serde::{Deserialize, Serialize};

use crate::dynamic::DynamicValue;
use crate::errors::{EvaluationError, EvaluationResult};
use crate::value::Value;

/// Which side of the target passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// `observed > target`
    Greater,
    /// `observed >= target`
    GreaterOrEqual,
    /// `observed < target`
    Less,
    /// `observed <= target`
    LessOrEqual,
}

impl Bound {
    /// Operator symbol
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
        }
    }

    fn holds(self, observed: f64, target: f64) -> bool {
        match self {
            Self::Greater => observed > target,
            Self::GreaterOrEqual => observed >= target,
            Self::Less => observed < target,
            Self::LessOrEqual => observed <= target,
        }
    }
}

/// Target for the ordering comparisons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Static target
    pub value: Value,
    /// Target read from a live source instead of `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_dynamic: Option<DynamicValue>,
}

impl Threshold {
    /// Static threshold
    pub fn new(value: impl Into<Value>) -> Self {
        Self { value: value.into(), value_dynamic: None }
    }

    /// Ordering predicate
    pub fn holds(&self, bound: Bound, observed: &Value, target: &Value) -> EvaluationResult<bool> {
        let observed = scalar(observed, bound.symbol())?;
        let target = scalar(target, bound.symbol())?;
        Ok(bound.holds(observed, target))
    }
}

/// Inclusive-or-exclusive interval with an optional warning band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    /// Lower bound
    pub low: f64,
    /// Upper bound
    pub high: f64,
    /// Whether `low` itself passes
    #[serde(default = "default_inclusive")]
    pub low_inclusive: bool,
    /// Whether `high` itself passes
    #[serde(default = "default_inclusive")]
    pub high_inclusive: bool,
    /// Values below this (but inside the range) warn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_low: Option<f64>,
    /// Values above this (but inside the range) warn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_high: Option<f64>,
}

fn default_inclusive() -> bool {
    true
}

impl RangeBounds {
    /// Closed interval `[low, high]`
    pub fn new(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            low_inclusive: true,
            high_inclusive: true,
            warn_low: None,
            warn_high: None,
        }
    }

    /// Set inclusivity of each end
    pub fn inclusive(mut self, low_inclusive: bool, high_inclusive: bool) -> Self {
        self.low_inclusive = low_inclusive;
        self.high_inclusive = high_inclusive;
        self
    }

    /// Set the warning band
    pub fn with_warning(mut self, warn_low: Option<f64>, warn_high: Option<f64>) -> Self {
        self.warn_low = warn_low;
        self.warn_high = warn_high;
        self
    }

    /// Range predicate
    pub fn contains(&self, observed: &Value) -> EvaluationResult<bool> {
        if self.low > self.high {
            return Err(EvaluationError::InvalidBounds { low: self.low, high: self.high });
        }
        let v = scalar(observed, "range")?;
        let above_low = if self.low_inclusive { v >= self.low } else { v > self.low };
        let below_high = if self.high_inclusive { v <= self.high } else { v < self.high };
        Ok(above_low && below_high)
    }

    /// True when the observation lies outside `[warn_low, warn_high]`
    pub fn in_warning_band(&self, observed: &Value) -> EvaluationResult<bool> {
        let v = scalar(observed, "range")?;
        let low = self.warn_low.is_some_and(|w| v < w);
        let high = self.warn_high.is_some_and(|w| v > w);
        Ok(low || high)
    }

    /// Whether any warning bound is configured
    pub fn has_warning_band(&self) -> bool {
        self.warn_low.is_some() || self.warn_high.is_some()
    }

    pub(crate) fn describe(&self) -> String {
        let low_op = if self.low_inclusive { "<=" } else { "<" };
        let high_op = if self.high_inclusive { "<=" } else { "<" };
        let mut text = format!("{} {low_op} value {high_op} {}", self.low, self.high);
        if self.has_warning_band() {
            let lo = self.warn_low.map_or_else(|| "-inf".to_string(), |w| w.to_string());
            let hi = self.warn_high.map_or_else(|| "inf".to_string(), |w| w.to_string());
            text.push_str(&format!(", warning outside [{lo}, {hi}]"));
        }
        text
    }
}

/// Numeric view of a scalar observation
fn scalar(value: &Value, context: &'static str) -> EvaluationResult<f64> {
    match value {
        Value::List(_) => Err(EvaluationError::NotScalar { found: value.type_name() }),
        other => other.as_numeric().ok_or(EvaluationError::NonNumeric {
            context,
            found: other.type_name(),
        }),
    }
}
