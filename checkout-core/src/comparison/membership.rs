//! Membership tests: enumerated value sets and any-of composites

use serde::{Deserialize, Serialize};

use super::{Comparison, EvalContext};
use crate::errors::{EvaluationError, EvaluationResult};
use crate::value::Value;

/// Ordered candidate values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSet {
    /// Accepted values
    pub values: Vec<Value>,
}

impl ValueSet {
    /// Candidate set
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self { values: values.into_iter().map(Into::into).collect() }
    }

    /// Exact membership; numerics compare across int and float
    pub fn contains(&self, observed: &Value, as_string: bool) -> bool {
        if as_string {
            let observed = observed.to_string();
            return self.values.iter().any(|c| c.to_string() == observed);
        }
        self.values.iter().any(|candidate| exact_eq(observed, candidate))
    }

    pub(crate) fn describe(&self) -> String {
        let items: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        format!("value in {{{}}}", items.join(", "))
    }
}

fn exact_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Passes when any sub-comparison passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyOf {
    /// Alternatives, each with its own `invert`
    pub comparisons: Vec<Comparison>,
}

impl AnyOf {
    /// Any-of over the given alternatives
    pub fn new(comparisons: Vec<Comparison>) -> Self {
        Self { comparisons }
    }

    /// True if any alternative holds. Errors surface only when nothing holds.
    pub fn holds(&self, observed: &Value, ctx: &EvalContext<'_>) -> EvaluationResult<bool> {
        if self.comparisons.is_empty() {
            return Err(EvaluationError::EmptyComparisonList);
        }
        let mut first_error = None;
        for comparison in &self.comparisons {
            match comparison.passes(observed, ctx) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }

    pub(crate) fn describe(&self) -> String {
        let parts: Vec<String> = self
            .comparisons
            .iter()
            .map(|c| format!("({})", c.describe()))
            .collect();
        format!("any of: {}", parts.join(", "))
    }
}
