//! Declarative comparisons and their evaluators
//!
//! A [`Comparison`] holds the fields every variant shares (reduction,
//! inversion, severities) and a [`ComparisonKind`] with the predicate
//! specific data. Evaluation is a closed match on the kind:
//!
//! ```text
//! observed --normalize--> value --predicate--> bool --invert--> passed
//! passed  => success (or warning inside a range's warning band)
//! !passed => severity_on_failure
//! error   => internal_error
//! ```
//!
//! ```rust
//! use checkout_core::comparison::{Comparison, EvalContext};
//! use checkout_core::dynamic::ResolvedTargets;
//! use checkout_core::result::Severity;
//! use checkout_core::value::Value;
//!
//! let targets = ResolvedTargets::new();
//! let ctx = EvalContext::new(&targets);
//! let check = Comparison::equals(10).with_tolerance(0.5, 0.0);
//!
//! assert!(check.evaluate(&Value::Float(10.4), &ctx).is_success());
//! assert_eq!(check.evaluate(&Value::Float(10.6), &ctx).severity, Severity::Error);
//! ```

mod equality;
mod membership;
mod ordering;

pub use equality::Equality;
pub use membership::{AnyOf, ValueSet};
pub use ordering::{Bound, RangeBounds, Threshold};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dynamic::{DynamicValue, ResolvedTargets};
use crate::errors::{EvaluationError, EvaluationResult};
use crate::identifier::NodeId;
use crate::reduce::ReduceMethod;
use crate::result::{CheckResult, Severity};
use crate::value::Value;

/// Predicate-specific data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ComparisonKind {
    /// Equal within tolerance
    Equals(Equality),
    /// Not equal within tolerance
    NotEquals(Equality),
    /// Strictly above a threshold
    Greater(Threshold),
    /// At or above a threshold
    GreaterOrEqual(Threshold),
    /// Strictly below a threshold
    Less(Threshold),
    /// At or below a threshold
    LessOrEqual(Threshold),
    /// Inside an interval
    Range(RangeBounds),
    /// Member of a candidate set
    ValueSet(ValueSet),
    /// Any of several alternatives
    AnyComparison(AnyOf),
}

impl ComparisonKind {
    /// Variant name as written in documents
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Equals(_) => "Equals",
            Self::NotEquals(_) => "NotEquals",
            Self::Greater(_) => "Greater",
            Self::GreaterOrEqual(_) => "GreaterOrEqual",
            Self::Less(_) => "Less",
            Self::LessOrEqual(_) => "LessOrEqual",
            Self::Range(_) => "Range",
            Self::ValueSet(_) => "ValueSet",
            Self::AnyComparison(_) => "AnyComparison",
        }
    }

    fn threshold(&self) -> Option<(Bound, &Threshold)> {
        match self {
            Self::Greater(t) => Some((Bound::Greater, t)),
            Self::GreaterOrEqual(t) => Some((Bound::GreaterOrEqual, t)),
            Self::Less(t) => Some((Bound::Less, t)),
            Self::LessOrEqual(t) => Some((Bound::LessOrEqual, t)),
            Self::Equals(_)
            | Self::NotEquals(_)
            | Self::Range(_)
            | Self::ValueSet(_)
            | Self::AnyComparison(_) => None,
        }
    }
}

fn default_failure_severity() -> Severity {
    Severity::Error
}

/// One declared expectation about a live value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Identity within the declarative tree
    #[serde(skip, default = "NodeId::fresh")]
    pub id: NodeId,
    /// Short name
    #[serde(default)]
    pub name: String,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Negate the predicate before severity mapping
    #[serde(default)]
    pub invert: bool,
    /// Sampling window in seconds; zero means one instantaneous sample
    #[serde(default)]
    pub reduce_period: f64,
    /// Reduction applied across the window
    #[serde(default)]
    pub reduce_method: ReduceMethod,
    /// Compare both sides as strings
    #[serde(default, rename = "string")]
    pub treat_as_string: bool,
    /// Verdict when the predicate fails
    #[serde(default = "default_failure_severity")]
    pub severity_on_failure: Severity,
    /// Verdict when the source cannot be read
    #[serde(default = "default_failure_severity")]
    pub if_disconnected: Severity,
    /// Predicate data
    #[serde(flatten)]
    pub kind: ComparisonKind,
}

/// Run-time inputs to a predicate besides the observed value
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Dynamic targets acquired for this run
    pub targets: &'a ResolvedTargets,
    /// Option strings of an enumerated signal
    pub enum_options: Option<&'a [String]>,
}

impl<'a> EvalContext<'a> {
    /// Context without enum options
    pub fn new(targets: &'a ResolvedTargets) -> Self {
        Self { targets, enum_options: None }
    }

    /// Attach a signal's enum option strings
    pub fn with_enum_options(mut self, options: Option<&'a [String]>) -> Self {
        self.enum_options = options;
        self
    }
}

impl Comparison {
    /// Comparison with default settings
    pub fn new(kind: ComparisonKind) -> Self {
        Self {
            id: NodeId::fresh(),
            name: String::new(),
            description: String::new(),
            invert: false,
            reduce_period: 0.0,
            reduce_method: ReduceMethod::Single,
            treat_as_string: false,
            severity_on_failure: Severity::Error,
            if_disconnected: Severity::Error,
            kind,
        }
    }

    /// `Equals` against a static target
    pub fn equals(value: impl Into<Value>) -> Self {
        Self::new(ComparisonKind::Equals(Equality::new(value)))
    }

    /// `NotEquals` against a static target
    pub fn not_equals(value: impl Into<Value>) -> Self {
        Self::new(ComparisonKind::NotEquals(Equality::new(value)))
    }

    /// Ordering against a static threshold
    pub fn threshold(bound: Bound, value: impl Into<Value>) -> Self {
        let threshold = Threshold::new(value);
        Self::new(match bound {
            Bound::Greater => ComparisonKind::Greater(threshold),
            Bound::GreaterOrEqual => ComparisonKind::GreaterOrEqual(threshold),
            Bound::Less => ComparisonKind::Less(threshold),
            Bound::LessOrEqual => ComparisonKind::LessOrEqual(threshold),
        })
    }

    /// Closed `Range`
    pub fn range(low: f64, high: f64) -> Self {
        Self::new(ComparisonKind::Range(RangeBounds::new(low, high)))
    }

    /// `ValueSet` membership
    pub fn value_set<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(ComparisonKind::ValueSet(ValueSet::new(values)))
    }

    /// `AnyComparison` over alternatives
    pub fn any_of(comparisons: Vec<Comparison>) -> Self {
        Self::new(ComparisonKind::AnyComparison(AnyOf::new(comparisons)))
    }

    /// Set the name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Negate the predicate
    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    /// Set the sampling window
    pub fn with_reduction(mut self, period: f64, method: ReduceMethod) -> Self {
        self.reduce_period = period;
        self.reduce_method = method;
        self
    }

    /// Compare as strings
    pub fn as_string(mut self) -> Self {
        self.treat_as_string = true;
        self
    }

    /// Set the verdict for a failing predicate
    pub fn with_severity_on_failure(mut self, severity: Severity) -> Self {
        self.severity_on_failure = severity;
        self
    }

    /// Set the verdict for an unreachable source
    pub fn with_if_disconnected(mut self, severity: Severity) -> Self {
        self.if_disconnected = severity;
        self
    }

    /// Set tolerances on an `Equals`/`NotEquals`; no-op for other kinds
    pub fn with_tolerance(mut self, atol: f64, rtol: f64) -> Self {
        if let ComparisonKind::Equals(eq) | ComparisonKind::NotEquals(eq) = &mut self.kind {
            eq.atol = atol;
            eq.rtol = rtol;
        }
        self
    }

    /// Replace the static target with a dynamic one; no-op for kinds without a target
    pub fn with_dynamic_target(mut self, dynamic: DynamicValue) -> Self {
        match &mut self.kind {
            ComparisonKind::Equals(eq) | ComparisonKind::NotEquals(eq) => {
                eq.value_dynamic = Some(dynamic);
            }
            ComparisonKind::Greater(t)
            | ComparisonKind::GreaterOrEqual(t)
            | ComparisonKind::Less(t)
            | ComparisonKind::LessOrEqual(t) => {
                t.value_dynamic = Some(dynamic);
            }
            _ => {}
        }
        self
    }

    /// Sampling window; negative or non-finite periods collapse to zero
    pub fn reduce_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.reduce_period).unwrap_or(Duration::ZERO)
    }

    /// Name, falling back to the variant name
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.kind.type_name()
        } else {
            &self.name
        }
    }

    /// Every dynamic target this comparison reads, including nested alternatives
    pub fn dynamic_values(&self) -> Vec<&DynamicValue> {
        let mut out = Vec::new();
        self.collect_dynamic(&mut out);
        out
    }

    fn collect_dynamic<'s>(&'s self, out: &mut Vec<&'s DynamicValue>) {
        match &self.kind {
            ComparisonKind::Equals(eq) | ComparisonKind::NotEquals(eq) => {
                out.extend(eq.value_dynamic.as_ref());
            }
            ComparisonKind::AnyComparison(any) => {
                for c in &any.comparisons {
                    c.collect_dynamic(out);
                }
            }
            kind => {
                if let Some((_, t)) = kind.threshold() {
                    out.extend(t.value_dynamic.as_ref());
                }
            }
        }
    }

    /// Ids of this comparison and its nested alternatives
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = vec![self.id];
        if let ComparisonKind::AnyComparison(any) = &self.kind {
            ids.extend(any.comparisons.iter().flat_map(Comparison::node_ids));
        }
        ids
    }

    /// Clone with fresh identities throughout
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = NodeId::fresh();
        if let ComparisonKind::AnyComparison(any) = &mut copy.kind {
            for c in &mut any.comparisons {
                *c = c.duplicate();
            }
        }
        copy
    }

    /// Human-readable predicate
    pub fn describe(&self) -> String {
        let text = match &self.kind {
            ComparisonKind::Equals(eq) => {
                format!("value == {}{}", target_text(&eq.value, &eq.value_dynamic), eq.tolerance_text())
            }
            ComparisonKind::NotEquals(eq) => {
                format!("value != {}{}", target_text(&eq.value, &eq.value_dynamic), eq.tolerance_text())
            }
            ComparisonKind::Range(range) => range.describe(),
            ComparisonKind::ValueSet(set) => set.describe(),
            ComparisonKind::AnyComparison(any) => any.describe(),
            ComparisonKind::Greater(t) => threshold_text(Bound::Greater, t),
            ComparisonKind::GreaterOrEqual(t) => threshold_text(Bound::GreaterOrEqual, t),
            ComparisonKind::Less(t) => threshold_text(Bound::Less, t),
            ComparisonKind::LessOrEqual(t) => threshold_text(Bound::LessOrEqual, t),
        };
        if self.invert {
            format!("not ({text})")
        } else {
            text
        }
    }

    /// Target after dynamic resolution and string casting
    fn target(&self, value: &Value, dynamic: &Option<DynamicValue>, ctx: &EvalContext<'_>) -> EvaluationResult<Value> {
        let target = match dynamic {
            Some(dynamic) => {
                let resolved = ctx.targets.get(&dynamic.key()).ok_or_else(|| {
                    EvaluationError::UnresolvedTarget { source_name: dynamic.identifier().canonical() }
                })?;
                if dynamic.string {
                    resolved.to_string_value()
                } else {
                    resolved.clone()
                }
            }
            None => value.clone(),
        };
        Ok(target)
    }

    /// Whether the comparison expects string observations
    fn wants_string(&self) -> bool {
        if self.treat_as_string {
            return true;
        }
        match &self.kind {
            ComparisonKind::Equals(eq) | ComparisonKind::NotEquals(eq) => {
                matches!(eq.value, Value::Str(_)) || eq.value_dynamic.as_ref().is_some_and(|d| d.string)
            }
            ComparisonKind::ValueSet(set) => set.values.iter().any(|v| matches!(v, Value::Str(_))),
            _ => false,
        }
    }

    /// Translate an enum index into its option string when strings are expected
    fn normalize(&self, observed: &Value, ctx: &EvalContext<'_>) -> EvaluationResult<Value> {
        match (observed, ctx.enum_options) {
            (Value::Int(index), Some(options)) if self.wants_string() => usize::try_from(*index)
                .ok()
                .and_then(|i| options.get(i))
                .map(|s| Value::Str(s.clone()))
                .ok_or(EvaluationError::EnumIndex { index: *index, count: options.len() }),
            _ => Ok(observed.clone()),
        }
    }

    /// Type-specific predicate, before `invert`
    pub fn predicate(&self, observed: &Value, ctx: &EvalContext<'_>) -> EvaluationResult<bool> {
        let observed = self.normalize(observed, ctx)?;
        match &self.kind {
            ComparisonKind::Equals(eq) => {
                let target = self.target(&eq.value, &eq.value_dynamic, ctx)?;
                eq.matches(&observed, &target, self.treat_as_string)
            }
            ComparisonKind::NotEquals(eq) => {
                let target = self.target(&eq.value, &eq.value_dynamic, ctx)?;
                eq.matches(&observed, &target, self.treat_as_string).map(|m| !m)
            }
            ComparisonKind::Range(range) => range.contains(&observed),
            ComparisonKind::ValueSet(set) => Ok(set.contains(&observed, self.treat_as_string)),
            ComparisonKind::AnyComparison(any) => any.holds(&observed, ctx),
            ComparisonKind::Greater(t) => self.ordered(Bound::Greater, t, &observed, ctx),
            ComparisonKind::GreaterOrEqual(t) => self.ordered(Bound::GreaterOrEqual, t, &observed, ctx),
            ComparisonKind::Less(t) => self.ordered(Bound::Less, t, &observed, ctx),
            ComparisonKind::LessOrEqual(t) => self.ordered(Bound::LessOrEqual, t, &observed, ctx),
        }
    }

    fn ordered(&self, bound: Bound, t: &Threshold, observed: &Value, ctx: &EvalContext<'_>) -> EvaluationResult<bool> {
        let target = self.target(&t.value, &t.value_dynamic, ctx)?;
        t.holds(bound, observed, &target)
    }

    /// Predicate with `invert` applied
    pub fn passes(&self, observed: &Value, ctx: &EvalContext<'_>) -> EvaluationResult<bool> {
        Ok(self.predicate(observed, ctx)? != self.invert)
    }

    /// Verdict for one reduced observation from a connected source
    pub fn evaluate(&self, observed: &Value, ctx: &EvalContext<'_>) -> CheckResult {
        let passed = match self.passes(observed, ctx) {
            Ok(passed) => passed,
            Err(err) => {
                return CheckResult::internal_error(format!("{}: {err}", self.label()));
            }
        };

        if !passed {
            return CheckResult::new(
                self.severity_on_failure,
                format!("{}: {observed} does not satisfy {}", self.label(), self.describe()),
            );
        }

        if let ComparisonKind::Range(range) = &self.kind {
            if !self.invert && range.has_warning_band() {
                match range.in_warning_band(observed) {
                    Ok(true) => {
                        return CheckResult::new(
                            Severity::Warning,
                            format!("{}: {observed} is inside the warning band of {}", self.label(), range.describe()),
                        );
                    }
                    Ok(false) => {}
                    Err(err) => return CheckResult::internal_error(format!("{}: {err}", self.label())),
                }
            }
        }

        CheckResult::success()
    }
}

fn target_text(value: &Value, dynamic: &Option<DynamicValue>) -> String {
    match dynamic {
        Some(dynamic) => dynamic.identifier().canonical(),
        None => value.to_string(),
    }
}

fn threshold_text(bound: Bound, t: &Threshold) -> String {
    format!("value {} {}", bound.symbol(), target_text(&t.value, &t.value_dynamic))
}
