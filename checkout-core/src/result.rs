//! Severities, check results and bottom-up aggregation
//!
//! Every node of a prepared tree ends a run holding one [`CheckResult`].
//! Parents combine their children's results:
//!
//! ```text
//! severity = max(child severities)          (ALL mode, configurations)
//! severity = success if any child succeeded  (ANY mode)
//!            else max(child severities)
//! reason   = every non-empty reason of every non-success child, in order
//! ```
//!
//! ```rust
//! use checkout_core::result::{combine, CheckResult, Severity};
//!
//! let results = [
//!     CheckResult::success(),
//!     CheckResult::new(Severity::Warning, "motor1.readback drifting"),
//! ];
//! let combined = combine(&results);
//! assert_eq!(combined.severity, Severity::Warning);
//! assert_eq!(combined.reason, vec!["motor1.readback drifting".to_string()]);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered verdict level: `Success < Warning < Error < InternalError`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Check passed
    #[default]
    Success,
    /// Check passed with a caveat, or failed softly
    Warning,
    /// Check failed
    Error,
    /// Check could not be carried out
    InternalError,
}

impl Severity {
    /// All levels, lowest first
    pub const ALL: [Severity; 4] = [
        Severity::Success,
        Severity::Warning,
        Severity::Error,
        Severity::InternalError,
    ];

    /// Worst of a sequence; `Success` when empty
    pub fn worst<I: IntoIterator<Item = Severity>>(severities: I) -> Severity {
        severities.into_iter().max().unwrap_or(Severity::Success)
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a group combines its children
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// Every child must succeed
    #[default]
    All,
    /// One successful child is enough
    Any,
}

/// Verdict for one node of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Verdict level
    pub severity: Severity,
    /// Human-readable explanation, one entry per contributing failure
    #[serde(default)]
    pub reason: Vec<String>,
}

impl CheckResult {
    /// Passing result with no reason
    pub fn success() -> Self {
        Self { severity: Severity::Success, reason: Vec::new() }
    }

    /// Placeholder held by a node before it has run
    pub fn incomplete() -> Self {
        Self::new(Severity::InternalError, "check has not been run")
    }

    /// Result with a single reason
    pub fn new(severity: Severity, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.is_empty() { Vec::new() } else { vec![reason] };
        Self { severity, reason }
    }

    /// `InternalError` with a single reason
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::new(Severity::InternalError, reason)
    }

    /// True for `Success`
    pub fn is_success(&self) -> bool {
        self.severity == Severity::Success
    }

    /// Reasons joined into one line
    pub fn reason_text(&self) -> String {
        self.reason.join("; ")
    }
}

impl Default for CheckResult {
    fn default() -> Self {
        Self::incomplete()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.severity)
        } else {
            write!(f, "{}: {}", self.severity, self.reason_text())
        }
    }
}

/// Combine results: worst severity, non-trivial reasons concatenated in order
pub fn combine<'a, I>(results: I) -> CheckResult
where
    I: IntoIterator<Item = &'a CheckResult>,
{
    let mut severity = Severity::Success;
    let mut reason = Vec::new();

    for result in results {
        severity = severity.max(result.severity);
        if result.severity == Severity::Success {
            continue;
        }
        reason.extend(result.reason.iter().filter(|r| !r.is_empty()).cloned());
    }

    CheckResult { severity, reason }
}

/// Combine results according to a group mode
pub fn combine_with_mode<'a, I>(results: I, mode: GroupMode) -> CheckResult
where
    I: IntoIterator<Item = &'a CheckResult>,
    I::IntoIter: Clone,
{
    let results = results.into_iter();
    match mode {
        GroupMode::All => combine(results),
        GroupMode::Any => {
            if results.clone().any(CheckResult::is_success) {
                CheckResult::success()
            } else {
                combine(results)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn severity_strategy() -> impl Strategy<Value = Severity> {
        prop::sample::select(Severity::ALL.to_vec())
    }

    fn result_strategy() -> impl Strategy<Value = CheckResult> {
        (severity_strategy(), prop::collection::vec("[a-z]{0,6}", 0..3))
            .prop_map(|(severity, reason)| CheckResult { severity, reason })
    }

    #[test]
    fn severity_order_is_fixed() {
        assert!(Severity::Success < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::InternalError);
    }

    #[test]
    fn empty_combine_is_vacuous_success() {
        let empty: [CheckResult; 0] = [];
        assert_eq!(combine(&empty), CheckResult::success());
        assert_eq!(combine_with_mode(&empty, GroupMode::Any), CheckResult::success());
    }

    #[test]
    fn success_reasons_are_dropped() {
        let results = [
            CheckResult { severity: Severity::Success, reason: vec!["ignored".into()] },
            CheckResult::new(Severity::Error, "first"),
            CheckResult::new(Severity::Warning, ""),
            CheckResult::new(Severity::Warning, "second"),
        ];
        let combined = combine(&results);
        assert_eq!(combined.severity, Severity::Error);
        assert_eq!(combined.reason, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn any_mode_short_circuits_on_success() {
        let results = [
            CheckResult::new(Severity::InternalError, "broken"),
            CheckResult::success(),
        ];
        assert_eq!(combine_with_mode(&results, GroupMode::Any), CheckResult::success());
        assert_eq!(combine_with_mode(&results, GroupMode::All).severity, Severity::InternalError);
    }

    #[test]
    fn any_mode_failure_surfaces_all_reasons() {
        let results = [
            CheckResult::new(Severity::Warning, "a"),
            CheckResult::new(Severity::Error, "b"),
        ];
        let combined = combine_with_mode(&results, GroupMode::Any);
        assert_eq!(combined.severity, Severity::Error);
        assert_eq!(combined.reason, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn incomplete_placeholder() {
        let result = CheckResult::incomplete();
        assert_eq!(result.severity, Severity::InternalError);
        assert!(!result.reason.is_empty());
    }

    proptest! {
        #[test]
        fn combine_takes_max_severity(results in prop::collection::vec(result_strategy(), 0..8)) {
            let expected = Severity::worst(results.iter().map(|r| r.severity));
            prop_assert_eq!(combine(&results).severity, expected);
        }

        #[test]
        fn any_mode_success_wins(results in prop::collection::vec(result_strategy(), 1..8)) {
            let combined = combine_with_mode(&results, GroupMode::Any);
            if results.iter().any(CheckResult::is_success) {
                prop_assert_eq!(combined.severity, Severity::Success);
            } else {
                prop_assert_eq!(combined.severity, Severity::worst(results.iter().map(|r| r.severity)));
            }
        }

        #[test]
        fn combine_never_invents_reasons(results in prop::collection::vec(result_strategy(), 0..8)) {
            let combined = combine(&results);
            let available: usize = results
                .iter()
                .filter(|r| !r.is_success())
                .map(|r| r.reason.iter().filter(|s| !s.is_empty()).count())
                .sum();
            prop_assert_eq!(combined.reason.len(), available);
        }
    }
}
