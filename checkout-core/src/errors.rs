//! Error Types for Checkout Preparation and Evaluation
//!
//! ## Error Categories
//!
//! Failures fall into four groups, and only the last one ever escapes a run:
//!
//! ### Binding Errors
//! - `BindError`: an identifier could not be resolved while preparing
//!   (device not found, attribute missing, tool result key unknown).
//!   The affected comparisons carry an `internal_error` result.
//!
//! ### Acquisition Errors
//! - `ToolError` and disconnected signals: the source could not be read at
//!   run time. The comparison reports its `if_disconnected` severity.
//!
//! ### Evaluation Errors
//! - `EvaluationError`: type mismatch, non-numeric input to a numeric
//!   reduction, invalid bounds. Reported as `internal_error` for the one
//!   comparison involved.
//!
//! ### Contract Violations
//! - `PrepareError`: the declarative tree itself is malformed (the node
//!   identity invariant is broken). Fatal, returned from `prepare`.
//!
//! ## Handling Strategy
//!
//! ```rust
//! use checkout_core::errors::BindError;
//!
//! fn describe(err: &BindError) -> &'static str {
//!     match err {
//!         BindError::NotFound { .. } => "skip: not in the naming service",
//!         BindError::Invalid { .. } => "skip: entry exists but cannot be instantiated",
//!         BindError::NoSuchAttribute { .. } => "only this attribute's checks fail",
//!         BindError::NoSuchResultKey { .. } => "only this key's checks fail",
//!         BindError::Unsupported { .. } => "namespace cannot provide this source",
//!     }
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::identifier::NodeId;

/// Result type for identifier resolution
pub type BindResult<T> = Result<T, BindError>;

/// Result type for predicate evaluation and reduction
pub type EvaluationResult<T> = Result<T, EvaluationError>;

/// Identifier resolution failures reported by a naming service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    /// Nothing is registered under this name
    #[error("{kind} {name} not found")]
    NotFound {
        /// What was looked up ("device", "point", ...)
        kind: &'static str,
        /// The name that failed to resolve
        name: String,
    },

    /// The entry exists but could not be instantiated
    #[error("{name} is invalid: {reason}")]
    Invalid {
        /// The name that resolved to a broken entry
        name: String,
        /// Why instantiation failed
        reason: String,
    },

    /// The device resolved but has no such attribute
    #[error("device {device} has no attribute {attribute}")]
    NoSuchAttribute {
        /// Resolved device name
        device: String,
        /// Missing attribute path
        attribute: String,
    },

    /// The tool does not produce this result key
    #[error("tool {tool} has no result key {key}")]
    NoSuchResultKey {
        /// Tool name
        tool: String,
        /// Unknown result key
        key: String,
    },

    /// The naming service cannot provide this kind of source at all
    #[error("{what} is not supported by this namespace")]
    Unsupported {
        /// Description of the unsupported request
        what: String,
    },
}

/// Failures while reducing samples or applying a predicate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// Observed and target values cannot be compared
    #[error("cannot compare {observed} value against {target} target")]
    TypeMismatch {
        /// Type name of the observed value
        observed: &'static str,
        /// Type name of the target value
        target: &'static str,
    },

    /// A numeric operation received a non-numeric value
    #[error("{context} requires numeric values, got {found}")]
    NonNumeric {
        /// The operation that needed numbers
        context: &'static str,
        /// Type name of the offending value
        found: &'static str,
    },

    /// Reduction was asked to reduce nothing
    #[error("no samples were acquired")]
    EmptyWindow,

    /// A predicate needed a scalar
    #[error("expected a scalar value, got {found}")]
    NotScalar {
        /// Type name of the offending value
        found: &'static str,
    },

    /// Range with low above high
    #[error("invalid bounds: low {low} exceeds high {high}")]
    InvalidBounds {
        /// Configured lower bound
        low: f64,
        /// Configured upper bound
        high: f64,
    },

    /// Enum index outside of the signal's option list
    #[error("enum index {index} out of range for {count} options")]
    EnumIndex {
        /// Raw index read from the signal
        index: i64,
        /// Number of options the signal reports
        count: usize,
    },

    /// An any-of comparison with nothing inside it
    #[error("comparison has no sub-comparisons")]
    EmptyComparisonList,

    /// A dynamic target was not resolved before evaluation
    #[error("dynamic target {source_name} was not resolved")]
    UnresolvedTarget {
        /// Canonical identifier of the dynamic source
        source_name: String,
    },
}

/// Tool procedure failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// The tool ran but failed
    #[error("tool {tool} failed: {reason}")]
    Failed {
        /// Tool name
        tool: String,
        /// Failure description
        reason: String,
    },

    /// The tool did not finish in time
    #[error("tool {tool} did not finish within {timeout:?}")]
    Timeout {
        /// Tool name
        tool: String,
        /// Configured bound
        timeout: Duration,
    },
}

/// Malformed declarative trees rejected by `prepare`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrepareError {
    /// Two nodes in one tree share an identity
    #[error("node {id} ({name}) appears more than once in the configuration tree")]
    DuplicateNode {
        /// Repeated node id
        id: NodeId,
        /// Name of the second occurrence
        name: String,
    },
}

/// Errors that end a run without a verdict
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The caller aborted the run
    #[error("run cancelled")]
    Cancelled,

    /// Preparation rejected the tree
    #[error(transparent)]
    Prepare(#[from] PrepareError),
}

/// Settings loading failures
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Settings file could not be read
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    /// Settings document is not valid
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
