//! Core checkout engine
//!
//! Verifies the live state of a control system against a declarative tree of
//! expectations. A tree is prepared once (identifiers bound to live sources)
//! and run any number of times; each run acquires fresh samples, reduces
//! them, evaluates every comparison and aggregates severities bottom-up.
//!
//! Key properties:
//! - Binding failures never abort preparation; they become `internal_error` leaves
//! - One acquisition per identifier per run, however many comparisons read it
//! - A run always produces a complete result tree unless cancelled
//!
//! ```no_run
//! use checkout_core::config::{ConfigurationFile, ConfigurationGroup, PvConfiguration};
//! use checkout_core::comparison::Comparison;
//! use checkout_core::result::GroupMode;
//! use checkout_core::traits::Namespace;
//!
//! async fn check(namespace: &dyn Namespace) {
//!     let root = ConfigurationGroup::new("root", GroupMode::All)
//!         .with_config(PvConfiguration::new("pvs").with_pv("SIM:PV1", vec![Comparison::equals(5)]));
//!     let file = ConfigurationFile::new(root);
//!
//!     let mut prepared = checkout_core::prepare(&file, namespace).expect("well-formed tree");
//!     let result = checkout_core::run(&mut prepared).await;
//!     println!("{result}");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod comparison;
pub mod config;
pub mod dynamic;
pub mod errors;
pub mod identifier;
pub mod prepare;
pub mod reduce;
pub mod result;
pub mod run;
pub mod settings;
pub mod traits;
pub mod value;

// Public API
pub use comparison::{Comparison, ComparisonKind};
pub use config::{Configuration, ConfigurationFile, ConfigurationGroup, IdentifierTable};
pub use errors::{BindError, BindResult, EngineError, EvaluationError, EvaluationResult, PrepareError};
pub use identifier::{Identifier, NodeId};
pub use prepare::{prepare, prepare_node, prepare_with_settings, PreparedFile};
pub use result::{combine, CheckResult, GroupMode, Severity};
pub use run::{run, run_with_cancel, NodeState};
pub use settings::EngineSettings;
pub use value::Value;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
