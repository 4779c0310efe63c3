//! Capability Traits for Live Sources
//!
//! The engine never talks to a control network directly. Everything it reads
//! goes through these seams, implemented by connector crates:
//!
//! ## Module Organization
//!
//! - [`signal`] - A single readable live value with connectivity
//! - [`namespace`] - The naming service that resolves devices, points and tools
//! - [`tool`] - Leaf procedures with named result keys
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use checkout_core::traits::{Reading, Signal};
//! use checkout_core::value::Value;
//!
//! struct Constant(f64);
//!
//! #[async_trait]
//! impl Signal for Constant {
//!     fn name(&self) -> &str {
//!         "CONST"
//!     }
//!
//!     async fn read(&self) -> Reading {
//!         Reading::connected(Value::Float(self.0))
//!     }
//!
//!     async fn wait_connected(&self, _timeout: Duration) -> bool {
//!         true
//!     }
//! }
//!
//! let signal: Arc<dyn Signal> = Arc::new(Constant(1.5));
//! assert_eq!(signal.name(), "CONST");
//! ```

pub mod namespace;
pub mod signal;
pub mod tool;

pub use namespace::{Device, Namespace};
pub use signal::{Reading, Signal};
pub use tool::{ToolOutput, ToolProcedure};
