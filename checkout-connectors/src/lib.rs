//! Live-Source Connectors for the Checkout Engine
//!
//! ## Overview
//!
//! The core engine only sees the capability traits in
//! [`checkout_core::traits`]. This crate provides implementations of them:
//!
//! ### `sim` (simulated control system)
//!
//! **When to use:**
//! - Tests and demos without a control network
//! - Reproducing a fault (disconnects, slow reads, broken devices)
//!
//! **Characteristics:**
//! - Points and device attributes held in memory
//! - Scripted sample sequences for reduction windows
//! - Read counters for verifying single-flight acquisition
//! - Loadable from a small JSON document
//!
//! ### `ping` (reachability tool)
//!
//! **When to use:**
//! - Checking that hosts answer before their services are checked
//!
//! **Characteristics:**
//! - Runs the system `ping` binary once per host, all hosts concurrently
//! - Unresponsive hosts report a round-trip time of `-1`
//!
//! ## Example Usage
//!
//! ```rust
//! use checkout_connectors::sim::{SimNamespace, SimSignal};
//! use checkout_core::traits::Namespace;
//!
//! let namespace = SimNamespace::new().with_point(SimSignal::new("SIM:PV1", 5));
//! assert!(namespace.resolve_point("SIM:PV1").is_ok());
//! assert!(namespace.resolve_point("SIM:PV2").is_err());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ping;
pub mod sim;

pub use ping::PingProcedure;
pub use sim::{SimDevice, SimNamespace, SimSignal, SimTool};

use checkout_core::errors::ToolError;
use thiserror::Error;

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A subprocess could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that was started
        program: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Subprocess output could not be interpreted
    #[error("unexpected output from {program}: {detail}")]
    Output {
        /// Program that produced the output
        program: String,
        /// What was wrong with it
        detail: String,
    },

    /// Simulation document is not valid
    #[error("invalid simulation document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConnectorError {
    /// Convert into the engine's tool failure for `tool`
    pub fn into_tool_error(self, tool: &str) -> ToolError {
        ToolError::Failed { tool: tool.to_string(), reason: self.to_string() }
    }
}
