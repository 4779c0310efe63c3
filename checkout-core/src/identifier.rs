//! Node identity and source identifiers
//!
//! A [`NodeId`] is assigned to every declarative comparison and configuration
//! when it is constructed. Locating a node later (to move it into `shared`,
//! to find its prepared counterpart) goes through the id, never through
//! structural equality.
//!
//! An [`Identifier`] names one live value: a device attribute, a raw point,
//! or a key in a tool's result.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a declarative tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate an id never handed out before in this process
    pub fn fresh() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::fresh()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address of one live value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identifier {
    /// Named attribute of a device from the naming service
    Attribute {
        /// Device name
        device: String,
        /// Attribute path on the device
        attribute: String,
    },
    /// Raw point (process variable) name
    Point {
        /// Point name
        name: String,
    },
    /// Key of a tool procedure's result
    ToolKey {
        /// Tool name
        tool: String,
        /// Result key
        key: String,
    },
}

impl Identifier {
    /// Device attribute identifier
    pub fn attribute(device: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Attribute { device: device.into(), attribute: attribute.into() }
    }

    /// Raw point identifier
    pub fn point(name: impl Into<String>) -> Self {
        Self::Point { name: name.into() }
    }

    /// Tool result identifier
    pub fn tool_key(tool: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ToolKey { tool: tool.into(), key: key.into() }
    }

    /// Canonical string used as the acquisition cache key
    pub fn canonical(&self) -> String {
        match self {
            Self::Attribute { device, attribute } => format!("{device}.{attribute}"),
            Self::Point { name } => name.clone(),
            Self::ToolKey { tool, key } => format!("{tool}:{key}"),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
