//! Naming service resolving identifiers to live sources

use std::sync::Arc;

use super::signal::Signal;
use super::tool::ToolProcedure;
use crate::config::Tool;
use crate::errors::{BindError, BindResult};

/// An addressable object exposing named attributes
pub trait Device: Send + Sync {
    /// Device name
    fn name(&self) -> &str;

    /// Signal behind an attribute path
    fn attribute(&self, path: &str) -> BindResult<Arc<dyn Signal>>;
}

/// Resolution service consulted once per preparation
pub trait Namespace: Send + Sync {
    /// Look up a device by name
    fn resolve_device(&self, name: &str) -> BindResult<Arc<dyn Device>>;

    /// Look up a raw point by name
    fn resolve_point(&self, name: &str) -> BindResult<Arc<dyn Signal>>;

    /// Look up an attribute of an already resolved device
    fn resolve_attribute(&self, device: &dyn Device, path: &str) -> BindResult<Arc<dyn Signal>> {
        device.attribute(path)
    }

    /// Instantiate the procedure for a tool configuration
    fn resolve_tool(&self, tool: &Tool) -> BindResult<Arc<dyn ToolProcedure>> {
        Err(BindError::Unsupported { what: format!("tool {}", tool.name()) })
    }
}
