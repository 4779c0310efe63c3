//! Leaf procedures with named results

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::ToolError;
use crate::value::Value;

/// Result keys to values of one tool run
pub type ToolOutput = BTreeMap<String, Value>;

/// A procedure run once per check run, read through its result keys
#[async_trait]
pub trait ToolProcedure: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Every key `run` produces
    fn result_keys(&self) -> Vec<String>;

    /// Execute the procedure
    async fn run(&self) -> Result<ToolOutput, ToolError>;
}
