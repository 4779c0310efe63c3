//! Readable live values

use std::time::Duration;

use async_trait::async_trait;

use crate::value::Value;

/// Outcome of one read
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Value, when one was available
    pub value: Option<Value>,
    /// Whether the source was reachable
    pub connected: bool,
}

impl Reading {
    /// Successful read
    pub fn connected(value: impl Into<Value>) -> Self {
        Self { value: Some(value.into()), connected: true }
    }

    /// Unreachable source
    pub fn disconnected() -> Self {
        Self { value: None, connected: false }
    }

    /// Value of a connected read
    pub fn into_value(self) -> Option<Value> {
        if self.connected {
            self.value
        } else {
            None
        }
    }
}

/// A single live value exposed by the control system
#[async_trait]
pub trait Signal: Send + Sync {
    /// Name used in logs and reasons
    fn name(&self) -> &str;

    /// Read the current value
    async fn read(&self) -> Reading;

    /// Suspend until connected, or give up after `timeout`
    async fn wait_connected(&self, timeout: Duration) -> bool;

    /// Option strings of an enumerated signal
    fn enum_options(&self) -> Option<Vec<String>> {
        None
    }
}
