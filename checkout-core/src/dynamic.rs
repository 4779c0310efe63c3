//! Comparison targets read from a second live source

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::reduce::ReduceMethod;
use crate::value::Value;

/// Where a dynamic target is read from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DynamicSource {
    /// Raw point
    #[serde(rename = "EpicsValue")]
    Point {
        /// Point name
        pvname: String,
    },
    /// Device attribute from the naming service
    #[serde(rename = "HappiValue")]
    DeviceAttribute {
        /// Device name
        device_name: String,
        /// Attribute path on the device
        attribute: String,
    },
}

/// A target value resolved at run time instead of written as a literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicValue {
    /// Source of the target
    #[serde(flatten)]
    pub source: DynamicSource,
    /// Sampling window for the target in seconds
    #[serde(default)]
    pub reduce_period: f64,
    /// Reduction applied to the target window
    #[serde(default)]
    pub reduce_method: ReduceMethod,
    /// Cast the resolved target to a string
    #[serde(default)]
    pub string: bool,
}

impl DynamicValue {
    /// Dynamic target read from a raw point
    pub fn point(pvname: impl Into<String>) -> Self {
        Self::new(DynamicSource::Point { pvname: pvname.into() })
    }

    /// Dynamic target read from a device attribute
    pub fn device_attribute(device_name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::new(DynamicSource::DeviceAttribute {
            device_name: device_name.into(),
            attribute: attribute.into(),
        })
    }

    fn new(source: DynamicSource) -> Self {
        Self {
            source,
            reduce_period: 0.0,
            reduce_method: ReduceMethod::Single,
            string: false,
        }
    }

    /// Set the reduction window
    pub fn with_reduction(mut self, period: f64, method: ReduceMethod) -> Self {
        self.reduce_period = period;
        self.reduce_method = method;
        self
    }

    /// Identifier of the live value behind this target
    pub fn identifier(&self) -> Identifier {
        match &self.source {
            DynamicSource::Point { pvname } => Identifier::point(pvname.clone()),
            DynamicSource::DeviceAttribute { device_name, attribute } => {
                Identifier::attribute(device_name.clone(), attribute.clone())
            }
        }
    }

    /// Sampling window; negative or non-finite periods collapse to zero
    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.reduce_period).unwrap_or(Duration::ZERO)
    }

    /// Key under which the resolved value is stored for one run
    pub fn key(&self) -> TargetKey {
        TargetKey {
            identifier: self.identifier(),
            period: self.window(),
            method: self.reduce_method,
        }
    }
}

/// Lookup key for a resolved dynamic target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    /// Source identifier
    pub identifier: Identifier,
    /// Sampling window
    pub period: Duration,
    /// Reduction method
    pub method: ReduceMethod,
}

/// Dynamic targets resolved for one comparison during a run
pub type ResolvedTargets = HashMap<TargetKey, Value>;
