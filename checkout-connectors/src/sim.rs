//! Simulated control system
//!
//! In-memory points, devices and tools behind the engine's capability
//! traits. Every signal counts its reads, can replay a scripted sample
//! sequence, and can be disconnected or reconnected while a run is in flight.
//!
//! A namespace can also be loaded from JSON:
//!
//! ```rust
//! use checkout_connectors::sim::SimNamespace;
//! use checkout_core::traits::Namespace;
//!
//! let namespace = SimNamespace::from_json_str(r#"{
//!     "points": { "SIM:PV1": 5, "SIM:MODE": "AUTO" },
//!     "devices": { "m1": { "readback": 1.5, "velocity": 2 } },
//!     "disconnected": ["SIM:DOWN"],
//!     "invalid": { "broken": "controller offline" }
//! }"#).unwrap();
//!
//! assert!(namespace.resolve_point("SIM:PV1").is_ok());
//! assert!(namespace.resolve_device("m1").is_ok());
//! assert!(namespace.resolve_device("broken").is_err());
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use checkout_core::config::Tool;
use checkout_core::errors::{BindError, BindResult, ToolError};
use checkout_core::traits::{Device, Namespace, Reading, Signal, ToolOutput, ToolProcedure};
use checkout_core::Value;
use log::debug;
use serde::Deserialize;

use crate::ping::PingProcedure;
use crate::ConnectorError;

/// How often a disconnected signal re-checks its connection
const CONNECT_POLL: Duration = Duration::from_millis(10);

/// A simulated readable value
#[derive(Debug)]
pub struct SimSignal {
    name: String,
    script: Mutex<VecDeque<Value>>,
    current: Mutex<Value>,
    connected: AtomicBool,
    options: Option<Vec<String>>,
    read_delay: Duration,
    reads: AtomicUsize,
}

impl SimSignal {
    /// Connected signal holding `value`
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            current: Mutex::new(value.into()),
            connected: AtomicBool::new(true),
            options: None,
            read_delay: Duration::ZERO,
            reads: AtomicUsize::new(0),
        }
    }

    /// Values returned by the next reads, in order; the last one then sticks
    pub fn with_script<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        *self.script.lock().unwrap_or_else(PoisonError::into_inner) = values.into_iter().map(Into::into).collect();
        self
    }

    /// Report an enumeration; the held value is then an option index
    pub fn with_enum_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    /// Delay every read by `delay`
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Start disconnected
    pub fn disconnected(self) -> Self {
        self.connected.store(false, Ordering::SeqCst);
        self
    }

    /// Replace the held value and drop any remaining script
    pub fn put(&self, value: impl Into<Value>) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).clear();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = value.into();
    }

    /// Value the next read returns, ignoring the script
    pub fn value(&self) -> Value {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Connect or disconnect the signal
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Current connectivity
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Reads performed so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signal for SimSignal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Reading {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if !self.is_connected() {
            return Reading::disconnected();
        }

        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = next {
            *current = value;
        }
        Reading::connected(current.clone())
    }

    async fn wait_connected(&self, timeout: Duration) -> bool {
        let poll = async {
            while !self.is_connected() {
                tokio::time::sleep(CONNECT_POLL).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    fn enum_options(&self) -> Option<Vec<String>> {
        self.options.clone()
    }
}

/// A simulated device: a name and its attribute signals
#[derive(Debug)]
pub struct SimDevice {
    name: String,
    attributes: HashMap<String, Arc<SimSignal>>,
}

impl SimDevice {
    /// Device without attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: HashMap::new() }
    }

    /// Add an attribute signal at `path`
    pub fn with_attribute(mut self, path: impl Into<String>, signal: SimSignal) -> Self {
        self.attributes.insert(path.into(), Arc::new(signal));
        self
    }

    /// Handle to the signal at `path`
    pub fn signal(&self, path: &str) -> Option<Arc<SimSignal>> {
        self.attributes.get(path).cloned()
    }
}

impl Device for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, path: &str) -> BindResult<Arc<dyn Signal>> {
        self.attributes
            .get(path)
            .map(|signal| Arc::clone(signal) as Arc<dyn Signal>)
            .ok_or_else(|| BindError::NoSuchAttribute { device: self.name.clone(), attribute: path.to_string() })
    }
}

/// A tool with canned output
#[derive(Debug)]
pub struct SimTool {
    name: String,
    keys: Vec<String>,
    outcome: Result<ToolOutput, ToolError>,
    delay: Duration,
    runs: AtomicUsize,
}

impl SimTool {
    /// Tool that always produces `output`
    pub fn new(name: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            name: name.into(),
            keys: output.keys().cloned().collect(),
            outcome: Ok(output),
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        }
    }

    /// Tool declaring the result keys of `tool` that always fails with `reason`
    pub fn failing(tool: &Tool, reason: impl Into<String>) -> Self {
        Self {
            name: tool.name().to_string(),
            keys: tool.result_keys(),
            outcome: Err(ToolError::Failed { tool: tool.name().to_string(), reason: reason.into() }),
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        }
    }

    /// Take `delay` to finish each run
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Runs performed so far
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProcedure for SimTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn result_keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    async fn run(&self) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

/// JSON form of a simulated namespace
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SimDocument {
    points: BTreeMap<String, Value>,
    devices: BTreeMap<String, BTreeMap<String, Value>>,
    /// Point names or `device.attribute` paths that start disconnected
    disconnected: Vec<String>,
    /// Names that resolve to broken entries, with the reason
    invalid: BTreeMap<String, String>,
}

/// Naming service over simulated points, devices and tools
#[derive(Default)]
pub struct SimNamespace {
    points: HashMap<String, Arc<SimSignal>>,
    devices: HashMap<String, Arc<SimDevice>>,
    invalid: HashMap<String, String>,
    tools: HashMap<String, Arc<dyn ToolProcedure>>,
    system_tools: bool,
}

impl SimNamespace {
    /// Empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Load points and devices from a JSON document
    pub fn from_json_str(doc: &str) -> Result<Self, ConnectorError> {
        let doc: SimDocument = serde_json::from_str(doc)?;
        let is_down = |name: &str| doc.disconnected.iter().any(|d| d == name);

        let mut namespace = Self::new();
        for (name, value) in &doc.points {
            let signal = SimSignal::new(name.clone(), value.clone());
            namespace = namespace.with_point(if is_down(name) { signal.disconnected() } else { signal });
        }
        for (device, attributes) in &doc.devices {
            let mut sim = SimDevice::new(device.clone());
            for (path, value) in attributes {
                let full = format!("{device}.{path}");
                let signal = SimSignal::new(full.clone(), value.clone());
                sim = sim.with_attribute(path.clone(), if is_down(&full) { signal.disconnected() } else { signal });
            }
            namespace = namespace.with_device(sim);
        }
        for (name, reason) in doc.invalid {
            namespace = namespace.with_invalid_device(name, reason);
        }
        debug!(
            "simulated namespace: {} points, {} devices",
            namespace.points.len(),
            namespace.devices.len()
        );
        Ok(namespace)
    }

    /// Register a point under its signal name
    pub fn with_point(mut self, signal: SimSignal) -> Self {
        self.points.insert(signal.name.clone(), Arc::new(signal));
        self
    }

    /// Register a device under its name
    pub fn with_device(mut self, device: SimDevice) -> Self {
        self.devices.insert(device.name.clone(), Arc::new(device));
        self
    }

    /// Register a name that exists but cannot be instantiated
    pub fn with_invalid_device(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.invalid.insert(name.into(), reason.into());
        self
    }

    /// Serve `procedure` for tools of its name
    pub fn with_tool(mut self, procedure: Arc<dyn ToolProcedure>) -> Self {
        self.tools.insert(procedure.name().to_string(), procedure);
        self
    }

    /// Fall back to real system tools (the `ping` binary) for unregistered tools
    pub fn with_system_tools(mut self) -> Self {
        self.system_tools = true;
        self
    }

    /// Handle to a registered point
    pub fn point(&self, name: &str) -> Option<Arc<SimSignal>> {
        self.points.get(name).cloned()
    }

    /// Handle to a registered device
    pub fn device(&self, name: &str) -> Option<Arc<SimDevice>> {
        self.devices.get(name).cloned()
    }
}

impl Namespace for SimNamespace {
    fn resolve_device(&self, name: &str) -> BindResult<Arc<dyn Device>> {
        if let Some(reason) = self.invalid.get(name) {
            return Err(BindError::Invalid { name: name.to_string(), reason: reason.clone() });
        }
        self.devices
            .get(name)
            .map(|device| Arc::clone(device) as Arc<dyn Device>)
            .ok_or_else(|| BindError::NotFound { kind: "device", name: name.to_string() })
    }

    fn resolve_point(&self, name: &str) -> BindResult<Arc<dyn Signal>> {
        self.points
            .get(name)
            .map(|signal| Arc::clone(signal) as Arc<dyn Signal>)
            .ok_or_else(|| BindError::NotFound { kind: "point", name: name.to_string() })
    }

    fn resolve_tool(&self, tool: &Tool) -> BindResult<Arc<dyn ToolProcedure>> {
        if let Some(procedure) = self.tools.get(tool.name()) {
            return Ok(Arc::clone(procedure));
        }
        match tool {
            Tool::Ping(ping) if self.system_tools => Ok(Arc::new(PingProcedure::new(ping.clone()))),
            _ => Err(BindError::Unsupported { what: format!("tool {}", tool.name()) }),
        }
    }
}
