//! Common stubs for integration tests
//!
//! This module provides:
//! - Stub signals with scripted values and read counters
//! - A stub naming service with not-found and invalid entries
//! - A stub tool procedure that counts its runs

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checkout_core::config::Tool;
use checkout_core::errors::{BindError, BindResult, ToolError};
use checkout_core::traits::{Device, Namespace, Reading, Signal, ToolOutput, ToolProcedure};
use checkout_core::Value;

/// Signal returning scripted values, then repeating the last one
pub struct StubSignal {
    name: String,
    script: Mutex<VecDeque<Value>>,
    last: Mutex<Value>,
    connected: bool,
    options: Option<Vec<String>>,
    reads: AtomicUsize,
}

impl StubSignal {
    /// Connected signal with a constant value
    pub fn constant(name: &str, value: impl Into<Value>) -> Arc<Self> {
        Self::scripted(name, vec![value.into()])
    }

    /// Connected signal returning `values` in order
    pub fn scripted(name: &str, values: Vec<Value>) -> Arc<Self> {
        let last = values.last().cloned().unwrap_or(Value::Int(0));
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(values.into()),
            last: Mutex::new(last),
            connected: true,
            options: None,
            reads: AtomicUsize::new(0),
        })
    }

    /// Signal that never connects
    pub fn disconnected(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Value::Int(0)),
            connected: false,
            options: None,
            reads: AtomicUsize::new(0),
        })
    }

    /// Enumerated signal reporting an index
    pub fn enumerated(name: &str, index: i64, options: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Value::Int(index)),
            connected: true,
            options: Some(options.iter().map(|s| s.to_string()).collect()),
            reads: AtomicUsize::new(0),
        })
    }

    /// Reads performed so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signal for StubSignal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Reading {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            return Reading::disconnected();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(value) = next {
            *last = value;
        }
        Reading::connected(last.clone())
    }

    async fn wait_connected(&self, timeout: Duration) -> bool {
        if !self.connected {
            tokio::time::sleep(timeout).await;
        }
        self.connected
    }

    fn enum_options(&self) -> Option<Vec<String>> {
        self.options.clone()
    }
}

/// Device with a fixed attribute table
pub struct StubDevice {
    name: String,
    attributes: HashMap<String, Arc<StubSignal>>,
}

impl Device for StubDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, path: &str) -> BindResult<Arc<dyn Signal>> {
        self.attributes
            .get(path)
            .map(|s| Arc::clone(s) as Arc<dyn Signal>)
            .ok_or_else(|| BindError::NoSuchAttribute { device: self.name.clone(), attribute: path.to_string() })
    }
}

/// Tool returning fixed output and counting runs
pub struct StubTool {
    keys: Vec<String>,
    output: Result<ToolOutput, ToolError>,
    runs: AtomicUsize,
}

impl StubTool {
    /// Tool with the given output, declaring its keys
    pub fn new(output: Result<ToolOutput, ToolError>) -> Arc<Self> {
        let keys = match &output {
            Ok(output) => output.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        Arc::new(Self { keys, output, runs: AtomicUsize::new(0) })
    }

    /// Tool declaring the result keys of `tool` whose runs fail with `err`
    pub fn failing(tool: &Tool, err: ToolError) -> Arc<Self> {
        Arc::new(Self { keys: tool.result_keys(), output: Err(err), runs: AtomicUsize::new(0) })
    }

    /// Runs performed so far
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProcedure for StubTool {
    fn name(&self) -> &str {
        "ping"
    }

    fn result_keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    async fn run(&self) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.output.clone()
    }
}

/// Naming service over in-memory tables
#[derive(Default)]
pub struct StubNamespace {
    points: HashMap<String, Arc<StubSignal>>,
    devices: HashMap<String, HashMap<String, Arc<StubSignal>>>,
    invalid: HashSet<String>,
    tool: Option<Arc<StubTool>>,
}

impl StubNamespace {
    /// Empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a point
    pub fn point(mut self, signal: Arc<StubSignal>) -> Self {
        self.points.insert(signal.name().to_string(), signal);
        self
    }

    /// Register a device attribute
    pub fn attribute(mut self, device: &str, attribute: &str, signal: Arc<StubSignal>) -> Self {
        self.devices.entry(device.to_string()).or_default().insert(attribute.to_string(), signal);
        self
    }

    /// Register a name that resolves to a broken entry
    pub fn invalid(mut self, name: &str) -> Self {
        self.invalid.insert(name.to_string());
        self
    }

    /// Register the tool procedure
    pub fn tool(mut self, tool: Arc<StubTool>) -> Self {
        self.tool = Some(tool);
        self
    }
}

impl Namespace for StubNamespace {
    fn resolve_device(&self, name: &str) -> BindResult<Arc<dyn Device>> {
        if self.invalid.contains(name) {
            return Err(BindError::Invalid { name: name.to_string(), reason: "failed to instantiate".into() });
        }
        let attributes = self
            .devices
            .get(name)
            .ok_or_else(|| BindError::NotFound { kind: "device", name: name.to_string() })?;
        Ok(Arc::new(StubDevice { name: name.to_string(), attributes: attributes.clone() }))
    }

    fn resolve_point(&self, name: &str) -> BindResult<Arc<dyn Signal>> {
        self.points
            .get(name)
            .map(|s| Arc::clone(s) as Arc<dyn Signal>)
            .ok_or_else(|| BindError::NotFound { kind: "point", name: name.to_string() })
    }

    fn resolve_tool(&self, tool: &Tool) -> BindResult<Arc<dyn ToolProcedure>> {
        match &self.tool {
            Some(stub) => Ok(Arc::clone(stub) as Arc<dyn ToolProcedure>),
            None => Err(BindError::Unsupported { what: format!("tool {}", tool.name()) }),
        }
    }
}

/// Ping-shaped output for the given alive and dead hosts
pub fn ping_output(alive: &[&str], dead: &[&str]) -> ToolOutput {
    let mut out = BTreeMap::new();
    out.insert("alive".into(), Value::List(alive.iter().map(|h| Value::from(*h)).collect()));
    out.insert("num_alive".into(), Value::Int(alive.len() as i64));
    out.insert("unresponsive".into(), Value::List(dead.iter().map(|h| Value::from(*h)).collect()));
    out.insert("num_unresponsive".into(), Value::Int(dead.len() as i64));
    out.insert("min_time".into(), Value::Float(0.5));
    out.insert("max_time".into(), Value::Float(1.5));
    for host in alive {
        out.insert(format!("times.{host}"), Value::Float(1.0));
    }
    for host in dead {
        out.insert(format!("times.{host}"), Value::Float(-1.0));
    }
    out
}
