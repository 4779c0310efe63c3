//! Binding a declarative tree to live sources
//!
//! [`prepare`] walks a [`ConfigurationFile`] depth-first and resolves every
//! identifier through a [`Namespace`] exactly once. Resolution failures never
//! abort the walk: the affected comparisons bind to [`BoundSource::Unbound`]
//! and carry an `internal_error` result naming the cause, while their
//! siblings bind normally. Only a malformed tree (one node reachable twice)
//! is rejected outright.
//!
//! Shared comparisons are expanded here, once per identifier of their leaf:
//!
//! | Leaf | Shared comparisons run against |
//! |---|---|
//! | `DeviceConfiguration` | every (device, attribute) pair |
//! | `PVConfiguration` | every point |
//! | `ToolConfiguration` | every listed key, or every result key when none are listed |

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::comparison::Comparison;
use crate::config::{
    ComparisonSlot, ComparisonTable, Configuration, ConfigurationFile, ConfigurationGroup, DeviceConfiguration,
    PvConfiguration, ToolConfiguration,
};
use crate::dynamic::{DynamicSource, DynamicValue, ResolvedTargets};
use crate::errors::{BindError, BindResult, PrepareError};
use crate::identifier::{Identifier, NodeId};
use crate::result::{CheckResult, GroupMode};
use crate::run::NodeState;
use crate::settings::EngineSettings;
use crate::traits::{Namespace, Signal, ToolProcedure};
use crate::value::Value;

/// Live source a comparison reads its observation from
#[derive(Clone)]
pub enum BoundSource {
    /// A resolved signal
    Signal(Arc<dyn Signal>),
    /// A key of the configuration's tool result
    ToolKey {
        /// Result key
        key: String,
    },
    /// Resolution failed; the comparison always reports `internal_error`
    Unbound {
        /// Why resolution failed
        reason: String,
    },
}

impl fmt::Debug for BoundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => f.debug_tuple("Signal").field(&signal.name()).finish(),
            Self::ToolKey { key } => f.debug_struct("ToolKey").field("key", key).finish(),
            Self::Unbound { reason } => f.debug_struct("Unbound").field("reason", reason).finish(),
        }
    }
}

fn bind_signal(outcome: BindResult<Arc<dyn Signal>>, context: &str) -> BoundSource {
    match outcome {
        Ok(signal) => BoundSource::Signal(signal),
        Err(err) => {
            warn!("{context}: {err}");
            BoundSource::Unbound { reason: err.to_string() }
        }
    }
}

/// A dynamic target bound to its signal
#[derive(Clone)]
pub struct PreparedTarget {
    /// Declarative target
    pub dynamic: DynamicValue,
    /// Signal the target is read from
    pub signal: Arc<dyn Signal>,
}

impl fmt::Debug for PreparedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedTarget")
            .field("dynamic", &self.dynamic)
            .field("signal", &self.signal.name())
            .finish()
    }
}

/// A resolved tool procedure
#[derive(Clone)]
pub struct PreparedTool {
    /// Procedure run once per check run
    pub procedure: Arc<dyn ToolProcedure>,
}

impl fmt::Debug for PreparedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedTool").field("name", &self.procedure.name()).finish()
    }
}

/// One comparison bound to one identifier
#[derive(Debug)]
pub struct PreparedComparison {
    /// Declarative comparison, shared with every identifier it applies to
    pub comparison: Arc<Comparison>,
    /// Identifier under test
    pub identifier: Identifier,
    /// Slot of the comparison in its leaf
    pub slot: ComparisonSlot,
    /// Bound observation source
    pub source: BoundSource,
    /// Bound dynamic targets
    pub targets: Vec<PreparedTarget>,
    pub(crate) state: NodeState,
    pub(crate) result: CheckResult,
    pub(crate) observed: Option<Value>,
    pub(crate) resolved: ResolvedTargets,
}

impl PreparedComparison {
    fn new(
        comparison: Arc<Comparison>,
        identifier: Identifier,
        slot: ComparisonSlot,
        source: BoundSource,
        targets: Vec<PreparedTarget>,
    ) -> Self {
        let mut prepared = Self {
            comparison,
            identifier,
            slot,
            source,
            targets,
            state: NodeState::Incomplete,
            result: CheckResult::incomplete(),
            observed: None,
            resolved: ResolvedTargets::new(),
        };
        prepared.clear();
        prepared
    }

    /// Terminal result for a comparison that could not be bound
    pub fn binding_failure(&self) -> Option<CheckResult> {
        match &self.source {
            BoundSource::Unbound { reason } => {
                Some(CheckResult::internal_error(format!("{}: {reason}", self.identifier)))
            }
            _ => None,
        }
    }

    /// Id of the declarative comparison
    pub fn comparison_id(&self) -> NodeId {
        self.comparison.id
    }

    /// Current state
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Result of the last run
    pub fn result(&self) -> &CheckResult {
        &self.result
    }

    /// Reduced observation of the last run
    pub fn observed(&self) -> Option<&Value> {
        self.observed.as_ref()
    }

    /// First resolved dynamic target of the last run
    pub fn dynamic_target(&self) -> Option<&Value> {
        let first = self.targets.first()?;
        self.resolved.get(&first.dynamic.key())
    }

    /// Every resolved dynamic target of the last run
    pub fn resolved_targets(&self) -> &ResolvedTargets {
        &self.resolved
    }

    /// Back to the prepared state; unbound comparisons keep their binding error
    pub(crate) fn clear(&mut self) {
        match self.binding_failure() {
            Some(result) => {
                self.state = NodeState::InternalError;
                self.result = result;
            }
            None => {
                self.state = NodeState::Incomplete;
                self.result = CheckResult::incomplete();
            }
        }
        self.observed = None;
        self.resolved.clear();
    }
}

/// Which kind of leaf a prepared configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// `DeviceConfiguration`
    Device,
    /// `PVConfiguration`
    Pv,
    /// `ToolConfiguration`
    Tool,
}

/// A leaf configuration with its bound comparisons
#[derive(Debug)]
pub struct PreparedConfiguration {
    /// Id of the declarative configuration
    pub id: NodeId,
    /// Configuration name
    pub name: String,
    /// Leaf kind
    pub kind: LeafKind,
    /// Bound comparisons, shared ones expanded per identifier
    pub comparisons: Vec<PreparedComparison>,
    /// Resolved tool, for tool configurations
    pub tool: Option<PreparedTool>,
    pub(crate) state: NodeState,
    pub(crate) result: CheckResult,
}

impl PreparedConfiguration {
    fn new(id: NodeId, name: &str, kind: LeafKind, comparisons: Vec<PreparedComparison>) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            comparisons,
            tool: None,
            state: NodeState::Incomplete,
            result: CheckResult::incomplete(),
        }
    }

    /// Current state
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Result of the last run
    pub fn result(&self) -> &CheckResult {
        &self.result
    }

    pub(crate) fn clear(&mut self) {
        self.state = NodeState::Incomplete;
        self.result = CheckResult::incomplete();
        self.comparisons.iter_mut().for_each(PreparedComparison::clear);
    }
}

/// A group with its prepared children
#[derive(Debug)]
pub struct PreparedGroup {
    /// Id of the declarative group
    pub id: NodeId,
    /// Group name
    pub name: String,
    /// Aggregation mode
    pub mode: GroupMode,
    /// Prepared children, in order
    pub children: Vec<PreparedNode>,
    pub(crate) state: NodeState,
    pub(crate) result: CheckResult,
}

impl PreparedGroup {
    /// Current state
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Result of the last run
    pub fn result(&self) -> &CheckResult {
        &self.result
    }

    pub(crate) fn clear(&mut self) {
        self.state = NodeState::Incomplete;
        self.result = CheckResult::incomplete();
        for child in &mut self.children {
            match child {
                PreparedNode::Group(group) => group.clear(),
                PreparedNode::Configuration(config) => config.clear(),
            }
        }
    }
}

/// Any node of a prepared tree
#[derive(Debug)]
pub enum PreparedNode {
    /// Nested group
    Group(PreparedGroup),
    /// Leaf configuration
    Configuration(PreparedConfiguration),
}

impl PreparedNode {
    /// Current state
    pub fn state(&self) -> NodeState {
        match self {
            Self::Group(g) => g.state,
            Self::Configuration(c) => c.state,
        }
    }

    /// Result of the last run
    pub fn result(&self) -> &CheckResult {
        match self {
            Self::Group(g) => &g.result,
            Self::Configuration(c) => &c.result,
        }
    }
}

/// Prepared counterpart of a [`ConfigurationFile`]
#[derive(Debug)]
pub struct PreparedFile {
    /// Prepared root group
    pub root: PreparedGroup,
    /// Settings used by every run of this file
    pub settings: EngineSettings,
}

impl PreparedFile {
    /// Result of the last run
    pub fn result(&self) -> &CheckResult {
        &self.root.result
    }

    /// Reset every node to `Incomplete`; unbound comparisons keep their binding error
    pub fn clear_results(&mut self) {
        self.root.clear();
    }
}

/// Prepare a file with default engine settings
pub fn prepare(file: &ConfigurationFile, namespace: &dyn Namespace) -> Result<PreparedFile, PrepareError> {
    prepare_with_settings(file, namespace, EngineSettings::default())
}

/// Prepare a file; runs of the result use `settings`
pub fn prepare_with_settings(
    file: &ConfigurationFile,
    namespace: &dyn Namespace,
    settings: EngineSettings,
) -> Result<PreparedFile, PrepareError> {
    check_unique_ids(&file.root)?;
    let root = prepare_group(&file.root, namespace);
    let bound = count_bound(&root);
    debug!("prepared {:?}: {} of {} comparisons bound", file.root.info.name, bound.0, bound.1);
    Ok(PreparedFile { root, settings })
}

/// Prepare one configuration subtree
pub fn prepare_node(config: &Configuration, namespace: &dyn Namespace) -> Result<PreparedNode, PrepareError> {
    let mut seen = HashSet::new();
    reject_duplicates(config.node_ids(), &mut seen)?;
    Ok(prepare_config(config, namespace))
}

fn check_unique_ids(root: &ConfigurationGroup) -> Result<(), PrepareError> {
    let mut seen = HashSet::new();
    reject_duplicates([(root.info.id, root.info.name.clone())], &mut seen)?;
    for child in &root.configs {
        reject_duplicates(child.node_ids(), &mut seen)?;
    }
    Ok(())
}

fn reject_duplicates<I>(ids: I, seen: &mut HashSet<NodeId>) -> Result<(), PrepareError>
where
    I: IntoIterator<Item = (NodeId, String)>,
{
    for (id, name) in ids {
        if !seen.insert(id) {
            return Err(PrepareError::DuplicateNode { id, name });
        }
    }
    Ok(())
}

fn count_bound(group: &PreparedGroup) -> (usize, usize) {
    group.children.iter().fold((0, 0), |(bound, total), child| {
        let (b, t) = match child {
            PreparedNode::Group(g) => count_bound(g),
            PreparedNode::Configuration(c) => {
                let b = c.comparisons.iter().filter(|pc| pc.binding_failure().is_none()).count();
                (b, c.comparisons.len())
            }
        };
        (bound + b, total + t)
    })
}

fn prepare_config(config: &Configuration, namespace: &dyn Namespace) -> PreparedNode {
    match config {
        Configuration::ConfigurationGroup(group) => PreparedNode::Group(prepare_group(group, namespace)),
        Configuration::DeviceConfiguration(c) => PreparedNode::Configuration(prepare_device(c, namespace)),
        Configuration::PvConfiguration(c) => PreparedNode::Configuration(prepare_pv(c, namespace)),
        Configuration::ToolConfiguration(c) => PreparedNode::Configuration(prepare_tool(c, namespace)),
    }
}

fn prepare_group(group: &ConfigurationGroup, namespace: &dyn Namespace) -> PreparedGroup {
    PreparedGroup {
        id: group.info.id,
        name: group.info.name.clone(),
        mode: group.mode,
        children: group.configs.iter().map(|c| prepare_config(c, namespace)).collect(),
        state: NodeState::Incomplete,
        result: CheckResult::incomplete(),
    }
}

/// Declarative comparisons wrapped once, so every identifier shares the same `Arc`
struct SharedLists {
    by_identifier: Vec<(String, Vec<Arc<Comparison>>)>,
    shared: Vec<Arc<Comparison>>,
}

impl SharedLists {
    fn new(table: &ComparisonTable, shared: &[Comparison]) -> Self {
        let wrap = |list: &[Comparison]| list.iter().cloned().map(Arc::new).collect::<Vec<_>>();
        Self {
            by_identifier: table.iter().map(|(k, v)| (k.clone(), wrap(v))).collect(),
            shared: wrap(shared),
        }
    }

    /// Own comparisons of `identifier`, then the shared ones
    fn for_identifier<'s>(
        &'s self,
        own: Option<&'s [Arc<Comparison>]>,
        identifier: &'s str,
    ) -> impl Iterator<Item = (&'s Arc<Comparison>, ComparisonSlot)> + 's {
        let own = own.unwrap_or(&[]);
        own.iter()
            .map(move |c| (c, ComparisonSlot::Identifier(identifier.to_string())))
            .chain(self.shared.iter().map(|c| (c, ComparisonSlot::Shared)))
    }
}

fn warn_vacuous_shared(name: &str, shared: &[Comparison], identifiers: usize) {
    if identifiers == 0 && !shared.is_empty() {
        warn!("{name}: {} shared comparisons have no identifiers to run against", shared.len());
    }
}

fn prepare_device(c: &DeviceConfiguration, namespace: &dyn Namespace) -> PreparedConfiguration {
    let lists = SharedLists::new(&c.by_attr, &c.shared);
    warn_vacuous_shared(&c.info.name, &c.shared, c.devices.len() * c.by_attr.len());

    let mut comparisons = Vec::new();
    for device_name in &c.devices {
        let device = namespace.resolve_device(device_name);
        if let Err(err) = &device {
            warn!("{}: {err}", c.info.name);
        }
        for (attr, own) in &lists.by_identifier {
            let identifier = Identifier::attribute(device_name.clone(), attr.clone());
            let source = match &device {
                Ok(device) => bind_signal(namespace.resolve_attribute(device.as_ref(), attr), &c.info.name),
                Err(err) => BoundSource::Unbound { reason: err.to_string() },
            };
            for (comparison, slot) in lists.for_identifier(Some(own.as_slice()), attr) {
                comparisons.push(prepare_comparison(comparison, &identifier, slot, source.clone(), namespace));
            }
        }
    }
    PreparedConfiguration::new(c.info.id, &c.info.name, LeafKind::Device, comparisons)
}

fn prepare_pv(c: &PvConfiguration, namespace: &dyn Namespace) -> PreparedConfiguration {
    let lists = SharedLists::new(&c.by_pv, &c.shared);
    warn_vacuous_shared(&c.info.name, &c.shared, c.by_pv.len());

    let mut comparisons = Vec::new();
    for (pvname, own) in &lists.by_identifier {
        let identifier = Identifier::point(pvname.clone());
        let source = bind_signal(namespace.resolve_point(pvname), &c.info.name);
        for (comparison, slot) in lists.for_identifier(Some(own.as_slice()), pvname) {
            comparisons.push(prepare_comparison(comparison, &identifier, slot, source.clone(), namespace));
        }
    }
    PreparedConfiguration::new(c.info.id, &c.info.name, LeafKind::Pv, comparisons)
}

fn prepare_tool(c: &ToolConfiguration, namespace: &dyn Namespace) -> PreparedConfiguration {
    let lists = SharedLists::new(&c.by_key, &c.shared);
    let tool_name = c.tool.name();
    let procedure = namespace.resolve_tool(&c.tool);
    if let Err(err) = &procedure {
        warn!("{}: {err}", c.info.name);
    }
    let known_keys = match &procedure {
        Ok(procedure) => procedure.result_keys(),
        Err(_) => c.tool.result_keys(),
    };

    // Listed keys, then every remaining result key when only shared comparisons exist
    let mut keys: Vec<String> = lists.by_identifier.iter().map(|(k, _)| k.clone()).collect();
    if keys.is_empty() {
        keys = known_keys.clone();
    }
    warn_vacuous_shared(&c.info.name, &c.shared, keys.len());

    let mut comparisons = Vec::new();
    for key in &keys {
        let identifier = Identifier::tool_key(tool_name, key.clone());
        let source = match &procedure {
            Err(err) => BoundSource::Unbound { reason: err.to_string() },
            Ok(_) if !known_keys.contains(key) => {
                let err = BindError::NoSuchResultKey { tool: tool_name.to_string(), key: key.clone() };
                warn!("{}: {err}", c.info.name);
                BoundSource::Unbound { reason: err.to_string() }
            }
            Ok(_) => BoundSource::ToolKey { key: key.clone() },
        };
        let own = lists.by_identifier.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_slice());
        for (comparison, slot) in lists.for_identifier(own, key) {
            comparisons.push(prepare_comparison(comparison, &identifier, slot, source.clone(), namespace));
        }
    }

    let mut prepared = PreparedConfiguration::new(c.info.id, &c.info.name, LeafKind::Tool, comparisons);
    prepared.tool = procedure.ok().map(|procedure| PreparedTool { procedure });
    prepared
}

fn prepare_comparison(
    comparison: &Arc<Comparison>,
    identifier: &Identifier,
    slot: ComparisonSlot,
    mut source: BoundSource,
    namespace: &dyn Namespace,
) -> PreparedComparison {
    let mut targets = Vec::new();
    for dynamic in comparison.dynamic_values() {
        match bind_dynamic(dynamic, namespace) {
            Ok(signal) => targets.push(PreparedTarget { dynamic: dynamic.clone(), signal }),
            Err(err) => {
                warn!("{identifier}: dynamic value {}: {err}", dynamic.identifier());
                if !matches!(source, BoundSource::Unbound { .. }) {
                    source = BoundSource::Unbound {
                        reason: format!("dynamic value {}: {err}", dynamic.identifier()),
                    };
                }
            }
        }
    }
    PreparedComparison::new(Arc::clone(comparison), identifier.clone(), slot, source, targets)
}

fn bind_dynamic(dynamic: &DynamicValue, namespace: &dyn Namespace) -> BindResult<Arc<dyn Signal>> {
    match &dynamic.source {
        DynamicSource::Point { pvname } => namespace.resolve_point(pvname),
        DynamicSource::DeviceAttribute { device_name, attribute } => {
            let device = namespace.resolve_device(device_name)?;
            namespace.resolve_attribute(device.as_ref(), attribute)
        }
    }
}
