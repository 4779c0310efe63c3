//! Running a prepared tree
//!
//! A run resets every node, builds a fresh [`DataCache`], and evaluates the
//! tree with all sibling branches in flight together. Each node moves
//! `Incomplete -> Running -> {Success, Warning, Error, InternalError}`; a
//! parent aggregates only once every child has finished.
//!
//! Node state is held by a [`StatusGuard`] while the node runs. If the run is
//! abandoned (the future is dropped on cancellation) the guard puts the node
//! back to `Incomplete` instead of leaving it `Running`.

use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use log::{info, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::{DataCache, SampleRole};
use crate::comparison::{Comparison, EvalContext};
use crate::dynamic::ResolvedTargets;
use crate::errors::EngineError;
use crate::identifier::{Identifier, NodeId};
use crate::prepare::{
    BoundSource, PreparedComparison, PreparedConfiguration, PreparedFile, PreparedGroup, PreparedNode,
    PreparedTarget, PreparedTool,
};
use crate::reduce::{reduce, ReduceMethod};
use crate::result::{combine, combine_with_mode, CheckResult, Severity};
use crate::traits::Signal;
use crate::value::Value;

/// Lifecycle of one prepared node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Not run, or reset
    #[default]
    Incomplete,
    /// Run in progress
    Running,
    /// Finished with `success`
    Success,
    /// Finished with `warning`
    Warning,
    /// Finished with `error`
    Error,
    /// Finished with `internal_error`
    InternalError,
}

impl NodeState {
    /// Terminal state for a severity
    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Success => Self::Success,
            Severity::Warning => Self::Warning,
            Severity::Error => Self::Error,
            Severity::InternalError => Self::InternalError,
        }
    }

    /// True once a result has been produced
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Incomplete | Self::Running)
    }
}

/// Marks a node `Running` for its lifetime; resets it if dropped unfinished
pub struct StatusGuard<'a> {
    state: &'a mut NodeState,
    finished: bool,
}

impl<'a> StatusGuard<'a> {
    /// Enter `Running`
    pub fn enter(state: &'a mut NodeState) -> Self {
        *state = NodeState::Running;
        Self { state, finished: false }
    }

    /// Leave `Running` for the terminal state of `severity`
    pub fn finish(mut self, severity: Severity) {
        *self.state = NodeState::from_severity(severity);
        self.finished = true;
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state = NodeState::Incomplete;
        }
    }
}

/// Run a prepared file, returning the file-level result
pub async fn run(file: &mut PreparedFile) -> CheckResult {
    file.clear_results();
    let cache = DataCache::new(file.settings.clone());
    info!("checkout {:?} started", file.root.name);
    let result = run_group(&mut file.root, &cache).await;
    info!("checkout {:?} finished: {} ({} acquisitions)", file.root.name, result.severity, cache.len());
    result
}

/// Run a prepared file until it finishes or `token` is cancelled
///
/// On cancellation every in-flight acquisition is dropped and nodes that had
/// not finished are left `Incomplete`.
pub async fn run_with_cancel(file: &mut PreparedFile, token: &CancellationToken) -> Result<CheckResult, EngineError> {
    file.clear_results();
    let cache = DataCache::new(file.settings.clone());
    info!("checkout {:?} started", file.root.name);
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(EngineError::Cancelled),
        result = run_group(&mut file.root, &cache) => Ok(result),
    };
    match &outcome {
        Ok(result) => info!("checkout {:?} finished: {}", file.root.name, result.severity),
        Err(_) => warn!("checkout {:?} cancelled", file.root.name),
    }
    outcome
}

fn run_node<'a>(node: &'a mut PreparedNode, cache: &'a DataCache) -> BoxFuture<'a, CheckResult> {
    match node {
        PreparedNode::Group(group) => run_group(group, cache),
        PreparedNode::Configuration(config) => run_configuration(config, cache).boxed(),
    }
}

fn run_group<'a>(group: &'a mut PreparedGroup, cache: &'a DataCache) -> BoxFuture<'a, CheckResult> {
    async move {
        let PreparedGroup { mode, children, state, result, .. } = group;
        let guard = StatusGuard::enter(state);
        let results = join_all(children.iter_mut().map(|child| run_node(child, cache))).await;
        let combined = combine_with_mode(&results, *mode);
        *result = combined.clone();
        guard.finish(combined.severity);
        combined
    }
    .boxed()
}

async fn run_configuration(config: &mut PreparedConfiguration, cache: &DataCache) -> CheckResult {
    let PreparedConfiguration { id, name, comparisons, tool, state, result, .. } = config;
    let guard = StatusGuard::enter(state);
    let (id, tool) = (*id, tool.as_ref());
    let results = join_all(comparisons.iter_mut().map(|pc| run_comparison(pc, id, tool, cache))).await;
    let combined = combine(&results);
    trace!("configuration {name:?}: {combined}");
    *result = combined.clone();
    guard.finish(combined.severity);
    combined
}

async fn run_comparison(
    pc: &mut PreparedComparison,
    config_id: NodeId,
    tool: Option<&PreparedTool>,
    cache: &DataCache,
) -> CheckResult {
    let PreparedComparison { comparison, identifier, source, targets, state, result, observed, resolved, .. } = pc;
    let guard = StatusGuard::enter(state);

    let evaluation = match source {
        BoundSource::Unbound { reason } => Evaluation::failed(CheckResult::internal_error(format!("{identifier}: {reason}"))),
        BoundSource::Signal(signal) => evaluate_signal(comparison, identifier, signal, targets, cache).await,
        BoundSource::ToolKey { key } => evaluate_tool_key(comparison, identifier, key, tool, config_id, targets, cache).await,
    };

    trace!("{identifier} {}: {}", comparison.label(), evaluation.result);
    *observed = evaluation.observed;
    *resolved = evaluation.resolved;
    *result = evaluation.result.clone();
    guard.finish(evaluation.result.severity);
    evaluation.result
}

/// What one comparison produced in a run
struct Evaluation {
    result: CheckResult,
    observed: Option<Value>,
    resolved: ResolvedTargets,
}

impl Evaluation {
    fn failed(result: CheckResult) -> Self {
        Self { result, observed: None, resolved: ResolvedTargets::new() }
    }
}

/// Single-sample windows ignore the configured method
fn effective_method(period: std::time::Duration, method: ReduceMethod) -> ReduceMethod {
    if period.is_zero() {
        ReduceMethod::Single
    } else {
        method
    }
}

fn disconnected(comparison: &Comparison, identifier: &Identifier, reason: Option<&str>) -> CheckResult {
    let reason = reason.unwrap_or("source disconnected");
    CheckResult::new(comparison.if_disconnected, format!("{identifier}: {reason}"))
}

fn attributed(identifier: &Identifier, result: CheckResult) -> CheckResult {
    CheckResult {
        severity: result.severity,
        reason: result.reason.into_iter().map(|r| format!("{identifier}: {r}")).collect(),
    }
}

/// Observation and targets acquired together, then reduced and evaluated
async fn evaluate_signal(
    comparison: &Comparison,
    identifier: &Identifier,
    signal: &Arc<dyn Signal>,
    targets: &[PreparedTarget],
    cache: &DataCache,
) -> Evaluation {
    let window = comparison.reduce_window();
    let (acquisition, resolved) = tokio::join!(
        cache.acquire(SampleRole::Observed, identifier, signal, window),
        resolve_targets(comparison, identifier, targets, cache),
    );

    if !acquisition.connected {
        return Evaluation::failed(disconnected(comparison, identifier, acquisition.reason.as_deref()));
    }
    let value = match reduce(&acquisition.samples, effective_method(window, comparison.reduce_method)) {
        Ok(value) => value,
        Err(err) => return Evaluation::failed(CheckResult::internal_error(format!("{identifier}: {err}"))),
    };
    let resolved = match resolved {
        Ok(resolved) => resolved,
        Err(result) => return Evaluation { result, observed: Some(value), resolved: ResolvedTargets::new() },
    };

    let options = signal.enum_options();
    let ctx = EvalContext::new(&resolved).with_enum_options(options.as_deref());
    let result = attributed(identifier, comparison.evaluate(&value, &ctx));
    Evaluation { result, observed: Some(value), resolved }
}

/// Tool result key looked up from the single tool run of this configuration
async fn evaluate_tool_key(
    comparison: &Comparison,
    identifier: &Identifier,
    key: &str,
    tool: Option<&PreparedTool>,
    config_id: NodeId,
    targets: &[PreparedTarget],
    cache: &DataCache,
) -> Evaluation {
    let Some(tool) = tool else {
        return Evaluation::failed(CheckResult::internal_error(format!("{identifier}: tool was not resolved")));
    };
    let (run, resolved) = tokio::join!(
        cache.run_tool(config_id, &tool.procedure),
        resolve_targets(comparison, identifier, targets, cache),
    );

    let output = match &*run {
        Ok(output) => output,
        Err(err) => return Evaluation::failed(CheckResult::new(comparison.if_disconnected, format!("{identifier}: {err}"))),
    };
    let Some(value) = output.get(key).cloned() else {
        return Evaluation::failed(CheckResult::internal_error(format!("{identifier}: tool produced no value for {key}")));
    };
    let resolved = match resolved {
        Ok(resolved) => resolved,
        Err(result) => return Evaluation { result, observed: Some(value), resolved: ResolvedTargets::new() },
    };

    let ctx = EvalContext::new(&resolved);
    let result = attributed(identifier, comparison.evaluate(&value, &ctx));
    Evaluation { result, observed: Some(value), resolved }
}

/// Acquire and reduce every dynamic target; the first failure becomes the result
async fn resolve_targets(
    comparison: &Comparison,
    identifier: &Identifier,
    targets: &[PreparedTarget],
    cache: &DataCache,
) -> Result<ResolvedTargets, CheckResult> {
    let acquisitions = join_all(targets.iter().map(|target| async move {
        let source = target.dynamic.identifier();
        let window = target.dynamic.window();
        let acquisition = cache.acquire(SampleRole::Target, &source, &target.signal, window).await;
        (target, source, window, acquisition)
    }))
    .await;

    let mut resolved = ResolvedTargets::new();
    for (target, source, window, acquisition) in acquisitions {
        if !acquisition.connected {
            let reason = acquisition.reason.as_deref().unwrap_or("source disconnected");
            return Err(CheckResult::new(
                comparison.if_disconnected,
                format!("{identifier}: dynamic value {source}: {reason}"),
            ));
        }
        let method = effective_method(window, target.dynamic.reduce_method);
        match reduce(&acquisition.samples, method) {
            Ok(value) => {
                resolved.insert(target.dynamic.key(), value);
            }
            Err(err) => {
                return Err(CheckResult::internal_error(format!(
                    "{identifier}: dynamic value {source}: {err}"
                )));
            }
        }
    }
    Ok(resolved)
}

/// Borrowed view of a prepared node
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    /// A group
    Group(&'a PreparedGroup),
    /// A leaf configuration
    Configuration(&'a PreparedConfiguration),
}

/// Pre-order traversal of a prepared tree
pub struct Walk<'a> {
    stack: Vec<NodeRef<'a>>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        if let NodeRef::Group(group) = node {
            self.stack.extend(group.children.iter().rev().map(|child| match child {
                PreparedNode::Group(g) => NodeRef::Group(g),
                PreparedNode::Configuration(c) => NodeRef::Configuration(c),
            }));
        }
        Some(node)
    }
}

/// Comparison counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Not run yet, or abandoned
    pub incomplete: usize,
    /// Still running
    pub running: usize,
    /// Passed
    pub success: usize,
    /// Warned
    pub warning: usize,
    /// Failed
    pub error: usize,
    /// Could not be evaluated
    pub internal_error: usize,
}

impl RunSummary {
    /// Total comparisons counted
    pub fn total(&self) -> usize {
        self.incomplete + self.running + self.success + self.warning + self.error + self.internal_error
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} comparisons: {} success, {} warning, {} error, {} internal error, {} incomplete",
            self.total(),
            self.success,
            self.warning,
            self.error,
            self.internal_error,
            self.incomplete + self.running,
        )
    }
}

impl PreparedFile {
    /// Every node, root first; a fresh traversal on each call
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![NodeRef::Group(&self.root)] }
    }

    /// Every group, root first
    pub fn walk_groups(&self) -> impl Iterator<Item = &PreparedGroup> + '_ {
        self.walk().filter_map(|node| match node {
            NodeRef::Group(g) => Some(g),
            NodeRef::Configuration(_) => None,
        })
    }

    /// Every leaf configuration, in tree order
    pub fn walk_configurations(&self) -> impl Iterator<Item = &PreparedConfiguration> + '_ {
        self.walk().filter_map(|node| match node {
            NodeRef::Configuration(c) => Some(c),
            NodeRef::Group(_) => None,
        })
    }

    /// Every prepared comparison, in tree order
    pub fn walk_comparisons(&self) -> impl Iterator<Item = &PreparedComparison> + '_ {
        self.walk_configurations().flat_map(|c| c.comparisons.iter())
    }

    /// Prepared comparisons bound from the declarative comparison `id`
    pub fn comparisons_for(&self, id: NodeId) -> impl Iterator<Item = &PreparedComparison> + '_ {
        self.walk_comparisons().filter(move |pc| pc.comparison_id() == id)
    }

    /// Comparison counts per state
    pub fn summary(&self) -> RunSummary {
        self.walk_comparisons().fold(RunSummary::default(), |mut summary, pc| {
            match pc.state() {
                NodeState::Incomplete => summary.incomplete += 1,
                NodeState::Running => summary.running += 1,
                NodeState::Success => summary.success += 1,
                NodeState::Warning => summary.warning += 1,
                NodeState::Error => summary.error += 1,
                NodeState::InternalError => summary.internal_error += 1,
            }
            summary
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_resets_when_dropped_unfinished() {
        let mut state = NodeState::Success;
        {
            let _guard = StatusGuard::enter(&mut state);
        }
        assert_eq!(state, NodeState::Incomplete);

        let guard = StatusGuard::enter(&mut state);
        guard.finish(Severity::Warning);
        assert_eq!(state, NodeState::Warning);
    }

    #[test]
    fn terminal_states() {
        assert!(!NodeState::Incomplete.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        for severity in Severity::ALL {
            assert!(NodeState::from_severity(severity).is_terminal());
        }
    }

    #[test]
    fn summary_display() {
        let summary = RunSummary { success: 2, error: 1, ..RunSummary::default() };
        assert_eq!(summary.total(), 3);
        assert_eq!(
            summary.to_string(),
            "3 comparisons: 2 success, 0 warning, 1 error, 0 internal error, 0 incomplete"
        );
    }
}
