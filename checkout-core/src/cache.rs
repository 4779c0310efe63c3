//! Per-run acquisition cache with single-flight semantics
//!
//! Every comparison of a run asks the cache for its samples. The first caller
//! for a key performs the connection wait and sample window; concurrent and
//! later callers for the same key await that one acquisition. A fresh cache
//! is built for each run and dropped at the end, so nothing read in one run
//! is ever served to the next.
//!
//! ```text
//! key = (role, identifier, window)
//!
//! caller A ──┐
//! caller B ──┼─> OnceCell ──> wait_connected ──> read, sleep, read, ... ──> Arc<Acquisition>
//! caller C ──┘        (one initializer, everyone else awaits)
//! ```
//!
//! Observed values and dynamic targets use different roles, so a comparison
//! whose target lives on the same point as its observation still gets two
//! independent lifecycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::sync::OnceCell;

use crate::errors::ToolError;
use crate::identifier::{Identifier, NodeId};
use crate::reduce::{sample_plan, SamplePlan, MAX_SAMPLES};
use crate::settings::EngineSettings;
use crate::traits::{Reading, Signal, ToolOutput, ToolProcedure};
use crate::value::Value;

/// What an acquisition is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleRole {
    /// The value under test
    Observed,
    /// A dynamic comparison target
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    role: SampleRole,
    source: Identifier,
    period: Duration,
}

/// Samples gathered for one key
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// Samples in read order
    pub samples: Vec<Value>,
    /// False if the source was unreachable at any point of the window
    pub connected: bool,
    /// Why the acquisition is disconnected
    pub reason: Option<String>,
}

impl Acquisition {
    fn connected(samples: Vec<Value>) -> Self {
        Self { samples, connected: true, reason: None }
    }

    fn disconnected(reason: String) -> Self {
        Self { samples: Vec::new(), connected: false, reason: Some(reason) }
    }
}

/// Outcome of one tool run, shared by every comparison on the tool
pub type ToolRun = Result<ToolOutput, ToolError>;

type Cell<T> = Arc<OnceCell<Arc<T>>>;

/// Acquisition cache for a single run
#[derive(Debug)]
pub struct DataCache {
    settings: EngineSettings,
    signals: Mutex<HashMap<CacheKey, Cell<Acquisition>>>,
    tools: Mutex<HashMap<NodeId, Cell<ToolRun>>>,
}

impl DataCache {
    /// Empty cache
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            signals: Mutex::new(HashMap::new()),
            tools: Mutex::new(HashMap::new()),
        }
    }

    /// Settings the cache acquires with
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Number of distinct signal acquisitions started this run
    pub fn len(&self) -> usize {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing has been acquired yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn signal_cell(&self, key: CacheKey) -> Cell<Acquisition> {
        let mut map = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key).or_default())
    }

    fn tool_cell(&self, id: NodeId) -> Cell<ToolRun> {
        let mut map = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(id).or_default())
    }

    /// Samples for `identifier` over `period`, acquired at most once per run
    pub async fn acquire(
        &self,
        role: SampleRole,
        identifier: &Identifier,
        signal: &Arc<dyn Signal>,
        period: Duration,
    ) -> Arc<Acquisition> {
        let key = CacheKey { role, source: identifier.clone(), period };
        let cell = self.signal_cell(key);
        if let Some(hit) = cell.get() {
            debug!("cache hit for {identifier} ({role:?}, {period:?})");
            return Arc::clone(hit);
        }

        let acquisition = cell
            .get_or_init(|| async {
                let plan = sample_plan(period, self.settings.min_samples);
                let acquisition = acquire_window(signal.as_ref(), plan, &self.settings).await;
                debug!(
                    "acquired {identifier} ({role:?}): {} samples, connected={}",
                    acquisition.samples.len(),
                    acquisition.connected
                );
                Arc::new(acquisition)
            })
            .await;
        Arc::clone(acquisition)
    }

    /// Result of the tool for configuration `id`, run at most once per run
    pub async fn run_tool(&self, id: NodeId, tool: &Arc<dyn ToolProcedure>) -> Arc<ToolRun> {
        let cell = self.tool_cell(id);
        let run = cell
            .get_or_init(|| async {
                let bound = self.settings.tool_timeout;
                let outcome = match tokio::time::timeout(bound, tool.run()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ToolError::Timeout { tool: tool.name().to_string(), timeout: bound }),
                };
                debug!("tool {} finished: ok={}", tool.name(), outcome.is_ok());
                Arc::new(outcome)
            })
            .await;
        Arc::clone(run)
    }
}

/// Wait for the connection, then read `plan.count` samples spaced by `plan.interval`
async fn acquire_window(signal: &dyn Signal, plan: SamplePlan, settings: &EngineSettings) -> Acquisition {
    let name = signal.name();
    let bound = settings.connection_timeout;
    let connected = tokio::time::timeout(bound, signal.wait_connected(bound)).await.unwrap_or(false);
    if !connected {
        return Acquisition::disconnected(format!("{name} did not connect within {bound:?}"));
    }

    let mut samples = Vec::with_capacity(plan.count.min(MAX_SAMPLES));
    for index in 0..plan.count {
        if index > 0 {
            tokio::time::sleep(plan.interval).await;
        }
        match tokio::time::timeout(settings.read_timeout, signal.read()).await {
            Ok(Reading { value: Some(value), connected: true }) => samples.push(value),
            Ok(_) => return Acquisition::disconnected(format!("{name} disconnected while reading")),
            Err(_) => {
                return Acquisition::disconnected(format!(
                    "{name} read timed out after {:?}",
                    settings.read_timeout
                ));
            }
        }
    }
    Acquisition::connected(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        reads: AtomicUsize,
        connected: bool,
    }

    impl Counting {
        fn new(connected: bool) -> Arc<Self> {
            Arc::new(Self { reads: AtomicUsize::new(0), connected })
        }
    }

    #[async_trait]
    impl Signal for Counting {
        fn name(&self) -> &str {
            "COUNTING"
        }

        async fn read(&self) -> Reading {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Reading::connected(Value::Int(n as i64))
        }

        async fn wait_connected(&self, timeout: Duration) -> bool {
            if !self.connected {
                tokio::time::sleep(timeout).await;
            }
            self.connected
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_read() {
        let cache = DataCache::new(EngineSettings::default());
        let counting = Counting::new(true);
        let signal: Arc<dyn Signal> = counting.clone();
        let id = Identifier::point("X");

        let (a, b) = tokio::join!(
            cache.acquire(SampleRole::Observed, &id, &signal, Duration::ZERO),
            cache.acquire(SampleRole::Observed, &id, &signal, Duration::ZERO),
        );
        assert_eq!(a, b);
        assert_eq!(counting.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn roles_are_cached_separately() {
        let cache = DataCache::new(EngineSettings::default());
        let counting = Counting::new(true);
        let signal: Arc<dyn Signal> = counting.clone();
        let id = Identifier::point("X");

        cache.acquire(SampleRole::Observed, &id, &signal, Duration::ZERO).await;
        cache.acquire(SampleRole::Target, &id, &signal, Duration::ZERO).await;
        assert_eq!(counting.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn window_reads_min_samples() {
        let cache = DataCache::new(EngineSettings::default().with_min_samples(4));
        let counting = Counting::new(true);
        let signal: Arc<dyn Signal> = counting.clone();

        let acquisition = cache
            .acquire(SampleRole::Observed, &Identifier::point("X"), &signal, Duration::from_secs(3))
            .await;
        assert!(acquisition.connected);
        assert_eq!(acquisition.samples, vec![Value::Int(0), Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_source_times_out() {
        let cache = DataCache::new(EngineSettings::default());
        let signal: Arc<dyn Signal> = Counting::new(false);

        let start = tokio::time::Instant::now();
        let acquisition = cache
            .acquire(SampleRole::Observed, &Identifier::point("X"), &signal, Duration::ZERO)
            .await;
        assert!(!acquisition.connected);
        assert!(acquisition.samples.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    /// Never connects and ignores the timeout it is given
    struct Stubborn;

    #[async_trait]
    impl Signal for Stubborn {
        fn name(&self) -> &str {
            "STUBBORN"
        }

        async fn read(&self) -> Reading {
            Reading::disconnected()
        }

        async fn wait_connected(&self, _timeout: Duration) -> bool {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connection_wait_is_bounded_by_the_engine() {
        let cache = DataCache::new(EngineSettings::default());
        let signal: Arc<dyn Signal> = Arc::new(Stubborn);

        let start = tokio::time::Instant::now();
        let acquisition = cache
            .acquire(SampleRole::Observed, &Identifier::point("X"), &signal, Duration::ZERO)
            .await;
        assert!(!acquisition.connected);
        assert!(acquisition.reason.as_deref().unwrap().contains("did not connect"));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn identifiers_with_equal_canonical_forms_are_distinct() {
        let cache = DataCache::new(EngineSettings::default());
        let point = Counting::new(true);
        let attribute = Counting::new(true);
        let point_signal: Arc<dyn Signal> = point.clone();
        let attribute_signal: Arc<dyn Signal> = attribute.clone();
        let as_point = Identifier::point("m1.readback");
        let as_attribute = Identifier::attribute("m1", "readback");
        assert_eq!(as_point.canonical(), as_attribute.canonical());

        cache.acquire(SampleRole::Observed, &as_point, &point_signal, Duration::ZERO).await;
        cache.acquire(SampleRole::Observed, &as_attribute, &attribute_signal, Duration::ZERO).await;
        assert_eq!(point.reads.load(Ordering::SeqCst), 1);
        assert_eq!(attribute.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 2);
    }

    struct Slow;

    #[async_trait]
    impl ToolProcedure for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn result_keys(&self) -> Vec<String> {
            Vec::new()
        }

        async fn run(&self) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tool_runs_are_bounded() {
        let cache = DataCache::new(EngineSettings::default());
        let tool: Arc<dyn ToolProcedure> = Arc::new(Slow);
        let run = cache.run_tool(NodeId::fresh(), &tool).await;
        assert!(matches!(run.as_ref(), Err(ToolError::Timeout { .. })));
    }
}
