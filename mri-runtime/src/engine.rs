//! The profiling engine.
//!
//! One `Profiler` owns all accumulated state: per-thread call trees, the
//! invocation index, trigger occurrence and missing-trigger counts, and
//! dispatcher instantiation timings. The interception layer holds it by
//! reference (typically in an `Arc`) and drives it through `push`/`pop`; a
//! management surface drives it through `start`/`stop`/`clear`/
//! `generate_report`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::activation::Activation;
use crate::cache::TriggerCache;
use crate::config::ProfilerConfig;
use crate::error::Error;
use crate::index::InvocationIndex;
use crate::node::{ExecutionNode, ThreadId};
use crate::report::{build_report, Report, ReportInput, TriggerTally};
use crate::timer::Timer;
use crate::tracker::CallStackTracker;
use crate::trigger::{TriggerDefinition, TriggerId, TriggerSource};

pub struct Profiler {
    config: ProfilerConfig,
    activation: Arc<Activation>,
    tracker: CallStackTracker,
    index: InvocationIndex,
    cache: TriggerCache,
    triggers: Mutex<HashMap<TriggerId, TriggerTally>>,
    missing_triggers: Mutex<BTreeMap<String, u64>>,
    dispatcher_instances: Mutex<Vec<Timer>>,
}

impl Profiler {
    pub fn new(source: Arc<dyn TriggerSource>) -> Self {
        Self::with_config(ProfilerConfig::default(), source)
    }

    pub fn with_config(config: ProfilerConfig, source: Arc<dyn TriggerSource>) -> Self {
        let activation = Arc::new(Activation::new(config.start_active));
        let cache = TriggerCache::new(source, Arc::clone(&activation), config.entry_point.clone());
        Self {
            config,
            activation,
            tracker: CallStackTracker::new(),
            index: InvocationIndex::new(),
            cache,
            triggers: Mutex::new(HashMap::new()),
            missing_triggers: Mutex::new(BTreeMap::new()),
            dispatcher_instances: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Record `node` as the newest active call on its owning thread.
    ///
    /// Returns the node's timer; the caller starts it before running the
    /// wrapped call and stops it before calling [`pop`](Self::pop).
    pub fn push(&self, node: ExecutionNode) -> Timer {
        let node = Arc::new(node);
        let timer = node.timer().clone();
        // Tree before index: a report snapshots the index first, so every
        // indexed node is already present in the trees it walks.
        self.tracker.push(Arc::clone(&node));
        self.index.record(node);
        timer
    }

    /// End the newest active call on the calling thread.
    pub fn pop(&self) -> Result<(), Error> {
        self.tracker.pop(ThreadId::current())
    }

    /// Active call depth of the calling thread.
    pub fn depth(&self) -> usize {
        self.tracker.depth(ThreadId::current())
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    pub fn set_active(&self, active: bool) {
        self.activation.set_active(active);
    }

    pub fn start(&self) {
        self.set_active(true);
        tracing::info!("profiler started");
    }

    pub fn stop(&self) {
        self.set_active(false);
        tracing::info!("profiler stopped");
    }

    /// True if the calling thread is currently inside a managed program the
    /// trigger dispatcher invoked through the host bridge.
    pub fn is_inside_managed_dispatch(&self) -> bool {
        self.tracker
            .is_inside_managed_dispatch(ThreadId::current(), &self.config)
    }

    /// Discard all accumulated profiling data. The trigger definition cache
    /// keeps its contents.
    pub fn clear(&self) {
        self.tracker.clear();
        self.index.clear();
        lock(&self.triggers).clear();
        lock(&self.missing_triggers).clear();
        lock(&self.dispatcher_instances).clear();
        tracing::info!("profiler cleared");
    }

    /// [`clear`](Self::clear) and also empty the trigger definition cache.
    pub fn clear_and_reset(&self) {
        self.clear();
        self.cache.reset();
    }

    pub fn trigger_cache(&self) -> &TriggerCache {
        &self.cache
    }

    /// Register a dispatcher instantiation and return the timer that measures it.
    pub fn add_dispatcher_instance(&self) -> Timer {
        let timer = Timer::new();
        lock(&self.dispatcher_instances).push(timer.clone());
        timer
    }

    /// Count one firing of `definition`.
    pub fn record_trigger(&self, definition: &TriggerDefinition) {
        let mut triggers = lock(&self.triggers);
        triggers
            .entry(definition.id().clone())
            .or_insert_with(|| TriggerTally {
                definition: definition.clone(),
                invocations: 0,
            })
            .invocations += 1;
    }

    /// Count one dispatch of a trigger name with no definitions.
    pub fn record_missing_trigger(&self, name: &str) {
        *lock(&self.missing_triggers)
            .entry(name.to_owned())
            .or_insert(0) += 1;
    }

    /// Account for a dispatcher run over the trigger `names` it was given.
    ///
    /// Every definition found for a name counts as fired; a name with no
    /// definitions counts as missing. Profiling is suspended meanwhile so
    /// that cache population is not itself profiled, and restored even when
    /// the lookup fails.
    pub fn register_dispatch<S: AsRef<str>>(&self, names: &[S]) -> Result<(), Error> {
        let _quiet = self.activation.suspend();
        for name in names {
            let name = name.as_ref();
            match self.cache.get(name)? {
                Some(definitions) => {
                    for definition in &definitions {
                        self.record_trigger(definition);
                    }
                }
                None => self.record_missing_trigger(name),
            }
        }
        Ok(())
    }

    /// Build a report from a snapshot of the current state.
    ///
    /// Meaningful for a finished trace; timers still running are read at
    /// their current value.
    pub fn generate_report(&self) -> Report {
        let index = self.index.snapshot();
        let trees = self.tracker.snapshot();
        let triggers: Vec<TriggerTally> = lock(&self.triggers).values().cloned().collect();
        let missing_triggers = lock(&self.missing_triggers).clone();
        let dispatcher_instances = lock(&self.dispatcher_instances).clone();

        tracing::debug!(
            threads = trees.len(),
            identities = index.len(),
            "building report"
        );
        build_report(&ReportInput {
            trees: &trees,
            index: &index,
            triggers: &triggers,
            missing_triggers: &missing_triggers,
            dispatcher_instances: &dispatcher_instances,
            entry_point: &self.config.entry_point,
            timestamp_ms: timestamp_ms(),
        })
    }

    /// Trigger firings recorded so far, keyed by definition identity.
    pub fn trigger_counts(&self) -> HashMap<TriggerId, u64> {
        lock(&self.triggers)
            .iter()
            .map(|(id, tally)| (id.clone(), tally.invocations))
            .collect()
    }

    /// Missing trigger names and how often each was dispatched.
    pub fn missing_trigger_counts(&self) -> BTreeMap<String, u64> {
        lock(&self.missing_triggers).clone()
    }

    /// Number of threads with a call tree.
    pub fn thread_count(&self) -> usize {
        self.tracker.thread_count()
    }

    /// Number of distinct node identities recorded.
    pub fn identity_count(&self) -> usize {
        self.index.len()
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("active", &self.is_active())
            .field("threads", &self.thread_count())
            .field("identities", &self.identity_count())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
