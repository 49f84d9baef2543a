//! One intercepted invocation and the identity used to aggregate it.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::timer::Timer;

/// Kind of invocation an execution node records.
///
/// Declaration order is the primary sort key of [`NodeKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Synthetic root of a thread's call tree.
    Root,
    /// Customer-domain API layered on the platform.
    CustomApi,
    /// Platform database API.
    MxApi,
    /// Server page request.
    Jsp,
    /// Managed-code program unit.
    Jpo,
    /// Managed-code program run by the trigger dispatcher.
    JavaTrigger,
    /// Script program run by the trigger dispatcher.
    TclTrigger,
    /// The trigger dispatcher itself.
    TriggerManager,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Root,
        Category::CustomApi,
        Category::MxApi,
        Category::Jsp,
        Category::Jpo,
        Category::JavaTrigger,
        Category::TclTrigger,
        Category::TriggerManager,
    ];

    /// Human-readable label used by report viewers.
    pub fn display_name(self) -> &'static str {
        match self {
            Category::Root => "Thread Root",
            Category::CustomApi => "Custom API",
            Category::MxApi => "Matrix API",
            Category::Jsp => "JSP",
            Category::Jpo => "JPO",
            Category::JavaTrigger => "Trigger (Java)",
            Category::TclTrigger => "Trigger (TCL)",
            Category::TriggerManager => "Trigger Manager",
        }
    }

    /// Stable machine tag, identical to the serialized form.
    pub fn tag(self) -> &'static str {
        match self {
            Category::Root => "ROOT",
            Category::CustomApi => "CUSTOM_API",
            Category::MxApi => "MX_API",
            Category::Jsp => "JSP",
            Category::Jpo => "JPO",
            Category::JavaTrigger => "JAVA_TRIGGER",
            Category::TclTrigger => "TCL_TRIGGER",
            Category::TriggerManager => "TRIGGER_MANAGER",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Opaque identifier of an application thread.
///
/// Assigned from a process-wide counter the first time a thread asks for
/// its id, so ids are never reused while the process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

impl ThreadId {
    pub fn current() -> Self {
        CURRENT_THREAD_ID.with(|id| {
            if id.get() == 0 {
                id.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
            }
            ThreadId(id.get())
        })
    }

    pub fn from_raw(raw: u64) -> Self {
        ThreadId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// Aggregation identity of an execution node: arguments and timing excluded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub category: Category,
    pub target: String,
    pub method: String,
}

/// Record of a single intercepted invocation.
///
/// Identity fields are fixed at construction. Only the timer and the
/// self-time written by the report builder change afterwards.
#[derive(Debug)]
pub struct ExecutionNode {
    key: NodeKey,
    arguments: Vec<String>,
    thread: ThreadId,
    timer: Timer,
    self_ns: AtomicU64,
}

impl ExecutionNode {
    /// A node owned by the calling thread.
    pub fn new(
        category: Category,
        target: impl Into<String>,
        method: impl Into<String>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            key: NodeKey {
                category,
                target: target.into(),
                method: method.into(),
            },
            arguments,
            thread: ThreadId::current(),
            timer: Timer::new(),
            self_ns: AtomicU64::new(0),
        }
    }

    pub(crate) fn root(thread: ThreadId) -> Self {
        Self::new(Category::Root, "Root", "", Vec::new()).on_thread(thread)
    }

    /// Attribute the node to `thread` instead of the constructing thread.
    pub fn on_thread(mut self, thread: ThreadId) -> Self {
        self.thread = thread;
        self
    }

    /// Replace the node's timer, e.g. with one that already holds a measurement.
    pub fn with_timer(mut self, timer: Timer) -> Self {
        self.timer = timer;
        self
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn category(&self) -> Category {
        self.key.category
    }

    pub fn target(&self) -> &str {
        &self.key.target
    }

    pub fn method(&self) -> &str {
        &self.key.method
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn total_ns(&self) -> u64 {
        self.timer.elapsed_ns()
    }

    /// Exclusive time, valid after a report has been built.
    pub fn self_ns(&self) -> u64 {
        self.self_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn set_self_ns(&self, ns: u64) {
        self.self_ns.store(ns, Ordering::Relaxed);
    }
}

/// Nodes compare by identity only.
impl PartialEq for ExecutionNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ExecutionNode {}
