//! Per-thread call stacks and the call trees they build.
//!
//! Each thread gets a `ThreadStack` on its first push: a call tree rooted at a
//! synthetic node plus the chain of currently active nodes. The stack is
//! stored behind an `Arc<Mutex<_>>` in two places: the thread-keyed map used
//! by push/pop, and a registry of roots that the report builder clones under
//! the lock and then walks without blocking new registrations.
//!
//! Only the owning thread pushes and pops its stack, so the per-stack mutex is
//! uncontended except while a report is being built.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use crate::config::ProfilerConfig;
use crate::error::Error;
use crate::node::{Category, ExecutionNode, ThreadId};
use crate::tree::{CallTree, NodeIdx};

#[derive(Debug)]
struct ThreadStack {
    tree: CallTree,
    /// Active chain, root first. Never empty.
    active: Vec<NodeIdx>,
}

impl ThreadStack {
    fn new(thread: ThreadId, label: String) -> Self {
        Self {
            tree: CallTree::new(thread, label),
            active: vec![NodeIdx::ROOT],
        }
    }

    fn top(&self) -> NodeIdx {
        self.active.last().copied().unwrap_or(NodeIdx::ROOT)
    }
}

type SharedStack = Arc<Mutex<ThreadStack>>;

fn lock(stack: &SharedStack) -> MutexGuard<'_, ThreadStack> {
    stack.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct CallStackTracker {
    stacks: DashMap<ThreadId, SharedStack>,
    roots: Mutex<Vec<SharedStack>>,
}

impl CallStackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `node` under the current top of its owning thread's stack and
    /// make it the new top.
    pub fn push(&self, node: Arc<ExecutionNode>) {
        let thread = node.thread();
        let stack = Arc::clone(
            self.stacks
                .entry(thread)
                .or_insert_with(|| self.register(thread))
                .value(),
        );
        let mut stack = lock(&stack);
        let parent = stack.top();
        let idx = stack.tree.attach(parent, node);
        stack.active.push(idx);
    }

    /// Drop the top of `thread`'s stack.
    pub fn pop(&self, thread: ThreadId) -> Result<(), Error> {
        let stack = match self.stacks.get(&thread) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Err(Error::UnbalancedPop { thread }),
        };
        let mut stack = lock(&stack);
        if stack.active.len() <= 1 {
            return Err(Error::UnbalancedPop { thread });
        }
        stack.active.pop();
        Ok(())
    }

    /// Number of active (pushed, not yet popped) nodes on `thread`.
    pub fn depth(&self, thread: ThreadId) -> usize {
        self.stacks
            .get(&thread)
            .map_or(0, |entry| lock(entry.value()).active.len() - 1)
    }

    /// True if the top of `thread`'s stack is the bridge's low-level dispatch
    /// frame and that frame was entered directly from the dispatcher's entry
    /// point.
    ///
    /// This matches a fixed two-frame shape. If the interception layer
    /// starts wrapping an extra frame in between, it silently stops matching.
    pub fn is_inside_managed_dispatch(&self, thread: ThreadId, config: &ProfilerConfig) -> bool {
        let stack = match self.stacks.get(&thread) {
            Some(entry) => Arc::clone(entry.value()),
            None => return false,
        };
        let stack = lock(&stack);
        if stack.active.len() <= 1 {
            return false;
        }
        let top = stack.top();
        let bridge = stack.tree.node(top);
        if bridge.target() != config.bridge_target
            || !bridge.method().starts_with(&config.bridge_method_prefix)
        {
            return false;
        }
        let Some(parent) = stack.tree.parent(top) else {
            return false;
        };
        let caller = stack.tree.node(parent);
        caller.category() == Category::TriggerManager
            && caller.method().starts_with(&config.entry_point)
    }

    /// Copies of every thread's call tree, in registration order.
    pub fn snapshot(&self) -> Vec<CallTree> {
        let roots: Vec<SharedStack> = {
            let registry = self.roots.lock().unwrap_or_else(|e| e.into_inner());
            registry.clone()
        };
        roots.iter().map(|stack| lock(stack).tree.clone()).collect()
    }

    pub fn thread_count(&self) -> usize {
        self.roots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Forget every stack and tree.
    pub fn clear(&self) {
        self.stacks.clear();
        self.roots.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn register(&self, thread: ThreadId) -> SharedStack {
        let label = if thread == ThreadId::current() {
            match std::thread::current().name() {
                Some(name) => format!("{thread} ({name})"),
                None => thread.to_string(),
            }
        } else {
            thread.to_string()
        };
        tracing::debug!(%thread, %label, "new call stack");
        let stack = Arc::new(Mutex::new(ThreadStack::new(thread, label)));
        self.roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&stack));
        stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(category: Category, target: &str, method: &str) -> Arc<ExecutionNode> {
        Arc::new(ExecutionNode::new(category, target, method, Vec::new()))
    }

    #[test]
    fn push_builds_parent_child_structure() {
        let tracker = CallStackTracker::new();
        let me = ThreadId::current();
        tracker.push(node(Category::Jpo, "emxPart", "create()"));
        tracker.push(node(Category::MxApi, "BusinessObject", "open()"));
        tracker.pop(me).unwrap();
        tracker.push(node(Category::MxApi, "BusinessObject", "close()"));
        tracker.pop(me).unwrap();
        tracker.pop(me).unwrap();

        let trees = tracker.snapshot();
        assert_eq!(trees.len(), 1);
        let tree = &trees[0];
        let top = tree.children(NodeIdx::ROOT);
        assert_eq!(top.len(), 1);
        let kids: Vec<&str> = tree
            .children(top[0])
            .iter()
            .map(|&c| tree.node(c).method())
            .collect();
        assert_eq!(kids, vec!["open()", "close()"]);
    }

    #[test]
    fn matched_push_pop_returns_to_depth_zero() {
        let tracker = CallStackTracker::new();
        let me = ThreadId::current();
        for i in 0..5 {
            tracker.push(node(Category::MxApi, "T", &format!("m{i}")));
        }
        assert_eq!(tracker.depth(me), 5);
        for _ in 0..5 {
            tracker.pop(me).unwrap();
        }
        assert_eq!(tracker.depth(me), 0);
    }

    #[test]
    fn pop_without_stack_is_unbalanced() {
        let tracker = CallStackTracker::new();
        let err = tracker.pop(ThreadId::current()).unwrap_err();
        assert!(matches!(err, Error::UnbalancedPop { .. }));
    }

    #[test]
    fn pop_past_root_is_unbalanced() {
        let tracker = CallStackTracker::new();
        let me = ThreadId::current();
        tracker.push(node(Category::MxApi, "T", "m"));
        tracker.pop(me).unwrap();
        let err = tracker.pop(me).unwrap_err();
        assert!(
            err.to_string().contains("pop() without push()"),
            "unexpected message: {err}"
        );
        // Root survives the failed pop.
        assert_eq!(tracker.snapshot()[0].len(), 2);
    }

    #[test]
    fn first_push_registers_root_once_per_thread() {
        let tracker = CallStackTracker::new();
        tracker.push(node(Category::MxApi, "T", "a"));
        tracker.push(node(Category::MxApi, "T", "b"));
        assert_eq!(tracker.thread_count(), 1);

        let other = ThreadId::from_raw(u64::MAX);
        let foreign = ExecutionNode::new(Category::MxApi, "T", "c", Vec::new()).on_thread(other);
        tracker.push(Arc::new(foreign));
        assert_eq!(tracker.thread_count(), 2);
        assert_eq!(tracker.depth(other), 1);
        assert_eq!(tracker.snapshot()[1].label(), other.to_string());
    }

    #[test]
    fn managed_dispatch_matches_bridge_under_dispatcher_entry() {
        let config = ProfilerConfig::default();
        let tracker = CallStackTracker::new();
        let me = ThreadId::current();
        tracker.push(node(Category::TriggerManager, "emxTriggerManager", "mxMain(Context, String[])"));
        assert!(!tracker.is_inside_managed_dispatch(me, &config));
        tracker.push(node(
            Category::MxApi,
            "matrix.db.JPOSupport",
            "invokeObject(Object, String, Context, String[], boolean)",
        ));
        assert!(tracker.is_inside_managed_dispatch(me, &config));
        tracker.pop(me).unwrap();
        tracker.pop(me).unwrap();
    }

    #[test]
    fn managed_dispatch_requires_dispatcher_parent() {
        let config = ProfilerConfig::default();
        let tracker = CallStackTracker::new();
        let me = ThreadId::current();
        tracker.push(node(Category::Jpo, "emxPart", "mxMain(Context, String[])"));
        tracker.push(node(Category::MxApi, "matrix.db.JPOSupport", "invokeObject()"));
        assert!(!tracker.is_inside_managed_dispatch(me, &config));
    }

    #[test]
    fn managed_dispatch_requires_entry_point_method() {
        let config = ProfilerConfig::default();
        let tracker = CallStackTracker::new();
        let me = ThreadId::current();
        tracker.push(node(Category::TriggerManager, "emxTriggerManager", "checkAccess()"));
        tracker.push(node(Category::MxApi, "matrix.db.JPOSupport", "invokeObject()"));
        assert!(!tracker.is_inside_managed_dispatch(me, &config));
    }

    #[test]
    fn managed_dispatch_false_for_bridge_directly_under_root() {
        let config = ProfilerConfig::default();
        let tracker = CallStackTracker::new();
        tracker.push(node(Category::MxApi, "matrix.db.JPOSupport", "invokeObject()"));
        assert!(!tracker.is_inside_managed_dispatch(ThreadId::current(), &config));
    }

    #[test]
    fn clear_forgets_all_threads() {
        let tracker = CallStackTracker::new();
        let me = ThreadId::current();
        tracker.push(node(Category::MxApi, "T", "a"));
        tracker.clear();
        assert_eq!(tracker.thread_count(), 0);
        assert!(tracker.snapshot().is_empty());
        assert_eq!(tracker.depth(me), 0);
        assert!(tracker.pop(me).is_err());
    }

    #[test]
    fn concurrent_threads_get_independent_trees() {
        let tracker = CallStackTracker::new();
        std::thread::scope(|s| {
            for t in 0..8 {
                let tracker = &tracker;
                s.spawn(move || {
                    let me = ThreadId::current();
                    for i in 0..50 {
                        tracker.push(node(Category::MxApi, &format!("t{t}"), &format!("m{i}")));
                        tracker.push(node(Category::MxApi, &format!("t{t}"), "inner"));
                        tracker.pop(me).unwrap();
                        tracker.pop(me).unwrap();
                    }
                    assert_eq!(tracker.depth(me), 0);
                });
            }
        });
        let trees = tracker.snapshot();
        assert_eq!(trees.len(), 8);
        for tree in &trees {
            assert_eq!(tree.len(), 1 + 100, "root + 50 outer + 50 inner");
            assert_eq!(tree.children(NodeIdx::ROOT).len(), 50);
        }
    }
}
