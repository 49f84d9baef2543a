//! Arena-backed call tree, one per thread.
//!
//! Slot 0 is always the synthetic root. Children are appended in push order
//! and never move, so a `NodeIdx` stays valid for the life of the tree.

use std::sync::Arc;

use crate::node::{ExecutionNode, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdx(usize);

impl NodeIdx {
    pub const ROOT: NodeIdx = NodeIdx(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Slot {
    node: Arc<ExecutionNode>,
    parent: Option<NodeIdx>,
    children: Vec<NodeIdx>,
}

#[derive(Debug, Clone)]
pub struct CallTree {
    thread: ThreadId,
    label: String,
    slots: Vec<Slot>,
}

impl CallTree {
    pub fn new(thread: ThreadId, label: impl Into<String>) -> Self {
        Self {
            thread,
            label: label.into(),
            slots: vec![Slot {
                node: Arc::new(ExecutionNode::root(thread)),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Display label of the owning thread.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing but the root has been recorded.
    pub fn is_empty(&self) -> bool {
        self.slots.len() == 1
    }

    /// Append `node` as the last child of `parent`.
    pub fn attach(&mut self, parent: NodeIdx, node: Arc<ExecutionNode>) -> NodeIdx {
        let idx = NodeIdx(self.slots.len());
        self.slots.push(Slot {
            node,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.slots[parent.0].children.push(idx);
        idx
    }

    pub fn node(&self, idx: NodeIdx) -> &Arc<ExecutionNode> {
        &self.slots[idx.0].node
    }

    pub fn parent(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.slots[idx.0].parent
    }

    pub fn children(&self, idx: NodeIdx) -> &[NodeIdx] {
        &self.slots[idx.0].children
    }

    /// Depth-first pre-order walk of every non-root node with its depth
    /// (the root's direct children are depth 0).
    pub fn preorder(&self) -> Preorder<'_> {
        let mut pending = Vec::new();
        for &child in self.children(NodeIdx::ROOT).iter().rev() {
            pending.push((child, 0));
        }
        Preorder {
            tree: self,
            pending,
        }
    }
}

pub struct Preorder<'a> {
    tree: &'a CallTree,
    pending: Vec<(NodeIdx, usize)>,
}

impl Iterator for Preorder<'_> {
    type Item = (NodeIdx, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, depth) = self.pending.pop()?;
        for &child in self.tree.children(idx).iter().rev() {
            self.pending.push((child, depth + 1));
        }
        Some((idx, depth))
    }
}
