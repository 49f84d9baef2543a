use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::node::{ExecutionNode, NodeKey};

/// Every recorded occurrence, grouped by node identity.
#[derive(Debug, Default)]
pub struct InvocationIndex {
    occurrences: DashMap<NodeKey, Vec<Arc<ExecutionNode>>>,
}

impl InvocationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: Arc<ExecutionNode>) {
        self.occurrences
            .entry(node.key().clone())
            .or_default()
            .push(node);
    }

    /// Moment-in-time copy ordered by identity. Later records do not show up
    /// in a snapshot that has already been taken.
    pub fn snapshot(&self) -> BTreeMap<NodeKey, Vec<Arc<ExecutionNode>>> {
        self.occurrences
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of distinct identities.
    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    pub fn clear(&self) {
        self.occurrences.clear();
    }
}
