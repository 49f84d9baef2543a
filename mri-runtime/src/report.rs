//! Report assembly.
//!
//! The builder works on snapshots: call trees, the invocation index, and the
//! trigger bookkeeping copied out of the engine. It first writes every node's
//! self time (total elapsed minus the total elapsed of its direct children),
//! then flattens each tree into a stack trace and aggregates self time per
//! node identity.
//!
//! Everything produced here is plain data so that any serializer can sit on
//! top of it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::{Category, ExecutionNode, NodeKey};
use crate::timer::Timer;
use crate::tree::{CallTree, NodeIdx};
use crate::trigger::{execution_order, TriggerDefinition};

/// Placeholder used when a signature and its argument snapshot disagree.
pub const UNAVAILABLE: &str = "[Unable to Retrieve]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub timestamp_ms: u64,
    pub stack_traces: Vec<StackTrace>,
    /// Sorted by total self time, highest first.
    pub method_summary: Vec<MethodSummary>,
    pub trigger_summary: TriggerSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTrace {
    pub thread: String,
    /// Sum of the total time of the thread's top-level calls.
    pub total_ns: u64,
    /// Pre-order, depth-first.
    pub entries: Vec<StackEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub order: usize,
    pub depth: usize,
    pub category: Category,
    pub target: String,
    pub method: String,
    pub total_ns: u64,
    pub self_ns: u64,
    pub parameters: Vec<MethodParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodParameter {
    pub type_name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSummary {
    pub category: Category,
    pub target: String,
    pub method: String,
    pub invocations: u64,
    pub total_self_ns: u64,
    pub average_self_ns: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSummary {
    /// Creation time of each dispatcher instance.
    pub dispatcher_instances_ns: Vec<u64>,
    pub dispatcher_instance_total_ns: u64,
    /// Calls into the dispatcher's entry point.
    pub dispatcher_invocations: u64,
    /// Self time spent in dispatcher frames.
    pub dispatcher_time_ns: u64,
    pub active_triggers: Vec<TriggerOccurrence>,
    pub inactive_triggers: Vec<TriggerOccurrence>,
    pub missing_triggers: Vec<MissingTrigger>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOccurrence {
    pub name: String,
    pub revision: String,
    pub program: String,
    pub method: String,
    pub sequence: String,
    pub invocations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTrigger {
    pub name: String,
    pub attempts: u64,
}

/// A trigger definition and how many times the dispatcher fired it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerTally {
    pub definition: TriggerDefinition,
    pub invocations: u64,
}

/// Snapshot of everything a report is built from.
#[derive(Debug)]
pub struct ReportInput<'a> {
    pub trees: &'a [CallTree],
    pub index: &'a BTreeMap<NodeKey, Vec<Arc<ExecutionNode>>>,
    pub triggers: &'a [TriggerTally],
    pub missing_triggers: &'a BTreeMap<String, u64>,
    pub dispatcher_instances: &'a [Timer],
    pub entry_point: &'a str,
    pub timestamp_ms: u64,
}

pub fn build_report(input: &ReportInput<'_>) -> Report {
    assign_self_times(input.trees);

    let method_summary = summarize_methods(input.index);
    let stack_traces = input.trees.iter().map(stack_trace).collect();
    let trigger_summary = summarize_triggers(input, &method_summary);

    Report {
        timestamp_ms: input.timestamp_ms,
        stack_traces,
        method_summary,
        trigger_summary,
    }
}

/// Write the self time of every non-root node.
///
/// Children run strictly inside their parent on one thread, and each child's
/// total already contains its own descendants, so subtracting direct children
/// removes exactly the nested time.
pub fn assign_self_times(trees: &[CallTree]) {
    for tree in trees {
        for (idx, _) in tree.preorder() {
            let node = tree.node(idx);
            let total = node.total_ns();
            let children: u64 = tree
                .children(idx)
                .iter()
                .map(|&c| tree.node(c).total_ns())
                .sum();
            let self_ns = match total.checked_sub(children) {
                Some(ns) => ns,
                None => {
                    tracing::warn!(
                        target = node.target(),
                        method = node.method(),
                        total_ns = total,
                        children_ns = children,
                        "children outlast their parent; clamping self time to zero"
                    );
                    0
                }
            };
            node.set_self_ns(self_ns);
        }
    }
}

fn stack_trace(tree: &CallTree) -> StackTrace {
    let total_ns = tree
        .children(NodeIdx::ROOT)
        .iter()
        .map(|&c| tree.node(c).total_ns())
        .sum();
    let entries = tree
        .preorder()
        .enumerate()
        .map(|(order, (idx, depth))| {
            let node = tree.node(idx);
            StackEntry {
                order,
                depth,
                category: node.category(),
                target: node.target().to_owned(),
                method: node.method().to_owned(),
                total_ns: node.total_ns(),
                self_ns: node.self_ns(),
                parameters: method_parameters(node.method(), node.arguments()),
            }
        })
        .collect();
    StackTrace {
        thread: tree.label().to_owned(),
        total_ns,
        entries,
    }
}

/// Pair the parameter types in `signature` with the argument snapshot.
pub fn method_parameters(signature: &str, arguments: &[String]) -> Vec<MethodParameter> {
    if arguments.is_empty() {
        return Vec::new();
    }
    let types: Option<Vec<&str>> = match (signature.find('('), signature.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            Some(signature[open + 1..close].split(", ").collect())
        }
        _ => None,
    };
    match types {
        Some(types) if types.len() == arguments.len() => types
            .into_iter()
            .zip(arguments)
            .map(|(type_name, value)| MethodParameter {
                type_name: type_name.to_owned(),
                value: value.replace('\u{7}', " "),
            })
            .collect(),
        _ => vec![MethodParameter {
            type_name: UNAVAILABLE.to_owned(),
            value: UNAVAILABLE.to_owned(),
        }],
    }
}

fn summarize_methods(index: &BTreeMap<NodeKey, Vec<Arc<ExecutionNode>>>) -> Vec<MethodSummary> {
    let mut summary: Vec<MethodSummary> = index
        .iter()
        .filter(|(_, nodes)| !nodes.is_empty())
        .map(|(key, nodes)| {
            let invocations = nodes.len() as u64;
            let total_self_ns: u64 = nodes.iter().map(|n| n.self_ns()).sum();
            MethodSummary {
                category: key.category,
                target: key.target.clone(),
                method: key.method.clone(),
                invocations,
                total_self_ns,
                average_self_ns: total_self_ns / invocations,
            }
        })
        .collect();
    summary.sort_by(|a, b| b.total_self_ns.cmp(&a.total_self_ns));
    summary
}

fn summarize_triggers(input: &ReportInput<'_>, methods: &[MethodSummary]) -> TriggerSummary {
    let dispatcher_instances_ns: Vec<u64> = input
        .dispatcher_instances
        .iter()
        .map(Timer::elapsed_ns)
        .collect();
    let dispatcher_instance_total_ns = dispatcher_instances_ns.iter().sum();

    let mut dispatcher_invocations = 0;
    let mut dispatcher_time_ns = 0;
    for m in methods
        .iter()
        .filter(|m| m.category == Category::TriggerManager)
    {
        if m.method.starts_with(input.entry_point) {
            dispatcher_invocations += m.invocations;
        }
        dispatcher_time_ns += m.total_self_ns;
    }

    let mut tallies: Vec<&TriggerTally> = input.triggers.iter().collect();
    tallies.sort_by(|a, b| {
        execution_order(&a.definition, &b.definition)
            .then_with(|| a.definition.id().cmp(b.definition.id()))
    });
    let occurrences = |active: bool| -> Vec<TriggerOccurrence> {
        tallies
            .iter()
            .filter(|t| t.definition.is_active() == active)
            .map(|t| TriggerOccurrence {
                name: t.definition.name().to_owned(),
                revision: t.definition.revision().to_owned(),
                program: t.definition.program_name().to_owned(),
                method: t.definition.method_name().to_owned(),
                sequence: t.definition.sequence_number().to_owned(),
                invocations: t.invocations,
            })
            .collect()
    };

    TriggerSummary {
        dispatcher_instances_ns,
        dispatcher_instance_total_ns,
        dispatcher_invocations,
        dispatcher_time_ns,
        active_triggers: occurrences(true),
        inactive_triggers: occurrences(false),
        missing_triggers: input
            .missing_triggers
            .iter()
            .map(|(name, &attempts)| MissingTrigger {
                name: name.clone(),
                attempts,
            })
            .collect(),
    }
}
