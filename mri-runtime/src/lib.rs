mod activation;
mod cache;
mod config;
mod engine;
mod error;
mod index;
pub mod instrument;
mod node;
pub mod report;
mod timer;
mod tracker;
mod tree;
mod trigger;

pub use activation::{Activation, Suspension};
pub use cache::TriggerCache;
pub use config::ProfilerConfig;
pub use engine::Profiler;
pub use error::{Error, TriggerSourceError};
pub use index::InvocationIndex;
pub use node::{Category, ExecutionNode, NodeKey, ThreadId};
pub use report::{
    MethodParameter, MethodSummary, MissingTrigger, Report, StackEntry, StackTrace,
    TriggerOccurrence, TriggerSummary,
};
pub use timer::Timer;
pub use tracker::CallStackTracker;
pub use tree::{CallTree, NodeIdx, Preorder};
pub use trigger::{
    execution_order, TriggerDefinition, TriggerId, TriggerRecord, TriggerSource,
    MAX_PROGRAM_ARGUMENTS,
};
