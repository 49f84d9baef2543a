use crate::node::ThreadId;

/// Failure reported by a [`TriggerSource`](crate::TriggerSource).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TriggerSourceError {
    pub message: String,
}

impl TriggerSourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `pop()` with no matching `push()` on the calling thread. The call tree
    /// for that thread is already inconsistent when this is raised.
    #[error("pop() without push() on {thread} -- instrumentation is unbalanced")]
    UnbalancedPop { thread: ThreadId },

    #[error("trigger definitions could not be fetched: {0}")]
    TriggerAccess(#[from] TriggerSourceError),
}
