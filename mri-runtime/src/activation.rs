use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Process-wide profiling switch read by the interception layer on every
/// call site.
///
/// Profiling is on when the operator switched it on and no suspension is
/// outstanding. Suspensions only count up and down, so overlapping ones from
/// different threads may end in any order.
///
/// Reads are relaxed: a flip becomes visible to other threads eventually,
/// which is all the interception layer needs.
#[derive(Debug, Default)]
pub struct Activation {
    active: AtomicBool,
    suspended: AtomicUsize,
}

impl Activation {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
            suspended: AtomicUsize::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed) && self.suspended.load(Ordering::Acquire) == 0
    }

    /// The operator's setting, ignoring outstanding suspensions.
    pub fn is_enabled(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Switch profiling off until the returned guard drops.
    #[must_use = "dropping the guard immediately re-enables profiling"]
    pub fn suspend(&self) -> Suspension<'_> {
        self.suspended.fetch_add(1, Ordering::AcqRel);
        Suspension { activation: self }
    }
}

pub struct Suspension<'a> {
    activation: &'a Activation,
}

impl Drop for Suspension<'_> {
    fn drop(&mut self) {
        self.activation.suspended.fetch_sub(1, Ordering::AcqRel);
    }
}
