//! Helpers for the interception layer.
//!
//! [`enter`] pushes a node, starts its timer and returns a [`Span`] that stops
//! the timer and pops on every exit path, including unwinding. [`wrap`] runs
//! a closure inside such a span when profiling is on. The remaining functions
//! classify platform calls the way the dispatcher-aware pointcuts need.

use std::marker::PhantomData;

use crate::config::ProfilerConfig;
use crate::engine::Profiler;
use crate::error::Error;
use crate::node::{Category, ExecutionNode};
use crate::timer::Timer;

/// RAII span over one profiled call. Stops the timer and pops on drop.
///
/// Pinned to the thread that created it: popping from another thread would
/// unwind the wrong stack.
#[must_use = "dropping the span immediately records ~0ms; bind it with `let _span = ...`"]
pub struct Span<'p> {
    profiler: &'p Profiler,
    timer: Timer,
    _not_send: PhantomData<*const ()>,
}

impl Span<'_> {
    pub fn timer(&self) -> &Timer {
        &self.timer
    }
}

impl Drop for Span<'_> {
    fn drop(&mut self) {
        self.timer.stop();
        if let Err(e) = self.profiler.pop() {
            tracing::error!(error = %e, "span closed without a matching stack entry");
        }
    }
}

/// Push `node` and start timing it.
pub fn enter(profiler: &Profiler, node: ExecutionNode) -> Span<'_> {
    let timer = profiler.push(node);
    timer.start();
    Span {
        profiler,
        timer,
        _not_send: PhantomData,
    }
}

/// Run `call` as a profiled invocation described by `node`. When profiling
/// is off the call runs untouched and nothing is recorded.
pub fn wrap<T>(profiler: &Profiler, node: ExecutionNode, call: impl FnOnce() -> T) -> T {
    if !profiler.is_active() {
        return call();
    }
    let _span = enter(profiler, node);
    call()
}

/// Category of a call into managed program `unit`: the dispatcher itself, a
/// trigger the dispatcher launched through the host bridge, or an ordinary
/// program unit.
pub fn classify_managed_unit(profiler: &Profiler, unit: &str) -> Category {
    if unit.starts_with(&profiler.config().dispatcher_prefix) {
        Category::TriggerManager
    } else if profiler.is_inside_managed_dispatch() {
        Category::JavaTrigger
    } else {
        Category::Jpo
    }
}

/// Profile a call into managed program `unit`.
///
/// When the call is the dispatcher's entry point, `trigger_names` are the
/// trigger names it was handed; they are accounted for before the call runs.
/// If that accounting fails, the error is returned and `call` never runs.
pub fn wrap_managed_unit<T>(
    profiler: &Profiler,
    unit: &str,
    method: &str,
    arguments: Vec<String>,
    trigger_names: &[String],
    call: impl FnOnce() -> T,
) -> Result<T, Error> {
    if !profiler.is_active() {
        return Ok(call());
    }
    let category = classify_managed_unit(profiler, unit);
    if category == Category::TriggerManager && method.starts_with(&profiler.config().entry_point) {
        profiler.register_dispatch(trigger_names)?;
    }
    let node = ExecutionNode::new(category, unit, method, arguments);
    Ok(wrap(profiler, node, call))
}

/// Program name of a script trigger command, i.e. the last single-quoted
/// token. `None` if `command` is not a script trigger invocation.
pub fn script_trigger_program<'a>(config: &ProfilerConfig, command: &'a str) -> Option<&'a str> {
    if !command.starts_with(&config.script_trigger_prefix) {
        return None;
    }
    let close = command.rfind('\'')?;
    let open = command[..close].rfind('\'')?;
    Some(&command[open + 1..close])
}

/// Profile a platform command, recording it as a script trigger when it is
/// one and running it untouched otherwise.
pub fn wrap_command<T>(profiler: &Profiler, command: &str, call: impl FnOnce() -> T) -> T {
    match script_trigger_program(profiler.config(), command) {
        Some(program) => {
            let node = ExecutionNode::new(Category::TclTrigger, program, "-", Vec::new());
            wrap(profiler, node, call)
        }
        None => call(),
    }
}

/// Time the instantiation of managed program `unit` if it is the dispatcher.
pub fn time_dispatcher_instance<T>(profiler: &Profiler, unit: &str, create: impl FnOnce() -> T) -> T {
    if !profiler.is_active() || !unit.starts_with(&profiler.config().dispatcher_prefix) {
        return create();
    }
    struct StopOnDrop(Timer);
    impl Drop for StopOnDrop {
        fn drop(&mut self) {
            self.0.stop();
        }
    }
    let timer = profiler.add_dispatcher_instance();
    timer.start();
    let _stop = StopOnDrop(timer);
    create()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::fixtures::{record, MemorySource};
    use std::sync::Arc;
    use std::time::Duration;

    fn active_profiler(records: Vec<crate::TriggerRecord>) -> Profiler {
        let config = ProfilerConfig {
            start_active: true,
            ..ProfilerConfig::default()
        };
        Profiler::with_config(config, Arc::new(MemorySource::new(records)))
    }

    #[test]
    fn wrap_times_and_pops() {
        let p = active_profiler(Vec::new());
        let out = wrap(
            &p,
            ExecutionNode::new(Category::MxApi, "BusinessObject", "open()", Vec::new()),
            || {
                std::thread::sleep(Duration::from_millis(3));
                7
            },
        );
        assert_eq!(out, 7);
        assert_eq!(p.depth(), 0);
        let entry = &p.generate_report().stack_traces[0].entries[0];
        assert!(entry.total_ns >= 3_000_000, "got {}ns", entry.total_ns);
    }

    #[test]
    fn wrap_is_transparent_when_inactive() {
        let p = active_profiler(Vec::new());
        p.stop();
        let out = wrap(&p, ExecutionNode::new(Category::MxApi, "T", "m", Vec::new()), || "ok");
        assert_eq!(out, "ok");
        assert_eq!(p.thread_count(), 0);
    }

    #[test]
    fn span_pops_on_unwind() {
        let p = active_profiler(Vec::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            wrap(&p, ExecutionNode::new(Category::Jpo, "emxPart", "boom()", Vec::new()), || {
                panic!("wrapped call failed")
            })
        }));
        assert!(result.is_err());
        assert_eq!(p.depth(), 0);
        let entry = &p.generate_report().stack_traces[0].entries[0];
        assert_eq!(entry.method, "boom()");
    }

    #[test]
    fn nested_spans_build_tree() {
        let p = active_profiler(Vec::new());
        {
            let _outer = enter(&p, ExecutionNode::new(Category::Jsp, "/page.jsp", "jsp_service", Vec::new()));
            let _inner = enter(&p, ExecutionNode::new(Category::MxApi, "BusinessObject", "open()", Vec::new()));
            assert_eq!(p.depth(), 2);
        }
        let depths: Vec<usize> = p.generate_report().stack_traces[0]
            .entries
            .iter()
            .map(|e| e.depth)
            .collect();
        assert_eq!(depths, vec![0, 1]);
    }

    #[test]
    fn managed_units_classified_by_position() {
        let p = active_profiler(vec![record("PartCreate", "1", "1")]);
        let names = vec!["PartCreate".to_owned()];
        let category = wrap_managed_unit(&p, "emxTriggerManager", "mxMain(Context, String[])", Vec::new(), &names, || {
            wrap(
                &p,
                ExecutionNode::new(
                    Category::MxApi,
                    "matrix.db.JPOSupport",
                    "invokeObject(Object, String, Context, String[], boolean)",
                    Vec::new(),
                ),
                || classify_managed_unit(&p, "emxPartTriggers"),
            )
        })
        .unwrap();
        assert_eq!(category, Category::JavaTrigger);
        assert_eq!(classify_managed_unit(&p, "emxPart"), Category::Jpo);
        assert_eq!(classify_managed_unit(&p, "emxTriggerManagerBase"), Category::TriggerManager);
        assert_eq!(p.trigger_counts().len(), 1);
    }

    #[test]
    fn dispatcher_entry_registers_triggers_without_profiling_lookup() {
        let p = active_profiler(vec![record("PartCreate", "1", "1")]);
        let names = vec!["PartCreate".to_owned(), "Unknown".to_owned()];
        wrap_managed_unit(&p, "emxTriggerManager", "mxMain(Context, String[])", Vec::new(), &names, || ())
            .unwrap();
        let report = p.generate_report();
        assert_eq!(report.stack_traces[0].entries.len(), 1, "only the dispatcher frame");
        assert_eq!(report.trigger_summary.active_triggers.len(), 1);
        assert_eq!(report.trigger_summary.missing_triggers[0].name, "Unknown");
        assert_eq!(report.trigger_summary.dispatcher_invocations, 1);
    }

    #[test]
    fn failed_trigger_lookup_skips_dispatcher_call() {
        let source = Arc::new(MemorySource::new(vec![record("PartCreate", "1", "1")]));
        source.set_failing(true);
        let config = ProfilerConfig {
            start_active: true,
            ..ProfilerConfig::default()
        };
        let p = Profiler::with_config(config, source);
        let names = vec!["PartCreate".to_owned()];
        let mut ran = false;
        let result = wrap_managed_unit(&p, "emxTriggerManager", "mxMain(Context, String[])", Vec::new(), &names, || {
            ran = true;
        });
        assert!(matches!(result, Err(Error::TriggerAccess(_))));
        assert!(!ran, "dispatcher call must not run after a failed lookup");
        assert!(p.is_active());
        assert_eq!(p.thread_count(), 0);
    }

    #[test]
    fn script_trigger_program_is_last_quoted_token() {
        let config = ProfilerConfig::default();
        let cmd = "execute program emxTriggerWrapper.tcl 'PartCreate' 'eServicecommonCheckOwner.tcl'";
        assert_eq!(script_trigger_program(&config, cmd), Some("eServicecommonCheckOwner.tcl"));
        assert_eq!(script_trigger_program(&config, "print bus 'Part' 'A' '0'"), None);
        assert_eq!(
            script_trigger_program(&config, "execute program emxTriggerWrapper.tcl noquotes"),
            None
        );
    }

    #[test]
    fn wrap_command_only_records_script_triggers() {
        let p = active_profiler(Vec::new());
        wrap_command(&p, "print bus 'Part' 'A' '0'", || ());
        assert_eq!(p.thread_count(), 0);
        wrap_command(&p, "execute program emxTriggerWrapper.tcl 'x' 'check.tcl'", || ());
        let entry = &p.generate_report().stack_traces[0].entries[0];
        assert_eq!(entry.category, Category::TclTrigger);
        assert_eq!(entry.target, "check.tcl");
    }

    #[test]
    fn dispatcher_instantiation_is_timed() {
        let p = active_profiler(Vec::new());
        time_dispatcher_instance(&p, "emxTriggerManager", || std::thread::sleep(Duration::from_millis(2)));
        time_dispatcher_instance(&p, "emxPart", || ());
        let t = p.generate_report().trigger_summary;
        assert_eq!(t.dispatcher_instances_ns.len(), 1);
        assert!(t.dispatcher_instances_ns[0] >= 2_000_000);
    }
}
