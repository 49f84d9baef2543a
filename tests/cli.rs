//! Integration tests for `mri show` and `mri diff` over reports produced by the runtime.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use mri::report::save_report;
use mri_runtime::{
    Category, ExecutionNode, Profiler, ProfilerConfig, Report, Timer, TriggerRecord, TriggerSource,
    TriggerSourceError,
};

struct FixedTriggers;

impl TriggerSource for FixedTriggers {
    fn fetch_all(&self) -> Result<Vec<TriggerRecord>, TriggerSourceError> {
        Ok(vec![TriggerRecord {
            name: "PartCreate".into(),
            revision: "checkOwner".into(),
            current_state: "Active".into(),
            constructor_arguments: String::new(),
            program_name: "emxPartTriggers".into(),
            method_name: String::new(),
            sequence_number: "1".into(),
            target_states: String::new(),
            error_type: "Error".into(),
            program_arguments: Vec::new(),
        }])
    }

    fn is_managed_program(&self, _program: &str) -> Result<bool, TriggerSourceError> {
        Ok(true)
    }
}

fn timed(category: Category, target: &str, method: &str, ms: u64) -> ExecutionNode {
    ExecutionNode::new(category, target, method, Vec::new())
        .with_timer(Timer::with_elapsed(Duration::from_millis(ms)))
}

/// One page request that opens a business object `open_ms` long.
fn profiled_report(open_ms: u64) -> Report {
    let config = ProfilerConfig {
        start_active: true,
        ..ProfilerConfig::default()
    };
    let profiler = Profiler::with_config(config, Arc::new(FixedTriggers));
    profiler.push(timed(Category::Jsp, "/emxForm.jsp", "jsp_service", open_ms + 5));
    profiler.push(timed(Category::MxApi, "BusinessObject", "open(Context)", open_ms));
    profiler.pop().unwrap();
    profiler.pop().unwrap();
    profiler.register_dispatch(&["PartCreate", "PartDelete"]).unwrap();
    profiler.generate_report()
}

fn mri(args: &[&str], dir: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_mri"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run mri")
}

#[test]
fn show_prints_every_section_of_latest_report() {
    let tmp = tempfile::tempdir().unwrap();
    let reports = tmp.path().join("mri-reports");
    save_report(&reports, &profiled_report(20)).unwrap();

    let output = mri(&["show"], tmp.path());
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("/emxForm.jsp.jsp_service"), "stdout: {stdout}");
    assert!(stdout.contains("  BusinessObject.open(Context)"), "stdout: {stdout}");
    assert!(stdout.contains("20.00ms"), "stdout: {stdout}");
    assert!(stdout.contains("PartCreate"), "stdout: {stdout}");
    assert!(stdout.contains("PartDelete"), "stdout: {stdout}");
}

#[test]
fn show_limits_output_to_requested_section() {
    let tmp = tempfile::tempdir().unwrap();
    let path = save_report(tmp.path(), &profiled_report(20)).unwrap();

    let output = mri(&["show", path.to_str().unwrap(), "--section", "methods"], tmp.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("BusinessObject.open(Context)"), "stdout: {stdout}");
    assert!(!stdout.contains("Trigger manager"), "stdout: {stdout}");
}

#[test]
fn show_rejects_unknown_section() {
    let tmp = tempfile::tempdir().unwrap();
    let output = mri(&["show", "--section", "bogus"], tmp.path());
    assert!(!output.status.success());
}

#[test]
fn show_without_reports_fails_with_message() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("mri-reports")).unwrap();
    let output = mri(&["show"], tmp.path());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: no reports found"), "stderr: {stderr}");
}

#[test]
fn diff_reports_self_time_delta() {
    let tmp = tempfile::tempdir().unwrap();
    let a = save_report(&tmp.path().join("a"), &profiled_report(20)).unwrap();
    let b = save_report(&tmp.path().join("b"), &profiled_report(12)).unwrap();

    let output = mri(&["diff", a.to_str().unwrap(), b.to_str().unwrap()], tmp.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MX_API BusinessObject.open(Context)"), "stdout: {stdout}");
    assert!(stdout.contains("-8.00ms"), "stdout: {stdout}");
}
