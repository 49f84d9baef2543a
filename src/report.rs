use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use mri_runtime::Report;

use crate::error::Error;

/// Part of a report to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Stacks,
    Methods,
    Triggers,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Stacks, Section::Methods, Section::Triggers];
}

impl FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stacks" => Ok(Section::Stacks),
            "methods" => Ok(Section::Methods),
            "triggers" => Ok(Section::Triggers),
            other => Err(Error::UnknownSection(other.to_owned())),
        }
    }
}

/// Read a report from a JSON file on disk.
pub fn load_report(path: &Path) -> Result<Report, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ReportReadError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|e| Error::InvalidReportData {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write `report` into `dir` as `<timestamp_ms>.json` and return the path.
pub fn save_report(dir: &Path, report: &Report) -> Result<PathBuf, Error> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", report.timestamp_ms));
    let json = serde_json::to_string_pretty(report).map_err(|e| Error::InvalidReportData {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Find the most recent report in a directory by parsing timestamps from filenames.
pub fn latest_report(dir: &Path) -> Result<PathBuf, Error> {
    let entries = std::fs::read_dir(dir).map_err(|source| Error::ReportReadError {
        path: dir.to_path_buf(),
        source,
    })?;
    entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                return None;
            }
            let ts: u64 = path.file_stem()?.to_str()?.parse().ok()?;
            Some((ts, path))
        })
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, path)| path)
        .ok_or_else(|| Error::NoReports(dir.to_path_buf()))
}

fn ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

/// One call tree per thread, children indented under their caller.
pub fn format_stack_traces(report: &Report) -> String {
    let mut out = String::new();
    for trace in &report.stack_traces {
        out.push_str(&format!(
            "{} ({:.2}ms)\n",
            trace.thread,
            ms(trace.total_ns)
        ));
        out.push_str(&format!(
            "{:>5} {:<16} {:<60} {:>10} {:>10}\n",
            "#", "Type", "Call", "Total", "Self"
        ));
        out.push_str(&format!("{}\n", "-".repeat(106)));
        for entry in &trace.entries {
            let call = format!(
                "{}{}.{}",
                "  ".repeat(entry.depth),
                entry.target,
                entry.method
            );
            out.push_str(&format!(
                "{:>5} {:<16} {:<60} {:>8.2}ms {:>8.2}ms\n",
                entry.order,
                entry.category.tag(),
                call,
                ms(entry.total_ns),
                ms(entry.self_ns)
            ));
            for p in &entry.parameters {
                out.push_str(&format!(
                    "{:>12} {}{} = {}\n",
                    "",
                    "  ".repeat(entry.depth),
                    p.type_name,
                    p.value
                ));
            }
        }
        out.push('\n');
    }
    out
}

/// Per-identity self time, in the order the report carries it (highest first).
pub fn format_method_summary(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<16} {:<60} {:>8} {:>10} {:>10}\n",
        "Type", "Method", "Calls", "Self", "Avg"
    ));
    out.push_str(&format!("{}\n", "-".repeat(108)));
    for m in &report.method_summary {
        out.push_str(&format!(
            "{:<16} {:<60} {:>8} {:>8.2}ms {:>8.2}ms\n",
            m.category.tag(),
            format!("{}.{}", m.target, m.method),
            m.invocations,
            ms(m.total_self_ns),
            ms(m.average_self_ns)
        ));
    }
    out
}

pub fn format_trigger_summary(report: &Report) -> String {
    let t = &report.trigger_summary;
    let mut out = String::new();
    out.push_str(&format!(
        "Trigger manager: {} instance(s) in {:.2}ms, {} invocation(s), {:.2}ms self\n",
        t.dispatcher_instances_ns.len(),
        ms(t.dispatcher_instance_total_ns),
        t.dispatcher_invocations,
        ms(t.dispatcher_time_ns)
    ));

    for (title, occurrences) in [
        ("Active triggers", &t.active_triggers),
        ("Inactive triggers", &t.inactive_triggers),
    ] {
        out.push_str(&format!("\n{title}\n"));
        out.push_str(&format!(
            "{:<30} {:<10} {:<30} {:<20} {:>8} {:>8}\n",
            "Name", "Revision", "Program", "Method", "Seq", "Fired"
        ));
        out.push_str(&format!("{}\n", "-".repeat(111)));
        for o in occurrences {
            out.push_str(&format!(
                "{:<30} {:<10} {:<30} {:<20} {:>8} {:>8}\n",
                o.name, o.revision, o.program, o.method, o.sequence, o.invocations
            ));
        }
    }

    if !t.missing_triggers.is_empty() {
        out.push_str("\nMissing triggers\n");
        for m in &t.missing_triggers {
            out.push_str(&format!("{:<30} {:>8}\n", m.name, m.attempts));
        }
    }
    out
}

pub fn format_sections(report: &Report, sections: &[Section]) -> String {
    let mut out = String::new();
    for section in sections {
        let body = match section {
            Section::Stacks => format_stack_traces(report),
            Section::Methods => format_method_summary(report),
            Section::Triggers => format_trigger_summary(report),
        };
        out.push_str(&body);
        out.push('\n');
    }
    out
}

/// Show the self-time delta between two reports, comparing method identities.
pub fn diff_reports(a: &Report, b: &Report) -> String {
    fn self_times(report: &Report) -> BTreeMap<String, u64> {
        report
            .method_summary
            .iter()
            .map(|m| {
                (
                    format!("{} {}.{}", m.category.tag(), m.target, m.method),
                    m.total_self_ns,
                )
            })
            .collect()
    }
    let before = self_times(a);
    let after = self_times(b);

    let mut names: Vec<&String> = before.keys().chain(after.keys()).collect();
    names.sort_unstable();
    names.dedup();

    let mut out = String::new();
    out.push_str(&format!(
        "{:<60} {:>10} {:>10} {:>10}\n",
        "Method", "Before", "After", "Delta"
    ));
    out.push_str(&format!("{}\n", "-".repeat(94)));
    for name in names {
        let b_ms = ms(before.get(name).copied().unwrap_or(0));
        let a_ms = ms(after.get(name).copied().unwrap_or(0));
        out.push_str(&format!(
            "{:<60} {:>8.2}ms {:>8.2}ms {:>+8.2}ms\n",
            name,
            b_ms,
            a_ms,
            a_ms - b_ms
        ));
    }
    out
}
