//! Trigger definitions as fetched from the platform, and the order in which
//! the dispatcher runs them.

use std::cmp::Ordering;

use crate::error::TriggerSourceError;

/// The platform accepts at most this many positional program arguments.
pub const MAX_PROGRAM_ARGUMENTS: usize = 15;

/// One row of the bulk trigger query, unprocessed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerRecord {
    pub name: String,
    pub revision: String,
    /// Lifecycle state of the definition object, e.g. `Active`.
    pub current_state: String,
    pub constructor_arguments: String,
    pub program_name: String,
    pub method_name: String,
    pub sequence_number: String,
    pub target_states: String,
    pub error_type: String,
    pub program_arguments: Vec<String>,
}

/// Where the trigger definition cache gets its data from.
pub trait TriggerSource: Send + Sync {
    /// Every trigger definition row known to the platform.
    fn fetch_all(&self) -> Result<Vec<TriggerRecord>, TriggerSourceError>;

    /// Whether `program` exists and is implemented as managed code.
    fn is_managed_program(&self, program: &str) -> Result<bool, TriggerSourceError>;
}

/// Identity of a trigger definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriggerId {
    pub name: String,
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDefinition {
    id: TriggerId,
    constructor_arguments: String,
    program_name: String,
    method_name: String,
    sequence_number: String,
    target_states: String,
    error_type: String,
    program_arguments: Vec<String>,
    active: bool,
    managed: bool,
}

impl TriggerDefinition {
    /// A definition is active only when its object is in the `Active` state
    /// and its error type is `Error`; the dispatcher skips anything else.
    pub fn from_record(record: TriggerRecord) -> Self {
        let active =
            record.current_state == "Active" && record.error_type.eq_ignore_ascii_case("Error");
        let mut program_arguments = record.program_arguments;
        program_arguments.truncate(MAX_PROGRAM_ARGUMENTS);
        Self {
            id: TriggerId {
                name: record.name,
                revision: record.revision,
            },
            constructor_arguments: record.constructor_arguments,
            program_name: record.program_name,
            method_name: record.method_name,
            sequence_number: record.sequence_number,
            target_states: record.target_states,
            error_type: record.error_type,
            program_arguments,
            active,
            managed: false,
        }
    }

    pub fn id(&self) -> &TriggerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn revision(&self) -> &str {
        &self.id.revision
    }

    pub fn constructor_arguments(&self) -> &str {
        &self.constructor_arguments
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn sequence_number(&self) -> &str {
        &self.sequence_number
    }

    pub fn target_states(&self) -> &str {
        &self.target_states
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn program_arguments(&self) -> &[String] {
        &self.program_arguments
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// Record the managed-code lookup. A managed program with no explicit
    /// method runs its standard entry point.
    pub(crate) fn mark_managed(&mut self, managed: bool, entry_point: &str) {
        self.managed = managed;
        if managed && self.method_name.trim().is_empty() {
            self.method_name = entry_point.to_owned();
        }
    }

    fn parsed_sequence(&self) -> Option<f32> {
        parse_sequence(&self.sequence_number)
    }
}

/// Parse a sequence number as a platform float literal: optional sign, then
/// `NaN`, `Infinity`, or a decimal with optional exponent and an optional
/// `f`/`d` suffix. Rust-only spellings such as `inf` are rejected.
fn parse_sequence(raw: &str) -> Option<f32> {
    let text = raw.trim();
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    if unsigned == "NaN" || unsigned == "Infinity" {
        return text.parse::<f32>().ok();
    }
    let number = text
        .strip_suffix(['f', 'F', 'd', 'D'])
        .unwrap_or(text);
    let decimal = number
        .strip_prefix(['+', '-'])
        .unwrap_or(number)
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !decimal || !number.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse::<f32>().ok()
}

/// Dispatch order: by name, then by numeric sequence number.
///
/// A definition whose sequence number does not parse sorts before any that
/// does, without regard to name. Two unparseable ones compare equal so a
/// stable sort keeps their fetched order; so do two equal numbers.
pub fn execution_order(a: &TriggerDefinition, b: &TriggerDefinition) -> Ordering {
    match (a.parsed_sequence(), b.parsed_sequence()) {
        (Some(x), Some(y)) => a.name().cmp(b.name()).then_with(|| x.total_cmp(&y)),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}
