use crate::error::{ContractViolation, PhaseError, StepError};
use crate::extras::Extra;
use crate::pipeline::config::ErrorPolicy;
use crate::records::Record;
use crate::variables::Variables;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Error,
    Warning,
    DroppedRow,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Error => "ERROR",
            EventKind::Warning => "WARNING",
            EventKind::DroppedRow => "DROPPED_ROW",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the error ledger
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub phase_name: String,
    /// `None` for batch-level events that no single row can be blamed for
    pub row_num: Option<u64>,
    pub step_name: String,
    pub message: String,
    /// Row as it looked when the event was recorded
    #[serde(skip)]
    pub row: Option<Record>,
    /// Failure detail, only kept in verbose mode
    pub stack_info: Option<String>,
}

/// Events of one phase keyed by row number, in the order rows were first reported
pub type RowEvents = IndexMap<Option<u64>, Vec<Event>>;

/// What the runner does with a row after a failure was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Drop,
}

#[derive(Debug, Clone, Default)]
struct StepScope {
    name: String,
    sources: Vec<String>,
    outputs: Vec<String>,
}

/// State shared by every step of a run: the error ledger, variables and extra
/// datasets. Phases of one pipeline hand the same context along.
#[derive(Debug, Clone)]
pub struct Context {
    events: IndexMap<String, RowEvents>,
    current_phase: String,
    current_step: Option<StepScope>,
    variables: Variables,
    extras: IndexMap<String, Extra>,
    error_policy: ErrorPolicy,
    verbose: bool,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            events: IndexMap::new(),
            current_phase: "Unknown".to_string(),
            current_step: None,
            variables: Variables::new(),
            extras: IndexMap::new(),
            error_policy: ErrorPolicy::Collect,
            verbose: false,
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    pub fn set_error_policy(&mut self, policy: ErrorPolicy) {
        self.error_policy = policy;
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn current_phase(&self) -> &str {
        &self.current_phase
    }

    /// Attribute subsequent events to `phase`
    pub fn set_current_phase(&mut self, phase: impl Into<String>) {
        self.current_phase = phase.into();
    }

    /// Name of the step currently running, if any
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_ref().map(|s| s.name.as_str())
    }

    pub(crate) fn enter_step(&mut self, name: &str, sources: &[String], outputs: &[String]) {
        self.current_step = Some(StepScope {
            name: name.to_string(),
            sources: sources.to_vec(),
            outputs: outputs.to_vec(),
        });
    }

    pub(crate) fn exit_step(&mut self) {
        self.current_step = None;
    }

    // Variables

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.set(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    // Extra sources and outputs

    /// Make `extra` available for steps to read. It is not saved at the end of the run.
    pub fn set_source(&mut self, mut extra: Extra) {
        if self.extras.contains_key(extra.name()) {
            tracing::warn!(name = extra.name(), "overwriting extra while setting source");
        }
        extra.set_to_save(false);
        self.extras.insert(extra.name().to_string(), extra);
    }

    /// Register `extra` as an output that steps may fill and that is due for saving.
    pub fn set_output(&mut self, mut extra: Extra) {
        if self.extras.contains_key(extra.name()) {
            tracing::warn!(name = extra.name(), "overwriting extra while setting output");
        }
        extra.set_to_save(true);
        self.extras.insert(extra.name().to_string(), extra);
    }

    pub fn has_extra(&self, name: &str) -> bool {
        self.extras.contains_key(name)
    }

    /// Read an extra dataset. Inside a step, the step must have declared `name` as
    /// a source or an output.
    pub fn source(&self, name: &str) -> Result<&Extra, ContractViolation> {
        if let Some(scope) = &self.current_step {
            if !scope.sources.iter().any(|s| s == name) && !scope.outputs.iter().any(|s| s == name)
            {
                return Err(ContractViolation::new(format!(
                    "Step '{}' reads extra source '{}' without declaring it",
                    scope.name, name
                )));
            }
        }
        self.extras.get(name).ok_or_else(|| {
            ContractViolation::new(format!("Extra source '{}' has not been loaded", name))
        })
    }

    /// Write to an extra output. Inside a step, the step must have declared `name` as
    /// an output.
    pub fn output_mut(&mut self, name: &str) -> Result<&mut Extra, ContractViolation> {
        if let Some(scope) = &self.current_step {
            if !scope.outputs.iter().any(|s| s == name) {
                return Err(ContractViolation::new(format!(
                    "Step '{}' writes extra output '{}' without declaring it",
                    scope.name, name
                )));
            }
        }
        self.extras.get_mut(name).ok_or_else(|| {
            ContractViolation::new(format!("Extra output '{}' has not been set up", name))
        })
    }

    pub fn extras(&self) -> impl Iterator<Item = &Extra> {
        self.extras.values()
    }

    /// Outputs that still need saving
    pub fn pending_outputs(&self) -> impl Iterator<Item = &Extra> {
        self.extras.values().filter(|e| e.to_save())
    }

    pub fn mark_saved(&mut self, name: &str) {
        if let Some(extra) = self.extras.get_mut(name) {
            extra.set_to_save(false);
        }
    }

    // Ledger

    pub fn add_error(&mut self, step: &str, row: Option<&Record>, message: impl Into<String>) {
        self.add_event(EventKind::Error, step, row, None, message.into(), None);
    }

    pub fn add_warning(&mut self, step: &str, row: Option<&Record>, message: impl Into<String>) {
        self.add_event(EventKind::Warning, step, row, None, message.into(), None);
    }

    pub fn add_dropped_row(
        &mut self,
        step: &str,
        row: Option<&Record>,
        message: impl Into<String>,
    ) {
        self.add_event(EventKind::DroppedRow, step, row, None, message.into(), None);
    }

    fn add_event(
        &mut self,
        kind: EventKind,
        step: &str,
        row: Option<&Record>,
        row_num: Option<u64>,
        message: String,
        stack_info: Option<String>,
    ) {
        let row_num = row.and_then(Record::row_num).or(row_num);
        tracing::debug!(
            phase = %self.current_phase,
            step,
            row = ?row_num,
            kind = %kind,
            "{}",
            message
        );
        let event = Event {
            kind,
            phase_name: self.current_phase.clone(),
            row_num,
            step_name: step.to_string(),
            message,
            row: row.cloned(),
            stack_info,
        };
        self.events
            .entry(self.current_phase.clone())
            .or_default()
            .entry(row_num)
            .or_default()
            .push(event);
    }

    /// Record a step failure according to its kind and the error policy.
    ///
    /// `row` is the row being processed when there is one; a failure that names a row
    /// number itself is attributed to that number when `row` is absent.
    pub fn process_failure(
        &mut self,
        step: &str,
        row: Option<&Record>,
        error: StepError,
    ) -> Result<Disposition, PhaseError> {
        let row_num = row.and_then(Record::row_num).or_else(|| error.row());
        let message = error.ledger_message();
        let stack_info = self.verbose.then(|| format!("{:?}", error));

        let (kind, disposition) = match &error {
            StepError::Contract(violation) => return Err(PhaseError::Contract(violation.clone())),
            StepError::DropRow { .. } => (EventKind::DroppedRow, Disposition::Drop),
            StepError::Warning { .. } => (EventKind::Warning, Disposition::Keep),
            StepError::DataError { .. } | StepError::Other(_) => {
                if matches!(error, StepError::Other(_)) {
                    tracing::info!(
                        phase = %self.current_phase,
                        step,
                        row = ?row_num,
                        "unclassified failure handled under '{}' policy",
                        self.error_policy
                    );
                }
                match self.error_policy {
                    ErrorPolicy::Collect => (EventKind::Error, Disposition::Keep),
                    ErrorPolicy::Warn => (EventKind::Warning, Disposition::Keep),
                    ErrorPolicy::DropRow => (EventKind::DroppedRow, Disposition::Drop),
                    ErrorPolicy::StopNow => {
                        self.add_event(EventKind::Error, step, row, row_num, message, stack_info);
                        tracing::error!(
                            phase = %self.current_phase,
                            step,
                            row = ?row_num,
                            "stopping phase on failure"
                        );
                        return Err(PhaseError::Stopped {
                            phase: self.current_phase.clone(),
                            step: step.to_string(),
                            row: row_num,
                            source: error,
                        });
                    }
                }
            }
        };

        self.add_event(kind, step, row, row_num, message, stack_info);
        Ok(disposition)
    }

    /// All recorded events, per phase then per row number
    pub fn events(&self) -> &IndexMap<String, RowEvents> {
        &self.events
    }

    pub fn phase_events(&self, phase: &str) -> Option<&RowEvents> {
        self.events.get(phase)
    }

    /// Events filtered by phase and by row number; `None` means all.
    pub fn get_events(&self, phase: Option<&str>, row_num: Option<u64>) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|(name, _)| phase.map_or(true, |p| p == name.as_str()))
            .flat_map(|(_, rows)| rows.iter())
            .filter(|(num, _)| row_num.map_or(true, |n| **num == Some(n)))
            .flat_map(|(_, events)| events.iter())
            .collect()
    }

    pub fn count(&self, phase: &str, kind: EventKind) -> usize {
        self.get_events(Some(phase), None)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Whether `phase` recorded any ERROR, which marks it failed
    pub fn has_error(&self, phase: &str) -> bool {
        self.count(phase, EventKind::Error) > 0
    }

    /// Whether any phase recorded an ERROR for `row_num`
    pub fn row_has_errors(&self, row_num: u64) -> bool {
        self.get_events(None, Some(row_num))
            .iter()
            .any(|e| e.kind == EventKind::Error)
    }

    pub(crate) fn row_has_errors_in(&self, phase: &str, row_num: u64) -> bool {
        self.events
            .get(phase)
            .and_then(|rows| rows.get(&Some(row_num)))
            .is_some_and(|events| events.iter().any(|e| e.kind == EventKind::Error))
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Write a human-readable report of `phase`'s events
    pub fn write_report<W: Write>(&self, phase: &str, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "-------------")?;
        writeln!(writer, "Beginning errors and warnings for {}", phase)?;
        writeln!(writer, "-------------")?;
        for event in self.get_events(Some(phase), None) {
            let row = event
                .row_num
                .map(|n| n.to_string())
                .unwrap_or_else(|| "none".to_string());
            writeln!(
                writer,
                "{} in step {}, row {}: message: '{}'",
                event.kind, event.step_name, row, event.message
            )?;
            if let Some(stack) = &event.stack_info {
                writeln!(writer, "{}", stack)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Numbering, Records};
    use serde_json::json;

    fn sample_row() -> Record {
        let fields = crate::records::fields_from_value(json!({"deck": 12})).unwrap();
        Records::load(vec![fields], Numbering::Preserve)
            .unwrap()
            .into_vec()
            .remove(0)
    }

    #[test]
    fn test_policy_table() {
        let row = sample_row();
        let cases = [
            (ErrorPolicy::Collect, EventKind::Error, Disposition::Keep),
            (ErrorPolicy::Warn, EventKind::Warning, Disposition::Keep),
            (ErrorPolicy::DropRow, EventKind::DroppedRow, Disposition::Drop),
        ];
        for (policy, kind, disposition) in cases {
            let mut ctx = Context::new().with_error_policy(policy);
            ctx.set_current_phase("p");
            let result = ctx.process_failure("s", Some(&row), StepError::data("bad"));
            assert_eq!(result.unwrap(), disposition);
            let events = ctx.get_events(Some("p"), Some(1));
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind, kind);
            assert_eq!(events[0].message, "DataError raised (bad)");
        }
    }

    #[test]
    fn test_classified_failures_ignore_policy() {
        let row = sample_row();
        let mut ctx = Context::new().with_error_policy(ErrorPolicy::StopNow);
        let kept = ctx.process_failure("s", Some(&row), StepError::warning("careful"));
        assert_eq!(kept.unwrap(), Disposition::Keep);
        let dropped = ctx.process_failure("s", Some(&row), StepError::drop_row("gone"));
        assert_eq!(dropped.unwrap(), Disposition::Drop);
        assert!(!ctx.has_error("Unknown"));
    }

    #[test]
    fn test_stop_now_records_then_stops() {
        let mut ctx = Context::new().with_error_policy(ErrorPolicy::StopNow);
        ctx.set_current_phase("p");
        let result = ctx.process_failure("s", None, StepError::other(anyhow::anyhow!("boom")));
        assert!(matches!(result, Err(PhaseError::Stopped { .. })));
        assert!(ctx.has_error("p"));
    }

    #[test]
    fn test_contract_violations_are_not_recorded() {
        let mut ctx = Context::new();
        let result = ctx.process_failure("s", None, StepError::contract("bad step"));
        assert!(matches!(result, Err(PhaseError::Contract(_))));
        assert!(ctx.events().is_empty());
    }

    #[test]
    fn test_verbose_keeps_stack_info() {
        let mut ctx = Context::new();
        ctx.process_failure("s", None, StepError::data("quiet")).unwrap();
        ctx.set_verbose(true);
        ctx.process_failure("s", None, StepError::data("loud")).unwrap();
        let events = ctx.get_events(None, None);
        assert!(events[0].stack_info.is_none());
        assert!(events[1].stack_info.is_some());
    }

    #[test]
    fn test_report_format() {
        let row = sample_row();
        let mut ctx = Context::new();
        ctx.set_current_phase("validator");
        ctx.add_warning("check_deck", Some(&row), "Deck looks odd");
        ctx.add_dropped_row("filter", None, "2 rows dropped");
        let mut out = Vec::new();
        ctx.write_report("validator", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("WARNING in step check_deck, row 1: message: 'Deck looks odd'"));
        assert!(text.contains("DROPPED_ROW in step filter, row none: message: '2 rows dropped'"));
    }

    #[test]
    fn test_source_requires_declaration_inside_step() {
        let mut ctx = Context::new();
        ctx.set_source(Extra::records("lookup", Vec::new()));
        assert!(ctx.source("lookup").is_ok());
        assert!(ctx.source("missing").is_err());

        ctx.enter_step("reader", &[], &[]);
        assert!(ctx.source("lookup").is_err());
        ctx.enter_step("reader", &["lookup".to_string()], &[]);
        assert!(ctx.source("lookup").is_ok());
        assert!(ctx.output_mut("lookup").is_err());
        ctx.exit_step();
    }
}
