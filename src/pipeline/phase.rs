use crate::column::{Column, HeaderRenamer};
use crate::error::{ContractViolation, PhaseError, StepError};
use crate::extras::Extra;
use crate::pipeline::config::PhaseConfig;
use crate::pipeline::context::{Context, Disposition, EventKind, RowEvents};
use crate::pipeline::step::{Step, StepFn, StepResult};
use crate::records::{parse_row_num, Fields, Record, Records, ROW_NUM_FIELD};
use crate::table::Table;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::Write;
use std::time::{Duration, Instant};

/// Runtime statistics for one phase run
#[derive(Debug, Default, Clone)]
pub struct PhaseStats {
    pub rows_loaded: usize,
    pub rows_output: usize,
    pub rows_added: usize,
    pub rows_dropped: usize,
    pub errors: usize,
    pub warnings: usize,
    pub steps_run: usize,
    pub processing_time: Duration,
}

impl PhaseStats {
    fn record_size_change(&mut self, before: usize, after: usize) {
        if after < before {
            self.rows_dropped += before - after;
        } else {
            self.rows_added += after - before;
        }
    }
}

/// Runs an ordered list of steps over one collection of rows
pub struct Phase {
    name: String,
    config: PhaseConfig,
    steps: Vec<Step>,
    columns: Vec<Column>,
    extra_sources: Vec<String>,
    extra_outputs: Vec<Extra>,
    context: Context,
    records: Records,
    headers: Vec<String>,
    loaded: bool,
    stats: PhaseStats,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Phase {
            name: name.into(),
            config: PhaseConfig::default(),
            steps: Vec::new(),
            columns: Vec::new(),
            extra_sources: Vec::new(),
            extra_outputs: Vec::new(),
            context: Context::new(),
            records: Records::new(),
            headers: Vec::new(),
            loaded: false,
            stats: PhaseStats::default(),
        }
    }

    pub fn with_config(mut self, config: PhaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Run with a context shared with other phases
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Declare the extra sources steps of this phase may read. Declare them
    /// before adding the steps that use them.
    pub fn with_extra_sources<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_sources.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare the extra outputs steps of this phase may write. They are set up in
    /// the context when the phase runs, unless the context already holds them.
    pub fn with_extra_outputs(mut self, outputs: Vec<Extra>) -> Self {
        self.extra_outputs.extend(outputs);
        self
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Result<Self, ContractViolation> {
        for column in &columns {
            column.validate()?;
        }
        self.columns.extend(columns);
        Ok(self)
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Result<Self, ContractViolation> {
        for step in steps {
            self.add_step(step)?;
        }
        Ok(self)
    }

    /// Register a step. Every extra source or output it declares must already be
    /// declared by the phase.
    pub fn add_step(&mut self, step: Step) -> Result<(), ContractViolation> {
        for source in step.extra_sources() {
            let declared = self.extra_sources.iter().any(|s| s == source)
                || self.extra_outputs.iter().any(|o| o.name() == source);
            if !declared {
                return Err(ContractViolation::new(format!(
                    "Step '{}' needs extra source '{}', which phase '{}' does not declare",
                    step.name(),
                    source,
                    self.name
                )));
            }
        }
        for output in step.extra_outputs() {
            if !self.extra_outputs.iter().any(|o| o.name() == output) {
                return Err(ContractViolation::new(format!(
                    "Step '{}' needs extra output '{}', which phase '{}' does not declare",
                    step.name(),
                    output,
                    self.name
                )));
            }
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Wrap raw rows, numbering them as the config's numbering mode says
    pub fn load(&mut self, rows: Vec<Fields>) -> Result<(), ContractViolation> {
        let records = Records::load(rows, self.config.numbering)?;
        self.load_records(records);
        Ok(())
    }

    pub fn load_records(&mut self, records: Records) {
        self.headers = records.headers();
        self.stats = PhaseStats {
            rows_loaded: records.len(),
            ..PhaseStats::default()
        };
        self.records = records;
        self.loaded = true;
        tracing::debug!(
            phase = %self.name,
            rows = self.stats.rows_loaded,
            headers = ?self.headers,
            "loaded rows"
        );
    }

    /// Run only the steps, without the column layer or save preparation
    pub fn run_steps(&mut self) -> Result<(), PhaseError> {
        self.ensure_loaded()?;
        self.prepare();
        let outcome = self.execute_steps();
        self.update_stats();
        outcome
    }

    /// Apply the declared columns, run the steps and return the rows ready to
    /// persist, with row numbers embedded. A phase can produce rows and still be
    /// failed; check [`Phase::has_errors`].
    pub fn run(&mut self) -> Result<Vec<Fields>, PhaseError> {
        let start = Instant::now();
        self.ensure_loaded()?;
        self.prepare();
        tracing::info!(phase = %self.name, rows = self.records.len(), "starting phase");

        let outcome = self.apply_columns().and_then(|_| self.execute_steps());
        self.stats.processing_time += start.elapsed();
        self.update_stats();
        outcome?;

        self.check_headers_consistent();
        self.update_stats();
        if self.has_errors() {
            tracing::warn!(
                phase = %self.name,
                errors = self.stats.errors,
                "phase finished with errors"
            );
        } else {
            tracing::info!(
                phase = %self.name,
                rows = self.stats.rows_output,
                warnings = self.stats.warnings,
                dropped = self.stats.rows_dropped,
                "phase finished"
            );
        }
        Ok(self.rows_for_save())
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn into_context(self) -> Context {
        self.context
    }

    /// Events this phase recorded, per row number
    pub fn events(&self) -> Option<&RowEvents> {
        self.context.phase_events(&self.name)
    }

    pub fn has_errors(&self) -> bool {
        self.context.has_error(&self.name)
    }

    pub fn stats(&self) -> &PhaseStats {
        &self.stats
    }

    pub fn write_report<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.context.write_report(&self.name, writer)
    }

    /// Rows with row numbers embedded, leaving out columns declared not to be saved
    pub fn rows_for_save(&self) -> Vec<Fields> {
        let dropped: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| !c.is_saved())
            .map(Column::name)
            .collect();
        self.records
            .for_save()
            .into_iter()
            .map(|mut row| {
                for name in &dropped {
                    row.shift_remove(*name);
                }
                row
            })
            .collect()
    }

    fn ensure_loaded(&self) -> Result<(), PhaseError> {
        if !self.loaded || self.records.is_empty() {
            return Err(PhaseError::NoData {
                phase: self.name.clone(),
            });
        }
        Ok(())
    }

    fn prepare(&mut self) {
        self.context.set_current_phase(self.name.clone());
        if let Some(policy) = self.config.error_policy {
            self.context.set_error_policy(policy);
        }
        self.context.set_verbose(self.config.verbose);
        for output in &self.extra_outputs {
            if !self.context.has_extra(output.name()) {
                self.context.set_output(output.clone());
            }
        }
    }

    fn execute_steps(&mut self) -> Result<(), PhaseError> {
        let Phase {
            name: phase,
            steps,
            records,
            context,
            stats,
            ..
        } = self;

        for step in steps.iter_mut() {
            let name = step.name().to_string();
            let check_size = step.checks_size();
            let pass_row_nums = step.passes_row_nums();
            let before = records.len();
            context.enter_step(&name, step.extra_sources(), step.extra_outputs());
            tracing::debug!(
                phase = %phase,
                step = %name,
                kind = %step.kind(),
                rows = records.len(),
                "running step"
            );

            let outcome = match step.func_mut() {
                StepFn::Row(f) => execute_row_step(records, context, &name, f.as_mut()),
                StepFn::Batch(f) => {
                    execute_batch_step(records, context, &name, check_size, f.as_mut())
                }
                StepFn::DataFrame(f) => execute_dataframe_step(
                    records,
                    context,
                    &name,
                    check_size,
                    pass_row_nums,
                    f.as_mut(),
                ),
                StepFn::Context(f) => execute_context_step(context, &name, f.as_mut()),
            };
            context.exit_step();
            stats.record_size_change(before, records.len());
            outcome?;
            stats.steps_run += 1;
        }
        Ok(())
    }

    fn apply_columns(&mut self) -> Result<(), PhaseError> {
        if self.columns.is_empty() {
            return Ok(());
        }

        let renamer = HeaderRenamer::new(&self.columns);
        for record in self.records.iter_mut() {
            let fields = std::mem::take(record.fields_mut());
            *record.fields_mut() = fields
                .into_iter()
                .map(|(key, value)| (renamer.rename(&key), value))
                .collect();
        }
        self.headers = self.headers.iter().map(|h| renamer.rename(h)).collect();

        for column in &self.columns {
            if let Err(err) = column.check_required(&self.headers) {
                self.context.process_failure("check_required", None, err)?;
            }
        }

        // Columns are cast in declared order; the first failing column ends the row.
        let columns = &self.columns;
        let mut cast_each_column_value = |mut row: Record, _ctx: &mut Context| -> StepResult<Record> {
            for column in columns {
                column.check_and_cast(&mut row)?;
            }
            Ok(row)
        };
        let before = self.records.len();
        self.context
            .enter_step("cast_each_column_value", &[], &[]);
        let outcome = execute_row_step(
            &mut self.records,
            &mut self.context,
            "cast_each_column_value",
            &mut cast_each_column_value,
        );
        self.context.exit_step();
        self.stats.record_size_change(before, self.records.len());
        outcome
    }

    fn check_headers_consistent(&mut self) {
        let mut reported = HashSet::new();
        for record in self.records.iter() {
            for key in record.keys() {
                if !self.headers.contains(key) && key != ROW_NUM_FIELD && reported.insert(key.clone())
                {
                    self.context.add_warning(
                        "consistency_check",
                        Some(record),
                        format!(
                            "At some point, {} was added to the row data and not declared a header",
                            key
                        ),
                    );
                }
            }
        }
    }

    fn update_stats(&mut self) {
        self.stats.rows_output = self.records.len();
        self.stats.errors = self.context.count(&self.name, EventKind::Error);
        self.stats.warnings = self.context.count(&self.name, EventKind::Warning);
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("steps", &self.steps)
            .field("columns", &self.columns)
            .field("rows", &self.records.len())
            .finish()
    }
}

fn execute_row_step<F>(
    records: &mut Records,
    context: &mut Context,
    name: &str,
    f: &mut F,
) -> Result<(), PhaseError>
where
    F: FnMut(Record, &mut Context) -> StepResult<Record> + ?Sized,
{
    let phase = context.current_phase().to_string();
    let mut rows = records.take().into_iter();
    let mut kept = Vec::with_capacity(rows.len());

    while let Some(row) = rows.next() {
        // Only the first error of a row is trapped; later steps leave it alone.
        if row
            .row_num()
            .is_some_and(|n| context.row_has_errors_in(&phase, n))
        {
            kept.push(row);
            continue;
        }

        let original = row.clone();
        let failure = match f(row, context) {
            Ok(new_row) => match adopt_row(name, &original, new_row) {
                Ok(new_row) => {
                    kept.push(new_row);
                    continue;
                }
                Err(violation) => PhaseError::Contract(violation),
            },
            Err(err) => match context.process_failure(name, Some(&original), err) {
                Ok(Disposition::Keep) => {
                    kept.push(original);
                    continue;
                }
                Ok(Disposition::Drop) => continue,
                Err(stop) => stop,
            },
        };

        kept.push(original);
        kept.extend(rows);
        records.rewrap(kept);
        return Err(failure);
    }

    records.rewrap(kept);
    Ok(())
}

/// The row a row step returned takes over the input row's number
fn adopt_row(
    step: &str,
    original: &Record,
    mut new_row: Record,
) -> Result<Record, ContractViolation> {
    match (new_row.row_num(), original.row_num()) {
        (Some(returned), Some(expected)) if returned != expected => {
            return Err(ContractViolation::new(format!(
                "Row step '{}' returned row {} in place of row {}",
                step, returned, expected
            )));
        }
        (None, Some(expected)) => new_row.set_row_num(expected),
        _ => {}
    }
    if new_row.is_empty() && !original.is_empty() {
        return Err(ContractViolation::new(format!(
            "Row step '{}' returned an empty row for row {}; raise a drop-row failure to remove a row",
            step,
            original
                .row_num()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )));
    }
    Ok(new_row)
}

fn execute_batch_step<F>(
    records: &mut Records,
    context: &mut Context,
    name: &str,
    check_size: bool,
    f: &mut F,
) -> Result<(), PhaseError>
where
    F: FnMut(Vec<Record>, &mut Context) -> StepResult<Vec<Record>> + ?Sized,
{
    let rows = records.take();
    let backup = rows.clone();
    let before = rows.len();

    match f(rows, context) {
        Ok(new_rows) => {
            let after = new_rows.len();
            records.rewrap(new_rows);
            if check_size {
                warn_on_size_change(context, name, before, after);
            }
            Ok(())
        }
        Err(err) => recover_from_failure(records, context, name, backup, err),
    }
}

fn execute_dataframe_step<F>(
    records: &mut Records,
    context: &mut Context,
    name: &str,
    check_size: bool,
    pass_row_nums: bool,
    f: &mut F,
) -> Result<(), PhaseError>
where
    F: FnMut(Table, &mut Context) -> StepResult<Table> + ?Sized,
{
    let rows = records.take();
    let before = rows.len();
    let known: Vec<u64> = rows.iter().filter_map(Record::row_num).collect();

    let mut table = Table::from_records(&rows);
    if pass_row_nums {
        let ids = known.iter().map(|n| Value::from(*n)).collect();
        if let Err(violation) = table.insert_column(ROW_NUM_FIELD, ids) {
            records.rewrap(rows);
            return Err(violation.into());
        }
    }

    match f(table, context) {
        Ok(mut result) => {
            let after = result.len();
            let ids: Vec<Option<u64>> = if pass_row_nums {
                let known: HashSet<u64> = known.into_iter().collect();
                match result.remove_column(ROW_NUM_FIELD) {
                    Some(values) => values
                        .iter()
                        .map(|v| parse_row_num(v).ok().filter(|n| known.contains(n)))
                        .collect(),
                    None => vec![None; after],
                }
            } else if after == before {
                known.into_iter().map(Some).collect()
            } else {
                vec![None; after]
            };

            let new_rows = result
                .into_rows()
                .into_iter()
                .zip(ids)
                .map(|(fields, id)| match id {
                    Some(row_num) => Record::numbered(row_num, fields),
                    None => Record::new(fields),
                })
                .collect();
            records.rewrap(new_rows);
            if check_size {
                warn_on_size_change(context, name, before, after);
            }
            Ok(())
        }
        Err(err) => recover_from_failure(records, context, name, rows, err),
    }
}

fn execute_context_step<F>(context: &mut Context, name: &str, f: &mut F) -> Result<(), PhaseError>
where
    F: FnMut(&mut Context) -> StepResult<()> + ?Sized,
{
    match f(context) {
        Ok(()) => Ok(()),
        Err(StepError::DropRow { .. }) => Err(drop_row_outside_row_step(name).into()),
        Err(err) => context.process_failure(name, None, err).map(|_| ()),
    }
}

/// Put the rows back as they were before a failed batch or dataframe step and
/// record the failure. A failure naming a row is attributed to it, and that row
/// is evicted when the policy drops rows.
fn recover_from_failure(
    records: &mut Records,
    context: &mut Context,
    name: &str,
    mut rows: Vec<Record>,
    err: StepError,
) -> Result<(), PhaseError> {
    if let StepError::DropRow { .. } = err {
        records.rewrap(rows);
        return Err(drop_row_outside_row_step(name).into());
    }

    let target = err.row();
    let snapshot = target.and_then(|n| rows.iter().find(|r| r.row_num() == Some(n)));
    let disposition = context.process_failure(name, snapshot, err);
    if let (Ok(Disposition::Drop), Some(row_num)) = (&disposition, target) {
        rows.retain(|r| r.row_num() != Some(row_num));
    }
    records.rewrap(rows);
    disposition.map(|_| ())
}

fn drop_row_outside_row_step(name: &str) -> ContractViolation {
    ContractViolation::new(format!(
        "Step '{}' raised a drop-row failure, which only row steps may raise; return fewer rows instead",
        name
    ))
}

fn warn_on_size_change(context: &mut Context, name: &str, before: usize, after: usize) {
    match after.cmp(&before) {
        Ordering::Less => context.add_warning(
            name,
            None,
            format!("{} rows were dropped by step", before - after),
        ),
        Ordering::Greater => context.add_warning(
            name,
            None,
            format!("{} rows were ADDED by step", after - before),
        ),
        Ordering::Equal => {}
    }
}
