use crate::error::StepError;
use crate::pipeline::context::Context;
use crate::records::Record;
use crate::table::Table;

pub type StepResult<T> = Result<T, StepError>;

pub type RowFn = Box<dyn FnMut(Record, &mut Context) -> StepResult<Record>>;
pub type BatchFn = Box<dyn FnMut(Vec<Record>, &mut Context) -> StepResult<Vec<Record>>>;
pub type DataFrameFn = Box<dyn FnMut(Table, &mut Context) -> StepResult<Table>>;
pub type ContextFn = Box<dyn FnMut(&mut Context) -> StepResult<()>>;

/// The callable behind a step, tagged with how the runner has to drive it
pub enum StepFn {
    /// Called once per row
    Row(RowFn),
    /// Called once with every row
    Batch(BatchFn),
    /// Called once with the rows as a columnar table
    DataFrame(DataFrameFn),
    /// Called once with only the context; rows are untouched
    Context(ContextFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Row,
    Batch,
    DataFrame,
    Context,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepKind::Row => "row",
            StepKind::Batch => "batch",
            StepKind::DataFrame => "dataframe",
            StepKind::Context => "context",
        };
        f.write_str(name)
    }
}

/// A named unit of work in a phase
pub struct Step {
    name: String,
    func: StepFn,
    extra_sources: Vec<String>,
    extra_outputs: Vec<String>,
    check_size: bool,
    pass_row_nums: bool,
}

impl Step {
    fn build(name: impl Into<String>, func: StepFn) -> Self {
        Step {
            name: name.into(),
            func,
            extra_sources: Vec::new(),
            extra_outputs: Vec::new(),
            check_size: true,
            pass_row_nums: true,
        }
    }

    pub fn row<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(Record, &mut Context) -> StepResult<Record> + 'static,
    {
        Self::build(name, StepFn::Row(Box::new(f)))
    }

    pub fn batch<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(Vec<Record>, &mut Context) -> StepResult<Vec<Record>> + 'static,
    {
        Self::build(name, StepFn::Batch(Box::new(f)))
    }

    pub fn dataframe<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(Table, &mut Context) -> StepResult<Table> + 'static,
    {
        Self::build(name, StepFn::DataFrame(Box::new(f)))
    }

    pub fn context<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut Context) -> StepResult<()> + 'static,
    {
        Self::build(name, StepFn::Context(Box::new(f)))
    }

    /// Declare the extra sources this step reads
    pub fn with_sources<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_sources.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare the extra outputs this step writes
    pub fn with_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_outputs.extend(names.into_iter().map(Into::into));
        self
    }

    /// Warn when a batch or dataframe step changes the number of rows (default on)
    pub fn check_size(mut self, check: bool) -> Self {
        self.check_size = check;
        self
    }

    /// Expose row numbers to a dataframe step as a column (default on)
    pub fn pass_row_nums(mut self, pass: bool) -> Self {
        self.pass_row_nums = pass;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StepKind {
        match self.func {
            StepFn::Row(_) => StepKind::Row,
            StepFn::Batch(_) => StepKind::Batch,
            StepFn::DataFrame(_) => StepKind::DataFrame,
            StepFn::Context(_) => StepKind::Context,
        }
    }

    pub fn extra_sources(&self) -> &[String] {
        &self.extra_sources
    }

    pub fn extra_outputs(&self) -> &[String] {
        &self.extra_outputs
    }

    pub fn checks_size(&self) -> bool {
        self.check_size
    }

    pub fn passes_row_nums(&self) -> bool {
        self.pass_row_nums
    }

    pub(crate) fn func_mut(&mut self) -> &mut StepFn {
        &mut self.func
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("extra_sources", &self.extra_sources)
            .field("extra_outputs", &self.extra_outputs)
            .field("check_size", &self.check_size)
            .field("pass_row_nums", &self.pass_row_nums)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough(row: Record, _ctx: &mut Context) -> StepResult<Record> {
        Ok(row)
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Step::row("r", passthrough).kind(), StepKind::Row);
        assert_eq!(Step::batch("b", |rows, _ctx| Ok(rows)).kind(), StepKind::Batch);
        assert_eq!(Step::dataframe("d", |t, _ctx| Ok(t)).kind(), StepKind::DataFrame);
        assert_eq!(Step::context("c", |_ctx| Ok(())).kind(), StepKind::Context);
    }

    #[test]
    fn test_options() {
        let step = Step::batch("b", |rows, _ctx| Ok(rows))
            .with_sources(["lookup"])
            .with_outputs(vec!["summary".to_string()])
            .check_size(false);
        assert_eq!(step.extra_sources(), ["lookup"]);
        assert_eq!(step.extra_outputs(), ["summary"]);
        assert!(!step.checks_size());
        assert!(step.passes_row_nums());
        assert!(format!("{:?}", step).contains("Batch"));
    }
}
