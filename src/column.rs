//! Declared columns: header renaming, type casting and value checks applied to
//! every row before a phase's steps run.

use crate::error::{ContractViolation, StepError};
use crate::io::{is_blank, is_null_like};
use crate::pipeline::config::ErrorPolicy;
use crate::records::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const TRUE_VALUES: [&str; 5] = ["t", "true", "1", "yes", "y"];
const FALSE_VALUES: [&str; 5] = ["f", "false", "0", "no", "n"];

/// Value type a column casts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// Values are kept as they are; only true nulls count as null
    Text,
    Integer,
    Float,
    Boolean,
    /// Stored as `YYYY-MM-DD`. Parsed with the chrono format when one is given.
    Date { format: Option<String> },
    /// Stored as RFC 3339 in UTC. Parsed with the chrono format when one is given.
    DateTime { format: Option<String> },
}

impl ColumnKind {
    fn describe(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "an integer",
            ColumnKind::Float => "a float",
            ColumnKind::Boolean => "a boolean",
            ColumnKind::Date { .. } => "a date",
            ColumnKind::DateTime { .. } => "a datetime",
        }
    }
}

pub type FixFn = Box<dyn Fn(Value) -> Value>;

pub struct Column {
    name: String,
    kind: ColumnKind,
    required: bool,
    null: bool,
    blank: bool,
    default: Option<Value>,
    rename: Vec<String>,
    allowed_values: Vec<Value>,
    min: Option<Value>,
    max: Option<Value>,
    save: bool,
    on_error: Option<ErrorPolicy>,
    fixes: Vec<FixFn>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        let null = kind != ColumnKind::Boolean;
        Column {
            name: name.into().trim().to_string(),
            kind,
            required: true,
            null,
            blank: true,
            default: None,
            rename: Vec::new(),
            allowed_values: Vec::new(),
            min: None,
            max: None,
            save: true,
            on_error: None,
            fixes: Vec::new(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Float)
    }

    /// Boolean columns reject nulls unless `null(true)` is set
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Date { format: None })
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::DateTime { format: None })
    }

    /// chrono format string used to parse dates and datetimes
    pub fn format(mut self, format: impl Into<String>) -> Self {
        match &mut self.kind {
            ColumnKind::Date { format: f } | ColumnKind::DateTime { format: f } => {
                *f = Some(format.into())
            }
            _ => {}
        }
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn null(mut self, null: bool) -> Self {
        self.null = null;
        self
    }

    pub fn blank(mut self, blank: bool) -> Self {
        self.blank = blank;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Other header names whose data belongs in this column
    pub fn rename<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rename.extend(names.into_iter().map(Into::into));
        self
    }

    /// Checked after casting, so an integer column lists integers
    pub fn allowed_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed_values.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn min(mut self, value: impl Into<Value>) -> Self {
        self.min = Some(value.into());
        self
    }

    pub fn max(mut self, value: impl Into<Value>) -> Self {
        self.max = Some(value.into());
        self
    }

    pub fn save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }

    /// Add a function applied to every value after casting and defaults
    pub fn fix<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + 'static,
    {
        self.fixes.push(Box::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_saved(&self) -> bool {
        self.save
    }

    pub fn alternate_names(&self) -> &[String] {
        &self.rename
    }

    /// Reject declarations that can never be satisfied
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.contains(['\n', '\t']) {
            return Err(ContractViolation::new(format!(
                "Column name {:?} contains a tab or newline",
                self.name
            )));
        }
        if !self.null && self.default.as_ref().is_some_and(|v| !v.is_null()) {
            return Err(ContractViolation::new(format!(
                "Column {} defined to error on null values, but also provides a non-null default",
                self.name
            )));
        }
        Ok(())
    }

    /// Failure of the kind `on_error` selects
    pub fn failure(&self, message: impl Into<String>) -> StepError {
        let message = message.into();
        match self.on_error {
            Some(ErrorPolicy::Warn) => StepError::warning(message),
            Some(ErrorPolicy::DropRow) => StepError::drop_row(message),
            Some(ErrorPolicy::StopNow) => StepError::other(anyhow::anyhow!(message)),
            Some(ErrorPolicy::Collect) | None => StepError::data(message),
        }
    }

    pub fn check_required(&self, headers: &[String]) -> Result<(), StepError> {
        if self.required && !headers.iter().any(|h| h == &self.name) {
            return Err(self.failure(format!("Header {} not found in {:?}", self.name, headers)));
        }
        Ok(())
    }

    /// Cast, check and fix this column's value in `row`
    pub fn check_and_cast(&self, row: &mut Record) -> Result<(), StepError> {
        let value = row.get(&self.name).cloned().unwrap_or(Value::Null);
        let value = self.cast(value)?;
        self.check_value(&value)?;
        let was_null = value.is_null();
        let fixed = self.fix_value(value);
        if fixed.is_null() && !was_null {
            tracing::debug!(column = %self.name, "value set to null while fixing");
        }
        row.insert(self.name.clone(), fixed);
        Ok(())
    }

    pub fn cast(&self, value: Value) -> Result<Value, StepError> {
        if self.kind == ColumnKind::Text {
            return Ok(value);
        }
        if is_null_like(&value) || is_blank(&value) {
            return Ok(Value::Null);
        }
        let cast = match &self.kind {
            ColumnKind::Text => Some(value.clone()),
            ColumnKind::Integer => cast_integer(&value),
            ColumnKind::Float => cast_float(&value),
            ColumnKind::Boolean => cast_boolean(&value),
            ColumnKind::Date { format } => text_of(&value)
                .and_then(|text| parse_date(text, format.as_deref()))
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
            ColumnKind::DateTime { format } => text_of(&value)
                .and_then(|text| parse_datetime(text, format.as_deref()))
                .map(|dt| Value::String(dt.to_rfc3339())),
        };
        cast.ok_or_else(|| {
            self.failure(format!(
                "Value {} in column {} not recognized as {}",
                value,
                self.name,
                self.kind.describe()
            ))
        })
    }

    pub fn check_value(&self, value: &Value) -> Result<(), StepError> {
        if value.is_null() {
            if !self.null {
                return Err(self.failure(format!("Null value found in column {}", self.name)));
            }
            return Ok(());
        }
        if !self.blank && is_blank(value) {
            return Err(self.failure(format!("Column `{}' had blank value", self.name)));
        }
        if !self.allowed_values.is_empty() && !self.allowed_values.contains(value) {
            return Err(self.failure(format!(
                "Column '{}' had value {} not found in allowed values",
                self.name, value
            )));
        }
        if let Some(min) = &self.min {
            if compare_values(value, min) == Some(Ordering::Less) {
                return Err(self.failure(format!(
                    "Value for {} is {}, less than min {}",
                    self.name, value, min
                )));
            }
        }
        if let Some(max) = &self.max {
            if compare_values(value, max) == Some(Ordering::Greater) {
                return Err(self.failure(format!(
                    "Value for {} is {}, more than max {}",
                    self.name, value, max
                )));
            }
        }
        Ok(())
    }

    pub fn fix_value(&self, value: Value) -> Value {
        let mut value = match (&value, &self.default) {
            (Value::Null, Some(default)) => default.clone(),
            _ => value,
        };
        for fix in &self.fixes {
            value = fix(value);
        }
        value
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("null", &self.null)
            .field("blank", &self.blank)
            .field("default", &self.default)
            .field("rename", &self.rename)
            .field("save", &self.save)
            .field("on_error", &self.on_error)
            .field("fixes", &self.fixes.len())
            .finish()
    }
}

fn text_of(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim)
}

fn cast_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(Value::from),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .map(Value::from)
        }
        _ => None,
    }
}

fn cast_float(value: &Value) -> Option<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn cast_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(Value::Bool(true)),
            Some(0) => Some(Value::Bool(false)),
            _ => None,
        },
        Value::String(s) => {
            let lower = s.trim().to_lowercase();
            if TRUE_VALUES.contains(&lower.as_str()) {
                Some(Value::Bool(true))
            } else if FALSE_VALUES.contains(&lower.as_str()) {
                Some(Value::Bool(false))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_date(text: &str, format: Option<&str>) -> Option<NaiveDate> {
    match format {
        Some(fmt) => NaiveDate::parse_from_str(text, fmt)
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(text, fmt).ok().map(|dt| dt.date())),
        None => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_datetime(text, None).map(|dt| dt.date_naive())),
    }
}

fn parse_datetime(text: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    match format {
        Some(fmt) => DateTime::parse_from_str(text, fmt)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, fmt)
                    .ok()
                    .map(|dt| dt.and_utc())
            }),
        None => dateparser::parse_with_timezone(text, &Utc).ok(),
    }
}

/// Order two values of the same family: numbers numerically, everything else by
/// its text. Values of different families do not compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Normalise a header the way hand-edited spreadsheets tend to vary it:
/// lower case, underscores and tabs read as spaces, runs of whitespace collapsed.
pub fn make_strict_name(name: &str) -> String {
    let lowered = name.to_lowercase().replace('_', " ");
    WHITESPACE_RUN.replace_all(lowered.trim(), " ").into_owned()
}

/// Maps data headers onto declared column names
pub(crate) struct HeaderRenamer {
    strict: IndexMap<String, String>,
    alternates: IndexMap<String, String>,
}

impl HeaderRenamer {
    pub(crate) fn new(columns: &[Column]) -> Self {
        HeaderRenamer {
            strict: columns
                .iter()
                .map(|c| (make_strict_name(&c.name), c.name.clone()))
                .collect(),
            alternates: columns
                .iter()
                .flat_map(|c| c.rename.iter().map(move |alt| (alt.clone(), c.name.clone())))
                .collect(),
        }
    }

    pub(crate) fn rename(&self, header: &str) -> String {
        let header = header.trim();
        let name = self
            .strict
            .get(&make_strict_name(header))
            .cloned()
            .unwrap_or_else(|| header.to_string());
        self.alternates.get(&name).cloned().unwrap_or(name)
    }
}
