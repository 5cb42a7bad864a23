//! Row identity: [`Record`] is one row tagged with a row number, [`Records`] is the
//! ordered collection that owns the row-number generator.
//!
//! Row numbers are stable across steps. A row keeps its number as long as the same
//! `Record` flows through the steps; rows built from scratch with [`Record::new`] are
//! treated as new rows and get a fresh number when they are wrapped into a collection.

use crate::error::ContractViolation;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved field under which row numbers are persisted.
pub const ROW_NUM_FIELD: &str = "__phaser_row_num__";

/// Field name → value map of a single row, in column order.
pub type Fields = IndexMap<String, Value>;

/// A single row of data plus its row number.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    row_num: Option<u64>,
    fields: Fields,
}

impl Record {
    /// Create a row without a number. It is numbered when wrapped into [`Records`],
    /// or inherits the number of the row it replaces when returned from a row step.
    pub fn new(fields: Fields) -> Self {
        Record {
            row_num: None,
            fields,
        }
    }

    pub(crate) fn numbered(row_num: u64, fields: Fields) -> Self {
        Record {
            row_num: Some(row_num),
            fields,
        }
    }

    pub fn row_num(&self) -> Option<u64> {
        self.row_num
    }

    pub(crate) fn set_row_num(&mut self, row_num: u64) {
        self.row_num = Some(row_num);
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields with the row number embedded under [`ROW_NUM_FIELD`], ready to persist.
    pub fn to_saved(&self) -> Fields {
        let mut saved = self.fields.clone();
        if let Some(row_num) = self.row_num {
            saved.insert(ROW_NUM_FIELD.to_string(), Value::from(row_num));
        }
        saved
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Record::new(fields)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Record::new(iter.into_iter().collect())
    }
}

/// Convert a JSON object into row fields. Returns `None` for anything but an object.
pub fn fields_from_value(value: Value) -> Option<Fields> {
    match value {
        Value::Object(map) => Some(map.into_iter().collect()),
        _ => None,
    }
}

/// How row numbers embedded in raw rows are treated when loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Numbering {
    /// Adopt valid embedded row numbers, number the rest
    #[default]
    Preserve,
    /// Ignore embedded row numbers and number every row afresh
    Renumber,
}

/// Row-number generator: never issues a number at or below the running maximum.
#[derive(Debug, Clone)]
pub struct RowNumbers {
    next: u64,
    max_seen: u64,
}

impl Default for RowNumbers {
    fn default() -> Self {
        RowNumbers {
            next: 1,
            max_seen: 0,
        }
    }
}

impl RowNumbers {
    pub fn issue(&mut self) -> u64 {
        let value = self.next.max(self.max_seen.saturating_add(1));
        self.next = value.saturating_add(1);
        self.max_seen = value;
        value
    }

    pub fn observe(&mut self, row_num: u64) {
        if row_num > self.max_seen {
            self.max_seen = row_num;
        }
    }

    pub fn max_seen(&self) -> u64 {
        self.max_seen
    }
}

/// Largest row number accepted from saved data. Fresh numbers are issued above the
/// largest one seen, so saved numbers stay well clear of `u64::MAX`.
pub const MAX_ROW_NUM: u64 = i64::MAX as u64;

/// Parse an embedded row number. Anything but a positive integer (or a string holding
/// one) up to [`MAX_ROW_NUM`] is a contract violation.
pub fn parse_row_num(value: &Value) -> Result<u64, ContractViolation> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n > 0 && n <= MAX_ROW_NUM => Ok(n),
        Some(n) if n > MAX_ROW_NUM => Err(ContractViolation::new(format!(
            "Invalid value for {}: {} (row numbers cannot exceed {})",
            ROW_NUM_FIELD, value, MAX_ROW_NUM
        ))),
        _ => Err(ContractViolation::new(format!(
            "Invalid value for {}: {} (row numbers must be positive integers)",
            ROW_NUM_FIELD, value
        ))),
    }
}

/// Ordered rows plus the generator that numbers new rows.
#[derive(Debug, Clone, Default)]
pub struct Records {
    rows: Vec<Record>,
    numbers: RowNumbers,
}

impl Records {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap raw rows, numbering them according to `numbering`.
    pub fn load(raw_rows: Vec<Fields>, numbering: Numbering) -> Result<Self, ContractViolation> {
        let mut numbers = RowNumbers::default();
        let mut seen = IndexSet::new();
        let mut pending = Vec::with_capacity(raw_rows.len());

        // Embedded numbers are all observed before any fresh number is issued.
        for mut fields in raw_rows {
            let embedded = fields.shift_remove(ROW_NUM_FIELD);
            let row_num = match (numbering, embedded) {
                (Numbering::Preserve, Some(value)) => {
                    let row_num = parse_row_num(&value)?;
                    if !seen.insert(row_num) {
                        return Err(ContractViolation::new(format!(
                            "Duplicate {} value {} while loading records",
                            ROW_NUM_FIELD, row_num
                        )));
                    }
                    numbers.observe(row_num);
                    Some(row_num)
                }
                _ => None,
            };
            pending.push((row_num, fields));
        }

        let rows = pending
            .into_iter()
            .map(|(row_num, fields)| {
                let row_num = row_num.unwrap_or_else(|| numbers.issue());
                Record::numbered(row_num, fields)
            })
            .collect();

        Ok(Records { rows, numbers })
    }

    /// Wrap records that may or may not carry numbers, using a fresh generator.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut wrapped = Records::new();
        wrapped.rewrap(records);
        wrapped
    }

    /// Replace the rows with `records`, keeping the generator state.
    ///
    /// A record keeps its number unless an earlier record in `records` already holds
    /// it; unnumbered and duplicated records receive fresh numbers.
    pub fn rewrap(&mut self, records: Vec<Record>) {
        let mut seen = IndexSet::new();
        let mut records = records;
        for record in &mut records {
            match record.row_num {
                Some(row_num) if seen.insert(row_num) => self.numbers.observe(row_num),
                _ => record.row_num = None,
            }
        }
        for record in &mut records {
            if record.row_num.is_none() {
                record.row_num = Some(self.numbers.issue());
            }
        }
        self.rows = records;
    }

    /// Append a record; it is numbered afresh unless it carries a number not yet used.
    pub fn push(&mut self, mut record: Record) {
        let taken = record
            .row_num
            .is_some_and(|n| self.rows.iter().any(|r| r.row_num == Some(n)));
        match record.row_num {
            Some(row_num) if !taken => self.numbers.observe(row_num),
            _ => record.row_num = Some(self.numbers.issue()),
        }
        self.rows.push(record);
    }

    /// Explicitly renumber every row 1..=n in current order and reset the generator.
    pub fn renumber(&mut self) {
        self.numbers = RowNumbers::default();
        for record in &mut self.rows {
            record.row_num = Some(self.numbers.issue());
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.rows.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Record> {
        self.rows.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.rows.get(index)
    }

    /// Look a row up by its row number.
    pub fn find(&self, row_num: u64) -> Option<&Record> {
        self.rows.iter().find(|r| r.row_num == Some(row_num))
    }

    pub fn row_nums(&self) -> Vec<u64> {
        self.rows.iter().filter_map(Record::row_num).collect()
    }

    /// Field names of the first row.
    pub fn headers(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Take the rows out, leaving the collection empty but keeping the generator.
    pub fn take(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.rows)
    }

    pub fn into_vec(self) -> Vec<Record> {
        self.rows
    }

    /// Rows with row numbers embedded under [`ROW_NUM_FIELD`].
    pub fn for_save(&self) -> Vec<Fields> {
        self.rows.iter().map(Record::to_saved).collect()
    }

    /// Rows as plain field maps, without row numbers.
    pub fn to_plain(&self) -> Vec<Fields> {
        self.rows.iter().map(|r| r.fields.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a Records {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl IntoIterator for Records {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
