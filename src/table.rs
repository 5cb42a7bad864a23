//! Columnar view of rows, handed to dataframe steps.

use crate::error::ContractViolation;
use crate::records::{Fields, Record};
use indexmap::IndexMap;
use serde_json::Value;

/// Rows stored column by column. Every column has exactly `len()` values; a value
/// missing from a row is stored as null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: IndexMap<String, Vec<Value>>,
    len: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from rows; the columns are the union of the rows' fields in
    /// first-seen order.
    pub fn from_rows(rows: &[Fields]) -> Self {
        let mut table = Table::new();
        for row in rows {
            table.push_row(row.clone());
        }
        table
    }

    pub fn from_records(records: &[Record]) -> Self {
        let mut table = Table::new();
        for record in records {
            table.push_row(record.fields().clone());
        }
        table
    }

    /// Convert back to rows. Every row carries every column.
    pub fn into_rows(self) -> Vec<Fields> {
        let mut rows: Vec<Fields> = (0..self.len).map(|_| Fields::new()).collect();
        for (name, values) in self.columns {
            for (row, value) in rows.iter_mut().zip(values) {
                row.insert(name.clone(), value);
            }
        }
        rows
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Values of a column, editable in place
    pub fn column_mut(&mut self, name: &str) -> Option<&mut [Value]> {
        self.columns.get_mut(name).map(Vec::as_mut_slice)
    }

    /// Add or replace a column. The number of values must match the table length,
    /// except on a table with no rows and no columns, which takes the column's length.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<(), ContractViolation> {
        let name = name.into();
        if self.columns.is_empty() && self.len == 0 {
            self.len = values.len();
        } else if values.len() != self.len {
            return Err(ContractViolation::new(format!(
                "Column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.len
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Value>> {
        self.columns.shift_remove(name)
    }

    /// Values of one row, in column order
    pub fn row(&self, index: usize) -> Option<Fields> {
        if index >= self.len {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|(name, values)| (name.clone(), values[index].clone()))
                .collect(),
        )
    }

    /// Append a row; columns new to the table are back-filled with null
    pub fn push_row(&mut self, mut row: Fields) {
        for (name, values) in self.columns.iter_mut() {
            values.push(row.shift_remove(name).unwrap_or(Value::Null));
        }
        for (name, value) in row {
            let mut values = vec![Value::Null; self.len];
            values.push(value);
            self.columns.insert(name, values);
        }
        self.len += 1;
    }

    /// Append the rows of `other`, taking the union of the columns
    pub fn append(&mut self, other: Table) {
        for row in other.into_rows() {
            self.push_row(row);
        }
    }

    /// Keep only the rows for which `keep` returns true
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Fields) -> bool,
    {
        let mask: Vec<bool> = (0..self.len)
            .map(|i| self.row(i).is_some_and(|row| keep(&row)))
            .collect();
        for values in self.columns.values_mut() {
            let mut flags = mask.iter();
            values.retain(|_| flags.next().copied().unwrap_or(false));
        }
        self.len = mask.iter().filter(|k| **k).count();
    }
}
