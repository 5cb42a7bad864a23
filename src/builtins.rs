//! Ready-made steps for common checks and reshaping
use crate::error::StepError;
use crate::pipeline::step::Step;
use crate::records::{Fields, Record};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Batch step failing with a data error when any row lacks `column` or when two
/// rows share a value. Values are compared after optional trimming and lower-casing
/// but are not changed.
pub fn check_unique(column: impl Into<String>, strip: bool, ignore_case: bool) -> Step {
    let column = column.into();
    Step::batch("check_unique", move |batch: Vec<Record>, _ctx| {
        let mut seen = HashSet::with_capacity(batch.len());
        for row in &batch {
            let value = row.get(&column).ok_or_else(|| {
                StepError::data(format!(
                    "check_unique: some or all rows did not have '{}' present",
                    column
                ))
            })?;
            let key = match value {
                Value::String(s) => {
                    let s = if strip { s.trim() } else { s.as_str() };
                    let s = if ignore_case { s.to_lowercase() } else { s.to_string() };
                    format!("s:{}", s)
                }
                other => format!("v:{}", other),
            };
            if !seen.insert(key) {
                return Err(StepError::data(format!(
                    "Some values in {} were duplicated, so unique check failed",
                    column
                )));
            }
        }
        Ok(batch)
    })
}

/// Batch step ordering rows by `column`, keeping the existing order for ties.
/// Missing values sort with nulls, first.
pub fn sort_by(column: impl Into<String>) -> Step {
    let column = column.into();
    Step::batch("sort_by", move |mut batch: Vec<Record>, _ctx| {
        batch.sort_by(|a, b| {
            compare_for_sort(
                a.get(&column).unwrap_or(&Value::Null),
                b.get(&column).unwrap_or(&Value::Null),
            )
        });
        Ok(batch)
    })
}

/// Batch step keeping only rows `predicate` accepts. Instead of one event per row,
/// a single DROPPED_ROW event summarises how many rows went.
pub fn filter_rows<F>(name: impl Into<String>, mut predicate: F) -> Step
where
    F: FnMut(&Fields) -> bool + 'static,
{
    let name = name.into();
    Step::batch("filter_rows", move |batch: Vec<Record>, ctx| {
        let before = batch.len();
        let kept: Vec<Record> = batch
            .into_iter()
            .filter(|row| predicate(row.fields()))
            .collect();
        let dropped = before - kept.len();
        if dropped > 0 {
            ctx.add_dropped_row(
                "filter_rows",
                None,
                format!("{} rows dropped in filter_rows with '{}'", dropped, name),
            );
        }
        Ok(kept)
    })
    .check_size(false)
}

fn sort_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => sort_rank(a).cmp(&sort_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_order_across_types() {
        let mut values = vec![json!("b"), json!(2), json!(null), json!(true), json!(1.5), json!("a")];
        values.sort_by(compare_for_sort);
        assert_eq!(
            values,
            vec![json!(null), json!(true), json!(1.5), json!(2), json!("a"), json!("b")]
        );
    }
}
