// tests/dataframe_step_tests.rs
use phaser::{Context, EventKind, Fields, Phase, PhaseError, Step, StepError, StepResult, Table, ROW_NUM_FIELD};
use serde_json::{json, Value};

fn rows(value: Value) -> Vec<Fields> {
    phaser::io::rows_from_json(value, "test").unwrap()
}

fn crew() -> Vec<Fields> {
    rows(json!([
        {"name": "Kirk", "bonus_a": 10, "bonus_b": 5},
        {"name": "Spock", "bonus_a": 7, "bonus_b": 1},
        {"name": "McCoy", "bonus_a": 3, "bonus_b": 2},
    ]))
}

fn sum_bonuses(mut table: Table, _ctx: &mut Context) -> StepResult<Table> {
    let a = table.column("bonus_a").unwrap_or_default().to_vec();
    let b = table.column("bonus_b").unwrap_or_default().to_vec();
    let totals = a
        .iter()
        .zip(&b)
        .map(|(x, y)| json!(x.as_i64().unwrap_or(0) + y.as_i64().unwrap_or(0)))
        .collect();
    table.insert_column("total", totals)?;
    Ok(table)
}

#[test]
fn test_dataframe_step_keeps_row_numbers() {
    println!("=== Testing DataFrame Steps: identity round trip ===");

    let mut phase = Phase::new("bonuses")
        .with_steps(vec![Step::dataframe("sum_bonuses", sum_bonuses)])
        .unwrap();
    phase.load(crew()).unwrap();
    phase.run_steps().unwrap();

    assert_eq!(phase.records().row_nums(), vec![1, 2, 3]);
    let kirk = phase.records().find(1).unwrap();
    assert_eq!(kirk.get("total"), Some(&json!(15)));
    assert!(!kirk.contains_key(ROW_NUM_FIELD));
    assert!(phase.context().get_events(None, None).is_empty());
    println!("✓ Numbers survive the columnar round trip");
}

#[test]
fn test_dataframe_step_sees_row_numbers() {
    let mut phase = Phase::new("peek")
        .with_steps(vec![Step::dataframe("check_ids", |table, _ctx| {
            let ids = table.column(ROW_NUM_FIELD).unwrap_or_default();
            if ids != [json!(1), json!(2), json!(3)] {
                return Err(StepError::data(format!("unexpected ids {:?}", ids)));
            }
            Ok(table)
        })])
        .unwrap();
    phase.load(crew()).unwrap();
    phase.run_steps().unwrap();
    assert!(!phase.has_errors());
}

#[test]
fn test_dataframe_sort_and_append() {
    println!("=== Testing DataFrame Steps: reorder and append ===");

    let mut phase = Phase::new("reshape")
        .with_steps(vec![Step::dataframe("reverse_and_append", |table, _ctx| {
            let mut rows = table.into_rows();
            rows.reverse();
            let mut result = Table::from_rows(&rows);
            let mut extra = Fields::new();
            extra.insert("name".to_string(), json!("Scotty"));
            result.push_row(extra);
            Ok(result)
        })])
        .unwrap();
    phase.load(crew()).unwrap();
    phase.run_steps().unwrap();

    assert_eq!(phase.records().row_nums(), vec![3, 2, 1, 4]);
    assert_eq!(phase.records().find(4).unwrap().get("name"), Some(&json!("Scotty")));

    let events = phase.context().get_events(Some("reshape"), None);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "1 rows were ADDED by step");
    println!("✓ Reordered rows keep numbers, new row gets 4");
}

#[test]
fn test_unknown_and_duplicate_ids_get_fresh_numbers() {
    let mut phase = Phase::new("ids")
        .with_steps(vec![Step::dataframe("tamper", |mut table, _ctx| {
            if let Some(ids) = table.column_mut(ROW_NUM_FIELD) {
                ids[1] = json!(99);
                ids[2] = json!(1);
            }
            Ok(table)
        })])
        .unwrap();
    phase.load(crew()).unwrap();
    phase.run_steps().unwrap();

    assert_eq!(phase.records().row_nums(), vec![1, 4, 5]);
}

#[test]
fn test_without_row_numbers_same_length_is_positional() {
    let mut phase = Phase::new("positional")
        .with_steps(vec![Step::dataframe("sum_bonuses", sum_bonuses).pass_row_nums(false)])
        .unwrap();
    phase.load(crew()).unwrap();
    phase.run_steps().unwrap();

    assert_eq!(phase.records().row_nums(), vec![1, 2, 3]);
}

#[test]
fn test_without_row_numbers_size_change_renumbers() {
    let mut phase = Phase::new("shrink")
        .with_steps(vec![Step::dataframe("only_big", |mut table, _ctx| {
            assert!(!table.has_column(ROW_NUM_FIELD));
            table.retain_rows(|row| row["bonus_a"].as_i64().unwrap_or(0) > 5);
            Ok(table)
        })
        .pass_row_nums(false)
        .check_size(false)])
        .unwrap();
    phase.load(crew()).unwrap();
    phase.run_steps().unwrap();

    assert_eq!(phase.records().row_nums(), vec![4, 5]);
    assert!(phase.context().get_events(None, None).is_empty());
}

#[test]
fn test_dataframe_drop_row_is_contract_violation() {
    let mut phase = Phase::new("bad_frame")
        .with_steps(vec![Step::dataframe("drop", |_table, _ctx| {
            Err(StepError::drop_row("no"))
        })])
        .unwrap();
    phase.load(crew()).unwrap();
    assert!(matches!(phase.run_steps(), Err(PhaseError::Contract(_))));
    assert_eq!(phase.records().row_nums(), vec![1, 2, 3]);
}

#[test]
fn test_dataframe_failure_follows_policy() {
    let mut phase = Phase::new("frame_warn")
        .with_steps(vec![Step::dataframe("fails", |_table, _ctx| {
            Err(StepError::other(anyhow::anyhow!("column math went wrong")))
        })])
        .unwrap();
    phase.context_mut().set_error_policy(phaser::ErrorPolicy::Warn);
    phase.load(crew()).unwrap();
    phase.run_steps().unwrap();

    let events = phase.context().get_events(Some("frame_warn"), None);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Warning);
    assert_eq!(events[0].message, "Error raised (column math went wrong)");
    assert_eq!(phase.records().len(), 3);
}
