// tests/builtins_tests.rs
use phaser::builtins::{check_unique, filter_rows, sort_by};
use phaser::{EventKind, Fields, Phase};
use serde_json::{json, Value};

fn rows(value: Value) -> Vec<Fields> {
    phaser::io::rows_from_json(value, "test").unwrap()
}

#[test]
fn test_check_unique_passes_and_fails() {
    println!("=== Testing Builtins: check_unique ===");

    let mut ok = Phase::new("unique")
        .with_steps(vec![check_unique("id", true, false)])
        .unwrap();
    ok.load(rows(json!([{"id": "a"}, {"id": "A"}, {"id": "b"}]))).unwrap();
    ok.run_steps().unwrap();
    assert!(!ok.has_errors());

    let mut case_blind = Phase::new("case_blind")
        .with_steps(vec![check_unique("id", true, true)])
        .unwrap();
    case_blind
        .load(rows(json!([{"id": "a "}, {"id": "A"}])))
        .unwrap();
    case_blind.run_steps().unwrap();
    assert!(case_blind.has_errors());
    // values are not changed by the check
    assert_eq!(case_blind.records().find(1).unwrap().get("id"), Some(&json!("a ")));

    let mut missing = Phase::new("missing")
        .with_steps(vec![check_unique("id", true, false)])
        .unwrap();
    missing.load(rows(json!([{"id": 1}, {"name": "x"}]))).unwrap();
    missing.run_steps().unwrap();
    assert!(missing.has_errors());
    println!("✓ Duplicates and missing values reported");
}

#[test]
fn test_sort_by_keeps_numbers() {
    let mut phase = Phase::new("sorting")
        .with_steps(vec![sort_by("deck")])
        .unwrap();
    phase
        .load(rows(json!([{"deck": 12}, {"deck": null}, {"deck": 3}, {"deck": 12}])))
        .unwrap();
    phase.run_steps().unwrap();

    assert_eq!(phase.records().row_nums(), vec![2, 3, 1, 4]);
    assert!(phase.context().get_events(None, None).is_empty());
}

#[test]
fn test_filter_rows_records_one_summary() {
    println!("=== Testing Builtins: filter_rows ===");

    let mut phase = Phase::new("filtering")
        .with_steps(vec![filter_rows("is_officer", |row| {
            row.get("rank").and_then(Value::as_str) != Some("Ensign")
        })])
        .unwrap();
    phase
        .load(rows(json!([
            {"rank": "Captain"}, {"rank": "Ensign"}, {"rank": "Ensign"}, {"rank": "Commander"}
        ])))
        .unwrap();
    phase.run_steps().unwrap();

    assert_eq!(phase.records().row_nums(), vec![1, 4]);
    let events = phase.context().get_events(Some("filtering"), None);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::DroppedRow);
    assert_eq!(events[0].row_num, None);
    assert_eq!(events[0].message, "2 rows dropped in filter_rows with 'is_officer'");
    println!("✓ One DROPPED_ROW event for the whole filter");
}
