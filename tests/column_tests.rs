// tests/column_tests.rs
use phaser::{Column, ErrorPolicy, EventKind, Fields, Phase, PhaseError, ROW_NUM_FIELD};
use serde_json::{json, Value};

fn rows(value: Value) -> Vec<Fields> {
    phaser::io::rows_from_json(value, "test").unwrap()
}

#[test]
fn test_headers_renamed_to_declared_names() {
    println!("=== Testing Columns: renaming ===");

    let mut phase = Phase::new("rename")
        .with_columns(vec![
            Column::text("First name"),
            Column::text("crew_id").rename(["ID", "ident"]),
        ])
        .unwrap();
    phase
        .load(rows(json!([{"first_NAME": "James", "ident": "1"}])))
        .unwrap();
    let saved = phase.run().unwrap();

    assert_eq!(phase.headers(), ["First name", "crew_id"]);
    assert_eq!(saved[0]["First name"], json!("James"));
    assert_eq!(saved[0]["crew_id"], json!("1"));
    assert!(phase.context().get_events(None, None).is_empty());
    println!("✓ Headers mapped onto declared names");
}

#[test]
fn test_values_cast_to_column_types() {
    let mut phase = Phase::new("cast")
        .with_columns(vec![
            Column::integer("deck"),
            Column::float("warp"),
            Column::boolean("active"),
            Column::date("born"),
        ])
        .unwrap();
    phase
        .load(rows(json!([
            {"deck": "12", "warp": "9.5", "active": "Yes", "born": "2233-03-22"},
            {"deck": "", "warp": "NULL", "active": "n", "born": "2230-01-01"},
        ])))
        .unwrap();
    phase.run().unwrap();

    let first = phase.records().find(1).unwrap();
    assert_eq!(first.get("deck"), Some(&json!(12)));
    assert_eq!(first.get("warp"), Some(&json!(9.5)));
    assert_eq!(first.get("active"), Some(&json!(true)));
    assert_eq!(first.get("born"), Some(&json!("2233-03-22")));

    let second = phase.records().find(2).unwrap();
    assert_eq!(second.get("deck"), Some(&Value::Null));
    assert_eq!(second.get("warp"), Some(&Value::Null));
    assert!(!phase.has_errors());
}

#[test]
fn test_missing_required_column_is_an_error() {
    let mut phase = Phase::new("required")
        .with_columns(vec![Column::text("name"), Column::text("rank").required(false)])
        .unwrap();
    phase.load(rows(json!([{"id": 1}]))).unwrap();
    phase.run().unwrap();

    assert!(phase.has_errors());
    let events = phase.context().get_events(Some("required"), None);
    assert_eq!(events[0].step_name, "check_required");
    assert_eq!(events[0].row_num, None);
    assert!(events[0].message.contains("Header name not found"));
}

#[test]
fn test_missing_required_column_can_stop_phase() {
    let mut phase = Phase::new("required_stop")
        .with_columns(vec![Column::text("name")])
        .unwrap();
    phase.context_mut().set_error_policy(ErrorPolicy::StopNow);
    phase.load(rows(json!([{"id": 1}]))).unwrap();
    assert!(matches!(phase.run(), Err(PhaseError::Stopped { .. })));
}

#[test]
fn test_on_error_routes_column_failures() {
    println!("=== Testing Columns: on_error ===");

    let mut phase = Phase::new("routing")
        .with_columns(vec![
            Column::integer("deck").min(1).on_error(ErrorPolicy::DropRow),
            Column::text("rank")
                .allowed_values(["Captain", "Ensign"])
                .on_error(ErrorPolicy::Warn),
        ])
        .unwrap();
    phase
        .load(rows(json!([
            {"deck": "0", "rank": "Captain"},
            {"deck": "5", "rank": "Admiral"},
            {"deck": "7", "rank": "Ensign"},
        ])))
        .unwrap();
    let saved = phase.run().unwrap();

    assert_eq!(saved.len(), 2);
    assert_eq!(phase.records().row_nums(), vec![2, 3]);
    assert_eq!(phase.context().count("routing", EventKind::DroppedRow), 1);
    assert_eq!(phase.context().count("routing", EventKind::Warning), 1);
    let events = phase.context().get_events(Some("routing"), Some(2));
    assert_eq!(events[0].step_name, "cast_each_column_value");
    // a warning keeps the row as it was before casting
    assert_eq!(phase.records().find(2).unwrap().get("deck"), Some(&json!("5")));
    println!("✓ drop_row evicts, warn keeps");
}

#[test]
fn test_null_checks_and_defaults() {
    let mut phase = Phase::new("nulls")
        .with_columns(vec![
            Column::text("name").null(false),
            Column::integer("deck").default(1),
            Column::text("note").blank(false).required(false),
        ])
        .unwrap();
    phase
        .load(rows(json!([
            {"name": "Kirk", "deck": "NULL", "note": "ok"},
            {"name": null, "deck": "3", "note": "ok"},
            {"name": "Rand", "deck": "4", "note": "  "},
        ])))
        .unwrap();
    phase.run().unwrap();

    assert_eq!(phase.records().find(1).unwrap().get("deck"), Some(&json!(1)));
    let errors: Vec<Option<u64>> = phase
        .context()
        .get_events(Some("nulls"), None)
        .into_iter()
        .filter(|e| e.kind == EventKind::Error)
        .map(|e| e.row_num)
        .collect();
    assert_eq!(errors, vec![Some(2), Some(3)]);
}

#[test]
fn test_null_false_with_default_rejected() {
    let result = Phase::new("bad_columns").with_columns(vec![Column::text("x").null(false).default("y")]);
    assert!(result.is_err());
}

#[test]
fn test_unsaved_columns_omitted() {
    let mut phase = Phase::new("saving")
        .with_columns(vec![Column::text("name"), Column::text("scratch").save(false)])
        .unwrap();
    phase
        .load(rows(json!([{"name": "Kirk", "scratch": "tmp"}])))
        .unwrap();
    let saved = phase.run().unwrap();

    assert!(saved[0].contains_key("name"));
    assert!(!saved[0].contains_key("scratch"));
    assert_eq!(saved[0][ROW_NUM_FIELD], json!(1));
}

#[test]
fn test_fix_functions_applied() {
    let mut phase = Phase::new("fixing")
        .with_columns(vec![Column::text("name").fix(|v| match v {
            Value::String(s) => json!(s.trim().to_lowercase()),
            other => other,
        })])
        .unwrap();
    phase.load(rows(json!([{"name": "  KIRK "}]))).unwrap();
    phase.run().unwrap();
    assert_eq!(phase.records().find(1).unwrap().get("name"), Some(&json!("kirk")));
}
