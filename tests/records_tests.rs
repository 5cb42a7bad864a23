// tests/records_tests.rs
use phaser::{Fields, Numbering, Record, Records, ROW_NUM_FIELD};
use serde_json::json;

fn row(name: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_string(), json!(name));
    fields
}

#[test]
fn test_push_and_renumber() {
    println!("=== Testing Records: push and renumber ===");

    let mut records = Records::load(vec![row("a"), row("b")], Numbering::Preserve).unwrap();
    records.push(Record::new(row("c")));
    let copy = records.get(0).unwrap().clone();
    records.push(copy);
    assert_eq!(records.row_nums(), vec![1, 2, 3, 4]);

    records.take();
    records.push(Record::new(row("d")));
    assert_eq!(records.row_nums(), vec![5]);

    records.renumber();
    assert_eq!(records.row_nums(), vec![1]);
    println!("✓ Fresh numbers above the running maximum until renumbered");
}

#[test]
fn test_from_records_numbers_unnumbered_rows() {
    let records = Records::from_records(vec![Record::new(row("a")), Record::new(row("b"))]);
    assert_eq!(records.row_nums(), vec![1, 2]);
    assert_eq!(records.to_plain()[1]["name"], json!("b"));
}

#[test]
fn test_duplicate_embedded_numbers_rejected() {
    let mut first = row("a");
    first.insert(ROW_NUM_FIELD.to_string(), json!(3));
    let mut second = row("b");
    second.insert(ROW_NUM_FIELD.to_string(), json!("3"));
    assert!(Records::load(vec![first, second], Numbering::Preserve).is_err());
}

#[test]
fn test_mutating_fields_keeps_number() {
    let mut records = Records::load(vec![row("a")], Numbering::Preserve).unwrap();
    for record in records.iter_mut() {
        record.insert("name", "changed");
        record.remove("name");
        record.insert("other", 1);
    }
    let saved = records.for_save();
    assert_eq!(saved[0][ROW_NUM_FIELD], json!(1));
    assert_eq!(saved[0]["other"], json!(1));
}
