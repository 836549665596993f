//! Tests for ColumnsDescription

use partstore::part::ColumnsDescription;
use partstore::PartError;

#[test]
fn test_encode_format() {
    let mut columns = ColumnsDescription::new();
    columns.push("id", "UInt64");
    columns.push("payload", "String");

    let text = String::from_utf8(columns.encode()).unwrap();

    assert_eq!(
        text,
        "columns format version: 1\n2 columns:\n`id` UInt64\n`payload` String\n"
    );
}

#[test]
fn test_decode_escaped_names() {
    let mut columns = ColumnsDescription::new();
    columns.push("we`ird\\name", "Array(Nullable(String))");
    columns.push("x", "DateTime('UTC')");

    let decoded = ColumnsDescription::decode(&columns.encode()).unwrap();

    assert_eq!(decoded, columns);
    let names: Vec<_> = decoded.iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["we`ird\\name", "x"]);
}

#[test]
fn test_names_with_control_characters() {
    let mut columns = ColumnsDescription::new();
    columns.push("a\nb", "UInt64");
    columns.push("tab\there\r", "String");
    columns.push("literal\\n", "UInt8");

    let encoded = columns.encode();
    let text = String::from_utf8(encoded.clone()).unwrap();
    assert_eq!(text.lines().count(), 5);
    assert!(text.contains("`a\\nb` UInt64\n"));

    let decoded = ColumnsDescription::decode(&encoded).unwrap();
    assert_eq!(decoded, columns);
}

#[test]
fn test_decode_empty() {
    let decoded = ColumnsDescription::decode(b"columns format version: 1\n0 columns:\n").unwrap();

    assert!(decoded.is_empty());
}

#[test]
fn test_decode_rejects_bad_header() {
    let result = ColumnsDescription::decode(b"columns format version: 9\n0 columns:\n");

    assert!(matches!(result, Err(PartError::Serialization(_))));
}

#[test]
fn test_decode_rejects_truncated_list() {
    let result = ColumnsDescription::decode(b"columns format version: 1\n2 columns:\n`a` UInt8\n");

    assert!(matches!(result, Err(PartError::Serialization(_))));
}

#[test]
fn test_decode_rejects_missing_type() {
    let result = ColumnsDescription::decode(b"columns format version: 1\n1 columns:\n`a`\n");

    assert!(matches!(result, Err(PartError::Serialization(_))));
}
