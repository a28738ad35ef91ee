//! Fields tests

use serde_json::{json, Value};

use crate::Fields;

fn sample() -> Fields {
    let mut fields = Fields::new();
    fields.put("message", json!("connection refused"));
    fields.put("host.name", json!("web-01"));
    fields.put("host.ip", json!(["10.0.0.1", "10.0.0.2"]));
    fields.put("http.response.status_code", json!(502));
    fields
}

#[test]
fn test_put_creates_nested_maps() {
    let fields = sample();

    assert_eq!(
        fields.as_map().get("host").and_then(|v| v.get("name")),
        Some(&json!("web-01"))
    );
}

#[test]
fn test_get_dotted_path() {
    let fields = sample();

    assert_eq!(fields.get("message"), Some(&json!("connection refused")));
    assert_eq!(fields.get("host.name"), Some(&json!("web-01")));
    assert_eq!(
        fields.get("http.response.status_code"),
        Some(&json!(502))
    );
    assert_eq!(fields.get("host.missing"), None);
    assert_eq!(fields.get("missing.entirely"), None);
}

#[test]
fn test_get_prefers_literal_key() {
    // Decoded wire data may carry literal dotted keys; those win over
    // the nested path.
    let map = serde_json::from_value::<serde_json::Map<String, Value>>(
        json!({"a.b": "literal", "a": {"b": "nested"}}),
    )
    .unwrap();
    let fields = Fields::from(map);

    assert_eq!(fields.get("a.b"), Some(&json!("literal")));
}

#[test]
fn test_put_returns_previous_value() {
    let mut fields = sample();

    let old = fields.put("host.name", json!("web-02"));
    assert_eq!(old, Some(json!("web-01")));
    assert_eq!(fields.get("host.name"), Some(&json!("web-02")));
}

#[test]
fn test_put_replaces_scalar_intermediate() {
    let mut fields = Fields::new();
    fields.put("a", json!("scalar"));
    fields.put("a.b", json!(1));

    assert_eq!(fields.get("a.b"), Some(&json!(1)));
}

#[test]
fn test_delete_nested() {
    let mut fields = sample();

    assert_eq!(fields.delete("host.name"), Some(json!("web-01")));
    assert_eq!(fields.get("host.name"), None);
    // Parent map survives with its remaining entries.
    assert!(fields.contains("host.ip"));

    assert_eq!(fields.delete("host.name"), None);
    assert_eq!(fields.delete("not.there"), None);
}

#[test]
fn test_deep_update_merges_maps() {
    let mut fields = sample();

    let mut update = Fields::new();
    update.put("host.os", json!("linux"));
    update.put("http.response.status_code", json!(200));
    fields.deep_update(update);

    assert_eq!(fields.get("host.name"), Some(&json!("web-01")));
    assert_eq!(fields.get("host.os"), Some(&json!("linux")));
    assert_eq!(fields.get("http.response.status_code"), Some(&json!(200)));
}

#[test]
fn test_deep_update_replaces_non_maps() {
    let mut fields = Fields::new();
    fields.put("tags", json!(["a", "b"]));

    let mut update = Fields::new();
    update.put("tags", json!(["c"]));
    fields.deep_update(update);

    assert_eq!(fields.get("tags"), Some(&json!(["c"])));
}

#[test]
fn test_serde_roundtrip() {
    let fields = sample();

    let encoded = serde_json::to_string(&fields).unwrap();
    let decoded: Fields = serde_json::from_str(&encoded).unwrap();
    assert_eq!(fields, decoded);

    // Transparent representation: serializes as a plain object.
    let value: Value = serde_json::from_str(&encoded).unwrap();
    assert!(value.is_object());
}
