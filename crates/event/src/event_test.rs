//! Event tests

use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::{AckTag, Event, EventError};

#[test]
fn test_new_event_is_empty() {
    let event = Event::new();

    assert!(event.fields().is_empty());
    assert!(event.meta().is_empty());
    assert_eq!(event.ack_tag(), AckTag::None);
}

#[test]
fn test_get_value_routes_timestamp_and_meta() {
    let ts = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap();
    let mut event = Event::with_timestamp(ts);
    event.fields_mut().put("message", json!("hi"));
    event.meta_mut().put("index", json!("logs-default"));

    let rendered = event.get_value("@timestamp").unwrap();
    assert!(rendered.as_str().unwrap().starts_with("2024-05-17T08:30:00"));

    assert_eq!(event.get_value("message").unwrap(), json!("hi"));
    assert_eq!(
        event.get_value("@metadata.index").unwrap(),
        json!("logs-default")
    );
    assert!(matches!(
        event.get_value("@metadata.missing"),
        Err(EventError::KeyNotFound(_))
    ));
}

#[test]
fn test_put_value_timestamp() {
    let mut event = Event::new();

    event
        .put_value("@timestamp", json!("2023-01-02T03:04:05.000000006Z"))
        .unwrap();
    let ts = event.timestamp();
    assert_eq!(ts.timestamp(), 1672628645);
    assert_eq!(ts.timestamp_subsec_nanos(), 6);

    let err = event.put_value("@timestamp", json!(42)).unwrap_err();
    assert!(matches!(err, EventError::InvalidTimestamp(_)));
}

#[test]
fn test_put_value_meta_prefix() {
    let mut event = Event::new();

    event.put_value("@metadata.pipeline", json!("main")).unwrap();
    assert!(event.fields().is_empty());
    assert_eq!(event.meta().get("pipeline"), Some(&json!("main")));
}

#[test]
fn test_delete_routes() {
    let mut event = Event::new();
    event.fields_mut().put("drop.me", json!(1));
    event.meta_mut().put("hint", json!("x"));

    assert_eq!(event.delete("drop.me").unwrap(), json!(1));
    assert_eq!(event.delete("@metadata.hint").unwrap(), json!("x"));
    assert!(event.delete("@timestamp").is_err());
    assert!(event.delete("gone").is_err());
}

#[test]
fn test_ack_tag_roundtrip() {
    let mut event = Event::new();
    event.set_ack_tag(AckTag::Producer { id: 7, seq: 41 });

    match event.ack_tag() {
        AckTag::Producer { id, seq } => {
            assert_eq!(id, 7);
            assert_eq!(seq, 41);
        }
        AckTag::None => panic!("tag lost"),
    }
}

#[test]
fn test_serde_keeps_meta_separate() {
    let mut event = Event::new();
    event.fields_mut().put("message", json!("hello"));
    event.meta_mut().put("index", json!("custom"));

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["fields"]["message"], json!("hello"));
    assert_eq!(value["meta"]["index"], json!("custom"));
    // Metadata never leaks into the data fields.
    assert!(value["fields"].get("index").is_none());

    let decoded: Event = serde_json::from_value(value).unwrap();
    assert_eq!(decoded.fields(), event.fields());
    assert_eq!(decoded.meta(), event.meta());
}
