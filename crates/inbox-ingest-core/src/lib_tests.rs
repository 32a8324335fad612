//! Tests for shared identifier and time types.

use super::*;

/// Verify that event ids parse back from their display form.
#[test]
fn test_event_id_parses_from_display() {
    let id = EventId::new();
    let parsed: EventId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
}

/// Verify that malformed event ids are rejected.
#[test]
fn test_event_id_rejects_garbage() {
    let err = "not-a-ulid".parse::<EventId>().unwrap_err();
    assert!(matches!(err, ParseError::InvalidFormat { .. }));
}

/// Verify that uuid identifiers serialize as bare strings.
#[test]
fn test_uuid_identifier_is_transparent() {
    let id = ThreadId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", id));
}

/// Verify that the workspace id error names the expected kind.
#[test]
fn test_uuid_identifier_parse_error_names_kind() {
    match "x".parse::<WorkspaceId>() {
        Err(ParseError::InvalidFormat { expected, .. }) => {
            assert_eq!(expected, "workspace UUID")
        }
        other => panic!("unexpected: {:?}", other),
    }
}

/// Verify that timestamps serialize with nanosecond precision and a Z suffix.
#[test]
fn test_timestamp_serializes_rfc3339_nanos() {
    let dt = DateTime::parse_from_rfc3339("2024-05-01T10:20:30.123456789Z")
        .unwrap()
        .with_timezone(&Utc);
    let ts = Timestamp::from_datetime(dt);

    assert_eq!(
        serde_json::to_string(&ts).unwrap(),
        "\"2024-05-01T10:20:30.123456789Z\""
    );
}

/// Verify that timestamps in other offsets are normalized to UTC.
#[test]
fn test_timestamp_deserializes_offsets() {
    let ts: Timestamp = serde_json::from_str("\"2024-05-01T12:00:00+02:00\"").unwrap();
    assert_eq!(ts.to_rfc3339_nanos(), "2024-05-01T10:00:00.000000000Z");
}

/// Verify that unix seconds convert to the matching instant.
#[test]
fn test_timestamp_from_unix_seconds() {
    let ts = Timestamp::from_unix_seconds(1_700_000_000).unwrap();
    assert_eq!(ts.as_datetime().timestamp(), 1_700_000_000);
}
