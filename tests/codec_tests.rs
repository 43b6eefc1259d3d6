//! Tests for ObjectCodec
//!
//! These tests verify:
//! - Round trips of built-in, nested and nullable values
//! - Stable wire ids for built-in types
//! - Registration rules (idempotence, conflicts, id range)
//! - Name fallback for unregistered types, and caller-chosen names
//! - Custom serializers
//! - Errors on unknown tags, truncated and trailing input

use std::any::Any;

use bytes::BytesMut;
use emberkv::codec::{FIRST_USER_ID, NAMED_TAG};
use emberkv::varint::{read_int, write_int};
use emberkv::{EmberError, ObjectCodec, Result, Serializer};
use serde::{Deserialize, Serialize};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Inner {
    id: u64,
    weight: f32,
    tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Outer {
    label: Option<String>,
    inner: Inner,
    children: Vec<Inner>,
    flags: Vec<Option<bool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Other {
    value: i16,
}

/// Not serde-aware; written through a custom serializer
#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

struct PointSerializer;

impl Serializer<Point> for PointSerializer {
    fn write(&self, value: &Point, out: &mut BytesMut) -> Result<()> {
        write_int(out, value.x, false);
        write_int(out, value.y, false);
        Ok(())
    }

    fn read(&self, input: &mut &[u8]) -> Result<Point> {
        let x = read_int(input, false)?;
        let y = read_int(input, false)?;
        Ok(Point { x, y })
    }
}

fn outer() -> Outer {
    Outer {
        label: Some("größe ✓ 日本".to_string()),
        inner: Inner {
            id: u64::MAX,
            weight: -0.5,
            tags: vec![String::new(), "ascii".to_string(), "ñandú".to_string()],
        },
        children: vec![
            Inner {
                id: 0,
                weight: f32::MIN_POSITIVE,
                tags: vec![],
            },
            Inner {
                id: 42,
                weight: f32::MAX,
                tags: vec!["x".to_string()],
            },
        ],
        flags: vec![Some(true), None, Some(false)],
    }
}

fn first_tag(frame: &[u8]) -> i32 {
    let mut input = frame;
    read_int(&mut input, true).unwrap()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_null_round_trip() {
    let codec = ObjectCodec::new();

    let null = codec.write_null();
    assert_eq!(&null[..], &[0]);
    assert!(codec.read(&null).unwrap().is_none());
    assert_eq!(codec.write_option::<i32>(None).unwrap(), null);
    assert_eq!(codec.read_as::<String>(&null).unwrap(), None);
}

#[test]
fn test_nested_struct_round_trip() {
    let codec = ObjectCodec::new();
    codec.register::<Outer>().unwrap();

    let value = outer();
    let frame = codec.write(&value).unwrap();

    assert_eq!(codec.read_as::<Outer>(&frame).unwrap(), Some(value));
}

#[test]
fn test_builtin_round_trips() {
    let codec = ObjectCodec::new();

    let text = "Ünïcödé text ✓ 漢字".to_string();
    let frame = codec.write(&text).unwrap();
    assert_eq!(codec.read_as::<String>(&frame).unwrap(), Some(text));

    let strings = vec![Some(String::new()), None, Some("€uro".to_string())];
    let frame = codec.write(&strings).unwrap();
    assert_eq!(codec.read_as::<Vec<Option<String>>>(&frame).unwrap(), Some(strings));

    let ints = vec![Some(i64::MIN), None, Some(i64::MAX)];
    let frame = codec.write(&ints).unwrap();
    assert_eq!(codec.read_as::<Vec<Option<i64>>>(&frame).unwrap(), Some(ints));

    let bytes = vec![0u8, 127, 128, 255];
    let frame = codec.write(&bytes).unwrap();
    assert_eq!(codec.read_as::<Vec<u8>>(&frame).unwrap(), Some(bytes));

    let boxed: Option<char> = Some('ß');
    let frame = codec.write(&boxed).unwrap();
    assert_eq!(codec.read_as::<Option<char>>(&frame).unwrap(), Some(boxed));
}

#[test]
fn test_read_returns_original_runtime_type() {
    let codec = ObjectCodec::new();
    let frame = codec.write(&-12i16).unwrap();

    let value = codec.read(&frame).unwrap().unwrap();
    assert_eq!(value.downcast_ref::<i16>(), Some(&-12));
    assert!(value.downcast_ref::<i32>().is_none());
}

// =============================================================================
// Wire Id Tests
// =============================================================================

#[test]
fn test_builtin_wire_ids_are_fixed() {
    let codec = ObjectCodec::new();

    assert_eq!(&codec.write(&true).unwrap()[..], &[2, 1]);
    assert_eq!(&codec.write(&"x".to_string()).unwrap()[..], &[14, 1, b'x']);
    assert_eq!(codec.id_of::<Option<bool>>(), Some(15));
    assert_eq!(codec.id_of::<Vec<Option<String>>>(), Some(53));
    assert_eq!(codec.type_name_of(14), Some(std::any::type_name::<String>()));
}

#[test]
fn test_explicit_id_is_written() {
    let codec = ObjectCodec::new();
    assert_eq!(codec.register_with_id::<Other>(100).unwrap(), 100);

    let frame = codec.write(&Other { value: 3 }).unwrap();

    assert_eq!(first_tag(&frame), 100);
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_registration_is_idempotent() {
    let codec = ObjectCodec::new();
    let before = codec.registered_count();

    let first = codec.register::<Outer>().unwrap();
    let second = codec.register::<Outer>().unwrap();

    assert_eq!(first, FIRST_USER_ID);
    assert_eq!(first, second);
    assert_eq!(codec.registered_count(), before + 1);
    assert!(codec.is_registered::<Outer>());
}

#[test]
fn test_conflicting_registration_rejected() {
    let codec = ObjectCodec::new();
    codec.register_with_id::<Other>(100).unwrap();

    // Same type, different id
    let err = codec.register_with_id::<Other>(101).unwrap_err();
    assert!(matches!(err, EmberError::InvalidArgument(_)));

    // Different type, same id
    let err = codec.register_with_id::<Inner>(100).unwrap_err();
    assert!(matches!(err, EmberError::InvalidArgument(_)));

    // Built-in type moved to a user id
    let err = codec.register_with_id::<String>(200).unwrap_err();
    assert!(matches!(err, EmberError::InvalidArgument(_)));

    // Repeating the original registration is fine
    assert_eq!(codec.register_with_id::<Other>(100).unwrap(), 100);
    assert_eq!(codec.register::<Other>().unwrap(), 100);
}

#[test]
fn test_reserved_ids_rejected() {
    let codec = ObjectCodec::new();

    for id in [0, 1, 2, FIRST_USER_ID - 1] {
        let err = codec.register_with_id::<Other>(id).unwrap_err();
        assert!(matches!(err, EmberError::InvalidArgument(_)), "id {}", id);
    }
    assert!(!codec.is_registered::<Other>());
}

// =============================================================================
// Name Fallback Tests
// =============================================================================

#[test]
fn test_unregistered_type_written_by_name() {
    let writer = ObjectCodec::new();
    let value = Other { value: -7 };

    let frame = writer.write(&value).unwrap();

    assert_eq!(first_tag(&frame), NAMED_TAG as i32);
    assert!(writer.is_registered::<Other>());
    assert_eq!(writer.id_of::<Other>(), None);
    assert_eq!(writer.read_as::<Other>(&frame).unwrap(), Some(value.clone()));

    // A reader that does not know the type cannot decode it
    let reader = ObjectCodec::new();
    let err = reader.read(&frame).unwrap_err();
    assert!(matches!(err, EmberError::Serialization(_)));

    // Registering it (with any id) makes the name resolvable
    reader.register::<Other>().unwrap();
    assert_eq!(reader.read_as::<Other>(&frame).unwrap(), Some(value));
}

/// Same wire shape as `Other`, a different Rust type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OtherRenamed {
    value: i16,
}

#[test]
fn test_explicit_name_written_instead_of_type_name() {
    let writer = ObjectCodec::new();
    writer.register_with_name::<Other>("app.other").unwrap();

    let frame = writer.write(&Other { value: 12 }).unwrap();

    let mut input: &[u8] = &frame;
    assert_eq!(read_int(&mut input, true).unwrap(), NAMED_TAG as i32);
    let len = read_int(&mut input, true).unwrap() as usize;
    assert_eq!(&input[..len], b"app.other");
    assert_eq!(writer.id_of::<Other>(), None);

    // The name, not the Rust type, decides who reads the frame
    let reader = ObjectCodec::new();
    reader.register_with_name::<OtherRenamed>("app.other").unwrap();
    assert_eq!(
        reader.read_as::<OtherRenamed>(&frame).unwrap(),
        Some(OtherRenamed { value: 12 })
    );
}

#[test]
fn test_explicit_name_conflicts_rejected() {
    let codec = ObjectCodec::new();
    codec.register_with_name::<Other>("app.other").unwrap();

    // Same type, same name: no-op
    codec.register_with_name::<Other>("app.other").unwrap();

    let err = codec
        .register_with_name::<OtherRenamed>("app.other")
        .unwrap_err();
    assert!(matches!(err, EmberError::InvalidArgument(_)));

    let err = codec.register_with_name::<OtherRenamed>("").unwrap_err();
    assert!(matches!(err, EmberError::InvalidArgument(_)));
}

// =============================================================================
// Custom Serializer Tests
// =============================================================================

#[test]
fn test_custom_serializer_round_trip() {
    let codec = ObjectCodec::new();
    let id = codec
        .register_with_serializer::<Point, _>(PointSerializer)
        .unwrap();

    let point = Point { x: -3, y: 1 << 19 };
    let frame = codec
        .write_object(Some(&point as &(dyn Any + Send + Sync)))
        .unwrap();

    // Tag, zigzag(-3) = 5, zigzag(2^19) = 2^20 takes 3 bytes
    assert_eq!(first_tag(&frame), id as i32);
    assert_eq!(frame.len(), 1 + 1 + 3);
    assert_eq!(codec.read_as::<Point>(&frame).unwrap(), Some(point));
}

#[test]
fn test_custom_serializer_with_explicit_id() {
    let codec = ObjectCodec::new();
    codec
        .register_with_serializer_and_id::<Point, _>(PointSerializer, 500)
        .unwrap();

    let frame = codec
        .write_object(Some(&Point { x: 0, y: 0 } as &(dyn Any + Send + Sync)))
        .unwrap();

    assert_eq!(&frame[..], &[0xF4, 0x03, 0, 0]);
}

#[test]
fn test_write_object_of_unknown_type_fails() {
    let codec = ObjectCodec::new();
    let point = Point { x: 1, y: 2 };

    let err = codec
        .write_object(Some(&point as &(dyn Any + Send + Sync)))
        .unwrap_err();

    assert!(matches!(err, EmberError::Serialization(_)));
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_unknown_id_fails() {
    let codec = ObjectCodec::new();
    let mut frame = BytesMut::new();
    write_int(&mut frame, 1000, true);
    frame.extend_from_slice(&[1, 2, 3]);

    let err = codec.read(&frame).unwrap_err();
    assert!(matches!(err, EmberError::Serialization(_)));
    assert!(err.to_string().contains("1000"));
}

#[test]
fn test_truncated_frame_fails() {
    let codec = ObjectCodec::new();
    let frame = codec.write(&"truncate me".to_string()).unwrap();

    for end in 0..frame.len() {
        let err = codec.read(&frame[..end]).unwrap_err();
        assert!(matches!(err, EmberError::Serialization(_)), "prefix {}", end);
    }
}

#[test]
fn test_trailing_bytes_fail() {
    let codec = ObjectCodec::new();
    let mut frame = codec.write(&7u32).unwrap().to_vec();
    frame.push(0);

    let err = codec.read(&frame).unwrap_err();
    assert!(matches!(err, EmberError::Serialization(_)));
}

#[test]
fn test_read_as_wrong_type_is_mismatch() {
    let codec = ObjectCodec::new();
    let frame = codec.write(&5i32).unwrap();

    match codec.read_as::<String>(&frame) {
        Err(EmberError::TypeMismatch { expected, found }) => {
            assert_eq!(expected, std::any::type_name::<String>());
            assert_eq!(found, "i32");
        }
        other => panic!("expected TypeMismatch, got {:?}", other),
    }
}
