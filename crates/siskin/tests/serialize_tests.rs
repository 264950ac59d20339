//! Tests for the binary irep codec: exact wire bytes, round trips, and
//! rejection of unsupported objects and malformed input.

use pretty_assertions::assert_eq;
use siskin::{ErrorKind, HeapData, IREP_VARG, Interp, Irep, Proc, SchemeResult, Value};

fn blob_bytes(interp: &Interp, blob: Value) -> Vec<u8> {
    interp.heap().blob(blob).unwrap().to_vec()
}

#[test]
fn integers_encode_as_little_endian_int32() {
    let mut interp = Interp::new();
    let blob = interp.serialize(Value::Int(258)).unwrap();
    assert_eq!(blob_bytes(&interp, blob), vec![0x00, 0x02, 0x01, 0x00, 0x00]);
    assert_eq!(interp.deserialize(blob).unwrap(), Value::Int(258));
}

#[test]
fn negative_integers_round_trip() {
    let mut interp = Interp::new();
    let blob = interp.serialize(Value::Int(-1)).unwrap();
    assert_eq!(blob_bytes(&interp, blob), vec![0x00, 0xff, 0xff, 0xff, 0xff]);
    assert_eq!(interp.deserialize(blob).unwrap(), Value::Int(-1));
}

#[test]
fn integers_outside_int32_are_rejected() {
    let mut interp = Interp::new();
    let err = interp.serialize(Value::Int(i64::from(i32::MAX) + 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SerializeError);
    assert!(err.message().starts_with("dump: integer out of range"));
}

#[test]
fn symbols_encode_name_with_nul() {
    let mut interp = Interp::new();
    let foo = interp.intern("foo");
    let blob = interp.serialize(foo).unwrap();
    assert_eq!(
        blob_bytes(&interp, blob),
        vec![0x02, 0x03, 0x00, 0x00, 0x00, 0x66, 0x6f, 0x6f, 0x00]
    );
    // Deserializing interns, so symbol identity is preserved.
    assert_eq!(interp.deserialize(blob).unwrap(), foo);
}

#[test]
fn strings_round_trip() {
    let mut interp = Interp::new();
    let s = interp.string_value("hello").unwrap();
    let blob = interp.serialize(s).unwrap();
    assert_eq!(
        blob_bytes(&interp, blob),
        vec![0x01, 0x05, 0x00, 0x00, 0x00, b'h', b'e', b'l', b'l', b'o', 0x00]
    );
    let loaded = interp.deserialize(blob).unwrap();
    assert_eq!(interp.heap().string(loaded).unwrap(), "hello");
}

#[test]
fn empty_string_round_trips() {
    let mut interp = Interp::new();
    let s = interp.string_value("").unwrap();
    let blob = interp.serialize(s).unwrap();
    assert_eq!(blob_bytes(&interp, blob), vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let loaded = interp.deserialize(blob).unwrap();
    assert_eq!(interp.heap().string(loaded).unwrap(), "");
}

#[test]
fn characters_encode_as_one_byte() {
    let mut interp = Interp::new();
    let blob = interp.serialize(Value::Char('A')).unwrap();
    assert_eq!(blob_bytes(&interp, blob), vec![0x04, 0x41]);
    assert_eq!(interp.deserialize(blob).unwrap(), Value::Char('A'));
}

#[test]
fn non_ascii_characters_are_rejected() {
    let mut interp = Interp::new();
    let err = interp.serialize(Value::Char('λ')).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SerializeError);
}

#[test]
fn closed_procedures_round_trip_with_nested_ireps() {
    let mut interp = Interp::new();
    let inner = interp
        .make_irep(Irep {
            argc: 1,
            flags: IREP_VARG,
            frame_size: 2,
            objs: vec![Value::Int(7)],
            code: vec![1, 2, 3],
            ireps: vec![],
        })
        .unwrap();
    let foo = interp.intern("foo");
    let greeting = interp.string_value("hi").unwrap();
    let outer = interp
        .make_irep(Irep {
            argc: 0,
            flags: 0,
            frame_size: 1,
            objs: vec![Value::Int(258), foo, greeting, Value::Char('A')],
            code: vec![9],
            ireps: vec![inner],
        })
        .unwrap();
    let proc = interp.make_closure(outer, None).unwrap();

    let blob = interp.serialize(proc).unwrap();
    let loaded = interp.deserialize(blob).unwrap();

    let Proc::Closure { irep, env } = interp.heap().proc(loaded).unwrap() else {
        panic!("expected a closure");
    };
    assert_eq!(env, None);
    let loaded_outer = interp.heap().irep(irep).unwrap();
    assert_eq!(loaded_outer.argc, 0);
    assert_eq!(loaded_outer.flags, 0);
    assert_eq!(loaded_outer.frame_size, 1);
    assert_eq!(loaded_outer.code, vec![9]);
    assert_eq!(loaded_outer.objs.len(), 4);
    assert_eq!(loaded_outer.objs[0], Value::Int(258));
    assert_eq!(loaded_outer.objs[1], foo);
    assert_eq!(loaded_outer.objs[3], Value::Char('A'));
    let loaded_greeting = loaded_outer.objs[2];
    assert_eq!(interp.heap().string(loaded_greeting).unwrap(), "hi");

    let child = loaded_outer.ireps[0];
    let loaded_inner = interp.heap().irep(child).unwrap();
    assert_eq!(loaded_inner.argc, 1);
    assert!(loaded_inner.is_variadic());
    assert_eq!(loaded_inner.frame_size, 2);
    assert_eq!(loaded_inner.code, vec![1, 2, 3]);
    assert_eq!(loaded_inner.objs, vec![Value::Int(7)]);
}

#[test]
fn unknown_flag_bits_are_masked_on_dump() {
    let mut interp = Interp::new();
    let irep = interp
        .make_irep(Irep {
            argc: 0,
            flags: 0xff,
            frame_size: 0,
            objs: vec![],
            code: vec![],
            ireps: vec![],
        })
        .unwrap();
    let proc = interp.make_closure(irep, None).unwrap();
    let blob = interp.serialize(proc).unwrap();
    let loaded = interp.deserialize(blob).unwrap();
    let Proc::Closure { irep, .. } = interp.heap().proc(loaded).unwrap() else {
        panic!("expected a closure");
    };
    assert_eq!(interp.heap().irep(irep).unwrap().flags, IREP_VARG);
}

fn noop(_: &mut Interp, _: &[Value]) -> SchemeResult<Value> {
    Ok(Value::Nil)
}

#[test]
fn native_procedures_cannot_be_serialized() {
    let mut interp = Interp::new();
    let proc = interp.make_native_proc(noop).unwrap();
    let err = interp.serialize(proc).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SerializeError);
    assert_eq!(err.message(), "dump: native function serialization unsupported");
}

#[test]
fn closures_with_captured_environments_cannot_be_serialized() {
    let mut interp = Interp::new();
    let irep = interp
        .make_irep(Irep {
            argc: 0,
            flags: 0,
            frame_size: 0,
            objs: vec![],
            code: vec![],
            ireps: vec![],
        })
        .unwrap();
    let env = interp.make_context(None, vec![Value::Int(1)]).unwrap();
    let proc = interp.make_closure(irep, Some(env)).unwrap();
    let err = interp.serialize(proc).unwrap_err();
    assert_eq!(err.message(), "dump: local procedure serialization unsupported");
}

#[test]
fn other_objects_cannot_be_serialized() {
    let mut interp = Interp::new();
    let pair = interp.cons(Value::Int(1), Value::Nil).unwrap();
    let err = interp.serialize(pair).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SerializeError);
    assert_eq!(err.message(), "dump: unsupported object");
    let err = interp.serialize(Value::Bool(true)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SerializeError);
}

#[test]
fn truncated_input_is_rejected() {
    let mut interp = Interp::new();
    let blob = interp.blob_value(&[0x00, 0x02, 0x01]).unwrap();
    let err = interp.deserialize(blob).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeserializeError);
    assert_eq!(err.message(), "load: unexpected end of input");
}

#[test]
fn unknown_tags_are_rejected() {
    let mut interp = Interp::new();
    let blob = interp.blob_value(&[0x09]).unwrap();
    let err = interp.deserialize(blob).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeserializeError);
    assert_eq!(err.message(), "load: unsupported object");
}

#[test]
fn missing_nul_terminator_is_rejected() {
    let mut interp = Interp::new();
    // Tag 0x02, length 1, byte 'a', then a non-NUL terminator.
    let blob = interp.blob_value(&[0x02, 0x01, 0x00, 0x00, 0x00, b'a', 0x07]).unwrap();
    let err = interp.deserialize(blob).unwrap_err();
    assert_eq!(err.message(), "load: malformed string");
}

#[test]
fn deserializing_a_non_blob_is_a_type_error() {
    let mut interp = Interp::new();
    let err = interp.deserialize(Value::Int(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert_eq!(err.message(), "bytevector required");
}

#[test]
fn heap_data_types_are_exposed_for_collaborators() {
    // The VM and compiler collaborators need to look inside closures.
    let mut interp = Interp::new();
    let irep = interp
        .make_irep(Irep {
            argc: 2,
            flags: 0,
            frame_size: 3,
            objs: vec![],
            code: vec![0xca, 0xfe],
            ireps: vec![],
        })
        .unwrap();
    match interp.heap().get(irep) {
        HeapData::Irep(ir) => assert_eq!(ir.code, vec![0xca, 0xfe]),
        other => panic!("expected an irep, got {other:?}"),
    }
}
