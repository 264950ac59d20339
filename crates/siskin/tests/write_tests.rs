//! Tests for the labeling printer: `write`, `write-shared`, `write-simple`
//! and `display`, including sharing detection and cycle labels.

use pretty_assertions::assert_eq;
use siskin::{Interp, Value};

fn write(interp: &Interp, v: Value) -> String {
    interp.to_write_string(v).unwrap()
}

fn write_shared(interp: &Interp, v: Value) -> String {
    let mut out = siskin::BufferPort::new();
    interp.write_shared(v, &mut out).unwrap();
    out.into_output()
}

fn write_simple(interp: &Interp, v: Value) -> String {
    let mut out = siskin::BufferPort::new();
    interp.write_simple(v, &mut out).unwrap();
    out.into_output()
}

fn display(interp: &Interp, v: Value) -> String {
    interp.to_display_string(v).unwrap()
}

#[test]
fn immediates() {
    let interp = Interp::new();
    assert_eq!(write(&interp, Value::Nil), "()");
    assert_eq!(write(&interp, Value::Bool(true)), "#t");
    assert_eq!(write(&interp, Value::Bool(false)), "#f");
    assert_eq!(write(&interp, Value::Int(42)), "42");
    assert_eq!(write(&interp, Value::Int(-7)), "-7");
    assert_eq!(write(&interp, Value::Undefined), "#undefined");
    assert_eq!(write(&interp, Value::Eof), "#.(eof-object)");
}

#[test]
fn floats() {
    let interp = Interp::new();
    assert_eq!(write(&interp, Value::Float(1.5)), "1.5");
    assert_eq!(write(&interp, Value::Float(-0.25)), "-0.25");
    assert_eq!(write(&interp, Value::Float(f64::NAN)), "+nan.0");
    assert_eq!(write(&interp, Value::Float(f64::INFINITY)), "+inf.0");
    assert_eq!(write(&interp, Value::Float(f64::NEG_INFINITY)), "-inf.0");
    // Round-trippable without trailing-zero artifacts.
    assert_eq!(write(&interp, Value::Float(3.0)), "3.0");
}

#[test]
fn characters() {
    let interp = Interp::new();
    assert_eq!(write(&interp, Value::Char('c')), "#\\c");
    assert_eq!(write(&interp, Value::Char(' ')), "#\\space");
    assert_eq!(write(&interp, Value::Char('\n')), "#\\newline");
    assert_eq!(write(&interp, Value::Char('\t')), "#\\tab");
    assert_eq!(write(&interp, Value::Char('\r')), "#\\return");
    assert_eq!(write(&interp, Value::Char('\u{07}')), "#\\alarm");
    assert_eq!(write(&interp, Value::Char('\u{08}')), "#\\backspace");
    assert_eq!(write(&interp, Value::Char('\u{1b}')), "#\\escape");
    assert_eq!(write(&interp, Value::Char('\u{7f}')), "#\\delete");
    assert_eq!(display(&interp, Value::Char('c')), "c");
    assert_eq!(display(&interp, Value::Char('\n')), "\n");
}

#[test]
fn strings_escape_in_write_mode_only() {
    let mut interp = Interp::new();
    let s = interp.string_value("a\"b").unwrap();
    assert_eq!(display(&interp, s), "a\"b");
    assert_eq!(write(&interp, s), "\"a\\\"b\"");
    let t = interp.string_value("back\\slash").unwrap();
    assert_eq!(write(&interp, t), "\"back\\\\slash\"");
}

#[test]
fn symbols_print_raw_names() {
    let mut interp = Interp::new();
    let sym = interp.intern("list->vector");
    assert_eq!(write(&interp, sym), "list->vector");
    assert_eq!(display(&interp, sym), "list->vector");
}

#[test]
fn blobs() {
    let mut interp = Interp::new();
    let blob = interp.blob_value(&[0, 1, 255]).unwrap();
    assert_eq!(write(&interp, blob), "#u8(0 1 255)");
    let empty = interp.blob_value(&[]).unwrap();
    assert_eq!(write(&interp, empty), "#u8()");
}

#[test]
fn lists_proper_and_improper() {
    let mut interp = Interp::new();
    let l = interp.list(&[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
    assert_eq!(write(&interp, l), "(1 2 3)");
    let p = interp.cons(Value::Int(1), Value::Int(2)).unwrap();
    assert_eq!(write(&interp, p), "(1 . 2)");
    let dotted = {
        let tail = interp.cons(Value::Int(2), Value::Int(3)).unwrap();
        interp.cons(Value::Int(1), tail).unwrap()
    };
    assert_eq!(write(&interp, dotted), "(1 2 . 3)");
}

#[test]
fn quote_family_sugar() {
    let mut interp = Interp::new();
    let x = interp.intern("x");
    for (name, expected) in [
        ("quote", "'x"),
        ("quasiquote", "`x"),
        ("unquote", ",x"),
        ("unquote-splicing", ",@x"),
        ("syntax-quote", "#'x"),
        ("syntax-quasiquote", "#`x"),
        ("syntax-unquote", "#,x"),
        ("syntax-unquote-splicing", "#,@x"),
    ] {
        let tag = interp.intern(name);
        let form = interp.list(&[tag, x]).unwrap();
        assert_eq!(write(&interp, form), expected);
    }
}

#[test]
fn quote_sugar_requires_exactly_two_elements() {
    let mut interp = Interp::new();
    let quote = interp.intern("quote");
    let x = interp.intern("x");
    let y = interp.intern("y");
    let three = interp.list(&[quote, x, y]).unwrap();
    assert_eq!(write(&interp, three), "(quote x y)");
    let one = interp.list(&[quote]).unwrap();
    assert_eq!(write(&interp, one), "(quote)");
}

#[test]
fn vectors() {
    let mut interp = Interp::new();
    let v = interp
        .vector_value(&[Value::Int(1), Value::Bool(false), Value::Int(3)])
        .unwrap();
    assert_eq!(write(&interp, v), "#(1 #f 3)");
    let empty = interp.vector_value(&[]).unwrap();
    assert_eq!(write(&interp, empty), "#()");
}

#[test]
fn dictionaries_print_in_insertion_order() {
    let mut interp = Interp::new();
    let dict = interp.dict_value().unwrap();
    let a = interp.intern("a").as_symbol().unwrap();
    let b = interp.intern("b").as_symbol().unwrap();
    interp.dict_set(dict, a, Value::Int(1)).unwrap();
    interp.dict_set(dict, b, Value::Int(2)).unwrap();
    assert_eq!(write(&interp, dict), "#.(dictionary 'a 1 'b 2)");
    let empty = interp.dict_value().unwrap();
    assert_eq!(write(&interp, empty), "#.(dictionary)");
}

#[test]
fn records() {
    let mut interp = Interp::new();
    let point = interp.intern("point");
    let rec = interp.make_record(point, Value::Int(3)).unwrap();
    assert_eq!(write(&interp, rec), "#<point 3>");
}

#[test]
fn opaque_objects_print_typename_and_address() {
    let mut interp = Interp::new();
    fn noop(_: &mut Interp, _: &[Value]) -> siskin::SchemeResult<Value> {
        Ok(Value::Nil)
    }
    let proc = interp.make_native_proc(noop).unwrap();
    assert!(write(&interp, proc).starts_with("#<procedure 0x"));
    let port = interp.make_port(siskin::PortKind::Sink).unwrap();
    assert!(write(&interp, port).starts_with("#<port 0x"));
    let senv = interp.senv_new(None).unwrap();
    assert!(write(&interp, Value::Ref(senv)).starts_with("#<senv 0x"));
}

#[test]
fn write_shared_labels_a_self_referencing_pair() {
    let mut interp = Interp::new();
    let p = interp.cons(Value::Int(1), Value::Nil).unwrap();
    interp.set_cdr(p, p).unwrap();
    assert_eq!(write_shared(&interp, p), "#0=(1 . #0#)");
    // `write` must also terminate and label the cycle.
    assert_eq!(write(&interp, p), "#0=(1 . #0#)");
}

#[test]
fn write_labels_a_dag_exactly_where_shared() {
    let mut interp = Interp::new();
    let a = interp.list(&[Value::Int(1), Value::Int(2)]).unwrap();
    let b = interp.list(&[a, a]).unwrap();
    assert_eq!(write(&interp, b), "(#0=(1 2) #0#)");
    assert_eq!(write_shared(&interp, b), "(#0=(1 2) #0#)");
    // Without sharing analysis the subobject is printed twice.
    assert_eq!(write_simple(&interp, b), "((1 2) (1 2))");
}

#[test]
fn unshared_values_print_without_labels() {
    let mut interp = Interp::new();
    let inner = interp.list(&[Value::Int(1)]).unwrap();
    let outer = interp.list(&[inner, Value::Int(2)]).unwrap();
    assert_eq!(write(&interp, outer), "((1) 2)");
    assert_eq!(write_shared(&interp, outer), "((1) 2)");
}

#[test]
fn shared_cdr_breaks_a_list_flat() {
    let mut interp = Interp::new();
    let tail = interp.list(&[Value::Int(2), Value::Int(3)]).unwrap();
    let l = interp.cons(Value::Int(1), tail).unwrap();
    let both = interp.list(&[l, tail]).unwrap();
    assert_eq!(write(&interp, both), "((1 . #0=(2 3)) #0#)");
}

#[test]
fn cyclic_vector() {
    let mut interp = Interp::new();
    let v = interp.vector_value(&[Value::Int(9), Value::Nil]).unwrap();
    interp.vec_set(v, 1, v).unwrap();
    assert_eq!(write(&interp, v), "#0=#(9 #0#)");
    assert_eq!(write_shared(&interp, v), "#0=#(9 #0#)");
}

#[test]
fn shared_value_inside_dictionary() {
    let mut interp = Interp::new();
    let pair = interp.list(&[Value::Int(7)]).unwrap();
    let dict = interp.dict_value().unwrap();
    let k1 = interp.intern("k1").as_symbol().unwrap();
    let k2 = interp.intern("k2").as_symbol().unwrap();
    interp.dict_set(dict, k1, pair).unwrap();
    interp.dict_set(dict, k2, pair).unwrap();
    assert_eq!(write(&interp, dict), "#.(dictionary 'k1 #0=(7) 'k2 #0#)");
}

#[test]
fn display_recurses_in_display_mode() {
    let mut interp = Interp::new();
    let s = interp.string_value("hi \"there\"").unwrap();
    let l = interp.list(&[s, Value::Char('!')]).unwrap();
    assert_eq!(display(&interp, l), "(hi \"there\" !)");
    assert_eq!(write(&interp, l), "(\"hi \\\"there\\\"\" #\\!)");
}

#[test]
fn labels_count_up_across_multiple_shared_objects() {
    let mut interp = Interp::new();
    let a = interp.list(&[Value::Int(1)]).unwrap();
    let b = interp.list(&[Value::Int(2)]).unwrap();
    let l = interp.list(&[a, b, a, b]).unwrap();
    assert_eq!(write(&interp, l), "(#0=(1) #1=(2) #0# #1#)");
}
