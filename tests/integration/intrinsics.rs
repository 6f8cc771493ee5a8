//! Intrinsic integration tests
//!
//! Intrinsics are bound function values in the link table; the host
//! fetches them by name and calls them like any other function.

use floyd::types::TypeId;
use floyd::vm::Opcode;
use floyd::{load_image, Config, FrameImage, FunctionImage, ProgramImage, RuntimeError, Value};

use crate::helpers::*;

/// Globals: a = [10, 20, 30]; d = {"a": 1, "b": 2}; s = the ring line.
fn fixture() -> ProgramImage {
    let mut image = ProgramImage::default();
    image.types.push(type_node("vector", vec![TypeId::INT.index()])); // 15: [int]
    image.types.push(type_node("dict", vec![TypeId::INT.index()])); // 16: [string:int]
    image.globals = FrameImage {
        symbols: vec![
            sym("a", T0, Some(serde_json::json!([10, 20, 30]))),
            sym("d", T0 + 1, Some(serde_json::json!({"a": 1, "b": 2}))),
            sym(
                "s",
                TypeId::STRING.index(),
                Some(serde_json::json!("One ring to rule them all")),
            ),
        ],
        args: vec![],
        instructions: Vec::new(),
    };
    image
}

#[test]
fn test_push_back_and_size() {
    // let int n = size(push_back(a, 40)); a itself is unchanged.
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let (_, a) = interpreter.find_global("a").unwrap();
    let push_back = interpreter.find_function("push_back").unwrap();
    let size = interpreter.find_function("size").unwrap();

    let grown = interpreter.call(&push_back, &[a.clone(), Value::Int(40)]).unwrap();
    let n = interpreter.call(&size, &[grown.clone()]).unwrap();
    assert_eq!(n, Value::Int(4));
    match &grown {
        Value::Vector { elements, .. } => {
            assert_eq!(elements.len(), 4);
            assert_eq!(elements[3], Value::Int(40));
        }
        other => panic!("expected vector, got {:?}", other),
    }
    assert_eq!(interpreter.find_global("a").unwrap().1, a);
}

#[test]
fn test_dict_update_round_trip() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let (_, d) = interpreter.find_global("d").unwrap();
    let update = interpreter.find_function("update").unwrap();
    let exists = interpreter.find_function("exists").unwrap();

    let d2 = interpreter
        .call(&update, &[d.clone(), Value::string("a"), Value::Int(99)])
        .unwrap();
    let still_there = interpreter
        .call(&exists, &[d.clone(), Value::string("a")])
        .unwrap();
    assert_eq!(still_there, Value::Bool(true));

    let entry = |value: &Value, key: &str| match value {
        Value::Dict { entries, .. } => entries
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, entry_value)| entry_value.clone()),
        _ => None,
    };
    assert_eq!(entry(&d2, "a"), Some(Value::Int(99)));
    assert_eq!(entry(&d, "a"), Some(Value::Int(1)));
}

#[test]
fn test_string_subset_and_replace() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let (_, s) = interpreter.find_global("s").unwrap();
    let subset = interpreter.find_function("subset").unwrap();
    let replace = interpreter.find_function("replace").unwrap();

    let word = interpreter
        .call(&subset, &[s.clone(), Value::Int(4), Value::Int(8)])
        .unwrap();
    assert_eq!(word, Value::string("ring"));

    // Half-open range: "ring" occupies bytes 4..8.
    let swapped = interpreter
        .call(
            &replace,
            &[s.clone(), Value::Int(4), Value::Int(8), Value::string("rabbit")],
        )
        .unwrap();
    assert_eq!(swapped, Value::string("One rabbit to rule them all"));

    let negative = interpreter.call(&subset, &[s, Value::Int(-1), Value::Int(3)]);
    assert!(matches!(negative, Err(RuntimeError::IndexOutOfRange(_))));
}

#[test]
fn test_find_and_update_string() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let (_, s) = interpreter.find_global("s").unwrap();
    let find = interpreter.find_function("find").unwrap();
    let update = interpreter.find_function("update").unwrap();

    assert_eq!(
        interpreter
            .call(&find, &[s.clone(), Value::string("rule")])
            .unwrap(),
        Value::Int(12)
    );
    assert_eq!(
        interpreter
            .call(&find, &[s.clone(), Value::string("sauron")])
            .unwrap(),
        Value::Int(-1)
    );

    let dotted = interpreter
        .call(&update, &[s, Value::Int(3), Value::string(".")])
        .unwrap();
    assert_eq!(dotted, Value::string("One.ring to rule them all"));
}

#[test]
fn test_erase_and_get_keys() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let (_, d) = interpreter.find_global("d").unwrap();
    let erase = interpreter.find_function("erase").unwrap();
    let get_keys = interpreter.find_function("get_keys").unwrap();

    let smaller = interpreter
        .call(&erase, &[d.clone(), Value::string("a")])
        .unwrap();
    match &smaller {
        Value::Dict { entries, .. } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].0, "b");
        }
        other => panic!("expected dict, got {:?}", other),
    }
    let missing = interpreter.call(&erase, &[d.clone(), Value::string("zzz")]);
    assert!(matches!(missing, Err(RuntimeError::KeyNotFound(_))));

    let keys = interpreter.call(&get_keys, &[d]).unwrap();
    match keys {
        Value::Vector { elements, .. } => {
            assert_eq!(elements, vec![Value::string("a"), Value::string("b")]);
        }
        other => panic!("expected vector, got {:?}", other),
    }
}

#[test]
fn test_assert_failure_surfaces_and_prints() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let assert_fn = interpreter.find_function("assert").unwrap();

    let failure = interpreter.call(&assert_fn, &[Value::Bool(false)]);
    match failure {
        Err(error) => assert!(error.to_string().contains("Assertion failed")),
        Ok(value) => panic!("assert(false) returned {:?}", value),
    }
    let output = interpreter.take_output();
    assert!(output.iter().any(|line| line.contains("Assertion failed")));

    assert!(interpreter
        .call(&assert_fn, &[Value::Bool(true)])
        .is_ok());
}

#[test]
fn test_print_captures_lines() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let print = interpreter.find_function("print").unwrap();
    interpreter.call(&print, &[Value::string("hello")]).unwrap();
    interpreter.call(&print, &[Value::Int(42)]).unwrap();
    assert_eq!(interpreter.take_output(), vec!["hello", "42"]);
    assert!(interpreter.take_output().is_empty());
}

#[test]
fn test_to_string_and_typeof() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let (_, a) = interpreter.find_global("a").unwrap();
    let to_string = interpreter.find_function("to_string").unwrap();
    let type_of = interpreter.find_function("typeof").unwrap();

    assert_eq!(
        interpreter.call(&to_string, &[a.clone()]).unwrap(),
        Value::string("[10, 20, 30]")
    );
    assert_eq!(
        interpreter.call(&to_string, &[Value::Double(6.0)]).unwrap(),
        Value::string("6.0")
    );
    let type_value = interpreter.call(&type_of, &[a]).unwrap();
    match type_value {
        Value::Typeid(id) => assert_eq!(id.index(), T0),
        other => panic!("expected typeid, got {:?}", other),
    }
}

#[test]
fn test_json_round_trips() {
    let mut interpreter = load_image(&fixture(), Config::default()).unwrap();
    let (vec_type, a) = interpreter.find_global("a").unwrap();
    let to_json = interpreter.find_function("to_json").unwrap();
    let from_json = interpreter.find_function("from_json").unwrap();
    let parse = interpreter.find_function("parse_json_script").unwrap();
    let generate = interpreter.find_function("generate_json_script").unwrap();
    let json_type = interpreter.find_function("get_json_type").unwrap();

    // from_json(to_json(v), typeof(v)) == v
    let tree = interpreter.call(&to_json, &[a.clone()]).unwrap();
    assert_eq!(tree, Value::Json(serde_json::json!([10, 20, 30])));
    let back = interpreter
        .call(&from_json, &[tree.clone(), Value::Typeid(vec_type)])
        .unwrap();
    assert_eq!(back, a);

    // parse_json_script(generate_json_script(j)) == j
    let text = interpreter.call(&generate, &[tree.clone()]).unwrap();
    let reparsed = interpreter.call(&parse, &[text]).unwrap();
    assert_eq!(reparsed, tree);

    // Schema mismatch is a runtime error.
    let mismatch = interpreter.call(
        &from_json,
        &[
            Value::Json(serde_json::json!("not a vector")),
            Value::Typeid(vec_type),
        ],
    );
    assert!(matches!(mismatch, Err(RuntimeError::JsonSchemaMismatch(_))));

    // get_json_type ranks: object=1 .. null=7.
    let rank = |interpreter: &mut floyd::Interpreter, tree: serde_json::Value| {
        interpreter
            .call(&json_type, &[Value::Json(tree)])
            .unwrap()
    };
    assert_eq!(rank(&mut interpreter, serde_json::json!({})), Value::Int(1));
    assert_eq!(rank(&mut interpreter, serde_json::json!([])), Value::Int(2));
    assert_eq!(
        rank(&mut interpreter, serde_json::Value::Null),
        Value::Int(7)
    );
}

/// Image with int-callback functions for the higher-order intrinsics.
fn callbacks_image() -> ProgramImage {
    let mut image = ProgramImage::default();
    let int = TypeId::INT.index();
    let bool_ = TypeId::BOOL.index();
    image.types.push(type_node("vector", vec![int])); // 15: [int]
    image.types.push(type_node("function", vec![int, int, int])); // 16: int(int,int)
    image.types.push(type_node("function", vec![bool_, int, int])); // 17: bool(int,int)
    image.types.push(type_node("function", vec![int, int, int, int])); // 18: int(int,int,int)
    image.types.push(type_node("function", vec![bool_, int, int, int])); // 19: bool(int,int,int)

    // double(x, ctx) = x + x
    image.functions.push(FunctionImage {
        name: "double".to_string(),
        type_index: T0 + 1,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![
                sym("x", int, None),
                sym("ctx", int, None),
                sym("r", int, None),
            ],
            args: vec![int, int],
            instructions: encode(&[
                instr(Opcode::AddInt, 2, 0, 0),
                instr(Opcode::Return, 2, 0, 0),
            ]),
        }),
    });
    // is_even(x, ctx) = x % 2 == 0
    image.functions.push(FunctionImage {
        name: "is_even".to_string(),
        type_index: T0 + 2,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![
                sym("x", int, None),
                sym("ctx", int, None),
                int_sym("two", 2),
                sym("rem", int, None),
                int_sym("zero", 0),
                sym("even", bool_, None),
            ],
            args: vec![int, int],
            instructions: encode(&[
                instr(Opcode::RemInt, 3, 0, 2),
                instr(Opcode::EqInt, 5, 3, 4),
                instr(Opcode::Return, 5, 0, 0),
            ]),
        }),
    });
    // add(acc, x, ctx) = acc + x
    image.functions.push(FunctionImage {
        name: "add".to_string(),
        type_index: T0 + 3,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![
                sym("acc", int, None),
                sym("x", int, None),
                sym("ctx", int, None),
                sym("r", int, None),
            ],
            args: vec![int, int, int],
            instructions: encode(&[
                instr(Opcode::AddInt, 3, 0, 1),
                instr(Opcode::Return, 3, 0, 0),
            ]),
        }),
    });
    // less(a, b, ctx) = a < b
    image.functions.push(FunctionImage {
        name: "less".to_string(),
        type_index: T0 + 4,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![
                sym("a", int, None),
                sym("b", int, None),
                sym("ctx", int, None),
                sym("r", bool_, None),
            ],
            args: vec![int, int, int],
            instructions: encode(&[
                instr(Opcode::CmpLInt, 3, 0, 1),
                instr(Opcode::Return, 3, 0, 0),
            ]),
        }),
    });
    image
}

fn int_vector(
    type_id: floyd::types::TypeId,
    values: &[i64],
) -> Value {
    Value::Vector {
        type_id,
        elements: values.iter().map(|value| Value::Int(*value)).collect(),
    }
}

#[test]
fn test_map_filter_reduce_stable_sort() {
    let image = callbacks_image();
    let mut interpreter = load_image(&image, Config::default()).unwrap();
    let vec_int = floyd::types::TypeId::pack(floyd::types::BaseKind::Vector, T0);
    let xs = int_vector(vec_int, &[3, 1, 4, 1, 5]);

    let map = interpreter.find_function("map").unwrap();
    let filter = interpreter.find_function("filter").unwrap();
    let reduce = interpreter.find_function("reduce").unwrap();
    let stable_sort = interpreter.find_function("stable_sort").unwrap();
    let double = interpreter.find_function("double").unwrap();
    let is_even = interpreter.find_function("is_even").unwrap();
    let add = interpreter.find_function("add").unwrap();
    let less = interpreter.find_function("less").unwrap();

    let doubled = interpreter
        .call(&map, &[xs.clone(), double, Value::Int(0)])
        .unwrap();
    match &doubled {
        Value::Vector { elements, .. } => {
            let ints: Vec<i64> = elements.iter().filter_map(Value::as_int).collect();
            assert_eq!(ints, vec![6, 2, 8, 2, 10]);
        }
        other => panic!("expected vector, got {:?}", other),
    }

    let evens = interpreter
        .call(&filter, &[doubled, is_even, Value::Int(0)])
        .unwrap();
    match &evens {
        Value::Vector { elements, .. } => assert_eq!(elements.len(), 5),
        other => panic!("expected vector, got {:?}", other),
    }

    let total = interpreter
        .call(&reduce, &[xs.clone(), Value::Int(0), add, Value::Int(0)])
        .unwrap();
    assert_eq!(total, Value::Int(14));

    let sorted = interpreter
        .call(&stable_sort, &[xs, less, Value::Int(0)])
        .unwrap();
    match sorted {
        Value::Vector { elements, .. } => {
            let ints: Vec<i64> = elements.iter().filter_map(Value::as_int).collect();
            assert_eq!(ints, vec![1, 1, 3, 4, 5]);
        }
        other => panic!("expected vector, got {:?}", other),
    }
    assert_eq!(interpreter.live_object_count(), 0);
}

#[test]
fn test_map_identity_law() {
    // map(xs, id, _) == xs, with id expressed as a bytecode function.
    let mut image = callbacks_image();
    let int = TypeId::INT.index();
    image.functions.push(FunctionImage {
        name: "id".to_string(),
        type_index: T0 + 1,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![sym("x", int, None), sym("ctx", int, None)],
            args: vec![int, int],
            instructions: encode(&[instr(Opcode::Return, 0, 0, 0)]),
        }),
    });
    let mut interpreter = load_image(&image, Config::default()).unwrap();
    let vec_int = floyd::types::TypeId::pack(floyd::types::BaseKind::Vector, T0);
    let xs = int_vector(vec_int, &[9, 8, 7]);
    let map = interpreter.find_function("map").unwrap();
    let id = interpreter.find_function("id").unwrap();
    let mapped = interpreter
        .call(&map, &[xs.clone(), id, Value::Int(0)])
        .unwrap();
    match (mapped, xs) {
        (Value::Vector { elements: lhs, .. }, Value::Vector { elements: rhs, .. }) => {
            assert_eq!(lhs, rhs)
        }
        _ => panic!("expected vectors"),
    }
}
