//! Reference-counting property test
//!
//! Any sequence of collection operations driven through the host API
//! must leave the heap exactly where it started: the only live objects
//! are the ones reachable from the globals and the frame templates.

use floyd::types::TypeId;
use floyd::vm::Opcode;
use floyd::{load_image, Config, FrameImage, FunctionImage, Interpreter, ProgramImage, Value};
use proptest::prelude::*;

use crate::helpers::*;

#[derive(Debug, Clone)]
enum Op {
    PushBack(i64),
    UpdateVector(i64, i64),
    Subset(i64, i64),
    UpdateDict(String, i64),
    EraseMissing,
    ReplaceString(i64, i64),
    FindString(String),
    ToJsonRoundTrip,
    MapFailingCallback,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i16>().prop_map(|value| Op::PushBack(value as i64)),
        // Indexes straddle the valid range so error paths run too.
        (-2i64..6, any::<i16>()).prop_map(|(index, value)| Op::UpdateVector(index, value as i64)),
        (-1i64..8, -1i64..8).prop_map(|(start, end)| Op::Subset(start, end)),
        ("[a-c]{1}", any::<i16>())
            .prop_map(|(key, value)| Op::UpdateDict(key, value as i64)),
        Just(Op::EraseMissing),
        (0i64..6, 0i64..6).prop_map(|(start, end)| Op::ReplaceString(start, end)),
        "[a-z]{1,3}".prop_map(Op::FindString),
        Just(Op::ToJsonRoundTrip),
        Just(Op::MapFailingCallback),
    ]
}

fn fixture() -> Interpreter {
    let int = TypeId::INT.index();
    let string = TypeId::STRING.index();
    let mut image = ProgramImage::default();
    image.types.push(type_node("vector", vec![int])); // 15: [int]
    image.types.push(type_node("dict", vec![int])); // 16: [string:int]
    image.types.push(type_node("function", vec![string, int, int])); // 17: string(int,int)

    // tag(x, ctx) returns a fresh string, but divides by zero when
    // x == 3 — so mapping it over `a` fails on the last element with
    // two owned results already produced.
    image.functions.push(FunctionImage {
        name: "tag".to_string(),
        type_index: T0 + 2,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![
                sym("x", int, None),
                sym("ctx", int, None),
                sym("s", string, Some(serde_json::json!("v"))),
                sym("r", string, None),
                int_sym("three", 3),
                sym("diff", int, None),
                sym("q", int, None),
            ],
            args: vec![int, int],
            instructions: encode(&[
                instr(Opcode::SubInt, 5, 0, 4),
                instr(Opcode::DivInt, 6, 0, 5),
                instr(Opcode::AddString, 3, 2, 2),
                instr(Opcode::Return, 3, 0, 0),
            ]),
        }),
    });

    image.globals = FrameImage {
        symbols: vec![
            sym("a", T0, Some(serde_json::json!([1, 2, 3]))),
            sym("d", T0 + 1, Some(serde_json::json!({"a": 1}))),
            sym("s", string, Some(serde_json::json!("abcdef"))),
        ],
        args: vec![],
        instructions: Vec::new(),
    };
    load_image(&image, Config::default()).unwrap()
}

fn apply(
    interpreter: &mut Interpreter,
    vector: &Value,
    dict: &Value,
    text: &Value,
    op: &Op,
) {
    match op {
        Op::PushBack(value) => {
            let push_back = interpreter.find_function("push_back").unwrap();
            let _ = interpreter.call(&push_back, &[vector.clone(), Value::Int(*value)]);
        }
        Op::UpdateVector(index, value) => {
            let update = interpreter.find_function("update").unwrap();
            let _ = interpreter.call(
                &update,
                &[vector.clone(), Value::Int(*index), Value::Int(*value)],
            );
        }
        Op::Subset(start, end) => {
            let subset = interpreter.find_function("subset").unwrap();
            let _ = interpreter.call(
                &subset,
                &[vector.clone(), Value::Int(*start), Value::Int(*end)],
            );
        }
        Op::UpdateDict(key, value) => {
            let update = interpreter.find_function("update").unwrap();
            let _ = interpreter.call(
                &update,
                &[dict.clone(), Value::string(key.clone()), Value::Int(*value)],
            );
        }
        Op::EraseMissing => {
            let erase = interpreter.find_function("erase").unwrap();
            let _ = interpreter.call(&erase, &[dict.clone(), Value::string("missing")]);
        }
        Op::ReplaceString(start, end) => {
            let replace = interpreter.find_function("replace").unwrap();
            let _ = interpreter.call(
                &replace,
                &[
                    text.clone(),
                    Value::Int(*start),
                    Value::Int(*end),
                    Value::string("__"),
                ],
            );
        }
        Op::FindString(needle) => {
            let find = interpreter.find_function("find").unwrap();
            let _ = interpreter.call(&find, &[text.clone(), Value::string(needle.clone())]);
        }
        Op::ToJsonRoundTrip => {
            let to_json = interpreter.find_function("to_json").unwrap();
            let from_json = interpreter.find_function("from_json").unwrap();
            if let Ok(tree) = interpreter.call(&to_json, &[dict.clone()]) {
                let _ = interpreter.call(&from_json, &[tree, Value::Typeid(dict.type_of())]);
            }
        }
        Op::MapFailingCallback => {
            // Fails on the element with value 3; the results already
            // produced for earlier elements must be reclaimed.
            let map = interpreter.find_function("map").unwrap();
            let tag = interpreter.find_function("tag").unwrap();
            let _ = interpreter.call(&map, &[vector.clone(), tag, Value::Int(0)]);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_no_leaks_no_double_frees(ops in proptest::collection::vec(op_strategy(), 1..32)) {
        let mut interpreter = fixture();
        let (_, vector) = interpreter.find_global("a").unwrap();
        let (_, dict) = interpreter.find_global("d").unwrap();
        let (_, text) = interpreter.find_global("s").unwrap();
        let baseline = interpreter.live_object_count();

        for op in &ops {
            apply(&mut interpreter, &vector, &dict, &text, op);
        }

        // Every temporary the operations produced has been reclaimed and
        // the globals are still intact.
        prop_assert_eq!(interpreter.live_object_count(), baseline);
        prop_assert_eq!(interpreter.find_global("a").unwrap().1, vector);
        prop_assert_eq!(interpreter.find_global("d").unwrap().1, dict);
        prop_assert_eq!(interpreter.find_global("s").unwrap().1, text);
    }

    #[test]
    fn prop_push_back_grows_by_one(value in any::<i16>()) {
        let mut interpreter = fixture();
        let (_, vector) = interpreter.find_global("a").unwrap();
        let push_back = interpreter.find_function("push_back").unwrap();
        let size = interpreter.find_function("size").unwrap();

        let before = interpreter.call(&size, &[vector.clone()]).unwrap();
        let grown = interpreter
            .call(&push_back, &[vector, Value::Int(value as i64)])
            .unwrap();
        let after = interpreter.call(&size, &[grown.clone()]).unwrap();
        prop_assert_eq!(after, Value::Int(before.as_int().unwrap() + 1));
        match grown {
            Value::Vector { elements, .. } => {
                prop_assert_eq!(elements.last().cloned(), Some(Value::Int(value as i64)));
            }
            other => prop_assert!(false, "expected vector, got {:?}", other),
        }
    }
}
