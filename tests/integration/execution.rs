//! Interpreter integration tests
//!
//! Programs are built as images, loaded, and observed through the host
//! API: globals, bound function values, and captured output.

use floyd::types::TypeId;
use floyd::vm::Opcode;
use floyd::{load_image, Config, FrameImage, FunctionImage, LoadError, ProgramImage, RuntimeError, Value};

use crate::helpers::*;

#[test]
fn test_arithmetic_globals() {
    // let int x = 1 + 2 + 3
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![
            sym("x", TypeId::INT.index(), None),
            int_sym("one", 1),
            int_sym("two", 2),
            int_sym("three", 3),
        ],
        args: vec![],
        instructions: encode(&[
            instr(Opcode::AddInt, 0, 1, 2),
            instr(Opcode::AddInt, 0, 0, 3),
            instr(Opcode::Stop, 0, 0, 0),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    let (type_id, value) = interpreter.find_global("x").unwrap();
    assert_eq!(type_id, TypeId::INT);
    assert_eq!(value, Value::Int(6));
    // Int-only programs never touch the heap.
    assert_eq!(interpreter.live_object_count(), 0);
}

#[test]
fn test_string_concat_global() {
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![
            sym("s", TypeId::STRING.index(), None),
            sym("a", TypeId::STRING.index(), Some(serde_json::json!("foo"))),
            sym("b", TypeId::STRING.index(), Some(serde_json::json!("bar"))),
        ],
        args: vec![],
        instructions: encode(&[instr(Opcode::AddString, 0, 1, 2)]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(
        interpreter.find_global("s").unwrap().1,
        Value::string("foobar")
    );
}

fn add_function_image() -> ProgramImage {
    // func int add(int a, int b) { return a + b }
    let mut image = ProgramImage::default();
    // 15: func int(int, int)
    image.types.push(type_node(
        "function",
        vec![TypeId::INT.index(), TypeId::INT.index(), TypeId::INT.index()],
    ));
    image.functions.push(FunctionImage {
        name: "add".to_string(),
        type_index: T0,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![
                sym("a", TypeId::INT.index(), None),
                sym("b", TypeId::INT.index(), None),
                sym("r", TypeId::INT.index(), None),
            ],
            args: vec![TypeId::INT.index(), TypeId::INT.index()],
            instructions: encode(&[
                instr(Opcode::AddInt, 2, 0, 1),
                instr(Opcode::Return, 2, 0, 0),
            ]),
        }),
    });
    image
}

#[test]
fn test_call_function_from_host() {
    let image = add_function_image();
    let mut interpreter = load_image(&image, Config::default()).unwrap();
    let add = interpreter.find_function("add").unwrap();
    let result = interpreter
        .call(&add, &[Value::Int(3), Value::Int(4)])
        .unwrap();
    assert_eq!(result, Value::Int(7));
    assert_eq!(interpreter.live_object_count(), 0);
}

#[test]
fn test_call_opcode_from_bytecode() {
    // let int y = add(3, 4), with the call compiled to bytecode.
    let mut image = add_function_image();
    image.globals = FrameImage {
        symbols: vec![
            sym("f", T0, Some(serde_json::json!(0))),
            sym("y", TypeId::INT.index(), None),
            int_sym("three", 3),
            int_sym("four", 4),
        ],
        args: vec![],
        instructions: encode(&[
            instr(Opcode::PushFrame, 0, 0, 0),
            instr(Opcode::PushIntern, 2, 0, 0),
            instr(Opcode::PushIntern, 3, 0, 0),
            instr(Opcode::Call, 1, 0, 2),
            instr(Opcode::Popn, 2, 0, 0),
            instr(Opcode::PopFrame, 0, 0, 0),
            instr(Opcode::Stop, 0, 0, 0),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(interpreter.find_global("y").unwrap().1, Value::Int(7));
}

#[test]
fn test_branch_loop_sums() {
    // var acc = 0; for i in 1..=5 { acc += i }
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![
            sym("acc", TypeId::INT.index(), None),
            int_sym("i", 1),
            int_sym("limit", 5),
            int_sym("one", 1),
        ],
        args: vec![],
        instructions: encode(&[
            // 0: while i <= limit
            instr(Opcode::BrLEInt, 1, 2, 1), // -> 2 (body)
            instr(Opcode::BrAlways, 0, 3, 0), // -> 5 (exit)
            instr(Opcode::AddInt, 0, 0, 1),
            instr(Opcode::AddInt, 1, 1, 3),
            instr(Opcode::BrAlways, 0, -5, 0), // -> 0
            instr(Opcode::Stop, 0, 0, 0),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(interpreter.find_global("acc").unwrap().1, Value::Int(15));
}

#[test]
fn test_stop_halts_stream() {
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![sym("x", TypeId::INT.index(), None), int_sym("one", 1)],
        args: vec![],
        instructions: encode(&[
            instr(Opcode::Stop, 0, 0, 0),
            instr(Opcode::AddInt, 0, 0, 1),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(interpreter.find_global("x").unwrap().1, Value::Int(0));
}

#[test]
fn test_division_by_zero_in_globals() {
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![
            sym("x", TypeId::INT.index(), None),
            int_sym("ten", 10),
            int_sym("zero", 0),
        ],
        args: vec![],
        instructions: encode(&[instr(Opcode::DivInt, 0, 1, 2)]),
    };
    match load_image(&image, Config::default()) {
        Err(LoadError::GlobalInit(RuntimeError::DivisionByZero)) => {}
        other => panic!("expected division by zero, got {:?}", other.err()),
    }
}

#[test]
fn test_struct_member_access() {
    let mut image = ProgramImage::default();
    // 15: struct { int x; int y; }
    image.types.push(struct_node(
        &["x", "y"],
        vec![TypeId::INT.index(), TypeId::INT.index()],
    ));
    image.globals = FrameImage {
        symbols: vec![
            sym("p", T0, Some(serde_json::json!({"x": 1, "y": 2}))),
            sym("m", TypeId::INT.index(), None),
        ],
        args: vec![],
        instructions: encode(&[instr(Opcode::GetStructMember, 1, 0, 1)]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(interpreter.find_global("m").unwrap().1, Value::Int(2));
}

#[test]
fn test_vector_lookup() {
    let mut image = ProgramImage::default();
    // 15: [int]
    image.types.push(type_node("vector", vec![TypeId::INT.index()]));
    image.globals = FrameImage {
        symbols: vec![
            sym("v", T0, Some(serde_json::json!([5, 6, 7]))),
            int_sym("i", 1),
            sym("e", TypeId::INT.index(), None),
        ],
        args: vec![],
        instructions: encode(&[instr(Opcode::LookupVector, 2, 0, 1)]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(interpreter.find_global("e").unwrap().1, Value::Int(6));
}

#[test]
fn test_new_vector_opcode() {
    let mut image = ProgramImage::default();
    image.types.push(type_node("vector", vec![TypeId::INT.index()]));
    image.globals = FrameImage {
        symbols: vec![
            sym("v", T0, None),
            int_sym("a", 1),
            int_sym("b", 2),
        ],
        args: vec![],
        instructions: encode(&[
            instr(Opcode::PushIntern, 1, 0, 0),
            instr(Opcode::PushIntern, 2, 0, 0),
            instr(Opcode::NewVector, 0, T0 as i16, 2),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    let (type_id, value) = interpreter.find_global("v").unwrap();
    assert_eq!(
        value,
        Value::Vector {
            type_id,
            elements: vec![Value::Int(1), Value::Int(2)],
        }
    );
}

#[test]
fn test_lookup_json_object_and_array() {
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![
            sym(
                "j",
                TypeId::JSON.index(),
                Some(serde_json::json!({"a": [10, 20]})),
            ),
            sym("k", TypeId::STRING.index(), Some(serde_json::json!("a"))),
            sym("inner", TypeId::JSON.index(), None),
            int_sym("i", 1),
            sym("e", TypeId::JSON.index(), None),
        ],
        args: vec![],
        instructions: encode(&[
            instr(Opcode::LookupJson, 2, 0, 1),
            instr(Opcode::LookupJson, 4, 2, 3),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(
        interpreter.find_global("inner").unwrap().1,
        Value::Json(serde_json::json!([10, 20]))
    );
    assert_eq!(
        interpreter.find_global("e").unwrap().1,
        Value::Json(serde_json::json!(20))
    );
}

#[test]
fn test_new1_wraps_value_into_json() {
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![
            sym("j", TypeId::JSON.index(), None),
            int_sym("x", 42),
        ],
        args: vec![],
        instructions: encode(&[
            instr(Opcode::PushIntern, 1, 0, 0),
            instr(
                Opcode::New1,
                0,
                TypeId::JSON.index() as i16,
                TypeId::INT.index() as i16,
            ),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(
        interpreter.find_global("j").unwrap().1,
        Value::Json(serde_json::json!(42))
    );
}

#[test]
fn test_comparison_opcodes() {
    let mut image = ProgramImage::default();
    image.globals = FrameImage {
        symbols: vec![
            sym("lt", TypeId::BOOL.index(), None),
            sym("eq", TypeId::BOOL.index(), None),
            int_sym("a", 3),
            int_sym("b", 5),
            sym("s1", TypeId::STRING.index(), Some(serde_json::json!("abc"))),
            sym("s2", TypeId::STRING.index(), Some(serde_json::json!("abc"))),
        ],
        args: vec![],
        instructions: encode(&[
            instr(Opcode::CmpLInt, 0, 2, 3),
            instr(Opcode::Eq, 1, 4, 5),
        ]),
    };
    let interpreter = load_image(&image, Config::default()).unwrap();
    assert_eq!(interpreter.find_global("lt").unwrap().1, Value::Bool(true));
    assert_eq!(interpreter.find_global("eq").unwrap().1, Value::Bool(true));
}
