//! `map_dag` integration test
//!
//! The formatting callback is a real bytecode function that loops over
//! its children results and calls the `size` intrinsic through the
//! dynamic-argument convention, so the whole call machinery is on the
//! hook: nested frames, dynamic arguments, vector lookups and string
//! concatenation.

use floyd::types::{BaseKind, TypeId};
use floyd::vm::Opcode;
use floyd::{load_image, Config, FrameImage, FunctionImage, ProgramImage, RuntimeError, Value};

use crate::helpers::*;

/// format_node(e, children, ctx) = e + "(" + child + ")" for each child.
fn format_node_image() -> ProgramImage {
    let mut image = ProgramImage::default();
    let int = TypeId::INT.index();
    let string = TypeId::STRING.index();
    let any = TypeId::ANY.index();

    image.types.push(type_node("vector", vec![string])); // 15: [string]
    image.types.push(type_node("function", vec![string, string, T0, int])); // 16: string(string,[string],int)
    image.types.push(type_node("function", vec![int, any])); // 17: int(any) -- size
    image.types.push(type_node("vector", vec![int])); // 18: [int]

    let size_link = intrinsic_link(&image, "size") + 1; // one image function below

    image.functions.push(FunctionImage {
        name: "format_node".to_string(),
        type_index: T0 + 1,
        args: vec![],
        host_function_id: 0,
        frame: Some(FrameImage {
            symbols: vec![
                sym("e", string, None),                                      // 0 (arg)
                sym("children", T0, None),                                   // 1 (arg)
                sym("ctx", int, None),                                       // 2 (arg)
                sym("result", string, Some(serde_json::json!(""))),          // 3
                int_sym("i", 0),                                             // 4
                sym("n", int, None),                                         // 5
                int_sym("one", 1),                                           // 6
                sym("lp", string, Some(serde_json::json!("("))),             // 7
                sym("rp", string, Some(serde_json::json!(")"))),             // 8
                sym("size_fn", T0 + 2, Some(serde_json::json!(size_link))),  // 9
                sym("vec_ty", TypeId::TYPEID.index(), Some(serde_json::json!(T0))), // 10
                sym("child", string, None),                                  // 11
            ],
            args: vec![string, T0, int],
            instructions: encode(&[
                instr(Opcode::StoreLocalObj, 3, 0, 0), // result = e
                // n = size(children): one dynamic argument, two words.
                instr(Opcode::PushFrame, 0, 0, 0),
                instr(Opcode::PushIntern, 10, 0, 0),
                instr(Opcode::PushObj, 1, 0, 0),
                instr(Opcode::Call, 5, 9, 1),
                instr(Opcode::Popn, 2, 0b01, 0),
                instr(Opcode::PopFrame, 0, 0, 0),
                // while i < n { result += "(" + children[i] + ")" }
                instr(Opcode::BrLInt, 4, 5, 1),
                instr(Opcode::BrAlways, 0, 6, 0),
                instr(Opcode::LookupVector, 11, 1, 4),
                instr(Opcode::AddString, 3, 3, 7),
                instr(Opcode::AddString, 3, 3, 11),
                instr(Opcode::AddString, 3, 3, 8),
                instr(Opcode::AddInt, 4, 4, 6),
                instr(Opcode::BrAlways, 0, -8, 0),
                instr(Opcode::Return, 3, 0, 0),
            ]),
        }),
    });
    image
}

fn string_vector(
    type_id: TypeId,
    values: &[&str],
) -> Value {
    Value::Vector {
        type_id,
        elements: values.iter().map(|value| Value::string(*value)).collect(),
    }
}

fn int_vector(
    type_id: TypeId,
    values: &[i64],
) -> Value {
    Value::Vector {
        type_id,
        elements: values.iter().map(|value| Value::Int(*value)).collect(),
    }
}

#[test]
fn test_map_dag_topological_order() {
    let image = format_node_image();
    let mut interpreter = load_image(&image, Config::default()).unwrap();

    let vec_string = TypeId::pack(BaseKind::Vector, T0);
    let vec_int = TypeId::pack(BaseKind::Vector, T0 + 3);
    let elements = string_vector(vec_string, &["A", "B", "C", "D"]);
    let parents = int_vector(vec_int, &[-1, 0, 0, 2]);

    let map_dag = interpreter.find_function("map_dag").unwrap();
    let format_node = interpreter.find_function("format_node").unwrap();

    // The frame's string constants stay alive between calls; everything
    // allocated by the call itself must be reclaimed.
    let baseline = interpreter.live_object_count();
    let results = interpreter
        .call(&map_dag, &[elements, parents, format_node, Value::Int(0)])
        .unwrap();
    match results {
        Value::Vector { elements, .. } => {
            // Every call saw its children complete: the root contains the
            // fully rendered subtrees.
            assert_eq!(elements[0], Value::string("A(B)(C(D))"));
            assert_eq!(elements[1], Value::string("B"));
            assert_eq!(elements[2], Value::string("C(D)"));
            assert_eq!(elements[3], Value::string("D"));
        }
        other => panic!("expected vector, got {:?}", other),
    }
    assert_eq!(interpreter.live_object_count(), baseline);
}

#[test]
fn test_map_dag_detects_cycles() {
    let image = format_node_image();
    let mut interpreter = load_image(&image, Config::default()).unwrap();

    let vec_string = TypeId::pack(BaseKind::Vector, T0);
    let vec_int = TypeId::pack(BaseKind::Vector, T0 + 3);
    let elements = string_vector(vec_string, &["A", "B"]);
    let parents = int_vector(vec_int, &[1, 0]);

    let map_dag = interpreter.find_function("map_dag").unwrap();
    let format_node = interpreter.find_function("format_node").unwrap();

    let baseline = interpreter.live_object_count();
    let result = interpreter.call(&map_dag, &[elements, parents, format_node, Value::Int(0)]);
    assert!(matches!(result, Err(RuntimeError::DependencyCycle)));
    assert_eq!(interpreter.live_object_count(), baseline);
}

#[test]
fn test_map_dag_cycle_after_partial_completion() {
    // A and B finish in earlier sweeps before the C/D two-cycle stalls
    // the walk; their completed results must be reclaimed with the
    // error.
    let image = format_node_image();
    let mut interpreter = load_image(&image, Config::default()).unwrap();

    let vec_string = TypeId::pack(BaseKind::Vector, T0);
    let vec_int = TypeId::pack(BaseKind::Vector, T0 + 3);
    let elements = string_vector(vec_string, &["A", "B", "C", "D"]);
    let parents = int_vector(vec_int, &[-1, 0, 3, 2]);

    let map_dag = interpreter.find_function("map_dag").unwrap();
    let format_node = interpreter.find_function("format_node").unwrap();

    let baseline = interpreter.live_object_count();
    let result = interpreter.call(&map_dag, &[elements, parents, format_node, Value::Int(0)]);
    assert!(matches!(result, Err(RuntimeError::DependencyCycle)));
    assert_eq!(interpreter.live_object_count(), baseline);
}

#[test]
fn test_map_dag_count_mismatch() {
    let image = format_node_image();
    let mut interpreter = load_image(&image, Config::default()).unwrap();

    let vec_string = TypeId::pack(BaseKind::Vector, T0);
    let vec_int = TypeId::pack(BaseKind::Vector, T0 + 3);
    let elements = string_vector(vec_string, &["A", "B"]);
    let parents = int_vector(vec_int, &[-1]);

    let map_dag = interpreter.find_function("map_dag").unwrap();
    let format_node = interpreter.find_function("format_node").unwrap();

    let result = interpreter.call(&map_dag, &[elements, parents, format_node, Value::Int(0)]);
    assert!(matches!(result, Err(RuntimeError::Message(_))));
}
