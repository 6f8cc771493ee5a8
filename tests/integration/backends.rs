//! Backend matrix tests
//!
//! The same programs must behave identically under every vector/dict
//! backend combination; only representation and sharing differ.

use floyd::types::TypeId;
use floyd::{load_image, Config, DictBackend, FrameImage, ProgramImage, Value, VectorBackend};

use crate::helpers::*;

fn configs() -> Vec<Config> {
    let mut configs = Vec::new();
    for vector_backend in [VectorBackend::Carray, VectorBackend::Hamt] {
        for dict_backend in [DictBackend::Cppmap, DictBackend::Hamt] {
            configs.push(Config {
                vector_backend,
                dict_backend,
                record_allocs: false,
            });
        }
    }
    configs
}

fn fixture() -> ProgramImage {
    let mut image = ProgramImage::default();
    image.types.push(type_node("vector", vec![TypeId::INT.index()])); // 15: [int]
    image.types.push(type_node("dict", vec![TypeId::INT.index()])); // 16: [string:int]
    image.globals = FrameImage {
        symbols: vec![
            sym("a", T0, Some(serde_json::json!([10, 20, 30]))),
            sym("d", T0 + 1, Some(serde_json::json!({"x": 1, "y": 2}))),
        ],
        args: vec![],
        instructions: Vec::new(),
    };
    image
}

#[test]
fn test_vector_ops_match_across_backends() {
    for config in configs() {
        let mut interpreter = load_image(&fixture(), config).unwrap();
        let (_, a) = interpreter.find_global("a").unwrap();
        let push_back = interpreter.find_function("push_back").unwrap();
        let subset = interpreter.find_function("subset").unwrap();
        let update = interpreter.find_function("update").unwrap();
        let size = interpreter.find_function("size").unwrap();

        let grown = interpreter
            .call(&push_back, &[a.clone(), Value::Int(40)])
            .unwrap();
        assert_eq!(
            interpreter.call(&size, &[grown.clone()]).unwrap(),
            Value::Int(4),
            "push_back/size under {:?}",
            config
        );

        let middle = interpreter
            .call(&subset, &[grown.clone(), Value::Int(1), Value::Int(3)])
            .unwrap();
        match &middle {
            Value::Vector { elements, .. } => {
                assert_eq!(elements, &vec![Value::Int(20), Value::Int(30)]);
            }
            other => panic!("expected vector, got {:?}", other),
        }

        let patched = interpreter
            .call(&update, &[grown, Value::Int(0), Value::Int(-1)])
            .unwrap();
        match &patched {
            Value::Vector { elements, .. } => assert_eq!(elements[0], Value::Int(-1)),
            other => panic!("expected vector, got {:?}", other),
        }
    }
}

#[test]
fn test_dict_ops_match_across_backends() {
    for config in configs() {
        let mut interpreter = load_image(&fixture(), config).unwrap();
        let (_, d) = interpreter.find_global("d").unwrap();
        let update = interpreter.find_function("update").unwrap();
        let erase = interpreter.find_function("erase").unwrap();
        let get_keys = interpreter.find_function("get_keys").unwrap();

        let d2 = interpreter
            .call(&update, &[d.clone(), Value::string("z"), Value::Int(3)])
            .unwrap();
        let keys = interpreter.call(&get_keys, &[d2.clone()]).unwrap();
        match keys {
            Value::Vector { elements, .. } => {
                assert_eq!(
                    elements,
                    vec![Value::string("x"), Value::string("y"), Value::string("z")],
                    "sorted keys under {:?}",
                    config
                );
            }
            other => panic!("expected vector, got {:?}", other),
        }

        let d3 = interpreter.call(&erase, &[d2, Value::string("x")]).unwrap();
        match d3 {
            Value::Dict { entries, .. } => {
                let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_str()).collect();
                assert_eq!(keys, vec!["y", "z"]);
            }
            other => panic!("expected dict, got {:?}", other),
        }
    }
}

#[test]
fn test_subset_of_whole_is_identity() {
    for config in configs() {
        let mut interpreter = load_image(&fixture(), config).unwrap();
        let (_, a) = interpreter.find_global("a").unwrap();
        let subset = interpreter.find_function("subset").unwrap();
        let whole = interpreter
            .call(&subset, &[a.clone(), Value::Int(0), Value::Int(3)])
            .unwrap();
        assert_eq!(whole, a);
    }
}

#[test]
fn test_update_with_same_element_is_identity() {
    for config in configs() {
        let mut interpreter = load_image(&fixture(), config).unwrap();
        let (_, a) = interpreter.find_global("a").unwrap();
        let update = interpreter.find_function("update").unwrap();
        // update(v, 1, v[1]) == v by value, though it is a new allocation.
        let same = interpreter
            .call(&update, &[a.clone(), Value::Int(1), Value::Int(20)])
            .unwrap();
        assert_eq!(same, a);
    }
}
