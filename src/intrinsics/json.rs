//! JSON intrinsics
//!
//! `to_json`/`from_json` convert between Floyd values and JSON trees;
//! `parse_json_script`/`generate_json_script` move between trees and
//! text. A JSON value is always an allocated tree; null is the `Null`
//! node, never an absent payload.

use serde_json::Value as JsonValue;

use crate::runtime::backend::ValueBackend;
use crate::runtime::compare::json_type_rank;
use crate::runtime::pod::PodValue;
use crate::runtime::value::{value_to_pod, TypedValue, Value};
use crate::types::{TypeId, TypeInterner, TypeVariant};
use crate::vm::error::{RuntimeError, RuntimeResult};
use crate::vm::interpreter::Interpreter;

/// Encode a runtime value as a JSON tree. Functions have no JSON form.
pub(crate) fn pod_to_json(
    backend: &ValueBackend,
    interner: &TypeInterner,
    type_id: TypeId,
    pod: PodValue,
) -> RuntimeResult<JsonValue> {
    match interner.get_variant(interner.peek(type_id)) {
        TypeVariant::Undefined | TypeVariant::Any | TypeVariant::Void => Ok(JsonValue::Null),
        TypeVariant::Bool => Ok(JsonValue::Bool(pod.as_bool())),
        TypeVariant::Int => Ok(JsonValue::from(pod.as_int())),
        TypeVariant::Double => Ok(serde_json::Number::from_f64(pod.as_double())
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)),
        TypeVariant::String => Ok(JsonValue::String(
            String::from_utf8_lossy(backend.string_bytes(pod)).into_owned(),
        )),
        TypeVariant::Json => Ok(backend.json_tree(pod).clone()),
        TypeVariant::Typeid => Ok(JsonValue::String(
            interner.type_to_string(TypeId::from_raw(pod.as_type_raw())),
        )),
        TypeVariant::Vector { element } => {
            let mut elements = Vec::new();
            for element_pod in backend.vector_elements(pod) {
                elements.push(pod_to_json(backend, interner, element, element_pod)?);
            }
            Ok(JsonValue::Array(elements))
        }
        TypeVariant::Dict { value } => {
            let mut members = serde_json::Map::new();
            for (key, value_pod) in backend.dict_entries_sorted(pod) {
                members.insert(key, pod_to_json(backend, interner, value, value_pod)?);
            }
            Ok(JsonValue::Object(members))
        }
        TypeVariant::Struct { fields } => {
            let field_pods = backend.struct_fields(pod).to_vec();
            let mut members = serde_json::Map::new();
            for ((name, field_type), field_pod) in fields.iter().zip(field_pods) {
                members.insert(
                    name.clone(),
                    pod_to_json(backend, interner, *field_type, field_pod)?,
                );
            }
            Ok(JsonValue::Object(members))
        }
        TypeVariant::Function { .. } => Err(RuntimeError::Message(
            "Cannot convert a function value to json.".to_string(),
        )),
        TypeVariant::SymbolRef { .. } | TypeVariant::Named { .. } => {
            unreachable!("peeked type cannot be a symbol-ref or named node")
        }
    }
}

/// Schema-directed decoding: rebuild a host value of `type_id` from a
/// JSON tree. Any shape mismatch is a user-level error.
pub(crate) fn json_to_value(
    interner: &TypeInterner,
    type_id: TypeId,
    tree: &JsonValue,
) -> RuntimeResult<Value> {
    let mismatch = |expected: &str, tree: &JsonValue| {
        RuntimeError::JsonSchemaMismatch(format!(
            "from_json() expected {}, found {}.",
            expected,
            json_kind_name(tree)
        ))
    };
    match interner.get_variant(interner.peek(type_id)) {
        TypeVariant::Bool => match tree {
            JsonValue::Bool(value) => Ok(Value::Bool(*value)),
            _ => Err(mismatch("bool", tree)),
        },
        TypeVariant::Int => match tree.as_i64() {
            Some(value) => Ok(Value::Int(value)),
            None => Err(mismatch("int", tree)),
        },
        TypeVariant::Double => match tree.as_f64() {
            Some(value) => Ok(Value::Double(value)),
            None => Err(mismatch("double", tree)),
        },
        TypeVariant::String => match tree {
            JsonValue::String(text) => Ok(Value::String(text.clone())),
            _ => Err(mismatch("string", tree)),
        },
        TypeVariant::Json => Ok(Value::Json(tree.clone())),
        TypeVariant::Vector { element } => match tree {
            JsonValue::Array(elements) => {
                let mut decoded = Vec::with_capacity(elements.len());
                for element_tree in elements {
                    decoded.push(json_to_value(interner, element, element_tree)?);
                }
                Ok(Value::Vector {
                    type_id,
                    elements: decoded,
                })
            }
            _ => Err(mismatch("array", tree)),
        },
        TypeVariant::Dict { value } => match tree {
            JsonValue::Object(members) => {
                let mut entries = Vec::with_capacity(members.len());
                for (key, value_tree) in members {
                    entries.push((key.clone(), json_to_value(interner, value, value_tree)?));
                }
                Ok(Value::Dict { type_id, entries })
            }
            _ => Err(mismatch("object", tree)),
        },
        TypeVariant::Struct { fields } => match tree {
            JsonValue::Object(members) => {
                let mut decoded = Vec::with_capacity(fields.len());
                for (name, field_type) in &fields {
                    let field_tree = members.get(name).ok_or_else(|| {
                        RuntimeError::JsonSchemaMismatch(format!(
                            "from_json() missing struct member '{}'.",
                            name
                        ))
                    })?;
                    decoded.push(json_to_value(interner, *field_type, field_tree)?);
                }
                Ok(Value::Struct {
                    type_id,
                    fields: decoded,
                })
            }
            _ => Err(mismatch("object", tree)),
        },
        other => Err(RuntimeError::JsonSchemaMismatch(format!(
            "from_json() cannot decode into {:?}.",
            other
        ))),
    }
}

fn json_kind_name(tree: &JsonValue) -> &'static str {
    match tree {
        JsonValue::Object(_) => "object",
        JsonValue::Array(_) => "array",
        JsonValue::String(_) => "string",
        JsonValue::Number(_) => "number",
        JsonValue::Bool(_) => "bool",
        JsonValue::Null => "null",
    }
}

/// `to_json(v)`
pub fn to_json(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let tree = pod_to_json(vm.backend(), vm.interner(), args[0].type_id, args[0].pod)?;
    let pod = vm.backend_mut().alloc_json(tree);
    Ok(TypedValue::new(TypeId::JSON, pod))
}

/// `from_json(json, type)`
pub fn from_json(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 2);
    let target = TypeId::from_raw(args[1].pod.as_type_raw());
    let value = {
        let tree = vm.backend().json_tree(args[0].pod);
        json_to_value(vm.interner(), target, tree)?
    };
    let (backend, interner) = vm.parts_mut();
    let pod = value_to_pod(backend, interner, &value);
    Ok(TypedValue::new(target, pod))
}

/// `parse_json_script(string)`
pub fn parse_json_script(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let tree: JsonValue = serde_json::from_slice(vm.backend().string_bytes(args[0].pod))
        .map_err(|error| {
            RuntimeError::Message(format!("parse_json_script() failed: {}.", error))
        })?;
    let pod = vm.backend_mut().alloc_json(tree);
    Ok(TypedValue::new(TypeId::JSON, pod))
}

/// `generate_json_script(json)`
pub fn generate_json_script(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let text = serde_json::to_string(vm.backend().json_tree(args[0].pod))
        .expect("json trees always serialize");
    let pod = vm.backend_mut().alloc_string(text.into_bytes());
    Ok(TypedValue::new(TypeId::STRING, pod))
}

/// `get_json_type(json)` — 1..7 for object, array, string, number, true,
/// false, null.
pub fn get_json_type(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let rank = json_type_rank(vm.backend().json_tree(args[0].pod));
    Ok(TypedValue::new(TypeId::INT, PodValue::from_int(rank)))
}
