//! Collection intrinsics
//!
//! `update`, `size`, `find`, `exists`, `erase`, `push_back`, `subset`,
//! `replace`, `get_keys`. Each dispatches on the peeked type of its first
//! argument to the backend specialization for the active collection shape.

use std::cmp::Ordering;

use crate::runtime::backend::ValueBackend;
use crate::runtime::compare::compare_deep;
use crate::runtime::pod::PodValue;
use crate::runtime::value::TypedValue;
use crate::types::{TypeId, TypeNode, TypeVariant};
use crate::vm::error::{RuntimeError, RuntimeResult};
use crate::vm::interpreter::Interpreter;

fn read_key_string(
    backend: &ValueBackend,
    key: &TypedValue,
) -> String {
    String::from_utf8_lossy(backend.string_bytes(key.pod)).into_owned()
}

/// `update(coll, key, value)` — one slot/member replaced.
pub fn update(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    if args.len() != 3 {
        return Err(RuntimeError::Message("update() needs 3 arguments.".to_string()));
    }
    let (coll, key, value) = (&args[0], &args[1], &args[2]);
    match vm.interner().get_variant(vm.interner().peek(coll.type_id)) {
        TypeVariant::String => {
            if vm.interner().peek(key.type_id) != TypeId::INT {
                return Err(RuntimeError::Message(
                    "String lookup using integer index only.".to_string(),
                ));
            }
            let pod = vm
                .backend_mut()
                .update_string(coll.pod, key.pod.as_int(), value.pod)?;
            Ok(TypedValue::new(coll.type_id, pod))
        }
        TypeVariant::Vector { .. } => {
            if vm.interner().peek(key.type_id) != TypeId::INT {
                return Err(RuntimeError::Message(
                    "Vector lookup using integer index only.".to_string(),
                ));
            }
            let (backend, interner) = vm.parts_mut();
            let pod = backend.update_vector(
                interner,
                coll.type_id,
                coll.pod,
                key.pod.as_int(),
                value.pod,
            )?;
            Ok(TypedValue::new(coll.type_id, pod))
        }
        TypeVariant::Dict { .. } => {
            if vm.interner().peek(key.type_id) != TypeId::STRING {
                return Err(RuntimeError::Message(
                    "Dict lookup using string key only.".to_string(),
                ));
            }
            let key_text = read_key_string(vm.backend(), key);
            let (backend, interner) = vm.parts_mut();
            let pod = backend.update_dict(interner, coll.type_id, coll.pod, &key_text, value.pod);
            Ok(TypedValue::new(coll.type_id, pod))
        }
        TypeVariant::Struct { .. } => {
            if vm.interner().peek(key.type_id) != TypeId::STRING {
                return Err(RuntimeError::Message(
                    "You must specify structure member using string.".to_string(),
                ));
            }
            let member = read_key_string(vm.backend(), key);
            let (backend, interner) = vm.parts_mut();
            let pod =
                backend.update_struct(interner, coll.type_id, coll.pod, &member, value.pod)?;
            Ok(TypedValue::new(coll.type_id, pod))
        }
        _ => Err(RuntimeError::Message(
            "Can only update string, vector, dict or struct.".to_string(),
        )),
    }
}

/// `size(coll)` — element count; byte count for strings.
pub fn size(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let count = vm
        .backend()
        .size_of(vm.interner(), args[0].type_id, args[0].pod)?;
    Ok(TypedValue::new(TypeId::INT, PodValue::from_int(count)))
}

/// `find(coll, v)` — first match index or -1.
pub fn find(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 2);
    let (coll, needle) = (&args[0], &args[1]);
    let index = match vm.interner().get_variant(vm.interner().peek(coll.type_id)) {
        TypeVariant::String => vm.backend().find_string(coll.pod, needle.pod),
        TypeVariant::Vector { element } => {
            let elements = vm.backend().vector_elements(coll.pod);
            elements
                .iter()
                .position(|candidate| {
                    compare_deep(vm.backend(), vm.interner(), element, *candidate, needle.pod)
                        == Ordering::Equal
                })
                .map(|position| position as i64)
                .unwrap_or(-1)
        }
        _ => {
            return Err(RuntimeError::Message(
                "find() requires a string or vector.".to_string(),
            ))
        }
    };
    Ok(TypedValue::new(TypeId::INT, PodValue::from_int(index)))
}

/// `exists(dict, key)`
pub fn exists(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 2);
    let key = read_key_string(vm.backend(), &args[1]);
    let found = vm.backend().exists_dict(args[0].pod, &key);
    Ok(TypedValue::new(TypeId::BOOL, PodValue::from_bool(found)))
}

/// `erase(dict, key)` — a new dict without the key.
pub fn erase(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 2);
    let key = read_key_string(vm.backend(), &args[1]);
    let (backend, interner) = vm.parts_mut();
    let pod = backend.erase_dict(interner, args[0].type_id, args[0].pod, &key)?;
    Ok(TypedValue::new(args[0].type_id, pod))
}

/// `push_back(coll, v)` — string takes a character value, vectors an
/// element.
pub fn push_back(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 2);
    let (coll, element) = (&args[0], &args[1]);
    match vm.interner().get_variant(vm.interner().peek(coll.type_id)) {
        TypeVariant::String => {
            let pod = vm
                .backend_mut()
                .push_back_string(coll.pod, element.pod.as_int());
            Ok(TypedValue::new(coll.type_id, pod))
        }
        TypeVariant::Vector { .. } => {
            let (backend, interner) = vm.parts_mut();
            let pod = backend.push_back_vector(interner, coll.type_id, coll.pod, element.pod);
            Ok(TypedValue::new(coll.type_id, pod))
        }
        _ => Err(RuntimeError::Message(
            "push_back() requires a string or vector.".to_string(),
        )),
    }
}

/// `subset(coll, start, end)` — clamped copy of a range.
pub fn subset(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 3);
    let coll = &args[0];
    let start = args[1].pod.as_int();
    let end = args[2].pod.as_int();
    match vm.interner().get_variant(vm.interner().peek(coll.type_id)) {
        TypeVariant::String => {
            let pod = vm.backend_mut().subset_string(coll.pod, start, end)?;
            Ok(TypedValue::new(coll.type_id, pod))
        }
        TypeVariant::Vector { .. } => {
            let (backend, interner) = vm.parts_mut();
            let pod = backend.subset_vector(interner, coll.type_id, coll.pod, start, end)?;
            Ok(TypedValue::new(coll.type_id, pod))
        }
        _ => Err(RuntimeError::Message(
            "subset() requires a string or vector.".to_string(),
        )),
    }
}

/// `replace(coll, start, end, replacement)` — splice a same-typed
/// collection over a range.
pub fn replace(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 4);
    let (coll, replacement) = (&args[0], &args[3]);
    if vm.interner().peek(coll.type_id) != vm.interner().peek(replacement.type_id) {
        return Err(RuntimeError::Message(
            "replace() requires argument 4 to be same type of collection.".to_string(),
        ));
    }
    let start = args[1].pod.as_int();
    let end = args[2].pod.as_int();
    match vm.interner().get_variant(vm.interner().peek(coll.type_id)) {
        TypeVariant::String => {
            let pod = vm
                .backend_mut()
                .replace_string(coll.pod, start, end, replacement.pod)?;
            Ok(TypedValue::new(coll.type_id, pod))
        }
        TypeVariant::Vector { .. } => {
            let (backend, interner) = vm.parts_mut();
            let pod = backend.replace_vector(
                interner,
                coll.type_id,
                coll.pod,
                start,
                end,
                replacement.pod,
            )?;
            Ok(TypedValue::new(coll.type_id, pod))
        }
        _ => Err(RuntimeError::Message(
            "replace() requires a string or vector.".to_string(),
        )),
    }
}

/// `get_keys(dict)` — all keys as `[string]`, sorted.
pub fn get_keys(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let (backend, interner) = vm.parts_mut();
    let result_type = interner.intern_anonymous(TypeNode::vector(TypeId::STRING));
    let pod = backend.get_keys_dict(interner, result_type, args[0].pod);
    Ok(TypedValue::new(result_type, pod))
}
