//! `print`, `assert`, `to_string`, `to_pretty_string`, `typeof`

use tracing::debug;

use crate::runtime::pod::PodValue;
use crate::runtime::value::{pod_to_compact_string, TypedValue};
use crate::types::TypeId;
use crate::vm::error::{RuntimeError, RuntimeResult};
use crate::vm::interpreter::Interpreter;

use super::json::pod_to_json;

fn void_result() -> TypedValue {
    TypedValue::new(TypeId::VOID, PodValue::ZERO)
}

/// Append one line to the runtime's captured output.
pub fn print(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let line = pod_to_compact_string(vm.backend(), vm.interner(), args[0].type_id, args[0].pod);
    debug!(target: "floyd::print", "{}", line);
    vm.push_output(line);
    Ok(void_result())
}

/// Fail the program when the argument is false.
pub fn assert_(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    debug_assert_eq!(vm.interner().peek(args[0].type_id), TypeId::BOOL);
    if args[0].pod.as_bool() {
        Ok(void_result())
    } else {
        vm.push_output("Assertion failed.".to_string());
        Err(RuntimeError::AssertionFailed)
    }
}

/// Compact one-line rendering of any value.
pub fn to_string(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let text = pod_to_compact_string(vm.backend(), vm.interner(), args[0].type_id, args[0].pod);
    let pod = vm.backend_mut().alloc_string(text.into_bytes());
    Ok(TypedValue::new(TypeId::STRING, pod))
}

/// Multi-line rendering: the value's JSON form, pretty-printed.
pub fn to_pretty_string(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    let tree = pod_to_json(vm.backend(), vm.interner(), args[0].type_id, args[0].pod)?;
    let text = serde_json::to_string_pretty(&tree).expect("json trees always serialize");
    let pod = vm.backend_mut().alloc_string(text.into_bytes());
    Ok(TypedValue::new(TypeId::STRING, pod))
}

/// The static type of the argument, as a typeid value.
pub fn type_of(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 1);
    Ok(TypedValue::new(
        TypeId::TYPEID,
        PodValue::from_type(args[0].type_id.raw()),
    ))
}
