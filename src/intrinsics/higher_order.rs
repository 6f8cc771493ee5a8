//! Higher-order intrinsics
//!
//! `map`, `map_string`, `map_dag`, `filter`, `reduce`, `stable_sort`.
//! These re-enter the interpreter for every callback; the function value
//! arrives as a link-id word plus its function type.

use crate::runtime::backend::ValueBackend;
use crate::runtime::pod::PodValue;
use crate::runtime::value::TypedValue;
use crate::types::{TypeId, TypeInterner, TypeNode, TypeVariant};
use crate::vm::error::{RuntimeError, RuntimeResult};
use crate::vm::interpreter::Interpreter;

/// Link id and return type of a function argument.
fn function_parts(
    interner: &TypeInterner,
    function: &TypedValue,
) -> (usize, TypeId) {
    let ret = match interner.get_variant(interner.peek(function.type_id)) {
        TypeVariant::Function { ret, .. } => ret,
        other => panic!("expected a function argument, got {:?}", other),
    };
    (function.pod.as_function(), ret)
}

/// Drop ownership of intermediate callback results when a callback
/// errors partway; without this, every already-completed result leaks.
fn release_all(
    vm: &mut Interpreter,
    results: impl IntoIterator<Item = TypedValue>,
) {
    let (backend, interner) = vm.parts_mut();
    for result in results {
        backend.release(interner, result.pod, result.type_id);
    }
}

/// `map(elements, f, context)` — `[R]` from `[E]` through `R f(E, C)`.
pub fn map(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 3);
    let element_type = ValueBackend::vector_element(vm.interner(), args[0].type_id);
    let elements = vm.backend().vector_elements(args[0].pod);
    let (link_id, ret) = function_parts(vm.interner(), &args[1]);

    let mut results = Vec::with_capacity(elements.len());
    for element in elements {
        match vm.call_function_pod(link_id, &[TypedValue::new(element_type, element), args[2]]) {
            Ok(result) => results.push(result),
            Err(error) => {
                release_all(vm, results);
                return Err(error);
            }
        }
    }

    let (backend, interner) = vm.parts_mut();
    let result_type = interner.intern_anonymous(TypeNode::vector(ret));
    let result_pods: Vec<PodValue> = results.iter().map(|result| result.pod).collect();
    let pod = backend.alloc_vector(interner, result_type, result_pods);
    for result in results {
        backend.release(interner, result.pod, result.type_id);
    }
    Ok(TypedValue::new(result_type, pod))
}

/// `map_string(s, f, context)` — byte-wise rewrite through
/// `string f(string, C)`.
pub fn map_string(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 3);
    let bytes = vm.backend().string_bytes(args[0].pod).to_vec();
    let (link_id, _) = function_parts(vm.interner(), &args[1]);

    let mut out = Vec::with_capacity(bytes.len());
    for byte in bytes {
        let one = vm.backend_mut().alloc_string(vec![byte]);
        let result = match vm.call_function_pod(
            link_id,
            &[TypedValue::new(TypeId::STRING, one), args[2]],
        ) {
            Ok(result) => result,
            Err(error) => {
                release_all(vm, [TypedValue::new(TypeId::STRING, one)]);
                return Err(error);
            }
        };
        out.extend_from_slice(vm.backend().string_bytes(result.pod));
        let (backend, interner) = vm.parts_mut();
        backend.release(interner, one, TypeId::STRING);
        backend.release(interner, result.pod, result.type_id);
    }
    let pod = vm.backend_mut().alloc_string(out);
    Ok(TypedValue::new(TypeId::STRING, pod))
}

/// `map_dag(elements, parents, f, context)` — topological processing.
///
/// `parents[i]` is the index of element i's parent, -1 for roots. Every
/// call of `f(element, children_results, context)` sees its children
/// already computed; a sweep that completes nothing detects a cycle.
pub fn map_dag(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 4);
    let element_type = ValueBackend::vector_element(vm.interner(), args[0].type_id);
    let elements = vm.backend().vector_elements(args[0].pod);
    let parents: Vec<i64> = vm
        .backend()
        .vector_elements(args[1].pod)
        .iter()
        .map(|pod| pod.as_int())
        .collect();
    if elements.len() != parents.len() {
        return Err(RuntimeError::Message(
            "map_dag() requires elements and parents be the same count.".to_string(),
        ));
    }
    let (link_id, ret) = function_parts(vm.interner(), &args[2]);
    let count = elements.len();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (index, parent) in parents.iter().enumerate() {
        if *parent < 0 {
            if *parent != -1 {
                return Err(RuntimeError::Message(
                    "map_dag() parents must be -1 or an element index.".to_string(),
                ));
            }
        } else if (*parent as usize) < count {
            children[*parent as usize].push(index);
        } else {
            return Err(RuntimeError::IndexOutOfRange(
                "map_dag() parent index out of bounds.".to_string(),
            ));
        }
    }

    let results_type = {
        let (_, interner) = vm.parts_mut();
        interner.intern_anonymous(TypeNode::vector(ret))
    };

    let mut results: Vec<Option<TypedValue>> = vec![None; count];
    let mut complete = 0usize;
    while complete < count {
        let mut progressed = false;
        for index in 0..count {
            if results[index].is_some() {
                continue;
            }
            if !children[index].iter().all(|child| results[*child].is_some()) {
                continue;
            }
            let child_pods: Vec<PodValue> = children[index]
                .iter()
                .map(|child| results[*child].expect("children checked complete").pod)
                .collect();
            let child_vec = {
                let (backend, interner) = vm.parts_mut();
                backend.alloc_vector(interner, results_type, child_pods)
            };
            let call = vm.call_function_pod(
                link_id,
                &[
                    TypedValue::new(element_type, elements[index]),
                    TypedValue::new(results_type, child_vec),
                    args[3],
                ],
            );
            {
                let (backend, interner) = vm.parts_mut();
                backend.release(interner, child_vec, results_type);
            }
            match call {
                Ok(result) => {
                    results[index] = Some(result);
                    complete += 1;
                    progressed = true;
                }
                Err(error) => {
                    release_all(vm, results.into_iter().flatten());
                    return Err(error);
                }
            }
        }
        if !progressed {
            release_all(vm, results.into_iter().flatten());
            return Err(RuntimeError::DependencyCycle);
        }
    }

    let result_pods: Vec<PodValue> = results
        .iter()
        .map(|result| result.expect("all nodes complete").pod)
        .collect();
    let (backend, interner) = vm.parts_mut();
    let pod = backend.alloc_vector(interner, results_type, result_pods);
    for result in results.into_iter().flatten() {
        backend.release(interner, result.pod, result.type_id);
    }
    Ok(TypedValue::new(results_type, pod))
}

/// `filter(elements, predicate, context)` — keep where `bool f(E, C)`.
pub fn filter(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 3);
    let element_type = ValueBackend::vector_element(vm.interner(), args[0].type_id);
    let elements = vm.backend().vector_elements(args[0].pod);
    let (link_id, _) = function_parts(vm.interner(), &args[1]);

    let mut kept = Vec::new();
    for element in elements {
        let verdict =
            vm.call_function_pod(link_id, &[TypedValue::new(element_type, element), args[2]])?;
        if verdict.pod.as_bool() {
            kept.push(element);
        }
    }
    let (backend, interner) = vm.parts_mut();
    let pod = backend.alloc_vector(interner, args[0].type_id, kept);
    Ok(TypedValue::new(args[0].type_id, pod))
}

/// `reduce(elements, init, f, context)` — the left fold.
pub fn reduce(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 4);
    let element_type = ValueBackend::vector_element(vm.interner(), args[0].type_id);
    let elements = vm.backend().vector_elements(args[0].pod);
    let (link_id, _) = function_parts(vm.interner(), &args[2]);

    let mut accumulator = args[1];
    {
        let (backend, interner) = vm.parts_mut();
        backend.retain(interner, accumulator.pod, accumulator.type_id);
    }
    for element in elements {
        let next = match vm.call_function_pod(
            link_id,
            &[accumulator, TypedValue::new(element_type, element), args[3]],
        ) {
            Ok(next) => next,
            Err(error) => {
                release_all(vm, [accumulator]);
                return Err(error);
            }
        };
        let (backend, interner) = vm.parts_mut();
        backend.release(interner, accumulator.pod, accumulator.type_id);
        accumulator = next;
    }
    Ok(accumulator)
}

/// `stable_sort(elements, less, context)` — binary-predicate stable sort.
///
/// Insertion-based so callback errors propagate cleanly; equal elements
/// keep their input order.
pub fn stable_sort(
    vm: &mut Interpreter,
    args: &[TypedValue],
) -> RuntimeResult<TypedValue> {
    debug_assert_eq!(args.len(), 3);
    let element_type = ValueBackend::vector_element(vm.interner(), args[0].type_id);
    let elements = vm.backend().vector_elements(args[0].pod);
    let (link_id, _) = function_parts(vm.interner(), &args[1]);

    let mut sorted: Vec<PodValue> = Vec::with_capacity(elements.len());
    for element in elements {
        let mut insert_at = sorted.len();
        for index in 0..sorted.len() {
            let verdict = vm.call_function_pod(
                link_id,
                &[
                    TypedValue::new(element_type, element),
                    TypedValue::new(element_type, sorted[index]),
                    args[2],
                ],
            )?;
            if verdict.pod.as_bool() {
                insert_at = index;
                break;
            }
        }
        sorted.insert(insert_at, element);
    }
    let (backend, interner) = vm.parts_mut();
    let pod = backend.alloc_vector(interner, args[0].type_id, sorted);
    Ok(TypedValue::new(args[0].type_id, pod))
}
