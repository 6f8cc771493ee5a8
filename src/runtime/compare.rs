//! Structural deep compare
//!
//! One comparison routine serves all six relational operators. Strings
//! compare byte-wise, doubles with IEEE semantics, collections on length
//! first and then elements, dicts as key-sorted entry sequences, structs
//! member-wise in declaration order.

use std::cmp::Ordering;

use super::backend::ValueBackend;
use super::pod::PodValue;
use crate::types::{TypeId, TypeInterner, TypeVariant};

/// The six relational/equality operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
}

/// Evaluate `lhs op rhs` for values of type `type_id`.
pub fn compare(
    backend: &ValueBackend,
    interner: &TypeInterner,
    op: CompareOp,
    type_id: TypeId,
    lhs: PodValue,
    rhs: PodValue,
) -> bool {
    let ordering = compare_deep(backend, interner, type_id, lhs, rhs);
    match op {
        CompareOp::Less => ordering == Ordering::Less,
        CompareOp::LessEqual => ordering != Ordering::Greater,
        CompareOp::Greater => ordering == Ordering::Greater,
        CompareOp::GreaterEqual => ordering != Ordering::Less,
        CompareOp::Equal => ordering == Ordering::Equal,
        CompareOp::NotEqual => ordering != Ordering::Equal,
    }
}

/// Total-ish ordering used by the operators. NaN compares equal to
/// anything it is not less/greater than, which mirrors the source
/// language's IEEE comparison chain.
pub fn compare_deep(
    backend: &ValueBackend,
    interner: &TypeInterner,
    type_id: TypeId,
    lhs: PodValue,
    rhs: PodValue,
) -> Ordering {
    match interner.get_variant(interner.peek(type_id)) {
        TypeVariant::Undefined | TypeVariant::Any | TypeVariant::Void => Ordering::Equal,
        TypeVariant::Bool => lhs.as_bool().cmp(&rhs.as_bool()),
        TypeVariant::Int => lhs.as_int().cmp(&rhs.as_int()),
        TypeVariant::Double => lhs
            .as_double()
            .partial_cmp(&rhs.as_double())
            .unwrap_or(Ordering::Equal),
        TypeVariant::String => backend.string_bytes(lhs).cmp(backend.string_bytes(rhs)),
        TypeVariant::Json => json_cmp(backend.json_tree(lhs), backend.json_tree(rhs)),
        TypeVariant::Typeid => lhs.as_type_raw().cmp(&rhs.as_type_raw()),
        TypeVariant::Function { .. } => lhs.as_function().cmp(&rhs.as_function()),
        TypeVariant::Struct { fields } => {
            let lhs_fields = backend.struct_fields(lhs);
            let rhs_fields = backend.struct_fields(rhs);
            for (index, (_, field_type)) in fields.iter().enumerate() {
                let ordering = compare_deep(
                    backend,
                    interner,
                    *field_type,
                    lhs_fields[index],
                    rhs_fields[index],
                );
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        }
        TypeVariant::Vector { element } => {
            let lhs_elements = backend.vector_elements(lhs);
            let rhs_elements = backend.vector_elements(rhs);
            let by_len = lhs_elements.len().cmp(&rhs_elements.len());
            if by_len != Ordering::Equal {
                return by_len;
            }
            for (l, r) in lhs_elements.iter().zip(rhs_elements.iter()) {
                let ordering = compare_deep(backend, interner, element, *l, *r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        }
        TypeVariant::Dict { value } => {
            let lhs_entries = backend.dict_entries_sorted(lhs);
            let rhs_entries = backend.dict_entries_sorted(rhs);
            let by_len = lhs_entries.len().cmp(&rhs_entries.len());
            if by_len != Ordering::Equal {
                return by_len;
            }
            for ((lk, lv), (rk, rv)) in lhs_entries.iter().zip(rhs_entries.iter()) {
                let by_key = lk.cmp(rk);
                if by_key != Ordering::Equal {
                    return by_key;
                }
                let by_value = compare_deep(backend, interner, value, *lv, *rv);
                if by_value != Ordering::Equal {
                    return by_value;
                }
            }
            Ordering::Equal
        }
        TypeVariant::SymbolRef { .. } | TypeVariant::Named { .. } => {
            unreachable!("peeked type cannot be a symbol-ref or named node")
        }
    }
}

/// Rank used by `get_json_type`: object=1 .. null=7.
pub fn json_type_rank(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Object(_) => 1,
        serde_json::Value::Array(_) => 2,
        serde_json::Value::String(_) => 3,
        serde_json::Value::Number(_) => 4,
        serde_json::Value::Bool(true) => 5,
        serde_json::Value::Bool(false) => 6,
        serde_json::Value::Null => 7,
    }
}

fn json_cmp(
    lhs: &serde_json::Value,
    rhs: &serde_json::Value,
) -> Ordering {
    use serde_json::Value;

    let by_rank = json_type_rank(lhs).cmp(&json_type_rank(rhs));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (lhs, rhs) {
        (Value::Object(l), Value::Object(r)) => {
            let by_len = l.len().cmp(&r.len());
            if by_len != Ordering::Equal {
                return by_len;
            }
            let mut l_entries: Vec<_> = l.iter().collect();
            let mut r_entries: Vec<_> = r.iter().collect();
            l_entries.sort_by_key(|(key, _)| key.as_str());
            r_entries.sort_by_key(|(key, _)| key.as_str());
            for ((lk, lv), (rk, rv)) in l_entries.iter().zip(r_entries.iter()) {
                let by_key = lk.cmp(rk);
                if by_key != Ordering::Equal {
                    return by_key;
                }
                let by_value = json_cmp(lv, rv);
                if by_value != Ordering::Equal {
                    return by_value;
                }
            }
            Ordering::Equal
        }
        (Value::Array(l), Value::Array(r)) => {
            let by_len = l.len().cmp(&r.len());
            if by_len != Ordering::Equal {
                return by_len;
            }
            for (lv, rv) in l.iter().zip(r.iter()) {
                let by_value = json_cmp(lv, rv);
                if by_value != Ordering::Equal {
                    return by_value;
                }
            }
            Ordering::Equal
        }
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
