//! Host-level values and pod conversions
//!
//! [`Value`] owns everything it references and is the only value shape
//! that crosses the program boundary. Inside the VM, values are pod words
//! plus a type; [`value_to_pod`] and [`pod_to_value`] translate between
//! the two worlds.

use super::backend::ValueBackend;
use super::pod::PodValue;
use crate::types::{TypeId, TypeInterner, TypeVariant};

/// A runtime word together with its type.
///
/// The unit the interpreter and the intrinsics trade in; dynamic call
/// arguments are exactly this pair, spread over two stack words.
#[derive(Debug, Clone, Copy)]
pub struct TypedValue {
    pub type_id: TypeId,
    pub pod: PodValue,
}

impl TypedValue {
    pub fn new(
        type_id: TypeId,
        pod: PodValue,
    ) -> Self {
        TypedValue { type_id, pod }
    }
}

/// A self-contained value, used by the host API.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Void,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Json(serde_json::Value),
    Typeid(TypeId),
    Struct {
        type_id: TypeId,
        fields: Vec<Value>,
    },
    Vector {
        type_id: TypeId,
        elements: Vec<Value>,
    },
    Dict {
        type_id: TypeId,
        entries: Vec<(String, Value)>,
    },
    Function {
        type_id: TypeId,
        link_id: usize,
    },
}

impl Value {
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    /// The type of this value. Composites carry their interned type.
    pub fn type_of(&self) -> TypeId {
        match self {
            Value::Undefined => TypeId::UNDEFINED,
            Value::Void => TypeId::VOID,
            Value::Bool(_) => TypeId::BOOL,
            Value::Int(_) => TypeId::INT,
            Value::Double(_) => TypeId::DOUBLE,
            Value::String(_) => TypeId::STRING,
            Value::Json(_) => TypeId::JSON,
            Value::Typeid(_) => TypeId::TYPEID,
            Value::Struct { type_id, .. }
            | Value::Vector { type_id, .. }
            | Value::Dict { type_id, .. }
            | Value::Function { type_id, .. } => *type_id,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }
}

/// Encode a host value into a runtime word. The returned word owns one
/// reference for RC types; the caller releases it when done.
pub fn value_to_pod(
    backend: &mut ValueBackend,
    interner: &TypeInterner,
    value: &Value,
) -> PodValue {
    match value {
        Value::Undefined | Value::Void => PodValue::ZERO,
        Value::Bool(value) => PodValue::from_bool(*value),
        Value::Int(value) => PodValue::from_int(*value),
        Value::Double(value) => PodValue::from_double(*value),
        Value::String(text) => backend.alloc_string(text.as_bytes().to_vec()),
        Value::Json(tree) => backend.alloc_json(tree.clone()),
        Value::Typeid(id) => PodValue::from_type(id.raw()),
        Value::Function { link_id, .. } => PodValue::from_function(*link_id),
        Value::Vector { type_id, elements } => {
            let element_type = ValueBackend::vector_element(interner, *type_id);
            let element_pods: Vec<PodValue> = elements
                .iter()
                .map(|element| value_to_pod(backend, interner, element))
                .collect();
            let pod = backend.alloc_vector(interner, *type_id, element_pods.clone());
            for element_pod in element_pods {
                backend.release(interner, element_pod, element_type);
            }
            pod
        }
        Value::Dict { type_id, entries } => {
            let value_type = ValueBackend::dict_value(interner, *type_id);
            let entry_pods: Vec<(String, PodValue)> = entries
                .iter()
                .map(|(key, value)| (key.clone(), value_to_pod(backend, interner, value)))
                .collect();
            let value_pods: Vec<PodValue> =
                entry_pods.iter().map(|(_, pod)| *pod).collect();
            let pod = backend.alloc_dict(interner, *type_id, entry_pods);
            for value_pod in value_pods {
                backend.release(interner, value_pod, value_type);
            }
            pod
        }
        Value::Struct { type_id, fields } => {
            let field_types: Vec<TypeId> =
                match interner.get_variant(interner.peek(*type_id)) {
                    TypeVariant::Struct { fields } => {
                        fields.into_iter().map(|(_, t)| t).collect()
                    }
                    other => panic!("expected struct type, got {:?}", other),
                };
            let field_pods: Vec<PodValue> = fields
                .iter()
                .map(|field| value_to_pod(backend, interner, field))
                .collect();
            let pod = backend.alloc_struct(interner, *type_id, field_pods.clone());
            for (field_pod, field_type) in field_pods.into_iter().zip(field_types) {
                backend.release(interner, field_pod, field_type);
            }
            pod
        }
    }
}

/// Decode a runtime word into a self-contained host value. Does not touch
/// reference counts.
pub fn pod_to_value(
    backend: &ValueBackend,
    interner: &TypeInterner,
    type_id: TypeId,
    pod: PodValue,
) -> Value {
    match interner.get_variant(interner.peek(type_id)) {
        TypeVariant::Undefined | TypeVariant::Any => Value::Undefined,
        TypeVariant::Void => Value::Void,
        TypeVariant::Bool => Value::Bool(pod.as_bool()),
        TypeVariant::Int => Value::Int(pod.as_int()),
        TypeVariant::Double => Value::Double(pod.as_double()),
        TypeVariant::String => {
            Value::String(String::from_utf8_lossy(backend.string_bytes(pod)).into_owned())
        }
        TypeVariant::Json => Value::Json(backend.json_tree(pod).clone()),
        TypeVariant::Typeid => Value::Typeid(TypeId::from_raw(pod.as_type_raw())),
        TypeVariant::Function { .. } => Value::Function {
            type_id,
            link_id: pod.as_function(),
        },
        TypeVariant::Vector { element } => Value::Vector {
            type_id,
            elements: backend
                .vector_elements(pod)
                .into_iter()
                .map(|element_pod| pod_to_value(backend, interner, element, element_pod))
                .collect(),
        },
        TypeVariant::Dict { value } => Value::Dict {
            type_id,
            entries: backend
                .dict_entries_sorted(pod)
                .into_iter()
                .map(|(key, value_pod)| {
                    (key, pod_to_value(backend, interner, value, value_pod))
                })
                .collect(),
        },
        TypeVariant::Struct { fields } => Value::Struct {
            type_id,
            fields: backend
                .struct_fields(pod)
                .iter()
                .zip(fields)
                .map(|(field_pod, (_, field_type))| {
                    pod_to_value(backend, interner, field_type, *field_pod)
                })
                .collect(),
        },
        TypeVariant::SymbolRef { .. } | TypeVariant::Named { .. } => {
            unreachable!("peeked type cannot be a symbol-ref or named node")
        }
    }
}

/// Compact one-line rendering, used by `to_string` and `print`.
///
/// Strings are bare at the top level and quoted inside composites.
pub fn pod_to_compact_string(
    backend: &ValueBackend,
    interner: &TypeInterner,
    type_id: TypeId,
    pod: PodValue,
) -> String {
    render(backend, interner, type_id, pod, false)
}

fn render(
    backend: &ValueBackend,
    interner: &TypeInterner,
    type_id: TypeId,
    pod: PodValue,
    quote_strings: bool,
) -> String {
    match interner.get_variant(interner.peek(type_id)) {
        TypeVariant::Undefined | TypeVariant::Any => "undef".to_string(),
        TypeVariant::Void => "void".to_string(),
        TypeVariant::Bool => if pod.as_bool() { "true" } else { "false" }.to_string(),
        TypeVariant::Int => pod.as_int().to_string(),
        TypeVariant::Double => format_double(pod.as_double()),
        TypeVariant::String => {
            let text = String::from_utf8_lossy(backend.string_bytes(pod));
            if quote_strings {
                format!("\"{}\"", text)
            } else {
                text.into_owned()
            }
        }
        TypeVariant::Json => {
            serde_json::to_string(backend.json_tree(pod)).expect("json trees always serialize")
        }
        TypeVariant::Typeid => {
            interner.type_to_string(TypeId::from_raw(pod.as_type_raw()))
        }
        TypeVariant::Function { .. } => format!("func#{}", pod.as_function()),
        TypeVariant::Vector { element } => {
            let rendered: Vec<String> = backend
                .vector_elements(pod)
                .into_iter()
                .map(|element_pod| render(backend, interner, element, element_pod, true))
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        TypeVariant::Dict { value } => {
            let rendered: Vec<String> = backend
                .dict_entries_sorted(pod)
                .into_iter()
                .map(|(key, value_pod)| {
                    format!(
                        "\"{}\": {}",
                        key,
                        render(backend, interner, value, value_pod, true)
                    )
                })
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        TypeVariant::Struct { fields } => {
            let field_pods = backend.struct_fields(pod);
            let rendered: Vec<String> = fields
                .iter()
                .zip(field_pods)
                .map(|((name, field_type), field_pod)| {
                    format!(
                        "{}={}",
                        name,
                        render(backend, interner, *field_type, *field_pod, true)
                    )
                })
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        TypeVariant::SymbolRef { .. } | TypeVariant::Named { .. } => {
            unreachable!("peeked type cannot be a symbol-ref or named node")
        }
    }
}

/// Integral finite doubles keep one decimal so they read as doubles.
pub fn format_double(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
