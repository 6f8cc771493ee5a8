//! The value backend
//!
//! Owns the heap and implements every collection primitive the interpreter
//! and the intrinsics dispatch to. Each operation has a variant per
//! backend shape; the active vector/dict backend is chosen once per
//! program by [`Config`].
//!
//! RC discipline: a collection retains every element it references when it
//! is created and releases every element when it is disposed. Structural
//! sharing between persistent collections happens at the HAMT node level,
//! so element counts double-count across shared collections by design.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use tracing::debug;

use super::hamt::{HamtMap, HamtVector};
use super::heap::{Heap, HeapPayload, TraceRow};
use super::pod::PodValue;
use crate::types::{TypeId, TypeInterner, TypeVariant};
use crate::vm::error::{RuntimeError, RuntimeResult};

/// Vector backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorBackend {
    Carray,
    #[default]
    Hamt,
}

/// Dict backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictBackend {
    Cppmap,
    #[default]
    Hamt,
}

/// Per-program backend configuration, fixed at load.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub vector_backend: VectorBackend,
    pub dict_backend: DictBackend,
    /// Record every allocation in the debug side table.
    pub record_allocs: bool,
}

/// Layout of one struct field.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    /// Byte offset of the field; always a multiple of 8.
    pub offset: usize,
    pub type_id: TypeId,
    pub rc: bool,
}

/// Precomputed layout of a struct type.
#[derive(Debug, Clone)]
pub struct StructLayout {
    /// Total size in bytes.
    pub size: usize,
    pub fields: Vec<FieldLayout>,
}

/// Heap owner and collection-primitive implementation.
///
/// The interner is owned by the interpreter and passed in; the backend
/// itself holds the heap, the config, and the struct layout table.
#[derive(Debug)]
pub struct ValueBackend {
    config: Config,
    heap: Heap,
    /// Struct layouts keyed by interner index of the (peeked) struct node.
    struct_layouts: HashMap<usize, StructLayout>,
}

impl ValueBackend {
    pub fn new(config: Config) -> Self {
        ValueBackend {
            config,
            heap: Heap::new(config.record_allocs),
            struct_layouts: HashMap::new(),
        }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Precompute size and field offsets for every struct type currently
    /// interned. Called once by the loader, after the type table is built.
    pub fn precompute_struct_layouts(
        &mut self,
        interner: &TypeInterner,
    ) {
        for index in 0..interner.count() {
            let id = interner.type_at_index(index);
            if let TypeVariant::Struct { fields } = interner.get_variant(id) {
                let layout = StructLayout {
                    size: fields.len() * 8,
                    fields: fields
                        .iter()
                        .enumerate()
                        .map(|(field_index, (_, field_type))| FieldLayout {
                            offset: field_index * 8,
                            type_id: *field_type,
                            rc: interner.is_rc(*field_type),
                        })
                        .collect(),
                };
                self.struct_layouts.insert(index, layout);
            }
        }
        debug!(layouts = self.struct_layouts.len(), "struct layouts ready");
    }

    /// Layout of a struct type (alias-transparent).
    pub fn struct_layout(
        &self,
        interner: &TypeInterner,
        type_id: TypeId,
    ) -> &StructLayout {
        let index = interner.peek(type_id).index();
        self.struct_layouts
            .get(&index)
            .unwrap_or_else(|| panic!("no layout for {}", interner.type_to_string(type_id)))
    }

    //////////////////////////////////////// type helpers

    /// Element type of a vector type.
    pub fn vector_element(
        interner: &TypeInterner,
        type_id: TypeId,
    ) -> TypeId {
        match interner.get_variant(interner.peek(type_id)) {
            TypeVariant::Vector { element } => element,
            other => panic!("expected vector type, got {:?}", other),
        }
    }

    /// Value type of a dict type.
    pub fn dict_value(
        interner: &TypeInterner,
        type_id: TypeId,
    ) -> TypeId {
        match interner.get_variant(interner.peek(type_id)) {
            TypeVariant::Dict { value } => value,
            other => panic!("expected dict type, got {:?}", other),
        }
    }

    //////////////////////////////////////// allocation

    pub fn alloc_string(
        &mut self,
        bytes: Vec<u8>,
    ) -> PodValue {
        let id = self.heap.alloc(TypeId::STRING, HeapPayload::String(bytes));
        PodValue::from_object(id)
    }

    /// Allocate a vector using the configured backend. Retains every
    /// element on behalf of the new collection.
    pub fn alloc_vector(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        elements: Vec<PodValue>,
    ) -> PodValue {
        match self.config.vector_backend {
            VectorBackend::Carray => self.alloc_vector_carray(interner, type_id, elements),
            VectorBackend::Hamt => {
                let vector = HamtVector::from_slice(&elements);
                self.alloc_vector_hamt(interner, type_id, vector)
            }
        }
    }

    pub fn alloc_vector_carray(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        elements: Vec<PodValue>,
    ) -> PodValue {
        self.retain_all(interner, &elements, Self::vector_element(interner, type_id));
        let id = self
            .heap
            .alloc(type_id, HeapPayload::VectorCarray(elements));
        PodValue::from_object(id)
    }

    pub fn alloc_vector_hamt(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        vector: HamtVector,
    ) -> PodValue {
        let elements = vector.to_vec();
        self.retain_all(interner, &elements, Self::vector_element(interner, type_id));
        let id = self.heap.alloc(type_id, HeapPayload::VectorHamt(vector));
        PodValue::from_object(id)
    }

    /// Allocate a dict using the configured backend. Retains every value.
    pub fn alloc_dict(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        entries: Vec<(String, PodValue)>,
    ) -> PodValue {
        let value_type = Self::dict_value(interner, type_id);
        let values: Vec<PodValue> = entries.iter().map(|(_, value)| *value).collect();
        self.retain_all(interner, &values, value_type);
        let payload = match self.config.dict_backend {
            DictBackend::Cppmap => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    if let Some(old) = map.insert(key, value) {
                        // Later duplicate wins; drop the shadowed ref.
                        self.release(interner, old, value_type);
                    }
                }
                HeapPayload::DictCppmap(map)
            }
            DictBackend::Hamt => {
                let mut map = HamtMap::new();
                for (key, value) in entries {
                    if let Some(old) = map.get(&key) {
                        self.release(interner, old, value_type);
                    }
                    map = map.insert(&key, value);
                }
                HeapPayload::DictHamt(map)
            }
        };
        let id = self.heap.alloc(type_id, payload);
        PodValue::from_object(id)
    }

    /// Allocate an empty ordered-map dict.
    pub fn alloc_dict_cppmap(
        &mut self,
        type_id: TypeId,
    ) -> PodValue {
        let id = self
            .heap
            .alloc(type_id, HeapPayload::DictCppmap(BTreeMap::new()));
        PodValue::from_object(id)
    }

    /// Allocate an empty HAMT dict.
    pub fn alloc_dict_hamt(
        &mut self,
        type_id: TypeId,
    ) -> PodValue {
        let id = self.heap.alloc(type_id, HeapPayload::DictHamt(HamtMap::new()));
        PodValue::from_object(id)
    }

    /// Allocate a struct from its field words, retaining RC fields.
    pub fn alloc_struct(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        fields: Vec<PodValue>,
    ) -> PodValue {
        let field_info: Vec<(TypeId, bool)> = self
            .struct_layout(interner, type_id)
            .fields
            .iter()
            .map(|field| (field.type_id, field.rc))
            .collect();
        debug_assert_eq!(fields.len(), field_info.len());
        for (value, (field_type, rc)) in fields.iter().zip(&field_info) {
            if *rc {
                self.retain(interner, *value, *field_type);
            }
        }
        let id = self.heap.alloc(type_id, HeapPayload::Struct(fields));
        PodValue::from_object(id)
    }

    pub fn alloc_json(
        &mut self,
        tree: serde_json::Value,
    ) -> PodValue {
        let id = self.heap.alloc(TypeId::JSON, HeapPayload::Json(tree));
        PodValue::from_object(id)
    }

    //////////////////////////////////////// reference counting

    /// Bump the RC iff the type owns a heap allocation. The only retain
    /// entry point for typed slots.
    pub fn retain(
        &mut self,
        interner: &TypeInterner,
        value: PodValue,
        type_id: TypeId,
    ) {
        if interner.is_rc(type_id) {
            self.retain_obj(value);
        }
    }

    /// Retain a word already known to reference an object. Ignores the
    /// unwritten sentinel.
    pub fn retain_obj(
        &mut self,
        value: PodValue,
    ) {
        if !value.is_unwritten() {
            self.heap.rc_inc(value.as_object());
        }
    }

    /// Drop one reference; on zero, dispose the object and recursively
    /// release its children. The only release entry point for typed slots.
    pub fn release(
        &mut self,
        interner: &TypeInterner,
        value: PodValue,
        type_id: TypeId,
    ) {
        if interner.is_rc(type_id) {
            self.release_obj(interner, value);
        }
    }

    /// Release a word already known to reference an object. Disposal uses
    /// the exact content type recorded in the header, so no declared type
    /// is needed. Ignores the unwritten sentinel.
    pub fn release_obj(
        &mut self,
        interner: &TypeInterner,
        value: PodValue,
    ) {
        if value.is_unwritten() {
            return;
        }
        let object_id = value.as_object();
        if self.heap.rc_dec(object_id) > 0 {
            return;
        }
        let object = self.heap.free(object_id);
        match object.payload {
            HeapPayload::String(_) | HeapPayload::Json(_) => {}
            HeapPayload::VectorCarray(elements) => {
                self.release_elements(interner, elements, Self::vector_element(interner, object.type_id));
            }
            HeapPayload::VectorHamt(vector) => {
                self.release_elements(interner, vector.to_vec(), Self::vector_element(interner, object.type_id));
            }
            HeapPayload::DictCppmap(map) => {
                let values: Vec<PodValue> = map.into_values().collect();
                self.release_elements(interner, values, Self::dict_value(interner, object.type_id));
            }
            HeapPayload::DictHamt(map) => {
                let mut values = Vec::with_capacity(map.len());
                map.for_each(|_, value| values.push(value));
                self.release_elements(interner, values, Self::dict_value(interner, object.type_id));
            }
            HeapPayload::Struct(fields) => {
                let field_info: Vec<(TypeId, bool)> = self
                    .struct_layout(interner, object.type_id)
                    .fields
                    .iter()
                    .map(|field| (field.type_id, field.rc))
                    .collect();
                for (field_value, (field_type, rc)) in fields.into_iter().zip(field_info) {
                    if rc {
                        self.release(interner, field_value, field_type);
                    }
                }
            }
        }
    }

    fn retain_all(
        &mut self,
        interner: &TypeInterner,
        values: &[PodValue],
        element_type: TypeId,
    ) {
        if interner.is_rc(element_type) {
            for value in values {
                self.retain(interner, *value, element_type);
            }
        }
    }

    fn release_elements(
        &mut self,
        interner: &TypeInterner,
        values: Vec<PodValue>,
        element_type: TypeId,
    ) {
        if interner.is_rc(element_type) {
            for value in values {
                self.release(interner, value, element_type);
            }
        }
    }

    //////////////////////////////////////// accessors

    pub fn string_bytes(
        &self,
        value: PodValue,
    ) -> &[u8] {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::String(bytes) => bytes,
            other => panic!("expected string payload, got {}", other.shape_name()),
        }
    }

    /// Elements of either vector backend, in order.
    pub fn vector_elements(
        &self,
        value: PodValue,
    ) -> Vec<PodValue> {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::VectorCarray(elements) => elements.clone(),
            HeapPayload::VectorHamt(vector) => vector.to_vec(),
            other => panic!("expected vector payload, got {}", other.shape_name()),
        }
    }

    pub fn vector_len(
        &self,
        value: PodValue,
    ) -> usize {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::VectorCarray(elements) => elements.len(),
            HeapPayload::VectorHamt(vector) => vector.len(),
            other => panic!("expected vector payload, got {}", other.shape_name()),
        }
    }

    /// Entries of either dict backend, sorted by key.
    pub fn dict_entries_sorted(
        &self,
        value: PodValue,
    ) -> Vec<(String, PodValue)> {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::DictCppmap(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), *value))
                .collect(),
            HeapPayload::DictHamt(map) => map.to_sorted_vec(),
            other => panic!("expected dict payload, got {}", other.shape_name()),
        }
    }

    pub fn dict_len(
        &self,
        value: PodValue,
    ) -> usize {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::DictCppmap(map) => map.len(),
            HeapPayload::DictHamt(map) => map.len(),
            other => panic!("expected dict payload, got {}", other.shape_name()),
        }
    }

    pub fn struct_fields(
        &self,
        value: PodValue,
    ) -> &[PodValue] {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::Struct(fields) => fields,
            other => panic!("expected struct payload, got {}", other.shape_name()),
        }
    }

    pub fn json_tree(
        &self,
        value: PodValue,
    ) -> &serde_json::Value {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::Json(tree) => tree,
            other => panic!("expected json payload, got {}", other.shape_name()),
        }
    }

    //////////////////////////////////////// strings

    pub fn concat_strings(
        &mut self,
        lhs: PodValue,
        rhs: PodValue,
    ) -> PodValue {
        let mut bytes = self.string_bytes(lhs).to_vec();
        bytes.extend_from_slice(self.string_bytes(rhs));
        self.alloc_string(bytes)
    }

    pub fn push_back_string(
        &mut self,
        value: PodValue,
        byte: i64,
    ) -> PodValue {
        let mut bytes = self.string_bytes(value).to_vec();
        bytes.push(byte as u8);
        self.alloc_string(bytes)
    }

    pub fn lookup_string(
        &mut self,
        value: PodValue,
        index: i64,
    ) -> RuntimeResult<PodValue> {
        let bytes = self.string_bytes(value);
        if index < 0 || index as usize >= bytes.len() {
            return Err(RuntimeError::IndexOutOfRange(
                "String lookup out of bounds.".to_string(),
            ));
        }
        let byte = bytes[index as usize];
        Ok(self.alloc_string(vec![byte]))
    }

    pub fn update_string(
        &mut self,
        value: PodValue,
        index: i64,
        replacement: PodValue,
    ) -> RuntimeResult<PodValue> {
        let replacement_bytes = self.string_bytes(replacement);
        if replacement_bytes.len() != 1 {
            return Err(RuntimeError::Message(
                "Update element must be a 1-character string.".to_string(),
            ));
        }
        let byte = replacement_bytes[0];
        let bytes = self.string_bytes(value);
        if index < 0 || index as usize >= bytes.len() {
            return Err(RuntimeError::IndexOutOfRange(
                "String lookup out of bounds.".to_string(),
            ));
        }
        let mut next = bytes.to_vec();
        next[index as usize] = byte;
        Ok(self.alloc_string(next))
    }

    pub fn subset_string(
        &mut self,
        value: PodValue,
        start: i64,
        end: i64,
    ) -> RuntimeResult<PodValue> {
        let bytes = self.string_bytes(value);
        let (start, end) = clamp_range(start, end, bytes.len())?;
        let slice = bytes[start..end].to_vec();
        Ok(self.alloc_string(slice))
    }

    pub fn replace_string(
        &mut self,
        value: PodValue,
        start: i64,
        end: i64,
        replacement: PodValue,
    ) -> RuntimeResult<PodValue> {
        let replacement_bytes = self.string_bytes(replacement).to_vec();
        let bytes = self.string_bytes(value);
        let (start, end) = clamp_range(start, end, bytes.len())?;
        let mut next = Vec::with_capacity(bytes.len() - (end - start) + replacement_bytes.len());
        next.extend_from_slice(&bytes[..start]);
        next.extend_from_slice(&replacement_bytes);
        next.extend_from_slice(&bytes[end..]);
        Ok(self.alloc_string(next))
    }

    pub fn find_string(
        &self,
        value: PodValue,
        needle: PodValue,
    ) -> i64 {
        let haystack = self.string_bytes(value);
        let needle = self.string_bytes(needle);
        if needle.is_empty() {
            return 0;
        }
        if needle.len() > haystack.len() {
            return -1;
        }
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
            .map(|position| position as i64)
            .unwrap_or(-1)
    }

    //////////////////////////////////////// vectors

    pub fn concat_vectors(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        lhs: PodValue,
        rhs: PodValue,
    ) -> PodValue {
        match &self.heap.get(lhs.as_object()).payload {
            HeapPayload::VectorHamt(vector) => {
                let mut combined = vector.clone();
                for element in self.vector_elements(rhs) {
                    combined = combined.push(element);
                }
                self.alloc_vector_hamt(interner, type_id, combined)
            }
            _ => {
                let mut elements = self.vector_elements(lhs);
                elements.extend(self.vector_elements(rhs));
                self.alloc_vector_carray(interner, type_id, elements)
            }
        }
    }

    pub fn push_back_vector(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        element: PodValue,
    ) -> PodValue {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::VectorHamt(vector) => {
                let next = vector.push(element);
                self.alloc_vector_hamt(interner, type_id, next)
            }
            HeapPayload::VectorCarray(elements) => {
                let mut next = elements.clone();
                next.push(element);
                self.alloc_vector_carray(interner, type_id, next)
            }
            other => panic!("expected vector payload, got {}", other.shape_name()),
        }
    }

    pub fn lookup_vector(
        &self,
        value: PodValue,
        index: i64,
    ) -> RuntimeResult<PodValue> {
        let out_of_range = || {
            RuntimeError::IndexOutOfRange("Vector lookup out of bounds.".to_string())
        };
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::VectorCarray(elements) => {
                if index < 0 || index as usize >= elements.len() {
                    return Err(out_of_range());
                }
                Ok(elements[index as usize])
            }
            HeapPayload::VectorHamt(vector) => {
                if index < 0 || index as usize >= vector.len() {
                    return Err(out_of_range());
                }
                Ok(vector.get(index as usize))
            }
            other => panic!("expected vector payload, got {}", other.shape_name()),
        }
    }

    pub fn update_vector(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        index: i64,
        element: PodValue,
    ) -> RuntimeResult<PodValue> {
        let out_of_range = || {
            RuntimeError::IndexOutOfRange("Vector lookup out of bounds.".to_string())
        };
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::VectorHamt(vector) => {
                if index < 0 || index as usize >= vector.len() {
                    return Err(out_of_range());
                }
                let next = vector.update(index as usize, element);
                Ok(self.alloc_vector_hamt(interner, type_id, next))
            }
            HeapPayload::VectorCarray(elements) => {
                if index < 0 || index as usize >= elements.len() {
                    return Err(out_of_range());
                }
                let mut next = elements.clone();
                next[index as usize] = element;
                Ok(self.alloc_vector_carray(interner, type_id, next))
            }
            other => panic!("expected vector payload, got {}", other.shape_name()),
        }
    }

    pub fn subset_vector(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        start: i64,
        end: i64,
    ) -> RuntimeResult<PodValue> {
        let elements = self.vector_elements(value);
        let (start, end) = clamp_range(start, end, elements.len())?;
        let slice = elements[start..end].to_vec();
        Ok(match self.config.vector_backend {
            VectorBackend::Carray => self.alloc_vector_carray(interner, type_id, slice),
            VectorBackend::Hamt => {
                let vector = HamtVector::from_slice(&slice);
                self.alloc_vector_hamt(interner, type_id, vector)
            }
        })
    }

    pub fn replace_vector(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        start: i64,
        end: i64,
        replacement: PodValue,
    ) -> RuntimeResult<PodValue> {
        let elements = self.vector_elements(value);
        let replacement_elements = self.vector_elements(replacement);
        let (start, end) = clamp_range(start, end, elements.len())?;
        let mut next =
            Vec::with_capacity(elements.len() - (end - start) + replacement_elements.len());
        next.extend_from_slice(&elements[..start]);
        next.extend_from_slice(&replacement_elements);
        next.extend_from_slice(&elements[end..]);
        Ok(self.alloc_vector(interner, type_id, next))
    }

    //////////////////////////////////////// dicts

    pub fn lookup_dict(
        &self,
        value: PodValue,
        key: &str,
    ) -> RuntimeResult<PodValue> {
        let found = match &self.heap.get(value.as_object()).payload {
            HeapPayload::DictCppmap(map) => map.get(key).copied(),
            HeapPayload::DictHamt(map) => map.get(key),
            other => panic!("expected dict payload, got {}", other.shape_name()),
        };
        found.ok_or_else(|| {
            RuntimeError::KeyNotFound(format!("Lookup key not found in dict: '{}'.", key))
        })
    }

    pub fn exists_dict(
        &self,
        value: PodValue,
        key: &str,
    ) -> bool {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::DictCppmap(map) => map.contains_key(key),
            HeapPayload::DictHamt(map) => map.contains(key),
            other => panic!("expected dict payload, got {}", other.shape_name()),
        }
    }

    pub fn update_dict(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        key: &str,
        element: PodValue,
    ) -> PodValue {
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::DictHamt(map) => {
                let next = map.insert(key, element);
                self.alloc_dict_payload(interner, type_id, HeapPayload::DictHamt(next))
            }
            HeapPayload::DictCppmap(map) => {
                let mut next = map.clone();
                next.insert(key.to_string(), element);
                self.alloc_dict_payload(interner, type_id, HeapPayload::DictCppmap(next))
            }
            other => panic!("expected dict payload, got {}", other.shape_name()),
        }
    }

    pub fn erase_dict(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        key: &str,
    ) -> RuntimeResult<PodValue> {
        let missing =
            || RuntimeError::KeyNotFound(format!("erase() unknown key '{}'.", key));
        match &self.heap.get(value.as_object()).payload {
            HeapPayload::DictHamt(map) => {
                let next = map.remove(key).ok_or_else(missing)?;
                Ok(self.alloc_dict_payload(interner, type_id, HeapPayload::DictHamt(next)))
            }
            HeapPayload::DictCppmap(map) => {
                let mut next = map.clone();
                if next.remove(key).is_none() {
                    return Err(missing());
                }
                Ok(self.alloc_dict_payload(interner, type_id, HeapPayload::DictCppmap(next)))
            }
            other => panic!("expected dict payload, got {}", other.shape_name()),
        }
    }

    /// Allocate `[string]` holding all keys of a dict, sorted.
    pub fn get_keys_dict(
        &mut self,
        interner: &TypeInterner,
        result_type: TypeId,
        value: PodValue,
    ) -> PodValue {
        let keys: Vec<String> = self
            .dict_entries_sorted(value)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        let key_values: Vec<PodValue> = keys
            .into_iter()
            .map(|key| self.alloc_string(key.into_bytes()))
            .collect();
        let result = self.alloc_vector(interner, result_type, key_values.clone());
        // The vector retained each key; drop the allocation references.
        for key_value in key_values {
            self.release(interner, key_value, TypeId::STRING);
        }
        result
    }

    /// Allocate a dict from a payload whose element references are not yet
    /// counted; retains every value.
    fn alloc_dict_payload(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        payload: HeapPayload,
    ) -> PodValue {
        let value_type = Self::dict_value(interner, type_id);
        let values: Vec<PodValue> = match &payload {
            HeapPayload::DictCppmap(map) => map.values().copied().collect(),
            HeapPayload::DictHamt(map) => {
                let mut values = Vec::with_capacity(map.len());
                map.for_each(|_, value| values.push(value));
                values
            }
            other => panic!("expected dict payload, got {}", other.shape_name()),
        };
        self.retain_all(interner, &values, value_type);
        let id = self.heap.alloc(type_id, payload);
        PodValue::from_object(id)
    }

    //////////////////////////////////////// structs

    pub fn get_struct_member(
        &self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        member_index: usize,
    ) -> PodValue {
        let layout = self.struct_layout(interner, type_id);
        let slot = layout.fields[member_index].offset / 8;
        self.struct_fields(value)[slot]
    }

    pub fn update_struct(
        &mut self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
        member: &str,
        element: PodValue,
    ) -> RuntimeResult<PodValue> {
        let fields = match interner.get_variant(interner.peek(type_id)) {
            TypeVariant::Struct { fields } => fields,
            other => panic!("expected struct type, got {:?}", other),
        };
        let member_index = fields
            .iter()
            .position(|(name, _)| name == member)
            .ok_or_else(|| {
                RuntimeError::KeyNotFound(format!("Unknown struct member '{}'.", member))
            })?;
        let mut next = self.struct_fields(value).to_vec();
        next[member_index] = element;
        Ok(self.alloc_struct(interner, type_id, next))
    }

    //////////////////////////////////////// size

    /// `size()` over every sized shape. JSON dispatches on the node kind.
    pub fn size_of(
        &self,
        interner: &TypeInterner,
        type_id: TypeId,
        value: PodValue,
    ) -> RuntimeResult<i64> {
        match interner.get_variant(interner.peek(type_id)) {
            TypeVariant::String => Ok(self.string_bytes(value).len() as i64),
            TypeVariant::Vector { .. } => Ok(self.vector_len(value) as i64),
            TypeVariant::Dict { .. } => Ok(self.dict_len(value) as i64),
            TypeVariant::Json => match self.json_tree(value) {
                serde_json::Value::Object(members) => Ok(members.len() as i64),
                serde_json::Value::Array(elements) => Ok(elements.len() as i64),
                serde_json::Value::String(text) => Ok(text.len() as i64),
                _ => Err(RuntimeError::Message(
                    "size() requires a json object, array or string.".to_string(),
                )),
            },
            other => panic!("size() on unsized type {:?}", other),
        }
    }

    //////////////////////////////////////// tracing

    /// Log the live-allocation table at debug level.
    pub fn trace_heap(&self) {
        for row in self.heap.trace_rows() {
            debug!(
                alloc_id = row.alloc_id,
                rc = row.rc,
                object = %row.object_id,
                summary = %row.summary,
                "live allocation"
            );
        }
    }

    /// Shallow trace rows, for tests and debugging tools.
    pub fn trace_rows(&self) -> Vec<TraceRow> {
        self.heap.trace_rows()
    }
}

/// Clamp `subset`/`replace` indices: negative fails, overlong clamps.
fn clamp_range(
    start: i64,
    end: i64,
    len: usize,
) -> RuntimeResult<(usize, usize)> {
    if start < 0 || end < 0 {
        return Err(RuntimeError::IndexOutOfRange(
            "Negative indexes not allowed.".to_string(),
        ));
    }
    let start = (start as usize).min(len);
    let end = (end as usize).min(len).max(start);
    Ok((start, end))
}
