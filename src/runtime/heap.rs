//! Heap storage for runtime objects
//!
//! All values too big for the tagged word live here. Every object carries a
//! common header (magic, reference count, monotonic alloc-id, exact content
//! type) in front of one of the payload shapes. The heap hands out slab
//! indices ([`ObjectId`]) and reuses freed slots through a free list.
//!
//! The heap itself only counts references; recursive disposal of children
//! needs type information and is driven by the value backend.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

use super::hamt::{HamtMap, HamtVector};
use super::pod::PodValue;
use crate::types::TypeId;

/// Header magic; a mismatch means the slab entry was corrupted or an
/// [`ObjectId`] outlived its allocation.
pub const OBJECT_MAGIC: u64 = 0xf10d_0b1e_c7a1_10c8;

/// First alloc-id handed out, so 0 never identifies an allocation.
const ALLOC_START_ID: u64 = 1000;

/// Slab index of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Reserved id for the unwritten-RC slot sentinel; never allocated.
    pub const UNWRITTEN: ObjectId = ObjectId(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        ObjectId(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "obj@{}", self.0)
    }
}

/// The payload shapes a heap object can take.
///
/// Vectors and dicts come in two backends each; the active backend is a
/// per-program [`Config`](super::backend::Config) decision, not a per-type
/// one.
#[derive(Debug, Clone)]
pub enum HeapPayload {
    /// Byte array; used for strings. Immutable, modification allocates.
    String(Vec<u8>),
    /// Contiguous buffer vector, copy-on-write at the value level.
    VectorCarray(Vec<PodValue>),
    /// Persistent vector with node-level structural sharing.
    VectorHamt(HamtVector),
    /// Ordered map, copy-on-write at the value level.
    DictCppmap(BTreeMap<String, PodValue>),
    /// Persistent map with node-level structural sharing.
    DictHamt(HamtMap),
    /// Word-packed struct fields; offsets come from the layout table.
    Struct(Vec<PodValue>),
    /// Owned JSON tree. Always an allocated tree; JSON null is
    /// `serde_json::Value::Null`, never an absent payload.
    Json(serde_json::Value),
}

impl HeapPayload {
    /// Short tag for tracing.
    pub fn shape_name(&self) -> &'static str {
        match self {
            HeapPayload::String(_) => "string",
            HeapPayload::VectorCarray(_) => "veccarray",
            HeapPayload::VectorHamt(_) => "vechamt",
            HeapPayload::DictCppmap(_) => "dictcppmap",
            HeapPayload::DictHamt(_) => "dicthamt",
            HeapPayload::Struct(_) => "struct",
            HeapPayload::Json(_) => "json",
        }
    }
}

/// A heap object: common header plus payload.
#[derive(Debug)]
pub struct HeapObject {
    /// Always [`OBJECT_MAGIC`] while the object is live.
    pub magic: u64,
    /// Reference count; >= 1 while reachable.
    pub rc: u32,
    /// Monotonic allocation id, for debugging.
    pub alloc_id: u64,
    /// Exact content type of the payload.
    pub type_id: TypeId,
    pub payload: HeapPayload,
}

/// One row of the allocation-recording side table.
#[derive(Debug, Clone)]
pub struct AllocRecord {
    pub alloc_id: u64,
    pub type_id: TypeId,
    pub shape: &'static str,
}

/// One row of a live-allocation trace.
#[derive(Debug, Clone)]
pub struct TraceRow {
    pub object_id: ObjectId,
    pub alloc_id: u64,
    pub rc: u32,
    pub type_id: TypeId,
    pub summary: String,
}

/// Slab of reference-counted heap objects.
pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free_list: Vec<u32>,
    next_alloc_id: u64,
    record_allocs: bool,
    /// Debug side table; the only lock in the crate. Hot paths never take
    /// it unless recording was switched on at load.
    records: Mutex<Vec<AllocRecord>>,
}

impl fmt::Debug for Heap {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live_count())
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl Heap {
    pub fn new(record_allocs: bool) -> Self {
        Heap {
            slots: Vec::with_capacity(256),
            free_list: Vec::new(),
            next_alloc_id: ALLOC_START_ID,
            record_allocs,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Allocate an object with RC = 1.
    pub fn alloc(
        &mut self,
        type_id: TypeId,
        payload: HeapPayload,
    ) -> ObjectId {
        let alloc_id = self.next_alloc_id;
        self.next_alloc_id += 1;
        if self.record_allocs {
            self.records.lock().push(AllocRecord {
                alloc_id,
                type_id,
                shape: payload.shape_name(),
            });
        }
        let object = HeapObject {
            magic: OBJECT_MAGIC,
            rc: 1,
            alloc_id,
            type_id,
            payload,
        };
        if let Some(index) = self.free_list.pop() {
            debug_assert!(self.slots[index as usize].is_none());
            self.slots[index as usize] = Some(object);
            ObjectId(index)
        } else {
            let index = self.slots.len() as u32;
            assert_ne!(index, ObjectId::UNWRITTEN.raw(), "heap exhausted");
            self.slots.push(Some(object));
            ObjectId(index)
        }
    }

    pub fn get(
        &self,
        id: ObjectId,
    ) -> &HeapObject {
        let object = self.slots[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("dangling {}", id));
        assert_eq!(object.magic, OBJECT_MAGIC, "heap header corrupted at {}", id);
        object
    }

    pub fn get_mut(
        &mut self,
        id: ObjectId,
    ) -> &mut HeapObject {
        let object = self.slots[id.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("dangling {}", id));
        assert_eq!(object.magic, OBJECT_MAGIC, "heap header corrupted at {}", id);
        object
    }

    /// Bump the reference count.
    pub fn rc_inc(
        &mut self,
        id: ObjectId,
    ) {
        let object = self.get_mut(id);
        object.rc += 1;
    }

    /// Drop one reference; returns the new count. The caller disposes the
    /// object (recursively releasing children) when this reaches zero.
    pub fn rc_dec(
        &mut self,
        id: ObjectId,
    ) -> u32 {
        let object = self.get_mut(id);
        debug_assert!(object.rc >= 1, "release of dead object {}", id);
        object.rc -= 1;
        object.rc
    }

    /// Remove an object whose RC reached zero and hand its payload to the
    /// caller for child disposal.
    pub fn free(
        &mut self,
        id: ObjectId,
    ) -> HeapObject {
        let object = self.slots[id.0 as usize]
            .take()
            .unwrap_or_else(|| panic!("double free of {}", id));
        debug_assert_eq!(object.rc, 0);
        self.free_list.push(id.0);
        object
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Shallow table of all live allocations.
    pub fn trace_rows(&self) -> Vec<TraceRow> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|object| TraceRow {
                    object_id: ObjectId(index as u32),
                    alloc_id: object.alloc_id,
                    rc: object.rc,
                    type_id: object.type_id,
                    summary: Self::summarize(&object.payload),
                })
            })
            .collect()
    }

    /// Copy of the allocation-recording side table.
    pub fn alloc_records(&self) -> Vec<AllocRecord> {
        self.records.lock().clone()
    }

    fn summarize(payload: &HeapPayload) -> String {
        match payload {
            HeapPayload::String(bytes) => {
                format!("string len={}", bytes.len())
            }
            HeapPayload::VectorCarray(values) => format!("veccarray len={}", values.len()),
            HeapPayload::VectorHamt(vector) => format!("vechamt len={}", vector.len()),
            HeapPayload::DictCppmap(map) => format!("dictcppmap len={}", map.len()),
            HeapPayload::DictHamt(map) => format!("dicthamt len={}", map.len()),
            HeapPayload::Struct(fields) => format!("struct fields={}", fields.len()),
            HeapPayload::Json(_) => "json".to_string(),
        }
    }
}
