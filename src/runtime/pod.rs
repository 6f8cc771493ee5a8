//! The runtime tagged word
//!
//! Every stack slot, register, and collection slot is one [`PodValue`]: a
//! 64-bit word reinterpreted as bool, int, double, heap object id, or
//! function link-id. The word is not self-describing; the surrounding
//! context (a symbol's declared type, or an adjacent type-id word for
//! dynamic arguments) supplies the type.

use std::fmt;

use super::heap::ObjectId;

/// A 64-bit untyped runtime word.
///
/// `PartialEq`/`Hash` act on the raw bits and exist for container use only;
/// value equality goes through the deep compare in
/// [`compare`](crate::runtime::compare).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PodValue(u64);

/// Object-id bits marking an RC-typed local that has not been written yet.
/// Retain and release ignore slots carrying this word.
const UNWRITTEN_BITS: u64 = ObjectId::UNWRITTEN.raw() as u64;

impl PodValue {
    /// The all-zero word, used for uninitialized inline slots.
    pub const ZERO: PodValue = PodValue(0);

    /// Sentinel for RC-typed slots with no value yet.
    pub const UNWRITTEN: PodValue = PodValue(UNWRITTEN_BITS);

    pub fn from_bool(value: bool) -> Self {
        PodValue(value as u64)
    }

    pub fn from_int(value: i64) -> Self {
        PodValue(value as u64)
    }

    pub fn from_double(value: f64) -> Self {
        PodValue(value.to_bits())
    }

    pub fn from_object(id: ObjectId) -> Self {
        PodValue(id.raw() as u64)
    }

    /// A function value: an index into the function link table.
    pub fn from_function(link_id: usize) -> Self {
        PodValue(link_id as u64)
    }

    /// A typeid value: the packed 32-bit type id.
    pub fn from_type(raw_type: u32) -> Self {
        PodValue(raw_type as u64)
    }

    pub fn as_bool(&self) -> bool {
        self.0 != 0
    }

    pub fn as_int(&self) -> i64 {
        self.0 as i64
    }

    pub fn as_double(&self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn as_object(&self) -> ObjectId {
        ObjectId::new(self.0 as u32)
    }

    pub fn as_function(&self) -> usize {
        self.0 as usize
    }

    pub fn as_type_raw(&self) -> u32 {
        self.0 as u32
    }

    /// Raw bits, for tracing.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Is this the unwritten-RC sentinel?
    pub fn is_unwritten(&self) -> bool {
        self.0 == UNWRITTEN_BITS
    }
}

impl Default for PodValue {
    fn default() -> Self {
        PodValue::ZERO
    }
}

impl fmt::Debug for PodValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "pod({:#x})", self.0)
    }
}
