//! Runtime value subsystem
//!
//! The value backend (heap, collection primitives, reference counting),
//! the tagged pod word, the persistent collections, deep compare, and the
//! host-level value type.

pub mod backend;
pub mod compare;
pub mod hamt;
pub mod heap;
pub mod pod;
pub mod value;

pub use backend::{Config, DictBackend, ValueBackend, VectorBackend};
pub use compare::CompareOp;
pub use heap::ObjectId;
pub use pod::PodValue;
pub use value::{TypedValue, Value};
