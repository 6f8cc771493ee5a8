//! The bytecode virtual machine
//!
//! Instruction set, static frames, the value stack, the interpreter loop,
//! and the error types the VM surfaces to the host.

pub mod error;
pub mod frame;
pub mod instruction;
pub mod interpreter;
pub mod opcode;
pub mod stack;

pub use error::{LoadError, RuntimeError, RuntimeResult};
pub use frame::{FrameDef, FunctionDef, Member, Symbol};
pub use instruction::{disassemble, Instruction};
pub use interpreter::{HostFn, Interpreter};
pub use opcode::{Encoding, Opcode};
pub use stack::{Stack, FRAME_OVERHEAD};
