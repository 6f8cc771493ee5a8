//! Error types surfaced by the execution core
//!
//! Runtime errors are user-observable failures and flow out of `call`.
//! Load errors come from malformed program images. Type mismatches the
//! compiler should have caught are programmer errors and assert instead.

use thiserror::Error;

/// Result alias for interpreter operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A user-observable runtime failure.
///
/// Every variant carries a short human-readable message; the core neither
/// logs nor localizes them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Division by zero.")]
    DivisionByZero,

    #[error("{0}")]
    IndexOutOfRange(String),

    #[error("{0}")]
    KeyNotFound(String),

    #[error("Assertion failed.")]
    AssertionFailed,

    #[error("{0}")]
    JsonSchemaMismatch(String),

    #[error("map_dag() dependency cycle error.")]
    DependencyCycle,

    #[error("{0}")]
    Message(String),
}

impl RuntimeError {
    /// Short kind tag, stable across message edits.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::DivisionByZero => "division-by-zero",
            RuntimeError::IndexOutOfRange(_) => "index-out-of-range",
            RuntimeError::KeyNotFound(_) => "key-not-found",
            RuntimeError::AssertionFailed => "assert",
            RuntimeError::JsonSchemaMismatch(_) => "json-schema-mismatch",
            RuntimeError::DependencyCycle => "dependency-cycle",
            RuntimeError::Message(_) => "runtime-error",
        }
    }
}

/// A malformed program image, reported by `load_program`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed program image: {0}")]
    Image(String),

    #[error("unknown opcode: {0:#x}")]
    UnknownOpcode(u8),

    #[error("truncated instruction stream: {0} trailing bytes")]
    TruncatedInstructions(usize),

    #[error("branch target out of range at instruction {pc}")]
    BranchOutOfRange { pc: usize },

    #[error("register {register} out of range at instruction {pc}")]
    RegisterOutOfRange { register: i16, pc: usize },

    #[error("type index {0} out of range")]
    TypeIndexOutOfRange(usize),

    #[error("type node {0} references a child interned after it")]
    ChildAfterParent(usize),

    #[error("program contains an unresolved symbol type: {0}")]
    UnresolvedSymbolType(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("duplicate named type: {0}")]
    DuplicateNamedType(String),

    #[error("global initializer failed: {0}")]
    GlobalInit(#[source] RuntimeError),
}

impl From<serde_json::Error> for LoadError {
    fn from(error: serde_json::Error) -> Self {
        LoadError::Image(error.to_string())
    }
}
