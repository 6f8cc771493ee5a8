//! Static frame descriptors and function definitions
//!
//! A [`FrameDef`] is the immutable shape of one activation: symbol table,
//! RC flags, locals template, and instructions. A [`FunctionDef`] binds a
//! frame (or a host function id) to a function type in the link table.

use std::sync::Arc;

use smallvec::SmallVec;

use super::instruction::Instruction;
use crate::runtime::backend::ValueBackend;
use crate::runtime::pod::PodValue;
use crate::runtime::value::{value_to_pod, Value};
use crate::types::{TypeId, TypeInterner, TypeVariant};

/// One symbol of a frame: name, declared type, optional const initializer.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub type_id: TypeId,
    pub init: Option<Value>,
}

impl Symbol {
    pub fn new(
        name: impl Into<String>,
        type_id: TypeId,
    ) -> Self {
        Symbol {
            name: name.into(),
            type_id,
            init: None,
        }
    }

    pub fn with_init(
        name: impl Into<String>,
        type_id: TypeId,
        init: Value,
    ) -> Self {
        Symbol {
            name: name.into(),
            type_id,
            init: Some(init),
        }
    }
}

/// Initial word for one local slot, pushed when the frame opens.
///
/// The template owns one reference to any RC constant it carries; opening
/// a frame retains on top of that.
#[derive(Debug, Clone, Copy)]
pub struct LocalTemplate {
    pub value: PodValue,
    pub rc: bool,
}

/// Static descriptor of one frame.
#[derive(Debug)]
pub struct FrameDef {
    pub instructions: Vec<Instruction>,
    pub symbols: Vec<Symbol>,
    /// Argument types; arguments occupy the first symbols.
    pub args: SmallVec<[TypeId; 8]>,
    /// Per-symbol: does the slot hold an RC object?
    pub exts: Vec<bool>,
    /// Same flags, covering only the non-argument locals.
    pub locals_exts: Vec<bool>,
    /// Initial words for the non-argument locals.
    pub locals: Vec<LocalTemplate>,
}

impl FrameDef {
    /// Build a frame descriptor, encoding const initializers into the
    /// backend's heap. Constants without an initializer get a zero word,
    /// or the unwritten sentinel for RC slots.
    pub fn build(
        interner: &TypeInterner,
        backend: &mut ValueBackend,
        instructions: Vec<Instruction>,
        symbols: Vec<Symbol>,
        args: SmallVec<[TypeId; 8]>,
    ) -> Self {
        debug_assert!(args.len() <= symbols.len());
        for (arg_type, symbol) in args.iter().zip(symbols.iter()) {
            debug_assert_eq!(arg_type, &symbol.type_id);
        }
        let exts: Vec<bool> = symbols
            .iter()
            .map(|symbol| interner.is_rc(symbol.type_id))
            .collect();
        let locals_exts: Vec<bool> = exts[args.len()..].to_vec();
        let locals: Vec<LocalTemplate> = symbols[args.len()..]
            .iter()
            .zip(locals_exts.iter())
            .map(|(symbol, rc)| {
                let value = match &symbol.init {
                    Some(init) => value_to_pod(backend, interner, init),
                    None if *rc => PodValue::UNWRITTEN,
                    None => PodValue::ZERO,
                };
                LocalTemplate { value, rc: *rc }
            })
            .collect();
        FrameDef {
            instructions,
            symbols,
            args,
            exts,
            locals_exts,
            locals,
        }
    }

    /// Number of symbols, arguments included.
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Index of a symbol by name.
    pub fn find_symbol(
        &self,
        name: &str,
    ) -> Option<usize> {
        self.symbols.iter().position(|symbol| symbol.name == name)
    }
}

/// One named argument of a function.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub type_id: TypeId,
}

/// One entry of the function link table.
///
/// Exactly one of `frame` (bytecode body) and `host_function_id != 0`
/// (native implementation) is meaningful.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub function_type: TypeId,
    pub args: Vec<Member>,
    pub frame: Option<Arc<FrameDef>>,
    /// Dense id of `frame` in the stack's frame registry; 0 when absent.
    pub frame_id: usize,
    /// Non-zero selects a host implementation.
    pub host_function_id: i32,
    /// Number of `any` parameters; each occupies two stack words.
    pub dyn_arg_count: usize,
    pub return_is_rc: bool,
}

impl FunctionDef {
    /// Return type of the function.
    pub fn return_type(
        &self,
        interner: &TypeInterner,
    ) -> TypeId {
        match interner.get_variant(interner.peek(self.function_type)) {
            TypeVariant::Function { ret, .. } => ret,
            other => panic!("function def with non-function type {:?}", other),
        }
    }

    /// Count the `any` parameters of a function type.
    pub fn count_dyn_args(
        interner: &TypeInterner,
        function_type: TypeId,
    ) -> usize {
        match interner.get_variant(interner.peek(function_type)) {
            TypeVariant::Function { args, .. } => args
                .iter()
                .filter(|arg| interner.peek(**arg) == TypeId::ANY)
                .count(),
            other => panic!("function def with non-function type {:?}", other),
        }
    }
}
