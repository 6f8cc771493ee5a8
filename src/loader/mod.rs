//! Program loader
//!
//! Turns a serialized program image (type table, function table, global
//! frame) into a running [`Interpreter`]. Everything user-supplied is
//! validated here: unknown opcodes, out-of-range registers and branch
//! targets, malformed type tables, and unresolved-symbol type nodes are
//! all [`LoadError`]s, never panics. On success the global instructions
//! have already run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::intrinsics;
use crate::runtime::backend::{Config, ValueBackend};
use crate::runtime::value::Value;
use crate::types::{BaseKind, TypeId, TypeInterner, TypeNode, RESERVED_TYPE_COUNT};
use crate::vm::error::LoadError;
use crate::vm::frame::{FrameDef, FunctionDef, Member, Symbol};
use crate::vm::instruction::{decode_stream, Instruction};
use crate::vm::interpreter::Interpreter;
use crate::vm::opcode::{register_flags, Opcode};

/// One type node of the image, in interning order. Indices are absolute:
/// the fifteen reserved slots come first, image entries follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeImage {
    pub kind: String,
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub children: Vec<usize>,
    #[serde(default)]
    pub field_names: Vec<String>,
    #[serde(default = "default_true")]
    pub pure: bool,
    #[serde(default)]
    pub dyn_return: bool,
    #[serde(default)]
    pub symbol: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One symbol of a frame. Constants are encoded as JSON and decoded with
/// the `from_json` rules; function constants are their link id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolImage {
    pub name: String,
    #[serde(rename = "type")]
    pub type_index: usize,
    #[serde(default)]
    pub init: Option<serde_json::Value>,
}

/// A frame: symbols, argument types (a prefix of the symbols), and the
/// instruction stream as wire bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameImage {
    #[serde(default)]
    pub symbols: Vec<SymbolImage>,
    #[serde(default)]
    pub args: Vec<usize>,
    #[serde(default)]
    pub instructions: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberImage {
    pub name: String,
    #[serde(rename = "type")]
    pub type_index: usize,
}

/// One function-table entry. `host_function_id == 0` means bytecode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionImage {
    pub name: String,
    #[serde(rename = "type")]
    pub type_index: usize,
    #[serde(default)]
    pub args: Vec<MemberImage>,
    #[serde(default)]
    pub host_function_id: i32,
    #[serde(default)]
    pub frame: Option<FrameImage>,
}

/// A complete program image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramImage {
    #[serde(default)]
    pub types: Vec<TypeImage>,
    #[serde(default)]
    pub functions: Vec<FunctionImage>,
    #[serde(default)]
    pub globals: FrameImage,
}

/// Parse and load a JSON program image, then run its global initializer.
pub fn load_program(
    bytes: &[u8],
    config: Config,
) -> Result<Interpreter, LoadError> {
    let image: ProgramImage = serde_json::from_slice(bytes)?;
    load_image(&image, config)
}

/// Load an already-parsed image.
pub fn load_image(
    image: &ProgramImage,
    config: Config,
) -> Result<Interpreter, LoadError> {
    let mut interner = TypeInterner::new();
    build_types(&mut interner, &image.types)?;

    // Intrinsic signatures intern after the program's types so the
    // image's absolute indices stay stable.
    let signatures = intrinsics::signatures(&mut interner);

    let mut backend = ValueBackend::new(config);
    backend.precompute_struct_layouts(&interner);

    let link_count = image.functions.len() + signatures.len();
    let globals_symbol_count = image.globals.symbols.len();

    // Build the link table: image functions first, intrinsics after.
    let mut functions = Vec::with_capacity(link_count);
    for function_image in &image.functions {
        let function_type = checked_type(&interner, function_image.type_index)?;
        let frame = match &function_image.frame {
            Some(frame_image) => Some(Arc::new(build_frame(
                &interner,
                &mut backend,
                frame_image,
                globals_symbol_count,
                link_count,
            )?)),
            None => None,
        };
        if frame.is_none() && function_image.host_function_id == 0 {
            return Err(LoadError::UnknownFunction(function_image.name.clone()));
        }
        let args = function_image
            .args
            .iter()
            .map(|member| {
                Ok(Member {
                    name: member.name.clone(),
                    type_id: checked_type(&interner, member.type_index)?,
                })
            })
            .collect::<Result<Vec<Member>, LoadError>>()?;
        functions.push(FunctionDef {
            name: function_image.name.clone(),
            function_type,
            args,
            frame,
            frame_id: 0,
            host_function_id: function_image.host_function_id,
            dyn_arg_count: FunctionDef::count_dyn_args(&interner, function_type),
            return_is_rc: {
                let ret = return_type_of(&interner, function_type);
                interner.is_rc(ret)
            },
        });
    }
    for signature in &signatures {
        functions.push(FunctionDef {
            name: signature.name.to_string(),
            function_type: signature.function_type,
            args: Vec::new(),
            frame: None,
            frame_id: 0,
            host_function_id: signature.id,
            dyn_arg_count: FunctionDef::count_dyn_args(&interner, signature.function_type),
            return_is_rc: {
                let ret = return_type_of(&interner, signature.function_type);
                interner.is_rc(ret)
            },
        });
    }

    let globals = Arc::new(build_frame(
        &interner,
        &mut backend,
        &image.globals,
        globals_symbol_count,
        link_count,
    )?);

    debug!(
        types = interner.count(),
        functions = functions.len(),
        globals = globals_symbol_count,
        "program image loaded"
    );

    let mut interpreter = Interpreter::new(interner, backend, globals, functions);
    interpreter.run_globals().map_err(LoadError::GlobalInit)?;
    Ok(interpreter)
}

fn return_type_of(
    interner: &TypeInterner,
    function_type: TypeId,
) -> TypeId {
    match interner.get_variant(interner.peek(function_type)) {
        crate::types::TypeVariant::Function { ret, .. } => ret,
        _ => TypeId::UNDEFINED,
    }
}

/// Two-phase type construction: named nodes are declared with a
/// placeholder body first, so recursive types can reference forward.
fn build_types(
    interner: &mut TypeInterner,
    types: &[TypeImage],
) -> Result<(), LoadError> {
    let total = RESERVED_TYPE_COUNT + types.len();
    let mut named_fixups = Vec::new();

    for (position, image) in types.iter().enumerate() {
        let own_index = RESERVED_TYPE_COUNT + position;
        let kind = parse_kind(&image.kind)
            .ok_or_else(|| LoadError::Image(format!("unknown type kind '{}'", image.kind)))?;

        if kind == BaseKind::SymbolRef {
            // Unresolved identifiers must not leak past the code
            // generator.
            return Err(LoadError::UnresolvedSymbolType(
                image.symbol.clone().unwrap_or_default(),
            ));
        }

        for child in &image.children {
            if *child >= total {
                return Err(LoadError::TypeIndexOutOfRange(*child));
            }
            if kind != BaseKind::Named && *child >= own_index {
                return Err(LoadError::ChildAfterParent(own_index));
            }
        }

        if kind == BaseKind::Named {
            if image.name.is_empty() {
                return Err(LoadError::Image("named type without a name".to_string()));
            }
            if interner.try_lookup_by_name(&image.name).is_some() {
                return Err(LoadError::DuplicateNamedType(image.name.join(".")));
            }
            let id = interner.declare_named(image.name.clone(), TypeId::UNDEFINED);
            if id.index() != own_index {
                return Err(LoadError::Image(format!(
                    "type table out of order at {}",
                    own_index
                )));
            }
            if let Some(body) = image.children.first() {
                named_fixups.push((id, *body));
            }
            continue;
        }

        let children: SmallVec<[TypeId; 4]> = image
            .children
            .iter()
            .map(|child| interner.type_at_index(*child))
            .collect();
        let needs_children = match kind {
            BaseKind::Vector | BaseKind::Dict => 1,
            BaseKind::Function => 1,
            _ => 0,
        };
        if children.len() < needs_children {
            return Err(LoadError::Image(format!(
                "type node {} is missing children",
                own_index
            )));
        }
        let node = match kind {
            BaseKind::Vector => TypeNode::vector(children[0]),
            BaseKind::Dict => TypeNode::dict(children[0]),
            BaseKind::Function => {
                TypeNode::function(children[0], &children[1..], image.pure, image.dyn_return)
            }
            BaseKind::Struct => {
                if image.field_names.len() != children.len() {
                    return Err(LoadError::Image(format!(
                        "struct node {} has {} field names for {} fields",
                        own_index,
                        image.field_names.len(),
                        children.len()
                    )));
                }
                TypeNode::struct_type(image.field_names.clone(), &children)
            }
            _ => TypeNode::atom(kind),
        };
        let id = interner.intern_anonymous(node);
        if id.index() != own_index {
            return Err(LoadError::Image(format!(
                "duplicate type node at {}",
                own_index
            )));
        }
    }

    for (id, body_index) in named_fixups {
        interner.update_named(id, interner.type_at_index(body_index));
    }
    Ok(())
}

fn parse_kind(kind: &str) -> Option<BaseKind> {
    Some(match kind {
        "undefined" => BaseKind::Undefined,
        "any" => BaseKind::Any,
        "void" => BaseKind::Void,
        "bool" => BaseKind::Bool,
        "int" => BaseKind::Int,
        "double" => BaseKind::Double,
        "string" => BaseKind::String,
        "json" => BaseKind::Json,
        "typeid" => BaseKind::Typeid,
        "struct" => BaseKind::Struct,
        "vector" => BaseKind::Vector,
        "dict" => BaseKind::Dict,
        "function" => BaseKind::Function,
        "symbol-ref" => BaseKind::SymbolRef,
        "named" => BaseKind::Named,
        _ => return None,
    })
}

fn checked_type(
    interner: &TypeInterner,
    index: usize,
) -> Result<TypeId, LoadError> {
    if index >= interner.count() {
        return Err(LoadError::TypeIndexOutOfRange(index));
    }
    Ok(interner.type_at_index(index))
}

/// Decode one frame: symbols with constants, then the instruction stream,
/// then operand validation.
fn build_frame(
    interner: &TypeInterner,
    backend: &mut ValueBackend,
    image: &FrameImage,
    globals_symbol_count: usize,
    link_count: usize,
) -> Result<FrameDef, LoadError> {
    if image.args.len() > image.symbols.len() {
        return Err(LoadError::Image(
            "frame has more arguments than symbols".to_string(),
        ));
    }
    let mut symbols = Vec::with_capacity(image.symbols.len());
    for symbol_image in &image.symbols {
        let type_id = checked_type(interner, symbol_image.type_index)?;
        let init = match &symbol_image.init {
            Some(tree) => Some(decode_constant(interner, type_id, tree, link_count)?),
            None => None,
        };
        symbols.push(Symbol {
            name: symbol_image.name.clone(),
            type_id,
            init,
        });
    }
    let args: SmallVec<[TypeId; 8]> = image
        .args
        .iter()
        .map(|index| checked_type(interner, *index))
        .collect::<Result<SmallVec<[TypeId; 8]>, LoadError>>()?;

    let instructions = decode_stream(&image.instructions)?;
    validate_instructions(
        interner,
        &instructions,
        symbols.len(),
        globals_symbol_count,
    )?;

    Ok(FrameDef::build(
        interner,
        backend,
        instructions,
        symbols,
        args,
    ))
}

/// Decode a symbol constant. Function constants are their link id; all
/// other types follow the schema-directed JSON decoding.
fn decode_constant(
    interner: &TypeInterner,
    type_id: TypeId,
    tree: &serde_json::Value,
    link_count: usize,
) -> Result<Value, LoadError> {
    match interner.get_variant(interner.peek(type_id)) {
        crate::types::TypeVariant::Function { .. } => {
            let link_id = tree.as_u64().ok_or_else(|| {
                LoadError::Image("function constant must be a link id".to_string())
            })? as usize;
            if link_id >= link_count {
                return Err(LoadError::UnknownFunction(format!("link #{}", link_id)));
            }
            Ok(Value::Function { type_id, link_id })
        }
        crate::types::TypeVariant::Typeid => {
            let index = tree.as_u64().ok_or_else(|| {
                LoadError::Image("typeid constant must be a type index".to_string())
            })? as usize;
            Ok(Value::Typeid(checked_type(interner, index)?))
        }
        _ => crate::intrinsics::json::json_to_value(interner, type_id, tree)
            .map_err(|error| LoadError::Image(format!("bad constant: {}", error))),
    }
}

/// Operand validation: registers against the symbol count, global indices
/// against the global frame, branch targets against the stream, type
/// immediates against the interner.
fn validate_instructions(
    interner: &TypeInterner,
    instructions: &[Instruction],
    symbol_count: usize,
    globals_symbol_count: usize,
) -> Result<(), LoadError> {
    let len = instructions.len() as isize;
    for (pc, instruction) in instructions.iter().enumerate() {
        let info = instruction.opcode.info();
        let (a_is_reg, b_is_reg, c_is_reg) = register_flags(info.encoding);
        let operands = [
            (instruction.a, a_is_reg),
            (instruction.b, b_is_reg),
            (instruction.c, c_is_reg),
        ];
        for (value, is_reg) in operands {
            if is_reg && (value < 0 || value as usize >= symbol_count) {
                return Err(LoadError::RegisterOutOfRange {
                    register: value,
                    pc,
                });
            }
        }
        match instruction.opcode {
            Opcode::LoadGlobalObj | Opcode::LoadGlobalIntern => {
                if instruction.b < 0 || instruction.b as usize >= globals_symbol_count {
                    return Err(LoadError::RegisterOutOfRange {
                        register: instruction.b,
                        pc,
                    });
                }
            }
            Opcode::StoreGlobalObj | Opcode::StoreGlobalIntern => {
                if instruction.a < 0 || instruction.a as usize >= globals_symbol_count {
                    return Err(LoadError::RegisterOutOfRange {
                        register: instruction.a,
                        pc,
                    });
                }
            }
            Opcode::New1 => {
                checked_type(interner, instruction.b as usize)?;
                checked_type(interner, instruction.c as usize)?;
            }
            Opcode::NewVector | Opcode::NewDict | Opcode::NewStruct => {
                checked_type(interner, instruction.b as usize)?;
                if instruction.c < 0 {
                    return Err(LoadError::Image(format!(
                        "negative constructor arity at instruction {}",
                        pc
                    )));
                }
            }
            Opcode::Popn => {
                if instruction.a < 0 || instruction.a > 32 {
                    return Err(LoadError::Image(format!(
                        "popn count out of range at instruction {}",
                        pc
                    )));
                }
            }
            Opcode::BrFalseBool
            | Opcode::BrTrueBool
            | Opcode::BrZeroInt
            | Opcode::BrNonzeroInt
            | Opcode::BrAlways => {
                let target = pc as isize + 1 + instruction.b as isize;
                if target < 0 || target > len {
                    return Err(LoadError::BranchOutOfRange { pc });
                }
            }
            Opcode::BrLInt | Opcode::BrLEInt => {
                let target = pc as isize + 1 + instruction.c as isize;
                if target < 0 || target > len {
                    return Err(LoadError::BranchOutOfRange { pc });
                }
            }
            _ => {}
        }
    }
    Ok(())
}
