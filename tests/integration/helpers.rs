//! Shared builders for program-image tests.

use floyd::types::{TypeId, TypeInterner, RESERVED_TYPE_COUNT};
use floyd::vm::instruction::encode_stream;
use floyd::vm::{Instruction, Opcode};
use floyd::{ProgramImage, SymbolImage, TypeImage};

/// First image-defined type index.
pub const T0: usize = RESERVED_TYPE_COUNT;

pub fn instr(
    opcode: Opcode,
    a: i16,
    b: i16,
    c: i16,
) -> Instruction {
    Instruction::new(opcode, a, b, c)
}

pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    encode_stream(instructions)
}

pub fn sym(
    name: &str,
    type_index: usize,
    init: Option<serde_json::Value>,
) -> SymbolImage {
    SymbolImage {
        name: name.to_string(),
        type_index,
        init,
    }
}

pub fn int_sym(
    name: &str,
    init: i64,
) -> SymbolImage {
    sym(name, TypeId::INT.index(), Some(serde_json::json!(init)))
}

pub fn type_node(
    kind: &str,
    children: Vec<usize>,
) -> TypeImage {
    TypeImage {
        kind: kind.to_string(),
        name: Vec::new(),
        children,
        field_names: Vec::new(),
        pure: true,
        dyn_return: false,
        symbol: None,
    }
}

pub fn struct_node(
    field_names: &[&str],
    children: Vec<usize>,
) -> TypeImage {
    TypeImage {
        kind: "struct".to_string(),
        name: Vec::new(),
        children,
        field_names: field_names.iter().map(|name| name.to_string()).collect(),
        pure: true,
        dyn_return: false,
        symbol: None,
    }
}

/// Link id of an intrinsic in a loaded image: image functions come
/// first, intrinsics follow in signature-table order.
pub fn intrinsic_link(
    image: &ProgramImage,
    name: &str,
) -> usize {
    let mut interner = TypeInterner::new();
    let signatures = floyd::intrinsics::signatures(&mut interner);
    let position = signatures
        .iter()
        .position(|signature| signature.name == name)
        .expect("known intrinsic name");
    image.functions.len() + position
}
