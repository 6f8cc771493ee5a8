//! Bytecode opcodes
//!
//! The instruction set is register-based and type-specialized: arithmetic
//! and comparison carry the operand base type in the opcode itself, so the
//! hot dispatch never inspects values. Each opcode has an encoding class
//! describing how its three operands are read; the classes only matter to
//! the disassembler and the loader's operand validation.

use std::fmt;

use hashbrown::HashMap;
use once_cell::sync::Lazy;

/// Operation codes. The discriminants are the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,

    // Load/store globals. The obj/intern split lets the interpreter skip
    // RC work for inline values.
    LoadGlobalObj = 0x01,
    LoadGlobalIntern = 0x02,
    StoreGlobalObj = 0x03,
    StoreGlobalIntern = 0x04,

    // Register-to-register copy within the current frame.
    StoreLocalObj = 0x05,
    StoreLocalIntern = 0x06,

    /// A <- B.member[C]
    GetStructMember = 0x07,

    // Element lookup per container shape.
    LookupString = 0x08,
    LookupJson = 0x09,
    LookupVector = 0x0a,
    LookupDict = 0x0b,

    /// A = return register, B = callee register, C = argument count.
    Call = 0x0c,

    // Arithmetic, one opcode per base type.
    AddBool = 0x10,
    AddInt = 0x11,
    AddFloat = 0x12,
    AddString = 0x13,
    AddVector = 0x14,
    SubInt = 0x15,
    SubFloat = 0x16,
    MulInt = 0x17,
    MulFloat = 0x18,
    DivInt = 0x19,
    DivFloat = 0x1a,
    RemInt = 0x1b,

    AndBool = 0x1c,
    AndInt = 0x1d,
    AndFloat = 0x1e,
    OrBool = 0x1f,
    OrInt = 0x20,
    OrFloat = 0x21,

    // Comparison: typed-generic deep compare plus int fast paths.
    CmpLE = 0x28,
    CmpLEInt = 0x29,
    CmpL = 0x2a,
    CmpLInt = 0x2b,
    Eq = 0x2c,
    EqInt = 0x2d,
    Neq = 0x2e,
    NeqInt = 0x2f,

    // Constructors; arguments are on the stack.
    New1 = 0x30,
    NewVector = 0x31,
    NewDict = 0x32,
    NewStruct = 0x33,

    /// A = value register.
    Return = 0x38,
    Stop = 0x39,

    // Stack management.
    PushFrame = 0x3a,
    PopFrame = 0x3b,
    PushIntern = 0x3c,
    PushObj = 0x3d,
    /// A = count <= 32, B = RC bitmap, bit 0 = first value popped.
    Popn = 0x3e,

    // Branches; offsets are relative to the next instruction.
    BrFalseBool = 0x40,
    BrTrueBool = 0x41,
    BrZeroInt = 0x42,
    BrNonzeroInt = 0x43,
    BrLInt = 0x44,
    BrLEInt = 0x45,
    BrAlways = 0x46,
}

impl Opcode {
    /// Decode a wire byte.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => LoadGlobalObj,
            0x02 => LoadGlobalIntern,
            0x03 => StoreGlobalObj,
            0x04 => StoreGlobalIntern,
            0x05 => StoreLocalObj,
            0x06 => StoreLocalIntern,
            0x07 => GetStructMember,
            0x08 => LookupString,
            0x09 => LookupJson,
            0x0a => LookupVector,
            0x0b => LookupDict,
            0x0c => Call,
            0x10 => AddBool,
            0x11 => AddInt,
            0x12 => AddFloat,
            0x13 => AddString,
            0x14 => AddVector,
            0x15 => SubInt,
            0x16 => SubFloat,
            0x17 => MulInt,
            0x18 => MulFloat,
            0x19 => DivInt,
            0x1a => DivFloat,
            0x1b => RemInt,
            0x1c => AndBool,
            0x1d => AndInt,
            0x1e => AndFloat,
            0x1f => OrBool,
            0x20 => OrInt,
            0x21 => OrFloat,
            0x28 => CmpLE,
            0x29 => CmpLEInt,
            0x2a => CmpL,
            0x2b => CmpLInt,
            0x2c => Eq,
            0x2d => EqInt,
            0x2e => Neq,
            0x2f => NeqInt,
            0x30 => New1,
            0x31 => NewVector,
            0x32 => NewDict,
            0x33 => NewStruct,
            0x38 => Return,
            0x39 => Stop,
            0x3a => PushFrame,
            0x3b => PopFrame,
            0x3c => PushIntern,
            0x3d => PushObj,
            0x3e => Popn,
            0x40 => BrFalseBool,
            0x41 => BrTrueBool,
            0x42 => BrZeroInt,
            0x43 => BrNonzeroInt,
            0x44 => BrLInt,
            0x45 => BrLEInt,
            0x46 => BrAlways,
            _ => return None,
        })
    }
}

/// How an opcode reads its three operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// No operands.
    E0000,
    /// A = register.
    Er00,
    /// A = register, B = immediate.
    Eri0,
    /// A = immediate, B = register.
    Eir0,
    /// A, B = registers.
    Err0,
    /// A, B, C = registers.
    Errr,
    /// A, B = registers, C = immediate.
    Erri,
    /// A = register, B, C = immediates.
    Erii,
    /// B = immediate.
    E0i0,
    /// A, B = immediates.
    Eii0,
}

/// Per-opcode descriptor used by the disassembler and validation.
#[derive(Debug, Clone)]
pub struct OpcodeInfo {
    pub name: &'static str,
    pub encoding: Encoding,
}

/// The static opcode table.
pub static OPCODE_INFO: Lazy<HashMap<Opcode, OpcodeInfo>> = Lazy::new(|| {
    use Encoding::*;
    use Opcode::*;
    let rows: &[(Opcode, &'static str, Encoding)] = &[
        (Nop, "nop", E0000),
        (LoadGlobalObj, "load-global-obj", Eri0),
        (LoadGlobalIntern, "load-global-intern", Eri0),
        (StoreGlobalObj, "store-global-obj", Eir0),
        (StoreGlobalIntern, "store-global-intern", Eir0),
        (StoreLocalObj, "store-local-obj", Err0),
        (StoreLocalIntern, "store-local-intern", Err0),
        (GetStructMember, "get-struct-member", Erri),
        (LookupString, "lookup-string", Errr),
        (LookupJson, "lookup-json", Errr),
        (LookupVector, "lookup-vector", Errr),
        (LookupDict, "lookup-dict", Errr),
        (Call, "call", Erri),
        (AddBool, "add-bool", Errr),
        (AddInt, "add-int", Errr),
        (AddFloat, "add-float", Errr),
        (AddString, "add-string", Errr),
        (AddVector, "add-vector", Errr),
        (SubInt, "sub-int", Errr),
        (SubFloat, "sub-float", Errr),
        (MulInt, "mul-int", Errr),
        (MulFloat, "mul-float", Errr),
        (DivInt, "div-int", Errr),
        (DivFloat, "div-float", Errr),
        (RemInt, "rem-int", Errr),
        (AndBool, "and-bool", Errr),
        (AndInt, "and-int", Errr),
        (AndFloat, "and-float", Errr),
        (OrBool, "or-bool", Errr),
        (OrInt, "or-int", Errr),
        (OrFloat, "or-float", Errr),
        (CmpLE, "cmp-le", Errr),
        (CmpLEInt, "cmp-le-int", Errr),
        (CmpL, "cmp-l", Errr),
        (CmpLInt, "cmp-l-int", Errr),
        (Eq, "eq", Errr),
        (EqInt, "eq-int", Errr),
        (Neq, "neq", Errr),
        (NeqInt, "neq-int", Errr),
        (New1, "new-1", Erii),
        (NewVector, "new-vector", Erii),
        (NewDict, "new-dict", Erii),
        (NewStruct, "new-struct", Erii),
        (Return, "return", Er00),
        (Stop, "stop", E0000),
        (PushFrame, "push-frame", E0000),
        (PopFrame, "pop-frame", E0000),
        (PushIntern, "push-intern", Er00),
        (PushObj, "push-obj", Er00),
        (Popn, "popn", Eii0),
        (BrFalseBool, "br-false-bool", Eri0),
        (BrTrueBool, "br-true-bool", Eri0),
        (BrZeroInt, "br-zero-int", Eri0),
        (BrNonzeroInt, "br-nonzero-int", Eri0),
        (BrLInt, "br-l-int", Erri),
        (BrLEInt, "br-le-int", Erri),
        (BrAlways, "br-always", E0i0),
    ];
    rows.iter()
        .map(|(opcode, name, encoding)| {
            (
                *opcode,
                OpcodeInfo {
                    name,
                    encoding: *encoding,
                },
            )
        })
        .collect()
});

impl Opcode {
    pub fn info(&self) -> &'static OpcodeInfo {
        OPCODE_INFO.get(self).expect("every opcode has a table row")
    }

    /// Is this one of the branch opcodes (for target validation)?
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Opcode::BrFalseBool
                | Opcode::BrTrueBool
                | Opcode::BrZeroInt
                | Opcode::BrNonzeroInt
                | Opcode::BrLInt
                | Opcode::BrLEInt
                | Opcode::BrAlways
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.info().name)
    }
}

/// Which operands are registers for a given encoding, in (a, b, c) order.
pub fn register_flags(encoding: Encoding) -> (bool, bool, bool) {
    match encoding {
        Encoding::E0000 => (false, false, false),
        Encoding::Er00 => (true, false, false),
        Encoding::Eri0 => (true, false, false),
        Encoding::Eir0 => (false, true, false),
        Encoding::Err0 => (true, true, false),
        Encoding::Errr => (true, true, true),
        Encoding::Erri => (true, true, false),
        Encoding::Erii => (true, false, false),
        Encoding::E0i0 => (false, false, false),
        Encoding::Eii0 => (false, false, false),
    }
}
