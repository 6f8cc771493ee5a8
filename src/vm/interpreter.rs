//! The interpreter
//!
//! A single fetch-decode-execute loop over the current frame's
//! instructions. Calls into bytecode functions recurse on the Rust stack;
//! host functions receive decoded typed arguments and may re-enter the
//! interpreter through [`Interpreter::call_function_pod`].

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use super::error::{RuntimeError, RuntimeResult};
use super::frame::{FrameDef, FunctionDef};
use super::stack::Stack;
use crate::intrinsics;
use crate::runtime::backend::ValueBackend;
use crate::runtime::compare::{compare, CompareOp};
use crate::runtime::pod::PodValue;
use crate::runtime::value::{pod_to_value, value_to_pod, TypedValue, Value};
use crate::types::{TypeId, TypeInterner, TypeVariant};
use crate::vm::opcode::Opcode;

/// A native function callable from bytecode.
pub type HostFn = fn(&mut Interpreter, &[TypedValue]) -> RuntimeResult<TypedValue>;

/// Terminal states of one frame's instruction stream.
enum ExecResult {
    /// `Return` was executed; the word owns one reference for RC types.
    Returning(PodValue),
    /// `Stop` was executed or the stream ran out.
    Stopped,
}

/// Nested bytecode activations beyond this are a fatal error.
const MAX_CALL_DEPTH: usize = 1024;

/// A loaded program plus all execution state. This is the `runtime`
/// handle the host API hands out.
pub struct Interpreter {
    interner: TypeInterner,
    backend: ValueBackend,
    stack: Stack,
    functions: Vec<FunctionDef>,
    host_fns: HashMap<i32, HostFn>,
    output: Vec<String>,
    call_depth: usize,
}

impl Interpreter {
    /// Wire up a validated program. The loader calls this and then
    /// [`run_globals`](Self::run_globals).
    pub(crate) fn new(
        interner: TypeInterner,
        backend: ValueBackend,
        globals: Arc<FrameDef>,
        mut functions: Vec<FunctionDef>,
    ) -> Self {
        let mut frames = vec![globals];
        for function in &mut functions {
            if let Some(frame) = &function.frame {
                frames.push(frame.clone());
                function.frame_id = frames.len() - 1;
            }
        }
        Interpreter {
            interner,
            backend,
            stack: Stack::new(frames),
            functions,
            host_fns: intrinsics::host_functions(),
            output: Vec::new(),
            call_depth: 0,
        }
    }

    /// Run the global instructions; the global frame stays open for the
    /// lifetime of the interpreter.
    pub(crate) fn run_globals(&mut self) -> RuntimeResult<()> {
        debug!("running global initializer");
        self.stack.save_frame();
        let globals = self.stack.frame_def(0).clone();
        self.stack.open_frame(&mut self.backend, &globals, 0, 0);
        self.execute(globals).map(|_| ())
    }

    //////////////////////////////////////// host API

    /// Look up a global by name and decode its current value.
    pub fn find_global(
        &self,
        name: &str,
    ) -> Option<(TypeId, Value)> {
        let globals = self.stack.frame_def(0);
        let index = globals.find_symbol(name)?;
        let type_id = globals.symbols[index].type_id;
        let pod = self.stack.read_global(index);
        if pod.is_unwritten() {
            return None;
        }
        Some((
            type_id,
            pod_to_value(&self.backend, &self.interner, type_id, pod),
        ))
    }

    /// Invoke a function value with host values.
    pub fn call(
        &mut self,
        function: &Value,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        let Value::Function { link_id, .. } = function else {
            panic!("call() requires a function value");
        };
        let typed: Vec<TypedValue> = args
            .iter()
            .map(|arg| {
                let pod = value_to_pod(&mut self.backend, &self.interner, arg);
                TypedValue::new(arg.type_of(), pod)
            })
            .collect();
        let result = self.call_function_pod(*link_id, &typed);
        for arg in &typed {
            self.backend.release(&self.interner, arg.pod, arg.type_id);
        }
        let result = result?;
        let value = pod_to_value(&self.backend, &self.interner, result.type_id, result.pod);
        self.backend
            .release(&self.interner, result.pod, result.type_id);
        Ok(value)
    }

    /// Look up a function in the link table by name and return a bound
    /// function value. Intrinsics are linked under their plain names.
    pub fn find_function(
        &self,
        name: &str,
    ) -> Option<Value> {
        let link_id = self
            .functions
            .iter()
            .position(|function| function.name == name)?;
        Some(Value::Function {
            type_id: self.functions[link_id].function_type,
            link_id,
        })
    }

    /// Number of live heap objects; a debugging aid for leak checks.
    pub fn live_object_count(&self) -> usize {
        self.backend.heap().live_count()
    }

    /// Take the lines accumulated by `print` so far.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Log the live-allocation table at debug level.
    pub fn trace_heap(&self) {
        self.backend.trace_heap();
    }

    //////////////////////////////////////// intrinsic support

    pub(crate) fn interner(&self) -> &TypeInterner {
        &self.interner
    }

    pub(crate) fn backend(&self) -> &ValueBackend {
        &self.backend
    }

    pub(crate) fn backend_mut(&mut self) -> &mut ValueBackend {
        &mut self.backend
    }

    /// Split borrow for intrinsics that allocate while interning types.
    pub(crate) fn parts_mut(&mut self) -> (&mut ValueBackend, &mut TypeInterner) {
        (&mut self.backend, &mut self.interner)
    }

    pub(crate) fn push_output(
        &mut self,
        line: String,
    ) {
        self.output.push(line);
    }

    /// Invoke a function by link id with typed words. The result owns one
    /// reference for RC types; the caller releases it.
    pub(crate) fn call_function_pod(
        &mut self,
        link_id: usize,
        args: &[TypedValue],
    ) -> RuntimeResult<TypedValue> {
        let (host_id, frame, frame_id, function_type) = {
            let def = &self.functions[link_id];
            (
                def.host_function_id,
                def.frame.clone(),
                def.frame_id,
                def.function_type,
            )
        };
        let return_type = self.function_return(function_type);

        if host_id != 0 {
            let host = *self
                .host_fns
                .get(&host_id)
                .unwrap_or_else(|| panic!("unregistered host function {}", host_id));
            return host(self, args);
        }

        let frame = frame.expect("bytecode function without a frame");
        debug_assert_eq!(args.len(), frame.args.len());
        let saved_size = self.stack.size();
        let saved_pos = self.stack.current_frame_pos();
        let saved_id = self.stack.current_frame_id();

        self.stack.save_frame();
        let mut exts = Vec::with_capacity(args.len());
        for arg in args {
            let rc = self.interner.is_rc(arg.type_id);
            exts.push(rc);
            if rc {
                self.stack.push_obj(&mut self.backend, arg.pod);
            } else {
                self.stack.push_intern(arg.pod);
            }
        }
        self.enter_call();
        self.stack
            .open_frame(&mut self.backend, &frame, frame_id, args.len());
        let result = self.execute(frame.clone());
        self.call_depth -= 1;
        match result {
            Ok(exec) => {
                self.stack
                    .close_frame(&mut self.backend, &self.interner, &frame);
                self.stack
                    .pop_batch(&mut self.backend, &self.interner, &exts);
                self.stack.restore_frame();
                let pod = match exec {
                    ExecResult::Returning(pod) => pod,
                    ExecResult::Stopped => PodValue::ZERO,
                };
                Ok(TypedValue::new(return_type, pod))
            }
            Err(error) => {
                self.stack.unwind_to(saved_size, saved_pos, saved_id);
                Err(error)
            }
        }
    }

    fn function_return(
        &self,
        function_type: TypeId,
    ) -> TypeId {
        match self.interner.get_variant(self.interner.peek(function_type)) {
            TypeVariant::Function { ret, .. } => ret,
            other => panic!("call through non-function type {:?}", other),
        }
    }

    fn enter_call(&mut self) {
        self.call_depth += 1;
        assert!(self.call_depth <= MAX_CALL_DEPTH, "stack overflow");
    }

    //////////////////////////////////////// the loop

    fn execute(
        &mut self,
        frame: Arc<FrameDef>,
    ) -> RuntimeResult<ExecResult> {
        let instructions = &frame.instructions;
        let mut pc = 0usize;

        while pc < instructions.len() {
            let instruction = instructions[pc];
            let (a, b, c) = (instruction.a, instruction.b, instruction.c);

            match instruction.opcode {
                Opcode::Nop => {}

                //////////////////// globals and locals

                Opcode::LoadGlobalObj | Opcode::LoadGlobalIntern => {
                    let value = self.stack.read_global(b as usize);
                    self.stack
                        .write_register(&mut self.backend, &self.interner, a, value);
                }
                Opcode::StoreGlobalObj | Opcode::StoreGlobalIntern => {
                    let value = self.stack.read_register(b);
                    self.stack
                        .write_global(&mut self.backend, &self.interner, a as usize, value);
                }
                Opcode::StoreLocalObj | Opcode::StoreLocalIntern => {
                    let value = self.stack.read_register(b);
                    self.stack
                        .write_register(&mut self.backend, &self.interner, a, value);
                }

                //////////////////// member and element access

                Opcode::GetStructMember => {
                    let parent = self.stack.read_register(b);
                    let parent_type = frame.symbols[b as usize].type_id;
                    let member = self.backend.get_struct_member(
                        &self.interner,
                        parent_type,
                        parent,
                        c as usize,
                    );
                    self.stack
                        .write_register(&mut self.backend, &self.interner, a, member);
                }
                Opcode::LookupString => {
                    let text = self.stack.read_register(b);
                    let index = self.stack.read_register(c).as_int();
                    let result = self.backend.lookup_string(text, index)?;
                    self.stack
                        .write_register_transfer(&mut self.backend, &self.interner, a, result);
                }
                Opcode::LookupVector => {
                    let vector = self.stack.read_register(b);
                    let index = self.stack.read_register(c).as_int();
                    let element = self.backend.lookup_vector(vector, index)?;
                    self.stack
                        .write_register(&mut self.backend, &self.interner, a, element);
                }
                Opcode::LookupDict => {
                    let dict = self.stack.read_register(b);
                    let key_pod = self.stack.read_register(c);
                    let key =
                        String::from_utf8_lossy(self.backend.string_bytes(key_pod)).into_owned();
                    let value = self.backend.lookup_dict(dict, &key)?;
                    self.stack
                        .write_register(&mut self.backend, &self.interner, a, value);
                }
                Opcode::LookupJson => {
                    let json = self.stack.read_register(b);
                    let key_pod = self.stack.read_register(c);
                    let subtree = {
                        let tree = self.backend.json_tree(json);
                        match tree {
                            serde_json::Value::Object(members) => {
                                let key = String::from_utf8_lossy(
                                    self.backend.string_bytes(key_pod),
                                )
                                .into_owned();
                                members.get(&key).cloned().ok_or_else(|| {
                                    RuntimeError::KeyNotFound(format!(
                                        "Lookup key not found in json object: '{}'.",
                                        key
                                    ))
                                })?
                            }
                            serde_json::Value::Array(elements) => {
                                let index = key_pod.as_int();
                                if index < 0 || index as usize >= elements.len() {
                                    return Err(RuntimeError::IndexOutOfRange(
                                        "Json array lookup out of bounds.".to_string(),
                                    ));
                                }
                                elements[index as usize].clone()
                            }
                            _ => {
                                return Err(RuntimeError::Message(
                                    "Lookup using [] only works on json objects and arrays."
                                        .to_string(),
                                ))
                            }
                        }
                    };
                    let result = self.backend.alloc_json(subtree);
                    self.stack
                        .write_register_transfer(&mut self.backend, &self.interner, a, result);
                }

                //////////////////// call

                Opcode::Call => {
                    self.execute_call(instruction)?;
                }

                //////////////////// arithmetic

                Opcode::AddBool => {
                    let lhs = self.stack.read_register(b).as_bool();
                    let rhs = self.stack.read_register(c).as_bool();
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(lhs | rhs),
                    );
                }
                Opcode::AddInt => {
                    let result = self
                        .stack
                        .read_register(b)
                        .as_int()
                        .wrapping_add(self.stack.read_register(c).as_int());
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_int(result),
                    );
                }
                Opcode::AddFloat => {
                    let result =
                        self.stack.read_register(b).as_double() + self.stack.read_register(c).as_double();
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_double(result),
                    );
                }
                Opcode::AddString => {
                    let lhs = self.stack.read_register(b);
                    let rhs = self.stack.read_register(c);
                    let result = self.backend.concat_strings(lhs, rhs);
                    self.stack
                        .write_register_transfer(&mut self.backend, &self.interner, a, result);
                }
                Opcode::AddVector => {
                    let lhs = self.stack.read_register(b);
                    let rhs = self.stack.read_register(c);
                    let vector_type = frame.symbols[b as usize].type_id;
                    let result =
                        self.backend
                            .concat_vectors(&self.interner, vector_type, lhs, rhs);
                    self.stack
                        .write_register_transfer(&mut self.backend, &self.interner, a, result);
                }
                Opcode::SubInt => {
                    let result = self
                        .stack
                        .read_register(b)
                        .as_int()
                        .wrapping_sub(self.stack.read_register(c).as_int());
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_int(result),
                    );
                }
                Opcode::SubFloat => {
                    let result =
                        self.stack.read_register(b).as_double() - self.stack.read_register(c).as_double();
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_double(result),
                    );
                }
                Opcode::MulInt => {
                    let result = self
                        .stack
                        .read_register(b)
                        .as_int()
                        .wrapping_mul(self.stack.read_register(c).as_int());
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_int(result),
                    );
                }
                Opcode::MulFloat => {
                    let result =
                        self.stack.read_register(b).as_double() * self.stack.read_register(c).as_double();
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_double(result),
                    );
                }
                Opcode::DivInt => {
                    let rhs = self.stack.read_register(c).as_int();
                    if rhs == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    let result = self.stack.read_register(b).as_int().wrapping_div(rhs);
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_int(result),
                    );
                }
                Opcode::DivFloat => {
                    let rhs = self.stack.read_register(c).as_double();
                    if rhs == 0.0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    let result = self.stack.read_register(b).as_double() / rhs;
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_double(result),
                    );
                }
                Opcode::RemInt => {
                    let rhs = self.stack.read_register(c).as_int();
                    if rhs == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    let result = self.stack.read_register(b).as_int().wrapping_rem(rhs);
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_int(result),
                    );
                }

                //////////////////// logical

                Opcode::AndBool => {
                    let result =
                        self.stack.read_register(b).as_bool() && self.stack.read_register(c).as_bool();
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }
                Opcode::AndInt => {
                    let result = self.stack.read_register(b).as_int() != 0
                        && self.stack.read_register(c).as_int() != 0;
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }
                Opcode::AndFloat => {
                    let result = self.stack.read_register(b).as_double() != 0.0
                        && self.stack.read_register(c).as_double() != 0.0;
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }
                Opcode::OrBool => {
                    let result =
                        self.stack.read_register(b).as_bool() || self.stack.read_register(c).as_bool();
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }
                Opcode::OrInt => {
                    let result = self.stack.read_register(b).as_int() != 0
                        || self.stack.read_register(c).as_int() != 0;
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }
                Opcode::OrFloat => {
                    let result = self.stack.read_register(b).as_double() != 0.0
                        || self.stack.read_register(c).as_double() != 0.0;
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }

                //////////////////// comparison

                Opcode::CmpLE | Opcode::CmpL | Opcode::Eq | Opcode::Neq => {
                    let op = match instruction.opcode {
                        Opcode::CmpLE => CompareOp::LessEqual,
                        Opcode::CmpL => CompareOp::Less,
                        Opcode::Eq => CompareOp::Equal,
                        _ => CompareOp::NotEqual,
                    };
                    let operand_type = frame.symbols[b as usize].type_id;
                    let lhs = self.stack.read_register(b);
                    let rhs = self.stack.read_register(c);
                    let result =
                        compare(&self.backend, &self.interner, op, operand_type, lhs, rhs);
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }
                Opcode::CmpLEInt | Opcode::CmpLInt | Opcode::EqInt | Opcode::NeqInt => {
                    let lhs = self.stack.read_register(b).as_int();
                    let rhs = self.stack.read_register(c).as_int();
                    let result = match instruction.opcode {
                        Opcode::CmpLEInt => lhs <= rhs,
                        Opcode::CmpLInt => lhs < rhs,
                        Opcode::EqInt => lhs == rhs,
                        _ => lhs != rhs,
                    };
                    self.stack.write_register(
                        &mut self.backend,
                        &self.interner,
                        a,
                        PodValue::from_bool(result),
                    );
                }

                //////////////////// constructors

                Opcode::New1 => {
                    self.execute_new1(instruction)?;
                }
                Opcode::NewVector => {
                    let type_id = self.interner.type_at_index(b as usize);
                    let count = c as usize;
                    let base = self.stack.size() - count;
                    let elements: Vec<PodValue> =
                        (0..count).map(|i| self.stack.load_absolute(base + i)).collect();
                    let result = self.backend.alloc_vector(&self.interner, type_id, elements);
                    let element_rc = self
                        .interner
                        .is_rc(ValueBackend::vector_element(&self.interner, type_id));
                    let ext_bits = if element_rc { low_bits(count) } else { 0 };
                    self.stack
                        .popn(&mut self.backend, &self.interner, count, ext_bits);
                    self.stack
                        .write_register_transfer(&mut self.backend, &self.interner, a, result);
                }
                Opcode::NewDict => {
                    let type_id = self.interner.type_at_index(b as usize);
                    let count = c as usize;
                    debug_assert_eq!(count % 2, 0);
                    let base = self.stack.size() - count;
                    let mut entries = Vec::with_capacity(count / 2);
                    for pair in 0..count / 2 {
                        let key_pod = self.stack.load_absolute(base + pair * 2);
                        let value_pod = self.stack.load_absolute(base + pair * 2 + 1);
                        let key = String::from_utf8_lossy(self.backend.string_bytes(key_pod))
                            .into_owned();
                        entries.push((key, value_pod));
                    }
                    let result = self.backend.alloc_dict(&self.interner, type_id, entries);
                    let value_rc = self
                        .interner
                        .is_rc(ValueBackend::dict_value(&self.interner, type_id));
                    // Stack order is key, value, key, value...; keys are
                    // always RC strings.
                    let flags: Vec<bool> = (0..count)
                        .map(|slot| if slot % 2 == 0 { true } else { value_rc })
                        .collect();
                    let ext_bits = popn_bits(&flags);
                    self.stack
                        .popn(&mut self.backend, &self.interner, count, ext_bits);
                    self.stack
                        .write_register_transfer(&mut self.backend, &self.interner, a, result);
                }
                Opcode::NewStruct => {
                    let type_id = self.interner.type_at_index(b as usize);
                    let count = c as usize;
                    let base = self.stack.size() - count;
                    let fields: Vec<PodValue> =
                        (0..count).map(|i| self.stack.load_absolute(base + i)).collect();
                    let flags: Vec<bool> = self
                        .backend
                        .struct_layout(&self.interner, type_id)
                        .fields
                        .iter()
                        .map(|field| field.rc)
                        .collect();
                    debug_assert_eq!(flags.len(), count);
                    let result = self.backend.alloc_struct(&self.interner, type_id, fields);
                    let ext_bits = popn_bits(&flags);
                    self.stack
                        .popn(&mut self.backend, &self.interner, count, ext_bits);
                    self.stack
                        .write_register_transfer(&mut self.backend, &self.interner, a, result);
                }

                //////////////////// control

                Opcode::Return => {
                    let value = self.stack.read_register(a);
                    if frame.exts[a as usize] {
                        self.backend.retain_obj(value);
                    }
                    return Ok(ExecResult::Returning(value));
                }
                Opcode::Stop => {
                    return Ok(ExecResult::Stopped);
                }
                Opcode::PushFrame => {
                    self.stack.save_frame();
                }
                Opcode::PopFrame => {
                    self.stack.restore_frame();
                }
                Opcode::PushIntern => {
                    let value = self.stack.read_register(a);
                    self.stack.push_intern(value);
                }
                Opcode::PushObj => {
                    let value = self.stack.read_register(a);
                    self.stack.push_obj(&mut self.backend, value);
                }
                Opcode::Popn => {
                    let count = a as usize;
                    debug_assert!(count <= 32);
                    let ext_bits = b as u16 as u32;
                    self.stack
                        .popn(&mut self.backend, &self.interner, count, ext_bits);
                }

                //////////////////// branches

                Opcode::BrFalseBool => {
                    if !self.stack.read_register(a).as_bool() {
                        pc = offset_pc(pc, b);
                        continue;
                    }
                }
                Opcode::BrTrueBool => {
                    if self.stack.read_register(a).as_bool() {
                        pc = offset_pc(pc, b);
                        continue;
                    }
                }
                Opcode::BrZeroInt => {
                    if self.stack.read_register(a).as_int() == 0 {
                        pc = offset_pc(pc, b);
                        continue;
                    }
                }
                Opcode::BrNonzeroInt => {
                    if self.stack.read_register(a).as_int() != 0 {
                        pc = offset_pc(pc, b);
                        continue;
                    }
                }
                Opcode::BrLInt => {
                    if self.stack.read_register(a).as_int() < self.stack.read_register(b).as_int()
                    {
                        pc = offset_pc(pc, c);
                        continue;
                    }
                }
                Opcode::BrLEInt => {
                    if self.stack.read_register(a).as_int() <= self.stack.read_register(b).as_int()
                    {
                        pc = offset_pc(pc, c);
                        continue;
                    }
                }
                Opcode::BrAlways => {
                    pc = offset_pc(pc, b);
                    continue;
                }
            }
            pc += 1;
        }
        // Falling off the end of the stream halts the activation.
        Ok(ExecResult::Stopped)
    }

    /// The `Call` opcode. Arguments were already pushed; dynamic ones as
    /// (type word, value word) pairs.
    fn execute_call(
        &mut self,
        instruction: crate::vm::instruction::Instruction,
    ) -> RuntimeResult<()> {
        let link_id = self.stack.read_register(instruction.b).as_function();
        let callee_arg_count = instruction.c as usize;
        let (host_id, callee_frame, callee_frame_id, dyn_arg_count, function_type) = {
            let def = &self.functions[link_id];
            (
                def.host_function_id,
                def.frame.clone(),
                def.frame_id,
                def.dyn_arg_count,
                def.function_type,
            )
        };
        let return_type = self.function_return(function_type);

        if host_id != 0 {
            let arg_types = match self.interner.get_variant(self.interner.peek(function_type)) {
                TypeVariant::Function { args, .. } => args,
                other => panic!("call through non-function type {:?}", other),
            };
            debug_assert_eq!(arg_types.len(), callee_arg_count);
            let arg0 = self.stack.size() - (dyn_arg_count + callee_arg_count);
            let mut stack_pos = arg0;
            let mut call_args = Vec::with_capacity(callee_arg_count);
            for arg_type in &arg_types {
                if self.interner.peek(*arg_type) == TypeId::ANY {
                    let type_word = self.stack.load_absolute(stack_pos);
                    let actual = TypeId::from_raw(type_word.as_type_raw());
                    let value = self.stack.load_absolute(stack_pos + 1);
                    call_args.push(TypedValue::new(actual, value));
                    stack_pos += 2;
                } else {
                    call_args.push(TypedValue::new(*arg_type, self.stack.load_absolute(stack_pos)));
                    stack_pos += 1;
                }
            }
            let host = *self
                .host_fns
                .get(&host_id)
                .unwrap_or_else(|| panic!("unregistered host function {}", host_id));
            let result = host(self, &call_args)?;

            let return_peek = self.interner.peek(return_type);
            if return_peek == TypeId::VOID {
                self.backend
                    .release(&self.interner, result.pod, result.type_id);
            } else if self.interner.is_rc(result.type_id) {
                self.stack.write_register_transfer(
                    &mut self.backend,
                    &self.interner,
                    instruction.a,
                    result.pod,
                );
            } else {
                self.stack.write_register(
                    &mut self.backend,
                    &self.interner,
                    instruction.a,
                    result.pod,
                );
            }
        } else {
            debug_assert_eq!(dyn_arg_count, 0, "bytecode functions take static args");
            let callee_frame = callee_frame.expect("bytecode function without a frame");
            // The destination register belongs to the caller frame, which
            // is not current again until PopFrame runs; store by absolute
            // position.
            let result_reg_pos = self.stack.current_frame_pos() + instruction.a as usize;

            self.enter_call();
            self.stack.open_frame(
                &mut self.backend,
                &callee_frame,
                callee_frame_id,
                callee_arg_count,
            );
            let result = self.execute(callee_frame.clone());
            self.call_depth -= 1;
            let result = result?;
            self.stack
                .close_frame(&mut self.backend, &self.interner, &callee_frame);

            if self.interner.peek(return_type) != TypeId::VOID {
                let value = match result {
                    ExecResult::Returning(value) => value,
                    ExecResult::Stopped => PodValue::ZERO,
                };
                let rc = self.interner.is_rc(return_type);
                self.stack.replace_absolute_transfer(
                    &mut self.backend,
                    &self.interner,
                    result_reg_pos,
                    value,
                    rc,
                );
            }
        }
        Ok(())
    }

    /// The `New1` opcode: construct a value of type B from the one value
    /// of type C on the stack. Wrapping a non-json value into json is the
    /// only converting form; everything else is a re-typing copy.
    fn execute_new1(
        &mut self,
        instruction: crate::vm::instruction::Instruction,
    ) -> RuntimeResult<()> {
        let target = self.interner.type_at_index(instruction.b as usize);
        let source = self.interner.type_at_index(instruction.c as usize);
        let input = self.stack.load_absolute(self.stack.size() - 1);

        let target_is_json = self.interner.peek(target) == TypeId::JSON;
        let source_is_json = self.interner.peek(source) == TypeId::JSON;
        let (result, owned) = if target_is_json && !source_is_json {
            let tree =
                intrinsics::json::pod_to_json(&self.backend, &self.interner, source, input)?;
            (self.backend.alloc_json(tree), true)
        } else if self.interner.is_rc(target) {
            self.backend.retain_obj(input);
            (input, true)
        } else {
            (input, false)
        };

        let source_bits = if self.interner.is_rc(source) { 1 } else { 0 };
        self.stack
            .popn(&mut self.backend, &self.interner, 1, source_bits);
        if owned {
            self.stack.write_register_transfer(
                &mut self.backend,
                &self.interner,
                instruction.a,
                result,
            );
        } else {
            self.stack
                .write_register(&mut self.backend, &self.interner, instruction.a, result);
        }
        Ok(())
    }
}

/// Branch offsets are relative to the next instruction.
fn offset_pc(
    pc: usize,
    offset: i16,
) -> usize {
    (pc as isize + 1 + offset as isize) as usize
}

/// Bitmap with the low `count` bits set.
fn low_bits(count: usize) -> u32 {
    debug_assert!(count <= 32);
    (((1u64) << count) - 1) as u32
}

/// Popn bitmap for flags given in stack (push) order.
fn popn_bits(flags: &[bool]) -> u32 {
    let mut bits = 0u32;
    for (index, flag) in flags.iter().rev().enumerate() {
        if *flag {
            bits |= 1 << index;
        }
    }
    bits
}
