//! Code objects and their serialized form.
//!
//! A [`CodeSpec`] is what a compiler front end (or a test) produces: plain data with
//! strings for names and nested specs for code constants. Loading it validates every
//! instruction against the tables it indexes and produces a heap [`Code`] object whose
//! immutable part is shared with every frame that executes it.

use std::{fmt, sync::Arc};

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use super::op::{INSTRUCTION_SIZE, Opcode, Operand};
use crate::{
    exception_private::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    resource::ResourceTracker,
    types::{LongInt, Tuple},
    value::Value,
};

/// Code object flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeFlags(u32);

impl CodeFlags {
    pub const OPTIMIZED: u32 = 0x01;
    pub const NEWLOCALS: u32 = 0x02;
    pub const VARARGS: u32 = 0x04;
    pub const VARKEYWORDS: u32 = 0x08;
    pub const NESTED: u32 = 0x10;
    pub const GENERATOR: u32 = 0x20;
    pub const NOFREE: u32 = 0x40;

    #[must_use]
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }
}

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstSpec {
    None,
    Bool(bool),
    Int(i64),
    /// An integer outside the `i64` range, in decimal.
    BigInt(String),
    Float(f64),
    Str(String),
    Tuple(Vec<ConstSpec>),
    Code(Box<CodeSpec>),
}

/// Serializable description of a code object.
///
/// The instruction stream is given either as raw wordcode in `code`, or as
/// `(opcode, argument)` pairs in `instructions`. Arguments in the pair form must fit in
/// one byte; wider arguments need explicit `EXTENDED_ARG` instructions so jump offsets
/// stay what the author wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeSpec {
    pub name: String,
    pub qualname: Option<String>,
    pub filename: String,
    pub first_lineno: u32,
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub flags: u32,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub consts: Vec<ConstSpec>,
    pub code: Vec<u8>,
    pub instructions: Vec<(Opcode, u32)>,
    /// `(start offset, line)` pairs in increasing offset order.
    pub linetable: Vec<(u32, u32)>,
}

impl Default for CodeSpec {
    fn default() -> Self {
        Self {
            name: "<module>".to_owned(),
            qualname: None,
            filename: "<input>".to_owned(),
            first_lineno: 1,
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            flags: 0,
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            consts: Vec::new(),
            code: Vec::new(),
            instructions: Vec::new(),
            linetable: Vec::new(),
        }
    }
}

impl CodeSpec {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Serializes to the compact binary form used for caching compiled code.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// The wordcode for this spec, encoding `instructions` when `code` is empty.
    pub fn wordcode(&self) -> Result<Vec<u8>, String> {
        if self.instructions.is_empty() {
            return Ok(self.code.clone());
        }
        if !self.code.is_empty() {
            return Err("code object sets both `code` and `instructions`".to_owned());
        }
        let mut bytes = Vec::with_capacity(self.instructions.len() * INSTRUCTION_SIZE);
        for (index, (op, arg)) in self.instructions.iter().enumerate() {
            let arg = u8::try_from(*arg).map_err(|_| {
                format!(
                    "instruction {index} ({}): argument {arg} does not fit in one byte, emit EXTENDED_ARG explicitly",
                    op.name()
                )
            })?;
            bytes.push(*op as u8);
            bytes.push(arg);
        }
        Ok(bytes)
    }
}

/// The immutable part of a code object, shared by every frame running it.
#[derive(Debug)]
pub(crate) struct CodeBody {
    pub bytecode: Vec<u8>,
    pub names: Vec<StringId>,
    pub varnames: Vec<StringId>,
    pub cellvars: Vec<StringId>,
    pub freevars: Vec<StringId>,
    pub argcount: usize,
    pub posonlyargcount: usize,
    pub kwonlyargcount: usize,
    pub flags: CodeFlags,
    pub name: StringId,
    pub qualname: StringId,
    pub filename: StringId,
    pub first_lineno: u32,
    linetable: Vec<(u32, u32)>,
    /// For each cell variable, the argument slot that initializes it.
    pub cell2arg: Vec<Option<usize>>,
}

impl CodeBody {
    pub fn nlocals(&self) -> usize {
        self.varnames.len()
    }

    /// Number of parameter slots including `*args` and `**kwargs`.
    pub fn total_args(&self) -> usize {
        self.argcount
            + self.kwonlyargcount
            + usize::from(self.flags.contains(CodeFlags::VARARGS))
            + usize::from(self.flags.contains(CodeFlags::VARKEYWORDS))
    }

    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Name of cell slot `index`, cell variables first then free variables.
    pub fn cell_name(&self, index: usize) -> StringId {
        if index < self.cellvars.len() {
            self.cellvars[index]
        } else {
            self.freevars[index - self.cellvars.len()]
        }
    }

    /// Source line of the instruction at `offset`.
    pub fn line_for(&self, offset: usize) -> u32 {
        let offset = u32::try_from(offset).unwrap_or(u32::MAX);
        self.linetable
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .map_or(self.first_lineno, |(_, line)| *line)
    }
}

#[cfg(test)]
impl CodeBody {
    /// An empty body with no instructions, for unit tests of frame bookkeeping.
    pub fn for_tests(name: StringId) -> Self {
        Self {
            bytecode: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            flags: CodeFlags::default(),
            name,
            qualname: name,
            filename: name,
            first_lineno: 1,
            linetable: Vec::new(),
            cell2arg: Vec::new(),
        }
    }
}

/// A code object on the heap: the shared body plus the constant pool.
pub(crate) struct Code {
    pub body: Arc<CodeBody>,
    pub consts: Vec<Value>,
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Code")
            .field("name", &self.body.name)
            .field("consts", &self.consts.len())
            .finish_non_exhaustive()
    }
}

impl Code {
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for value in &mut self.consts {
            value.collect_ref(stack);
        }
    }
}

fn invalid(msg: impl fmt::Display) -> RunError {
    ExcType::system_error(msg)
}

/// Validates `spec` and allocates it as a heap code object.
pub(crate) fn load_code(
    spec: &CodeSpec,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &mut Interns,
) -> RunResult<HeapId> {
    let bytecode = spec.wordcode().map_err(invalid)?;
    let flags = CodeFlags::new(spec.flags);
    let argcount = spec.argcount as usize;
    let posonlyargcount = spec.posonlyargcount as usize;
    let kwonlyargcount = spec.kwonlyargcount as usize;
    if posonlyargcount > argcount {
        return Err(invalid(format!(
            "{}: posonlyargcount {posonlyargcount} exceeds argcount {argcount}",
            spec.name
        )));
    }
    let total_args = argcount
        + kwonlyargcount
        + usize::from(flags.contains(CodeFlags::VARARGS))
        + usize::from(flags.contains(CodeFlags::VARKEYWORDS));
    if spec.varnames.len() < total_args {
        return Err(invalid(format!(
            "{}: {total_args} parameters but only {} varnames",
            spec.name,
            spec.varnames.len()
        )));
    }
    validate_wordcode(spec, &bytecode)?;

    let intern_all = |interns: &mut Interns, names: &[String]| -> Vec<StringId> {
        names.iter().map(|name| interns.intern(name)).collect()
    };
    let names = intern_all(interns, &spec.names);
    let varnames = intern_all(interns, &spec.varnames);
    let cellvars = intern_all(interns, &spec.cellvars);
    let freevars = intern_all(interns, &spec.freevars);
    let cell2arg = cellvars
        .iter()
        .map(|cell| varnames[..total_args].iter().position(|arg| arg == cell))
        .collect();
    let name = interns.intern(&spec.name);
    let qualname = spec.qualname.as_deref().map_or(name, |q| interns.intern(q));
    let filename = interns.intern(&spec.filename);

    let mut consts = Vec::with_capacity(spec.consts.len());
    for constant in &spec.consts {
        match load_const(constant, heap, interns) {
            Ok(value) => consts.push(value),
            Err(err) => {
                consts.drop_with_heap(heap);
                return Err(err);
            }
        }
    }

    let body = CodeBody {
        bytecode,
        names,
        varnames,
        cellvars,
        freevars,
        argcount,
        posonlyargcount,
        kwonlyargcount,
        flags,
        name,
        qualname,
        filename,
        first_lineno: spec.first_lineno,
        linetable: spec.linetable.clone(),
        cell2arg,
    };
    let code = Code {
        body: Arc::new(body),
        consts,
    };
    Ok(heap.allocate(HeapData::Code(code))?)
}

fn load_const(
    constant: &ConstSpec,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &mut Interns,
) -> RunResult<Value> {
    Ok(match constant {
        ConstSpec::None => Value::None,
        ConstSpec::Bool(b) => Value::Bool(*b),
        ConstSpec::Int(i) => Value::Int(*i),
        ConstSpec::BigInt(digits) => {
            let bi: BigInt = digits
                .parse()
                .map_err(|_| invalid(format!("invalid integer constant {digits:?}")))?;
            LongInt::new(bi).into_value(heap)?
        }
        ConstSpec::Float(f) => Value::Float(*f),
        ConstSpec::Str(s) => Value::InternString(interns.intern(s)),
        ConstSpec::Tuple(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match load_const(item, heap, interns) {
                    Ok(value) => values.push(value),
                    Err(err) => {
                        values.drop_with_heap(heap);
                        return Err(err);
                    }
                }
            }
            Value::Ref(heap.allocate(HeapData::Tuple(Tuple::new(values)))?)
        }
        ConstSpec::Code(code) => Value::Ref(load_code(code, heap, interns)?),
    })
}

/// Checks every instruction: known opcode, table indexes in range, jump targets on an
/// instruction boundary inside the code.
fn validate_wordcode(spec: &CodeSpec, bytecode: &[u8]) -> RunResult<()> {
    if bytecode.is_empty() {
        return Err(invalid(format!("{}: code object has no instructions", spec.name)));
    }
    if bytecode.len() % INSTRUCTION_SIZE != 0 {
        return Err(invalid(format!(
            "{}: wordcode length {} is not a multiple of {INSTRUCTION_SIZE}",
            spec.name,
            bytecode.len()
        )));
    }
    let ncells = spec.cellvars.len() + spec.freevars.len();
    let mut extended: u32 = 0;
    for (offset, word) in bytecode.chunks_exact(INSTRUCTION_SIZE).enumerate() {
        let offset = offset * INSTRUCTION_SIZE;
        let op = Opcode::from_byte(word[0])
            .ok_or_else(|| invalid(format!("{}: unknown opcode {} at offset {offset}", spec.name, word[0])))?;
        let arg = (extended << 8) | u32::from(word[1]);
        if op == Opcode::ExtendedArg {
            extended = arg;
            continue;
        }
        extended = 0;
        let arg = arg as usize;
        let check_index = |table: &str, len: usize| -> RunResult<()> {
            if arg < len {
                Ok(())
            } else {
                Err(invalid(format!(
                    "{}: {} at offset {offset} indexes {table} {arg} but there are only {len}",
                    spec.name,
                    op.name()
                )))
            }
        };
        match op.operand() {
            Operand::Const => check_index("constant", spec.consts.len())?,
            Operand::Name => check_index("name", spec.names.len())?,
            Operand::Local => check_index("local", spec.varnames.len())?,
            Operand::Cell => check_index("cell", ncells)?,
            Operand::RelativeJump | Operand::AbsoluteJump => {
                let target = if op.operand() == Operand::RelativeJump {
                    offset + INSTRUCTION_SIZE + arg
                } else {
                    arg
                };
                if target >= bytecode.len() || target % INSTRUCTION_SIZE != 0 {
                    return Err(invalid(format!(
                        "{}: {} at offset {offset} jumps to invalid target {target}",
                        spec.name,
                        op.name()
                    )));
                }
            }
            Operand::None | Operand::Immediate => {}
        }
    }
    if extended != 0 || bytecode[bytecode.len() - INSTRUCTION_SIZE] == Opcode::ExtendedArg as u8 {
        return Err(invalid(format!("{}: code ends with EXTENDED_ARG", spec.name)));
    }
    Ok(())
}
