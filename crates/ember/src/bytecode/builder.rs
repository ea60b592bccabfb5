//! Builder for assembling code objects by hand.
//!
//! `CodeBuilder` owns the name and constant tables, resolves labels to byte offsets and
//! inserts `EXTENDED_ARG` prefixes wherever an argument needs more than one byte.
//! Because prefixes change instruction sizes, which changes jump distances, offsets are
//! recomputed until they stop moving.
//!
//! ```ignore
//! let mut b = CodeBuilder::new("<module>");
//! b.load_const(ConstSpec::Int(2));
//! b.load_const(ConstSpec::Int(3));
//! b.emit(Opcode::BinaryAdd);
//! b.emit(Opcode::ReturnValue);
//! let spec = b.build()?;
//! ```

use std::fmt;

use super::{
    code::{CodeSpec, ConstSpec},
    op::{INSTRUCTION_SIZE, Opcode, Operand},
};

/// A jump target, bound to a position with [`CodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Error returned by [`CodeBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    UnboundLabel(usize),
    BackwardRelativeJump { opcode: Opcode, index: usize },
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundLabel(label) => write!(f, "label {label} was never bound"),
            Self::BackwardRelativeJump { opcode, index } => {
                write!(f, "instruction {index} ({}) jumps backwards", opcode.name())
            }
        }
    }
}

impl std::error::Error for BuilderError {}

#[derive(Debug)]
struct Instr {
    op: Opcode,
    arg: u32,
    target: Option<Label>,
    line: Option<u32>,
}

/// Assembles a [`CodeSpec`] instruction by instruction.
#[derive(Debug)]
pub struct CodeBuilder {
    spec: CodeSpec,
    instrs: Vec<Instr>,
    /// Instruction index each label is bound to.
    labels: Vec<Option<usize>>,
    line: Option<u32>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            spec: CodeSpec {
                name: name.to_owned(),
                ..CodeSpec::default()
            },
            instrs: Vec::new(),
            labels: Vec::new(),
            line: None,
        }
    }

    pub fn qualname(&mut self, qualname: &str) -> &mut Self {
        self.spec.qualname = Some(qualname.to_owned());
        self
    }

    pub fn filename(&mut self, filename: &str) -> &mut Self {
        filename.clone_into(&mut self.spec.filename);
        self
    }

    pub fn first_lineno(&mut self, line: u32) -> &mut Self {
        self.spec.first_lineno = line;
        self
    }

    pub fn argcount(&mut self, count: u32) -> &mut Self {
        self.spec.argcount = count;
        self
    }

    pub fn posonlyargcount(&mut self, count: u32) -> &mut Self {
        self.spec.posonlyargcount = count;
        self
    }

    pub fn kwonlyargcount(&mut self, count: u32) -> &mut Self {
        self.spec.kwonlyargcount = count;
        self
    }

    /// Sets flag bits, see [`CodeFlags`](super::CodeFlags).
    pub fn flags(&mut self, bits: u32) -> &mut Self {
        self.spec.flags |= bits;
        self
    }

    /// Sets the source line recorded for the following instructions.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = Some(line);
        self
    }

    /// Index of `name` in the names table, adding it if needed.
    pub fn name(&mut self, name: &str) -> u32 {
        index_of(&mut self.spec.names, name)
    }

    pub fn varname(&mut self, name: &str) -> u32 {
        index_of(&mut self.spec.varnames, name)
    }

    /// Declares the parameters in order. Call before any other `varname`.
    pub fn params(&mut self, names: &[&str]) -> &mut Self {
        for name in names {
            self.varname(name);
        }
        self
    }

    /// Cell slot index of a cell variable.
    pub fn cellvar(&mut self, name: &str) -> u32 {
        index_of(&mut self.spec.cellvars, name)
    }

    /// Cell slot index of a free variable. Declare every cell variable first, free
    /// slots come after them.
    pub fn freevar(&mut self, name: &str) -> u32 {
        let cells = u32::try_from(self.spec.cellvars.len()).unwrap_or(u32::MAX);
        cells + index_of(&mut self.spec.freevars, name)
    }

    pub fn constant(&mut self, constant: ConstSpec) -> u32 {
        let reusable = !matches!(constant, ConstSpec::Float(_) | ConstSpec::Code(_));
        if reusable && let Some(index) = self.spec.consts.iter().position(|c| *c == constant) {
            return to_u32(index);
        }
        self.spec.consts.push(constant);
        to_u32(self.spec.consts.len() - 1)
    }

    pub fn emit(&mut self, op: Opcode) -> &mut Self {
        self.emit_arg(op, 0)
    }

    pub fn emit_arg(&mut self, op: Opcode, arg: u32) -> &mut Self {
        self.instrs.push(Instr {
            op,
            arg,
            target: None,
            line: self.line,
        });
        self
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.instrs.len());
        self
    }

    pub fn emit_jump(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.instrs.push(Instr {
            op,
            arg: 0,
            target: Some(label),
            line: self.line,
        });
        self
    }

    pub fn load_const(&mut self, constant: ConstSpec) -> &mut Self {
        let index = self.constant(constant);
        self.emit_arg(Opcode::LoadConst, index)
    }

    /// Emits an instruction whose argument is an index into the names table.
    pub fn emit_name(&mut self, op: Opcode, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit_arg(op, index)
    }

    /// Emits an instruction whose argument is a local variable slot.
    pub fn emit_local(&mut self, op: Opcode, name: &str) -> &mut Self {
        let index = self.varname(name);
        self.emit_arg(op, index)
    }

    /// Resolves labels and produces the code spec.
    pub fn build(mut self) -> Result<CodeSpec, BuilderError> {
        let targets = self
            .instrs
            .iter()
            .map(|instr| {
                instr
                    .target
                    .map(|label| self.labels[label.0].ok_or(BuilderError::UnboundLabel(label.0)))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Offsets grow monotonically as prefixes are added, so this converges.
        let mut sizes = vec![INSTRUCTION_SIZE; self.instrs.len()];
        loop {
            let offsets = start_offsets(&sizes);
            let mut changed = false;
            for (index, instr) in self.instrs.iter_mut().enumerate() {
                if let Some(target) = targets[index] {
                    let target_offset = offsets[target];
                    instr.arg = if instr.op.operand() == Operand::RelativeJump {
                        let next = offsets[index] + sizes[index];
                        let distance = target_offset
                            .checked_sub(next)
                            .ok_or(BuilderError::BackwardRelativeJump { opcode: instr.op, index })?;
                        to_u32(distance)
                    } else {
                        to_u32(target_offset)
                    };
                }
                let size = encoded_size(instr.arg);
                if size != sizes[index] {
                    sizes[index] = size;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut code = Vec::with_capacity(sizes.iter().sum());
        let mut linetable: Vec<(u32, u32)> = Vec::new();
        for instr in &self.instrs {
            if let Some(line) = instr.line
                && linetable.last().is_none_or(|(_, last)| *last != line)
            {
                linetable.push((to_u32(code.len()), line));
            }
            let bytes = instr.arg.to_be_bytes();
            let prefixes = encoded_size(instr.arg) / INSTRUCTION_SIZE - 1;
            for byte in &bytes[3 - prefixes..3] {
                code.push(Opcode::ExtendedArg as u8);
                code.push(*byte);
            }
            code.push(instr.op as u8);
            code.push(bytes[3]);
        }
        self.spec.code = code;
        self.spec.linetable = linetable;
        Ok(self.spec)
    }
}

fn index_of(table: &mut Vec<String>, name: &str) -> u32 {
    if let Some(index) = table.iter().position(|n| n == name) {
        return to_u32(index);
    }
    table.push(name.to_owned());
    to_u32(table.len() - 1)
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Bytes taken by an instruction with `arg`, prefixes included.
fn encoded_size(arg: u32) -> usize {
    let prefixes = match arg {
        0..=0xff => 0,
        0x100..=0xffff => 1,
        0x1_0000..=0xff_ffff => 2,
        _ => 3,
    };
    (prefixes + 1) * INSTRUCTION_SIZE
}

fn start_offsets(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len() + 1);
    let mut offset = 0;
    for size in sizes {
        offsets.push(offset);
        offset += size;
    }
    offsets.push(offset);
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_arguments_get_extended_arg_prefixes() {
        let mut b = CodeBuilder::new("f");
        for i in 0..300 {
            b.constant(ConstSpec::Int(i));
        }
        b.emit_arg(Opcode::LoadConst, 299).emit(Opcode::ReturnValue);
        let spec = b.build().unwrap();
        assert_eq!(
            spec.code,
            vec![Opcode::ExtendedArg as u8, 1, Opcode::LoadConst as u8, 43, Opcode::ReturnValue as u8, 0]
        );
    }

    #[test]
    fn forward_jumps_account_for_prefixes() {
        let mut b = CodeBuilder::new("f");
        let end = b.new_label();
        b.emit_jump(Opcode::JumpForward, end);
        for _ in 0..200 {
            b.emit(Opcode::Nop);
        }
        b.bind(end);
        b.load_const(ConstSpec::None).emit(Opcode::ReturnValue);
        let spec = b.build().unwrap();
        // 200 NOPs are 400 bytes, so the jump needs one prefix.
        assert_eq!(&spec.code[..4], &[Opcode::ExtendedArg as u8, 1, Opcode::JumpForward as u8, 144]);
    }

    #[test]
    fn unbound_labels_are_reported() {
        let mut b = CodeBuilder::new("f");
        let nowhere = b.new_label();
        b.emit_jump(Opcode::JumpAbsolute, nowhere);
        assert_eq!(b.build().unwrap_err(), BuilderError::UnboundLabel(0));
    }
}
