//! Opcode definitions.
//!
//! Instructions are two byte words: the opcode followed by an 8 bit argument. Opcodes
//! below [`HAVE_ARGUMENT`] ignore their argument byte. Wider arguments are built by
//! prefixing `EXTENDED_ARG` words, which the loop folds into the following instruction
//! before it is dispatched.
//!
//! Jump arguments are byte offsets: relative jumps count from the start of the next
//! instruction, absolute jumps from the start of the code.

use serde::{Deserialize, Serialize};
use strum::{FromRepr, IntoStaticStr};

/// Opcodes below this value take no argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// Size of one instruction word in bytes.
pub const INSTRUCTION_SIZE: usize = 2;

/// The instruction set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    RotFour = 6,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    Reraise = 48,
    WithExceptStart = 49,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    GetYieldFromIter = 69,
    LoadBuildClass = 71,
    YieldFrom = 72,
    LoadAssertionError = 74,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    /// Pops the innermost loop block, truncating the stack to its level, and jumps to
    /// the block's exit target.
    BreakLoop = 80,
    ListToTuple = 82,
    ReturnValue = 83,
    YieldValue = 86,
    PopBlock = 87,
    PopExcept = 89,

    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    UnpackEx = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    IsOp = 117,
    ContainsOp = 118,
    /// Pushes a loop block whose exit target is `arg` bytes past the next instruction.
    SetupLoop = 120,
    JumpIfNotExcMatch = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    DeleteDeref = 138,
    CallFunctionKw = 141,
    CallFunctionEx = 142,
    SetupWith = 143,
    ExtendedArg = 144,
    ListAppend = 145,
    MapAdd = 147,
    LoadClassderef = 148,
    FormatValue = 155,
    BuildConstKeyMap = 156,
    BuildString = 157,
    LoadMethod = 160,
    CallMethod = 161,
    ListExtend = 162,
    DictMerge = 164,
    DictUpdate = 165,
}

/// Which table, if any, an instruction's argument indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand {
    None,
    Const,
    Name,
    Local,
    Cell,
    RelativeJump,
    AbsoluteJump,
    /// A count or flag word interpreted by the instruction itself.
    Immediate,
}

impl Opcode {
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    #[must_use]
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub(crate) fn operand(self) -> Operand {
        match self {
            Self::LoadConst => Operand::Const,
            Self::StoreName
            | Self::DeleteName
            | Self::StoreAttr
            | Self::DeleteAttr
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadName
            | Self::LoadAttr
            | Self::LoadGlobal
            | Self::LoadMethod => Operand::Name,
            Self::LoadFast | Self::StoreFast | Self::DeleteFast => Operand::Local,
            Self::LoadClosure | Self::LoadDeref | Self::StoreDeref | Self::DeleteDeref | Self::LoadClassderef => {
                Operand::Cell
            }
            Self::JumpForward | Self::ForIter | Self::SetupFinally | Self::SetupWith | Self::SetupLoop => {
                Operand::RelativeJump
            }
            Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::JumpAbsolute
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::JumpIfNotExcMatch => Operand::AbsoluteJump,
            op if op.has_arg() => Operand::Immediate,
            _ => Operand::None,
        }
    }
}

/// The comparison selected by `COMPARE_OP`'s argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub(crate) enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// `MAKE_FUNCTION` argument bits, naming the extra values below the code object.
pub(crate) mod make_function {
    pub const DEFAULTS: u32 = 0x01;
    pub const KWDEFAULTS: u32 = 0x02;
    pub const ANNOTATIONS: u32 = 0x04;
    pub const CLOSURE: u32 = 0x08;
}

/// `FORMAT_VALUE` argument bits.
pub(crate) mod format_value {
    pub const CONVERSION_MASK: u32 = 0x03;
    pub const STR: u32 = 0x01;
    pub const REPR: u32 = 0x02;
    pub const ASCII: u32 = 0x03;
    pub const HAS_SPEC: u32 = 0x04;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_numbers_round_trip() {
        assert_eq!(Opcode::from_byte(100), Some(Opcode::LoadConst));
        assert_eq!(Opcode::LoadConst.name(), "LOAD_CONST");
        assert_eq!(Opcode::CallFunctionKw.name(), "CALL_FUNCTION_KW");
        assert_eq!(Opcode::LoadClassderef.name(), "LOAD_CLASSDEREF");
        assert_eq!(Opcode::from_byte(0), None);
        assert!(!Opcode::ReturnValue.has_arg());
        assert!(Opcode::StoreName.has_arg());
    }

    #[test]
    fn operands_are_classified() {
        assert_eq!(Opcode::ForIter.operand(), Operand::RelativeJump);
        assert_eq!(Opcode::PopJumpIfTrue.operand(), Operand::AbsoluteJump);
        assert_eq!(Opcode::LoadDeref.operand(), Operand::Cell);
        assert_eq!(Opcode::CallFunction.operand(), Operand::Immediate);
        assert_eq!(Opcode::PopTop.operand(), Operand::None);
    }
}
