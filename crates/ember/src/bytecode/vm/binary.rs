//! Unary, binary and in-place operators.
//!
//! Operators follow the dunder protocol in two steps:
//! 1. The native implementation for builtin values (ints promote to `LongInt` on
//!    overflow instead of wrapping).
//! 2. For instances of user classes, the forward dunder on the left operand and then the
//!    reflected dunder on the right one. In-place opcodes try `__iadd__` and friends first.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

use super::VM;
use crate::{
    args::CallArgs,
    bytecode::op::Opcode,
    exception_private::{ExcType, RunError, RunResult},
    heap::HeapData,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{LongInt, allocate_list, allocate_str, allocate_tuple},
    value::Value,
};

/// Largest shift or exponent applied to a big integer.
const MAX_BIGINT_EXPONENT: u32 = 1 << 20;

/// A binary operator, shared by the `BINARY_*` and `INPLACE_*` opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Pow,
    Mod,
    FloorDiv,
    TrueDiv,
    LShift,
    RShift,
    And,
    Xor,
    Or,
}

impl BinOp {
    /// The operator an opcode performs and whether it is the in-place form.
    pub fn from_opcode(op: Opcode) -> Option<(Self, bool)> {
        Some(match op {
            Opcode::BinaryAdd => (Self::Add, false),
            Opcode::BinarySubtract => (Self::Sub, false),
            Opcode::BinaryMultiply => (Self::Mul, false),
            Opcode::BinaryPower => (Self::Pow, false),
            Opcode::BinaryModulo => (Self::Mod, false),
            Opcode::BinaryFloorDivide => (Self::FloorDiv, false),
            Opcode::BinaryTrueDivide => (Self::TrueDiv, false),
            Opcode::BinaryLshift => (Self::LShift, false),
            Opcode::BinaryRshift => (Self::RShift, false),
            Opcode::BinaryAnd => (Self::And, false),
            Opcode::BinaryXor => (Self::Xor, false),
            Opcode::BinaryOr => (Self::Or, false),
            Opcode::InplaceAdd => (Self::Add, true),
            Opcode::InplaceSubtract => (Self::Sub, true),
            Opcode::InplaceMultiply => (Self::Mul, true),
            Opcode::InplacePower => (Self::Pow, true),
            Opcode::InplaceModulo => (Self::Mod, true),
            Opcode::InplaceFloorDivide => (Self::FloorDiv, true),
            Opcode::InplaceTrueDivide => (Self::TrueDiv, true),
            Opcode::InplaceLshift => (Self::LShift, true),
            Opcode::InplaceRshift => (Self::RShift, true),
            Opcode::InplaceAnd => (Self::And, true),
            Opcode::InplaceXor => (Self::Xor, true),
            Opcode::InplaceOr => (Self::Or, true),
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Pow => "** or pow()",
            Self::Mod => "%",
            Self::FloorDiv => "//",
            Self::TrueDiv => "/",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::And => "&",
            Self::Xor => "^",
            Self::Or => "|",
        }
    }

    fn inplace_symbol(self) -> String {
        match self {
            Self::Pow => "**=".to_owned(),
            _ => format!("{}=", self.symbol()),
        }
    }

    /// `(forward, reflected, in-place)` dunder names.
    fn dunders(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Add => ("__add__", "__radd__", "__iadd__"),
            Self::Sub => ("__sub__", "__rsub__", "__isub__"),
            Self::Mul => ("__mul__", "__rmul__", "__imul__"),
            Self::Pow => ("__pow__", "__rpow__", "__ipow__"),
            Self::Mod => ("__mod__", "__rmod__", "__imod__"),
            Self::FloorDiv => ("__floordiv__", "__rfloordiv__", "__ifloordiv__"),
            Self::TrueDiv => ("__truediv__", "__rtruediv__", "__itruediv__"),
            Self::LShift => ("__lshift__", "__rlshift__", "__ilshift__"),
            Self::RShift => ("__rshift__", "__rrshift__", "__irshift__"),
            Self::And => ("__and__", "__rand__", "__iand__"),
            Self::Xor => ("__xor__", "__rxor__", "__ixor__"),
            Self::Or => ("__or__", "__ror__", "__ior__"),
        }
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `UNARY_POSITIVE`, `UNARY_NEGATIVE` and `UNARY_INVERT`.
    pub(super) fn unary_op(&mut self, op: Opcode, operand: &Value) -> RunResult<Value> {
        let (symbol, dunder) = match op {
            Opcode::UnaryPositive => ("+", "__pos__"),
            Opcode::UnaryNegative => ("-", "__neg__"),
            _ => ("~", "__invert__"),
        };
        match (op, operand) {
            (Opcode::UnaryPositive, Value::Int(_) | Value::Float(_)) => return Ok(operand.clone_immediate()),
            (Opcode::UnaryPositive, Value::Bool(b)) => return Ok(Value::Int(i64::from(*b))),
            (Opcode::UnaryNegative, Value::Float(f)) => return Ok(Value::Float(-f)),
            (Opcode::UnaryNegative, Value::Int(i)) if *i != i64::MIN => return Ok(Value::Int(-i)),
            (Opcode::UnaryNegative, Value::Bool(b)) => return Ok(Value::Int(-i64::from(*b))),
            (Opcode::UnaryInvert, Value::Int(i)) => return Ok(Value::Int(!i)),
            (Opcode::UnaryInvert, Value::Bool(b)) => return Ok(Value::Int(!i64::from(*b))),
            _ => {}
        }
        if !matches!(operand, Value::Float(_))
            && let Some(big) = operand.as_bigint(self.heap)
        {
            let result = match op {
                Opcode::UnaryPositive => big,
                Opcode::UnaryNegative => -big,
                _ => !big,
            };
            return Ok(LongInt::new(result).into_value(self.heap)?);
        }
        if let Some(method) = self.lookup_special(operand, dunder)? {
            return self.call_value(method, CallArgs::default());
        }
        Err(ExcType::unary_type_error(symbol, &operand.type_name(self.heap)))
    }

    /// Every `BINARY_*` and `INPLACE_*` arithmetic opcode.
    pub(super) fn binary_opcode(&mut self, op: Opcode, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        let Some((bin, inplace)) = BinOp::from_opcode(op) else {
            return Err(RunError::internal("binary_opcode: not an operator"));
        };
        if inplace {
            self.inplace_op(bin, lhs, rhs)
        } else {
            self.binary_op(bin, lhs, rhs)
        }
    }

    /// `lhs <op> rhs`.
    pub(crate) fn binary_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if let Some(result) = self.native_binary(op, lhs, rhs)? {
            return Ok(result);
        }
        if let Some(result) = self.binary_dunder(op, lhs, rhs)? {
            return Ok(result);
        }
        Err(ExcType::binary_type_error(
            op.symbol(),
            &lhs.type_name(self.heap),
            &rhs.type_name(self.heap),
        ))
    }

    fn inplace_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        // `list += iterable` extends in place and keeps the identity of the list.
        if op == BinOp::Add
            && let Some(id) = lhs.ref_id()
            && matches!(self.heap.get(id), HeapData::List(_))
        {
            let items = self.collect_iterable(rhs.clone_with_heap(self.heap))?;
            self.list_extend_items(id, items)?;
            return Ok(lhs.clone_with_heap(self.heap));
        }
        let (_, _, inplace) = op.dunders();
        if let Some(method) = self.lookup_special(lhs, inplace)? {
            let arg = rhs.clone_with_heap(self.heap);
            return self.call_value(method, CallArgs::positional([arg]));
        }
        if let Some(result) = self.native_binary(op, lhs, rhs)? {
            return Ok(result);
        }
        if let Some(result) = self.binary_dunder(op, lhs, rhs)? {
            return Ok(result);
        }
        Err(ExcType::binary_type_error(
            &op.inplace_symbol(),
            &lhs.type_name(self.heap),
            &rhs.type_name(self.heap),
        ))
    }

    /// Forward dunder on `lhs`, then the reflected one on `rhs`.
    fn binary_dunder(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        let (forward, reflected, _) = op.dunders();
        if let Some(method) = self.lookup_special(lhs, forward)? {
            let arg = rhs.clone_with_heap(self.heap);
            return self.call_value(method, CallArgs::positional([arg])).map(Some);
        }
        if let Some(method) = self.lookup_special(rhs, reflected)? {
            let arg = lhs.clone_with_heap(self.heap);
            return self.call_value(method, CallArgs::positional([arg])).map(Some);
        }
        Ok(None)
    }

    /// The builtin implementation, `None` when the operand types don't support `op`.
    fn native_binary(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        match (lhs, rhs) {
            (Value::Bool(a), Value::Bool(b)) if matches!(op, BinOp::And | BinOp::Or | BinOp::Xor) => {
                return Ok(Some(Value::Bool(match op {
                    BinOp::And => a & b,
                    BinOp::Or => a | b,
                    _ => a ^ b,
                })));
            }
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                return match (lhs.as_f64(self.heap), rhs.as_f64(self.heap)) {
                    (Some(a), Some(b)) => float_op(op, a, b),
                    _ => self.sequence_op(op, lhs, rhs),
                };
            }
            _ => {}
        }
        if let (Some(a), Some(b)) = (lhs.as_index(), rhs.as_index()) {
            if let Some(result) = int_op(op, a, b)? {
                return Ok(Some(result));
            }
            return self.bigint_op(op, BigInt::from(a), BigInt::from(b));
        }
        if let (Some(a), Some(b)) = (lhs.as_bigint(self.heap), rhs.as_bigint(self.heap)) {
            return self.bigint_op(op, a, b);
        }
        self.sequence_op(op, lhs, rhs)
    }

    fn bigint_op(&mut self, op: BinOp, a: BigInt, b: BigInt) -> RunResult<Option<Value>> {
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::FloorDiv | BinOp::Mod if b.is_zero() => {
                return Err(ExcType::zero_division("integer division or modulo by zero"));
            }
            BinOp::FloorDiv => a.div_floor(&b),
            BinOp::Mod => a.mod_floor(&b),
            BinOp::TrueDiv => {
                if b.is_zero() {
                    return Err(ExcType::zero_division("division by zero"));
                }
                let (Some(x), Some(y)) = (a.to_f64(), b.to_f64()) else {
                    return Err(ExcType::overflow_error("integer division result too large for a float"));
                };
                return Ok(Some(Value::Float(x / y)));
            }
            BinOp::Pow => {
                if b.is_negative() {
                    let (Some(x), Some(y)) = (a.to_f64(), b.to_f64()) else {
                        return Err(ExcType::overflow_error("int too large to convert to float"));
                    };
                    return float_op(BinOp::Pow, x, y);
                }
                let exponent = b
                    .to_u32()
                    .filter(|e| *e <= MAX_BIGINT_EXPONENT)
                    .ok_or_else(|| ExcType::overflow_error("exponent too large"))?;
                Pow::pow(a, exponent)
            }
            BinOp::LShift | BinOp::RShift => {
                if b.is_negative() {
                    return Err(ExcType::value_error("negative shift count"));
                }
                let count = b.to_u32().unwrap_or(u32::MAX);
                if op == BinOp::RShift {
                    if count > MAX_BIGINT_EXPONENT {
                        BigInt::from(if a.is_negative() { -1 } else { 0 })
                    } else {
                        a >> count
                    }
                } else if a.is_zero() {
                    a
                } else if count > MAX_BIGINT_EXPONENT {
                    return Err(ExcType::overflow_error("too many digits in integer"));
                } else {
                    a << count
                }
            }
            BinOp::And => a & b,
            BinOp::Xor => a ^ b,
            BinOp::Or => a | b,
        };
        Ok(Some(LongInt::new(result).into_value(self.heap)?))
    }

    /// Concatenation and repetition of strings, lists and tuples.
    fn sequence_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        match op {
            BinOp::Add => {
                if let (Some(a), Some(b)) = (lhs.as_str(self.heap, self.interns), rhs.as_str(self.heap, self.interns)) {
                    let joined = format!("{a}{b}");
                    return allocate_str(self.heap, joined).map(Some);
                }
                let (Some(a), Some(b)) = (lhs.ref_id(), rhs.ref_id()) else {
                    return Ok(None);
                };
                match (self.heap.get(a), self.heap.get(b)) {
                    (HeapData::List(x), HeapData::List(y)) => {
                        let items = concat(x.as_slice(), y.as_slice(), self);
                        allocate_list(self.heap, items).map(Some)
                    }
                    (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                        let items = concat(x.as_slice(), y.as_slice(), self);
                        allocate_tuple(self.heap, items).map(Some)
                    }
                    _ => Ok(None),
                }
            }
            BinOp::Mul => {
                let (seq, count) = match (lhs.as_index(), rhs.as_index()) {
                    (None, Some(n)) => (lhs, n),
                    (Some(n), None) => (rhs, n),
                    _ => return Ok(None),
                };
                self.repeat(seq, count)
            }
            _ => Ok(None),
        }
    }

    fn repeat(&mut self, seq: &Value, count: i64) -> RunResult<Option<Value>> {
        let count = usize::try_from(count).unwrap_or(0);
        if let Some(s) = seq.as_str(self.heap, self.interns) {
            let Some(total) = s.len().checked_mul(count) else {
                return Err(ExcType::overflow_error("repeated string is too long"));
            };
            self.heap.tracker().check_large_result(total)?;
            let repeated = s.repeat(count);
            return allocate_str(self.heap, repeated).map(Some);
        }
        let Some(id) = seq.ref_id() else {
            return Ok(None);
        };
        let (items, is_list) = match self.heap.get(id) {
            HeapData::List(list) => (list.as_slice(), true),
            HeapData::Tuple(tuple) => (tuple.as_slice(), false),
            _ => return Ok(None),
        };
        let Some(total) = items.len().checked_mul(count) else {
            return Err(ExcType::overflow_error("repeated sequence is too long"));
        };
        self.heap
            .tracker()
            .check_large_result(total.saturating_mul(std::mem::size_of::<Value>()))?;
        let mut repeated = Vec::with_capacity(total);
        for _ in 0..count {
            repeated.extend(items.iter().map(|item| item.clone_with_heap(self.heap)));
        }
        if is_list {
            allocate_list(self.heap, repeated).map(Some)
        } else {
            allocate_tuple(self.heap, repeated).map(Some)
        }
    }
}

fn concat<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    x: &[Value],
    y: &[Value],
    vm: &VM<'_, T, P, Tr>,
) -> Vec<Value> {
    x.iter().chain(y).map(|item| item.clone_with_heap(vm.heap)).collect()
}

/// `i64` arithmetic; `Ok(None)` when the result needs a big integer.
fn int_op(op: BinOp, a: i64, b: i64) -> RunResult<Option<Value>> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::FloorDiv | BinOp::Mod if b == 0 => {
            return Err(ExcType::zero_division("integer division or modulo by zero"));
        }
        BinOp::FloorDiv => a.checked_div(b).map(|q| if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q }),
        BinOp::Mod => a.checked_rem(b).map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r }),
        BinOp::TrueDiv => {
            if b == 0 {
                return Err(ExcType::zero_division("division by zero"));
            }
            return Ok(Some(Value::Float(a as f64 / b as f64)));
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(BinOp::Pow, a as f64, b as f64);
            }
            u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
        }
        BinOp::LShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            u32::try_from(b)
                .ok()
                .filter(|count| *count < 63)
                .and_then(|count| a.checked_mul(1_i64 << count))
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            Some(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinOp::And => Some(a & b),
        BinOp::Xor => Some(a ^ b),
        BinOp::Or => Some(a | b),
    };
    Ok(result.map(Value::Int))
}

/// Float arithmetic with Python's zero division errors and floor semantics.
fn float_op(op: BinOp, a: f64, b: f64) -> RunResult<Option<Value>> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::TrueDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float divmod()"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
        BinOp::LShift | BinOp::RShift | BinOp::And | BinOp::Xor | BinOp::Or => return Ok(None),
    };
    Ok(Some(Value::Float(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: RunResult<Option<Value>>) -> Option<i64> {
        value.ok().flatten().and_then(|v| v.as_index())
    }

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert_eq!(int(int_op(BinOp::FloorDiv, 7, 2)), Some(3));
        assert_eq!(int(int_op(BinOp::FloorDiv, -7, 2)), Some(-4));
        assert_eq!(int(int_op(BinOp::Mod, -7, 2)), Some(1));
        assert_eq!(int(int_op(BinOp::Mod, 7, -2)), Some(-1));
    }

    #[test]
    fn overflow_defers_to_big_integers() {
        assert!(matches!(int_op(BinOp::Add, i64::MAX, 1), Ok(None)));
        assert!(matches!(int_op(BinOp::Mul, i64::MAX, 2), Ok(None)));
        assert!(matches!(int_op(BinOp::LShift, 1, 64), Ok(None)));
        assert!(matches!(int_op(BinOp::FloorDiv, i64::MIN, -1), Ok(None)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(int_op(BinOp::TrueDiv, 1, 0).is_err());
        assert!(int_op(BinOp::Mod, 1, 0).is_err());
        assert!(float_op(BinOp::TrueDiv, 1.0, 0.0).is_err());
    }
}
