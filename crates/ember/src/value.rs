use std::{borrow::Cow, cmp::Ordering, fmt::Write};

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::{
    builtins::Builtins,
    exception_private::ExcType,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceTracker},
    types::{IterKind, Type, str::string_repr},
};

/// Primary value type representing Python objects at runtime.
///
/// Small immediate values (None, bools, small ints, floats, interned strings, builtins)
/// are stored inline, everything else lives in the heap arena and is referenced via
/// `Ref(HeapId)`. Immediates behave as immortal objects: retaining or releasing them
/// never changes anything.
///
/// NOTE: `Clone` is intentionally NOT derived. Use `clone_with_heap()` for heap values
/// or `clone_immediate()` for immediate values only. Direct cloning would bypass
/// reference counting.
#[derive(Debug)]
pub(crate) enum Value {
    /// An unbound local slot or an empty cell. Never visible to Python code.
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// An interned string. The StringId references the string in the Interns table.
    InternString(StringId),
    /// A builtin function, type, exception class or unbound builtin method.
    Builtin(Builtins),
    /// A function provided by the host, identified by its interned name.
    HostFunction(StringId),
    Ref(HeapId),

    /// Sentinel value indicating this Value was properly cleaned up via `drop_with_heap`.
    /// Only exists when `ref-count-panic` feature is enabled. If a `Ref` variant is dropped
    /// without calling `drop_with_heap`, the Drop impl will panic.
    #[cfg(feature = "ref-count-panic")]
    Dereferenced,
}

/// Drop implementation that panics if a `Ref` variant is dropped without calling `drop_with_heap`.
#[cfg(feature = "ref-count-panic")]
impl Drop for Value {
    fn drop(&mut self) {
        if let Self::Ref(id) = self {
            panic!("Value::Ref({id:?}) dropped without calling drop_with_heap() - this is a reference counting bug");
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Builtins> for Value {
    fn from(b: Builtins) -> Self {
        Self::Builtin(b)
    }
}

impl From<ExcType> for Value {
    fn from(exc_type: ExcType) -> Self {
        Self::Builtin(Builtins::ExcType(exc_type))
    }
}

impl From<Type> for Value {
    fn from(t: Type) -> Self {
        Self::Builtin(Builtins::Type(t))
    }
}

impl Value {
    /// Clones a value with proper heap reference counting.
    ///
    /// For immediate values this performs a simple copy. For `Ref` this increments
    /// the reference count and returns a new reference to the same heap value.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &Heap<impl ResourceTracker>) -> Self {
        match self {
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
            other => other.clone_immediate(),
        }
    }

    /// Drops a value, decrementing its heap reference count if applicable.
    ///
    /// This method MUST be called before overwriting a slot or discarding a value.
    #[cfg(not(feature = "ref-count-panic"))]
    #[inline]
    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// With `ref-count-panic` enabled, `Ref` variants are replaced with `Dereferenced` and
    /// the original is forgotten to prevent the Drop impl from panicking.
    #[cfg(feature = "ref-count-panic")]
    pub fn drop_with_heap(mut self, heap: &mut Heap<impl ResourceTracker>) {
        let old = std::mem::replace(&mut self, Self::Dereferenced);
        if let Self::Ref(id) = &old {
            heap.dec_ref(*id);
            std::mem::forget(old);
        }
    }

    /// Copies an immediate value.
    ///
    /// # Panics
    /// Panics for `Ref`, which must go through `clone_with_heap`.
    pub fn clone_immediate(&self) -> Self {
        match self {
            Self::Ref(_) => panic!("Ref clones must go through clone_with_heap to maintain refcounts"),
            _ => self.copy_for_extend(),
        }
    }

    /// Creates a shallow copy of this Value without incrementing reference counts.
    ///
    /// For `Ref` the caller MUST account for the new reference separately.
    pub(crate) fn copy_for_extend(&self) -> Self {
        match self {
            Self::Undefined => Self::Undefined,
            Self::None => Self::None,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(v) => Self::Int(*v),
            Self::Float(v) => Self::Float(*v),
            Self::InternString(s) => Self::InternString(*s),
            Self::Builtin(b) => Self::Builtin(*b),
            Self::HostFunction(name) => Self::HostFunction(*name),
            Self::Ref(id) => Self::Ref(*id),
            #[cfg(feature = "ref-count-panic")]
            Self::Dereferenced => panic!("Cannot copy Dereferenced object"),
        }
    }

    /// Mark as Dereferenced to prevent Drop panic
    ///
    /// This should be called from `py_dec_ref_ids` methods only
    #[cfg(feature = "ref-count-panic")]
    pub fn dec_ref_forget(&mut self) {
        let old = std::mem::replace(self, Self::Dereferenced);
        std::mem::forget(old);
    }

    /// Converts into the heap id, handing the value's reference to the caller.
    pub fn into_ref_id(self) -> Option<HeapId> {
        let id = self.ref_id();
        std::mem::forget(self);
        id
    }

    /// Pushes this value's heap id (if any) for release by the heap, used by `py_dec_ref_ids`.
    #[inline]
    pub fn collect_ref(&mut self, stack: &mut Vec<HeapId>) {
        if let Self::Ref(id) = self {
            stack.push(*id);
            #[cfg(feature = "ref-count-panic")]
            self.dec_ref_forget();
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// The builtin type of this value.
    ///
    /// Instances of user classes report `Type::Object`, exceptions report `Type::Exception`;
    /// callers that need the precise class use the VM's `type_of`.
    pub fn py_type(&self, heap: &Heap<impl ResourceTracker>) -> Type {
        match self {
            Self::Undefined | Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::InternString(_) => Type::Str,
            Self::Builtin(Builtins::Function(_)) | Self::HostFunction(_) => Type::BuiltinFunction,
            Self::Builtin(Builtins::TypeMethod { .. }) => Type::MethodDescriptor,
            Self::Builtin(Builtins::Type(_) | Builtins::ExcType(_)) => Type::Type,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => Type::Str,
                HeapData::LongInt(_) => Type::Int,
                HeapData::List(_) => Type::List,
                HeapData::Tuple(_) => Type::Tuple,
                HeapData::Dict(_) => Type::Dict,
                HeapData::Range(_) => Type::Range,
                HeapData::Slice(_) => Type::Slice,
                HeapData::Iter(iter) => match iter.kind() {
                    IterKind::List => Type::ListIterator,
                    IterKind::Tuple => Type::TupleIterator,
                    IterKind::Str => Type::StrIterator,
                    IterKind::Range { .. } => Type::RangeIterator,
                    IterKind::DictKeys { .. } => Type::DictKeyIterator,
                },
                HeapData::Cell(_) => Type::Cell,
                HeapData::Code(_) => Type::Code,
                HeapData::Function(_) => Type::Function,
                HeapData::BoundMethod(method) => {
                    if matches!(method.func, Self::Builtin(_)) {
                        Type::BuiltinFunction
                    } else {
                        Type::Method
                    }
                }
                HeapData::Class(_) => Type::Type,
                HeapData::Instance(_) => Type::Object,
                HeapData::Exception(_) => Type::Exception,
                HeapData::Traceback(_) => Type::Traceback,
                HeapData::Generator(_) => Type::Generator,
            },
            #[cfg(feature = "ref-count-panic")]
            Self::Dereferenced => panic!("Cannot access Dereferenced object"),
        }
    }

    /// The name of this value's class as shown in error messages.
    pub fn type_name<'a>(&self, heap: &'a Heap<impl ResourceTracker>) -> Cow<'a, str> {
        if let Self::Ref(id) = self {
            match heap.get(*id) {
                HeapData::Instance(instance) => return class_name(&instance.class, heap),
                HeapData::Exception(exc) => return class_name(&exc.class, heap),
                _ => {}
            }
        }
        Cow::Borrowed(self.py_type(heap).into())
    }

    /// Returns the string content for `str` values.
    pub fn as_str<'a>(&'a self, heap: &'a Heap<impl ResourceTracker>, interns: &'a Interns) -> Option<&'a str> {
        match self {
            Self::InternString(id) => Some(interns.get_str(*id)),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integer value for ints and bools that fit in an `i64`.
    #[must_use]
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Arbitrary precision integer value for ints, long ints and bools.
    pub fn as_bigint(&self, heap: &Heap<impl ResourceTracker>) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Bool(b) => Some(BigInt::from(i64::from(*b))),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => Some(li.as_bigint().clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Float value of any number.
    pub fn as_f64(&self, heap: &Heap<impl ResourceTracker>) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Float(f) => Some(*f),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => li.as_bigint().to_f64(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Truthiness for values whose truth does not depend on user code.
    pub fn py_bool(&self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> bool {
        match self {
            Self::Undefined | Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::InternString(id) => !interns.get_str(*id).is_empty(),
            Self::Builtin(_) | Self::HostFunction(_) => true,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => !s.as_str().is_empty(),
                HeapData::LongInt(_) => true,
                HeapData::List(list) => !list.as_slice().is_empty(),
                HeapData::Tuple(tuple) => !tuple.as_slice().is_empty(),
                HeapData::Dict(dict) => !dict.is_empty(),
                HeapData::Range(range) => range.len() != 0,
                _ => true,
            },
            #[cfg(feature = "ref-count-panic")]
            Self::Dereferenced => panic!("Cannot access Dereferenced object"),
        }
    }

    /// Python `is`: heap objects compare by id, immediates by value.
    #[must_use]
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ref(a), Self::Ref(b)) => a == b,
            (Self::None, Self::None) | (Self::Undefined, Self::Undefined) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::InternString(a), Self::InternString(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::HostFunction(a), Self::HostFunction(b)) => a == b,
            _ => false,
        }
    }

    /// A stable identity for `id()` and object reprs.
    #[must_use]
    pub fn py_id(&self) -> u64 {
        const HEAP_BASE: u64 = 0x7f00_0000_0000;
        match self {
            Self::Ref(id) => HEAP_BASE + (id.index() as u64) * 0x40,
            Self::None => 0x10,
            Self::Undefined => 0x18,
            Self::Bool(b) => 0x20 + u64::from(*b) * 8,
            Self::Int(i) => 0x1000_0000 ^ (*i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
            Self::Float(f) => 0x2000_0000 ^ f.to_bits().wrapping_mul(0x9E37_79B9_7F4A_7C15),
            Self::InternString(s) => 0x3000_0000 + s.index() as u64 * 8,
            Self::Builtin(b) => 0x4000_0000 + b.ordinal() * 8,
            Self::HostFunction(s) => 0x5000_0000 + s.index() as u64 * 8,
            #[cfg(feature = "ref-count-panic")]
            Self::Dereferenced => 0,
        }
    }

    /// `repr(value)` for values whose repr does not depend on user code.
    pub fn py_repr(&self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> String {
        let mut out = String::new();
        let mut seen = Vec::new();
        self.repr_into(&mut out, heap, interns, &mut seen);
        out
    }

    /// `str(value)`: the raw content for strings, the repr otherwise.
    pub fn py_str(&self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> String {
        if let Some(s) = self.as_str(heap, interns) {
            return s.to_owned();
        }
        if let Self::Ref(id) = self
            && let HeapData::Exception(exc) = heap.get(*id)
        {
            return exc.str_message(heap, interns);
        }
        self.py_repr(heap, interns)
    }

    fn repr_into(&self, out: &mut String, heap: &Heap<impl ResourceTracker>, interns: &Interns, seen: &mut Vec<HeapId>) {
        match self {
            Self::Undefined => out.push_str("<undefined>"),
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::InternString(id) => out.push_str(&string_repr(interns.get_str(*id))),
            Self::Builtin(b) => b.repr_into(out),
            Self::HostFunction(name) => {
                let _ = write!(out, "<built-in function {}>", interns.get_str(*name));
            }
            Self::Ref(id) => {
                if seen.contains(id) || seen.len() >= usize::from(MAX_DATA_RECURSION_DEPTH) {
                    out.push_str(match heap.get(*id) {
                        HeapData::List(_) => "[...]",
                        HeapData::Dict(_) => "{...}",
                        _ => "...",
                    });
                    return;
                }
                seen.push(*id);
                self.repr_heap_into(*id, out, heap, interns, seen);
                seen.pop();
            }
            #[cfg(feature = "ref-count-panic")]
            Self::Dereferenced => out.push_str("<dereferenced>"),
        }
    }

    fn repr_heap_into(
        &self,
        id: HeapId,
        out: &mut String,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        seen: &mut Vec<HeapId>,
    ) {
        let addr = self.py_id();
        match heap.get(id) {
            HeapData::Str(s) => out.push_str(&string_repr(s.as_str())),
            HeapData::LongInt(li) => {
                let _ = write!(out, "{}", li.as_bigint());
            }
            HeapData::List(list) => {
                out.push('[');
                repr_sequence(list.as_slice(), out, heap, interns, seen);
                out.push(']');
            }
            HeapData::Tuple(tuple) => {
                out.push('(');
                repr_sequence(tuple.as_slice(), out, heap, interns, seen);
                if tuple.as_slice().len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            HeapData::Dict(dict) => {
                out.push('{');
                for (index, (key, value)) in dict.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    key.repr_into(out, heap, interns, seen);
                    out.push_str(": ");
                    value.repr_into(out, heap, interns, seen);
                }
                out.push('}');
            }
            HeapData::Range(range) => {
                if range.step == 1 {
                    let _ = write!(out, "range({}, {})", range.start, range.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", range.start, range.stop, range.step);
                }
            }
            HeapData::Slice(slice) => {
                out.push_str("slice(");
                slice.start.repr_into(out, heap, interns, seen);
                out.push_str(", ");
                slice.stop.repr_into(out, heap, interns, seen);
                out.push_str(", ");
                slice.step.repr_into(out, heap, interns, seen);
                out.push(')');
            }
            HeapData::Iter(_) => {
                let _ = write!(out, "<{} object at {addr:#x}>", self.py_type(heap));
            }
            HeapData::Cell(cell) => {
                if cell.value.is_undefined() {
                    let _ = write!(out, "<cell at {addr:#x}: empty>");
                } else {
                    let _ = write!(
                        out,
                        "<cell at {addr:#x}: {} object at {:#x}>",
                        cell.value.type_name(heap),
                        cell.value.py_id()
                    );
                }
            }
            HeapData::Code(code) => {
                let body = &code.body;
                let _ = write!(
                    out,
                    "<code object {} at {addr:#x}, file \"{}\", line {}>",
                    interns.get_str(body.name),
                    interns.get_str(body.filename),
                    body.first_lineno
                );
            }
            HeapData::Function(func) => {
                let _ = write!(out, "<function {} at {addr:#x}>", func.qualname);
            }
            HeapData::BoundMethod(method) => match &method.func {
                Self::Builtin(Builtins::TypeMethod { method: name, .. }) => {
                    let name: &'static str = (*name).into();
                    let _ = write!(
                        out,
                        "<built-in method {name} of {} object at {:#x}>",
                        method.receiver.type_name(heap),
                        method.receiver.py_id()
                    );
                }
                func => {
                    let name = match func.ref_id().map(|id| heap.get(id)) {
                        Some(HeapData::Function(f)) => f.qualname.clone(),
                        _ => func.py_repr(heap, interns),
                    };
                    out.push_str("<bound method ");
                    out.push_str(&name);
                    out.push_str(" of ");
                    method.receiver.repr_into(out, heap, interns, seen);
                    out.push('>');
                }
            },
            HeapData::Class(class) => {
                let _ = write!(out, "<class '{}.{}'>", class.module, class.qualname);
            }
            HeapData::Instance(instance) => {
                let module = match instance.class.ref_id().map(|class_id| heap.get(class_id)) {
                    Some(HeapData::Class(class)) => class.module.as_str(),
                    _ => "builtins",
                };
                let _ = write!(
                    out,
                    "<{module}.{} object at {addr:#x}>",
                    class_name(&instance.class, heap)
                );
            }
            HeapData::Exception(exc) => {
                out.push_str(&class_name(&exc.class, heap));
                out.push('(');
                repr_sequence(&exc.args, out, heap, interns, seen);
                out.push(')');
            }
            HeapData::Traceback(_) => {
                let _ = write!(out, "<traceback object at {addr:#x}>");
            }
            HeapData::Generator(generator) => {
                let _ = write!(
                    out,
                    "<generator object {} at {addr:#x}>",
                    generator.qualname
                );
            }
        }
    }

    /// Equality for builtin values.
    ///
    /// Numbers compare across int, bool and float; containers compare element-wise;
    /// everything else compares by identity.
    pub fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> bool {
        self.eq_depth(other, heap, interns, MAX_DATA_RECURSION_DEPTH)
    }

    fn eq_depth(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: u16) -> bool {
        if self.is_identical(other) && !matches!(self, Self::Float(f) if f.is_nan()) {
            return true;
        }
        if depth == 0 {
            return false;
        }
        if let (Some(a), Some(b)) = (self.as_str(heap, interns), other.as_str(heap, interns)) {
            return a == b;
        }
        if let Some(ordering) = numeric_cmp(self, other, heap) {
            return ordering == Ordering::Equal;
        }
        let (Self::Ref(a), Self::Ref(b)) = (self, other) else {
            return false;
        };
        match (heap.get(*a), heap.get(*b)) {
            (HeapData::List(x), HeapData::List(y)) => seq_eq(x.as_slice(), y.as_slice(), heap, interns, depth),
            (HeapData::Tuple(x), HeapData::Tuple(y)) => seq_eq(x.as_slice(), y.as_slice(), heap, interns, depth),
            (HeapData::Dict(x), HeapData::Dict(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(key, value)| {
                        y.iter().any(|(other_key, other_value)| {
                            key.eq_depth(other_key, heap, interns, depth - 1)
                                && value.eq_depth(other_value, heap, interns, depth - 1)
                        })
                    })
            }
            (HeapData::Range(x), HeapData::Range(y)) => x == y,
            _ => false,
        }
    }

    /// Ordering for builtin values, `None` when the pair is unordered.
    pub fn py_cmp(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Option<Ordering> {
        if let Some(ordering) = numeric_cmp(self, other, heap) {
            return Some(ordering);
        }
        if let (Some(a), Some(b)) = (self.as_str(heap, interns), other.as_str(heap, interns)) {
            return Some(a.cmp(b));
        }
        let (Self::Ref(a), Self::Ref(b)) = (self, other) else {
            return None;
        };
        let (x, y) = match (heap.get(*a), heap.get(*b)) {
            (HeapData::List(x), HeapData::List(y)) => (x.as_slice(), y.as_slice()),
            (HeapData::Tuple(x), HeapData::Tuple(y)) => (x.as_slice(), y.as_slice()),
            _ => return None,
        };
        for (left, right) in x.iter().zip(y) {
            if !left.py_eq(right, heap, interns) {
                return left.py_cmp(right, heap, interns);
            }
        }
        Some(x.len().cmp(&y.len()))
    }
}

/// The `__name__` of a class value, builtin or user defined.
pub(crate) fn class_name<'a>(class: &Value, heap: &'a Heap<impl ResourceTracker>) -> Cow<'a, str> {
    match class {
        Value::Builtin(Builtins::ExcType(t)) => Cow::Borrowed((*t).into()),
        Value::Builtin(Builtins::Type(t)) => Cow::Borrowed((*t).into()),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Class(class) => Cow::Borrowed(class.name.as_str()),
            _ => Cow::Borrowed("object"),
        },
        _ => Cow::Borrowed("object"),
    }
}

fn repr_sequence(
    items: &[Value],
    out: &mut String,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    seen: &mut Vec<HeapId>,
) {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        item.repr_into(out, heap, interns, seen);
    }
}

fn seq_eq(x: &[Value], y: &[Value], heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: u16) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| a.eq_depth(b, heap, interns, depth - 1))
}

/// Compares two numbers of any numeric type, `None` if either isn't a number.
fn numeric_cmp(a: &Value, b: &Value, heap: &Heap<impl ResourceTracker>) -> Option<Ordering> {
    match (a, b) {
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let x = a.as_f64(heap)?;
            let y = b.as_f64(heap)?;
            x.partial_cmp(&y)
        }
        _ => match (a.as_index(), b.as_index()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(a.as_bigint(heap)?.cmp(&b.as_bigint(heap)?)),
        },
    }
}

/// Formats a float the way Python's `repr` does: shortest round-trip digits, with an
/// exponent outside `1e-4 <= |f| < 1e16`.
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let formatted = format!("{f:e}");
    let (mantissa, exp) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => ("-", m),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    if (-4..16).contains(&exp) {
        let point = exp + 1;
        if point <= 0 {
            format!("{sign}0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
        } else {
            let point = point as usize;
            if point >= digits.len() {
                format!("{sign}{digits}{}.0", "0".repeat(point - digits.len()))
            } else {
                format!("{sign}{}.{}", &digits[..point], &digits[point..])
            }
        }
    } else {
        let (first, rest) = digits.split_at(1);
        let exp_sign = if exp < 0 { '-' } else { '+' };
        if rest.is_empty() {
            format!("{sign}{first}e{exp_sign}{:02}", exp.abs())
        } else {
            format!("{sign}{first}.{rest}e{exp_sign}{:02}", exp.abs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_repr_matches_python() {
        assert_eq!(float_repr(0.0), "0.0");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(1.5), "1.5");
        assert_eq!(float_repr(123.456), "123.456");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.00001), "1e-05");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.25e20), "1.25e+20");
        assert_eq!(float_repr(f64::INFINITY), "inf");
        assert_eq!(float_repr(f64::NAN), "nan");
    }

    #[test]
    fn immediates_compare_by_value_for_identity() {
        assert!(Value::Int(5).is_identical(&Value::Int(5)));
        assert!(!Value::Int(5).is_identical(&Value::Bool(true)));
        assert!(Value::None.is_identical(&Value::None));
    }
}
