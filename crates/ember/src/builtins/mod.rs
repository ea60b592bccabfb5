//! Builtin functions, types and exception classes.
//!
//! Builtins are immediate values, `Value::Builtin(Builtins)`, so looking one up never
//! allocates. The builtins namespace handed to every frame is an ordinary dict filled by
//! [`create_builtins`]; host functions registered by the embedder are added to the same
//! dict.
//!
//! Each builtin function has its own submodule. Builtins that may run user code
//! (`repr()` on an instance with `__repr__`, `next()` on a generator) receive the VM,
//! the others only need the heap.

mod build_class;
mod callable;
mod getattr;
mod id;
mod isinstance;
mod iter;
mod len;
pub(crate) mod methods;
mod print;
mod repr;
mod type_;

use std::fmt::Write;

use strum::{Display, EnumIter, EnumString, FromRepr, IntoEnumIterator, IntoStaticStr};

use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings},
    io::PrintWriter,
    resource::{ResourceError, ResourceTracker},
    tracer::VmTracer,
    types::{Dict, ExceptionObject, Type},
    value::Value,
};

/// Every builtin the engine implements natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Builtins {
    /// A builtin function like `print` or `len`.
    Function(BuiltinsFunctions),
    /// An exception class like `ValueError`.
    ExcType(ExcType),
    /// A type like `list` or `range`, callable as its constructor.
    Type(Type),
    /// An unbound method of a builtin type, e.g. `list.append`.
    /// When called the first positional argument is the receiver.
    TypeMethod { ty: Type, method: StaticStrings },
}

impl Builtins {
    /// Calls this builtin.
    pub fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        self,
        vm: &mut VM<'_, T, P, Tr>,
        args: CallArgs,
    ) -> RunResult<Value> {
        match self {
            Self::Function(function) => function.call(vm, args),
            Self::ExcType(exc_type) => call_exc_type(vm.heap, exc_type, args),
            Self::Type(ty) => type_::call_type(vm, ty, args),
            Self::TypeMethod { ty, method } => methods::call_type_method(vm, ty, method, args),
        }
    }

    /// A number unique among builtins, used for `id()`.
    pub fn ordinal(self) -> u64 {
        match self {
            Self::Function(function) => function as u64,
            Self::ExcType(exc_type) => 0x100 + exc_type as u64,
            Self::Type(ty) => 0x200 + ty as u64,
            Self::TypeMethod { ty, method } => 0x1_0000 + ((ty as u64) << 16) + method as u64,
        }
    }

    pub fn repr_into(self, out: &mut String) {
        let _ = match self {
            Self::Function(function) => write!(out, "<built-in function {function}>"),
            Self::ExcType(exc_type) => write!(out, "<class '{exc_type}'>"),
            Self::Type(ty) => write!(out, "<class '{ty}'>"),
            Self::TypeMethod { ty, method } => {
                let method: &'static str = method.into();
                write!(out, "<method '{method}' of '{ty}' objects>")
            }
        };
    }
}

/// Builtin functions, named as they appear in the builtins namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub(crate) enum BuiltinsFunctions {
    Print,
    Len,
    Iter,
    Next,
    Repr,
    Isinstance,
    Issubclass,
    Id,
    Callable,
    Getattr,
    Setattr,
    Hasattr,
    #[strum(serialize = "__build_class__")]
    BuildClass,
}

impl BuiltinsFunctions {
    fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        self,
        vm: &mut VM<'_, T, P, Tr>,
        args: CallArgs,
    ) -> RunResult<Value> {
        match self {
            Self::Print => print::builtin_print(vm, args),
            Self::Len => len::builtin_len(vm, args),
            Self::Iter => iter::builtin_iter(vm, args),
            Self::Next => iter::builtin_next(vm, args),
            Self::Repr => repr::builtin_repr(vm, args),
            Self::Isinstance => isinstance::builtin_isinstance(vm, args),
            Self::Issubclass => isinstance::builtin_issubclass(vm.heap, args),
            Self::Id => id::builtin_id(vm.heap, args),
            Self::Callable => callable::builtin_callable(vm.heap, args),
            Self::Getattr => getattr::builtin_getattr(vm, args),
            Self::Setattr => getattr::builtin_setattr(vm, args),
            Self::Hasattr => getattr::builtin_hasattr(vm, args),
            Self::BuildClass => build_class::builtin_build_class(vm, args),
        }
    }
}

/// Types reachable by name from Python code.
const NAMED_TYPES: [Type; 11] = [
    Type::Object,
    Type::Type,
    Type::Bool,
    Type::Int,
    Type::Float,
    Type::Str,
    Type::List,
    Type::Tuple,
    Type::Dict,
    Type::Range,
    Type::Slice,
];

/// Allocates the builtins namespace dict.
///
/// Names are interned here, which is why this needs the interner mutably; everything
/// after runs with a shared interner.
pub(crate) fn create_builtins(
    heap: &mut Heap<impl ResourceTracker>,
    interns: &mut Interns,
) -> Result<HeapId, ResourceError> {
    let mut dict = Dict::new();
    for function in BuiltinsFunctions::iter() {
        let name: &'static str = function.into();
        dict.set_name(interns.intern(name), name, Value::Builtin(Builtins::Function(function)));
    }
    for ty in NAMED_TYPES {
        dict.set_name(interns.intern(ty.name()), ty.name(), Value::from(ty));
    }
    for exc_type in ExcType::iter() {
        let name: &'static str = exc_type.into();
        dict.set_name(interns.intern(name), name, Value::from(exc_type));
    }
    heap.allocate(HeapData::Dict(dict))
}

/// Calls a builtin exception class: the positional arguments become `args`.
pub(crate) fn call_exc_type(
    heap: &mut Heap<impl ResourceTracker>,
    exc_type: ExcType,
    args: CallArgs,
) -> RunResult<Value> {
    let name: &'static str = exc_type.into();
    let args = args.positional_only(name, 0, usize::MAX, heap)?;
    let exc = ExceptionObject::new(Value::from(exc_type), args);
    Ok(Value::Ref(heap.allocate(HeapData::Exception(exc))?))
}
