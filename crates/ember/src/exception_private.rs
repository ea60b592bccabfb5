use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    intern::StringId,
    resource::ResourceTracker,
};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Builtin exception classes.
///
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    GeneratorExit,
    Exception,
    StopIteration,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    AssertionError,
    AttributeError,
    LookupError,
    IndexError,
    KeyError,
    MemoryError,
    NameError,
    UnboundLocalError,
    #[strum(serialize = "OSError")]
    OSError,
    TimeoutError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    SystemError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// The direct base class, `None` only for `BaseException`.
    #[must_use]
    pub fn base(self) -> Option<Self> {
        Some(match self {
            Self::BaseException => return None,
            Self::SystemExit | Self::KeyboardInterrupt | Self::GeneratorExit | Self::Exception => Self::BaseException,
            Self::ZeroDivisionError | Self::OverflowError => Self::ArithmeticError,
            Self::IndexError | Self::KeyError => Self::LookupError,
            Self::UnboundLocalError => Self::NameError,
            Self::TimeoutError => Self::OSError,
            Self::RecursionError | Self::NotImplementedError => Self::RuntimeError,
            Self::StopIteration
            | Self::ArithmeticError
            | Self::AssertionError
            | Self::AttributeError
            | Self::LookupError
            | Self::MemoryError
            | Self::NameError
            | Self::OSError
            | Self::RuntimeError
            | Self::SystemError
            | Self::TypeError
            | Self::ValueError => Self::Exception,
        })
    }

    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(t) = current {
            if t == handler_type {
                return true;
            }
            current = t.base();
        }
        false
    }

    /// Number of classes between this type and `BaseException`, used to order MROs.
    #[must_use]
    pub fn depth(self) -> usize {
        self.base().map_or(0, |b| b.depth() + 1)
    }

    pub(crate) fn type_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    pub(crate) fn value_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::ValueError, msg).into()
    }

    pub(crate) fn runtime_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::RuntimeError, msg).into()
    }

    pub(crate) fn system_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::SystemError, msg).into()
    }

    pub(crate) fn index_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::IndexError, msg).into()
    }

    pub(crate) fn overflow_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::OverflowError, msg).into()
    }

    pub(crate) fn zero_division(msg: &'static str) -> RunError {
        SimpleException::new_msg(Self::ZeroDivisionError, msg).into()
    }

    /// `AttributeError: 'int' object has no attribute 'foo'`
    pub(crate) fn attribute_error(type_name: &str, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
        .into()
    }

    /// `NameError: name 'x' is not defined`
    pub(crate) fn name_error(name: &str) -> RunError {
        SimpleException::new_msg(Self::NameError, format!("name '{name}' is not defined")).into()
    }

    /// Raised when a fast local or cell variable is read before assignment.
    pub(crate) fn unbound_local_error(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::UnboundLocalError,
            format!("local variable '{name}' referenced before assignment"),
        )
        .into()
    }

    /// Raised when a free variable's cell is empty.
    pub(crate) fn free_var_unbound(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::NameError,
            format!("free variable '{name}' referenced before assignment in enclosing scope"),
        )
        .into()
    }

    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    pub(crate) fn not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    pub(crate) fn unhashable(type_name: &str) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    pub(crate) fn binary_type_error(op: &str, lhs: &str, rhs: &str) -> RunError {
        Self::type_error(format!(
            "unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'"
        ))
    }

    pub(crate) fn unary_type_error(op: &str, operand: &str) -> RunError {
        Self::type_error(format!("bad operand type for unary {op}: '{operand}'"))
    }

    pub(crate) fn compare_type_error(op: &str, lhs: &str, rhs: &str) -> RunError {
        Self::type_error(format!(
            "'{op}' not supported between instances of '{lhs}' and '{rhs}'"
        ))
    }

    /// A bare `StopIteration` with no value.
    pub(crate) fn stop_iteration() -> RunError {
        SimpleException::new_none(Self::StopIteration).into()
    }

    pub(crate) fn generator_already_executing() -> RunError {
        Self::value_error("generator already executing")
    }

    pub(crate) fn generator_send_not_started() -> RunError {
        Self::type_error("can't send non-None value to a just-started generator")
    }

    pub(crate) fn generator_ignored_exit() -> RunError {
        Self::runtime_error("generator ignored GeneratorExit")
    }

    pub(crate) fn no_active_exception() -> RunError {
        Self::runtime_error("No active exception to reraise")
    }

    /// The `GeneratorExit` thrown into a generator by `close()`.
    pub(crate) fn generator_exit() -> RunError {
        SimpleException::new_none(Self::GeneratorExit).into()
    }
}

/// Lightweight representation of a builtin exception that has not been given an
/// object on the heap yet.
///
/// Most runtime errors start life this way and are only materialized when they
/// reach a frame's exception handling (or are caught).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct SimpleException {
    exc_type: ExcType,
    arg: Option<String>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}: {arg}", self.exc_type),
            None => write!(f, "{}", self.exc_type),
        }
    }
}

impl SimpleException {
    /// Creates a new exception with the given type and optional argument message.
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self { exc_type, arg }
    }

    #[must_use]
    pub fn new_msg(exc_type: ExcType, msg: impl Display) -> Self {
        Self::new(exc_type, Some(msg.to_string()))
    }

    #[must_use]
    pub fn new_none(exc_type: ExcType) -> Self {
        Self::new(exc_type, None)
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn arg(&self) -> Option<&String> {
        self.arg.as_ref()
    }

    pub fn into_arg(self) -> Option<String> {
        self.arg
    }
}

/// One traceback line recorded for an exception that never gets a heap object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawStackFrame {
    pub name: StringId,
    pub filename: StringId,
    pub line: u32,
}

/// A raised exception that has not been materialized on the heap.
///
/// `frames` is only filled for uncatchable exceptions, which skip materialization; the
/// first entry is the innermost frame.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionRaise {
    pub exc: SimpleException,
    pub frames: Vec<RawStackFrame>,
}

impl From<SimpleException> for ExceptionRaise {
    fn from(exc: SimpleException) -> Self {
        Self { exc, frames: Vec::new() }
    }
}

/// Runtime error types that can occur during execution.
///
/// - `Internal`: bug in the engine or malformed code object that slipped validation
/// - `Exc`: catchable exception without a heap object yet
/// - `Raised`: catchable exception with an owned reference to its exception object
/// - `UncatchableExc`: exception from resource limits that handlers never see
#[derive(Debug)]
pub(crate) enum RunError {
    Internal(Cow<'static, str>),
    Exc(Box<ExceptionRaise>),
    Raised(HeapId),
    UncatchableExc(Box<ExceptionRaise>),
}

impl From<ExceptionRaise> for RunError {
    fn from(exc: ExceptionRaise) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc.into()))
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the builtin exception type this error carries, for user classes the
    /// builtin exception class they derive from.
    #[cfg(test)]
    pub fn exc_type(&self, heap: &Heap<impl ResourceTracker>) -> Option<ExcType> {
        match self {
            Self::Exc(exc) | Self::UncatchableExc(exc) => Some(exc.exc.exc_type()),
            Self::Raised(id) => match heap.get(*id) {
                HeapData::Exception(exc) => Some(exc.builtin_type(heap)),
                _ => None,
            },
            Self::Internal(_) => None,
        }
    }

    /// Returns true if a handler for the builtin `exc_type` would catch this error.
    pub fn matches(&self, exc_type: ExcType, heap: &Heap<impl ResourceTracker>) -> bool {
        match self {
            Self::Exc(exc) => exc.exc.exc_type().is_subclass_of(exc_type),
            Self::Raised(id) => match heap.get(*id) {
                HeapData::Exception(exc) => exc.is_instance_of(exc_type, heap),
                _ => false,
            },
            Self::Internal(_) | Self::UncatchableExc(_) => false,
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for RunError {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        if let Self::Raised(id) = self {
            heap.dec_ref(id);
        }
    }
}

/// Formats a list of parameter names for error messages.
///
/// Examples:
/// - `["a"]` -> `'a'`
/// - `["a", "b"]` -> `'a' and 'b'`
/// - `["a", "b", "c"]` -> `'a', 'b', and 'c'`
pub(crate) fn format_param_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => format!("'{one}'"),
        [a, b] => format!("'{a}' and '{b}'"),
        [rest @ .., last] => {
            let rest: Vec<_> = rest.iter().map(|n| format!("'{n}'")).collect();
            format!("{}, and '{last}'", rest.join(", "))
        }
    }
}

/// Raised when `raise` is given something that is not an exception class or instance.
pub(crate) fn must_derive_error() -> RunError {
    ExcType::type_error("exceptions must derive from BaseException")
}

/// Raised when the cause in `raise X from Y` is not an exception, `None` excluded.
pub(crate) fn cause_must_derive_error() -> RunError {
    ExcType::type_error("exception causes must derive from BaseException")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_hierarchy_matches_handlers() {
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::GeneratorExit.is_subclass_of(ExcType::BaseException));
        assert!(!ExcType::GeneratorExit.is_subclass_of(ExcType::Exception));
        assert!(ExcType::UnboundLocalError.is_subclass_of(ExcType::NameError));
        assert!(!ExcType::NameError.is_subclass_of(ExcType::UnboundLocalError));
        assert_eq!(ExcType::RecursionError.depth(), 3);
    }

    #[test]
    fn param_names_are_joined_like_cpython() {
        assert_eq!(format_param_names(&["a"]), "'a'");
        assert_eq!(format_param_names(&["a", "b"]), "'a' and 'b'");
        assert_eq!(format_param_names(&["a", "b", "c"]), "'a', 'b', and 'c'");
    }
}
