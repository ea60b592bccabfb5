use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};

/// Builtin types.
///
/// Used both to classify values and, for the variants exposed in builtins, as a
/// callable constructor (`list(...)`, `range(...)`).
#[derive(Debug, Clone, Copy, EnumString, EnumIter, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    Object,
    Type,
    #[strum(serialize = "NoneType")]
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Range,
    Slice,
    #[strum(disabled)]
    Function,
    #[strum(disabled)]
    BuiltinFunction,
    #[strum(disabled)]
    MethodDescriptor,
    #[strum(disabled)]
    Method,
    #[strum(disabled)]
    Code,
    #[strum(disabled)]
    Cell,
    #[strum(disabled)]
    Generator,
    #[strum(disabled)]
    Traceback,
    #[strum(disabled)]
    Exception,
    #[strum(disabled)]
    ListIterator,
    #[strum(disabled)]
    TupleIterator,
    #[strum(disabled)]
    StrIterator,
    #[strum(disabled)]
    RangeIterator,
    #[strum(disabled)]
    DictKeyIterator,
}

impl Type {
    /// The `__name__` of the type.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Type => "type",
            Self::NoneType => "NoneType",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Dict => "dict",
            Self::Range => "range",
            Self::Slice => "slice",
            Self::Function => "function",
            Self::BuiltinFunction => "builtin_function_or_method",
            Self::MethodDescriptor => "method_descriptor",
            Self::Method => "method",
            Self::Code => "code",
            Self::Cell => "cell",
            Self::Generator => "generator",
            Self::Traceback => "traceback",
            Self::Exception => "BaseException",
            Self::ListIterator => "list_iterator",
            Self::TupleIterator => "tuple_iterator",
            Self::StrIterator => "str_iterator",
            Self::RangeIterator => "range_iterator",
            Self::DictKeyIterator => "dict_keyiterator",
        }
    }

    /// Checks if a value of type `self` is an instance of `other`.
    ///
    /// Everything is an `object` and `bool` is a subtype of `int`.
    #[must_use]
    pub fn is_instance_of(self, other: Self) -> bool {
        self == other || other == Self::Object || (self == Self::Bool && other == Self::Int)
    }

    /// Whether user classes may inherit from this type.
    #[must_use]
    pub fn is_acceptable_base(self) -> bool {
        matches!(self, Self::Object)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Type> for &'static str {
    fn from(t: Type) -> Self {
        t.name()
    }
}
