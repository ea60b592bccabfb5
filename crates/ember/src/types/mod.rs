//! Heap object payloads and the helpers that build them.

pub(crate) mod cell;
pub(crate) mod class;
pub(crate) mod dict;
pub(crate) mod exception;
pub(crate) mod function;
pub(crate) mod generator;
pub(crate) mod iter;
pub(crate) mod list;
pub(crate) mod long_int;
pub(crate) mod range;
pub(crate) mod slice;
pub(crate) mod str;
pub(crate) mod traceback;
pub(crate) mod tuple;
pub(crate) mod r#type;

pub(crate) use cell::Cell;
pub(crate) use class::{ClassObject, Instance, compute_mro, is_class, is_exception_class, is_subclass, lookup_class_attr};
pub(crate) use dict::{Dict, HashKey, dict_set};
pub(crate) use exception::ExceptionObject;
pub(crate) use function::{BoundMethod, Function};
pub use generator::GeneratorState;
pub(crate) use generator::Generator;
pub(crate) use iter::{IterKind, SeqIter};
pub(crate) use list::List;
pub(crate) use long_int::LongInt;
pub(crate) use range::Range;
pub(crate) use slice::Slice;
pub(crate) use str::{Str, allocate_str};
pub(crate) use traceback::Traceback;
pub(crate) use tuple::{Tuple, allocate_list, allocate_tuple};
pub use r#type::Type;
