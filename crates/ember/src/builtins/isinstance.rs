//! Implementation of the isinstance() and issubclass() builtin functions.

use super::type_::type_of;
use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    defer_drop,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{is_class, is_subclass},
    value::Value,
};

/// Implementation of the isinstance() builtin function.
///
/// `classinfo` may be a class or a tuple of classes, nested tuples included. Instances of
/// user classes match their class and everything in its MRO.
pub fn builtin_isinstance<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let heap = &mut *vm.heap;
    let (obj, classinfo) = args.get_two_args("isinstance", heap)?;
    defer_drop!(obj, heap);
    defer_drop!(classinfo, heap);
    let class = type_of(obj, heap);
    let result = subclass_check(&class, classinfo, heap);
    class.drop_with_heap(heap);
    match result {
        Some(result) => Ok(Value::Bool(result)),
        None => Err(ExcType::type_error("isinstance() arg 2 must be a type or tuple of types")),
    }
}

/// Implementation of the issubclass() builtin function.
pub fn builtin_issubclass(heap: &mut Heap<impl ResourceTracker>, args: CallArgs) -> RunResult<Value> {
    let (class, classinfo) = args.get_two_args("issubclass", heap)?;
    defer_drop!(class, heap);
    defer_drop!(classinfo, heap);
    if !is_class(class, heap) {
        return Err(ExcType::type_error("issubclass() arg 1 must be a class"));
    }
    match subclass_check(class, classinfo, heap) {
        Some(result) => Ok(Value::Bool(result)),
        None => Err(ExcType::type_error(
            "issubclass() arg 2 must be a class or tuple of classes",
        )),
    }
}

/// Whether `class` derives from `classinfo`, `None` when `classinfo` is not a class or a
/// tuple of them.
pub(crate) fn subclass_check(class: &Value, classinfo: &Value, heap: &Heap<impl ResourceTracker>) -> Option<bool> {
    if is_class(classinfo, heap) {
        return Some(is_subclass(class, classinfo, heap));
    }
    let HeapData::Tuple(tuple) = heap.get(classinfo.ref_id()?) else {
        return None;
    };
    let mut found = false;
    for entry in tuple.as_slice() {
        found |= subclass_check(class, entry, heap)?;
    }
    Some(found)
}
