//! Implementation of the callable() builtin function.

use crate::{
    args::CallArgs,
    exception_private::RunResult,
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    types::lookup_class_attr,
    value::Value,
};

/// Implementation of the callable() builtin function.
pub fn builtin_callable(heap: &mut Heap<impl ResourceTracker>, args: CallArgs) -> RunResult<Value> {
    let value = args.get_one_arg("callable", heap)?;
    let result = is_callable(&value, heap);
    value.drop_with_heap(heap);
    Ok(Value::Bool(result))
}

/// True for functions, methods, classes and instances whose class defines `__call__`.
pub(crate) fn is_callable(value: &Value, heap: &Heap<impl ResourceTracker>) -> bool {
    match value {
        Value::Builtin(_) | Value::HostFunction(_) => true,
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Function(_) | HeapData::BoundMethod(_) | HeapData::Class(_) => true,
            HeapData::Instance(instance) => instance
                .class
                .ref_id()
                .is_some_and(|class_id| lookup_class_attr(class_id, "__call__", heap).is_some()),
            _ => false,
        },
        _ => false,
    }
}
