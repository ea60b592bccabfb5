//! Implementation of the getattr(), setattr() and hasattr() builtin functions.

use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    exception_private::{ExcType, RunResult},
    heap::DropWithHeap,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Implementation of the getattr() builtin function.
///
/// With a default, an `AttributeError` is swallowed and the default returned; any other
/// error propagates.
pub fn builtin_getattr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let mut args = args.positional_only("getattr", 2, 3, vm.heap)?.into_iter();
    let (Some(obj), Some(name)) = (args.next(), args.next()) else {
        args.drop_with_heap(vm.heap);
        return Err(ExcType::type_error("getattr expected at least 2 arguments"));
    };
    let default = args.next();
    let result = match name.as_str(vm.heap, vm.interns) {
        Some(name) => {
            let name = name.to_owned();
            vm.get_attr(&obj, &name)
        }
        None => Err(ExcType::type_error("getattr(): attribute name must be string")),
    };
    obj.drop_with_heap(vm.heap);
    name.drop_with_heap(vm.heap);
    match (result, default) {
        (Ok(value), default) => {
            default.drop_with_heap(vm.heap);
            Ok(value)
        }
        (Err(err), Some(default)) if err.matches(ExcType::AttributeError, vm.heap) => {
            err.drop_with_heap(vm.heap);
            Ok(default)
        }
        (Err(err), default) => {
            default.drop_with_heap(vm.heap);
            Err(err)
        }
    }
}

/// Implementation of the setattr() builtin function.
pub fn builtin_setattr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let mut args = args.positional_only("setattr", 3, 3, vm.heap)?.into_iter();
    let (Some(obj), Some(name), Some(value)) = (args.next(), args.next(), args.next()) else {
        return Err(ExcType::type_error("setattr expected 3 arguments"));
    };
    let result = match name.as_str(vm.heap, vm.interns) {
        Some(text) => {
            let text = text.to_owned();
            vm.set_attr(&obj, &text, value)
        }
        None => {
            value.drop_with_heap(vm.heap);
            Err(ExcType::type_error(format!(
                "attribute name must be string, not '{}'",
                name.type_name(vm.heap)
            )))
        }
    };
    obj.drop_with_heap(vm.heap);
    name.drop_with_heap(vm.heap);
    result.map(|()| Value::None)
}

/// Implementation of the hasattr() builtin function.
pub fn builtin_hasattr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let (obj, name) = args.get_two_args("hasattr", vm.heap)?;
    let result = match name.as_str(vm.heap, vm.interns) {
        Some(text) => {
            let text = text.to_owned();
            vm.get_attr(&obj, &text)
        }
        None => Err(ExcType::type_error("hasattr(): attribute name must be string")),
    };
    obj.drop_with_heap(vm.heap);
    name.drop_with_heap(vm.heap);
    match result {
        Ok(value) => {
            value.drop_with_heap(vm.heap);
            Ok(Value::Bool(true))
        }
        Err(err) if err.matches(ExcType::AttributeError, vm.heap) => {
            err.drop_with_heap(vm.heap);
            Ok(Value::Bool(false))
        }
        Err(err) => Err(err),
    }
}
