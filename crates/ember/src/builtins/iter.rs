//! Implementation of the iter() and next() builtin functions.

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

/// Implementation of the iter() builtin function.
pub fn builtin_iter<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let value = args.get_one_arg("iter", vm.heap)?;
    vm.get_iter(value)
}

/// Implementation of the next() builtin function.
///
/// An exhausted iterator raises `StopIteration` unless a default is given. A generator
/// that returns a value raises `StopIteration` carrying it.
pub fn builtin_next<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let (iterator, default) = args.get_one_two_args("next", vm.heap)?;
    let result = vm.iter_next(&iterator);
    iterator.drop_with_heap(vm.heap);
    match (result, default) {
        (Ok(Some(item)), default) => {
            default.drop_with_heap(vm.heap);
            Ok(item)
        }
        (Ok(None), Some(default)) => Ok(default),
        (Ok(None), None) => Err(ExcType::stop_iteration()),
        (Err(err), Some(default)) if err.matches(ExcType::StopIteration, vm.heap) => {
            err.drop_with_heap(vm.heap);
            Ok(default)
        }
        (Err(err), default) => {
            default.drop_with_heap(vm.heap);
            Err(err)
        }
    }
}
