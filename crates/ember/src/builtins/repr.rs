//! Implementation of the repr() builtin function.

use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    exception_private::RunResult,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::allocate_str,
    value::Value,
};

/// Implementation of the repr() builtin function.
pub fn builtin_repr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let value = args.get_one_arg("repr", vm.heap)?;
    let repr = vm.repr_value(&value);
    value.drop_with_heap(vm.heap);
    allocate_str(vm.heap, repr?)
}
