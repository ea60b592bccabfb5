//! Implementation of the len() builtin function.

use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    exception_private::RunResult,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Implementation of the len() builtin function.
///
/// Instances of user classes answer through `__len__`.
pub fn builtin_len<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let value = args.get_one_arg("len", vm.heap)?;
    let len = vm.len_of(&value);
    value.drop_with_heap(vm.heap);
    let len = len?;
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}
