//! Implementation of the print() builtin function.

use std::borrow::Cow;

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

/// Implementation of the print() builtin function.
///
/// Supports the `sep` and `end` keyword arguments; either may be `None` for the default.
/// Each argument is converted with `str()`, so instances with `__str__` run user code.
pub fn builtin_print<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let (positional, kwargs) = args.into_parts(vm.heap);
    let (sep, end) = match extract_print_kwargs(vm, kwargs) {
        Ok(options) => options,
        Err(err) => {
            positional.drop_with_heap(vm.heap);
            return Err(err);
        }
    };

    let mut texts = Vec::with_capacity(positional.len());
    let mut error = None;
    for value in positional {
        if error.is_none() {
            match vm.str_value(&value) {
                Ok(text) => texts.push(text),
                Err(err) => error = Some(err),
            }
        }
        value.drop_with_heap(vm.heap);
    }
    if let Some(err) = error {
        return Err(err);
    }

    for (index, text) in texts.into_iter().enumerate() {
        if index > 0 {
            match &sep {
                Some(sep) => vm.print.stdout_write(Cow::Borrowed(sep.as_str()))?,
                None => vm.print.stdout_push(' ')?,
            }
        }
        vm.print.stdout_write(Cow::Owned(text))?;
    }
    match end {
        Some(end) => vm.print.stdout_write(Cow::Owned(end))?,
        None => vm.print.stdout_push('\n')?,
    }
    Ok(Value::None)
}

/// Extracts `sep` and `end`, releasing every keyword value.
fn extract_print_kwargs<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    kwargs: Vec<(Value, Value)>,
) -> RunResult<(Option<String>, Option<String>)> {
    let mut sep = None;
    let mut end = None;
    let mut error = None;
    for (key, value) in kwargs {
        if error.is_none() {
            let name = key.as_str(vm.heap, vm.interns).unwrap_or_default().to_owned();
            let slot = match name.as_str() {
                "sep" => Some(&mut sep),
                "end" => Some(&mut end),
                _ => None,
            };
            match slot {
                Some(slot) => match option_str(&value, &name, vm) {
                    Ok(text) => *slot = text,
                    Err(err) => error = Some(err),
                },
                None => {
                    error = Some(ExcType::type_error(format!(
                        "'{name}' is an invalid keyword argument for print()"
                    )));
                }
            }
        }
        key.drop_with_heap(vm.heap);
        value.drop_with_heap(vm.heap);
    }
    match error {
        Some(err) => Err(err),
        None => Ok((sep, end)),
    }
}

fn option_str<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    value: &Value,
    name: &str,
    vm: &VM<'_, T, P, Tr>,
) -> RunResult<Option<String>> {
    if value.is_none() {
        return Ok(None);
    }
    match value.as_str(vm.heap, vm.interns) {
        Some(text) => Ok(Some(text.to_owned())),
        None => Err(ExcType::type_error(format!(
            "{name} must be None or a string, not {}",
            value.type_name(vm.heap)
        ))),
    }
}
