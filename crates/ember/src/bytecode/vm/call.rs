//! Function call helpers for the VM.
//!
//! Every call goes through [`VM::call_value`], which dispatches on the callable: builtins
//! and host functions run natively, Python functions get a new frame evaluated by a
//! nested `eval_frame`, classes create an instance and run `__init__`.
//!
//! The call opcodes go through [`VM::start_call`] instead. It hands plain Python
//! functions back as a bound frame, which the eval loop pushes on its own frame stack,
//! so Python recursion does not grow the Rust stack.

use std::sync::Arc;

use super::{Frame, FrameExit, Resume, VM};
use crate::{
    args::CallArgs,
    builtins::Builtins,
    bytecode::{CodeFlags, op::make_function},
    exception_private::{ExcType, RunError, RunResult, format_param_names},
    heap::{DropWithHeap, HeapData, HeapId},
    host::{HostArgs, host_result},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Cell, Dict, ExceptionObject, Function, Generator, HashKey, Instance, allocate_tuple, dict_set, lookup_class_attr},
    value::{Value, class_name},
};

/// A call started from a call opcode.
pub(super) enum Called {
    /// The call ran to completion.
    Value(Value),
    /// A bound Python function frame, left for the eval loop to run.
    Frame(Box<Frame>),
}

/// What kind of heap object is being called.
#[derive(Debug, Clone, Copy)]
enum Callee {
    Function,
    BoundMethod,
    Class,
    Instance,
    Other,
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Calls `callable` with `args`, consuming both.
    pub(crate) fn call_value(&mut self, callable: Value, args: CallArgs) -> RunResult<Value> {
        let id = match &callable {
            Value::Builtin(builtin) => return builtin.call(self, args),
            Value::HostFunction(name) => return self.call_host(*name, args),
            Value::Ref(id) => *id,
            other => {
                let err = ExcType::not_callable(&other.type_name(self.heap));
                args.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        let callee = match self.heap.get(id) {
            HeapData::Function(_) => Callee::Function,
            HeapData::BoundMethod(_) => Callee::BoundMethod,
            HeapData::Class(_) => Callee::Class,
            HeapData::Instance(_) => Callee::Instance,
            _ => Callee::Other,
        };
        let result = match callee {
            Callee::Function => self.call_function(id, args),
            Callee::BoundMethod => {
                let (func, receiver) = match self.heap.get(id) {
                    HeapData::BoundMethod(method) => (
                        method.func.clone_with_heap(self.heap),
                        method.receiver.clone_with_heap(self.heap),
                    ),
                    _ => (Value::None, Value::None),
                };
                let mut args = args;
                args.prepend(receiver);
                self.call_value(func, args)
            }
            Callee::Class => self.call_class(id, args),
            Callee::Instance => match self.lookup_special(&callable, StaticStrings::DunderCall.into()) {
                Ok(Some(call)) => self.call_value(call, args),
                Ok(None) => {
                    let err = ExcType::not_callable(&callable.type_name(self.heap));
                    args.drop_with_heap(self.heap);
                    Err(err)
                }
                Err(err) => {
                    args.drop_with_heap(self.heap);
                    Err(err)
                }
            },
            Callee::Other => {
                let err = ExcType::not_callable(&callable.type_name(self.heap));
                args.drop_with_heap(self.heap);
                Err(err)
            }
        };
        callable.drop_with_heap(self.heap);
        result
    }

    /// Starts a call from a call opcode, consuming `callable` and `args`.
    ///
    /// Functions and bound methods over functions with non-generator code come back
    /// as a bound frame; every other callable runs through [`VM::call_value`].
    pub(super) fn start_call(&mut self, callable: Value, mut args: CallArgs) -> RunResult<Called> {
        let func = if self.is_plain_function(&callable) {
            callable
        } else {
            let bound = match callable.ref_id().map(|id| self.heap.get(id)) {
                Some(HeapData::BoundMethod(method)) if self.is_plain_function(&method.func) => Some((
                    method.func.clone_with_heap(self.heap),
                    method.receiver.clone_with_heap(self.heap),
                )),
                _ => None,
            };
            let Some((func, receiver)) = bound else {
                return self.call_value(callable, args).map(Called::Value);
            };
            callable.drop_with_heap(self.heap);
            args.prepend(receiver);
            func
        };
        let frame = match func.ref_id() {
            Some(func_id) => self.bind_arguments(func_id, args, None),
            None => {
                args.drop_with_heap(self.heap);
                Err(RunError::internal("start_call: function is not a heap object"))
            }
        };
        func.drop_with_heap(self.heap);
        Ok(Called::Frame(Box::new(frame?)))
    }

    /// Whether `value` is a function whose code runs to completion when called.
    fn is_plain_function(&self, value: &Value) -> bool {
        let Some(HeapData::Function(func)) = value.ref_id().map(|id| self.heap.get(id)) else {
            return false;
        };
        matches!(self.heap.get(func.code), HeapData::Code(code) if !code.body.is_generator())
    }

    /// Runs a host function with the execution token released.
    fn call_host(&mut self, name: crate::intern::StringId, args: CallArgs) -> RunResult<Value> {
        let (positional, kwargs) = args.into_parts(self.heap);
        let host_args = HostArgs::new(positional, kwargs, self.heap, self.interns);
        let Some(function) = self.host.get_mut(name) else {
            return Err(ExcType::name_error(self.interns.get_str(name)));
        };
        let result = self
            .token
            .release_while(|| function(&host_args.positional, &host_args.keywords));
        host_result(result, self.heap, self.interns)
    }

    /// Calls a Python function: binds the arguments into a new frame and either runs it
    /// or, for generator code, wraps it in a generator object.
    pub(super) fn call_function(&mut self, func_id: HeapId, args: CallArgs) -> RunResult<Value> {
        let mut frame = self.bind_arguments(func_id, args, None)?;
        if frame.code.is_generator() {
            let (name, qualname) = match self.heap.get(func_id) {
                HeapData::Function(func) => (func.name.clone(), func.qualname.clone()),
                _ => (String::new(), String::new()),
            };
            self.heap.inc_ref(frame.code_id);
            let code = Value::Ref(frame.code_id);
            let generator = Generator::new(frame, name, qualname, code);
            return Ok(Value::Ref(self.heap.allocate(HeapData::Generator(generator))?));
        }
        let result = self.eval_frame(&mut frame, Resume::Start);
        frame.drop_with_heap(self.heap);
        match result? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(value) => {
                value.drop_with_heap(self.heap);
                Err(RunError::internal("function frame yielded"))
            }
        }
    }

    /// Runs a class body function with `ns_id` as its locals mapping.
    ///
    /// Returns the `__class__` cell when the body created one, otherwise `None`.
    pub(crate) fn run_class_body(&mut self, func_id: HeapId, ns_id: HeapId) -> RunResult<Value> {
        self.heap.inc_ref(ns_id);
        let mut frame = self.bind_arguments(func_id, CallArgs::default(), Some(ns_id))?;
        let result = self.eval_frame(&mut frame, Resume::Start);
        frame.drop_with_heap(self.heap);
        match result? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(value) => {
                value.drop_with_heap(self.heap);
                Err(RunError::internal("class body yielded"))
            }
        }
    }

    /// Creates a frame for `func_id` and binds `args` to its parameters.
    ///
    /// `locals` is an owned reference to the name-opcode mapping, if the code uses one.
    fn bind_arguments(&mut self, func_id: HeapId, args: CallArgs, locals: Option<HeapId>) -> RunResult<Frame> {
        let (code_id, globals, closure, qualname) = match self.heap.get(func_id) {
            HeapData::Function(func) => (func.code, func.globals, func.closure.clone(), func.qualname.clone()),
            _ => {
                args.drop_with_heap(self.heap);
                locals.drop_with_heap(self.heap);
                return Err(RunError::internal("bind_arguments: not a function"));
            }
        };
        let HeapData::Code(code) = self.heap.get(code_id) else {
            args.drop_with_heap(self.heap);
            locals.drop_with_heap(self.heap);
            return Err(RunError::internal("bind_arguments: function code is not a code object"));
        };
        let body = Arc::clone(&code.body);
        self.heap.inc_ref(code_id);
        self.heap.inc_ref(globals);
        let builtins = self.builtins();
        let mut frame = Frame::new(body, code_id, globals, builtins, locals);

        let bound = self
            .fill_arguments(&mut frame, func_id, &qualname, args)
            .and_then(|()| self.init_cells(&mut frame, &closure));
        match bound {
            Ok(()) => Ok(frame),
            Err(err) => {
                frame.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    /// Places positional arguments, `*args`, keyword arguments, `**kwargs` and defaults
    /// into the frame's fast locals, raising `TypeError` for any mismatch.
    fn fill_arguments(&mut self, frame: &mut Frame, func_id: HeapId, qualname: &str, args: CallArgs) -> RunResult<()> {
        let code = Arc::clone(&frame.code);
        let interns = self.interns;
        let (positional, kwargs) = args.into_parts(self.heap);
        let argcount = code.argcount;
        let posonly = code.posonlyargcount;
        let total = argcount + code.kwonlyargcount;
        let given = positional.len();

        let kwdict = if code.flags.contains(CodeFlags::VARKEYWORDS) {
            match self.heap.allocate(HeapData::Dict(Dict::new())) {
                Ok(id) => {
                    frame.fast[code.total_args() - 1] = Value::Ref(id);
                    Some(id)
                }
                Err(err) => {
                    positional.drop_with_heap(self.heap);
                    kwargs.drop_with_heap(self.heap);
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        let mut positional = positional.into_iter();
        for (slot, value) in frame.fast.iter_mut().zip(positional.by_ref().take(argcount)) {
            *slot = value;
        }
        let extra: Vec<Value> = positional.collect();
        if code.flags.contains(CodeFlags::VARARGS) {
            match allocate_tuple(self.heap, extra) {
                Ok(tuple) => frame.fast[total] = tuple,
                Err(err) => {
                    kwargs.drop_with_heap(self.heap);
                    return Err(err);
                }
            }
        } else {
            extra.drop_with_heap(self.heap);
        }

        let kw_names: Vec<Option<String>> = kwargs
            .iter()
            .map(|(name, _)| name.as_str(self.heap, interns).map(str::to_owned))
            .collect();
        let mut kwargs = kwargs.into_iter();
        for key in &kw_names {
            let Some((name, value)) = kwargs.next() else { break };
            let Some(key) = key else {
                name.drop_with_heap(self.heap);
                value.drop_with_heap(self.heap);
                kwargs.drop_with_heap(self.heap);
                return Err(ExcType::type_error(format!("{qualname}() keywords must be strings")));
            };
            let slot = code.varnames[posonly..total]
                .iter()
                .position(|param| interns.get_str(*param) == key)
                .map(|index| index + posonly);
            match (slot, kwdict) {
                (Some(index), _) => {
                    name.drop_with_heap(self.heap);
                    if !frame.fast[index].is_undefined() {
                        value.drop_with_heap(self.heap);
                        kwargs.drop_with_heap(self.heap);
                        return Err(ExcType::type_error(format!(
                            "{qualname}() got multiple values for argument '{key}'"
                        )));
                    }
                    frame.fast[index] = value;
                }
                (None, Some(dict_id)) => {
                    if let Err(err) = dict_set(self.heap, interns, dict_id, name, value) {
                        kwargs.drop_with_heap(self.heap);
                        return Err(err);
                    }
                }
                (None, None) => {
                    name.drop_with_heap(self.heap);
                    value.drop_with_heap(self.heap);
                    kwargs.drop_with_heap(self.heap);
                    let passed_posonly: Vec<&str> = kw_names
                        .iter()
                        .flatten()
                        .filter(|kw| code.varnames[..posonly].iter().any(|p| interns.get_str(*p) == kw.as_str()))
                        .map(String::as_str)
                        .collect();
                    if !passed_posonly.is_empty() {
                        return Err(ExcType::type_error(format!(
                            "{qualname}() got some positional-only arguments passed as keyword arguments: '{}'",
                            passed_posonly.join(", ")
                        )));
                    }
                    return Err(ExcType::type_error(format!(
                        "{qualname}() got an unexpected keyword argument '{key}'"
                    )));
                }
            }
        }

        let ndefaults = match self.heap.get(func_id) {
            HeapData::Function(func) => func.defaults.len(),
            _ => 0,
        };
        if !code.flags.contains(CodeFlags::VARARGS) && given > argcount {
            let kwonly_given = frame.fast[argcount..total].iter().filter(|v| !v.is_undefined()).count();
            return Err(too_many_positional(qualname, argcount, ndefaults, given, kwonly_given));
        }

        if given < argcount {
            let required = argcount.saturating_sub(ndefaults);
            let missing: Vec<&str> = (given..required)
                .filter(|index| frame.fast[*index].is_undefined())
                .map(|index| interns.get_str(code.varnames[index]))
                .collect();
            if !missing.is_empty() {
                return Err(missing_arguments(qualname, "positional", &missing));
            }
            for index in given.max(required)..argcount {
                if frame.fast[index].is_undefined()
                    && let HeapData::Function(func) = self.heap.get(func_id)
                {
                    frame.fast[index] = func.defaults[index - required].clone_with_heap(self.heap);
                }
            }
        }

        if code.kwonlyargcount > 0 {
            let kwdefaults = match self.heap.get(func_id) {
                HeapData::Function(func) => func.kwdefaults,
                _ => None,
            };
            let mut missing = Vec::new();
            for index in argcount..total {
                if !frame.fast[index].is_undefined() {
                    continue;
                }
                let name = interns.get_str(code.varnames[index]);
                let default = kwdefaults.and_then(|id| match self.heap.get(id) {
                    HeapData::Dict(dict) => dict.get_str(name).map(|v| v.clone_with_heap(self.heap)),
                    _ => None,
                });
                match default {
                    Some(value) => frame.fast[index] = value,
                    None => missing.push(name),
                }
            }
            if !missing.is_empty() {
                return Err(missing_arguments(qualname, "keyword-only", &missing));
            }
        }
        Ok(())
    }

    /// Creates the frame's cell variables, moving arguments that are also cells into
    /// their cell, and appends the closure's cells for the free variables.
    fn init_cells(&mut self, frame: &mut Frame, closure: &[HeapId]) -> RunResult<()> {
        let code = Arc::clone(&frame.code);
        for index in 0..code.cellvars.len() {
            let value = match code.cell2arg.get(index).copied().flatten() {
                Some(arg) => std::mem::replace(&mut frame.fast[arg], Value::Undefined),
                None => Value::Undefined,
            };
            let cell = self.heap.allocate(HeapData::Cell(Cell::new(value)))?;
            frame.cells.push(cell);
        }
        if closure.len() != code.freevars.len() {
            return Err(ExcType::system_error(format!(
                "{}() requires closure of length {}, not {}",
                self.interns.get_str(code.name),
                code.freevars.len(),
                closure.len()
            )));
        }
        for &cell in closure {
            self.heap.inc_ref(cell);
            frame.cells.push(cell);
        }
        Ok(())
    }

    /// Calls a user class: creates the instance and runs `__init__` on it.
    fn call_class(&mut self, class_id: HeapId, args: CallArgs) -> RunResult<Value> {
        let (exc_base, name) = match self.heap.get(class_id) {
            HeapData::Class(class) => (class.exc_base, class.name.clone()),
            _ => (None, String::new()),
        };
        self.heap.inc_ref(class_id);
        let data = if exc_base.is_some() {
            HeapData::Exception(ExceptionObject::new(Value::Ref(class_id), args.positional_clones(self.heap)))
        } else {
            HeapData::Instance(Instance {
                class: Value::Ref(class_id),
                attrs: Dict::new(),
            })
        };
        let instance = match self.heap.allocate(data) {
            Ok(id) => Value::Ref(id),
            Err(err) => {
                args.drop_with_heap(self.heap);
                return Err(err.into());
            }
        };

        let init = lookup_class_attr(class_id, StaticStrings::DunderInit.into(), self.heap)
            .map(|init| init.clone_with_heap(self.heap));
        let Some(init) = init else {
            let (positional, kw_count) = (args.positional_count(self.heap), args.kw_count(self.heap));
            args.drop_with_heap(self.heap);
            let err = if exc_base.is_some() {
                (kw_count > 0).then(|| ExcType::type_error(format!("{name}() takes no keyword arguments")))
            } else {
                (positional + kw_count > 0).then(|| ExcType::type_error(format!("{name}() takes no arguments")))
            };
            return match err {
                Some(err) => {
                    instance.drop_with_heap(self.heap);
                    Err(err)
                }
                None => Ok(instance),
            };
        };

        let mut args = args;
        args.prepend(instance.clone_with_heap(self.heap));
        match self.call_value(init, args) {
            Ok(result) if result.is_none() => Ok(instance),
            Ok(result) => {
                let err = ExcType::type_error(format!(
                    "__init__() should return None, not '{}'",
                    result.type_name(self.heap)
                ));
                result.drop_with_heap(self.heap);
                instance.drop_with_heap(self.heap);
                Err(err)
            }
            Err(err) => {
                instance.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// `MAKE_FUNCTION`: builds a function from the code object and qualified name on
    /// the stack plus the optional parts `flags` says are present.
    pub(super) fn make_function(&mut self, frame: &mut Frame, flags: u32) -> RunResult<Value> {
        let qualname = frame.pop()?;
        let code = frame.pop()?;
        let qualname_text = qualname.as_str(self.heap, self.interns).map(str::to_owned);
        qualname.drop_with_heap(self.heap);
        let code_id = match code.ref_id() {
            Some(id) if matches!(self.heap.get(id), HeapData::Code(_)) => id,
            _ => {
                code.drop_with_heap(self.heap);
                return Err(RunError::internal("MAKE_FUNCTION: operand is not a code object"));
            }
        };
        let name = match self.heap.get(code_id) {
            HeapData::Code(code) => self.interns.get_str(code.body.name).to_owned(),
            _ => String::new(),
        };

        let closure = if flags & make_function::CLOSURE != 0 { Some(frame.pop()?) } else { None };
        let annotations = if flags & make_function::ANNOTATIONS != 0 { frame.pop()? } else { Value::None };
        let kwdefaults = if flags & make_function::KWDEFAULTS != 0 { Some(frame.pop()?) } else { None };
        let defaults = if flags & make_function::DEFAULTS != 0 { Some(frame.pop()?) } else { None };

        let closure_cells: Vec<HeapId> = closure.as_ref().map_or_else(Vec::new, |tuple| self.tuple_items(tuple)
            .iter()
            .filter_map(Value::ref_id)
            .collect());
        for &cell in &closure_cells {
            self.heap.inc_ref(cell);
        }
        closure.drop_with_heap(self.heap);
        let default_values: Vec<Value> = defaults.as_ref().map_or_else(Vec::new, |tuple| {
            self.tuple_items(tuple)
                .iter()
                .map(|value| value.clone_with_heap(self.heap))
                .collect()
        });
        defaults.drop_with_heap(self.heap);

        self.tracer.on_make_function(closure_cells.len(), default_values.len());
        self.heap.inc_ref(frame.globals);
        let function = Function {
            code: code_id,
            globals: frame.globals,
            qualname: qualname_text.unwrap_or_else(|| name.clone()),
            name,
            defaults: default_values,
            kwdefaults: kwdefaults.and_then(Value::into_ref_id),
            closure: closure_cells,
            annotations,
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Function(function))?))
    }

    /// The items of a tuple value, empty for anything else.
    fn tuple_items(&self, value: &Value) -> &[Value] {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(tuple)) => tuple.as_slice(),
            _ => &[],
        }
    }

    /// `CALL_FUNCTION_EX`: calls with a positional iterable and an optional mapping.
    pub(super) fn call_function_ex(&mut self, callable: Value, callargs: Value, kwargs: Option<Value>) -> RunResult<Called> {
        let kwargs = match kwargs {
            Some(kwargs) if !matches!(kwargs.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Dict(_))) => {
                let err = ExcType::type_error(format!(
                    "{} argument after ** must be a mapping, not {}",
                    self.func_str(&callable),
                    kwargs.type_name(self.heap)
                ));
                kwargs.drop_with_heap(self.heap);
                callargs.drop_with_heap(self.heap);
                callable.drop_with_heap(self.heap);
                return Err(err);
            }
            other => other,
        };
        let bad_keys = kwargs
            .as_ref()
            .and_then(|kwargs| kwargs.ref_id())
            .is_some_and(|id| match self.heap.get(id) {
                HeapData::Dict(dict) => dict.keys().any(|key| key.as_str(self.heap, self.interns).is_none()),
                _ => false,
            });
        if bad_keys {
            let err = ExcType::type_error(format!("{} keywords must be strings", self.func_str(&callable)));
            kwargs.drop_with_heap(self.heap);
            callargs.drop_with_heap(self.heap);
            callable.drop_with_heap(self.heap);
            return Err(err);
        }

        let is_tuple = matches!(callargs.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Tuple(_)));
        let callargs = if is_tuple {
            callargs
        } else if self.is_iterable(&callargs) {
            let items = match self.collect_iterable(callargs) {
                Ok(items) => items,
                Err(err) => {
                    kwargs.drop_with_heap(self.heap);
                    callable.drop_with_heap(self.heap);
                    return Err(err);
                }
            };
            allocate_tuple(self.heap, items)?
        } else {
            let err = ExcType::type_error(format!(
                "{} argument after * must be an iterable, not {}",
                self.func_str(&callable),
                callargs.type_name(self.heap)
            ));
            kwargs.drop_with_heap(self.heap);
            callargs.drop_with_heap(self.heap);
            callable.drop_with_heap(self.heap);
            return Err(err);
        };

        let args = CallArgs::from_legacy(&callargs, kwargs.as_ref(), self.heap, self.interns);
        callargs.drop_with_heap(self.heap);
        kwargs.drop_with_heap(self.heap);
        match args {
            Ok(args) => self.start_call(callable, args),
            Err(err) => {
                callable.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    /// `DICT_MERGE`: merges keyword arguments unpacked with `**`, refusing duplicates.
    pub(super) fn dict_merge(&mut self, dict_id: HeapId, source: &Value, func: &Value) -> RunResult<()> {
        let pairs: Vec<(Value, Value)> = match source.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Dict(dict)) => dict
                .iter()
                .map(|(k, v)| (k.clone_with_heap(self.heap), v.clone_with_heap(self.heap)))
                .collect(),
            _ => {
                return Err(ExcType::type_error(format!(
                    "{} argument after ** must be a mapping, not {}",
                    self.func_str(func),
                    source.type_name(self.heap)
                )));
            }
        };
        let mut pairs = pairs.into_iter();
        while let Some((key, value)) = pairs.next() {
            let duplicate = match HashKey::from_value(&key, self.heap, self.interns) {
                Ok(hash_key) => match self.heap.get(dict_id) {
                    HeapData::Dict(dict) => dict.contains(&hash_key),
                    _ => false,
                },
                Err(err) => {
                    key.drop_with_heap(self.heap);
                    value.drop_with_heap(self.heap);
                    pairs.drop_with_heap(self.heap);
                    return Err(err);
                }
            };
            if duplicate {
                let err = ExcType::type_error(format!(
                    "{} got multiple values for keyword argument '{}'",
                    self.func_str(func),
                    key.py_str(self.heap, self.interns)
                ));
                key.drop_with_heap(self.heap);
                value.drop_with_heap(self.heap);
                pairs.drop_with_heap(self.heap);
                return Err(err);
            }
            if let Err(err) = dict_set(self.heap, self.interns, dict_id, key, value) {
                pairs.drop_with_heap(self.heap);
                return Err(err);
            }
        }
        Ok(())
    }

    /// How call errors name a callable: `module.qualname()` for functions and classes
    /// defined outside `builtins`, `name()` for builtins, `str(x)` otherwise.
    pub(super) fn func_str(&self, callable: &Value) -> String {
        match callable {
            Value::Builtin(Builtins::Function(function)) => format!("{}()", <&'static str>::from(*function)),
            Value::Builtin(Builtins::TypeMethod { ty, method }) => {
                format!("{}.{}()", ty.name(), <&'static str>::from(*method))
            }
            Value::Builtin(_) => format!("{}()", class_name(callable, self.heap)),
            Value::HostFunction(name) => format!("{}()", self.interns.get_str(*name)),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(func) => {
                    let module = match self.heap.get(func.globals) {
                        HeapData::Dict(globals) => globals
                            .get_str(StaticStrings::DunderName.into())
                            .and_then(|name| name.as_str(self.heap, self.interns)),
                        _ => None,
                    };
                    match module {
                        Some(module) if module != "builtins" => format!("{module}.{}()", func.qualname),
                        _ => format!("{}()", func.qualname),
                    }
                }
                HeapData::BoundMethod(method) => self.func_str(&method.func),
                HeapData::Class(class) if class.module != "builtins" => {
                    format!("{}.{}()", class.module, class.qualname)
                }
                HeapData::Class(class) => format!("{}()", class.qualname),
                _ => callable.py_str(self.heap, self.interns),
            },
            _ => callable.py_str(self.heap, self.interns),
        }
    }
}

fn missing_arguments(qualname: &str, kind: &str, names: &[&str]) -> RunError {
    ExcType::type_error(format!(
        "{qualname}() missing {} required {kind} argument{}: {}",
        names.len(),
        if names.len() == 1 { "" } else { "s" },
        format_param_names(names)
    ))
}

fn too_many_positional(qualname: &str, argcount: usize, ndefaults: usize, given: usize, kwonly_given: usize) -> RunError {
    let (sig, plural) = if ndefaults > 0 {
        (format!("from {} to {argcount}", argcount.saturating_sub(ndefaults)), true)
    } else {
        (argcount.to_string(), argcount != 1)
    };
    let kwonly_sig = if kwonly_given > 0 {
        format!(
            " positional argument{} (and {kwonly_given} keyword-only argument{})",
            if given == 1 { "" } else { "s" },
            if kwonly_given == 1 { "" } else { "s" }
        )
    } else {
        String::new()
    };
    ExcType::type_error(format!(
        "{qualname}() takes {sig} positional argument{} but {given}{kwonly_sig} {} given",
        if plural { "s" } else { "" },
        if given == 1 && kwonly_given == 0 { "was" } else { "were" }
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: RunError) -> String {
        match err {
            RunError::Exc(raise) => raise.exc.arg().cloned().unwrap_or_default(),
            other => panic!("expected a simple exception, got {other:?}"),
        }
    }

    #[test]
    fn too_many_positional_wording() {
        assert_eq!(
            message(too_many_positional("f", 1, 0, 2, 0)),
            "f() takes 1 positional argument but 2 were given"
        );
        assert_eq!(
            message(too_many_positional("f", 2, 1, 3, 0)),
            "f() takes from 1 to 2 positional arguments but 3 were given"
        );
        assert_eq!(
            message(too_many_positional("f", 0, 0, 1, 1)),
            "f() takes 0 positional arguments but 1 positional argument (and 1 keyword-only argument) were given"
        );
    }

    #[test]
    fn missing_arguments_wording() {
        assert_eq!(
            message(missing_arguments("g", "positional", &["a"])),
            "g() missing 1 required positional argument: 'a'"
        );
        assert_eq!(
            message(missing_arguments("g", "keyword-only", &["x", "y"])),
            "g() missing 2 required keyword-only arguments: 'x' and 'y'"
        );
    }
}
