//! Attribute helpers for the VM.
//!
//! Instances look in their own dict first and then in their class's MRO, binding
//! functions found on the class to the instance. Builtin objects expose a fixed set of
//! read-only attributes plus the methods their type defines.

use super::VM;
use crate::{
    builtins::{Builtins, methods::lookup_type_method},
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    heap::{DropWithHeap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{BoundMethod, Dict, GeneratorState, HashKey, Type, allocate_str, allocate_tuple, lookup_class_attr},
    value::{Value, class_name},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `getattr(owner, name)`.
    pub(crate) fn get_attr(&mut self, owner: &Value, name: &str) -> RunResult<Value> {
        let found = match owner {
            Value::Ref(id) => self.heap_attr(owner, *id, name)?,
            Value::Builtin(builtin) => self.builtin_attr(*builtin, name)?,
            Value::HostFunction(func) if name == "__name__" || name == "__qualname__" => {
                Some(Value::InternString(*func))
            }
            _ => None,
        };
        if let Some(value) = found {
            return Ok(value);
        }
        let ty = owner.py_type(self.heap);
        if let Some(method) = lookup_type_method(ty, name) {
            let func = Value::Builtin(Builtins::TypeMethod { ty, method });
            return self.bind(func, owner.clone_with_heap(self.heap));
        }
        Err(self.no_attribute(owner, name))
    }

    fn no_attribute(&self, owner: &Value, name: &str) -> RunError {
        let is_class = matches!(owner, Value::Builtin(Builtins::Type(_) | Builtins::ExcType(_)))
            || matches!(owner, Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Class(_)));
        if is_class {
            SimpleException::new_msg(
                ExcType::AttributeError,
                format!("type object '{}' has no attribute '{name}'", class_name(owner, self.heap)),
            )
            .into()
        } else {
            ExcType::attribute_error(&owner.type_name(self.heap), name)
        }
    }

    /// Attributes of classes and functions that live outside the heap.
    fn builtin_attr(&mut self, builtin: Builtins, name: &str) -> RunResult<Option<Value>> {
        match (builtin, name) {
            (_, "__name__" | "__qualname__") => {
                let text = match builtin {
                    Builtins::Function(function) => <&'static str>::from(function).to_owned(),
                    Builtins::TypeMethod { method, .. } => <&'static str>::from(method).to_owned(),
                    _ => class_name(&Value::Builtin(builtin), self.heap).into_owned(),
                };
                allocate_str(self.heap, text).map(Some)
            }
            (Builtins::Type(ty), _) => Ok(lookup_type_method(ty, name)
                .map(|method| Value::Builtin(Builtins::TypeMethod { ty, method }))),
            (Builtins::ExcType(_), _) => Ok(lookup_type_method(Type::Exception, name).map(|method| {
                Value::Builtin(Builtins::TypeMethod {
                    ty: Type::Exception,
                    method,
                })
            })),
            _ => Ok(None),
        }
    }

    /// Attributes of heap objects. `None` means the object itself has nothing under
    /// `name` and the type's methods should be tried.
    fn heap_attr(&mut self, owner: &Value, id: HeapId, name: &str) -> RunResult<Option<Value>> {
        let heap = &*self.heap;
        let value = match heap.get(id) {
            HeapData::Instance(instance) => {
                if let Some(value) = instance.attrs.get_str(name) {
                    return Ok(Some(value.clone_with_heap(heap)));
                }
                if name == "__class__" {
                    return Ok(Some(instance.class.clone_with_heap(heap)));
                }
                let attr = instance
                    .class
                    .ref_id()
                    .and_then(|class_id| lookup_class_attr(class_id, name, heap))
                    .map(|attr| attr.clone_with_heap(heap));
                return match attr {
                    Some(attr) => self.bind_class_attr(attr, owner).map(Some),
                    None => Ok(None),
                };
            }
            HeapData::Class(class) => match name {
                "__name__" => Text(class.name.clone()),
                "__qualname__" => Text(class.qualname.clone()),
                "__bases__" => Items(class.bases.iter().map(|base| base.clone_with_heap(heap)).collect()),
                "__mro__" => {
                    heap.inc_ref(id);
                    let mut mro = vec![Value::Ref(id)];
                    mro.extend(class.mro.iter().map(|entry| entry.clone_with_heap(heap)));
                    Items(mro)
                }
                "__module__" if class.namespace.get_str(name).is_none() => Text(class.module.clone()),
                _ => Found(lookup_class_attr(id, name, heap).map(|attr| attr.clone_with_heap(heap))),
            },
            HeapData::Exception(exc) => match name {
                "args" => Items(exc.args.iter().map(|arg| arg.clone_with_heap(heap)).collect()),
                "__cause__" => Found(Some(exc.cause.clone_with_heap(heap))),
                "__context__" => Found(Some(exc.context.clone_with_heap(heap))),
                "__traceback__" => Found(Some(exc.traceback.clone_with_heap(heap))),
                "__suppress_context__" => Found(Some(Value::Bool(exc.suppress_context))),
                "__class__" => Found(Some(exc.class.clone_with_heap(heap))),
                "value" if exc.builtin_type(heap) == ExcType::StopIteration => Found(Some(
                    exc.first_arg()
                        .map_or(Value::None, |arg| arg.clone_with_heap(heap)),
                )),
                _ => {
                    if let Some(value) = exc.attrs.get_str(name) {
                        return Ok(Some(value.clone_with_heap(heap)));
                    }
                    let attr = exc
                        .class
                        .ref_id()
                        .and_then(|class_id| lookup_class_attr(class_id, name, heap))
                        .map(|attr| attr.clone_with_heap(heap));
                    return match attr {
                        Some(attr) => self.bind_class_attr(attr, owner).map(Some),
                        None => Ok(None),
                    };
                }
            },
            HeapData::Generator(generator) => match name {
                "gi_running" => Found(Some(Value::Bool(generator.state == GeneratorState::Running))),
                "gi_frame" => Found(Some(if generator.state == GeneratorState::Closed {
                    Value::None
                } else {
                    generator.code.clone_with_heap(heap)
                })),
                "gi_code" => Found(Some(generator.code.clone_with_heap(heap))),
                "gi_yieldfrom" => return Ok(Some(self.gen_yieldfrom(id))),
                "__name__" => Text(generator.name.clone()),
                "__qualname__" => Text(generator.qualname.clone()),
                _ => Found(None),
            },
            HeapData::Function(func) => match name {
                "__name__" => Text(func.name.clone()),
                "__qualname__" => Text(func.qualname.clone()),
                "__code__" => {
                    heap.inc_ref(func.code);
                    Found(Some(Value::Ref(func.code)))
                }
                "__defaults__" if func.defaults.is_empty() => Found(Some(Value::None)),
                "__defaults__" => Items(func.defaults.iter().map(|v| v.clone_with_heap(heap)).collect()),
                "__kwdefaults__" => Found(Some(func.kwdefaults.map_or(Value::None, |kw| {
                    heap.inc_ref(kw);
                    Value::Ref(kw)
                }))),
                "__closure__" if func.closure.is_empty() => Found(Some(Value::None)),
                "__closure__" => Items(
                    func.closure
                        .iter()
                        .map(|cell| {
                            heap.inc_ref(*cell);
                            Value::Ref(*cell)
                        })
                        .collect(),
                ),
                "__annotations__" => Found(Some(func.annotations.clone_with_heap(heap))),
                "__module__" => Found(Some(match heap.get(func.globals) {
                    HeapData::Dict(globals) => globals
                        .get_str("__name__")
                        .map_or(Value::None, |module| module.clone_with_heap(heap)),
                    _ => Value::None,
                })),
                _ => Found(None),
            },
            HeapData::BoundMethod(method) => match name {
                "__self__" => Found(Some(method.receiver.clone_with_heap(heap))),
                "__func__" => Found(Some(method.func.clone_with_heap(heap))),
                _ => {
                    let func = method.func.clone_with_heap(heap);
                    let result = self.get_attr(&func, name);
                    func.drop_with_heap(self.heap);
                    return result.map(Some);
                }
            },
            HeapData::Traceback(tb) => match name {
                "tb_next" => Found(Some(tb.next.clone_with_heap(heap))),
                "tb_lineno" => Found(Some(Value::Int(i64::from(tb.lineno)))),
                "tb_lasti" => Found(Some(Value::Int(i64::from(tb.lasti)))),
                _ => Found(None),
            },
            HeapData::Code(code) => match name {
                "co_name" => Found(Some(Value::InternString(code.body.name))),
                "co_filename" => Found(Some(Value::InternString(code.body.filename))),
                "co_argcount" => Found(Some(Value::Int(i64::try_from(code.body.argcount).unwrap_or(i64::MAX)))),
                "co_flags" => Found(Some(Value::Int(i64::from(code.body.flags.bits())))),
                _ => Found(None),
            },
            HeapData::Range(range) => match name {
                "start" => Found(Some(Value::Int(range.start))),
                "stop" => Found(Some(Value::Int(range.stop))),
                "step" => Found(Some(Value::Int(range.step))),
                _ => Found(None),
            },
            HeapData::Slice(slice) => match name {
                "start" => Found(Some(slice.start.clone_with_heap(heap))),
                "stop" => Found(Some(slice.stop.clone_with_heap(heap))),
                "step" => Found(Some(slice.step.clone_with_heap(heap))),
                _ => Found(None),
            },
            HeapData::Cell(cell) if name == "cell_contents" => {
                if cell.value.is_undefined() {
                    return Err(ExcType::value_error("Cell is empty"));
                }
                Found(Some(cell.value.clone_with_heap(heap)))
            }
            _ => Found(None),
        };
        match value {
            Found(value) => Ok(value),
            Text(text) => allocate_str(self.heap, text).map(Some),
            Items(items) => allocate_tuple(self.heap, items).map(Some),
        }
    }

    /// Binds a function found on a class to the object it was looked up through.
    pub(super) fn bind_class_attr(&mut self, attr: Value, receiver: &Value) -> RunResult<Value> {
        let is_function = matches!(attr.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Function(_)));
        if is_function {
            self.bind(attr, receiver.clone_with_heap(self.heap))
        } else {
            Ok(attr)
        }
    }

    fn bind(&mut self, func: Value, receiver: Value) -> RunResult<Value> {
        let method = BoundMethod { func, receiver };
        Ok(Value::Ref(self.heap.allocate(HeapData::BoundMethod(method))?))
    }

    /// The key stored for attribute `name`: the interned string if there is one.
    fn attr_key(&mut self, name: &str) -> RunResult<Value> {
        match self.interns.lookup(name) {
            Some(id) => Ok(Value::InternString(id)),
            None => allocate_str(self.heap, name),
        }
    }

    /// `setattr(owner, name, value)`.
    pub(crate) fn set_attr(&mut self, owner: &Value, name: &str, value: Value) -> RunResult<()> {
        let Some(id) = owner.ref_id() else {
            let err = self.no_attribute(owner, name);
            value.drop_with_heap(self.heap);
            return Err(err);
        };
        match self.heap.get(id) {
            HeapData::Instance(_) | HeapData::Class(_) => {
                if let HeapData::Class(_) = self.heap.get(id)
                    && matches!(name, "__name__" | "__qualname__")
                {
                    let Some(text) = value.as_str(self.heap, self.interns).map(str::to_owned) else {
                        let err = ExcType::type_error(format!(
                            "can only assign string to {}.{name}, not '{}'",
                            class_name(owner, self.heap),
                            value.type_name(self.heap)
                        ));
                        value.drop_with_heap(self.heap);
                        return Err(err);
                    };
                    if let HeapData::Class(class) = self.heap.get_mut(id) {
                        if name == "__name__" {
                            class.name = text;
                        } else {
                            class.qualname = text;
                        }
                    }
                    value.drop_with_heap(self.heap);
                    return Ok(());
                }
                self.store_in_dict(id, name, value)
            }
            HeapData::Exception(_) => self.set_exception_attr(id, name, value),
            HeapData::Function(_) if matches!(name, "__name__" | "__qualname__") => {
                let Some(text) = value.as_str(self.heap, self.interns).map(str::to_owned) else {
                    value.drop_with_heap(self.heap);
                    return Err(ExcType::type_error(format!("{name} must be set to a string object")));
                };
                value.drop_with_heap(self.heap);
                if let HeapData::Function(func) = self.heap.get_mut(id) {
                    if name == "__name__" {
                        func.name = text;
                    } else {
                        func.qualname = text;
                    }
                }
                Ok(())
            }
            _ => {
                let err = self.no_attribute(owner, name);
                value.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    /// Stores into the attribute dict of an instance, class or exception.
    fn store_in_dict(&mut self, id: HeapId, name: &str, value: Value) -> RunResult<()> {
        let key = match self.attr_key(name) {
            Ok(key) => key,
            Err(err) => {
                value.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        let dict: Option<&mut Dict> = match self.heap.get_mut(id) {
            HeapData::Instance(instance) => Some(&mut instance.attrs),
            HeapData::Class(class) => Some(&mut class.namespace),
            HeapData::Exception(exc) => Some(&mut exc.attrs),
            _ => None,
        };
        let Some(dict) = dict else {
            key.drop_with_heap(self.heap);
            value.drop_with_heap(self.heap);
            return Err(RunError::internal("store_in_dict: object has no attribute dict"));
        };
        let displaced = dict.set(HashKey::Str(name.into()), key, value);
        displaced.drop_with_heap(self.heap);
        Ok(())
    }

    fn set_exception_attr(&mut self, id: HeapId, name: &str, value: Value) -> RunResult<()> {
        let valid = match name {
            "__cause__" | "__context__" => {
                value.is_none() || matches!(value.ref_id().map(|v| self.heap.get(v)), Some(HeapData::Exception(_)))
            }
            "__traceback__" => {
                value.is_none() || matches!(value.ref_id().map(|v| self.heap.get(v)), Some(HeapData::Traceback(_)))
            }
            _ => true,
        };
        if !valid {
            value.drop_with_heap(self.heap);
            return Err(ExcType::type_error(match name {
                "__traceback__" => "__traceback__ must be a traceback or None",
                "__cause__" => "exception cause must be None or derive from BaseException",
                _ => "exception context must be None or derive from BaseException",
            }));
        }
        if name == "__suppress_context__" {
            let flag = value.py_bool(self.heap, self.interns);
            value.drop_with_heap(self.heap);
            if let HeapData::Exception(exc) = self.heap.get_mut(id) {
                exc.suppress_context = flag;
            }
            return Ok(());
        }
        let HeapData::Exception(exc) = self.heap.get_mut(id) else {
            value.drop_with_heap(self.heap);
            return Err(RunError::internal("set_exception_attr: not an exception"));
        };
        let old = match name {
            "__cause__" => {
                exc.suppress_context = true;
                std::mem::replace(&mut exc.cause, value)
            }
            "__context__" => std::mem::replace(&mut exc.context, value),
            "__traceback__" => std::mem::replace(&mut exc.traceback, value),
            _ => return self.store_in_dict(id, name, value),
        };
        old.drop_with_heap(self.heap);
        Ok(())
    }

    /// `delattr(owner, name)`.
    pub(crate) fn del_attr(&mut self, owner: &Value, name: &str) -> RunResult<()> {
        let removed = match owner.ref_id().map(|id| self.heap.get_mut(id)) {
            Some(HeapData::Instance(instance)) => instance.attrs.remove_str(name),
            Some(HeapData::Class(class)) => class.namespace.remove_str(name),
            Some(HeapData::Exception(exc)) => exc.attrs.remove_str(name),
            _ => None,
        };
        match removed {
            Some(pair) => {
                pair.drop_with_heap(self.heap);
                Ok(())
            }
            None => Err(self.no_attribute(owner, name)),
        }
    }

    /// `LOAD_METHOD`: avoids allocating a bound method when the attribute is a function
    /// found on the class of an instance, or a method of a builtin type.
    ///
    /// Returns the pair to push: `(function, owner)` on the fast path, otherwise
    /// `(Undefined, attribute)`.
    pub(super) fn load_method(&mut self, owner: Value, name: &str) -> RunResult<(Value, Value)> {
        let fast = match owner.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Instance(instance)) if instance.attrs.get_str(name).is_none() => instance
                .class
                .ref_id()
                .and_then(|class_id| lookup_class_attr(class_id, name, self.heap))
                .filter(|attr| matches!(attr.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Function(_))))
                .map(|attr| attr.clone_with_heap(self.heap)),
            Some(HeapData::Instance(_) | HeapData::Class(_) | HeapData::Exception(_)) => None,
            _ => {
                let ty = owner.py_type(self.heap);
                lookup_type_method(ty, name).map(|method| Value::Builtin(Builtins::TypeMethod { ty, method }))
            }
        };
        if let Some(method) = fast {
            return Ok((method, owner));
        }
        let attr = self.get_attr(&owner, name);
        owner.drop_with_heap(self.heap);
        Ok((Value::Undefined, attr?))
    }
}

/// Intermediate result of `heap_attr` while the heap is borrowed.
enum AttrValue {
    Found(Option<Value>),
    Text(String),
    Items(Vec<Value>),
}

use AttrValue::{Found, Items, Text};
