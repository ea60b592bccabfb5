//! Methods of builtin types.
//!
//! A method looked up on a builtin value becomes a bound method whose function is
//! `Builtins::TypeMethod`; looked up on the type it stays unbound. Either way the call
//! lands in [`call_type_method`] with the receiver as the first positional argument.

use std::str::FromStr;

use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    exception_private::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{HashKey, Type, allocate_list, allocate_str, allocate_tuple, dict_set},
    value::Value,
};

const LIST_METHODS: &[StaticStrings] = &[
    StaticStrings::Append,
    StaticStrings::Extend,
    StaticStrings::Pop,
    StaticStrings::Insert,
    StaticStrings::Index,
    StaticStrings::Count,
    StaticStrings::Clear,
    StaticStrings::Copy,
];

const DICT_METHODS: &[StaticStrings] = &[
    StaticStrings::Get,
    StaticStrings::Keys,
    StaticStrings::Values,
    StaticStrings::Items,
    StaticStrings::Update,
    StaticStrings::Pop,
    StaticStrings::Setdefault,
    StaticStrings::Clear,
    StaticStrings::Copy,
];

const STR_METHODS: &[StaticStrings] = &[
    StaticStrings::Join,
    StaticStrings::Upper,
    StaticStrings::Lower,
    StaticStrings::Strip,
    StaticStrings::Split,
    StaticStrings::Startswith,
    StaticStrings::Endswith,
];

const GENERATOR_METHODS: &[StaticStrings] = &[StaticStrings::Send, StaticStrings::Throw, StaticStrings::Close];

const EXCEPTION_METHODS: &[StaticStrings] = &[StaticStrings::WithTraceback];

fn methods_of(ty: Type) -> &'static [StaticStrings] {
    match ty {
        Type::List => LIST_METHODS,
        Type::Dict => DICT_METHODS,
        Type::Str => STR_METHODS,
        Type::Generator => GENERATOR_METHODS,
        Type::Exception => EXCEPTION_METHODS,
        _ => &[],
    }
}

/// Finds the method `name` of builtin type `ty`.
pub(crate) fn lookup_type_method(ty: Type, name: &str) -> Option<StaticStrings> {
    StaticStrings::from_str(name)
        .ok()
        .filter(|method| methods_of(ty).contains(method))
}

/// Calls method `method` of builtin type `ty`.
pub(crate) fn call_type_method<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    ty: Type,
    method: StaticStrings,
    args: CallArgs,
) -> RunResult<Value> {
    let name: &'static str = method.into();
    let (mut positional, kwargs) = args.into_parts(vm.heap);
    if positional.is_empty() {
        kwargs.drop_with_heap(vm.heap);
        return Err(ExcType::type_error(format!(
            "descriptor '{name}' of '{ty}' object needs an argument"
        )));
    }
    let receiver = positional.remove(0);
    if !receiver_matches(&receiver, ty, vm) {
        let err = ExcType::type_error(format!(
            "descriptor '{name}' for '{ty}' objects doesn't apply to a '{}' object",
            receiver.type_name(vm.heap)
        ));
        receiver.drop_with_heap(vm.heap);
        positional.drop_with_heap(vm.heap);
        kwargs.drop_with_heap(vm.heap);
        return Err(err);
    }
    let accepts_kwargs = ty == Type::Dict && method == StaticStrings::Update;
    if !kwargs.is_empty() && !accepts_kwargs {
        receiver.drop_with_heap(vm.heap);
        positional.drop_with_heap(vm.heap);
        kwargs.drop_with_heap(vm.heap);
        return Err(ExcType::type_error(format!("{name}() takes no keyword arguments")));
    }

    let result = match (ty, receiver.ref_id()) {
        (Type::List, Some(id)) => list_method(vm, id, method, positional),
        (Type::Dict, Some(id)) => dict_method(vm, id, method, positional, kwargs),
        (Type::Str, _) => str_method(vm, &receiver, method, positional),
        (Type::Generator, Some(id)) => generator_method(vm, id, method, positional),
        (Type::Exception, Some(id)) => exception_method(vm, &receiver, id, method, positional),
        _ => {
            positional.drop_with_heap(vm.heap);
            Err(RunError::internal("call_type_method: no receiver for builtin method"))
        }
    };
    receiver.drop_with_heap(vm.heap);
    result
}

fn receiver_matches<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    receiver: &Value,
    ty: Type,
    vm: &VM<'_, T, P, Tr>,
) -> bool {
    receiver.py_type(vm.heap) == ty
}

/// Arity check for a method taking `min..=max` arguments after the receiver.
fn method_args<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    name: StaticStrings,
    args: Vec<Value>,
    min: usize,
    max: usize,
) -> RunResult<Vec<Value>> {
    let name: &'static str = name.into();
    CallArgs::positional(args).positional_only(name, min, max, vm.heap)
}

fn one_arg(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or(Value::None)
}

// ============================================================================
// list
// ============================================================================

fn list_method<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    list_id: HeapId,
    method: StaticStrings,
    args: Vec<Value>,
) -> RunResult<Value> {
    match method {
        StaticStrings::Append => {
            let item = one_arg(method_args(vm, method, args, 1, 1)?);
            list_items_mut(vm, list_id).push(item);
            Ok(Value::None)
        }
        StaticStrings::Extend => {
            let iterable = one_arg(method_args(vm, method, args, 1, 1)?);
            let items = vm.collect_iterable(iterable)?;
            list_items_mut(vm, list_id).extend(items);
            Ok(Value::None)
        }
        StaticStrings::Pop => {
            let args = method_args(vm, method, args, 0, 1)?;
            let index = match args.first() {
                None => -1,
                Some(value) => match value.as_index() {
                    Some(index) => index,
                    None => {
                        let err = index_type_error(value, vm);
                        args.drop_with_heap(vm.heap);
                        return Err(err);
                    }
                },
            };
            let items = list_items_mut(vm, list_id);
            if items.is_empty() {
                return Err(ExcType::index_error("pop from empty list"));
            }
            match normalize_index(index, items.len()) {
                Some(position) => Ok(items.remove(position)),
                None => Err(ExcType::index_error("pop index out of range")),
            }
        }
        StaticStrings::Insert => {
            let mut args = method_args(vm, method, args, 2, 2)?.into_iter();
            let (Some(index), Some(item)) = (args.next(), args.next()) else {
                return Err(RunError::internal("list.insert: arity checked"));
            };
            let Some(index) = index.as_index() else {
                let err = index_type_error(&index, vm);
                index.drop_with_heap(vm.heap);
                item.drop_with_heap(vm.heap);
                return Err(err);
            };
            let items = list_items_mut(vm, list_id);
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(usize::try_from(position).unwrap_or(0), item);
            Ok(Value::None)
        }
        StaticStrings::Index | StaticStrings::Count => {
            let needle = one_arg(method_args(vm, method, args, 1, 1)?);
            let HeapData::List(list) = vm.heap.get(list_id) else {
                needle.drop_with_heap(vm.heap);
                return Err(RunError::internal("list method on a non-list"));
            };
            let mut matches = list
                .as_slice()
                .iter()
                .enumerate()
                .filter(|(_, item)| item.py_eq(&needle, vm.heap, vm.interns))
                .map(|(position, _)| position);
            let result = if method == StaticStrings::Count {
                Ok(Value::Int(i64::try_from(matches.count()).unwrap_or(i64::MAX)))
            } else {
                match matches.next() {
                    Some(position) => Ok(Value::Int(i64::try_from(position).unwrap_or(i64::MAX))),
                    None => Err(ExcType::value_error(format!(
                        "{} is not in list",
                        needle.py_repr(vm.heap, vm.interns)
                    ))),
                }
            };
            needle.drop_with_heap(vm.heap);
            result
        }
        StaticStrings::Clear => {
            method_args(vm, method, args, 0, 0)?;
            let items = std::mem::take(list_items_mut(vm, list_id));
            items.drop_with_heap(vm.heap);
            Ok(Value::None)
        }
        StaticStrings::Copy => {
            method_args(vm, method, args, 0, 0)?;
            let HeapData::List(list) = vm.heap.get(list_id) else {
                return Err(RunError::internal("list method on a non-list"));
            };
            let items = list.as_slice().iter().map(|item| item.clone_with_heap(vm.heap)).collect();
            allocate_list(vm.heap, items)
        }
        _ => {
            args.drop_with_heap(vm.heap);
            Err(RunError::internal("unknown list method"))
        }
    }
}

fn list_items_mut<'h, T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &'h mut VM<'_, T, P, Tr>,
    list_id: HeapId,
) -> &'h mut Vec<Value> {
    match vm.heap.get_mut(list_id) {
        HeapData::List(list) => list.as_vec_mut(),
        _ => unreachable!("list_items_mut: receiver type checked by call_type_method"),
    }
}

/// Resolves a possibly negative index against `len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

fn index_type_error<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(value: &Value, vm: &VM<'_, T, P, Tr>) -> RunError {
    ExcType::type_error(format!(
        "'{}' object cannot be interpreted as an integer",
        value.type_name(vm.heap)
    ))
}

// ============================================================================
// dict
// ============================================================================

fn dict_method<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    dict_id: HeapId,
    method: StaticStrings,
    args: Vec<Value>,
    kwargs: Vec<(Value, Value)>,
) -> RunResult<Value> {
    match method {
        StaticStrings::Get => {
            let mut args = method_args(vm, method, args, 1, 2)?.into_iter();
            let key = args.next().unwrap_or(Value::None);
            let default = args.next().unwrap_or(Value::None);
            let found = dict_lookup(vm, dict_id, &key);
            key.drop_with_heap(vm.heap);
            match found {
                Ok(Some(value)) => {
                    default.drop_with_heap(vm.heap);
                    Ok(value)
                }
                Ok(None) => Ok(default),
                Err(err) => {
                    default.drop_with_heap(vm.heap);
                    Err(err)
                }
            }
        }
        StaticStrings::Keys | StaticStrings::Values | StaticStrings::Items => {
            method_args(vm, method, args, 0, 0)?;
            let HeapData::Dict(dict) = vm.heap.get(dict_id) else {
                return Err(RunError::internal("dict method on a non-dict"));
            };
            let heap = &*vm.heap;
            let entries: Vec<(Value, Value)> = dict
                .iter()
                .map(|(k, v)| (k.clone_with_heap(heap), v.clone_with_heap(heap)))
                .collect();
            let mut items = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                match method {
                    StaticStrings::Keys => {
                        value.drop_with_heap(vm.heap);
                        items.push(key);
                    }
                    StaticStrings::Values => {
                        key.drop_with_heap(vm.heap);
                        items.push(value);
                    }
                    _ => match allocate_tuple(vm.heap, vec![key, value]) {
                        Ok(pair) => items.push(pair),
                        Err(err) => {
                            items.drop_with_heap(vm.heap);
                            return Err(err);
                        }
                    },
                }
            }
            allocate_list(vm.heap, items)
        }
        StaticStrings::Update => {
            let args = match method_args(vm, method, args, 0, 1) {
                Ok(args) => args,
                Err(err) => {
                    kwargs.drop_with_heap(vm.heap);
                    return Err(err);
                }
            };
            if let Some(other) = args.into_iter().next() {
                let merged = vm.dict_update_from(dict_id, &other);
                other.drop_with_heap(vm.heap);
                if let Err(err) = merged {
                    kwargs.drop_with_heap(vm.heap);
                    return Err(err);
                }
            }
            let mut kwargs = kwargs.into_iter();
            while let Some((key, value)) = kwargs.next() {
                if let Err(err) = dict_set(vm.heap, vm.interns, dict_id, key, value) {
                    kwargs.drop_with_heap(vm.heap);
                    return Err(err);
                }
            }
            Ok(Value::None)
        }
        StaticStrings::Pop => {
            let mut args = method_args(vm, method, args, 1, 2)?.into_iter();
            let key = args.next().unwrap_or(Value::None);
            let default = args.next();
            let hash_key = match HashKey::from_value(&key, vm.heap, vm.interns) {
                Ok(hash_key) => hash_key,
                Err(err) => {
                    key.drop_with_heap(vm.heap);
                    default.drop_with_heap(vm.heap);
                    return Err(err);
                }
            };
            let removed = match vm.heap.get_mut(dict_id) {
                HeapData::Dict(dict) => dict.remove(&hash_key),
                _ => None,
            };
            match (removed, default) {
                (Some((old_key, value)), default) => {
                    old_key.drop_with_heap(vm.heap);
                    key.drop_with_heap(vm.heap);
                    default.drop_with_heap(vm.heap);
                    Ok(value)
                }
                (None, Some(default)) => {
                    key.drop_with_heap(vm.heap);
                    Ok(default)
                }
                (None, None) => Err(vm.key_error(key)),
            }
        }
        StaticStrings::Setdefault => {
            let mut args = method_args(vm, method, args, 1, 2)?.into_iter();
            let key = args.next().unwrap_or(Value::None);
            let default = args.next().unwrap_or(Value::None);
            match dict_lookup(vm, dict_id, &key) {
                Ok(Some(existing)) => {
                    key.drop_with_heap(vm.heap);
                    default.drop_with_heap(vm.heap);
                    Ok(existing)
                }
                Ok(None) => {
                    let stored = default.clone_with_heap(vm.heap);
                    if let Err(err) = dict_set(vm.heap, vm.interns, dict_id, key, stored) {
                        default.drop_with_heap(vm.heap);
                        return Err(err);
                    }
                    Ok(default)
                }
                Err(err) => {
                    key.drop_with_heap(vm.heap);
                    default.drop_with_heap(vm.heap);
                    Err(err)
                }
            }
        }
        StaticStrings::Clear => {
            method_args(vm, method, args, 0, 0)?;
            let entries = match vm.heap.get_mut(dict_id) {
                HeapData::Dict(dict) => dict.drain(),
                _ => Vec::new(),
            };
            entries.drop_with_heap(vm.heap);
            Ok(Value::None)
        }
        StaticStrings::Copy => {
            method_args(vm, method, args, 0, 0)?;
            let copy = match vm.heap.get(dict_id) {
                HeapData::Dict(dict) => dict.clone_with_heap(vm.heap),
                _ => return Err(RunError::internal("dict method on a non-dict")),
            };
            Ok(Value::Ref(vm.heap.allocate(HeapData::Dict(copy))?))
        }
        _ => {
            args.drop_with_heap(vm.heap);
            kwargs.drop_with_heap(vm.heap);
            Err(RunError::internal("unknown dict method"))
        }
    }
}

/// A new reference to the value stored under `key`, if any.
fn dict_lookup<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &VM<'_, T, P, Tr>,
    dict_id: HeapId,
    key: &Value,
) -> RunResult<Option<Value>> {
    let hash_key = HashKey::from_value(key, vm.heap, vm.interns)?;
    Ok(match vm.heap.get(dict_id) {
        HeapData::Dict(dict) => dict.get(&hash_key).map(|value| value.clone_with_heap(vm.heap)),
        _ => None,
    })
}

// ============================================================================
// str
// ============================================================================

fn str_method<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    receiver: &Value,
    method: StaticStrings,
    args: Vec<Value>,
) -> RunResult<Value> {
    let text = receiver.as_str(vm.heap, vm.interns).unwrap_or_default().to_owned();
    match method {
        StaticStrings::Upper => {
            method_args(vm, method, args, 0, 0)?;
            allocate_str(vm.heap, text.to_uppercase())
        }
        StaticStrings::Lower => {
            method_args(vm, method, args, 0, 0)?;
            allocate_str(vm.heap, text.to_lowercase())
        }
        StaticStrings::Strip => {
            let args = method_args(vm, method, args, 0, 1)?;
            let chars = match args.first() {
                None | Some(Value::None) => None,
                Some(value) => match value.as_str(vm.heap, vm.interns) {
                    Some(chars) => Some(chars.to_owned()),
                    None => {
                        let err = ExcType::type_error(format!(
                            "strip arg must be None or str, not {}",
                            value.type_name(vm.heap)
                        ));
                        args.drop_with_heap(vm.heap);
                        return Err(err);
                    }
                },
            };
            args.drop_with_heap(vm.heap);
            let stripped = match chars {
                None => text.trim(),
                Some(chars) => text.trim_matches(|c| chars.contains(c)),
            };
            allocate_str(vm.heap, stripped)
        }
        StaticStrings::Join => {
            let iterable = one_arg(method_args(vm, method, args, 1, 1)?);
            let items = vm.collect_iterable(iterable)?;
            let mut parts = Vec::with_capacity(items.len());
            let mut error = None;
            for (index, item) in items.iter().enumerate() {
                match item.as_str(vm.heap, vm.interns) {
                    Some(part) => parts.push(part.to_owned()),
                    None => {
                        error = Some(ExcType::type_error(format!(
                            "sequence item {index}: expected str instance, {} found",
                            item.type_name(vm.heap)
                        )));
                        break;
                    }
                }
            }
            items.drop_with_heap(vm.heap);
            match error {
                Some(err) => Err(err),
                None => allocate_str(vm.heap, parts.join(&text)),
            }
        }
        StaticStrings::Split => {
            let args = method_args(vm, method, args, 0, 2)?;
            let sep = match args.first() {
                None | Some(Value::None) => Ok(None),
                Some(value) => match value.as_str(vm.heap, vm.interns) {
                    Some("") => Err(ExcType::value_error("empty separator")),
                    Some(sep) => Ok(Some(sep.to_owned())),
                    None => Err(ExcType::type_error(format!(
                        "must be str or None, not {}",
                        value.type_name(vm.heap)
                    ))),
                },
            };
            let maxsplit = match args.get(1) {
                None => Ok(-1),
                Some(value) => value.as_index().ok_or_else(|| index_type_error(value, vm)),
            };
            args.drop_with_heap(vm.heap);
            let (sep, maxsplit) = (sep?, maxsplit?);
            let limit = usize::try_from(maxsplit).ok();
            let parts: Vec<String> = match sep {
                Some(sep) => match limit {
                    Some(limit) => text.splitn(limit + 1, sep.as_str()).map(str::to_owned).collect(),
                    None => text.split(sep.as_str()).map(str::to_owned).collect(),
                },
                None => split_whitespace(&text, limit),
            };
            let mut items = Vec::with_capacity(parts.len());
            for part in parts {
                match allocate_str(vm.heap, part) {
                    Ok(item) => items.push(item),
                    Err(err) => {
                        items.drop_with_heap(vm.heap);
                        return Err(err);
                    }
                }
            }
            allocate_list(vm.heap, items)
        }
        StaticStrings::Startswith | StaticStrings::Endswith => {
            let affix = one_arg(method_args(vm, method, args, 1, 1)?);
            let name: &'static str = method.into();
            let candidates: Option<Vec<String>> = match affix.as_str(vm.heap, vm.interns) {
                Some(single) => Some(vec![single.to_owned()]),
                None => match affix.ref_id().map(|id| vm.heap.get(id)) {
                    Some(HeapData::Tuple(tuple)) => tuple
                        .as_slice()
                        .iter()
                        .map(|item| item.as_str(vm.heap, vm.interns).map(str::to_owned))
                        .collect(),
                    _ => None,
                },
            };
            let result = match candidates {
                Some(candidates) => Ok(Value::Bool(candidates.iter().any(|candidate| {
                    if method == StaticStrings::Startswith {
                        text.starts_with(candidate.as_str())
                    } else {
                        text.ends_with(candidate.as_str())
                    }
                }))),
                None => Err(ExcType::type_error(format!(
                    "{name} first arg must be str or a tuple of str, not {}",
                    affix.type_name(vm.heap)
                ))),
            };
            affix.drop_with_heap(vm.heap);
            result
        }
        _ => {
            args.drop_with_heap(vm.heap);
            Err(RunError::internal("unknown str method"))
        }
    }
}

/// `str.split()` without a separator: runs of whitespace separate, leading and trailing
/// whitespace is dropped, at most `limit` splits.
fn split_whitespace(text: &str, limit: Option<usize>) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|limit| parts.len() >= limit) {
            parts.push(rest.to_owned());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_owned());
        rest = rest[end..].trim_start();
    }
    parts
}

// ============================================================================
// generator
// ============================================================================

fn generator_method<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    gen_id: HeapId,
    method: StaticStrings,
    args: Vec<Value>,
) -> RunResult<Value> {
    match method {
        StaticStrings::Send => {
            let value = one_arg(method_args(vm, method, args, 1, 1)?);
            let result = vm.gen_send(gen_id, value);
            vm.gen_result_value(result)
        }
        StaticStrings::Throw => {
            let mut args = method_args(vm, method, args, 1, 3)?.into_iter();
            let typ = args.next().unwrap_or(Value::None);
            let value = args.next().unwrap_or(Value::None);
            let tb = args.next().unwrap_or(Value::None);
            let result = vm.gen_throw(gen_id, typ, value, tb);
            vm.gen_result_value(result)
        }
        StaticStrings::Close => {
            method_args(vm, method, args, 0, 0)?;
            vm.gen_close(gen_id)?;
            Ok(Value::None)
        }
        _ => {
            args.drop_with_heap(vm.heap);
            Err(RunError::internal("unknown generator method"))
        }
    }
}

// ============================================================================
// exceptions
// ============================================================================

fn exception_method<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    receiver: &Value,
    exc_id: HeapId,
    method: StaticStrings,
    args: Vec<Value>,
) -> RunResult<Value> {
    if method != StaticStrings::WithTraceback {
        args.drop_with_heap(vm.heap);
        return Err(RunError::internal("unknown exception method"));
    }
    let tb = one_arg(method_args(vm, method, args, 1, 1)?);
    let valid = tb.is_none() || matches!(tb.ref_id().map(|id| vm.heap.get(id)), Some(HeapData::Traceback(_)));
    if !valid {
        tb.drop_with_heap(vm.heap);
        return Err(ExcType::type_error("__traceback__ must be a traceback or None"));
    }
    if let HeapData::Exception(exc) = vm.heap.get_mut(exc_id) {
        let old = std::mem::replace(&mut exc.traceback, tb);
        old.drop_with_heap(vm.heap);
    } else {
        tb.drop_with_heap(vm.heap);
    }
    Ok(receiver.clone_with_heap(vm.heap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_found_per_type() {
        assert_eq!(lookup_type_method(Type::List, "append"), Some(StaticStrings::Append));
        assert_eq!(lookup_type_method(Type::Dict, "append"), None);
        assert_eq!(lookup_type_method(Type::Generator, "send"), Some(StaticStrings::Send));
        assert_eq!(lookup_type_method(Type::Int, "send"), None);
    }

    #[test]
    fn whitespace_split_honours_the_limit() {
        assert_eq!(split_whitespace("  a b\t c  ", None), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", Some(1)), vec!["a", "b c"]);
        assert!(split_whitespace("   ", None).is_empty());
    }

    #[test]
    fn negative_indexes_count_from_the_end() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
