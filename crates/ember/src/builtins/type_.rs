//! Builtin type constructors and the type() builtin.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Num};

use super::build_class::create_class;
use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    exception_private::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData},
    intern::{Interns, StaticStrings},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        Dict, HashKey, Instance, LongInt, Range, Slice, Type, allocate_list, allocate_str, allocate_tuple, dict_set,
        str::string_repr,
    },
    value::Value,
};

/// The class of `value`: the user class for instances and exceptions, a builtin type
/// otherwise. Returns a new reference.
pub(crate) fn type_of(value: &Value, heap: &Heap<impl ResourceTracker>) -> Value {
    if let Value::Ref(id) = value {
        match heap.get(*id) {
            HeapData::Instance(instance) => return instance.class.clone_with_heap(heap),
            HeapData::Exception(exc) => return exc.class.clone_with_heap(heap),
            _ => {}
        }
    }
    Value::from(value.py_type(heap))
}

/// Calls a builtin type as a constructor.
pub(crate) fn call_type<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    ty: Type,
    args: CallArgs,
) -> RunResult<Value> {
    match ty {
        Type::Object => {
            args.check_zero_args("object", vm.heap)?;
            let instance = Instance {
                class: Value::from(Type::Object),
                attrs: Dict::new(),
            };
            Ok(Value::Ref(vm.heap.allocate(HeapData::Instance(instance))?))
        }
        Type::Type => type_call(vm, args),
        Type::Bool => match args.get_zero_one_arg("bool", vm.heap)? {
            None => Ok(Value::Bool(false)),
            Some(value) => {
                let result = vm.is_true(&value);
                value.drop_with_heap(vm.heap);
                Ok(Value::Bool(result?))
            }
        },
        Type::Int => int_new(vm, args),
        Type::Float => float_new(vm, args),
        Type::Str => match args.get_zero_one_arg("str", vm.heap)? {
            None => Ok(Value::InternString(StaticStrings::EmptyString.into())),
            Some(value) => {
                let text = vm.str_value(&value);
                value.drop_with_heap(vm.heap);
                allocate_str(vm.heap, text?)
            }
        },
        Type::List => {
            let items = match args.get_zero_one_arg("list", vm.heap)? {
                None => Vec::new(),
                Some(iterable) => vm.collect_iterable(iterable)?,
            };
            allocate_list(vm.heap, items)
        }
        Type::Tuple => match args.get_zero_one_arg("tuple", vm.heap)? {
            None => allocate_tuple(vm.heap, Vec::new()),
            Some(value) if value.py_type(vm.heap) == Type::Tuple => Ok(value),
            Some(iterable) => {
                let items = vm.collect_iterable(iterable)?;
                allocate_tuple(vm.heap, items)
            }
        },
        Type::Dict => dict_new(vm, args),
        Type::Range => range_new(vm.heap, args),
        Type::Slice => slice_new(vm.heap, args),
        other => {
            args.drop_with_heap(vm.heap);
            Err(ExcType::type_error(format!("cannot create '{other}' instances")))
        }
    }
}

/// `type(obj)` returns the object's class, `type(name, bases, dict)` creates one.
fn type_call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let mut args = args.positional_only("type", 1, 3, vm.heap)?;
    match args.len() {
        1 => {
            let value = args.pop().unwrap_or(Value::None);
            let class = type_of(&value, vm.heap);
            value.drop_with_heap(vm.heap);
            Ok(class)
        }
        3 => {
            let mut args = args.into_iter();
            let (Some(name), Some(bases), Some(namespace)) = (args.next(), args.next(), args.next()) else {
                return Err(ExcType::type_error("type() takes 1 or 3 arguments"));
            };
            type_new(vm, name, bases, namespace)
        }
        _ => {
            args.drop_with_heap(vm.heap);
            Err(ExcType::type_error("type() takes 1 or 3 arguments"))
        }
    }
}

fn type_new<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    name: Value,
    bases: Value,
    namespace: Value,
) -> RunResult<Value> {
    let heap = &mut *vm.heap;
    let parsed = type_new_args(&name, &bases, &namespace, heap, vm.interns);
    name.drop_with_heap(heap);
    bases.drop_with_heap(heap);
    namespace.drop_with_heap(heap);
    let (name, bases, entries) = parsed?;

    let mut dict = Dict::new();
    let mut entries = entries.into_iter();
    while let Some((key, value)) = entries.next() {
        match HashKey::from_value(&key, heap, vm.interns) {
            Ok(hash_key) => {
                if let Some(displaced) = dict.set(hash_key, key, value) {
                    displaced.drop_with_heap(heap);
                }
            }
            Err(err) => {
                key.drop_with_heap(heap);
                value.drop_with_heap(heap);
                entries.drop_with_heap(heap);
                dict.drain().drop_with_heap(heap);
                bases.drop_with_heap(heap);
                return Err(err);
            }
        }
    }
    create_class(heap, vm.interns, name, bases, dict)
}

/// Checks the argument types of `type(name, bases, dict)`, returning new references.
fn type_new_args(
    name: &Value,
    bases: &Value,
    namespace: &Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<(String, Vec<Value>, Vec<(Value, Value)>)> {
    let Some(name) = name.as_str(heap, interns) else {
        return Err(ExcType::type_error(format!(
            "type.__new__() argument 1 must be str, not {}",
            name.type_name(heap)
        )));
    };
    let Some(HeapData::Tuple(bases_tuple)) = bases.ref_id().map(|id| heap.get(id)) else {
        return Err(ExcType::type_error(format!(
            "type.__new__() argument 2 must be tuple, not {}",
            bases.type_name(heap)
        )));
    };
    let Some(HeapData::Dict(dict)) = namespace.ref_id().map(|id| heap.get(id)) else {
        return Err(ExcType::type_error(format!(
            "type.__new__() argument 3 must be dict, not {}",
            namespace.type_name(heap)
        )));
    };
    let bases = bases_tuple.as_slice().iter().map(|b| b.clone_with_heap(heap)).collect();
    let entries = dict
        .iter()
        .map(|(k, v)| (k.clone_with_heap(heap), v.clone_with_heap(heap)))
        .collect();
    Ok((name.to_owned(), bases, entries))
}

fn int_new<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let heap = &mut *vm.heap;
    let mut args = args.positional_only("int", 0, 2, heap)?.into_iter();
    let (value, base) = (args.next(), args.next());
    let Some(value) = value else {
        return Ok(Value::Int(0));
    };
    let result = match &base {
        None => int_from_value(&value, heap, vm.interns),
        Some(base) => match (value.as_str(heap, vm.interns), base.as_index()) {
            (Some(text), Some(base)) if base == 0 || (2..=36).contains(&base) => {
                let text = text.to_owned();
                parse_int(&text, u32::try_from(base).unwrap_or(10), heap)
            }
            (Some(_), Some(_)) => Err(ExcType::value_error("int() base must be >= 2 and <= 36, or 0")),
            (Some(_), None) => Err(ExcType::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                base.type_name(heap)
            ))),
            (None, _) => Err(ExcType::type_error("int() can't convert non-string with explicit base")),
        },
    };
    value.drop_with_heap(heap);
    base.drop_with_heap(heap);
    result
}

fn int_from_value(
    value: &Value,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    if let Some(i) = value.as_index() {
        return Ok(Value::Int(i));
    }
    if let Some(text) = value.as_str(heap, interns) {
        let text = text.to_owned();
        return parse_int(&text, 10, heap);
    }
    match value {
        Value::Float(f) if f.is_nan() => Err(ExcType::value_error("cannot convert float NaN to integer")),
        Value::Float(f) if f.is_infinite() => {
            Err(ExcType::overflow_error("cannot convert float infinity to integer"))
        }
        Value::Float(f) => {
            let truncated = BigInt::from_f64(f.trunc()).unwrap_or_default();
            Ok(LongInt::new(truncated).into_value(heap)?)
        }
        Value::Ref(_) if value.py_type(heap) == Type::Int => Ok(value.clone_with_heap(heap)),
        _ => Err(ExcType::type_error(format!(
            "int() argument must be a string, a bytes-like object or a number, not '{}'",
            value.type_name(heap)
        ))),
    }
}

/// Parses an integer literal the way `int(text, base)` does: surrounding whitespace, a
/// sign, single underscores between digits and, for base 0 or a matching base, a prefix.
fn parse_int(text: &str, base: u32, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
    let invalid = || {
        ExcType::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            string_repr(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = unsigned.to_ascii_lowercase();
    let prefixed = |prefix: &str, radix: u32| (base == 0 || base == radix) && lower.starts_with(prefix);
    let (radix, digits) = if prefixed("0x", 16) {
        (16, &unsigned[2..])
    } else if prefixed("0o", 8) {
        (8, &unsigned[2..])
    } else if prefixed("0b", 2) {
        (2, &unsigned[2..])
    } else if base == 0 {
        if unsigned.len() > 1 && unsigned.starts_with('0') && unsigned.bytes().any(|b| b != b'0' && b != b'_') {
            return Err(invalid());
        }
        (10, unsigned)
    } else {
        (base, unsigned)
    };
    let digits = digits.strip_prefix('_').filter(|_| radix != base || base == 0).unwrap_or(digits);
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = BigInt::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    Ok(LongInt::new(value).into_value(heap)?)
}

fn float_new<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let heap = &mut *vm.heap;
    let Some(value) = args.get_zero_one_arg("float", heap)? else {
        return Ok(Value::Float(0.0));
    };
    let result = if let Some(text) = value.as_str(heap, vm.interns) {
        parse_float(text).map(Value::Float)
    } else {
        match value.py_type(heap) {
            Type::Int | Type::Bool | Type::Float => match value.as_f64(heap) {
                Some(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(ExcType::overflow_error("int too large to convert to float")),
            },
            _ => Err(ExcType::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                value.type_name(heap)
            ))),
        }
    };
    value.drop_with_heap(heap);
    result
}

fn parse_float(text: &str) -> RunResult<f64> {
    let trimmed = text.trim();
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    let valid_underscores = !trimmed.starts_with('_') && !trimmed.ends_with('_') && !trimmed.contains("__");
    match cleaned.parse::<f64>() {
        Ok(f) if valid_underscores => Ok(f),
        _ => Err(ExcType::value_error(format!(
            "could not convert string to float: {}",
            string_repr(text)
        ))),
    }
}

fn dict_new<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let (positional, kwargs) = args.into_parts(vm.heap);
    if positional.len() > 1 {
        let count = positional.len();
        positional.drop_with_heap(vm.heap);
        kwargs.drop_with_heap(vm.heap);
        return Err(ExcType::type_error(format!("dict expected at most 1 argument, got {count}")));
    }
    let dict_id = match vm.heap.allocate(HeapData::Dict(Dict::new())) {
        Ok(id) => id,
        Err(err) => {
            positional.drop_with_heap(vm.heap);
            kwargs.drop_with_heap(vm.heap);
            return Err(err.into());
        }
    };
    let result = (|| {
        if let Some(source) = positional.into_iter().next() {
            let merged = vm.dict_update_from(dict_id, &source);
            source.drop_with_heap(vm.heap);
            merged?;
        }
        let mut kwargs = kwargs.into_iter();
        while let Some((key, value)) = kwargs.next() {
            if let Err(err) = dict_set(vm.heap, vm.interns, dict_id, key, value) {
                kwargs.drop_with_heap(vm.heap);
                return Err(err);
            }
        }
        Ok(())
    })();
    match result {
        Ok(()) => Ok(Value::Ref(dict_id)),
        Err(err) => {
            vm.heap.dec_ref(dict_id);
            Err(err)
        }
    }
}

fn range_new(heap: &mut Heap<impl ResourceTracker>, args: CallArgs) -> RunResult<Value> {
    let args = args.positional_only("range", 1, 3, heap)?;
    let ints: Vec<Option<i64>> = args.iter().map(Value::as_index).collect();
    let bad = args
        .iter()
        .find(|arg| arg.as_index().is_none())
        .map(|arg| arg.type_name(heap).into_owned());
    args.drop_with_heap(heap);
    if let Some(type_name) = bad {
        return Err(ExcType::type_error(format!(
            "'{type_name}' object cannot be interpreted as an integer"
        )));
    }
    let ints: Vec<i64> = ints.into_iter().flatten().collect();
    let range = match ints.as_slice() {
        [stop] => Range::new(0, *stop, 1)?,
        [start, stop] => Range::new(*start, *stop, 1)?,
        [start, stop, step] => Range::new(*start, *stop, *step)?,
        _ => return Err(ExcType::type_error("range expected at least 1 argument, got 0")),
    };
    Ok(Value::Ref(heap.allocate(HeapData::Range(range))?))
}

fn slice_new(heap: &mut Heap<impl ResourceTracker>, args: CallArgs) -> RunResult<Value> {
    let args = args.positional_only("slice", 1, 3, heap)?;
    let mut args = args.into_iter();
    let slice = match (args.next(), args.next(), args.next()) {
        (Some(stop), None, None) => Slice {
            start: Value::None,
            stop,
            step: Value::None,
        },
        (Some(start), Some(stop), step) => Slice {
            start,
            stop,
            step: step.unwrap_or(Value::None),
        },
        (first, second, third) => {
            first.drop_with_heap(heap);
            second.drop_with_heap(heap);
            third.drop_with_heap(heap);
            return Err(ExcType::type_error("slice expected at least 1 argument, got 0"));
        }
    };
    Ok(Value::Ref(heap.allocate(HeapData::Slice(slice))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn int_literals_follow_python_rules() {
        let mut heap = Heap::new(NoLimitTracker);
        let parse = |text: &str, base: u32, heap: &mut Heap<NoLimitTracker>| parse_int(text, base, heap).ok().and_then(|v| v.as_index());
        assert_eq!(parse(" 42 ", 10, &mut heap), Some(42));
        assert_eq!(parse("-1_000", 10, &mut heap), Some(-1000));
        assert_eq!(parse("0x1f", 0, &mut heap), Some(31));
        assert_eq!(parse("0x1f", 16, &mut heap), Some(31));
        assert_eq!(parse("1f", 16, &mut heap), Some(31));
        assert_eq!(parse("0b101", 0, &mut heap), Some(5));
        assert_eq!(parse("010", 0, &mut heap), None);
        assert_eq!(parse("1__0", 10, &mut heap), None);
        assert_eq!(parse("", 10, &mut heap), None);
        assert_eq!(parse("12a", 10, &mut heap), None);
    }

    #[test]
    fn float_strings_accept_specials() {
        assert_eq!(parse_float(" 1.5 ").ok(), Some(1.5));
        assert!(parse_float("inf").is_ok_and(f64::is_infinite));
        assert!(parse_float("nan").is_ok_and(f64::is_nan));
        assert!(parse_float("1.2.3").is_err());
    }
}
