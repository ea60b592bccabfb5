//! Container, iteration and unpacking helpers for the VM.
//!
//! Builtin containers are handled natively. Instances of user classes answer through
//! their dunder methods (`__getitem__`, `__iter__`, `__next__`, `__len__`, `__bool__`,
//! `__repr__`, ...), which run as nested frames.

use super::VM;
use crate::{
    args::CallArgs,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    heap::{DropWithHeap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        Dict, HashKey, IterKind, SeqIter, Tuple, allocate_list, allocate_str, allocate_tuple, dict_set,
        iter::{advance, char_value},
        lookup_class_attr,
        slice::slice_positions,
    },
    value::Value,
};

/// Containers nested deeper than this repr as `...`.
const MAX_REPR_DEPTH: usize = 200;

/// What a subscript resolved to while the heap was borrowed.
enum Subscript {
    Item(Value),
    Items(Vec<Value>, bool),
    Char(char),
    Text(String),
    Missing,
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    // ========================================================================
    // Subscripts
    // ========================================================================

    /// `container[key]`.
    pub(super) fn get_item(&mut self, container: &Value, key: &Value) -> RunResult<Value> {
        if let Some(text) = container.as_str(self.heap, self.interns) {
            let found = match (key.as_index(), key.ref_id().map(|id| self.heap.get(id))) {
                (Some(index), _) => {
                    let len = text.chars().count();
                    match normalize_index(index, len) {
                        Some(i) => text.chars().nth(i).map_or(Subscript::Missing, Subscript::Char),
                        None => Subscript::Missing,
                    }
                }
                (None, Some(HeapData::Slice(slice))) => {
                    let chars: Vec<char> = text.chars().collect();
                    let (start, stop, step) = slice.indices(chars.len())?;
                    Subscript::Text(slice_positions(start, stop, step).map(|i| chars[i]).collect())
                }
                _ => {
                    return Err(ExcType::type_error(format!(
                        "string indices must be integers, not '{}'",
                        key.type_name(self.heap)
                    )));
                }
            };
            return match found {
                Subscript::Char(c) => char_value(self.heap, c),
                Subscript::Text(text) => allocate_str(self.heap, text),
                _ => Err(ExcType::index_error("string index out of range")),
            };
        }

        let Some(id) = container.ref_id() else {
            return Err(not_subscriptable(container, self));
        };
        let found = match self.heap.get(id) {
            HeapData::List(list) => sequence_item(list.as_slice(), key, "list", true, self)?,
            HeapData::Tuple(tuple) => sequence_item(tuple.as_slice(), key, "tuple", false, self)?,
            HeapData::Range(range) => match key.as_index() {
                Some(index) => match range.get(index) {
                    Some(value) => Subscript::Item(Value::Int(value)),
                    None => return Err(ExcType::index_error("range object index out of range")),
                },
                None => {
                    return Err(ExcType::type_error(format!(
                        "range indices must be integers or slices, not {}",
                        key.type_name(self.heap)
                    )));
                }
            },
            HeapData::Dict(dict) => {
                let hash_key = HashKey::from_value(key, self.heap, self.interns)?;
                match dict.get(&hash_key) {
                    Some(value) => Subscript::Item(value.clone_with_heap(self.heap)),
                    None => Subscript::Missing,
                }
            }
            HeapData::Instance(_) => {
                let Some(method) = self.lookup_special(container, "__getitem__")? else {
                    return Err(not_subscriptable(container, self));
                };
                let arg = key.clone_with_heap(self.heap);
                return self.call_value(method, CallArgs::positional([arg]));
            }
            _ => return Err(not_subscriptable(container, self)),
        };
        match found {
            Subscript::Item(value) => Ok(value),
            Subscript::Items(items, true) => allocate_list(self.heap, items),
            Subscript::Items(items, false) => allocate_tuple(self.heap, items),
            _ => {
                let key = key.clone_with_heap(self.heap);
                Err(self.key_error(key))
            }
        }
    }

    /// `container[key] = value`.
    pub(super) fn set_item(&mut self, container: &Value, key: Value, value: Value) -> RunResult<()> {
        let target = container.ref_id().map(|id| (id, self.heap.get(id)));
        match target {
            Some((id, HeapData::Dict(_))) => dict_set(self.heap, self.interns, id, key, value),
            Some((id, HeapData::List(list))) => {
                let index = match key.as_index() {
                    Some(index) => normalize_index(index, list.as_slice().len()),
                    None => {
                        let err = ExcType::type_error(format!(
                            "list indices must be integers or slices, not {}",
                            key.type_name(self.heap)
                        ));
                        key.drop_with_heap(self.heap);
                        value.drop_with_heap(self.heap);
                        return Err(err);
                    }
                };
                let Some(index) = index else {
                    value.drop_with_heap(self.heap);
                    return Err(ExcType::index_error("list assignment index out of range"));
                };
                let old = match self.heap.get_mut(id) {
                    HeapData::List(list) => std::mem::replace(&mut list.as_vec_mut()[index], value),
                    _ => value,
                };
                old.drop_with_heap(self.heap);
                Ok(())
            }
            Some((_, HeapData::Instance(_))) => match self.lookup_special(container, "__setitem__") {
                Ok(Some(method)) => {
                    let result = self.call_value(method, CallArgs::positional([key, value]))?;
                    result.drop_with_heap(self.heap);
                    Ok(())
                }
                other => {
                    let err = match other {
                        Err(err) => err,
                        _ => no_item_assignment(container, self),
                    };
                    key.drop_with_heap(self.heap);
                    value.drop_with_heap(self.heap);
                    Err(err)
                }
            },
            _ => {
                let err = no_item_assignment(container, self);
                key.drop_with_heap(self.heap);
                value.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    /// `del container[key]`.
    pub(super) fn del_item(&mut self, container: &Value, key: Value) -> RunResult<()> {
        let target = container.ref_id().map(|id| (id, self.heap.get(id)));
        match target {
            Some((id, HeapData::Dict(_))) => {
                let hash_key = match HashKey::from_value(&key, self.heap, self.interns) {
                    Ok(hash_key) => hash_key,
                    Err(err) => {
                        key.drop_with_heap(self.heap);
                        return Err(err);
                    }
                };
                let removed = match self.heap.get_mut(id) {
                    HeapData::Dict(dict) => dict.remove(&hash_key),
                    _ => None,
                };
                match removed {
                    Some(pair) => {
                        pair.drop_with_heap(self.heap);
                        key.drop_with_heap(self.heap);
                        Ok(())
                    }
                    None => Err(self.key_error(key)),
                }
            }
            Some((id, HeapData::List(list))) => {
                let index = key.as_index().map(|index| normalize_index(index, list.as_slice().len()));
                let err = match index {
                    Some(Some(index)) => {
                        key.drop_with_heap(self.heap);
                        let removed = match self.heap.get_mut(id) {
                            HeapData::List(list) => list.as_vec_mut().remove(index),
                            _ => Value::None,
                        };
                        removed.drop_with_heap(self.heap);
                        return Ok(());
                    }
                    Some(None) => ExcType::index_error("list assignment index out of range"),
                    None => ExcType::type_error(format!(
                        "list indices must be integers or slices, not {}",
                        key.type_name(self.heap)
                    )),
                };
                key.drop_with_heap(self.heap);
                Err(err)
            }
            Some((_, HeapData::Instance(_))) => match self.lookup_special(container, "__delitem__") {
                Ok(Some(method)) => {
                    let result = self.call_value(method, CallArgs::positional([key]))?;
                    result.drop_with_heap(self.heap);
                    Ok(())
                }
                other => {
                    let err = match other {
                        Err(err) => err,
                        _ => no_item_deletion(container, self),
                    };
                    key.drop_with_heap(self.heap);
                    Err(err)
                }
            },
            _ => {
                let err = no_item_deletion(container, self);
                key.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// `iter(value)`, consuming the reference.
    pub(crate) fn get_iter(&mut self, value: Value) -> RunResult<Value> {
        let kind = match value.ref_id().map(|id| self.heap.get(id)) {
            _ if value.as_str(self.heap, self.interns).is_some() => IterKind::Str,
            Some(HeapData::List(_)) => IterKind::List,
            Some(HeapData::Tuple(_)) => IterKind::Tuple,
            Some(HeapData::Dict(dict)) => IterKind::DictKeys {
                expected_len: dict.len(),
            },
            Some(HeapData::Range(range)) => {
                let kind = IterKind::Range {
                    next: range.start,
                    stop: range.stop,
                    step: range.step,
                };
                value.drop_with_heap(self.heap);
                let id = self.heap.allocate(HeapData::Iter(SeqIter::new(kind, Value::None)))?;
                return Ok(Value::Ref(id));
            }
            Some(HeapData::Iter(_) | HeapData::Generator(_)) => return Ok(value),
            Some(HeapData::Instance(_)) => return self.instance_iter(value),
            _ => {
                let err = ExcType::not_iterable(&value.type_name(self.heap));
                value.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        let id = self.heap.allocate(HeapData::Iter(SeqIter::new(kind, value)))?;
        Ok(Value::Ref(id))
    }

    fn instance_iter(&mut self, value: Value) -> RunResult<Value> {
        let method = match self.lookup_special(&value, "__iter__") {
            Ok(Some(method)) => method,
            Ok(None) => {
                let err = ExcType::not_iterable(&value.type_name(self.heap));
                value.drop_with_heap(self.heap);
                return Err(err);
            }
            Err(err) => {
                value.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        value.drop_with_heap(self.heap);
        let iterator = self.call_value(method, CallArgs::default())?;
        if self.is_iterator(&iterator) {
            Ok(iterator)
        } else {
            let err = ExcType::type_error(format!(
                "iter() returned non-iterator of type '{}'",
                iterator.type_name(self.heap)
            ));
            iterator.drop_with_heap(self.heap);
            Err(err)
        }
    }

    fn is_iterator(&self, value: &Value) -> bool {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Iter(_) | HeapData::Generator(_)) => true,
            Some(HeapData::Instance(instance)) => instance
                .class
                .ref_id()
                .is_some_and(|class_id| lookup_class_attr(class_id, "__next__", self.heap).is_some()),
            _ => false,
        }
    }

    /// Whether `iter(value)` could succeed.
    pub(crate) fn is_iterable(&self, value: &Value) -> bool {
        if value.as_str(self.heap, self.interns).is_some() {
            return true;
        }
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(
                HeapData::List(_)
                | HeapData::Tuple(_)
                | HeapData::Dict(_)
                | HeapData::Range(_)
                | HeapData::Iter(_)
                | HeapData::Generator(_),
            ) => true,
            Some(HeapData::Instance(instance)) => instance
                .class
                .ref_id()
                .is_some_and(|class_id| lookup_class_attr(class_id, "__iter__", self.heap).is_some()),
            _ => false,
        }
    }

    /// `next(iterator)`: `Ok(None)` when a builtin iterator or generator is exhausted.
    ///
    /// A generator that returns a value other than `None` raises `StopIteration`
    /// carrying it, and a `StopIteration` raised by `__next__` propagates as an error.
    pub(crate) fn iter_next(&mut self, iterator: &Value) -> RunResult<Option<Value>> {
        let Some(id) = iterator.ref_id() else {
            return Err(not_an_iterator(iterator, self));
        };
        match self.heap.get(id) {
            HeapData::Iter(_) => advance(self.heap, self.interns, id),
            HeapData::Generator(_) => match self.gen_send(id, Value::None)? {
                super::GenResult::Yield(value) => Ok(Some(value)),
                super::GenResult::Return(value) if value.is_none() => Ok(None),
                super::GenResult::Return(value) => Err(self.new_stop_iteration(value)),
            },
            HeapData::Instance(_) => match self.lookup_special(iterator, "__next__")? {
                Some(method) => self.call_value(method, CallArgs::default()).map(Some),
                None => Err(not_an_iterator(iterator, self)),
            },
            _ => Err(not_an_iterator(iterator, self)),
        }
    }

    /// One `FOR_ITER` step: any `StopIteration` means the loop is over.
    pub(super) fn iter_step(&mut self, iterator: &Value) -> RunResult<Option<Value>> {
        match self.iter_next(iterator) {
            Err(err) if err.matches(ExcType::StopIteration, self.heap) => {
                err.drop_with_heap(self.heap);
                Ok(None)
            }
            other => other,
        }
    }

    /// Drains an iterable into a vector, consuming the reference.
    pub(crate) fn collect_iterable(&mut self, iterable: Value) -> RunResult<Vec<Value>> {
        let items: Option<Vec<Value>> = match iterable.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::List(list)) => Some(list.as_slice()),
            Some(HeapData::Tuple(tuple)) => Some(tuple.as_slice()),
            _ => None,
        }
        .map(|items| items.iter().map(|item| item.clone_with_heap(self.heap)).collect());
        if let Some(items) = items {
            iterable.drop_with_heap(self.heap);
            return Ok(items);
        }
        let iterator = self.get_iter(iterable)?;
        let mut items = Vec::new();
        let result = loop {
            match self.iter_step(&iterator) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        iterator.drop_with_heap(self.heap);
        match result {
            Ok(()) => Ok(items),
            Err(err) => {
                items.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    // ========================================================================
    // Unpacking
    // ========================================================================

    /// `UNPACK_SEQUENCE`: exactly `count` items, in source order.
    pub(super) fn unpack_sequence(&mut self, seq: Value, count: usize) -> RunResult<Vec<Value>> {
        let fast: Option<Result<Vec<Value>, usize>> = match seq.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::List(list)) => Some(list.as_slice()),
            Some(HeapData::Tuple(tuple)) => Some(tuple.as_slice()),
            _ => None,
        }
        .map(|items| {
            if items.len() == count {
                Ok(items.iter().map(|item| item.clone_with_heap(self.heap)).collect())
            } else {
                Err(items.len())
            }
        });
        match fast {
            Some(Ok(items)) => {
                seq.drop_with_heap(self.heap);
                return Ok(items);
            }
            Some(Err(len)) => {
                seq.drop_with_heap(self.heap);
                return Err(if len < count {
                    not_enough_values(count, len)
                } else {
                    too_many_values(count)
                });
            }
            None => {}
        }

        let iterator = self.unpack_iter(seq)?;
        let mut items = Vec::with_capacity(count);
        let result = loop {
            match self.iter_step(&iterator) {
                Ok(Some(item)) if items.len() == count => {
                    item.drop_with_heap(self.heap);
                    break Err(too_many_values(count));
                }
                Ok(Some(item)) => items.push(item),
                Ok(None) if items.len() < count => break Err(not_enough_values(count, items.len())),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        iterator.drop_with_heap(self.heap);
        match result {
            Ok(()) => Ok(items),
            Err(err) => {
                items.drop_with_heap(self.heap);
                Err(err)
            }
        }
    }

    /// `UNPACK_EX`: `before` items, a list of the rest, then `after` items.
    pub(super) fn unpack_ex(&mut self, seq: Value, before: usize, after: usize) -> RunResult<Vec<Value>> {
        let iterator = self.unpack_iter(seq)?;
        let mut items = self.collect_iterable(iterator)?;
        let needed = before + after;
        if items.len() < needed {
            let len = items.len();
            items.drop_with_heap(self.heap);
            return Err(SimpleException::new_msg(
                ExcType::ValueError,
                format!("not enough values to unpack (expected at least {needed}, got {len})"),
            )
            .into());
        }
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(before);
        let middle = match allocate_list(self.heap, middle) {
            Ok(list) => list,
            Err(err) => {
                items.drop_with_heap(self.heap);
                tail.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        items.push(middle);
        items.extend(tail);
        Ok(items)
    }

    fn unpack_iter(&mut self, seq: Value) -> RunResult<Value> {
        if !self.is_iterable(&seq) {
            let err = ExcType::type_error(format!("cannot unpack non-iterable {} object", seq.type_name(self.heap)));
            seq.drop_with_heap(self.heap);
            return Err(err);
        }
        self.get_iter(seq)
    }

    // ========================================================================
    // Container builders
    // ========================================================================

    /// `BUILD_MAP`: `items` alternates keys and values.
    pub(super) fn build_map(&mut self, items: Vec<Value>) -> RunResult<Value> {
        let dict_id = match self.heap.allocate(HeapData::Dict(Dict::new())) {
            Ok(id) => id,
            Err(err) => {
                items.drop_with_heap(self.heap);
                return Err(err.into());
            }
        };
        let mut items = items.into_iter();
        loop {
            let (key, value) = match (items.next(), items.next()) {
                (Some(key), Some(value)) => (key, value),
                (key, value) => {
                    key.drop_with_heap(self.heap);
                    value.drop_with_heap(self.heap);
                    break;
                }
            };
            if let Err(err) = dict_set(self.heap, self.interns, dict_id, key, value) {
                items.drop_with_heap(self.heap);
                self.heap.dec_ref(dict_id);
                return Err(err);
            }
        }
        Ok(Value::Ref(dict_id))
    }

    /// `BUILD_CONST_KEY_MAP`: `keys` is a tuple as long as `values`.
    pub(super) fn build_const_key_map(&mut self, keys: Value, values: Vec<Value>) -> RunResult<Value> {
        let key_items: Option<Vec<Value>> = match keys.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(tuple)) if tuple.as_slice().len() == values.len() => {
                Some(tuple.as_slice().iter().map(|key| key.clone_with_heap(self.heap)).collect())
            }
            _ => None,
        };
        keys.drop_with_heap(self.heap);
        let Some(key_items) = key_items else {
            values.drop_with_heap(self.heap);
            return Err(ExcType::system_error("bad BUILD_CONST_KEY_MAP keys argument"));
        };
        let items = key_items.into_iter().zip(values).flat_map(|(k, v)| [k, v]).collect();
        self.build_map(items)
    }

    /// `LIST_APPEND`.
    pub(super) fn list_append(&mut self, list_id: HeapId, item: Value) -> RunResult<()> {
        match self.heap.get_mut(list_id) {
            HeapData::List(list) => {
                list.as_vec_mut().push(item);
                Ok(())
            }
            _ => {
                item.drop_with_heap(self.heap);
                Err(RunError::internal("LIST_APPEND target is not a list"))
            }
        }
    }

    /// `LIST_EXTEND`, the `*iterable` inside a list display or call.
    pub(super) fn list_extend(&mut self, list_id: HeapId, iterable: Value) -> RunResult<()> {
        if !self.is_iterable(&iterable) {
            let err = ExcType::type_error(format!(
                "Value after * must be an iterable, not {}",
                iterable.type_name(self.heap)
            ));
            iterable.drop_with_heap(self.heap);
            return Err(err);
        }
        let items = self.collect_iterable(iterable)?;
        self.list_extend_items(list_id, items)
    }

    /// Appends `items` to the list at `list_id`.
    pub(super) fn list_extend_items(&mut self, list_id: HeapId, items: Vec<Value>) -> RunResult<()> {
        match self.heap.get_mut(list_id) {
            HeapData::List(list) => {
                list.as_vec_mut().extend(items);
                Ok(())
            }
            _ => {
                items.drop_with_heap(self.heap);
                Err(RunError::internal("list_extend_items: target is not a list"))
            }
        }
    }

    /// `LIST_TO_TUPLE`.
    pub(super) fn list_to_tuple(&mut self, list: Value) -> RunResult<Value> {
        let items: Option<Vec<Value>> = match list.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::List(items)) => Some(items.as_slice().iter().map(|v| v.clone_with_heap(self.heap)).collect()),
            _ => None,
        };
        list.drop_with_heap(self.heap);
        let Some(items) = items else {
            return Err(RunError::internal("LIST_TO_TUPLE operand is not a list"));
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Tuple(Tuple::new(items)))?))
    }

    /// `MAP_ADD`.
    pub(super) fn map_add(&mut self, dict_id: HeapId, key: Value, value: Value) -> RunResult<()> {
        dict_set(self.heap, self.interns, dict_id, key, value)
    }

    /// `dict.update(source)`: a dict, an object with `keys()`, or an iterable of pairs.
    pub(crate) fn dict_update_from(&mut self, dict_id: HeapId, source: &Value) -> RunResult<()> {
        let pairs: Option<Vec<(Value, Value)>> = match source.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Dict(dict)) => Some(
                dict.iter()
                    .map(|(k, v)| (k.clone_with_heap(self.heap), v.clone_with_heap(self.heap)))
                    .collect(),
            ),
            _ => None,
        };
        if let Some(pairs) = pairs {
            return self.store_pairs(dict_id, pairs);
        }
        if self.has_keys_method(source) {
            return self.update_from_mapping(dict_id, source);
        }
        let items = self.collect_iterable(source.clone_with_heap(self.heap))?;
        let mut items = items.into_iter().enumerate();
        while let Some((index, item)) = items.next() {
            let pair = if self.is_iterable(&item) {
                self.collect_iterable(item)
            } else {
                let err = ExcType::type_error(format!(
                    "cannot convert dictionary update sequence element #{index} to a sequence"
                ));
                item.drop_with_heap(self.heap);
                Err(err)
            };
            let result = pair.and_then(|pair| {
                if pair.len() == 2 {
                    let mut pair = pair.into_iter();
                    match (pair.next(), pair.next()) {
                        (Some(key), Some(value)) => dict_set(self.heap, self.interns, dict_id, key, value),
                        _ => Err(RunError::internal("dict update pair vanished")),
                    }
                } else {
                    let len = pair.len();
                    pair.drop_with_heap(self.heap);
                    Err(ExcType::value_error(format!(
                        "dictionary update sequence element #{index} has length {len}; 2 is required"
                    )))
                }
            });
            if let Err(err) = result {
                items.map(|(_, item)| item).collect::<Vec<_>>().drop_with_heap(self.heap);
                return Err(err);
            }
        }
        Ok(())
    }

    /// `DICT_UPDATE`, the `**mapping` inside a dict display.
    pub(super) fn dict_update_opcode(&mut self, dict_id: HeapId, source: &Value) -> RunResult<()> {
        let is_dict = matches!(source.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Dict(_)));
        if is_dict || self.has_keys_method(source) {
            self.dict_update_from(dict_id, source)
        } else {
            Err(ExcType::type_error(format!(
                "'{}' object is not a mapping",
                source.type_name(self.heap)
            )))
        }
    }

    fn has_keys_method(&self, value: &Value) -> bool {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Instance(instance)) => instance
                .class
                .ref_id()
                .is_some_and(|class_id| lookup_class_attr(class_id, "keys", self.heap).is_some()),
            _ => false,
        }
    }

    fn update_from_mapping(&mut self, dict_id: HeapId, source: &Value) -> RunResult<()> {
        let keys_method = self.get_attr(source, "keys")?;
        let keys = self.call_value(keys_method, CallArgs::default())?;
        let keys = self.collect_iterable(keys)?;
        let mut keys = keys.into_iter();
        while let Some(key) = keys.next() {
            let result = match self.get_item(source, &key) {
                Ok(value) => dict_set(self.heap, self.interns, dict_id, key, value),
                Err(err) => {
                    key.drop_with_heap(self.heap);
                    Err(err)
                }
            };
            if let Err(err) = result {
                keys.drop_with_heap(self.heap);
                return Err(err);
            }
        }
        Ok(())
    }

    fn store_pairs(&mut self, dict_id: HeapId, pairs: Vec<(Value, Value)>) -> RunResult<()> {
        let mut pairs = pairs.into_iter();
        while let Some((key, value)) = pairs.next() {
            if let Err(err) = dict_set(self.heap, self.interns, dict_id, key, value) {
                pairs.collect::<Vec<_>>().drop_with_heap(self.heap);
                return Err(err);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Protocols that may run user code
    // ========================================================================

    /// `len(value)`.
    pub(crate) fn len_of(&mut self, value: &Value) -> RunResult<usize> {
        if let Some(text) = value.as_str(self.heap, self.interns) {
            return Ok(text.chars().count());
        }
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::List(list)) => Ok(list.as_slice().len()),
            Some(HeapData::Tuple(tuple)) => Ok(tuple.as_slice().len()),
            Some(HeapData::Dict(dict)) => Ok(dict.len()),
            Some(HeapData::Range(range)) => Ok(range.len()),
            Some(HeapData::Instance(_)) => match self.lookup_special(value, "__len__")? {
                Some(method) => {
                    let result = self.call_value(method, CallArgs::default())?;
                    let len = match result.as_index() {
                        Some(len) => usize::try_from(len).map_err(|_| ExcType::value_error("__len__() should return >= 0")),
                        None => Err(ExcType::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            result.type_name(self.heap)
                        ))),
                    };
                    result.drop_with_heap(self.heap);
                    len
                }
                None => Err(no_len(value, self)),
            },
            _ => Err(no_len(value, self)),
        }
    }

    /// Truthiness, consulting `__bool__` and then `__len__` on instances.
    pub(crate) fn is_true(&mut self, value: &Value) -> RunResult<bool> {
        match value {
            Value::Bool(b) => return Ok(*b),
            Value::None => return Ok(false),
            Value::Int(i) => return Ok(*i != 0),
            _ => {}
        }
        if !matches!(value.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Instance(_))) {
            return Ok(value.py_bool(self.heap, self.interns));
        }
        if let Some(method) = self.lookup_special(value, "__bool__")? {
            let result = self.call_value(method, CallArgs::default())?;
            return match result {
                Value::Bool(b) => Ok(b),
                other => {
                    let err = ExcType::type_error(format!(
                        "__bool__ should return bool, returned {}",
                        other.type_name(self.heap)
                    ));
                    other.drop_with_heap(self.heap);
                    Err(err)
                }
            };
        }
        if self.lookup_special_exists(value, "__len__") {
            return Ok(self.len_of(value)? != 0);
        }
        Ok(true)
    }

    fn lookup_special_exists(&self, value: &Value, name: &str) -> bool {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Instance(instance)) => instance
                .class
                .ref_id()
                .is_some_and(|class_id| lookup_class_attr(class_id, name, self.heap).is_some()),
            _ => false,
        }
    }

    /// `repr(value)`, running `__repr__` on instances, including ones inside containers.
    pub(crate) fn repr_value(&mut self, value: &Value) -> RunResult<String> {
        let mut out = String::new();
        let mut seen = Vec::new();
        self.repr_into(value, &mut out, &mut seen)?;
        Ok(out)
    }

    fn repr_into(&mut self, value: &Value, out: &mut String, seen: &mut Vec<HeapId>) -> RunResult<()> {
        let Some(id) = value.ref_id() else {
            out.push_str(&value.py_repr(self.heap, self.interns));
            return Ok(());
        };
        let (open, close, items): (&str, &str, Vec<Value>) = match self.heap.get(id) {
            HeapData::Instance(_) => {
                return match self.lookup_special(value, "__repr__")? {
                    Some(method) => {
                        let text = self.call_text(method, "__repr__")?;
                        out.push_str(&text);
                        Ok(())
                    }
                    None => {
                        out.push_str(&value.py_repr(self.heap, self.interns));
                        Ok(())
                    }
                };
            }
            HeapData::List(list) => ("[", "]", clone_all(list.as_slice(), self)),
            HeapData::Tuple(tuple) => ("(", ")", clone_all(tuple.as_slice(), self)),
            HeapData::Dict(dict) => (
                "{",
                "}",
                dict.iter()
                    .flat_map(|(k, v)| [k.clone_with_heap(self.heap), v.clone_with_heap(self.heap)])
                    .collect(),
            ),
            _ => {
                out.push_str(&value.py_repr(self.heap, self.interns));
                return Ok(());
            }
        };
        if seen.contains(&id) || seen.len() >= MAX_REPR_DEPTH {
            items.drop_with_heap(self.heap);
            out.push_str(if open == "{" { "{...}" } else if open == "[" { "[...]" } else { "(...)" });
            return Ok(());
        }
        seen.push(id);
        out.push_str(open);
        let is_dict = open == "{";
        let single_tuple = open == "(" && items.len() == 1;
        let mut result = Ok(());
        let mut iter = items.into_iter().enumerate();
        for (index, item) in iter.by_ref() {
            if index > 0 {
                out.push_str(if is_dict && index % 2 == 1 { ": " } else { ", " });
            }
            result = self.repr_into(&item, out, seen);
            item.drop_with_heap(self.heap);
            if result.is_err() {
                break;
            }
        }
        iter.map(|(_, item)| item).collect::<Vec<_>>().drop_with_heap(self.heap);
        seen.pop();
        result?;
        if single_tuple {
            out.push(',');
        }
        out.push_str(close);
        Ok(())
    }

    /// `str(value)`, running `__str__` (or `__repr__`) on instances.
    pub(crate) fn str_value(&mut self, value: &Value) -> RunResult<String> {
        if matches!(value.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Instance(_))) {
            if let Some(method) = self.lookup_special(value, "__str__")? {
                return self.call_text(method, "__str__");
            }
            return self.repr_value(value);
        }
        if matches!(value.ref_id().map(|id| self.heap.get(id)), Some(HeapData::List(_) | HeapData::Tuple(_) | HeapData::Dict(_))) {
            return self.repr_value(value);
        }
        Ok(value.py_str(self.heap, self.interns))
    }

    /// Calls a bound `__repr__`/`__str__`, which must return a string.
    fn call_text(&mut self, method: Value, name: &str) -> RunResult<String> {
        let result = self.call_value(method, CallArgs::default())?;
        let text = result.as_str(self.heap, self.interns).map(str::to_owned);
        let type_name = result.type_name(self.heap).into_owned();
        result.drop_with_heap(self.heap);
        text.ok_or_else(|| ExcType::type_error(format!("{name} returned non-string (type {type_name})")))
    }
}

fn clone_all<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(items: &[Value], vm: &VM<'_, T, P, Tr>) -> Vec<Value> {
    items.iter().map(|item| item.clone_with_heap(vm.heap)).collect()
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len_i = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len_i } else { index };
    usize::try_from(resolved).ok().filter(|i| *i < len)
}

fn sequence_item<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    items: &[Value],
    key: &Value,
    type_name: &str,
    is_list: bool,
    vm: &VM<'_, T, P, Tr>,
) -> RunResult<Subscript> {
    if let Some(index) = key.as_index() {
        return match normalize_index(index, items.len()) {
            Some(i) => Ok(Subscript::Item(items[i].clone_with_heap(vm.heap))),
            None => Err(ExcType::index_error(format!("{type_name} index out of range"))),
        };
    }
    if let Some(HeapData::Slice(slice)) = key.ref_id().map(|id| vm.heap.get(id)) {
        let (start, stop, step) = slice.indices(items.len())?;
        let picked = slice_positions(start, stop, step)
            .map(|i| items[i].clone_with_heap(vm.heap))
            .collect();
        return Ok(Subscript::Items(picked, is_list));
    }
    Err(ExcType::type_error(format!(
        "{type_name} indices must be integers or slices, not {}",
        key.type_name(vm.heap)
    )))
}

fn not_subscriptable<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(value: &Value, vm: &VM<'_, T, P, Tr>) -> RunError {
    ExcType::type_error(format!("'{}' object is not subscriptable", value.type_name(vm.heap)))
}

fn no_item_assignment<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(value: &Value, vm: &VM<'_, T, P, Tr>) -> RunError {
    ExcType::type_error(format!(
        "'{}' object does not support item assignment",
        value.type_name(vm.heap)
    ))
}

fn no_item_deletion<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(value: &Value, vm: &VM<'_, T, P, Tr>) -> RunError {
    ExcType::type_error(format!(
        "'{}' object doesn't support item deletion",
        value.type_name(vm.heap)
    ))
}

fn not_an_iterator<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(value: &Value, vm: &VM<'_, T, P, Tr>) -> RunError {
    ExcType::type_error(format!("'{}' object is not an iterator", value.type_name(vm.heap)))
}

fn no_len<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(value: &Value, vm: &VM<'_, T, P, Tr>) -> RunError {
    ExcType::type_error(format!("object of type '{}' has no len()", value.type_name(vm.heap)))
}

fn not_enough_values(expected: usize, got: usize) -> RunError {
    ExcType::value_error(format!("not enough values to unpack (expected {expected}, got {got})"))
}

fn too_many_values(expected: usize) -> RunError {
    ExcType::value_error(format!("too many values to unpack (expected {expected})"))
}
