//! Call arguments.
//!
//! Every call site produces a [`CallArgs`]: a flat vector of positional values followed
//! by keyword values, plus a tuple naming the keywords. This is the vectorcall shape;
//! the tuple-and-dict shape is converted into it by [`CallArgs::from_legacy`] with only
//! reference count traffic, argument objects are never copied.
//!
//! A `CallArgs` built with [`CallArgs::with_offset`] reserves a slot in front of the
//! arguments so a receiver can be prepended without shifting them, which is how bound
//! methods and `CALL_METHOD` pass `self`.

use smallvec::SmallVec;

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    intern::Interns,
    resource::ResourceTracker,
    types::Tuple,
    value::Value,
};

/// Arguments to one call. Owns every value it holds.
#[derive(Debug, Default)]
pub(crate) struct CallArgs {
    values: SmallVec<[Value; 8]>,
    /// Index of the first argument; slots before it are reserved and hold `Undefined`.
    start: usize,
    /// Tuple of keyword names matching the trailing values.
    kwnames: Option<HeapId>,
}

impl CallArgs {
    /// Positional and keyword values with an owned keyword-name tuple.
    pub fn new(values: impl IntoIterator<Item = Value>, kwnames: Option<HeapId>) -> Self {
        Self {
            values: values.into_iter().collect(),
            start: 0,
            kwnames,
        }
    }

    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self::new(values, None)
    }

    /// Like [`CallArgs::new`] with a reserved slot for [`CallArgs::prepend`].
    pub fn with_offset(values: impl IntoIterator<Item = Value>, kwnames: Option<HeapId>) -> Self {
        let mut all = SmallVec::new();
        all.push(Value::Undefined);
        all.extend(values);
        Self {
            values: all,
            start: 1,
            kwnames,
        }
    }

    /// Inserts `value` as the first positional argument, using the reserved slot if there is one.
    pub fn prepend(&mut self, value: Value) {
        if self.start > 0 {
            self.start -= 1;
            self.values[self.start] = value;
        } else {
            self.values.insert(0, value);
        }
    }

    /// Number of keyword arguments.
    pub fn kw_count(&self, heap: &Heap<impl ResourceTracker>) -> usize {
        match self.kwnames.map(|id| heap.get(id)) {
            Some(HeapData::Tuple(names)) => names.as_slice().len(),
            _ => 0,
        }
    }

    /// Number of positional arguments.
    pub fn positional_count(&self, heap: &Heap<impl ResourceTracker>) -> usize {
        self.values.len() - self.start - self.kw_count(heap)
    }

    /// New references to the positional arguments, leaving the call intact.
    pub fn positional_clones(&self, heap: &Heap<impl ResourceTracker>) -> Vec<Value> {
        let end = self.values.len() - self.kw_count(heap);
        self.values[self.start..end]
            .iter()
            .map(|value| value.clone_with_heap(heap))
            .collect()
    }

    /// Splits into positional values and `(name, value)` keyword pairs.
    pub fn into_parts(self, heap: &mut Heap<impl ResourceTracker>) -> (Vec<Value>, Vec<(Value, Value)>) {
        let kw_count = self.kw_count(heap);
        let mut values = self.values;
        let kw_values: Vec<Value> = values.drain(values.len() - kw_count..).collect();
        let positional: Vec<Value> = values.drain(self.start..).collect();
        let mut kwargs = Vec::with_capacity(kw_count);
        if let Some(names_id) = self.kwnames {
            let names: Vec<Value> = match heap.get(names_id) {
                HeapData::Tuple(names) => names.as_slice().iter().map(|name| name.clone_with_heap(heap)).collect(),
                _ => Vec::new(),
            };
            heap.dec_ref(names_id);
            kwargs.extend(names.into_iter().zip(kw_values));
        }
        (positional, kwargs)
    }

    /// Converts the tuple-and-dict call shape.
    ///
    /// `args` must be a tuple; `kwargs`, if given, a dict whose keys are all strings.
    pub fn from_legacy(
        args: &Value,
        kwargs: Option<&Value>,
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
    ) -> RunResult<Self> {
        let mut values: SmallVec<[Value; 8]> = match args.ref_id().map(|id| heap.get(id)) {
            Some(HeapData::Tuple(tuple)) => tuple.as_slice().iter().map(|v| v.clone_with_heap(heap)).collect(),
            _ => return Err(ExcType::type_error("argument list must be a tuple")),
        };
        let Some(kwargs) = kwargs else {
            return Ok(Self {
                values,
                start: 0,
                kwnames: None,
            });
        };
        let (names, kw_values) = match kwargs.ref_id().map(|id| heap.get(id)) {
            Some(HeapData::Dict(dict)) => {
                if dict.keys().any(|key| key.as_str(heap, interns).is_none()) {
                    values.drop_with_heap(heap);
                    return Err(ExcType::type_error("keywords must be strings"));
                }
                let names: Vec<Value> = dict.keys().map(|k| k.clone_with_heap(heap)).collect();
                let kw_values: Vec<Value> = dict.values().map(|v| v.clone_with_heap(heap)).collect();
                (names, kw_values)
            }
            _ => {
                values.drop_with_heap(heap);
                return Err(ExcType::type_error("keyword list must be a dictionary"));
            }
        };
        if names.is_empty() {
            return Ok(Self {
                values,
                start: 0,
                kwnames: None,
            });
        }
        values.extend(kw_values);
        let kwnames = match heap.allocate(HeapData::Tuple(Tuple::new(names))) {
            Ok(id) => id,
            Err(err) => {
                values.drop_with_heap(heap);
                return Err(err.into());
            }
        };
        Ok(Self {
            values,
            start: 0,
            kwnames: Some(kwnames),
        })
    }

    /// Fails with `name() takes no keyword arguments` when keywords were passed.
    fn reject_kwargs(&self, name: &str, heap: &Heap<impl ResourceTracker>) -> RunResult<()> {
        if self.kw_count(heap) > 0 {
            Err(ExcType::type_error(format!("{name}() takes no keyword arguments")))
        } else {
            Ok(())
        }
    }

    /// Positional arguments of a call that accepts no keywords, checked against `min..=max`.
    pub fn positional_only(
        self,
        name: &str,
        min: usize,
        max: usize,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> RunResult<Vec<Value>> {
        if let Err(err) = self.reject_kwargs(name, heap) {
            self.drop_with_heap(heap);
            return Err(err);
        }
        let (positional, _) = self.into_parts(heap);
        let count = positional.len();
        if (min..=max).contains(&count) {
            return Ok(positional);
        }
        positional.drop_with_heap(heap);
        Err(arg_count_error(name, min, max, count))
    }

    /// Checks that exactly one positional argument was passed, returning it.
    pub fn get_one_arg(self, name: &str, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
        let mut args = self.positional_only(name, 1, 1, heap)?;
        args.pop().ok_or_else(|| arg_count_error(name, 1, 1, 0))
    }

    /// Checks that exactly two positional arguments were passed.
    pub fn get_two_args(self, name: &str, heap: &mut Heap<impl ResourceTracker>) -> RunResult<(Value, Value)> {
        let args = self.positional_only(name, 2, 2, heap)?;
        let mut iter = args.into_iter();
        match (iter.next(), iter.next()) {
            (Some(a), Some(b)) => Ok((a, b)),
            (a, b) => {
                a.drop_with_heap(heap);
                b.drop_with_heap(heap);
                Err(arg_count_error(name, 2, 2, 0))
            }
        }
    }

    /// One required and one optional positional argument.
    pub fn get_one_two_args(
        self,
        name: &str,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> RunResult<(Value, Option<Value>)> {
        let args = self.positional_only(name, 1, 2, heap)?;
        let mut iter = args.into_iter();
        let first = iter.next().ok_or_else(|| arg_count_error(name, 1, 2, 0))?;
        Ok((first, iter.next()))
    }

    /// Zero or one positional argument.
    pub fn get_zero_one_arg(self, name: &str, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
        Ok(self.positional_only(name, 0, 1, heap)?.pop())
    }

    pub fn check_zero_args(self, name: &str, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        self.positional_only(name, 0, 0, heap).map(drop)
    }
}

/// The arity error builtins raise, worded like CPython's.
pub(crate) fn arg_count_error(name: &str, min: usize, max: usize, given: usize) -> crate::exception_private::RunError {
    if min == max {
        match min {
            0 => ExcType::type_error(format!("{name}() takes no arguments ({given} given)")),
            1 => ExcType::type_error(format!("{name}() takes exactly one argument ({given} given)")),
            n => ExcType::type_error(format!("{name} expected {n} arguments, got {given}")),
        }
    } else if given < min {
        ExcType::type_error(format!(
            "{name} expected at least {min} argument{}, got {given}",
            if min == 1 { "" } else { "s" }
        ))
    } else {
        ExcType::type_error(format!(
            "{name} expected at most {max} argument{}, got {given}",
            if max == 1 { "" } else { "s" }
        ))
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for CallArgs {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.values.drop_with_heap(heap);
        if let Some(id) = self.kwnames {
            heap.dec_ref(id);
        }
    }
}
