//! Comparison and membership helpers for the VM.
//!
//! Instances of user classes are compared through `__eq__`/`__lt__`/... on their class,
//! trying the reflected method on the right operand when the left one has none. `==`
//! and `!=` fall back to identity, the ordering operators raise `TypeError`.

use std::cmp::Ordering;

use super::VM;
use crate::{
    args::CallArgs,
    bytecode::op::CompareOp,
    exception_private::{ExcType, RunResult},
    heap::{DropWithHeap, HeapData},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::HashKey,
    value::Value,
};

impl CompareOp {
    fn dunder(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    /// The comparison with its operands swapped.
    fn reflected(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering.is_lt(),
            Self::Le => ordering.is_le(),
            Self::Eq => ordering.is_eq(),
            Self::Ne => ordering.is_ne(),
            Self::Gt => ordering.is_gt(),
            Self::Ge => ordering.is_ge(),
        }
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `COMPARE_OP`: one of the six rich comparisons.
    pub(super) fn compare(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
            return Ok(Value::Bool(op.accepts(a.cmp(b))));
        }
        if let Some(result) = self.compare_dunder(op, lhs, rhs)? {
            return Ok(result);
        }
        match op {
            CompareOp::Eq => Ok(Value::Bool(lhs.py_eq(rhs, self.heap, self.interns))),
            CompareOp::Ne => Ok(Value::Bool(!lhs.py_eq(rhs, self.heap, self.interns))),
            _ => match lhs.py_cmp(rhs, self.heap, self.interns) {
                Some(ordering) => Ok(Value::Bool(op.accepts(ordering))),
                // NaN compares false with everything
                None if matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_)) => {
                    let numeric = lhs.as_f64(self.heap).is_some() && rhs.as_f64(self.heap).is_some();
                    if numeric {
                        Ok(Value::Bool(false))
                    } else {
                        Err(self.compare_error(op, lhs, rhs))
                    }
                }
                None => Err(self.compare_error(op, lhs, rhs)),
            },
        }
    }

    fn compare_error(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> crate::exception_private::RunError {
        ExcType::compare_type_error(op.symbol(), &lhs.type_name(self.heap), &rhs.type_name(self.heap))
    }

    /// The user-defined comparison, if either operand provides one.
    fn compare_dunder(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        if let Some(method) = self.lookup_special(lhs, op.dunder())? {
            let arg = rhs.clone_with_heap(self.heap);
            return self.call_value(method, CallArgs::positional([arg])).map(Some);
        }
        if let Some(method) = self.lookup_special(rhs, op.reflected().dunder())? {
            let arg = lhs.clone_with_heap(self.heap);
            return self.call_value(method, CallArgs::positional([arg])).map(Some);
        }
        if op == CompareOp::Ne
            && let Some(method) = self.lookup_special(lhs, "__eq__")?
        {
            let arg = rhs.clone_with_heap(self.heap);
            let equal = self.call_value(method, CallArgs::positional([arg]))?;
            let truth = self.is_true(&equal);
            equal.drop_with_heap(self.heap);
            return Ok(Some(Value::Bool(!truth?)));
        }
        Ok(None)
    }

    /// `a == b` as a Rust bool, running user `__eq__` when there is one.
    pub(crate) fn values_equal(&mut self, a: &Value, b: &Value) -> RunResult<bool> {
        if a.is_identical(b) && !matches!(a, Value::Float(f) if f.is_nan()) {
            return Ok(true);
        }
        match self.compare_dunder(CompareOp::Eq, a, b)? {
            Some(result) => {
                let truth = self.is_true(&result);
                result.drop_with_heap(self.heap);
                truth
            }
            None => Ok(a.py_eq(b, self.heap, self.interns)),
        }
    }

    /// `item in container`.
    pub(super) fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        if let Some(haystack) = container.as_str(self.heap, self.interns) {
            return match item.as_str(self.heap, self.interns) {
                Some(needle) => Ok(haystack.contains(needle)),
                None => Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.type_name(self.heap)
                ))),
            };
        }
        let items: Vec<Value> = match container.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::List(list)) => list.as_slice().iter().map(|v| v.clone_with_heap(self.heap)).collect(),
            Some(HeapData::Tuple(tuple)) => tuple.as_slice().iter().map(|v| v.clone_with_heap(self.heap)).collect(),
            Some(HeapData::Dict(dict)) => {
                let key = HashKey::from_value(item, self.heap, self.interns)?;
                return Ok(dict.contains(&key));
            }
            Some(HeapData::Range(range)) => {
                return Ok(item.as_index().is_some_and(|i| range.contains(i)));
            }
            _ => return self.contains_generic(container, item),
        };
        let mut found = Ok(false);
        let mut iter = items.into_iter();
        for candidate in iter.by_ref() {
            let equal = self.values_equal(&candidate, item);
            candidate.drop_with_heap(self.heap);
            match equal {
                Ok(false) => {}
                other => {
                    found = other;
                    break;
                }
            }
        }
        iter.drop_with_heap(self.heap);
        found
    }

    /// Membership through `__contains__` or by iterating.
    fn contains_generic(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        if let Some(method) = self.lookup_special(container, "__contains__")? {
            let arg = item.clone_with_heap(self.heap);
            let result = self.call_value(method, CallArgs::positional([arg]))?;
            let truth = self.is_true(&result);
            result.drop_with_heap(self.heap);
            return truth;
        }
        if !self.is_iterable(container) {
            return Err(ExcType::type_error(format!(
                "argument of type '{}' is not iterable",
                container.type_name(self.heap)
            )));
        }
        let iterator = self.get_iter(container.clone_with_heap(self.heap))?;
        let result = loop {
            match self.iter_next(&iterator) {
                Ok(Some(candidate)) => {
                    let equal = self.values_equal(&candidate, item);
                    candidate.drop_with_heap(self.heap);
                    match equal {
                        Ok(false) => {}
                        other => break other,
                    }
                }
                Ok(None) => break Ok(false),
                Err(err) => break Err(err),
            }
        };
        iterator.drop_with_heap(self.heap);
        result
    }
}
