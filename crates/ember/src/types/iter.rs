//! Iterators over the builtin sequences.
//!
//! An iterator keeps a reference to its source until it is exhausted, at which point the
//! source is released so a finished loop does not keep a large container alive.

use crate::{
    exception_private::{ExcType, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    resource::ResourceTracker,
    types::str::allocate_str,
    value::Value,
};

/// What an iterator walks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterKind {
    List,
    Tuple,
    /// `index` is a byte offset into the string.
    Str,
    Range {
        next: i64,
        stop: i64,
        step: i64,
    },
    DictKeys {
        expected_len: usize,
    },
}

#[derive(Debug)]
pub(crate) struct SeqIter {
    kind: IterKind,
    source: Value,
    index: usize,
    exhausted: bool,
}

impl SeqIter {
    pub fn new(kind: IterKind, source: Value) -> Self {
        Self {
            kind,
            source,
            index: 0,
            exhausted: false,
        }
    }

    pub fn kind(&self) -> IterKind {
        self.kind
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.source.collect_ref(stack);
    }
}

/// The item an iterator produces next, computed while the heap is borrowed immutably.
enum Step {
    Item(Value),
    Char(char),
    Range(i64, i64),
    SizeChanged,
    Exhausted,
}

/// Advances the iterator stored at `iter_id`.
///
/// Returns `Ok(None)` once exhausted; the iterator keeps returning `None` afterwards.
pub(crate) fn advance(
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
    iter_id: HeapId,
) -> RunResult<Option<Value>> {
    let step = {
        let HeapData::Iter(iter) = heap.get(iter_id) else {
            return Err(RunError::internal("advance: heap object is not an iterator"));
        };
        if iter.exhausted {
            return Ok(None);
        }
        let index = iter.index;
        match iter.kind {
            IterKind::Range { next, stop, step } => {
                let more = if step > 0 { next < stop } else { next > stop };
                if more {
                    Step::Range(next, next.saturating_add(step))
                } else {
                    Step::Exhausted
                }
            }
            IterKind::Str => match iter.source.as_str(heap, interns).and_then(|s| s.get(index..)) {
                Some(rest) => rest.chars().next().map_or(Step::Exhausted, Step::Char),
                None => Step::Exhausted,
            },
            IterKind::List | IterKind::Tuple | IterKind::DictKeys { .. } => {
                let Some(source_id) = iter.source.ref_id() else {
                    return Err(RunError::internal("advance: sequence iterator without a source"));
                };
                match (iter.kind, heap.get(source_id)) {
                    (IterKind::List, HeapData::List(list)) => list
                        .as_slice()
                        .get(index)
                        .map_or(Step::Exhausted, |item| Step::Item(item.clone_with_heap(heap))),
                    (IterKind::Tuple, HeapData::Tuple(tuple)) => tuple
                        .as_slice()
                        .get(index)
                        .map_or(Step::Exhausted, |item| Step::Item(item.clone_with_heap(heap))),
                    (IterKind::DictKeys { expected_len }, HeapData::Dict(dict)) => {
                        if dict.len() == expected_len {
                            dict.entry_at(index)
                                .map_or(Step::Exhausted, |(key, _)| Step::Item(key.clone_with_heap(heap)))
                        } else {
                            Step::SizeChanged
                        }
                    }
                    _ => return Err(RunError::internal("advance: iterator source has the wrong type")),
                }
            }
        }
    };

    match step {
        Step::Exhausted => {
            mark_exhausted(heap, iter_id);
            Ok(None)
        }
        Step::SizeChanged => {
            mark_exhausted(heap, iter_id);
            Err(ExcType::runtime_error("dictionary changed size during iteration"))
        }
        Step::Item(item) => {
            if let HeapData::Iter(iter) = heap.get_mut(iter_id) {
                iter.index += 1;
            }
            Ok(Some(item))
        }
        Step::Range(current, next_value) => {
            if let HeapData::Iter(iter) = heap.get_mut(iter_id)
                && let IterKind::Range { next, .. } = &mut iter.kind
            {
                *next = next_value;
            }
            Ok(Some(Value::Int(current)))
        }
        Step::Char(c) => {
            if let HeapData::Iter(iter) = heap.get_mut(iter_id) {
                iter.index += c.len_utf8();
            }
            Ok(Some(char_value(heap, c)?))
        }
    }
}

/// A one character string, interned for ASCII.
pub(crate) fn char_value(heap: &mut Heap<impl ResourceTracker>, c: char) -> RunResult<Value> {
    if c.is_ascii() {
        Ok(Value::InternString(StringId::from_ascii(c as u8)))
    } else {
        allocate_str(heap, c.to_string())
    }
}

fn mark_exhausted(heap: &mut Heap<impl ResourceTracker>, iter_id: HeapId) {
    let source = match heap.get_mut(iter_id) {
        HeapData::Iter(iter) => {
            iter.exhausted = true;
            std::mem::replace(&mut iter.source, Value::None)
        }
        _ => return,
    };
    source.drop_with_heap(heap);
}
