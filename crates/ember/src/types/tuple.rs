use crate::{
    exception_private::RunResult,
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    value::Value,
};

/// An immutable sequence of owned references.
#[derive(Debug, Default)]
pub(crate) struct Tuple(Vec<Value>);

impl Tuple {
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for item in &mut self.0 {
            item.collect_ref(stack);
        }
    }
}

/// Allocates a tuple that takes ownership of `items`.
///
/// On allocation failure the items are released before the error is returned.
pub(crate) fn allocate_tuple(heap: &mut Heap<impl ResourceTracker>, items: Vec<Value>) -> RunResult<Value> {
    let id = heap.allocate(HeapData::Tuple(Tuple::new(items)))?;
    Ok(Value::Ref(id))
}

/// Allocates a list that takes ownership of `items`.
pub(crate) fn allocate_list(heap: &mut Heap<impl ResourceTracker>, items: Vec<Value>) -> RunResult<Value> {
    let id = heap.allocate(HeapData::List(super::List::new(items)))?;
    Ok(Value::Ref(id))
}
