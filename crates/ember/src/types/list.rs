use crate::{heap::HeapId, value::Value};

/// A mutable sequence of owned references.
#[derive(Debug, Default)]
pub(crate) struct List(Vec<Value>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn as_vec_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for item in &mut self.0 {
            item.collect_ref(stack);
        }
    }
}
