use crate::{heap::HeapId, value::Value};

/// A cell holding a variable shared between a function and the closures it creates.
///
/// `Value::Undefined` marks an empty cell.
#[derive(Debug)]
pub(crate) struct Cell {
    pub value: Value,
}

impl Cell {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.value.collect_ref(stack);
    }
}
