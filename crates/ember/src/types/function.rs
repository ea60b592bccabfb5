use crate::{heap::HeapId, value::Value};

/// A Python function: code plus everything `MAKE_FUNCTION` attached to it.
#[derive(Debug)]
pub(crate) struct Function {
    pub code: HeapId,
    pub globals: HeapId,
    pub name: String,
    pub qualname: String,
    /// Positional defaults, applied to the last parameters.
    pub defaults: Vec<Value>,
    /// Keyword-only defaults, a dict.
    pub kwdefaults: Option<HeapId>,
    /// Cells for the code's free variables, in `co_freevars` order.
    pub closure: Vec<HeapId>,
    pub annotations: Value,
}

impl Function {
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.push(self.code);
        stack.push(self.globals);
        for value in &mut self.defaults {
            value.collect_ref(stack);
        }
        stack.extend(self.kwdefaults);
        stack.extend(self.closure.iter().copied());
        self.annotations.collect_ref(stack);
    }
}

/// A callable bound to the object it was looked up on.
///
/// `func` is a Python function or an unbound builtin method.
#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub func: Value,
    pub receiver: Value,
}

impl BoundMethod {
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.func.collect_ref(stack);
        self.receiver.collect_ref(stack);
    }
}
