use crate::{
    builtins::Builtins,
    exception_private::ExcType,
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    resource::ResourceTracker,
    types::Dict,
    value::Value,
};

/// An exception instance.
///
/// `class` is either a builtin exception class or a user class deriving from one.
/// `cause`, `context` and `traceback` are `None` when unset.
#[derive(Debug)]
pub(crate) struct ExceptionObject {
    pub class: Value,
    pub args: Vec<Value>,
    pub cause: Value,
    pub context: Value,
    pub suppress_context: bool,
    pub traceback: Value,
    pub attrs: Dict,
}

impl ExceptionObject {
    pub fn new(class: Value, args: Vec<Value>) -> Self {
        Self {
            class,
            args,
            cause: Value::None,
            context: Value::None,
            suppress_context: false,
            traceback: Value::None,
            attrs: Dict::new(),
        }
    }

    /// The builtin exception class this exception is an instance of, directly or
    /// through a user class.
    pub fn builtin_type(&self, heap: &Heap<impl ResourceTracker>) -> ExcType {
        match &self.class {
            Value::Builtin(Builtins::ExcType(exc_type)) => *exc_type,
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Class(class) => class.exc_base.unwrap_or(ExcType::Exception),
                _ => ExcType::Exception,
            },
            _ => ExcType::Exception,
        }
    }

    /// Whether `except exc_type:` catches this exception.
    pub fn is_instance_of(&self, exc_type: ExcType, heap: &Heap<impl ResourceTracker>) -> bool {
        match &self.class {
            Value::Builtin(Builtins::ExcType(t)) => t.is_subclass_of(exc_type),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Class(class) => class
                    .mro
                    .iter()
                    .any(|entry| matches!(entry, Value::Builtin(Builtins::ExcType(t)) if *t == exc_type)),
                _ => false,
            },
            _ => false,
        }
    }

    /// `str(exc)`: empty without args, the single argument's str, otherwise the repr of
    /// the args tuple. `KeyError` shows its single argument's repr.
    pub fn str_message(&self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [arg] if self.builtin_type(heap) == ExcType::KeyError => arg.py_repr(heap, interns),
            [arg] => arg.py_str(heap, interns),
            args => {
                let items: Vec<String> = args.iter().map(|arg| arg.py_repr(heap, interns)).collect();
                format!("({})", items.join(", "))
            }
        }
    }

    /// The value carried by `StopIteration`: its first argument, if any.
    pub fn first_arg(&self) -> Option<&Value> {
        self.args.first()
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.class.collect_ref(stack);
        for arg in &mut self.args {
            arg.collect_ref(stack);
        }
        self.cause.collect_ref(stack);
        self.context.collect_ref(stack);
        self.traceback.collect_ref(stack);
        self.attrs.py_dec_ref_ids(stack);
    }
}
