//! Functions provided by the embedding application.
//!
//! A host function is registered under a name on the [`Runtime`](crate::Runtime) and
//! appears in the builtins namespace as `Value::HostFunction`. Calls convert the
//! arguments to [`Object`]s, run the closure with the execution token released and
//! convert the result back.

use std::fmt;

use ahash::AHashMap;

use crate::{
    Exception,
    exception_private::{ExcType, RunResult},
    heap::Heap,
    intern::{Interns, StringId},
    object::Object,
    resource::ResourceTracker,
    value::Value,
};

/// Signature of a host function: positional arguments and `(name, value)` keyword pairs.
pub type HostFn = dyn FnMut(&[Object], &[(String, Object)]) -> Result<Object, Exception> + Send;

/// The registered host functions, keyed by interned name.
#[derive(Default)]
pub(crate) struct HostFunctions {
    functions: AHashMap<StringId, Box<HostFn>>,
}

impl fmt::Debug for HostFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunctions")
            .field("count", &self.functions.len())
            .finish()
    }
}

impl HostFunctions {
    pub fn insert(&mut self, name: StringId, function: Box<HostFn>) {
        self.functions.insert(name, function);
    }

    pub fn get_mut(&mut self, name: StringId) -> Option<&mut Box<HostFn>> {
        self.functions.get_mut(&name)
    }
}

/// Arguments converted for a host call.
pub(crate) struct HostArgs {
    pub positional: Vec<Object>,
    pub keywords: Vec<(String, Object)>,
}

impl HostArgs {
    /// Converts and releases the call's values.
    pub fn new(
        positional: Vec<Value>,
        kwargs: Vec<(Value, Value)>,
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
    ) -> Self {
        let positional = positional
            .into_iter()
            .map(|value| Object::new(value, heap, interns))
            .collect();
        let keywords = kwargs
            .into_iter()
            .map(|(name, value)| {
                let text = name.as_str(heap, interns).unwrap_or_default().to_owned();
                name.drop_with_heap(heap);
                (text, Object::new(value, heap, interns))
            })
            .collect();
        Self { positional, keywords }
    }
}

/// Turns a host function's result into a runtime value.
pub(crate) fn host_result(
    result: Result<Object, Exception>,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    match result {
        Ok(object) => object
            .to_value(heap, interns)
            .map_err(|err| ExcType::type_error(format!("invalid host function result: {err}"))),
        Err(exc) => Err(exc.into()),
    }
}
