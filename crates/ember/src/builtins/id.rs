//! Implementation of the id() builtin function.

use num_bigint::BigInt;

use crate::{
    args::CallArgs,
    exception_private::RunResult,
    heap::Heap,
    resource::ResourceTracker,
    types::LongInt,
    value::Value,
};

/// Implementation of the id() builtin function.
///
/// Heap objects report an address derived from their slot, so the id of a live object is
/// stable and two live objects never share one. Immediates report a value derived id.
pub fn builtin_id(heap: &mut Heap<impl ResourceTracker>, args: CallArgs) -> RunResult<Value> {
    let value = args.get_one_arg("id", heap)?;
    let id = value.py_id();
    value.drop_with_heap(heap);
    match i64::try_from(id) {
        Ok(id) => Ok(Value::Int(id)),
        Err(_) => Ok(LongInt::new(BigInt::from(id)).into_value(heap)?),
    }
}
