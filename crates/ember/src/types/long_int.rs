//! Arbitrary precision integer support.
//!
//! Python has one `int` type. Values that fit in an `i64` stay `Value::Int`; arithmetic
//! that overflows is redone on `BigInt` and the result lives on the heap as a `LongInt`
//! until it fits again.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::{
    heap::{Heap, HeapData},
    resource::{ResourceError, ResourceTracker},
    value::Value,
};

/// Wrapper around `num_bigint::BigInt` for integers outside the `i64` range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LongInt(BigInt);

impl LongInt {
    pub fn new(bi: BigInt) -> Self {
        Self(bi)
    }

    pub fn as_bigint(&self) -> &BigInt {
        &self.0
    }

    /// Converts to a `Value`, demoting to i64 if it fits.
    pub fn into_value(self, heap: &mut Heap<impl ResourceTracker>) -> Result<Value, ResourceError> {
        if let Some(i) = self.0.to_i64() {
            Ok(Value::Int(i))
        } else {
            let heap_id = heap.allocate(HeapData::LongInt(self))?;
            Ok(Value::Ref(heap_id))
        }
    }

    /// Estimates memory size in bytes, rounding bits up to whole bytes.
    pub fn estimate_size(&self) -> usize {
        usize::try_from(self.0.bits().div_ceil(8)).unwrap_or(usize::MAX)
    }
}

impl From<BigInt> for LongInt {
    fn from(bi: BigInt) -> Self {
        Self(bi)
    }
}
