use std::fmt::Write;

use crate::{
    exception_private::RunResult,
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    value::Value,
};

/// A string created at runtime.
///
/// String constants and names are interned and never reach the heap, see
/// [`Value::InternString`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Str(String);

impl Str {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Allocates a new string value.
pub(crate) fn allocate_str(heap: &mut Heap<impl ResourceTracker>, s: impl Into<String>) -> RunResult<Value> {
    let id = heap.allocate(HeapData::Str(Str(s.into())))?;
    Ok(Value::Ref(id))
}

/// Python's `repr()` of a string.
///
/// Uses single quotes unless the string contains a single quote and no double quote.
pub(crate) fn string_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
