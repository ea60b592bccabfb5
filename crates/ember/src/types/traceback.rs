use crate::{heap::HeapId, intern::StringId, value::Value};

/// One traceback entry, created as an exception leaves a frame.
///
/// The chain starts at the outermost frame; `next` points towards the frame where the
/// exception was raised.
#[derive(Debug)]
pub(crate) struct Traceback {
    pub next: Value,
    pub name: StringId,
    pub filename: StringId,
    pub lineno: u32,
    pub lasti: u32,
}

impl Traceback {
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.next.collect_ref(stack);
    }
}
