//! Generator objects.
//!
//! Calling a function whose code has the generator flag binds the arguments into a frame
//! as usual but wraps the frame in a `Generator` instead of running it. Each `send`
//! resumes the frame until it yields or finishes.
//!
//! While the generator runs its frame is moved out of the heap object and into the eval
//! loop, so a running generator has `frame: None` and `state: Running`.

use crate::{
    bytecode::vm::{ExcInfo, Frame},
    heap::HeapId,
    value::Value,
};

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GeneratorState {
    /// Created but never resumed; the frame has not executed an instruction.
    Created,
    /// Currently executing. Resuming it again raises `ValueError`.
    Running,
    /// Stopped at a `yield`.
    Suspended,
    /// Returned, raised or closed. The frame has been released.
    Closed,
}

#[derive(Debug)]
pub(crate) struct Generator {
    pub frame: Option<Box<Frame>>,
    pub state: GeneratorState,
    pub name: String,
    pub qualname: String,
    /// The code object, for `gi_code`.
    pub code: Value,
    /// The exception being handled inside the generator while it is suspended.
    pub exc_state: ExcInfo,
    finalized: bool,
}

impl Generator {
    pub fn new(frame: Frame, name: String, qualname: String, code: Value) -> Self {
        Self {
            frame: Some(Box::new(frame)),
            state: GeneratorState::Created,
            name,
            qualname,
            code,
            exc_state: ExcInfo::none(),
            finalized: false,
        }
    }

    /// True when releasing the last reference must close the generator first.
    pub fn needs_finalizer(&self) -> bool {
        !self.finalized && self.state == GeneratorState::Suspended
    }

    pub fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        if let Some(frame) = &mut self.frame {
            frame.py_dec_ref_ids(stack);
        }
        self.code.collect_ref(stack);
        self.exc_state.collect_ref(stack);
    }
}
