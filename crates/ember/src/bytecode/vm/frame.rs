//! Frames, the block stack and per-thread exception state.
//!
//! A frame owns everything one activation of a code object needs: fast locals, cells,
//! the operand stack and the block stack. Blocks record where control goes when an
//! exception unwinds through them and how deep the operand stack was when they were
//! pushed, so unwinding can release exactly the values the protected region left behind.

use std::sync::Arc;

use crate::{
    bytecode::CodeBody,
    exception_private::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapId},
    resource::ResourceTracker,
    value::Value,
};

/// Maximum number of statically nested blocks in one frame.
pub(crate) const MAX_BLOCKS: usize = 20;

/// What a block protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BlockKind {
    /// `try` bodies and `with` bodies: an exception jumps to the handler.
    Finally,
    /// Pushed while a handler runs; owns the saved exception triple below its level.
    ExceptHandler,
    /// A loop: unwinding pops it and keeps going, `BREAK_LOOP` jumps to its exit.
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub kind: BlockKind,
    pub handler: usize,
    /// Operand stack depth when the block was pushed.
    pub level: usize,
}

/// Lifecycle of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameState {
    Fresh,
    Running,
    Suspended,
    Returned,
    Raised,
}

/// An exception triple: type, value and traceback, each `None` when unset.
#[derive(Debug)]
pub(crate) struct ExcInfo {
    pub exc_type: Value,
    pub value: Value,
    pub traceback: Value,
}

impl Default for ExcInfo {
    fn default() -> Self {
        Self::none()
    }
}

impl ExcInfo {
    pub fn none() -> Self {
        Self {
            exc_type: Value::None,
            value: Value::None,
            traceback: Value::None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.value.is_none()
    }

    /// Moves the triple out, leaving `None`s behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn collect_ref(&mut self, stack: &mut Vec<HeapId>) {
        self.exc_type.collect_ref(stack);
        self.value.collect_ref(stack);
        self.traceback.collect_ref(stack);
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for ExcInfo {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.exc_type.drop_with_heap(heap);
        self.value.drop_with_heap(heap);
        self.traceback.drop_with_heap(heap);
    }
}

/// One activation of a code object.
#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Arc<CodeBody>,
    /// The heap code object, which owns the constants.
    pub code_id: HeapId,
    pub globals: HeapId,
    pub builtins: HeapId,
    /// The locals mapping used by the name opcodes: the globals for module code, a fresh
    /// dict for class bodies, absent for functions.
    pub locals: Option<HeapId>,
    pub fast: Vec<Value>,
    /// Cell variables followed by free variables.
    pub cells: Vec<HeapId>,
    pub stack: Vec<Value>,
    pub blocks: Vec<Block>,
    /// Offset of the next instruction to execute.
    pub next_instr: usize,
    /// Offset of the instruction executing or last executed, its prefixes included.
    pub lasti: usize,
    pub state: FrameState,
}

impl Frame {
    /// Creates a frame; all heap ids passed in are owned references.
    pub fn new(
        code: Arc<CodeBody>,
        code_id: HeapId,
        globals: HeapId,
        builtins: HeapId,
        locals: Option<HeapId>,
    ) -> Self {
        let nlocals = code.nlocals();
        let mut fast = Vec::with_capacity(nlocals);
        fast.resize_with(nlocals, || Value::Undefined);
        Self {
            code,
            code_id,
            globals,
            builtins,
            locals,
            fast,
            cells: Vec::new(),
            stack: Vec::new(),
            blocks: Vec::new(),
            next_instr: 0,
            lasti: 0,
            state: FrameState::Fresh,
        }
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> RunResult<Value> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    /// The value `n` slots from the top of the operand stack, `peek(1)` being the top.
    pub fn peek(&self, n: usize) -> RunResult<&Value> {
        self.stack
            .len()
            .checked_sub(n)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(stack_underflow)
    }

    /// Pops the top `n` values, returned bottom first.
    pub fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let start = self.stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        Ok(self.stack.split_off(start))
    }

    /// Number of active handler blocks.
    pub fn handler_depth(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| block.kind == BlockKind::ExceptHandler)
            .count()
    }

    pub fn push_block(&mut self, kind: BlockKind, handler: usize, level: usize) -> RunResult<()> {
        if self.blocks.len() >= MAX_BLOCKS {
            return Err(ExcType::system_error("too many statically nested blocks"));
        }
        self.blocks.push(Block { kind, handler, level });
        Ok(())
    }

    pub fn pop_block(&mut self) -> RunResult<Block> {
        self.blocks
            .pop()
            .ok_or_else(|| ExcType::system_error("block stack underflow"))
    }

    /// Releases operand stack values above `level`.
    pub fn truncate_stack(&mut self, level: usize, heap: &mut Heap<impl ResourceTracker>) {
        while self.stack.len() > level {
            if let Some(value) = self.stack.pop() {
                value.drop_with_heap(heap);
            }
        }
    }

    /// Source line of the current instruction.
    pub fn line(&self) -> u32 {
        self.code.line_for(self.lasti)
    }

    pub fn is_started(&self) -> bool {
        self.state != FrameState::Fresh
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.push(self.code_id);
        stack.push(self.globals);
        stack.push(self.builtins);
        stack.extend(self.locals);
        for value in &mut self.fast {
            value.collect_ref(stack);
        }
        stack.extend(self.cells.iter().copied());
        for value in &mut self.stack {
            value.collect_ref(stack);
        }
    }
}

fn stack_underflow() -> RunError {
    RunError::internal("operand stack underflow")
}

impl<T: ResourceTracker> DropWithHeap<T> for Frame {
    fn drop_with_heap(mut self, heap: &mut Heap<T>) {
        let mut ids = Vec::new();
        self.py_dec_ref_ids(&mut ids);
        for id in ids {
            heap.dec_ref(id);
        }
    }
}

/// Execution state of the single logical thread running bytecode.
///
/// `exc_stack` holds the exception being handled at each level: the bottom entry belongs
/// to the thread, each running generator pushes its own entry while it runs.
#[derive(Debug)]
pub(crate) struct ThreadState {
    pub exc_stack: Vec<ExcInfo>,
    /// Number of frames currently being evaluated.
    pub depth: usize,
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadState {
    pub fn new() -> Self {
        Self {
            exc_stack: vec![ExcInfo::none()],
            depth: 0,
        }
    }

    /// The innermost exception-state entry, the one handlers save and restore.
    pub fn exc_info(&mut self) -> &mut ExcInfo {
        if self.exc_stack.is_empty() {
            self.exc_stack.push(ExcInfo::none());
        }
        let last = self.exc_stack.len() - 1;
        &mut self.exc_stack[last]
    }

    /// The exception currently being handled anywhere on the thread, skipping entries
    /// that handle nothing.
    pub fn topmost_exception(&self) -> Option<&ExcInfo> {
        self.exc_stack.iter().rev().find(|info| info.is_active())
    }

    pub fn clear(&mut self, heap: &mut Heap<impl ResourceTracker>) {
        for info in self.exc_stack.drain(..) {
            info.drop_with_heap(heap);
        }
        self.exc_stack.push(ExcInfo::none());
        self.depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exception_private::RunError, intern::Interns, resource::NoLimitTracker};

    fn empty_body(interns: &mut Interns) -> Arc<CodeBody> {
        let name = interns.intern("f");
        Arc::new(CodeBody::for_tests(name))
    }

    fn frame(heap: &mut Heap<NoLimitTracker>, interns: &mut Interns) -> Frame {
        let code = heap.allocate(crate::heap::HeapData::Dict(crate::types::Dict::new())).unwrap();
        let globals = heap.allocate(crate::heap::HeapData::Dict(crate::types::Dict::new())).unwrap();
        let builtins = heap.allocate(crate::heap::HeapData::Dict(crate::types::Dict::new())).unwrap();
        Frame::new(empty_body(interns), code, globals, builtins, None)
    }

    #[test]
    fn block_stack_overflows_with_system_error() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut interns = Interns::new();
        let mut f = frame(&mut heap, &mut interns);
        for i in 0..MAX_BLOCKS {
            f.push_block(BlockKind::Finally, i * 2, 0).unwrap();
        }
        let err = f.push_block(BlockKind::Loop, 0, 0).unwrap_err();
        assert_eq!(err.exc_type(&heap), Some(ExcType::SystemError));
        assert_eq!(f.pop_block().unwrap().handler, (MAX_BLOCKS - 1) * 2);
        f.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn popping_an_empty_block_stack_fails() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut interns = Interns::new();
        let mut f = frame(&mut heap, &mut interns);
        assert!(matches!(f.pop_block(), Err(RunError::Exc(_))));
        f.drop_with_heap(&mut heap);
    }

    #[test]
    fn truncation_releases_values_above_the_level() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut interns = Interns::new();
        let mut f = frame(&mut heap, &mut interns);
        let list = heap.allocate(crate::heap::HeapData::List(crate::types::List::default())).unwrap();
        f.stack.push(Value::Int(1));
        f.stack.push(Value::Ref(list));
        f.stack.push(Value::Int(3));
        f.truncate_stack(1, &mut heap);
        assert_eq!(f.stack.len(), 1);
        assert_eq!(heap.get_refcount(list), 0, "the list was only owned by the stack");
        f.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn topmost_exception_skips_empty_entries() {
        let mut thread = ThreadState::new();
        assert!(thread.topmost_exception().is_none());
        thread.exc_stack[0].value = Value::Int(1);
        thread.exc_stack.push(ExcInfo::none());
        assert!(matches!(thread.topmost_exception().map(|info| &info.value), Some(Value::Int(1))));
        assert!(!thread.exc_info().is_active());
    }
}
