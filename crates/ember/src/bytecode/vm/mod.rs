//! Bytecode virtual machine.
//!
//! [`VM::eval_frame`] runs one frame until it returns, yields or raises. Python
//! functions called by the call opcodes are bound into frames that the same loop
//! pushes on a frame stack and pops when they finish, so deep Python recursion stays
//! off the Rust stack. Calls made from native code (builtins, dunder methods,
//! generator resumption) still evaluate in a nested `eval_frame`. Either way a frame
//! counts once against the recursion limit. Generator frames live on the heap between
//! resumptions and are moved back into the loop by `send`, `throw` and `close`.
//!
//! Instruction handlers are split by concern:
//! - `exceptions` - raising, unwinding through the block stack, handler entry and exit
//! - `call` - the call protocol, argument binding, function and class instantiation
//! - `attr` - attribute lookup, assignment and deletion
//! - `binary` - unary, binary and in-place operators
//! - `compare` - rich comparison, identity and containment
//! - `collections` - subscripts, iteration, unpacking and container builders
//! - `format` - `FORMAT_VALUE` and `BUILD_STRING`
//! - `generator` - generator resumption, delegation and finalization

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;
mod format;
mod frame;
mod generator;

pub use frame::BlockKind;
pub(crate) use frame::{Block, ExcInfo, Frame, ThreadState};
use frame::FrameState;
pub(crate) use generator::GenResult;
use call::Called;

use crate::{
    args::CallArgs,
    bytecode::op::{CompareOp, INSTRUCTION_SIZE, Opcode},
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    gil::ExecutionToken,
    heap::{ContainsHeap, DropWithHeap, Heap, HeapData, HeapId},
    host::HostFunctions,
    intern::{Interns, StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::{NoopTracer, VmTracer},
    types::{Cell, Slice},
    value::Value,
};

/// How a frame stopped evaluating, other than by raising.
#[derive(Debug)]
pub(crate) enum FrameExit {
    /// `RETURN_VALUE` executed; the frame is finished.
    Return(Value),
    /// `YIELD_VALUE` or a delegating `YIELD_FROM` suspended a generator frame.
    Yield(Value),
}

/// How evaluation of a frame begins.
#[derive(Debug)]
pub(crate) enum Resume {
    /// Run from the frame's current position with nothing injected.
    Start,
    /// Resume a suspended frame with the value its `yield` evaluates to. A frame that
    /// has not started ignores the value.
    Send(Value),
    /// Raise the error at the frame's current position.
    Throw(RunError),
}

impl<T: ResourceTracker> DropWithHeap<T> for Resume {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        match self {
            Self::Start => {}
            Self::Send(value) => value.drop_with_heap(heap),
            Self::Throw(err) => err.drop_with_heap(heap),
        }
    }
}

/// Outcome of one instruction.
enum Step {
    Next,
    Return(Value),
    Yield(Value),
    /// Enter a bound Python function frame.
    Call(Box<Frame>),
    /// Unwind without adding a traceback entry for the current frame: the error is a
    /// re-raise and its traceback already covers this frame.
    Unwind(RunError),
}

// ============================================================================
// Virtual Machine
// ============================================================================

/// The bytecode virtual machine.
///
/// A VM borrows the runtime's state for the duration of one entry point call and holds
/// the execution token while it exists.
pub(crate) struct VM<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer = NoopTracer> {
    /// Heap for reference-counted objects.
    pub(crate) heap: &'a mut Heap<T>,

    /// Interned strings.
    pub(crate) interns: &'a Interns,

    /// Print output writer.
    pub(crate) print: &'a mut P,

    tracer: &'a mut Tr,

    host: &'a mut HostFunctions,

    /// Exception state and frame depth of the logical thread running bytecode.
    thread: &'a mut ThreadState,

    /// The builtins namespace dict. Borrowed: the runtime owns the reference.
    builtins: HeapId,

    token: ExecutionToken,
}

impl<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'a, T, P, Tr> {
    /// Creates a VM, blocking until the execution token is available.
    pub fn new(
        heap: &'a mut Heap<T>,
        interns: &'a Interns,
        print: &'a mut P,
        tracer: &'a mut Tr,
        host: &'a mut HostFunctions,
        thread: &'a mut ThreadState,
        builtins: HeapId,
    ) -> Self {
        let token = ExecutionToken::acquire(heap.tracker().switch_interval());
        Self {
            heap,
            interns,
            print,
            tracer,
            host,
            thread,
            builtins,
            token,
        }
    }

    /// Creates a frame for module level code: the globals double as the locals mapping.
    pub fn module_frame(&self, code_id: HeapId, globals: HeapId) -> RunResult<Frame> {
        let HeapData::Code(code) = self.heap.get(code_id) else {
            return Err(RunError::internal("module_frame: not a code object"));
        };
        let body = std::sync::Arc::clone(&code.body);
        self.heap.inc_ref(code_id);
        self.heap.inc_ref(globals);
        self.heap.inc_ref(globals);
        self.heap.inc_ref(self.builtins);
        Ok(Frame::new(body, code_id, globals, self.builtins, Some(globals)))
    }

    /// Evaluates `frame` until it returns, yields or raises.
    pub fn eval_frame(&mut self, frame: &mut Frame, resume: Resume) -> RunResult<FrameExit> {
        if let Err(err) = self.heap.tracker().check_recursion_depth(self.thread.depth) {
            resume.drop_with_heap(self.heap);
            return Err(err.into());
        }
        self.thread.depth += 1;
        let interns = self.interns;
        self.tracer
            .on_call(Some(interns.get_str(frame.code.qualname)), self.thread.depth);
        let result = self.run_frame(frame, resume);
        self.thread.depth -= 1;
        self.tracer.on_return(self.thread.depth);
        result
    }

    fn run_frame(&mut self, base: &mut Frame, resume: Resume) -> RunResult<FrameExit> {
        let mut pending = match resume {
            Resume::Start => None,
            Resume::Send(value) => {
                if base.is_started() {
                    base.push(value);
                } else {
                    value.drop_with_heap(self.heap);
                }
                None
            }
            Resume::Throw(err) => Some((err, true)),
        };
        base.state = FrameState::Running;
        // Frames of Python functions called from `base`, innermost last.
        let mut callees: Vec<Box<Frame>> = Vec::new();
        loop {
            let frame = match callees.last_mut() {
                Some(callee) => &mut **callee,
                None => &mut *base,
            };
            if let Some((err, add_traceback)) = pending.take()
                && let Err(err) = self.handle_exception(frame, err, add_traceback)
            {
                frame.state = FrameState::Raised;
                if let Some(callee) = callees.pop() {
                    self.leave_callee(*callee);
                    pending = Some((err, true));
                    continue;
                }
                return Err(err);
            }
            match self.step(frame) {
                Ok(Step::Next) => {}
                Ok(Step::Call(mut callee)) => {
                    if let Err(err) = self.heap.tracker().check_recursion_depth(self.thread.depth) {
                        (*callee).drop_with_heap(self.heap);
                        pending = Some((err.into(), true));
                        continue;
                    }
                    self.enter_callee(&mut callee);
                    callees.push(callee);
                }
                Ok(Step::Return(value)) => {
                    frame.state = FrameState::Returned;
                    let Some(callee) = callees.pop() else {
                        return Ok(FrameExit::Return(value));
                    };
                    self.leave_callee(*callee);
                    let caller = match callees.last_mut() {
                        Some(caller) => &mut **caller,
                        None => &mut *base,
                    };
                    caller.push(value);
                }
                Ok(Step::Yield(value)) => {
                    if !callees.is_empty() {
                        value.drop_with_heap(self.heap);
                        pending = Some((RunError::internal("function frame yielded"), true));
                        continue;
                    }
                    base.state = FrameState::Suspended;
                    self.tracer.on_yield(self.thread.depth);
                    return Ok(FrameExit::Yield(value));
                }
                Ok(Step::Unwind(err)) => pending = Some((err, false)),
                Err(err) => pending = Some((err, true)),
            }
        }
    }

    /// Accounts for a callee frame pushed by [`Step::Call`].
    fn enter_callee(&mut self, callee: &mut Frame) {
        callee.state = FrameState::Running;
        self.thread.depth += 1;
        let interns = self.interns;
        self.tracer
            .on_call(Some(interns.get_str(callee.code.qualname)), self.thread.depth);
    }

    /// Pops the accounting of a finished callee frame and releases it.
    fn leave_callee(&mut self, callee: Frame) {
        self.thread.depth -= 1;
        self.tracer.on_return(self.thread.depth);
        callee.drop_with_heap(self.heap);
    }

    /// Executes one instruction.
    #[expect(clippy::cognitive_complexity)]
    fn step(&mut self, frame: &mut Frame) -> RunResult<Step> {
        // Safe point: no instruction is half done, so finalizers may run arbitrary code.
        if self.heap.has_pending_finalizers() {
            self.run_finalizers();
        }
        self.heap.tracker_mut().check_time()?;
        self.token.tick();

        let (op, arg) = fetch(frame)?;
        self.tracer
            .on_instruction(frame.lasti, op, frame.stack.len(), self.thread.depth);
        let index = arg as usize;

        match op {
            // ============================================================
            // Stack Operations
            // ============================================================
            Opcode::Nop => {}
            Opcode::PopTop => {
                let value = frame.pop()?;
                value.drop_with_heap(self.heap);
            }
            Opcode::RotTwo => rotate(frame, 2)?,
            Opcode::RotThree => rotate(frame, 3)?,
            Opcode::RotFour => rotate(frame, 4)?,
            Opcode::DupTop => {
                let value = frame.peek(1)?.clone_with_heap(self.heap);
                frame.push(value);
            }
            Opcode::DupTopTwo => {
                let second = frame.peek(2)?.clone_with_heap(self.heap);
                let top = frame.peek(1)?.clone_with_heap(self.heap);
                frame.push(second);
                frame.push(top);
            }

            // ============================================================
            // Constants & Names
            // ============================================================
            Opcode::LoadConst => {
                let value = self.load_const(frame, index)?;
                frame.push(value);
            }
            Opcode::LoadName => {
                let name = name_at(frame, index)?;
                let value = self.load_name(frame, name)?;
                frame.push(value);
            }
            Opcode::StoreName => {
                let name = name_at(frame, index)?;
                let value = frame.pop()?;
                let Some(locals) = frame.locals else {
                    value.drop_with_heap(self.heap);
                    return Err(ExcType::system_error(format!(
                        "no locals found when storing '{}'",
                        self.interns.get_str(name)
                    )));
                };
                self.namespace_set(locals, name, value)?;
            }
            Opcode::DeleteName => {
                let name = name_at(frame, index)?;
                let text = self.interns.get_str(name);
                let Some(locals) = frame.locals else {
                    return Err(ExcType::system_error(format!("no locals when deleting '{text}'")));
                };
                if !self.namespace_delete(locals, text) {
                    return Err(ExcType::name_error(text));
                }
            }
            Opcode::LoadGlobal => {
                let name = name_at(frame, index)?;
                let text = self.interns.get_str(name);
                let value = self
                    .namespace_get(frame.globals, text)
                    .or_else(|| self.namespace_get(frame.builtins, text))
                    .ok_or_else(|| ExcType::name_error(text))?;
                frame.push(value);
            }
            Opcode::StoreGlobal => {
                let name = name_at(frame, index)?;
                let value = frame.pop()?;
                self.namespace_set(frame.globals, name, value)?;
            }
            Opcode::DeleteGlobal => {
                let name = name_at(frame, index)?;
                let text = self.interns.get_str(name);
                if !self.namespace_delete(frame.globals, text) {
                    return Err(ExcType::name_error(text));
                }
            }
            Opcode::LoadBuildClass => {
                let name: &'static str = StaticStrings::DunderBuildClass.into();
                let value = self
                    .namespace_get(frame.builtins, name)
                    .ok_or_else(|| SimpleException::new_msg(ExcType::NameError, "__build_class__ not found"))?;
                frame.push(value);
            }
            Opcode::LoadAssertionError => frame.push(Value::from(ExcType::AssertionError)),

            // ============================================================
            // Fast Locals & Cells
            // ============================================================
            Opcode::LoadFast => {
                let value = match frame.fast.get(index) {
                    Some(value) if !value.is_undefined() => value.clone_with_heap(self.heap),
                    _ => return Err(ExcType::unbound_local_error(self.varname(frame, index))),
                };
                frame.push(value);
            }
            Opcode::StoreFast => {
                let value = frame.pop()?;
                let Some(slot) = frame.fast.get_mut(index) else {
                    value.drop_with_heap(self.heap);
                    return Err(RunError::internal("STORE_FAST: local index out of range"));
                };
                let old = std::mem::replace(slot, value);
                old.drop_with_heap(self.heap);
            }
            Opcode::DeleteFast => {
                let old = match frame.fast.get_mut(index) {
                    Some(slot) if !slot.is_undefined() => std::mem::replace(slot, Value::Undefined),
                    _ => return Err(ExcType::unbound_local_error(self.varname(frame, index))),
                };
                old.drop_with_heap(self.heap);
            }
            Opcode::LoadClosure => {
                let cell = cell_at(frame, index)?;
                self.heap.inc_ref(cell);
                frame.push(Value::Ref(cell));
            }
            Opcode::LoadDeref => {
                let value = self.load_deref(frame, index)?;
                frame.push(value);
            }
            Opcode::LoadClassderef => {
                let name = frame.code.cell_name(index);
                let text = self.interns.get_str(name);
                let value = match frame.locals.and_then(|locals| self.namespace_get(locals, text)) {
                    Some(value) => value,
                    None => self.load_deref(frame, index)?,
                };
                frame.push(value);
            }
            Opcode::StoreDeref => {
                let cell = cell_at(frame, index)?;
                let value = frame.pop()?;
                self.tracer.on_cell_store(cell_slot(index), frame.cells.len());
                if let HeapData::Cell(Cell { value: slot }) = self.heap.get_mut(cell) {
                    let old = std::mem::replace(slot, value);
                    old.drop_with_heap(self.heap);
                } else {
                    value.drop_with_heap(self.heap);
                }
            }
            Opcode::DeleteDeref => {
                let cell = cell_at(frame, index)?;
                let old = match self.heap.get_mut(cell) {
                    HeapData::Cell(Cell { value }) if !value.is_undefined() => std::mem::replace(value, Value::Undefined),
                    _ => return Err(self.unbound_cell_error(frame, index)),
                };
                old.drop_with_heap(self.heap);
            }

            // ============================================================
            // Operators
            // ============================================================
            Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryInvert => {
                let operand = frame.pop()?;
                let result = self.unary_op(op, &operand);
                operand.drop_with_heap(self.heap);
                frame.push(result?);
            }
            Opcode::UnaryNot => {
                let operand = frame.pop()?;
                let truth = self.is_true(&operand);
                operand.drop_with_heap(self.heap);
                frame.push(Value::Bool(!truth?));
            }
            Opcode::BinaryPower
            | Opcode::BinaryMultiply
            | Opcode::BinaryModulo
            | Opcode::BinaryAdd
            | Opcode::BinarySubtract
            | Opcode::BinaryFloorDivide
            | Opcode::BinaryTrueDivide
            | Opcode::BinaryLshift
            | Opcode::BinaryRshift
            | Opcode::BinaryAnd
            | Opcode::BinaryXor
            | Opcode::BinaryOr
            | Opcode::InplacePower
            | Opcode::InplaceMultiply
            | Opcode::InplaceModulo
            | Opcode::InplaceAdd
            | Opcode::InplaceSubtract
            | Opcode::InplaceFloorDivide
            | Opcode::InplaceTrueDivide
            | Opcode::InplaceLshift
            | Opcode::InplaceRshift
            | Opcode::InplaceAnd
            | Opcode::InplaceXor
            | Opcode::InplaceOr => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let result = self.binary_opcode(op, &lhs, &rhs);
                lhs.drop_with_heap(self.heap);
                rhs.drop_with_heap(self.heap);
                frame.push(result?);
            }
            Opcode::CompareOp => {
                let cmp = CompareOp::from_repr(u8::try_from(arg).unwrap_or(u8::MAX))
                    .ok_or_else(|| ExcType::system_error(format!("invalid comparison {arg}")))?;
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let result = self.compare(cmp, &lhs, &rhs);
                lhs.drop_with_heap(self.heap);
                rhs.drop_with_heap(self.heap);
                frame.push(result?);
            }
            Opcode::IsOp => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let same = lhs.is_identical(&rhs);
                lhs.drop_with_heap(self.heap);
                rhs.drop_with_heap(self.heap);
                frame.push(Value::Bool(same != (arg == 1)));
            }
            Opcode::ContainsOp => {
                let container = frame.pop()?;
                let item = frame.pop()?;
                let result = self.contains(&container, &item);
                container.drop_with_heap(self.heap);
                item.drop_with_heap(self.heap);
                frame.push(Value::Bool(result? != (arg == 1)));
            }

            // ============================================================
            // Subscripts & Attributes
            // ============================================================
            Opcode::BinarySubscr => {
                let key = frame.pop()?;
                let container = frame.pop()?;
                let result = self.get_item(&container, &key);
                container.drop_with_heap(self.heap);
                key.drop_with_heap(self.heap);
                frame.push(result?);
            }
            Opcode::StoreSubscr => {
                let key = frame.pop()?;
                let container = frame.pop()?;
                let value = frame.pop()?;
                let result = self.set_item(&container, key, value);
                container.drop_with_heap(self.heap);
                result?;
            }
            Opcode::DeleteSubscr => {
                let key = frame.pop()?;
                let container = frame.pop()?;
                let result = self.del_item(&container, key);
                container.drop_with_heap(self.heap);
                result?;
            }
            Opcode::LoadAttr => {
                let name = name_at(frame, index)?;
                let owner = frame.pop()?;
                let result = self.get_attr(&owner, self.interns.get_str(name));
                owner.drop_with_heap(self.heap);
                frame.push(result?);
            }
            Opcode::StoreAttr => {
                let name = name_at(frame, index)?;
                let owner = frame.pop()?;
                let value = frame.pop()?;
                let result = self.set_attr(&owner, self.interns.get_str(name), value);
                owner.drop_with_heap(self.heap);
                result?;
            }
            Opcode::DeleteAttr => {
                let name = name_at(frame, index)?;
                let owner = frame.pop()?;
                let result = self.del_attr(&owner, self.interns.get_str(name));
                owner.drop_with_heap(self.heap);
                result?;
            }

            // ============================================================
            // Container Builders
            // ============================================================
            Opcode::BuildTuple => {
                let items = frame.pop_n(index)?;
                frame.push(crate::types::allocate_tuple(self.heap, items)?);
            }
            Opcode::BuildList => {
                let items = frame.pop_n(index)?;
                frame.push(crate::types::allocate_list(self.heap, items)?);
            }
            Opcode::BuildMap => {
                let items = frame.pop_n(index * 2)?;
                let dict = self.build_map(items)?;
                frame.push(dict);
            }
            Opcode::BuildConstKeyMap => {
                let keys = frame.pop()?;
                let values = frame.pop_n(index)?;
                let dict = self.build_const_key_map(keys, values)?;
                frame.push(dict);
            }
            Opcode::BuildSlice => {
                let step = if arg == 3 { frame.pop()? } else { Value::None };
                let stop = frame.pop()?;
                let start = frame.pop()?;
                let slice = Slice { start, stop, step };
                frame.push(Value::Ref(self.heap.allocate(HeapData::Slice(slice))?));
            }
            Opcode::BuildString => {
                let parts = frame.pop_n(index)?;
                let joined = self.build_string(parts)?;
                frame.push(joined);
            }
            Opcode::FormatValue => {
                let spec = if arg & super::op::format_value::HAS_SPEC != 0 {
                    Some(frame.pop()?)
                } else {
                    None
                };
                let value = frame.pop()?;
                let formatted = self.format_value(value, arg & super::op::format_value::CONVERSION_MASK, spec)?;
                frame.push(formatted);
            }
            Opcode::ListAppend => {
                let item = frame.pop()?;
                let list = container_at(frame, index)?;
                self.list_append(list, item)?;
            }
            Opcode::ListExtend => {
                let iterable = frame.pop()?;
                let list = container_at(frame, index)?;
                self.list_extend(list, iterable)?;
            }
            Opcode::ListToTuple => {
                let list = frame.pop()?;
                let tuple = self.list_to_tuple(list)?;
                frame.push(tuple);
            }
            Opcode::MapAdd => {
                let value = frame.pop()?;
                let key = frame.pop()?;
                let dict = container_at(frame, index)?;
                self.map_add(dict, key, value)?;
            }
            Opcode::DictUpdate => {
                let source = frame.pop()?;
                let dict = container_at(frame, index)?;
                let result = self.dict_update_opcode(dict, &source);
                source.drop_with_heap(self.heap);
                result?;
            }
            Opcode::DictMerge => {
                let source = frame.pop()?;
                let dict = container_at(frame, index)?;
                // The callable sits two slots below the dict being built.
                let func = frame.peek(index + 2)?.clone_with_heap(self.heap);
                let result = self.dict_merge(dict, &source, &func);
                func.drop_with_heap(self.heap);
                source.drop_with_heap(self.heap);
                result?;
            }

            // ============================================================
            // Iteration & Unpacking
            // ============================================================
            Opcode::GetIter => {
                let value = frame.pop()?;
                frame.push(self.get_iter(value)?);
            }
            Opcode::ForIter => {
                let next = {
                    let iterator = frame.peek(1)?.clone_with_heap(self.heap);
                    let result = self.iter_step(&iterator);
                    iterator.drop_with_heap(self.heap);
                    result?
                };
                match next {
                    Some(item) => frame.push(item),
                    None => {
                        let iterator = frame.pop()?;
                        iterator.drop_with_heap(self.heap);
                        frame.next_instr += index;
                    }
                }
            }
            Opcode::UnpackSequence => {
                let seq = frame.pop()?;
                let items = self.unpack_sequence(seq, index)?;
                frame.stack.extend(items.into_iter().rev());
            }
            Opcode::UnpackEx => {
                let seq = frame.pop()?;
                let items = self.unpack_ex(seq, index & 0xff, index >> 8)?;
                frame.stack.extend(items.into_iter().rev());
            }

            // ============================================================
            // Control Flow
            // ============================================================
            Opcode::JumpForward => frame.next_instr += index,
            Opcode::JumpAbsolute => frame.next_instr = index,
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let value = frame.pop()?;
                let truth = self.is_true(&value);
                value.drop_with_heap(self.heap);
                if truth? == (op == Opcode::PopJumpIfTrue) {
                    frame.next_instr = index;
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let value = frame.peek(1)?.clone_with_heap(self.heap);
                let truth = self.is_true(&value);
                value.drop_with_heap(self.heap);
                if truth? == (op == Opcode::JumpIfTrueOrPop) {
                    frame.next_instr = index;
                } else {
                    let value = frame.pop()?;
                    value.drop_with_heap(self.heap);
                }
            }
            Opcode::ReturnValue => return Ok(Step::Return(frame.pop()?)),

            // ============================================================
            // Blocks & Exceptions
            // ============================================================
            Opcode::SetupFinally => self.push_block(frame, BlockKind::Finally, frame.next_instr + index)?,
            Opcode::SetupLoop => self.push_block(frame, BlockKind::Loop, frame.next_instr + index)?,
            Opcode::PopBlock => {
                let block = frame.pop_block()?;
                self.tracer.on_block_pop(block.kind, frame.blocks.len());
            }
            Opcode::BreakLoop => {
                let block = frame.pop_block()?;
                if block.kind != BlockKind::Loop {
                    return Err(ExcType::system_error("'break' outside loop"));
                }
                self.tracer.on_block_pop(block.kind, frame.blocks.len());
                frame.truncate_stack(block.level, self.heap);
                frame.next_instr = block.handler;
            }
            Opcode::PopExcept => self.pop_except(frame)?,
            Opcode::Reraise => return self.reraise(frame),
            Opcode::RaiseVarargs => return self.raise_varargs(frame, index),
            Opcode::JumpIfNotExcMatch => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let matched = self.exception_matches(&left, &right);
                left.drop_with_heap(self.heap);
                right.drop_with_heap(self.heap);
                if !matched? {
                    frame.next_instr = index;
                }
            }
            Opcode::SetupWith => self.setup_with(frame, frame.next_instr + index)?,
            Opcode::WithExceptStart => self.with_except_start(frame)?,

            // ============================================================
            // Calls & Functions
            // ============================================================
            Opcode::CallFunction => {
                let args = frame.pop_n(index)?;
                let callable = frame.pop()?;
                let called = self.start_call(callable, CallArgs::positional(args))?;
                return Ok(enter(frame, called));
            }
            Opcode::CallFunctionKw => {
                let kwnames = frame.pop()?;
                if !matches!(kwnames.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Tuple(_))) {
                    kwnames.drop_with_heap(self.heap);
                    return Err(RunError::internal("CALL_FUNCTION_KW: keyword names are not a tuple"));
                }
                let kwnames = kwnames.into_ref_id();
                let args = match frame.pop_n(index) {
                    Ok(args) => args,
                    Err(err) => {
                        kwnames.drop_with_heap(self.heap);
                        return Err(err);
                    }
                };
                let callable = frame.pop()?;
                let called = self.start_call(callable, CallArgs::with_offset(args, kwnames))?;
                return Ok(enter(frame, called));
            }
            Opcode::CallFunctionEx => {
                let kwargs = if arg & 1 == 1 { Some(frame.pop()?) } else { None };
                let callargs = frame.pop()?;
                let callable = frame.pop()?;
                let called = self.call_function_ex(callable, callargs, kwargs)?;
                return Ok(enter(frame, called));
            }
            Opcode::LoadMethod => {
                let name = name_at(frame, index)?;
                let owner = frame.pop()?;
                let (method, receiver) = self.load_method(owner, self.interns.get_str(name))?;
                frame.push(method);
                frame.push(receiver);
            }
            Opcode::CallMethod => {
                let args = frame.pop_n(index)?;
                let receiver = frame.pop()?;
                let method = frame.pop()?;
                let called = if method.is_undefined() {
                    // Plain attribute: `receiver` is the callable itself.
                    self.start_call(receiver, CallArgs::positional(args))?
                } else {
                    let mut call_args = CallArgs::with_offset(args, None);
                    call_args.prepend(receiver);
                    self.start_call(method, call_args)?
                };
                return Ok(enter(frame, called));
            }
            Opcode::MakeFunction => {
                let function = self.make_function(frame, arg)?;
                frame.push(function);
            }

            // ============================================================
            // Generators
            // ============================================================
            Opcode::YieldValue => return Ok(Step::Yield(frame.pop()?)),
            Opcode::GetYieldFromIter => {
                let value = frame.pop()?;
                frame.push(self.get_yield_from_iter(value)?);
            }
            Opcode::YieldFrom => return self.yield_from(frame),

            Opcode::ExtendedArg => return Err(RunError::internal("EXTENDED_ARG reached dispatch")),
        }
        Ok(Step::Next)
    }

    // ========================================================================
    // Namespaces
    // ========================================================================

    /// A new reference to `name` in the namespace dict `ns`.
    fn namespace_get(&self, ns: HeapId, name: &str) -> Option<Value> {
        match self.heap.get(ns) {
            HeapData::Dict(dict) => dict.get_str(name).map(|value| value.clone_with_heap(self.heap)),
            _ => None,
        }
    }

    fn namespace_set(&mut self, ns: HeapId, name: StringId, value: Value) -> RunResult<()> {
        let interns = self.interns;
        if let HeapData::Dict(dict) = self.heap.get_mut(ns) {
            let old = dict.set_name(name, interns.get_str(name), value);
            old.drop_with_heap(self.heap);
            Ok(())
        } else {
            value.drop_with_heap(self.heap);
            Err(RunError::internal("namespace is not a dict"))
        }
    }

    /// Removes `name`, returning false if it was not bound.
    fn namespace_delete(&mut self, ns: HeapId, name: &str) -> bool {
        let removed = match self.heap.get_mut(ns) {
            HeapData::Dict(dict) => dict.remove_str(name),
            _ => None,
        };
        let found = removed.is_some();
        removed.drop_with_heap(self.heap);
        found
    }

    /// `LOAD_NAME`: the locals mapping, then globals, then builtins.
    fn load_name(&self, frame: &Frame, name: StringId) -> RunResult<Value> {
        let text = self.interns.get_str(name);
        let Some(locals) = frame.locals else {
            return Err(ExcType::system_error(format!("no locals when loading '{text}'")));
        };
        self.namespace_get(locals, text)
            .or_else(|| self.namespace_get(frame.globals, text))
            .or_else(|| self.namespace_get(frame.builtins, text))
            .ok_or_else(|| ExcType::name_error(text))
    }

    fn load_const(&self, frame: &Frame, index: usize) -> RunResult<Value> {
        match self.heap.get(frame.code_id) {
            HeapData::Code(code) => code
                .consts
                .get(index)
                .map(|value| value.clone_with_heap(self.heap))
                .ok_or_else(|| RunError::internal("LOAD_CONST: constant index out of range")),
            _ => Err(RunError::internal("frame code is not a code object")),
        }
    }

    fn varname(&self, frame: &Frame, index: usize) -> &'a str {
        let interns = self.interns;
        frame
            .code
            .varnames
            .get(index)
            .map_or("<unknown>", |name| interns.get_str(*name))
    }

    fn load_deref(&mut self, frame: &Frame, index: usize) -> RunResult<Value> {
        let cell = cell_at(frame, index)?;
        self.tracer.on_cell_load(cell_slot(index), frame.cells.len());
        match self.heap.get(cell) {
            HeapData::Cell(Cell { value }) if !value.is_undefined() => Ok(value.clone_with_heap(self.heap)),
            _ => Err(self.unbound_cell_error(frame, index)),
        }
    }

    /// The error for reading an empty cell: a cell variable is an unbound local, a free
    /// variable belongs to the enclosing scope.
    fn unbound_cell_error(&self, frame: &Frame, index: usize) -> RunError {
        let name = self.interns.get_str(frame.code.cell_name(index));
        if index < frame.code.cellvars.len() {
            ExcType::unbound_local_error(name)
        } else {
            ExcType::free_var_unbound(name)
        }
    }

    fn push_block(&mut self, frame: &mut Frame, kind: BlockKind, handler: usize) -> RunResult<()> {
        frame.push_block(kind, handler, frame.stack.len())?;
        self.tracer.on_block_push(kind, frame.blocks.len());
        Ok(())
    }

    /// Returns a new reference to the builtins namespace.
    pub fn builtins(&self) -> HeapId {
        self.heap.inc_ref(self.builtins);
        self.builtins
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> ContainsHeap<T> for VM<'_, T, P, Tr> {
    fn heap_mut(&mut self) -> &mut Heap<T> {
        self.heap
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Fetches the next instruction, folding `EXTENDED_ARG` prefixes into its argument.
///
/// `lasti` is left on the first prefix, which is where a re-executed instruction starts.
/// Pushes a finished call's result, or asks the loop to enter the callee's frame.
fn enter(frame: &mut Frame, called: Called) -> Step {
    match called {
        Called::Value(value) => {
            frame.push(value);
            Step::Next
        }
        Called::Frame(callee) => Step::Call(callee),
    }
}

fn fetch(frame: &mut Frame) -> RunResult<(Opcode, u32)> {
    frame.lasti = frame.next_instr;
    let mut arg: u32 = 0;
    loop {
        let offset = frame.next_instr;
        let (Some(&byte), Some(&oparg)) = (frame.code.bytecode.get(offset), frame.code.bytecode.get(offset + 1)) else {
            return Err(RunError::internal("execution ran past the end of the bytecode"));
        };
        frame.next_instr += INSTRUCTION_SIZE;
        let op = Opcode::from_byte(byte).ok_or_else(|| ExcType::system_error(format!("unknown opcode {byte}")))?;
        arg = (arg << 8) | u32::from(oparg);
        if op != Opcode::ExtendedArg {
            return Ok((op, arg));
        }
    }
}

fn name_at(frame: &Frame, index: usize) -> RunResult<StringId> {
    frame
        .code
        .names
        .get(index)
        .copied()
        .ok_or_else(|| RunError::internal("name index out of range"))
}

fn cell_at(frame: &Frame, index: usize) -> RunResult<HeapId> {
    frame
        .cells
        .get(index)
        .copied()
        .ok_or_else(|| RunError::internal("cell index out of range"))
}

fn cell_slot(index: usize) -> u16 {
    u16::try_from(index).unwrap_or(u16::MAX)
}

/// Moves the top of the stack down `n - 1` slots, shifting the others up.
fn rotate(frame: &mut Frame, n: usize) -> RunResult<()> {
    let len = frame.stack.len();
    if len < n {
        return Err(RunError::internal("operand stack underflow"));
    }
    frame.stack[len - n..].rotate_right(1);
    Ok(())
}

/// The container `n` slots from the top that a building instruction appends to. The
/// stack keeps owning the reference.
fn container_at(frame: &Frame, n: usize) -> RunResult<HeapId> {
    frame
        .peek(n)?
        .ref_id()
        .ok_or_else(|| RunError::internal("container operand is not a heap object"))
}

