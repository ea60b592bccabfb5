//! Exception helpers for the VM.
//!
//! Errors raised while an instruction runs travel up as `RunError`. `handle_exception`
//! turns them into heap exception objects, records the traceback entry for the frame and
//! unwinds the block stack until a `Finally` block takes over or the frame is empty.

use super::{Block, BlockKind, ExcInfo, Frame, Step, VM};
use crate::{
    args::CallArgs,
    builtins::Builtins,
    exception_private::{
        ExcType, RawStackFrame, RunError, RunResult, SimpleException, cause_must_derive_error, must_derive_error,
    },
    heap::{DropWithHeap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{ExceptionObject, Str, Traceback, is_exception_class, lookup_class_attr},
    value::{Value, class_name},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Routes an error to the innermost handler of `frame`.
    ///
    /// Returns `Ok` when a handler was entered and execution continues at its first
    /// instruction, otherwise the error to propagate to the caller with the frame's stack
    /// and blocks fully unwound.
    pub(super) fn handle_exception(&mut self, frame: &mut Frame, err: RunError, add_traceback: bool) -> RunResult<()> {
        let exc_id = match err {
            RunError::Internal(_) => {
                self.unwind_all(frame);
                return Err(err);
            }
            RunError::UncatchableExc(mut raise) => {
                raise.frames.push(RawStackFrame {
                    name: frame.code.name,
                    filename: frame.code.filename,
                    line: frame.line(),
                });
                self.unwind_all(frame);
                return Err(RunError::UncatchableExc(raise));
            }
            RunError::Exc(raise) => self.materialize(raise.exc),
            RunError::Raised(id) => id,
        };
        if add_traceback {
            self.add_traceback(frame, exc_id);
        }

        while let Some(block) = frame.blocks.pop() {
            self.tracer.on_block_pop(block.kind, frame.blocks.len());
            match block.kind {
                BlockKind::ExceptHandler => self.unwind_except_handler(frame, block),
                BlockKind::Loop => frame.truncate_stack(block.level, self.heap),
                BlockKind::Finally => {
                    frame.truncate_stack(block.level, self.heap);
                    self.enter_handler(frame, exc_id, block.handler);
                    return Ok(());
                }
            }
        }
        frame.truncate_stack(0, self.heap);
        Err(RunError::Raised(exc_id))
    }

    /// Pushes the handler block and both exception triples, then jumps to `handler`.
    ///
    /// Takes over the reference to `exc_id`.
    fn enter_handler(&mut self, frame: &mut Frame, exc_id: HeapId, handler: usize) {
        frame.blocks.push(Block {
            kind: BlockKind::ExceptHandler,
            handler: 0,
            level: frame.stack.len(),
        });
        self.tracer.on_block_push(BlockKind::ExceptHandler, frame.blocks.len());

        let old = self.thread.exc_info().take();
        frame.push(old.traceback);
        frame.push(old.value);
        frame.push(old.exc_type);

        let (class, traceback) = match self.heap.get(exc_id) {
            HeapData::Exception(exc) => (exc.class.clone_with_heap(self.heap), exc.traceback.clone_with_heap(self.heap)),
            _ => (Value::None, Value::None),
        };
        self.heap.inc_ref(exc_id);
        *self.thread.exc_info() = ExcInfo {
            exc_type: class.clone_with_heap(self.heap),
            value: Value::Ref(exc_id),
            traceback: traceback.clone_with_heap(self.heap),
        };
        frame.push(traceback);
        frame.push(Value::Ref(exc_id));
        frame.push(class);

        frame.next_instr = handler;
        self.tracer.on_exception_push(frame.handler_depth());
    }

    /// Leaves a handler block during unwinding: drops whatever the handler left on the
    /// stack and restores the exception state saved below it.
    fn unwind_except_handler(&mut self, frame: &mut Frame, block: Block) {
        frame.truncate_stack(block.level + 3, self.heap);
        self.restore_exc_info(frame);
        self.tracer.on_exception_pop(frame.handler_depth());
    }

    /// Pops a saved exception triple into the thread's exception state.
    fn restore_exc_info(&mut self, frame: &mut Frame) {
        let exc_type = frame.stack.pop().unwrap_or(Value::None);
        let value = frame.stack.pop().unwrap_or(Value::None);
        let traceback = frame.stack.pop().unwrap_or(Value::None);
        let old = std::mem::replace(
            self.thread.exc_info(),
            ExcInfo {
                exc_type,
                value,
                traceback,
            },
        );
        old.drop_with_heap(self.heap);
    }

    /// Pops every block and value, restoring exception state saved by open handlers.
    pub(super) fn unwind_all(&mut self, frame: &mut Frame) {
        while let Some(block) = frame.blocks.pop() {
            self.tracer.on_block_pop(block.kind, frame.blocks.len());
            if block.kind == BlockKind::ExceptHandler {
                self.unwind_except_handler(frame, block);
            }
        }
        frame.truncate_stack(0, self.heap);
    }

    /// Prepends a traceback entry for the frame's current instruction.
    fn add_traceback(&mut self, frame: &Frame, exc_id: HeapId) {
        let HeapData::Exception(exc) = self.heap.get_mut(exc_id) else {
            return;
        };
        let next = std::mem::replace(&mut exc.traceback, Value::None);
        let entry = Traceback {
            next,
            name: frame.code.name,
            filename: frame.code.filename,
            lineno: frame.line(),
            lasti: u32::try_from(frame.lasti).unwrap_or(u32::MAX),
        };
        let tb_id = self.heap.allocate_untracked(HeapData::Traceback(entry));
        if let HeapData::Exception(exc) = self.heap.get_mut(exc_id) {
            exc.traceback = Value::Ref(tb_id);
        }
    }

    /// Gives a builtin error its exception object.
    ///
    /// The allocation skips resource accounting: reporting `MemoryError` must not fail
    /// for lack of memory.
    fn materialize(&mut self, exc: SimpleException) -> HeapId {
        let exc_type = exc.exc_type();
        let args = match exc.into_arg() {
            Some(msg) => vec![Value::Ref(self.heap.allocate_untracked(HeapData::Str(Str::from(msg))))],
            None => Vec::new(),
        };
        let object = ExceptionObject::new(Value::Builtin(Builtins::ExcType(exc_type)), args);
        let id = self.heap.allocate_untracked(HeapData::Exception(object));
        self.chain_context(id);
        id
    }

    /// Sets `__context__` of a newly raised exception to the exception being handled.
    pub(super) fn chain_context(&mut self, exc_id: HeapId) {
        let context = match self.thread.topmost_exception() {
            Some(ExcInfo {
                value: Value::Ref(id), ..
            }) => *id,
            _ => return,
        };
        self.set_context(exc_id, context);
    }

    /// Links `context` as the context of `exc_id`, first breaking any context chain
    /// from `context` that leads back to `exc_id`.
    pub(super) fn set_context(&mut self, exc_id: HeapId, context: HeapId) {
        if context == exc_id {
            return;
        }
        let mut current = context;
        // Bounded walk: a chain that cycles without reaching `exc_id` is left alone.
        for _ in 0..self.heap.live_count() {
            let next = match self.heap.get(current) {
                HeapData::Exception(ExceptionObject {
                    context: Value::Ref(id), ..
                }) => *id,
                _ => break,
            };
            if next == exc_id {
                if let HeapData::Exception(exc) = self.heap.get_mut(current) {
                    let old = std::mem::replace(&mut exc.context, Value::None);
                    old.drop_with_heap(self.heap);
                }
                break;
            }
            current = next;
        }
        self.heap.inc_ref(context);
        if let HeapData::Exception(exc) = self.heap.get_mut(exc_id) {
            let old = std::mem::replace(&mut exc.context, Value::Ref(context));
            old.drop_with_heap(self.heap);
        } else {
            self.heap.dec_ref(context);
        }
    }

    /// The heap exception object behind a catchable error, materializing it if needed.
    /// Internal and uncatchable errors come back unchanged.
    pub(super) fn exception_object(&mut self, err: RunError) -> Result<HeapId, RunError> {
        match err {
            RunError::Exc(raise) => Ok(self.materialize(raise.exc)),
            RunError::Raised(id) => Ok(id),
            other => Err(other),
        }
    }

    /// Raises a freshly built exception object.
    pub(crate) fn new_exception(&mut self, exc: ExceptionObject) -> RunError {
        let id = self.heap.allocate_untracked(HeapData::Exception(exc));
        self.chain_context(id);
        RunError::Raised(id)
    }

    /// `KeyError(key)`, keeping the key object itself as the argument.
    pub(crate) fn key_error(&mut self, key: Value) -> RunError {
        self.new_exception(ExceptionObject::new(Value::from(ExcType::KeyError), vec![key]))
    }

    /// `StopIteration` carrying a return value; `None` gives a bare `StopIteration`.
    pub(crate) fn new_stop_iteration(&mut self, value: Value) -> RunError {
        let args = if value.is_none() { Vec::new() } else { vec![value] };
        self.new_exception(ExceptionObject::new(Value::from(ExcType::StopIteration), args))
    }

    /// The value a `StopIteration` carries, releasing the error.
    pub(super) fn stop_iteration_value(&mut self, err: RunError) -> Value {
        let value = match &err {
            RunError::Raised(id) => match self.heap.get(*id) {
                HeapData::Exception(exc) => exc.first_arg().map(|arg| arg.clone_with_heap(self.heap)),
                _ => None,
            },
            RunError::Exc(raise) => raise
                .exc
                .arg()
                .map(|msg| Value::Ref(self.heap.allocate_untracked(HeapData::Str(Str::from(msg.as_str()))))),
            _ => None,
        };
        err.drop_with_heap(self.heap);
        value.unwrap_or(Value::None)
    }

    /// Whether `value` is an exception instance.
    pub(super) fn is_exception_instance(&self, value: &Value) -> bool {
        matches!(value, Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Exception(_)))
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// `RAISE_VARARGS`: re-raise, `raise exc` or `raise exc from cause`.
    pub(super) fn raise_varargs(&mut self, frame: &mut Frame, argc: usize) -> RunResult<Step> {
        match argc {
            0 => {
                let exc = match self.thread.topmost_exception() {
                    Some(info) => info.value.clone_with_heap(self.heap),
                    None => return Err(ExcType::no_active_exception()),
                };
                match exc.into_ref_id() {
                    Some(id) => Ok(Step::Unwind(RunError::Raised(id))),
                    None => Err(ExcType::no_active_exception()),
                }
            }
            1 | 2 => {
                let cause = if argc == 2 { Some(frame.pop()?) } else { None };
                let exc = match frame.pop() {
                    Ok(exc) => exc,
                    Err(err) => {
                        cause.drop_with_heap(self.heap);
                        return Err(err);
                    }
                };
                let exc_id = match self.instantiate_exception(exc) {
                    Ok(id) => id,
                    Err(err) => {
                        cause.drop_with_heap(self.heap);
                        return Err(err);
                    }
                };
                if let Some(cause) = cause {
                    let cause = match self.exception_cause(cause) {
                        Ok(cause) => cause,
                        Err(err) => {
                            self.heap.dec_ref(exc_id);
                            return Err(err);
                        }
                    };
                    if let HeapData::Exception(exc) = self.heap.get_mut(exc_id) {
                        let old = std::mem::replace(&mut exc.cause, cause);
                        exc.suppress_context = true;
                        old.drop_with_heap(self.heap);
                    } else {
                        cause.drop_with_heap(self.heap);
                    }
                }
                self.chain_context(exc_id);
                Err(RunError::Raised(exc_id))
            }
            _ => Err(ExcType::system_error("bad RAISE_VARARGS oparg")),
        }
    }

    /// Turns the operand of `raise` into an exception object: classes are called with no
    /// arguments, instances are used as they are.
    fn instantiate_exception(&mut self, exc: Value) -> RunResult<HeapId> {
        if is_exception_class(&exc, self.heap) {
            let class_name = class_name(&exc, self.heap).into_owned();
            let instance = self.call_value(exc, CallArgs::positional(Vec::new()))?;
            if self.is_exception_instance(&instance) {
                return instance
                    .into_ref_id()
                    .ok_or_else(|| RunError::internal("exception is not on the heap"));
            }
            let msg = format!(
                "calling {class_name} should have returned an instance of BaseException, not {}",
                instance.type_name(self.heap)
            );
            instance.drop_with_heap(self.heap);
            return Err(ExcType::type_error(msg));
        }
        if self.is_exception_instance(&exc) {
            return exc
                .into_ref_id()
                .ok_or_else(|| RunError::internal("exception is not on the heap"));
        }
        exc.drop_with_heap(self.heap);
        Err(must_derive_error())
    }

    /// The `__cause__` for `raise ... from cause`.
    fn exception_cause(&mut self, cause: Value) -> RunResult<Value> {
        if cause.is_none() {
            return Ok(Value::None);
        }
        if is_exception_class(&cause, self.heap) {
            let instance = self.call_value(cause, CallArgs::positional(Vec::new()))?;
            if self.is_exception_instance(&instance) {
                return Ok(instance);
            }
            instance.drop_with_heap(self.heap);
            return Err(cause_must_derive_error());
        }
        if self.is_exception_instance(&cause) {
            return Ok(cause);
        }
        cause.drop_with_heap(self.heap);
        Err(cause_must_derive_error())
    }

    /// `POP_EXCEPT`: leaves a handler normally.
    pub(super) fn pop_except(&mut self, frame: &mut Frame) -> RunResult<()> {
        let block = frame.pop_block()?;
        if block.kind != BlockKind::ExceptHandler {
            return Err(ExcType::system_error("popped block is not an except handler"));
        }
        self.tracer.on_block_pop(block.kind, frame.blocks.len());
        self.restore_exc_info(frame);
        self.tracer.on_exception_pop(frame.handler_depth());
        Ok(())
    }

    /// `RERAISE`: raises the triple on top of the stack again with its saved traceback.
    pub(super) fn reraise(&mut self, frame: &mut Frame) -> RunResult<Step> {
        let exc_type = frame.pop()?;
        let value = frame.pop()?;
        let traceback = frame.pop()?;
        exc_type.drop_with_heap(self.heap);
        let Some(exc_id) = value.into_ref_id() else {
            traceback.drop_with_heap(self.heap);
            return Err(RunError::internal("RERAISE: no exception on the stack"));
        };
        if let HeapData::Exception(exc) = self.heap.get_mut(exc_id) {
            let old = std::mem::replace(&mut exc.traceback, traceback);
            old.drop_with_heap(self.heap);
        } else {
            traceback.drop_with_heap(self.heap);
        }
        Ok(Step::Unwind(RunError::Raised(exc_id)))
    }

    /// `JUMP_IF_NOT_EXC_MATCH` test: whether the raised class `left` is caught by the
    /// class or tuple of classes `right`.
    pub(super) fn exception_matches(&self, left: &Value, right: &Value) -> RunResult<bool> {
        const NOT_ALLOWED: &str = "catching classes that do not inherit from BaseException is not allowed";
        if let Value::Ref(id) = right
            && let HeapData::Tuple(tuple) = self.heap.get(*id)
        {
            let classes = tuple.as_slice();
            if !classes.iter().all(|class| is_exception_class(class, self.heap)) {
                return Err(ExcType::type_error(NOT_ALLOWED));
            }
            return Ok(classes
                .iter()
                .any(|class| crate::types::is_subclass(left, class, self.heap)));
        }
        if !is_exception_class(right, self.heap) {
            return Err(ExcType::type_error(NOT_ALLOWED));
        }
        Ok(crate::types::is_subclass(left, right, self.heap))
    }

    /// `SETUP_WITH`: replaces the context manager with its bound `__exit__`, protects
    /// the body with a `Finally` block and pushes the result of `__enter__`.
    pub(super) fn setup_with(&mut self, frame: &mut Frame, handler: usize) -> RunResult<()> {
        let manager = frame.pop()?;
        let enter = match self.lookup_special(&manager, "__enter__") {
            Ok(Some(enter)) => enter,
            Ok(None) => {
                manager.drop_with_heap(self.heap);
                return Err(SimpleException::new_msg(ExcType::AttributeError, "__enter__").into());
            }
            Err(err) => {
                manager.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        let exit = match self.lookup_special(&manager, "__exit__") {
            Ok(Some(exit)) => exit,
            other => {
                enter.drop_with_heap(self.heap);
                manager.drop_with_heap(self.heap);
                return Err(other.err().unwrap_or_else(|| {
                    SimpleException::new_msg(ExcType::AttributeError, "__exit__").into()
                }));
            }
        };
        manager.drop_with_heap(self.heap);
        frame.push(exit);
        let result = self.call_value(enter, CallArgs::positional(Vec::new()))?;
        if let Err(err) = self.push_block(frame, BlockKind::Finally, handler) {
            result.drop_with_heap(self.heap);
            return Err(err);
        }
        frame.push(result);
        Ok(())
    }

    /// `WITH_EXCEPT_START`: calls `__exit__(type, value, traceback)` for the exception
    /// being handled, leaving the stack below untouched.
    pub(super) fn with_except_start(&mut self, frame: &mut Frame) -> RunResult<()> {
        let exit = frame.peek(7)?.clone_with_heap(self.heap);
        let args = vec![
            frame.peek(1)?.clone_with_heap(self.heap),
            frame.peek(2)?.clone_with_heap(self.heap),
            frame.peek(3)?.clone_with_heap(self.heap),
        ];
        let result = self.call_value(exit, CallArgs::positional(args))?;
        frame.push(result);
        Ok(())
    }

    /// Looks a special method up on the type of `value`, bound to `value`.
    pub(super) fn lookup_special(&mut self, value: &Value, name: &str) -> RunResult<Option<Value>> {
        let Value::Ref(id) = value else {
            return Ok(None);
        };
        let class_id = match self.heap.get(*id) {
            HeapData::Instance(instance) => instance.class.ref_id(),
            _ => None,
        };
        let Some(attr) = class_id.and_then(|class_id| lookup_class_attr(class_id, name, self.heap)) else {
            return Ok(None);
        };
        let attr = attr.clone_with_heap(self.heap);
        self.bind_class_attr(attr, value).map(Some)
    }
}
