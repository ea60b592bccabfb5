//! Generator resumption, `yield from` delegation and finalization.
//!
//! A generator is resumed by moving its frame out of the heap object into
//! [`VM::eval_frame`]. While the frame runs the generator is `Running` with no frame, and
//! its saved exception state sits on top of the thread's exception stack so handlers
//! inside the generator see and restore their own state. The frame goes back into the
//! heap object when it yields and is released when it returns or raises.
//!
//! `YIELD_FROM` leaves the sub-iterator on top of the operand stack and rewinds the
//! program counter onto itself before yielding, so a suspended delegating generator is
//! recognizable from the instruction at its resume point.

use super::{Frame, FrameExit, Resume, Step, VM};
use crate::{
    args::CallArgs,
    bytecode::op::{INSTRUCTION_SIZE, Opcode},
    exception_private::{ExcType, RunError, RunResult},
    exception_public::Exception,
    heap::{DropWithHeap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{ExceptionObject, GeneratorState, Str, is_exception_class, is_subclass},
    value::Value,
};

/// What one resumption of a generator produced.
#[derive(Debug)]
pub(crate) enum GenResult {
    /// The generator suspended at a `yield`.
    Yield(Value),
    /// The generator finished, or was already finished, with this return value.
    Return(Value),
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    // ========================================================================
    // send / throw / close
    // ========================================================================

    /// `gen.send(value)`. The generator id is borrowed.
    pub(crate) fn gen_send(&mut self, id: HeapId, value: Value) -> RunResult<GenResult> {
        let state = match self.gen_state(id) {
            Ok(state) => state,
            Err(err) => {
                value.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        match state {
            GeneratorState::Running => {
                value.drop_with_heap(self.heap);
                Err(ExcType::generator_already_executing())
            }
            GeneratorState::Closed => {
                value.drop_with_heap(self.heap);
                Ok(GenResult::Return(Value::None))
            }
            GeneratorState::Created if !value.is_none() => {
                value.drop_with_heap(self.heap);
                Err(ExcType::generator_send_not_started())
            }
            GeneratorState::Created | GeneratorState::Suspended => self.resume(id, Resume::Send(value)),
        }
    }

    /// `gen.throw(typ, val, tb)`: raises inside the generator at its resume point, or in
    /// the sub-iterator it is delegating to.
    pub(crate) fn gen_throw(&mut self, id: HeapId, typ: Value, val: Value, tb: Value) -> RunResult<GenResult> {
        if let Some(sub) = self.delegate_of(id) {
            if self.given_exception_matches(&typ, ExcType::GeneratorExit) {
                self.set_gen_state(id, GeneratorState::Running);
                let closed = self.close_iter(&sub);
                self.set_gen_state(id, GeneratorState::Suspended);
                sub.drop_with_heap(self.heap);
                if let Err(err) = closed {
                    typ.drop_with_heap(self.heap);
                    val.drop_with_heap(self.heap);
                    tb.drop_with_heap(self.heap);
                    return self.resume(id, Resume::Throw(err));
                }
            } else {
                return self.throw_into_delegate(id, sub, typ, val, tb);
            }
        }
        let err = self.thrown_error(typ, val, tb)?;
        self.resume(id, Resume::Throw(err))
    }

    /// `gen.close()`: raises `GeneratorExit` at the resume point and expects the
    /// generator to finish.
    pub(crate) fn gen_close(&mut self, id: HeapId) -> RunResult<()> {
        match self.gen_state(id)? {
            GeneratorState::Closed => return Ok(()),
            GeneratorState::Running => return Err(ExcType::generator_already_executing()),
            GeneratorState::Created => {
                self.finish(id);
                return Ok(());
            }
            GeneratorState::Suspended => {}
        }
        let mut injected = ExcType::generator_exit();
        if let Some(sub) = self.delegate_of(id) {
            self.set_gen_state(id, GeneratorState::Running);
            let closed = self.close_iter(&sub);
            self.set_gen_state(id, GeneratorState::Suspended);
            sub.drop_with_heap(self.heap);
            if let Err(err) = closed {
                injected.drop_with_heap(self.heap);
                injected = err;
            }
        }
        match self.resume(id, Resume::Throw(injected)) {
            Ok(GenResult::Yield(value)) => {
                value.drop_with_heap(self.heap);
                Err(ExcType::generator_ignored_exit())
            }
            Ok(GenResult::Return(value)) => {
                value.drop_with_heap(self.heap);
                Ok(())
            }
            Err(err)
                if err.matches(ExcType::GeneratorExit, self.heap) || err.matches(ExcType::StopIteration, self.heap) =>
            {
                err.drop_with_heap(self.heap);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// The value a `send`/`throw` method call returns: the yielded value, or
    /// `StopIteration` carrying the return value.
    pub(crate) fn gen_result_value(&mut self, result: RunResult<GenResult>) -> RunResult<Value> {
        match result? {
            GenResult::Yield(value) => Ok(value),
            GenResult::Return(value) => Err(self.new_stop_iteration(value)),
        }
    }

    /// `gi_yieldfrom`: the sub-iterator a suspended generator delegates to, or `None`.
    pub(super) fn gen_yieldfrom(&self, id: HeapId) -> Value {
        self.delegate_of(id).unwrap_or(Value::None)
    }

    // ========================================================================
    // Resumption
    // ========================================================================

    /// Runs the generator's frame once, with its exception state swapped in.
    fn resume(&mut self, id: HeapId, resume: Resume) -> RunResult<GenResult> {
        let taken = match self.heap.get_mut(id) {
            HeapData::Generator(generator) => match generator.state {
                GeneratorState::Running => Err(ExcType::generator_already_executing()),
                GeneratorState::Closed => Ok(None),
                GeneratorState::Created | GeneratorState::Suspended => match generator.frame.take() {
                    Some(frame) => {
                        generator.state = GeneratorState::Running;
                        Ok(Some((frame, generator.exc_state.take())))
                    }
                    None => Err(RunError::internal("suspended generator has no frame")),
                },
            },
            _ => Err(RunError::internal("resume: not a generator")),
        };
        let (mut frame, exc_state) = match taken {
            Ok(Some(taken)) => taken,
            Ok(None) => {
                // Finished: a thrown exception propagates, anything else is exhaustion.
                return match resume {
                    Resume::Throw(err) => Err(err),
                    other => {
                        other.drop_with_heap(self.heap);
                        Ok(GenResult::Return(Value::None))
                    }
                };
            }
            Err(err) => {
                resume.drop_with_heap(self.heap);
                return Err(err);
            }
        };

        self.thread.exc_stack.push(exc_state);
        let result = self.eval_frame(&mut frame, resume);
        let exc_state = self.thread.exc_stack.pop().unwrap_or_default();

        match result {
            Ok(FrameExit::Yield(value)) => {
                if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                    generator.frame = Some(frame);
                    generator.exc_state = exc_state;
                    generator.state = GeneratorState::Suspended;
                    return Ok(GenResult::Yield(value));
                }
                exc_state.drop_with_heap(self.heap);
                frame.drop_with_heap(self.heap);
                value.drop_with_heap(self.heap);
                Err(RunError::internal("generator vanished while running"))
            }
            Ok(FrameExit::Return(value)) => {
                exc_state.drop_with_heap(self.heap);
                frame.drop_with_heap(self.heap);
                self.set_gen_state(id, GeneratorState::Closed);
                Ok(GenResult::Return(value))
            }
            Err(err) => {
                exc_state.drop_with_heap(self.heap);
                frame.drop_with_heap(self.heap);
                self.set_gen_state(id, GeneratorState::Closed);
                if err.matches(ExcType::StopIteration, self.heap) {
                    Err(self.stop_iteration_escaped(err))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Closes a generator that never started, releasing its frame.
    fn finish(&mut self, id: HeapId) {
        let frame = match self.heap.get_mut(id) {
            HeapData::Generator(generator) => {
                generator.state = GeneratorState::Closed;
                generator.frame.take()
            }
            _ => None,
        };
        if let Some(frame) = frame {
            frame.drop_with_heap(self.heap);
        }
    }

    fn gen_state(&self, id: HeapId) -> RunResult<GeneratorState> {
        match self.heap.get(id) {
            HeapData::Generator(generator) => Ok(generator.state),
            _ => Err(RunError::internal("expected a generator")),
        }
    }

    fn set_gen_state(&mut self, id: HeapId, state: GeneratorState) {
        if let HeapData::Generator(generator) = self.heap.get_mut(id) {
            generator.state = state;
        }
    }

    /// `RuntimeError: generator raised StopIteration`, caused by the escaping error.
    fn stop_iteration_escaped(&mut self, err: RunError) -> RunError {
        let stop_id = match self.exception_object(err) {
            Ok(id) => id,
            Err(err) => return err,
        };
        let message = self
            .heap
            .allocate_untracked(HeapData::Str(Str::from("generator raised StopIteration")));
        let mut exc = ExceptionObject::new(Value::from(ExcType::RuntimeError), vec![Value::Ref(message)]);
        self.heap.inc_ref(stop_id);
        exc.cause = Value::Ref(stop_id);
        exc.context = Value::Ref(stop_id);
        exc.suppress_context = true;
        RunError::Raised(self.heap.allocate_untracked(HeapData::Exception(exc)))
    }

    // ========================================================================
    // Delegation
    // ========================================================================

    /// A new reference to the sub-iterator of a generator suspended in `YIELD_FROM`.
    fn delegate_of(&self, id: HeapId) -> Option<Value> {
        let HeapData::Generator(generator) = self.heap.get(id) else {
            return None;
        };
        if generator.state != GeneratorState::Suspended {
            return None;
        }
        let frame = generator.frame.as_ref()?;
        if frame.code.bytecode.get(frame.next_instr) != Some(&(Opcode::YieldFrom as u8)) {
            return None;
        }
        frame.stack.last().map(|sub| sub.clone_with_heap(self.heap))
    }

    /// Forwards `throw` to the sub-iterator. When the sub-iterator stops, the outer
    /// generator continues after its `YIELD_FROM` with the result or the error.
    fn throw_into_delegate(
        &mut self,
        id: HeapId,
        sub: Value,
        typ: Value,
        val: Value,
        tb: Value,
    ) -> RunResult<GenResult> {
        let sub_generator = sub
            .ref_id()
            .filter(|sub_id| matches!(self.heap.get(*sub_id), HeapData::Generator(_)));
        let outcome = if let Some(sub_id) = sub_generator {
            self.set_gen_state(id, GeneratorState::Running);
            let result = self.gen_throw(sub_id, typ, val, tb);
            self.set_gen_state(id, GeneratorState::Suspended);
            result
        } else {
            let method = match self.get_attr(&sub, "throw") {
                Ok(method) => method,
                Err(err) if err.matches(ExcType::AttributeError, self.heap) => {
                    err.drop_with_heap(self.heap);
                    sub.drop_with_heap(self.heap);
                    let err = self.thrown_error(typ, val, tb)?;
                    return self.resume(id, Resume::Throw(err));
                }
                Err(err) => {
                    sub.drop_with_heap(self.heap);
                    typ.drop_with_heap(self.heap);
                    val.drop_with_heap(self.heap);
                    tb.drop_with_heap(self.heap);
                    return Err(err);
                }
            };
            let mut args = vec![typ];
            if !val.is_none() || !tb.is_none() {
                args.push(val);
            } else {
                val.drop_with_heap(self.heap);
            }
            if tb.is_none() {
                tb.drop_with_heap(self.heap);
            } else {
                args.push(tb);
            }
            self.set_gen_state(id, GeneratorState::Running);
            let result = self.call_value(method, CallArgs::positional(args)).map(GenResult::Yield);
            self.set_gen_state(id, GeneratorState::Suspended);
            result
        };
        sub.drop_with_heap(self.heap);

        let resume = match outcome {
            Ok(GenResult::Yield(value)) => return Ok(GenResult::Yield(value)),
            Ok(GenResult::Return(value)) => Resume::Send(value),
            Err(err) if err.matches(ExcType::StopIteration, self.heap) => Resume::Send(self.stop_iteration_value(err)),
            Err(err) => Resume::Throw(err),
        };
        self.leave_yield_from(id);
        self.resume(id, resume)
    }

    /// Pops the finished sub-iterator and moves the resume point past `YIELD_FROM`.
    fn leave_yield_from(&mut self, id: HeapId) {
        let sub = match self.heap.get_mut(id) {
            HeapData::Generator(generator) => generator.frame.as_mut().and_then(|frame| {
                frame.next_instr += INSTRUCTION_SIZE;
                frame.stack.pop()
            }),
            _ => None,
        };
        sub.drop_with_heap(self.heap);
    }

    /// Closes a sub-iterator: generators directly, other objects through a `close`
    /// method if they have one.
    fn close_iter(&mut self, sub: &Value) -> RunResult<()> {
        if let Some(sub_id) = sub.ref_id()
            && matches!(self.heap.get(sub_id), HeapData::Generator(_))
        {
            return self.gen_close(sub_id);
        }
        let method = match self.get_attr(sub, "close") {
            Ok(method) => method,
            Err(err) if err.matches(ExcType::AttributeError, self.heap) => {
                err.drop_with_heap(self.heap);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let result = self.call_value(method, CallArgs::default())?;
        result.drop_with_heap(self.heap);
        Ok(())
    }

    /// Normalizes the arguments of `throw` into the error to raise.
    fn thrown_error(&mut self, typ: Value, val: Value, tb: Value) -> RunResult<RunError> {
        let tb_valid =
            tb.is_none() || matches!(tb.ref_id().map(|tb_id| self.heap.get(tb_id)), Some(HeapData::Traceback(_)));
        if !tb_valid {
            typ.drop_with_heap(self.heap);
            val.drop_with_heap(self.heap);
            tb.drop_with_heap(self.heap);
            return Err(ExcType::type_error("throw() third argument must be a traceback object"));
        }
        let exc = if is_exception_class(&typ, self.heap) {
            let args = if val.is_none() {
                val.drop_with_heap(self.heap);
                Vec::new()
            } else if matches!(val.ref_id().map(|v| self.heap.get(v)), Some(HeapData::Tuple(_))) {
                let items = self.collect_iterable(val);
                match items {
                    Ok(items) => items,
                    Err(err) => {
                        typ.drop_with_heap(self.heap);
                        tb.drop_with_heap(self.heap);
                        return Err(err);
                    }
                }
            } else if self.is_exception_instance(&val) {
                // Already an instance of the class: use it as is.
                typ.drop_with_heap(self.heap);
                return Ok(self.attach_traceback(val, tb));
            } else {
                vec![val]
            };
            let instance = match self.call_value(typ, CallArgs::positional(args)) {
                Ok(instance) => instance,
                Err(err) => {
                    tb.drop_with_heap(self.heap);
                    return Err(err);
                }
            };
            if !self.is_exception_instance(&instance) {
                let msg = format!(
                    "calling exception class should have returned an instance of BaseException, not {}",
                    instance.type_name(self.heap)
                );
                instance.drop_with_heap(self.heap);
                tb.drop_with_heap(self.heap);
                return Err(ExcType::type_error(msg));
            }
            instance
        } else if self.is_exception_instance(&typ) {
            if !val.is_none() {
                typ.drop_with_heap(self.heap);
                val.drop_with_heap(self.heap);
                tb.drop_with_heap(self.heap);
                return Err(ExcType::type_error("instance exception may not have a separate value"));
            }
            typ
        } else {
            let msg = format!(
                "exceptions must be classes or instances deriving from BaseException, not {}",
                typ.type_name(self.heap)
            );
            typ.drop_with_heap(self.heap);
            val.drop_with_heap(self.heap);
            tb.drop_with_heap(self.heap);
            return Err(ExcType::type_error(msg));
        };
        Ok(self.attach_traceback(exc, tb))
    }

    /// Installs `tb` as the traceback of an exception instance unless it is `None`.
    fn attach_traceback(&mut self, exc: Value, tb: Value) -> RunError {
        let Some(exc_id) = exc.into_ref_id() else {
            tb.drop_with_heap(self.heap);
            return RunError::internal("thrown exception is not on the heap");
        };
        if tb.is_none() {
            return RunError::Raised(exc_id);
        }
        if let HeapData::Exception(exc) = self.heap.get_mut(exc_id) {
            let old = std::mem::replace(&mut exc.traceback, tb);
            old.drop_with_heap(self.heap);
        } else {
            tb.drop_with_heap(self.heap);
        }
        RunError::Raised(exc_id)
    }

    /// Whether a class or instance given to `throw` is `exc_type` or a subclass of it.
    fn given_exception_matches(&self, value: &Value, exc_type: ExcType) -> bool {
        if is_exception_class(value, self.heap) {
            return is_subclass(value, &Value::from(exc_type), self.heap);
        }
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Exception(exc)) => exc.is_instance_of(exc_type, self.heap),
            _ => false,
        }
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// `GET_YIELD_FROM_ITER`: generators delegate to themselves, anything else to its
    /// iterator.
    pub(super) fn get_yield_from_iter(&mut self, value: Value) -> RunResult<Value> {
        if let Some(id) = value.ref_id()
            && matches!(self.heap.get(id), HeapData::Generator(_))
        {
            return Ok(value);
        }
        self.get_iter(value)
    }

    /// `YIELD_FROM`: sends the value on top of the stack into the sub-iterator below it.
    ///
    /// When the sub-iterator yields, the frame yields the same value and rewinds onto this
    /// instruction so the next resumption delegates again. When it finishes, its return
    /// value replaces it on the stack.
    pub(super) fn yield_from(&mut self, frame: &mut Frame) -> RunResult<Step> {
        let value = frame.pop()?;
        let sub = match frame.peek(1) {
            Ok(sub) => sub.clone_with_heap(self.heap),
            Err(err) => {
                value.drop_with_heap(self.heap);
                return Err(err);
            }
        };
        let result = self.delegate_send(&sub, value);
        sub.drop_with_heap(self.heap);
        match result? {
            GenResult::Yield(yielded) => {
                frame.next_instr = frame.lasti;
                Ok(Step::Yield(yielded))
            }
            GenResult::Return(returned) => {
                let finished = frame.pop()?;
                finished.drop_with_heap(self.heap);
                frame.push(returned);
                Ok(Step::Next)
            }
        }
    }

    /// One delegated step: `next()` for `None`, `send()` otherwise.
    fn delegate_send(&mut self, sub: &Value, value: Value) -> RunResult<GenResult> {
        if let Some(sub_id) = sub.ref_id()
            && matches!(self.heap.get(sub_id), HeapData::Generator(_))
        {
            return self.gen_send(sub_id, value);
        }
        let step = if value.is_none() {
            value.drop_with_heap(self.heap);
            self.iter_next(sub).map(|next| next.map_or(GenResult::Return(Value::None), GenResult::Yield))
        } else {
            match self.get_attr(sub, "send") {
                Ok(method) => self.call_value(method, CallArgs::positional([value])).map(GenResult::Yield),
                Err(err) => {
                    value.drop_with_heap(self.heap);
                    Err(err)
                }
            }
        };
        match step {
            Err(err) if err.matches(ExcType::StopIteration, self.heap) => {
                Ok(GenResult::Return(self.stop_iteration_value(err)))
            }
            other => other,
        }
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Closes every generator whose last reference was released while suspended.
    ///
    /// Errors from `close()` have nowhere to go and are reported to the tracer as
    /// unraisable. The queue's reference is released afterwards, freeing the generator
    /// unless closing it stored it somewhere.
    pub(crate) fn run_finalizers(&mut self) {
        while let Some(id) = self.heap.pop_pending_finalizer() {
            let generator = Value::Ref(id);
            if let Err(err) = self.gen_close(id) {
                let object = generator.py_repr(self.heap, self.interns);
                let exc = Exception::from_run_error(err, self.heap, self.interns);
                self.tracer.on_unraisable(&object, &exc);
            }
            generator.drop_with_heap(self.heap);
        }
    }
}
