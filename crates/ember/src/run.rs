//! Public interface for running code objects.

use crate::{
    Exception,
    builtins::create_builtins,
    bytecode::{
        CodeSpec, load_code,
        vm::{FrameExit, Resume, ThreadState, VM},
    },
    exception_private::{RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId, HeapStats},
    host::HostFunctions,
    intern::Interns,
    io::PrintWriter,
    object::{InvalidInputError, Object},
    resource::{NoLimitTracker, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
    types::Dict,
    value::Value,
};

/// An interpreter instance: a heap, a module namespace and the builtins.
///
/// Globals persist across [`run`](Self::run) calls, so a sequence of code objects can
/// build on each other the way statements typed into a REPL do.
///
/// # Example
/// ```
/// use ember::{CodeBuilder, ConstSpec, NoLimitTracker, Object, Opcode, Runtime, StdPrint};
///
/// let mut code = CodeBuilder::new("<module>");
/// code.load_const(ConstSpec::Int(2))
///     .load_const(ConstSpec::Int(3))
///     .emit(Opcode::BinaryAdd)
///     .emit(Opcode::ReturnValue);
/// let code = code.build().unwrap();
///
/// let mut runtime = Runtime::new(NoLimitTracker).unwrap();
/// assert_eq!(runtime.run(&code, &mut StdPrint).unwrap(), Object::Int(5));
/// ```
#[derive(Debug)]
pub struct Runtime<T: ResourceTracker = NoLimitTracker> {
    heap: Heap<T>,
    interns: Interns,
    host: HostFunctions,
    thread: ThreadState,
    builtins: HeapId,
    globals: HeapId,
}

impl<T: ResourceTracker> Runtime<T> {
    /// Creates a runtime with an empty `__main__` namespace.
    ///
    /// # Errors
    /// Returns `MemoryError` if the tracker refuses the initial allocations.
    pub fn new(tracker: T) -> Result<Self, Exception> {
        let mut heap = Heap::new(tracker);
        let mut interns = Interns::new();
        let builtins = create_builtins(&mut heap, &mut interns).map_err(resource_exception)?;
        let mut globals = Dict::new();
        globals.set_name(interns.intern("__name__"), "__name__", Value::InternString(interns.intern("__main__")));
        let globals = match heap.allocate(HeapData::Dict(globals)) {
            Ok(id) => id,
            Err(err) => {
                heap.dec_ref(builtins);
                return Err(resource_exception(err));
            }
        };
        Ok(Self {
            heap,
            interns,
            host: HostFunctions::default(),
            thread: ThreadState::new(),
            builtins,
            globals,
        })
    }

    /// Makes `function` callable from code under `name`, shadowing any builtin of that name.
    ///
    /// The function runs without the execution token, so other runtimes keep going while
    /// it blocks.
    pub fn register_function(
        &mut self,
        name: &str,
        function: impl FnMut(&[Object], &[(String, Object)]) -> Result<Object, Exception> + Send + 'static,
    ) -> &mut Self {
        let id = self.interns.intern(name);
        self.host.insert(id, Box::new(function));
        if let HeapData::Dict(dict) = self.heap.get_mut(self.builtins) {
            let old = dict.set_name(id, name, Value::HostFunction(id));
            old.drop_with_heap(&mut self.heap);
        }
        self
    }

    /// Runs a module-level code object in the runtime's namespace, printing through `print`.
    ///
    /// Returns the value the code returns, `None` for ordinary module code.
    ///
    /// # Errors
    /// Returns the uncaught exception, or `SystemError` if the code object is malformed.
    pub fn run(&mut self, code: &CodeSpec, print: &mut impl PrintWriter) -> Result<Object, Exception> {
        self.run_traced(code, print, &mut NoopTracer)
    }

    /// [`run`](Self::run) with a tracer observing execution.
    ///
    /// # Errors
    /// Same as [`run`](Self::run).
    pub fn run_traced(
        &mut self,
        code: &CodeSpec,
        print: &mut impl PrintWriter,
        tracer: &mut impl VmTracer,
    ) -> Result<Object, Exception> {
        let code_id = match load_code(code, &mut self.heap, &mut self.interns) {
            Ok(id) => id,
            Err(err) => return Err(Exception::from_run_error(err, &mut self.heap, &self.interns)),
        };
        let mut vm = VM::new(
            &mut self.heap,
            &self.interns,
            print,
            tracer,
            &mut self.host,
            &mut self.thread,
            self.builtins,
        );
        let result = run_module(&mut vm, code_id, self.globals);
        vm.run_finalizers();
        drop(vm);
        self.heap.dec_ref(code_id);
        self.thread.clear(&mut self.heap);
        match result {
            Ok(value) => Ok(Object::new(value, &mut self.heap, &self.interns)),
            Err(err) => Err(Exception::from_run_error(err, &mut self.heap, &self.interns)),
        }
    }

    /// A copy of the global `name`, if it is bound.
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Object> {
        match self.heap.get(self.globals) {
            HeapData::Dict(dict) => dict
                .get_str(name)
                .map(|value| Object::from_value(value, &self.heap, &self.interns)),
            _ => None,
        }
    }

    /// Binds the global `name` to a copy of `value`.
    ///
    /// # Errors
    /// Returns an error for output-only objects such as `Object::Repr`, or when the
    /// tracker refuses the allocation.
    pub fn set_global(&mut self, name: &str, value: Object) -> Result<(), InvalidInputError> {
        let value = value.to_value(&mut self.heap, &self.interns)?;
        let id = self.interns.intern(name);
        if let HeapData::Dict(dict) = self.heap.get_mut(self.globals) {
            let old = dict.set_name(id, name, value);
            old.drop_with_heap(&mut self.heap);
        } else {
            value.drop_with_heap(&mut self.heap);
        }
        Ok(())
    }

    /// A snapshot of the heap, for tests and leak checks.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        self.heap.tracker()
    }

    /// The reference count of the object bound to the global `name`, `None` for unbound
    /// names and immediates.
    #[cfg(feature = "ref-count-return")]
    #[must_use]
    pub fn refcount(&self, name: &str) -> Option<usize> {
        match self.heap.get(self.globals) {
            HeapData::Dict(dict) => dict
                .get_str(name)
                .and_then(Value::ref_id)
                .map(|id| self.heap.get_refcount(id)),
            _ => None,
        }
    }
}

/// Evaluates the module code in `globals` to completion.
fn run_module<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    code_id: HeapId,
    globals: HeapId,
) -> RunResult<Value> {
    let mut frame = vm.module_frame(code_id, globals)?;
    let result = vm.eval_frame(&mut frame, Resume::Start);
    frame.drop_with_heap(vm.heap);
    match result? {
        FrameExit::Return(value) => Ok(value),
        FrameExit::Yield(value) => {
            value.drop_with_heap(vm.heap);
            Err(RunError::internal("module code yielded"))
        }
    }
}

fn resource_exception(err: crate::resource::ResourceError) -> Exception {
    let exc = err.into_exception();
    Exception::new(exc.exc_type(), exc.into_arg())
}
