//! Execution tracing hooks.
//!
//! The eval loop is generic over a [`VmTracer`]; with [`NoopTracer`] every hook is an empty
//! inlined function and disappears after monomorphization, the same way
//! [`NoLimitTracker`](crate::resource::NoLimitTracker) removes resource checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op, the default |
//! | [`StderrTracer`] | Human-readable execution log on stderr |
//! | [`ProfilingTracer`] | Opcode counts, call depth, cell and block traffic |
//! | [`CoverageTracer`] | Which instruction offsets ran |
//! | [`RecordingTracer`] | Every event, in order |
//!
//! Tracers are also where the engine reports errors it cannot raise: a generator whose
//! `close()` fails during finalization is handed to [`VmTracer::on_unraisable`].
//!
//! ```ignore
//! let mut profiler = ProfilingTracer::new();
//! runtime.run_traced(&spec, &mut StdPrint, &mut profiler)?;
//! println!("{}", profiler.report());
//! ```

use std::collections::HashMap;

use crate::{BlockKind, Exception, bytecode::Opcode};

/// Event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// An instruction was dispatched.
    Instruction {
        /// Byte offset of the instruction, `EXTENDED_ARG` prefixes included.
        offset: usize,
        opcode: Opcode,
        /// Operand stack depth of the current frame before the instruction ran.
        stack_depth: usize,
    },
    /// A frame started or resumed evaluation.
    Call {
        /// The code object's qualified name.
        name: Option<String>,
        /// Number of frames being evaluated, this one included.
        depth: usize,
    },
    /// A frame stopped evaluating: it returned, raised or yielded.
    Return { depth: usize },
    /// A cell or free variable was read.
    CellLoad { slot: u16, cells_len: usize },
    /// A cell or free variable was written.
    CellStore { slot: u16, cells_len: usize },
    /// `MAKE_FUNCTION` created a function.
    MakeFunction { cell_count: usize, defaults_count: usize },
    /// A block was pushed onto the current frame's block stack.
    BlockPush { kind: BlockKind, depth: usize },
    /// A block was popped, normally or while unwinding.
    BlockPop { kind: BlockKind, depth: usize },
    /// A handler started; `depth` counts the handler blocks now active in the frame.
    ExceptionPush { depth: usize },
    /// `POP_EXCEPT` restored the previous exception state.
    ExceptionPop { depth: usize },
    /// A generator frame suspended at a `yield`.
    Yield { depth: usize },
    /// An exception could not be raised and was reported instead.
    Unraisable { object: String, exception: String },
}

/// Hooks called by the eval loop.
///
/// Every method has a no-op default, implementations override what they need.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction is dispatched. This is the hottest hook.
    ///
    /// # Arguments
    /// * `offset` - Byte offset of the instruction
    /// * `opcode` - The instruction about to run
    /// * `stack_depth` - Operand stack depth of the current frame
    /// * `frame_depth` - Number of frames being evaluated
    #[inline(always)]
    fn on_instruction(&mut self, _offset: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a frame starts or resumes evaluation, `depth` includes the new frame.
    #[inline(always)]
    fn on_call(&mut self, _name: Option<&str>, _depth: usize) {}

    /// Called when a frame stops evaluating, `depth` no longer includes it.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_cell_load(&mut self, _slot: u16, _cells_len: usize) {}

    #[inline(always)]
    fn on_cell_store(&mut self, _slot: u16, _cells_len: usize) {}

    /// Called when `MAKE_FUNCTION` creates a function.
    ///
    /// # Arguments
    /// * `cell_count` - Closure cells captured, 0 for plain functions
    /// * `defaults_count` - Positional default values
    #[inline(always)]
    fn on_make_function(&mut self, _cell_count: usize, _defaults_count: usize) {}

    /// Called after a block is pushed, `depth` is the block stack depth after the push.
    #[inline(always)]
    fn on_block_push(&mut self, _kind: BlockKind, _depth: usize) {}

    /// Called after a block is popped, `depth` is the block stack depth after the pop.
    #[inline(always)]
    fn on_block_pop(&mut self, _kind: BlockKind, _depth: usize) {}

    /// Called when unwinding enters a handler.
    #[inline(always)]
    fn on_exception_push(&mut self, _depth: usize) {}

    /// Called when `POP_EXCEPT` leaves a handler.
    #[inline(always)]
    fn on_exception_pop(&mut self, _depth: usize) {}

    /// Called when a generator frame suspends.
    #[inline(always)]
    fn on_yield(&mut self, _depth: usize) {}

    /// Reports an exception that had nowhere to propagate, such as a failing `close()` on a
    /// generator being finalized.
    ///
    /// The default writes the report to stderr like the unraisable hook of CPython.
    fn on_unraisable(&mut self, object: &str, exc: &Exception) {
        eprintln!("Exception ignored in: {object}\n{exc}");
    }
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing, apart from the default unraisable report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Writes a human-readable execution log to stderr.
///
/// ```text
/// [    0] LoadConst  stack=0  frames=1
///   >>> CALL f                    depth=2
/// [    0] LoadFast  stack=0  frames=2
///   ... BLOCK PUSH Finally depth=1
///   <<< RETURN              depth=1
/// ```
#[derive(Debug)]
pub struct StderrTracer {
    /// Instructions to log before going quiet, `None` for no limit.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: None,
            count: 0,
            stopped: false,
        }
    }

    /// Stops logging after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
            stopped: false,
        }
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, offset: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{offset:>5}] {opcode:?}  stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        if self.stopped {
            return;
        }
        let name = name.unwrap_or("<anonymous>");
        eprintln!("  >>> CALL {name:<20} depth={depth}");
    }

    fn on_return(&mut self, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  <<< RETURN              depth={depth}");
    }

    fn on_cell_load(&mut self, slot: u16, cells_len: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  ... CELL LOAD  slot={slot} of {cells_len}");
    }

    fn on_cell_store(&mut self, slot: u16, cells_len: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  ... CELL STORE slot={slot} of {cells_len}");
    }

    fn on_make_function(&mut self, cell_count: usize, defaults_count: usize) {
        if self.stopped {
            return;
        }
        if cell_count > 0 {
            eprintln!("  +++ MAKE CLOSURE  cells={cell_count} defaults={defaults_count}");
        } else {
            eprintln!("  +++ MAKE FUNCTION defaults={defaults_count}");
        }
    }

    fn on_block_push(&mut self, kind: BlockKind, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  ... BLOCK PUSH {kind:?} depth={depth}");
    }

    fn on_block_pop(&mut self, kind: BlockKind, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  ... BLOCK POP  {kind:?} depth={depth}");
    }

    fn on_yield(&mut self, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  <<< YIELD               depth={depth}");
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Collects execution statistics, read back with [`ProfilingTracer::report`].
#[derive(Debug)]
pub struct ProfilingTracer {
    opcode_counts: HashMap<Opcode, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
    total_cell_loads: u64,
    total_cell_stores: u64,
    total_handlers: u64,
    total_yields: u64,
    max_block_depth: usize,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug)]
pub struct ProfilingReport {
    /// Per-opcode execution counts, most frequent first.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    /// Deepest frame nesting seen.
    pub max_depth: usize,
    /// Frame evaluations started, generator resumptions included.
    pub total_calls: u64,
    pub total_cell_loads: u64,
    pub total_cell_stores: u64,
    /// Exception handlers entered.
    pub total_handlers: u64,
    pub total_yields: u64,
    /// Deepest block stack seen in any frame.
    pub max_block_depth: usize,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            opcode_counts: HashMap::new(),
            total_instructions: 0,
            max_depth: 0,
            total_calls: 0,
            total_cell_loads: 0,
            total_cell_stores: 0,
            total_handlers: 0,
            total_yields: 0,
            max_block_depth: 0,
        }
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| (a.0 as u8).cmp(&(b.0 as u8))));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
            total_cell_loads: self.total_cell_loads,
            total_cell_stores: self.total_cell_stores,
            total_handlers: self.total_handlers,
            total_yields: self.total_yields,
            max_block_depth: self.max_block_depth,
        }
    }
}

impl Default for ProfilingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _offset: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    #[inline]
    fn on_call(&mut self, _name: Option<&str>, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_cell_load(&mut self, _slot: u16, _cells_len: usize) {
        self.total_cell_loads += 1;
    }

    fn on_cell_store(&mut self, _slot: u16, _cells_len: usize) {
        self.total_cell_stores += 1;
    }

    fn on_block_push(&mut self, _kind: BlockKind, depth: usize) {
        self.max_block_depth = self.max_block_depth.max(depth);
    }

    fn on_exception_push(&mut self, _depth: usize) {
        self.total_handlers += 1;
    }

    fn on_yield(&mut self, _depth: usize) {
        self.total_yields += 1;
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f, "Max block depth:    {}", self.max_block_depth)?;
        writeln!(f, "Handlers entered:   {}", self.total_handlers)?;
        writeln!(f, "Yields:             {}", self.total_yields)?;
        writeln!(f, "Cell loads:         {}", self.total_cell_loads)?;
        writeln!(f, "Cell stores:        {}", self.total_cell_stores)?;
        writeln!(f)?;
        writeln!(f, "--- Opcode Frequency ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {opcode:<20?} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

// ============================================================================
// CoverageTracer
// ============================================================================

/// Records which instruction offsets were executed, across every code object.
#[derive(Debug)]
pub struct CoverageTracer {
    offsets: ahash::AHashSet<usize>,
}

impl CoverageTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            offsets: ahash::AHashSet::new(),
        }
    }

    #[must_use]
    pub fn covered_offsets(&self) -> &ahash::AHashSet<usize> {
        &self.offsets
    }

    #[must_use]
    pub fn coverage_count(&self) -> usize {
        self.offsets.len()
    }
}

impl Default for CoverageTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for CoverageTracer {
    #[inline]
    fn on_instruction(&mut self, offset: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        self.offsets.insert(offset);
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Records every event in order.
///
/// Allocates per event, so keep it to short runs or set a limit.
#[derive(Debug)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            limit: None,
        }
    }

    /// Stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_instruction(&mut self, offset: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        self.record(TraceEvent::Instruction {
            offset,
            opcode,
            stack_depth,
        });
    }

    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        self.record(TraceEvent::Call {
            name: name.map(String::from),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_cell_load(&mut self, slot: u16, cells_len: usize) {
        self.record(TraceEvent::CellLoad { slot, cells_len });
    }

    fn on_cell_store(&mut self, slot: u16, cells_len: usize) {
        self.record(TraceEvent::CellStore { slot, cells_len });
    }

    fn on_make_function(&mut self, cell_count: usize, defaults_count: usize) {
        self.record(TraceEvent::MakeFunction {
            cell_count,
            defaults_count,
        });
    }

    fn on_block_push(&mut self, kind: BlockKind, depth: usize) {
        self.record(TraceEvent::BlockPush { kind, depth });
    }

    fn on_block_pop(&mut self, kind: BlockKind, depth: usize) {
        self.record(TraceEvent::BlockPop { kind, depth });
    }

    fn on_exception_push(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPush { depth });
    }

    fn on_exception_pop(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPop { depth });
    }

    fn on_yield(&mut self, depth: usize) {
        self.record(TraceEvent::Yield { depth });
    }

    fn on_unraisable(&mut self, object: &str, exc: &Exception) {
        self.record(TraceEvent::Unraisable {
            object: object.to_owned(),
            exception: exc.summary(),
        });
    }
}
