#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "opargs and indices are range checked at load")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts follow explicit range checks")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior matches int semantics")]
// first to include defer_drop macro
mod heap;

mod args;
mod builtins;
mod bytecode;
mod exception_private;
mod exception_public;
mod gil;
mod host;
mod intern;
mod io;
mod object;
mod resource;
mod run;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{BlockKind, BuilderError, CodeBuilder, CodeFlags, CodeSpec, ConstSpec, Label, Opcode},
    exception_private::ExcType,
    exception_public::{Exception, StackFrame},
    gil::execution_token_held,
    heap::HeapStats,
    host::HostFn,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::{DictPairs, InvalidInputError, Object},
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, DEFAULT_SWITCH_INTERVAL, LimitedTracker, MAX_DATA_RECURSION_DEPTH,
        NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    run::Runtime,
    tracer::{
        CoverageTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent,
        VmTracer,
    },
    types::{GeneratorState, Type},
};
