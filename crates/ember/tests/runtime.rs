//! Tests for the embedding surface: globals, host functions, printing, resource limits,
//! tracers, serialized code objects and heap accounting.

use std::time::Duration;

use ember::{
    CodeBuilder, CodeSpec, CollectStringPrint, ConstSpec, CoverageTracer, ExcType, Exception, LimitedTracker,
    NoLimitTracker, NoPrint, Object, Opcode, ProfilingTracer, RecordingTracer, ResourceLimits, Runtime, TraceEvent,
};
use pretty_assertions::assert_eq;

fn string(s: &str) -> ConstSpec {
    ConstSpec::Str(s.to_owned())
}

/// `while True: items = [1, 2]`
fn allocate_forever() -> CodeSpec {
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    b.bind(top)
        .load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(2))
        .emit_arg(Opcode::BuildList, 2)
        .emit_name(Opcode::StoreName, "items")
        .emit_jump(Opcode::JumpAbsolute, top);
    b.build().unwrap()
}

// =============================================================================
// 1. Globals
// =============================================================================

/// Values set from the host are visible to code, and code results come back as objects.
#[test]
fn set_and_get_globals() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    runtime
        .set_global("data", Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)]))
        .unwrap();

    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "len")
        .emit_name(Opcode::LoadName, "data")
        .emit_arg(Opcode::CallFunction, 1)
        .emit_name(Opcode::StoreName, "size")
        .load_const(ConstSpec::None)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::None);
    assert_eq!(runtime.get_global("size"), Some(Object::Int(3)));
    assert_eq!(runtime.get_global("missing"), None);
}

/// Output-only objects cannot be stored.
#[test]
fn set_global_rejects_repr_objects() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let result = runtime.set_global("x", Object::Repr("<object>".to_owned()));
    assert!(result.is_err(), "Repr is output only");
    assert_eq!(runtime.get_global("x"), None);
}

/// Values the host cannot rebuild come back as their repr.
#[test]
fn unconvertible_results_come_back_as_repr() {
    let mut f = CodeBuilder::new("f");
    f.load_const(ConstSpec::None).emit(Opcode::ReturnValue);
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Code(Box::new(f.build().unwrap())))
        .load_const(string("f"))
        .emit_arg(Opcode::MakeFunction, 0)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    match runtime.run(&code, &mut NoPrint).unwrap() {
        Object::Repr(text) => assert!(text.starts_with("<function f at 0x"), "{text}"),
        other => panic!("expected a repr, got {other:?}"),
    }
}

// =============================================================================
// 2. Host Functions
// =============================================================================

/// Host functions receive converted positional and keyword arguments.
#[test]
fn host_function_receives_arguments() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    runtime.register_function("scale", |args, kwargs| {
        let Some(Object::Int(value)) = args.first() else {
            return Err(Exception::new(ExcType::TypeError, Some("expected an int".to_owned())));
        };
        let factor = kwargs
            .iter()
            .find(|(name, _)| name == "by")
            .map_or(1, |(_, value)| match value {
                Object::Int(factor) => *factor,
                _ => 1,
            });
        Ok(Object::Int(value * factor))
    });

    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "scale")
        .load_const(ConstSpec::Int(7))
        .load_const(ConstSpec::Int(6))
        .load_const(ConstSpec::Tuple(vec![string("by")]))
        .emit_arg(Opcode::CallFunctionKw, 2)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Int(42));
}

/// An error returned by a host function is raised in the calling frame and can be caught.
#[test]
fn host_function_errors_are_catchable() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    runtime.register_function("fail", |_, _| {
        Err(Exception::new(ExcType::ValueError, Some("host refused".to_owned())))
    });

    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler)
        .emit_name(Opcode::LoadName, "fail")
        .emit_arg(Opcode::CallFunction, 0)
        .emit(Opcode::ReturnValue);
    b.bind(handler)
        .emit(Opcode::DupTop)
        .emit_name(Opcode::LoadName, "ValueError")
        .emit_jump(Opcode::JumpIfNotExcMatch, no_match)
        .emit(Opcode::PopTop)
        .emit_name(Opcode::StoreName, "e")
        .emit(Opcode::PopTop)
        .emit(Opcode::PopExcept)
        .emit_name(Opcode::LoadName, "e")
        .emit_name(Opcode::LoadAttr, "args")
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);
    let code = b.build().unwrap();

    assert_eq!(
        runtime.run(&code, &mut NoPrint).unwrap(),
        Object::Tuple(vec![Object::String("host refused".to_owned())])
    );
}

/// Host functions run without the execution token, and shadow builtins of the same name.
#[test]
fn host_function_runs_without_execution_token() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    runtime.register_function("len", |_, _| Ok(Object::Bool(ember::execution_token_held())));

    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "len")
        .load_const(string("abc"))
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Bool(false));
    assert!(!ember::execution_token_held(), "the token is released after the run");
}

// =============================================================================
// 3. Printing
// =============================================================================

/// `print` writes through the runtime's writer with `sep` and `end` honored.
#[test]
fn print_collects_output() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "print")
        .load_const(string("a"))
        .load_const(ConstSpec::Int(1))
        .emit_arg(Opcode::CallFunction, 2)
        .emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "print")
        .load_const(string("x"))
        .load_const(string("y"))
        .load_const(string("-"))
        .load_const(string("!\n"))
        .load_const(ConstSpec::Tuple(vec![string("sep"), string("end")]))
        .emit_arg(Opcode::CallFunctionKw, 4)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let mut out = CollectStringPrint::new();
    runtime.run(&code, &mut out).unwrap();
    assert_eq!(out.output(), "a 1\nx-y!\n");
}

// =============================================================================
// 4. Resource Limits
// =============================================================================

/// The operation limit stops an endless loop with `TimeoutError`, which handlers
/// cannot catch.
#[test]
fn operation_limit_is_uncatchable() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let top = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    b.bind(top).emit(Opcode::Nop).emit_jump(Opcode::JumpAbsolute, top);
    b.bind(handler)
        .emit(Opcode::PopTop)
        .emit(Opcode::PopTop)
        .emit(Opcode::PopTop)
        .emit(Opcode::PopExcept)
        .load_const(string("caught"))
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let limits = ResourceLimits::new().max_operations(1_000);
    let mut runtime = Runtime::new(LimitedTracker::new(limits)).unwrap();
    let exc = runtime.run(&code, &mut NoPrint).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::TimeoutError);
    assert_eq!(exc.message(), Some("operation limit exceeded: 1001 > 1000"));
    assert_eq!(exc.traceback().len(), 1);
    assert_eq!(runtime.tracker().operation_count(), 1_001);
}

/// The allocation limit raises `MemoryError`.
#[test]
fn allocation_limit_raises_memory_error() {
    let limits = ResourceLimits::new().max_allocations(100);
    let mut runtime = Runtime::new(LimitedTracker::new(limits)).unwrap();
    let exc = runtime.run(&allocate_forever(), &mut NoPrint).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::MemoryError);
    assert!(
        exc.message().is_some_and(|m| m.starts_with("allocation limit exceeded")),
        "{exc}"
    );
}

/// The time limit raises `TimeoutError`.
#[test]
fn duration_limit_raises_timeout_error() {
    let limits = ResourceLimits::new().max_duration(Duration::from_millis(20));
    let mut runtime = Runtime::new(LimitedTracker::new(limits)).unwrap();
    let exc = runtime.run(&allocate_forever(), &mut NoPrint).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::TimeoutError);
    assert!(runtime.tracker().elapsed() >= Duration::from_millis(20));
}

// =============================================================================
// 5. Tracers
// =============================================================================

/// `def f(): return 1` called once, for tracer tests.
fn call_once() -> CodeSpec {
    let mut f = CodeBuilder::new("f");
    f.flags(ember::CodeFlags::OPTIMIZED | ember::CodeFlags::NEWLOCALS)
        .load_const(ConstSpec::Int(1))
        .emit(Opcode::ReturnValue);
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Code(Box::new(f.build().unwrap())))
        .load_const(string("f"))
        .emit_arg(Opcode::MakeFunction, 0)
        .emit_arg(Opcode::CallFunction, 0)
        .emit(Opcode::ReturnValue);
    b.build().unwrap()
}

/// The recording tracer sees frames start and stop around the instructions they run.
#[test]
fn recording_tracer_sees_calls() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let mut tracer = RecordingTracer::new();
    runtime.run_traced(&call_once(), &mut NoPrint, &mut tracer).unwrap();

    let calls: Vec<(Option<&str>, usize)> = tracer
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Call { name, depth } => Some((name.as_deref(), *depth)),
            _ => None,
        })
        .collect();
    assert_eq!(calls, vec![(Some("<module>"), 1), (Some("f"), 2)]);
    assert_eq!(
        tracer.events().first(),
        Some(&TraceEvent::Call {
            name: Some("<module>".to_owned()),
            depth: 1
        })
    );
    assert_eq!(tracer.events().last(), Some(&TraceEvent::Return { depth: 0 }));
    assert!(tracer.events().contains(&TraceEvent::MakeFunction {
        cell_count: 0,
        defaults_count: 0
    }));
}

/// A limited recording tracer stops after the limit.
#[test]
fn recording_tracer_limit() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let mut tracer = RecordingTracer::with_limit(3);
    runtime.run_traced(&call_once(), &mut NoPrint, &mut tracer).unwrap();
    assert_eq!(tracer.event_count(), 3);
}

/// The profiling tracer counts instructions, calls and depth.
#[test]
fn profiling_tracer_report() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let mut profiler = ProfilingTracer::new();
    runtime.run_traced(&call_once(), &mut NoPrint, &mut profiler).unwrap();

    let report = profiler.report();
    assert_eq!(report.total_instructions, 7, "five module and two function instructions");
    assert_eq!(report.total_calls, 2);
    assert_eq!(report.max_depth, 2);
    assert_eq!(report.opcode_counts.first(), Some(&(Opcode::LoadConst, 3)));
    assert!(report.to_string().contains("Total instructions: 7"));
}

/// The coverage tracer records the offsets that ran.
#[test]
fn coverage_tracer_records_offsets() {
    let mut b = CodeBuilder::new("<module>");
    let skip = b.new_label();
    b.emit_jump(Opcode::JumpForward, skip)
        .load_const(ConstSpec::Int(1))
        .emit(Opcode::PopTop);
    b.bind(skip).load_const(ConstSpec::None).emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let mut coverage = CoverageTracer::new();
    runtime.run_traced(&code, &mut NoPrint, &mut coverage).unwrap();
    assert_eq!(coverage.coverage_count(), 3);
    assert!(!coverage.covered_offsets().contains(&2), "the skipped LOAD_CONST never ran");
}

// =============================================================================
// 6. Serialized Code Objects
// =============================================================================

/// A code object written as JSON with `(opcode, argument)` pairs runs as is.
#[test]
fn code_from_json() {
    let json = r#"{
        "name": "<module>",
        "consts": [{"int": 6}, {"int": 7}],
        "instructions": [
            ["LOAD_CONST", 0],
            ["LOAD_CONST", 1],
            ["BINARY_MULTIPLY", 0],
            ["RETURN_VALUE", 0]
        ]
    }"#;
    let code = CodeSpec::from_json(json).unwrap();
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Int(42));
}

/// The binary form survives a round trip, and the decoded code runs the same.
#[test]
fn code_binary_round_trip() {
    let code = call_once();
    let bytes = code.to_bytes().unwrap();
    let decoded = CodeSpec::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, code);

    let json = code.to_json().unwrap();
    assert_eq!(CodeSpec::from_json(&json).unwrap(), code);

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    assert_eq!(runtime.run(&decoded, &mut NoPrint).unwrap(), Object::Int(1));
}

/// Setting both encodings of the instruction stream is rejected at load.
#[test]
fn code_with_two_instruction_streams_is_rejected() {
    let code = CodeSpec {
        code: vec![Opcode::ReturnValue as u8, 0],
        instructions: vec![(Opcode::ReturnValue, 0)],
        ..CodeSpec::default()
    };
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let exc = runtime.run(&code, &mut NoPrint).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::SystemError);
}

// =============================================================================
// 7. Heap Accounting
// =============================================================================

/// Temporaries are released when the run ends; only what globals hold stays live.
#[test]
fn heap_releases_temporaries() {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();

    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "len")
        .load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(2))
        .emit_arg(Opcode::BuildList, 2)
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();
    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Int(2));
    let stats = runtime.heap_stats();
    assert_eq!(stats.objects_by_type.get("List"), None, "the list was freed");
    assert_eq!(stats.objects_by_type.get("Code"), None, "the module code was freed");

    runtime.set_global("kept", Object::List(Vec::new())).unwrap();
    let stats = runtime.heap_stats();
    assert_eq!(stats.objects_by_type.get("List"), Some(&1));
    assert_eq!(stats.pending_finalizers, 0);
}

/// A deeply nested list is released in one go without exhausting the native stack.
#[test]
fn deeply_nested_list_is_released() {
    // x = []
    // for _ in range(200_000): x = [x]
    // x = None
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    let done = b.new_label();
    b.emit_arg(Opcode::BuildList, 0)
        .emit_name(Opcode::StoreName, "x")
        .emit_name(Opcode::LoadName, "range")
        .load_const(ConstSpec::Int(200_000))
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::GetIter);
    b.bind(top)
        .emit_jump(Opcode::ForIter, done)
        .emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "x")
        .emit_arg(Opcode::BuildList, 1)
        .emit_name(Opcode::StoreName, "x")
        .emit_jump(Opcode::JumpAbsolute, top);
    b.bind(done)
        .load_const(ConstSpec::None)
        .emit_name(Opcode::StoreName, "x")
        .load_const(string("released"))
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::String("released".to_owned()));
    let stats = runtime.heap_stats();
    assert_eq!(stats.objects_by_type.get("List"), None, "every level was freed: {stats:?}");
}
