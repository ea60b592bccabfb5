//! Tests for generators: `send`, `throw`, `close`, `yield from` delegation, exception
//! state isolation and finalization of abandoned generators.

use ember::{
    CodeBuilder, CodeFlags, ConstSpec, ExcType, Label, NoLimitTracker, NoPrint, Object, Opcode,
    RecordingTracer, Runtime, TraceEvent,
};
use pretty_assertions::assert_eq;

fn runtime() -> Runtime {
    Runtime::new(NoLimitTracker).unwrap()
}

fn run_ok(b: CodeBuilder) -> Object {
    let code = b.build().unwrap();
    match runtime().run(&code, &mut NoPrint) {
        Ok(value) => value,
        Err(exc) => panic!("code raised:\n{exc}"),
    }
}

fn run_err(b: CodeBuilder) -> ember::Exception {
    let code = b.build().unwrap();
    match runtime().run(&code, &mut NoPrint) {
        Ok(value) => panic!("expected an exception, got {value:?}"),
        Err(exc) => exc,
    }
}

fn string(s: &str) -> ConstSpec {
    ConstSpec::Str(s.to_owned())
}

/// A generator function code object.
fn generator(name: &str, params: &[&str], body: impl FnOnce(&mut CodeBuilder)) -> ConstSpec {
    let mut b = CodeBuilder::new(name);
    b.params(params)
        .argcount(u32::try_from(params.len()).unwrap())
        .flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::GENERATOR);
    body(&mut b);
    ConstSpec::Code(Box::new(b.build().unwrap()))
}

fn def(b: &mut CodeBuilder, name: &str, code: ConstSpec) {
    b.load_const(code)
        .load_const(string(name))
        .emit_arg(Opcode::MakeFunction, 0)
        .emit_name(Opcode::StoreName, name);
}

/// Emits `<target> = <name>()`.
fn instantiate(b: &mut CodeBuilder, name: &str, target: &str) {
    b.emit_name(Opcode::LoadName, name)
        .emit_arg(Opcode::CallFunction, 0)
        .emit_name(Opcode::StoreName, target);
}

/// Emits `next(<name>)`, leaving the result on the stack.
fn next(b: &mut CodeBuilder, name: &str) {
    b.emit_name(Opcode::LoadName, "next")
        .emit_name(Opcode::LoadName, name)
        .emit_arg(Opcode::CallFunction, 1);
}

/// Emits `<name>.<method>(<args...>)` for arguments already described as constants.
fn call_method(b: &mut CodeBuilder, name: &str, method: &str, args: &[ConstSpec]) {
    b.emit_name(Opcode::LoadName, name).emit_name(Opcode::LoadMethod, method);
    for arg in args {
        b.load_const(arg.clone());
    }
    b.emit_arg(Opcode::CallMethod, u32::try_from(args.len()).unwrap());
}

fn pop_triple(b: &mut CodeBuilder) {
    b.emit(Opcode::PopTop).emit(Opcode::PopTop).emit(Opcode::PopTop);
}

/// Emits `except <class> as <target>:` followed by `POP_EXCEPT`, jumping to `no_match`
/// otherwise.
fn catch_into(b: &mut CodeBuilder, class: &str, target: &str, no_match: Label) {
    b.emit(Opcode::DupTop)
        .emit_name(Opcode::LoadName, class)
        .emit_jump(Opcode::JumpIfNotExcMatch, no_match)
        .emit(Opcode::PopTop)
        .emit_name(Opcode::StoreName, target)
        .emit(Opcode::PopTop)
        .emit(Opcode::PopExcept);
}

/// `def guarded(): try: yield 1 finally: log = 'closed'` with `log` global.
fn guarded() -> ConstSpec {
    generator("guarded", &[], |g| {
        let cleanup = g.new_label();
        g.emit_jump(Opcode::SetupFinally, cleanup)
            .load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit(Opcode::PopBlock)
            .load_const(string("finished"))
            .emit_name(Opcode::StoreGlobal, "log")
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
        g.bind(cleanup)
            .load_const(string("closed"))
            .emit_name(Opcode::StoreGlobal, "log")
            .emit(Opcode::Reraise);
    })
}

/// `def stubborn(): try: yield 1 except: yield 2`
fn stubborn() -> ConstSpec {
    generator("stubborn", &[], |g| {
        let handler = g.new_label();
        g.emit_jump(Opcode::SetupFinally, handler)
            .load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit(Opcode::PopBlock)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
        g.bind(handler);
        pop_triple(g);
        g.load_const(ConstSpec::Int(2))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit(Opcode::PopExcept)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
    })
}

/// `def count(n): i = 0; while i < n: yield i; i += 1`
fn count() -> ConstSpec {
    generator("count", &["n"], |g| {
        let top = g.new_label();
        let end = g.new_label();
        g.load_const(ConstSpec::Int(0)).emit_local(Opcode::StoreFast, "i");
        g.bind(top)
            .emit_local(Opcode::LoadFast, "i")
            .emit_local(Opcode::LoadFast, "n")
            .emit_arg(Opcode::CompareOp, 0)
            .emit_jump(Opcode::PopJumpIfFalse, end)
            .emit_local(Opcode::LoadFast, "i")
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit_local(Opcode::LoadFast, "i")
            .load_const(ConstSpec::Int(1))
            .emit(Opcode::InplaceAdd)
            .emit_local(Opcode::StoreFast, "i")
            .emit_jump(Opcode::JumpAbsolute, top);
        g.bind(end).load_const(ConstSpec::None).emit(Opcode::ReturnValue);
    })
}

// =============================================================================
// 1. send and next
// =============================================================================

/// Values sent in become the result of `yield`, and the return value rides on
/// `StopIteration.value`.
#[test]
fn send_values_and_return_value() {
    let echo = generator("echo", &[], |g| {
        g.load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit_local(Opcode::StoreFast, "x")
            .emit_local(Opcode::LoadFast, "x")
            .load_const(ConstSpec::Int(10))
            .emit(Opcode::BinaryMultiply)
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(string("done"))
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "echo", echo);
    instantiate(&mut b, "echo", "it");
    next(&mut b, "it");
    b.emit_name(Opcode::StoreName, "a");
    call_method(&mut b, "it", "send", &[ConstSpec::Int(4)]);
    b.emit_name(Opcode::StoreName, "b");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    call_method(&mut b, "it", "send", &[ConstSpec::None]);
    b.emit(Opcode::ReturnValue);
    b.bind(handler);
    catch_into(&mut b, "StopIteration", "stop", no_match);
    b.emit_name(Opcode::LoadName, "a")
        .emit_name(Opcode::LoadName, "b")
        .emit_name(Opcode::LoadName, "stop")
        .emit_name(Opcode::LoadAttr, "value")
        .emit_arg(Opcode::BuildTuple, 3)
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);

    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![Object::Int(1), Object::Int(40), Object::String("done".to_owned())])
    );
}

/// The first resumption must send `None`.
#[test]
fn send_non_none_to_unstarted_generator() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "count", count());
    b.emit_name(Opcode::LoadName, "count")
        .load_const(ConstSpec::Int(3))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_name(Opcode::StoreName, "it");
    call_method(&mut b, "it", "send", &[ConstSpec::Int(1)]);
    b.emit(Opcode::ReturnValue);

    assert_eq!(
        run_err(b).summary(),
        "TypeError: can't send non-None value to a just-started generator"
    );
}

/// `list()` and `for` both drain a generator.
#[test]
fn iterate_generator() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "count", count());
    let top = b.new_label();
    let done = b.new_label();
    b.load_const(ConstSpec::Int(0))
        .emit_name(Opcode::StoreName, "total")
        .emit_name(Opcode::LoadName, "count")
        .load_const(ConstSpec::Int(5))
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::GetIter);
    b.bind(top)
        .emit_jump(Opcode::ForIter, done)
        .emit_name(Opcode::LoadName, "total")
        .emit(Opcode::RotTwo)
        .emit(Opcode::InplaceAdd)
        .emit_name(Opcode::StoreName, "total")
        .emit_jump(Opcode::JumpAbsolute, top);
    b.bind(done)
        .emit_name(Opcode::LoadName, "list")
        .emit_name(Opcode::LoadName, "count")
        .load_const(ConstSpec::Int(3))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_arg(Opcode::CallFunction, 1)
        .emit_name(Opcode::LoadName, "total")
        .emit_arg(Opcode::BuildTuple, 2)
        .emit(Opcode::ReturnValue);

    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![
            Object::List(vec![Object::Int(0), Object::Int(1), Object::Int(2)]),
            Object::Int(10),
        ])
    );
}

/// An exhausted generator keeps raising a bare `StopIteration`.
#[test]
fn exhausted_generator_raises_stop_iteration() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "count", count());
    b.emit_name(Opcode::LoadName, "count")
        .load_const(ConstSpec::Int(0))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_name(Opcode::StoreName, "it");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    next(&mut b, "it");
    b.emit(Opcode::ReturnValue);
    b.bind(handler);
    catch_into(&mut b, "StopIteration", "first", no_match);
    next(&mut b, "it");
    b.emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);

    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::StopIteration);
    assert!(exc.args().is_empty(), "a generator returning None stops without a value");
    assert!(exc.context().is_none(), "the first StopIteration was handled and left");
}

/// Generator attributes report their name and running state.
#[test]
fn generator_attributes() {
    let peek = generator("peek", &[], |g| {
        g.emit_name(Opcode::LoadGlobal, "it")
            .emit_name(Opcode::LoadAttr, "gi_running")
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "peek", peek);
    instantiate(&mut b, "peek", "it");
    b.emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadAttr, "gi_frame")
        .load_const(ConstSpec::None)
        .emit_arg(Opcode::IsOp, 1);
    next(&mut b, "it");
    b.emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadAttr, "gi_running")
        .emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadAttr, "__name__")
        .emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadAttr, "gi_yieldfrom")
        .emit_arg(Opcode::BuildTuple, 5)
        .emit(Opcode::ReturnValue);

    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![
            Object::Bool(true),
            Object::Bool(true),
            Object::Bool(false),
            Object::String("peek".to_owned()),
            Object::None,
        ])
    );
}

/// A generator that resumes itself is already executing.
#[test]
fn reentrant_generator_is_rejected() {
    let selfish = generator("selfish", &[], |g| {
        g.emit_name(Opcode::LoadGlobal, "next")
            .emit_name(Opcode::LoadGlobal, "it")
            .emit_arg(Opcode::CallFunction, 1)
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "selfish", selfish);
    instantiate(&mut b, "selfish", "it");
    next(&mut b, "it");
    b.emit(Opcode::ReturnValue);

    assert_eq!(run_err(b).summary(), "ValueError: generator already executing");
}

/// Catching the "already executing" error inside the generator leaves it intact: it
/// yields, reports that it is not running, and resumes again.
#[test]
fn generator_survives_rejected_reentry() {
    // def selfish():
    //     try: next(it)
    //     except ValueError: pass
    //     yield 'recovered'
    //     yield 'again'
    let selfish = generator("selfish", &[], |g| {
        let handler = g.new_label();
        let no_match = g.new_label();
        let body = g.new_label();
        g.emit_jump(Opcode::SetupFinally, handler)
            .emit_name(Opcode::LoadGlobal, "next")
            .emit_name(Opcode::LoadGlobal, "it")
            .emit_arg(Opcode::CallFunction, 1)
            .emit(Opcode::PopTop)
            .emit(Opcode::PopBlock)
            .emit_jump(Opcode::JumpAbsolute, body);
        g.bind(handler)
            .emit(Opcode::DupTop)
            .emit_name(Opcode::LoadGlobal, "ValueError")
            .emit_jump(Opcode::JumpIfNotExcMatch, no_match);
        pop_triple(g);
        g.emit(Opcode::PopExcept);
        g.bind(body)
            .load_const(string("recovered"))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(string("again"))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
        g.bind(no_match).emit(Opcode::Reraise);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "selfish", selfish);
    instantiate(&mut b, "selfish", "it");
    next(&mut b, "it");
    b.emit_name(Opcode::LoadName, "it").emit_name(Opcode::LoadAttr, "gi_running");
    next(&mut b, "it");
    b.emit_arg(Opcode::BuildTuple, 3).emit(Opcode::ReturnValue);

    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![
            Object::String("recovered".to_owned()),
            Object::Bool(false),
            Object::String("again".to_owned()),
        ])
    );
}

/// `return V` surfaces as `StopIteration(V)` once; the next resumption of the finished
/// generator raises a bare `StopIteration`.
#[test]
fn return_value_is_reported_once() {
    let ret = generator("ret", &[], |g| {
        g.load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(string("v"))
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "ret", ret);
    instantiate(&mut b, "ret", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop);
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    next(&mut b, "it");
    b.emit(Opcode::ReturnValue);
    b.bind(handler);
    catch_into(&mut b, "StopIteration", "first", no_match);
    b.emit_name(Opcode::LoadName, "first")
        .emit_name(Opcode::LoadAttr, "value")
        .emit_name(Opcode::StoreName, "first_value");
    call_method(&mut b, "it", "send", &[ConstSpec::None]);
    b.emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);
    let code = b.build().unwrap();

    let mut runtime = runtime();
    let exc = runtime.run(&code, &mut NoPrint).unwrap_err();
    assert_eq!(runtime.get_global("first_value"), Some(Object::String("v".to_owned())));
    assert_eq!(exc.exc_type(), ExcType::StopIteration);
    assert!(exc.args().is_empty(), "the return value is not repeated: {exc}");
}

/// A `StopIteration` escaping a generator frame becomes a `RuntimeError` caused by it.
#[test]
fn stop_iteration_inside_generator_becomes_runtime_error() {
    let leaky = generator("leaky", &[], |g| {
        g.emit_name(Opcode::LoadGlobal, "StopIteration")
            .load_const(string("leaked"))
            .emit_arg(Opcode::CallFunction, 1)
            .emit_arg(Opcode::RaiseVarargs, 1)
            .load_const(ConstSpec::None)
            .emit(Opcode::YieldValue)
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "leaky", leaky);
    instantiate(&mut b, "leaky", "it");
    next(&mut b, "it");
    b.emit(Opcode::ReturnValue);

    let exc = run_err(b);
    assert_eq!(exc.summary(), "RuntimeError: generator raised StopIteration");
    assert_eq!(exc.cause().map(ember::Exception::summary), Some("StopIteration: leaked".to_owned()));
    assert!(exc.suppress_context());
}

// =============================================================================
// 2. close and throw
// =============================================================================

/// `close()` raises `GeneratorExit` at the `yield`, running the `finally` body.
#[test]
fn close_runs_finally() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    instantiate(&mut b, "guarded", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop);
    call_method(&mut b, "it", "close", &[]);
    b.emit(Opcode::PopTop);
    call_method(&mut b, "it", "close", &[]);
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "log")
        .emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadAttr, "gi_frame")
        .load_const(ConstSpec::None)
        .emit_arg(Opcode::IsOp, 0)
        .emit_arg(Opcode::BuildTuple, 2)
        .emit(Opcode::ReturnValue);

    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![Object::String("closed".to_owned()), Object::Bool(true)])
    );
}

/// Closing a generator that never started skips its body entirely.
#[test]
fn close_unstarted_generator() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    instantiate(&mut b, "guarded", "it");
    call_method(&mut b, "it", "close", &[]);
    b.emit(Opcode::PopTop);
    next(&mut b, "it");
    b.emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = runtime();
    let exc = runtime.run(&code, &mut NoPrint).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::StopIteration);
    assert_eq!(runtime.get_global("log"), None, "the finally body never ran");
}

/// Yielding while being closed is an error.
#[test]
fn yield_during_close_is_an_error() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "stubborn", stubborn());
    instantiate(&mut b, "stubborn", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop);
    call_method(&mut b, "it", "close", &[]);
    b.emit(Opcode::ReturnValue);

    assert_eq!(run_err(b).summary(), "RuntimeError: generator ignored GeneratorExit");
}

/// A thrown exception the generator catches lets it run on to the next `yield`.
#[test]
fn throw_caught_inside_generator() {
    let forgiving = generator("forgiving", &[], |g| {
        let handler = g.new_label();
        let no_match = g.new_label();
        g.emit_jump(Opcode::SetupFinally, handler)
            .load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit(Opcode::PopBlock)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
        g.bind(handler)
            .emit(Opcode::DupTop)
            .emit_name(Opcode::LoadGlobal, "ValueError")
            .emit_jump(Opcode::JumpIfNotExcMatch, no_match);
        pop_triple(g);
        g.load_const(string("handled"))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit(Opcode::PopExcept)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
        g.bind(no_match).emit(Opcode::Reraise);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "forgiving", forgiving);
    instantiate(&mut b, "forgiving", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadMethod, "throw")
        .emit_name(Opcode::LoadName, "ValueError")
        .emit_arg(Opcode::CallMethod, 1)
        .emit(Opcode::ReturnValue);

    assert_eq!(run_ok(b), Object::String("handled".to_owned()));
}

/// An uncaught thrown exception propagates with the generator frame in its traceback,
/// and leaves the generator finished.
#[test]
fn throw_uncaught_finishes_generator() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    instantiate(&mut b, "guarded", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadMethod, "throw")
        .emit_name(Opcode::LoadName, "KeyError")
        .load_const(string("boom"))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_arg(Opcode::CallMethod, 1)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = runtime();
    let exc = runtime.run(&code, &mut NoPrint).unwrap_err();
    assert_eq!(exc.summary(), "KeyError: 'boom'");
    let names: Vec<&str> = exc.traceback().iter().map(|frame| frame.name.as_str()).collect();
    assert_eq!(names, vec!["<module>", "guarded"]);
    assert_eq!(runtime.get_global("log"), Some(Object::String("closed".to_owned())));

    let mut again = CodeBuilder::new("<module>");
    next(&mut again, "it");
    again.emit(Opcode::ReturnValue);
    let again = again.build().unwrap();
    let exc = runtime.run(&again, &mut NoPrint).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::StopIteration, "the generator is finished");
}

/// `throw` validates its arguments before touching the generator.
#[test]
fn throw_rejects_non_exceptions() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    instantiate(&mut b, "guarded", "it");
    call_method(&mut b, "it", "throw", &[ConstSpec::Int(3)]);
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_err(b).summary(),
        "TypeError: exceptions must be classes or instances deriving from BaseException, not int"
    );

    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    instantiate(&mut b, "guarded", "it");
    b.emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadMethod, "throw")
        .emit_name(Opcode::LoadName, "ValueError")
        .load_const(ConstSpec::None)
        .load_const(ConstSpec::Int(3))
        .emit_arg(Opcode::CallMethod, 3)
        .emit(Opcode::ReturnValue);
    assert_eq!(
        run_err(b).summary(),
        "TypeError: throw() third argument must be a traceback object"
    );
}

// =============================================================================
// 3. yield from
// =============================================================================

/// `def inner(): yield 1; yield 2; return 'r'`
fn inner() -> ConstSpec {
    generator("inner", &[], |g| {
        g.load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(ConstSpec::Int(2))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(string("r"))
            .emit(Opcode::ReturnValue);
    })
}

/// `def outer(): r = yield from <source>(); yield r`
fn outer(source: &str) -> ConstSpec {
    let source = source.to_owned();
    generator("outer", &[], move |g| {
        g.emit_name(Opcode::LoadGlobal, &source)
            .emit_arg(Opcode::CallFunction, 0)
            .emit(Opcode::GetYieldFromIter)
            .load_const(ConstSpec::None)
            .emit(Opcode::YieldFrom)
            .emit_local(Opcode::StoreFast, "r")
            .emit_local(Opcode::LoadFast, "r")
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
    })
}

/// The delegating generator passes every inner value through, then receives the
/// inner return value.
#[test]
fn yield_from_passes_values_and_result() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "inner", inner());
    def(&mut b, "outer", outer("inner"));
    b.emit_name(Opcode::LoadName, "list")
        .emit_name(Opcode::LoadName, "outer")
        .emit_arg(Opcode::CallFunction, 0)
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::ReturnValue);

    assert_eq!(
        run_ok(b),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::String("r".to_owned())])
    );
}

/// `yield from` a tuple delegates to the tuple's iterator.
#[test]
fn yield_from_plain_iterable() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Tuple(vec![ConstSpec::Int(7), ConstSpec::Int(8)]))
        .emit_name(Opcode::StoreName, "pair");
    let relay = generator("relay", &[], |g| {
        g.emit_name(Opcode::LoadGlobal, "pair")
            .emit(Opcode::GetYieldFromIter)
            .load_const(ConstSpec::None)
            .emit(Opcode::YieldFrom)
            .emit(Opcode::ReturnValue);
    });
    def(&mut b, "relay", relay);
    b.emit_name(Opcode::LoadName, "list")
        .emit_name(Opcode::LoadName, "relay")
        .emit_arg(Opcode::CallFunction, 0)
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::ReturnValue);

    assert_eq!(run_ok(b), Object::List(vec![Object::Int(7), Object::Int(8)]));
}

/// `send` reaches the inner generator, and `gi_yieldfrom` shows the delegate while
/// suspended.
#[test]
fn send_through_yield_from() {
    let doubler = generator("doubler", &[], |g| {
        g.load_const(string("ready"))
            .emit(Opcode::YieldValue)
            .load_const(ConstSpec::Int(2))
            .emit(Opcode::BinaryMultiply)
            .emit(Opcode::ReturnValue);
    });
    let wrapper = generator("wrapper", &[], |g| {
        g.emit_name(Opcode::LoadGlobal, "doubler")
            .emit_arg(Opcode::CallFunction, 0)
            .emit(Opcode::GetYieldFromIter)
            .load_const(ConstSpec::None)
            .emit(Opcode::YieldFrom)
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "doubler", doubler);
    def(&mut b, "wrapper", wrapper);
    instantiate(&mut b, "wrapper", "it");
    next(&mut b, "it");
    b.emit_name(Opcode::StoreName, "first")
        .emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadAttr, "gi_yieldfrom")
        .emit_name(Opcode::LoadAttr, "__name__")
        .emit_name(Opcode::StoreName, "delegate");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    call_method(&mut b, "it", "send", &[ConstSpec::Int(21)]);
    b.emit(Opcode::ReturnValue);
    b.bind(handler);
    catch_into(&mut b, "StopIteration", "stop", no_match);
    b.emit_name(Opcode::LoadName, "first")
        .emit_name(Opcode::LoadName, "delegate")
        .emit_name(Opcode::LoadName, "stop")
        .emit_name(Opcode::LoadAttr, "value")
        .emit_arg(Opcode::BuildTuple, 3)
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);

    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![
            Object::String("ready".to_owned()),
            Object::String("doubler".to_owned()),
            Object::Int(42),
        ])
    );
}

/// `throw` on a delegating generator goes to the inner one; when the inner one
/// recovers and returns, the outer continues with that result.
#[test]
fn throw_is_forwarded_to_delegate() {
    let recovering = generator("recovering", &[], |g| {
        let handler = g.new_label();
        let no_match = g.new_label();
        g.emit_jump(Opcode::SetupFinally, handler)
            .load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit(Opcode::PopBlock)
            .load_const(ConstSpec::None)
            .emit(Opcode::ReturnValue);
        g.bind(handler)
            .emit(Opcode::DupTop)
            .emit_name(Opcode::LoadGlobal, "ValueError")
            .emit_jump(Opcode::JumpIfNotExcMatch, no_match);
        pop_triple(g);
        g.emit(Opcode::PopExcept)
            .load_const(string("recovered"))
            .emit(Opcode::ReturnValue);
        g.bind(no_match).emit(Opcode::Reraise);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "recovering", recovering);
    def(&mut b, "outer", outer("recovering"));
    instantiate(&mut b, "outer", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "it")
        .emit_name(Opcode::LoadMethod, "throw")
        .emit_name(Opcode::LoadName, "ValueError")
        .emit_arg(Opcode::CallMethod, 1)
        .emit(Opcode::ReturnValue);

    assert_eq!(run_ok(b), Object::String("recovered".to_owned()));
}

/// Closing a delegating generator closes the inner generator first.
#[test]
fn close_reaches_delegate() {
    let wrapper = generator("wrapper", &[], |g| {
        g.emit_name(Opcode::LoadGlobal, "guarded")
            .emit_arg(Opcode::CallFunction, 0)
            .emit(Opcode::GetYieldFromIter)
            .load_const(ConstSpec::None)
            .emit(Opcode::YieldFrom)
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    def(&mut b, "wrapper", wrapper);
    instantiate(&mut b, "wrapper", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop);
    call_method(&mut b, "it", "close", &[]);
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "log")
        .emit(Opcode::ReturnValue);

    assert_eq!(run_ok(b), Object::String("closed".to_owned()));
}

// =============================================================================
// 4. Exception State
// =============================================================================

/// `def holder(): try: raise KeyError('inside') except: yield 1; raise`
fn holder() -> ConstSpec {
    generator("holder", &[], |g| {
        let handler = g.new_label();
        g.emit_jump(Opcode::SetupFinally, handler)
            .emit_name(Opcode::LoadGlobal, "KeyError")
            .load_const(string("inside"))
            .emit_arg(Opcode::CallFunction, 1)
            .emit_arg(Opcode::RaiseVarargs, 1);
        g.bind(handler);
        pop_triple(g);
        g.load_const(ConstSpec::Int(1))
            .emit(Opcode::YieldValue)
            .emit(Opcode::PopTop)
            .emit_arg(Opcode::RaiseVarargs, 0);
    })
}

/// A generator suspended inside a handler keeps its exception to itself, and gets it
/// back when resumed.
#[test]
fn generator_exception_state_is_isolated() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "holder", holder());
    instantiate(&mut b, "holder", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop).emit_arg(Opcode::RaiseVarargs, 0);
    let code = b.build().unwrap();

    let mut runtime = runtime();
    let exc = runtime.run(&code, &mut NoPrint).unwrap_err();
    assert_eq!(
        exc.summary(),
        "RuntimeError: No active exception to reraise",
        "the caller does not see the generator's exception"
    );

    let mut resume = CodeBuilder::new("<module>");
    next(&mut resume, "it");
    resume.emit(Opcode::ReturnValue);
    let resume = resume.build().unwrap();
    let exc = runtime.run(&resume, &mut NoPrint).unwrap_err();
    assert_eq!(exc.summary(), "KeyError: 'inside'", "the generator re-raises its own exception");
}

/// A bare `raise` in a generator with no exception of its own re-raises the exception the
/// caller is handling.
#[test]
fn bare_raise_in_generator_sees_the_callers_exception() {
    let rethrow = generator("rethrow", &[], |g| {
        g.emit_arg(Opcode::RaiseVarargs, 0)
            .load_const(ConstSpec::None)
            .emit(Opcode::YieldValue)
            .emit(Opcode::ReturnValue);
    });
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "rethrow", rethrow);
    let handler = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler)
        .emit_name(Opcode::LoadName, "ValueError")
        .load_const(string("outer"))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_arg(Opcode::RaiseVarargs, 1);
    b.bind(handler);
    pop_triple(&mut b);
    instantiate(&mut b, "rethrow", "it");
    next(&mut b, "it");
    b.emit(Opcode::ReturnValue);

    assert_eq!(run_err(b).summary(), "ValueError: outer");
}

// =============================================================================
// 5. Finalization
// =============================================================================

/// Dropping the last reference to a suspended generator closes it at the next
/// instruction boundary.
#[test]
fn abandoned_generator_is_closed() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    instantiate(&mut b, "guarded", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::DeleteName, "it")
        .emit_name(Opcode::LoadName, "log")
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = runtime();
    let result = runtime.run(&code, &mut NoPrint).unwrap();
    assert_eq!(result, Object::String("closed".to_owned()));
    let stats = runtime.heap_stats();
    assert_eq!(stats.pending_finalizers, 0);
    assert_eq!(stats.objects_by_type.get("Generator").copied().unwrap_or(0), 0, "the generator was freed");
}

/// A finalizer that fails is reported as unraisable instead of raising.
#[test]
fn failing_finalizer_is_reported() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "stubborn", stubborn());
    instantiate(&mut b, "stubborn", "it");
    next(&mut b, "it");
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::DeleteName, "it")
        .load_const(string("still running"))
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = runtime();
    let mut tracer = RecordingTracer::new();
    let result = runtime.run_traced(&code, &mut NoPrint, &mut tracer).unwrap();
    assert_eq!(result, Object::String("still running".to_owned()));

    let reports: Vec<(&str, &str)> = tracer
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Unraisable { object, exception } => Some((object.as_str(), exception.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(reports.len(), 1, "one report: {reports:?}");
    assert!(reports[0].0.starts_with("<generator object stubborn at 0x"), "{}", reports[0].0);
    assert_eq!(reports[0].1, "RuntimeError: generator ignored GeneratorExit");
}

/// Finalization is skipped for generators that finished normally.
#[test]
fn finished_generator_needs_no_finalizer() {
    let mut b = CodeBuilder::new("<module>");
    def(&mut b, "guarded", guarded());
    b.emit_name(Opcode::LoadName, "list")
        .emit_name(Opcode::LoadName, "guarded")
        .emit_arg(Opcode::CallFunction, 0)
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "log")
        .emit(Opcode::ReturnValue);

    assert_eq!(run_ok(b), Object::String("finished".to_owned()));
}
