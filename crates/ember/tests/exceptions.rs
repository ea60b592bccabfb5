//! Tests for raising and handling exceptions: handler blocks, `finally`, re-raise,
//! chaining, user exception classes and the `with` statement.
//!
//! Handlers are laid out the way a compiler emits them: `SETUP_FINALLY` protects the
//! body, and the handler receives the exception triple on the stack.

use ember::{CodeBuilder, CodeFlags, CodeSpec, ConstSpec, ExcType, Label, NoLimitTracker, NoPrint, Object, Opcode, Runtime};
use pretty_assertions::assert_eq;

fn run(code: &CodeSpec) -> (Runtime, Result<Object, ember::Exception>) {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let result = runtime.run(code, &mut NoPrint);
    (runtime, result)
}

fn run_ok(b: CodeBuilder) -> Object {
    let code = b.build().unwrap();
    match run(&code).1 {
        Ok(value) => value,
        Err(exc) => panic!("code raised:\n{exc}"),
    }
}

fn run_err(b: CodeBuilder) -> ember::Exception {
    let code = b.build().unwrap();
    match run(&code).1 {
        Ok(value) => panic!("expected an exception, got {value:?}"),
        Err(exc) => exc,
    }
}

fn string(s: &str) -> ConstSpec {
    ConstSpec::Str(s.to_owned())
}

/// Emits `raise <class>(<message>)`.
fn raise_new(b: &mut CodeBuilder, class: &str, message: &str) {
    b.emit_name(Opcode::LoadName, class)
        .load_const(string(message))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_arg(Opcode::RaiseVarargs, 1);
}

/// Emits the head of `except <class>:`, jumping to `no_match` when the class does not
/// match. Leaves the triple on the stack.
fn except_match(b: &mut CodeBuilder, class: &str, no_match: Label) {
    b.emit(Opcode::DupTop)
        .emit_name(Opcode::LoadName, class)
        .emit_jump(Opcode::JumpIfNotExcMatch, no_match);
}

fn pop_triple(b: &mut CodeBuilder) {
    b.emit(Opcode::PopTop).emit(Opcode::PopTop).emit(Opcode::PopTop);
}

/// A method body: `OPTIMIZED | NEWLOCALS` with every parameter positional.
fn method(name: &str, params: &[&str], body: impl FnOnce(&mut CodeBuilder)) -> ConstSpec {
    let mut b = CodeBuilder::new(name);
    b.params(params)
        .argcount(u32::try_from(params.len()).unwrap())
        .flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    body(&mut b);
    ConstSpec::Code(Box::new(b.build().unwrap()))
}

/// Emits `class <name>(<bases>): <methods>` and stores the class under `name`.
fn class(b: &mut CodeBuilder, name: &str, bases: &[&str], methods: Vec<(&str, ConstSpec)>) {
    let mut body = CodeBuilder::new(name);
    for (method_name, code) in methods {
        body.load_const(code)
            .load_const(string(&format!("{name}.{method_name}")))
            .emit_arg(Opcode::MakeFunction, 0)
            .emit_name(Opcode::StoreName, method_name);
    }
    body.load_const(ConstSpec::None).emit(Opcode::ReturnValue);
    let body = ConstSpec::Code(Box::new(body.build().unwrap()));

    b.emit(Opcode::LoadBuildClass)
        .load_const(body)
        .load_const(string(name))
        .emit_arg(Opcode::MakeFunction, 0)
        .load_const(string(name));
    for base in bases {
        b.emit_name(Opcode::LoadName, base);
    }
    b.emit_arg(Opcode::CallFunction, 2 + u32::try_from(bases.len()).unwrap())
        .emit_name(Opcode::StoreName, name);
}

// =============================================================================
// 1. try / except
// =============================================================================

/// `except ValueError as e` binds the instance, and its `args` hold the message.
#[test]
fn except_as_binds_the_exception() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "ValueError", "bad");
    b.emit(Opcode::PopBlock)
        .load_const(ConstSpec::None)
        .emit(Opcode::ReturnValue);
    b.bind(handler);
    except_match(&mut b, "ValueError", no_match);
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::StoreName, "e")
        .emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "e")
        .emit_name(Opcode::LoadAttr, "args")
        .emit_name(Opcode::StoreName, "result")
        .emit(Opcode::PopExcept)
        .emit_name(Opcode::LoadName, "result")
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);

    assert_eq!(run_ok(b), Object::Tuple(vec![Object::String("bad".to_owned())]));
}

/// An exception no clause matches falls through `RERAISE` with its original traceback.
#[test]
fn unmatched_exception_is_reraised() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.line(1).emit_jump(Opcode::SetupFinally, handler);
    b.line(2);
    raise_new(&mut b, "KeyError", "k");
    b.emit(Opcode::PopBlock)
        .load_const(ConstSpec::None)
        .emit(Opcode::ReturnValue);
    b.line(3).bind(handler);
    except_match(&mut b, "ValueError", no_match);
    pop_triple(&mut b);
    b.emit(Opcode::PopExcept)
        .load_const(ConstSpec::None)
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);

    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::KeyError);
    assert_eq!(exc.message(), Some("'k'"), "KeyError shows the repr of its key");
    let lines: Vec<u32> = exc.traceback().iter().map(|frame| frame.line).collect();
    assert_eq!(lines, vec![2], "the traceback points at the raise, not the reraise");
}

/// A tuple of classes matches any of its members, including through the base chain.
#[test]
fn except_tuple_matches_subclasses() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler)
        .load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(0))
        .emit(Opcode::BinaryModulo)
        .emit(Opcode::ReturnValue);
    b.bind(handler)
        .emit(Opcode::DupTop)
        .emit_name(Opcode::LoadName, "KeyError")
        .emit_name(Opcode::LoadName, "ArithmeticError")
        .emit_arg(Opcode::BuildTuple, 2)
        .emit_jump(Opcode::JumpIfNotExcMatch, no_match);
    pop_triple(&mut b);
    b.emit(Opcode::PopExcept)
        .load_const(string("caught"))
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);

    assert_eq!(run_ok(b), Object::String("caught".to_owned()));
}

/// Matching against something that is not an exception class is a `TypeError`.
#[test]
fn except_non_exception_class_raises_type_error() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "ValueError", "x");
    b.bind(handler);
    except_match(&mut b, "int", no_match);
    pop_triple(&mut b);
    b.emit(Opcode::PopExcept)
        .load_const(ConstSpec::None)
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);

    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert_eq!(
        exc.message(),
        Some("catching classes that do not inherit from BaseException is not allowed")
    );
    assert_eq!(
        exc.context().map(ember::Exception::exc_type),
        Some(ExcType::ValueError),
        "the failed match happens while the ValueError is being handled"
    );
}

/// A raise inside a `for` loop nested in `try` unwinds through the loop block to the
/// handler: the iterator is discarded and the handler gets the exception triple.
#[test]
fn raise_in_loop_unwinds_to_enclosing_handler() {
    // try:
    //     for i in range(3):
    //         raise ValueError('in loop')
    // except ValueError as e:
    //     result = (e.args[0], i)
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let no_match = b.new_label();
    let after = b.new_label();
    let top = b.new_label();
    let done = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler)
        .emit_jump(Opcode::SetupLoop, after)
        .emit_name(Opcode::LoadName, "range")
        .load_const(ConstSpec::Int(3))
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::GetIter);
    b.bind(top)
        .emit_jump(Opcode::ForIter, done)
        .emit_name(Opcode::StoreName, "i");
    raise_new(&mut b, "ValueError", "in loop");
    b.emit_jump(Opcode::JumpAbsolute, top);
    b.bind(done).emit(Opcode::PopBlock);
    b.bind(after)
        .emit(Opcode::PopBlock)
        .load_const(string("no error"))
        .emit(Opcode::ReturnValue);
    b.bind(handler);
    except_match(&mut b, "ValueError", no_match);
    b.emit(Opcode::PopTop)
        .emit_name(Opcode::StoreName, "e")
        .emit(Opcode::PopTop)
        .emit_name(Opcode::LoadName, "e")
        .emit_name(Opcode::LoadAttr, "args")
        .load_const(ConstSpec::Int(0))
        .emit(Opcode::BinarySubscr)
        .emit_name(Opcode::LoadName, "i")
        .emit_arg(Opcode::BuildTuple, 2)
        .emit_name(Opcode::StoreName, "result")
        .emit(Opcode::PopExcept)
        .emit_name(Opcode::LoadName, "result")
        .emit(Opcode::ReturnValue);
    b.bind(no_match).emit(Opcode::Reraise);
    let code = b.build().unwrap();

    let (runtime, result) = run(&code);
    assert_eq!(
        result.unwrap(),
        Object::Tuple(vec![Object::String("in loop".to_owned()), Object::Int(0)])
    );
    let stats = runtime.heap_stats();
    for kind in ["Range", "Iter"] {
        assert_eq!(
            stats.objects_by_type.get(kind).copied().unwrap_or(0),
            0,
            "the loop's iterator was popped while unwinding: {stats:?}"
        );
    }
}

// =============================================================================
// 2. finally
// =============================================================================

/// The `finally` body runs when the protected body raises, then the error continues.
#[test]
fn finally_runs_on_the_error_path() {
    let mut b = CodeBuilder::new("<module>");
    let cleanup = b.new_label();
    b.emit_jump(Opcode::SetupFinally, cleanup)
        .load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(0))
        .emit(Opcode::BinaryTrueDivide)
        .emit(Opcode::PopTop)
        .emit(Opcode::PopBlock)
        .load_const(string("normal"))
        .emit_name(Opcode::StoreName, "log")
        .load_const(ConstSpec::None)
        .emit(Opcode::ReturnValue);
    b.bind(cleanup)
        .load_const(string("cleanup"))
        .emit_name(Opcode::StoreName, "log")
        .emit(Opcode::Reraise);
    let code = b.build().unwrap();

    let (runtime, result) = run(&code);
    let exc = result.unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::ZeroDivisionError);
    assert_eq!(exc.message(), Some("division by zero"));
    assert_eq!(runtime.get_global("log"), Some(Object::String("cleanup".to_owned())));
}

/// Without an error the block is popped and the inline copy of the `finally` body runs.
#[test]
fn finally_runs_on_the_normal_path() {
    let mut b = CodeBuilder::new("<module>");
    let cleanup = b.new_label();
    b.emit_jump(Opcode::SetupFinally, cleanup)
        .load_const(string("body"))
        .emit_name(Opcode::StoreName, "log")
        .emit(Opcode::PopBlock)
        .emit_name(Opcode::LoadName, "log")
        .load_const(string("+cleanup"))
        .emit(Opcode::BinaryAdd)
        .emit(Opcode::ReturnValue);
    b.bind(cleanup).emit(Opcode::Reraise);

    assert_eq!(run_ok(b), Object::String("body+cleanup".to_owned()));
}

// =============================================================================
// 3. raise
// =============================================================================

/// A bare `raise` with nothing being handled is a `RuntimeError`.
#[test]
fn bare_raise_without_active_exception() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_arg(Opcode::RaiseVarargs, 0);

    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::RuntimeError);
    assert_eq!(exc.message(), Some("No active exception to reraise"));
}

/// A bare `raise` inside a handler re-raises the exception being handled.
#[test]
fn bare_raise_inside_handler() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    b.line(1).emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "ValueError", "again");
    b.line(3).bind(handler);
    pop_triple(&mut b);
    b.emit_arg(Opcode::RaiseVarargs, 0);

    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.message(), Some("again"));
    assert!(exc.context().is_none(), "a re-raised exception is not its own context");
    assert_eq!(exc.traceback().len(), 1, "re-raising adds no traceback entry");
}

/// Raising inside a handler records the handled exception as `__context__`.
#[test]
fn raise_in_handler_sets_context() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "ValueError", "first");
    b.bind(handler);
    pop_triple(&mut b);
    raise_new(&mut b, "TypeError", "second");

    let exc = run_err(b);
    assert_eq!(exc.summary(), "TypeError: second");
    let context = exc.context().expect("context should be set");
    assert_eq!(context.summary(), "ValueError: first");
    assert!(!exc.suppress_context());
    let text = exc.to_string();
    assert!(
        text.contains("During handling of the above exception, another exception occurred:"),
        "display shows the implicit chain:\n{text}"
    );
    assert!(text.starts_with("Traceback"), "the context is printed first:\n{text}");
}

/// `raise X from Y` sets `__cause__` and suppresses the context.
#[test]
fn raise_from_sets_cause() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "RuntimeError")
        .load_const(string("outer"))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_name(Opcode::LoadName, "KeyError")
        .load_const(string("inner"))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_arg(Opcode::RaiseVarargs, 2);

    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::RuntimeError);
    let cause = exc.cause().expect("cause should be set");
    assert_eq!(cause.summary(), "KeyError: 'inner'");
    assert!(exc.suppress_context(), "an explicit cause suppresses the context");
    assert!(
        exc.to_string()
            .contains("The above exception was the direct cause of the following exception:"),
        "display shows the explicit chain"
    );
}

/// `raise ... from None` clears the cause and still suppresses the context.
#[test]
fn raise_from_none_hides_context() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "ValueError", "hidden");
    b.bind(handler);
    pop_triple(&mut b);
    b.emit_name(Opcode::LoadName, "TypeError")
        .load_const(ConstSpec::None)
        .emit_arg(Opcode::RaiseVarargs, 2);

    let exc = run_err(b);
    assert!(exc.cause().is_none());
    assert!(exc.suppress_context());
    assert!(exc.context().is_some(), "the context is still recorded");
    assert!(!exc.to_string().contains("hidden"), "a suppressed context is not displayed");
}

/// Only exception classes and instances can be raised.
#[test]
fn raise_non_exception_is_type_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(5)).emit_arg(Opcode::RaiseVarargs, 1);
    let exc = run_err(b);
    assert_eq!(exc.summary(), "TypeError: exceptions must derive from BaseException");

    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "ValueError")
        .load_const(ConstSpec::Int(5))
        .emit_arg(Opcode::RaiseVarargs, 2);
    let exc = run_err(b);
    assert_eq!(exc.summary(), "TypeError: exception causes must derive from BaseException");
}

/// Raising a class instantiates it with no arguments.
#[test]
fn raise_class_instantiates_it() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "IndexError")
        .emit_arg(Opcode::RaiseVarargs, 1);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::IndexError);
    assert_eq!(exc.message(), None);
    assert!(exc.args().is_empty());
}

/// `assert` raises the `AssertionError` loaded by `LOAD_ASSERTION_ERROR`.
#[test]
fn failed_assert_raises_assertion_error() {
    let mut b = CodeBuilder::new("<module>");
    let ok = b.new_label();
    b.load_const(ConstSpec::Bool(false))
        .emit_jump(Opcode::PopJumpIfTrue, ok)
        .emit(Opcode::LoadAssertionError)
        .load_const(string("values differ"))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_arg(Opcode::RaiseVarargs, 1);
    b.bind(ok).load_const(ConstSpec::None).emit(Opcode::ReturnValue);

    assert_eq!(run_err(b).summary(), "AssertionError: values differ");
}

// =============================================================================
// 4. Exception state
// =============================================================================

/// `POP_EXCEPT` restores the state saved on entry, so nothing is active afterwards.
#[test]
fn pop_except_restores_exception_state() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "ValueError", "handled");
    b.bind(handler);
    pop_triple(&mut b);
    b.emit(Opcode::PopExcept).emit_arg(Opcode::RaiseVarargs, 0);

    let exc = run_err(b);
    assert_eq!(exc.summary(), "RuntimeError: No active exception to reraise");
    assert!(exc.context().is_none(), "the handled exception is no longer active");
}

/// Leaving a nested handler brings back the outer handler's exception.
#[test]
fn nested_handler_restores_outer_exception() {
    let mut b = CodeBuilder::new("<module>");
    let outer = b.new_label();
    let inner = b.new_label();
    b.emit_jump(Opcode::SetupFinally, outer);
    raise_new(&mut b, "ValueError", "outer");
    b.bind(outer);
    pop_triple(&mut b);
    b.emit_jump(Opcode::SetupFinally, inner);
    raise_new(&mut b, "KeyError", "inner");
    b.bind(inner);
    pop_triple(&mut b);
    b.emit(Opcode::PopExcept).emit_arg(Opcode::RaiseVarargs, 0);

    let exc = run_err(b);
    assert_eq!(exc.summary(), "ValueError: outer");
}

/// Exception objects expose their class, traceback and chain as attributes.
#[test]
fn exception_attributes() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "KeyError", "k");
    b.bind(handler)
        .emit(Opcode::PopTop)
        .emit_name(Opcode::StoreName, "e")
        .emit(Opcode::PopTop)
        .emit(Opcode::PopExcept)
        .emit_name(Opcode::LoadName, "e")
        .emit_name(Opcode::LoadAttr, "__class__")
        .emit_name(Opcode::LoadName, "KeyError")
        .emit_arg(Opcode::IsOp, 0)
        .emit_name(Opcode::LoadName, "e")
        .emit_name(Opcode::LoadAttr, "__traceback__")
        .load_const(ConstSpec::None)
        .emit_arg(Opcode::IsOp, 1)
        .emit_name(Opcode::LoadName, "e")
        .emit_name(Opcode::LoadAttr, "__cause__")
        .emit_name(Opcode::LoadName, "e")
        .emit_name(Opcode::LoadAttr, "__suppress_context__")
        .emit_arg(Opcode::BuildTuple, 4)
        .emit(Opcode::ReturnValue);

    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![Object::Bool(true), Object::Bool(true), Object::None, Object::Bool(false)])
    );
}

// =============================================================================
// 5. User Exception Classes
// =============================================================================

/// A class deriving from `ValueError` is caught by `except ValueError` and keeps its name.
#[test]
fn user_exception_subclass() {
    let mut b = CodeBuilder::new("<module>");
    class(&mut b, "ParseError", &["ValueError"], Vec::new());
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut b, "ParseError", "bad token");
    b.bind(handler);
    except_match(&mut b, "ValueError", no_match);
    pop_triple(&mut b);
    b.emit(Opcode::PopExcept);
    raise_new(&mut b, "ParseError", "uncaught");
    b.bind(no_match).emit(Opcode::Reraise);

    let exc = run_err(b);
    assert_eq!(exc.type_name(), "ParseError");
    assert_eq!(exc.exc_type(), ExcType::ValueError, "the builtin base is reported");
    assert_eq!(exc.summary(), "ParseError: uncaught", "the caught instance was handled");
    assert!(exc.is_instance_of(ExcType::Exception));
}

// =============================================================================
// 6. with
// =============================================================================

/// A context manager whose `__exit__` returns true swallows the body's exception, and
/// `__exit__` receives the exception instance.
#[test]
fn with_statement_suppresses_when_exit_returns_true() {
    let mut b = CodeBuilder::new("<module>");
    class(
        &mut b,
        "Suppress",
        &[],
        vec![
            (
                "__enter__",
                method("__enter__", &["self"], |m| {
                    m.load_const(string("entered")).emit(Opcode::ReturnValue);
                }),
            ),
            (
                "__exit__",
                method("__exit__", &["self", "typ", "val", "tb"], |m| {
                    m.emit_local(Opcode::LoadFast, "val")
                        .emit_name(Opcode::StoreGlobal, "seen")
                        .load_const(ConstSpec::Bool(true))
                        .emit(Opcode::ReturnValue);
                }),
            ),
        ],
    );
    let handler = b.new_label();
    let suppress = b.new_label();
    let after = b.new_label();
    b.emit_name(Opcode::LoadName, "Suppress")
        .emit_arg(Opcode::CallFunction, 0)
        .emit_jump(Opcode::SetupWith, handler)
        .emit_name(Opcode::StoreName, "entered")
        .emit_name(Opcode::LoadName, "missing")
        .emit(Opcode::PopTop)
        .emit(Opcode::PopBlock)
        .load_const(ConstSpec::None)
        .emit(Opcode::DupTop)
        .emit(Opcode::DupTop)
        .emit_arg(Opcode::CallFunction, 3)
        .emit(Opcode::PopTop)
        .emit_jump(Opcode::JumpForward, after);
    b.bind(handler)
        .emit(Opcode::WithExceptStart)
        .emit_jump(Opcode::PopJumpIfTrue, suppress)
        .emit(Opcode::Reraise);
    b.bind(suppress);
    pop_triple(&mut b);
    b.emit(Opcode::PopExcept).emit(Opcode::PopTop);
    b.bind(after)
        .emit_name(Opcode::LoadName, "entered")
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let (runtime, result) = run(&code);
    assert_eq!(result.unwrap(), Object::String("entered".to_owned()));
    assert_eq!(
        runtime.get_global("seen"),
        Some(Object::Exception {
            exc_type: ExcType::NameError,
            arg: Some("name 'missing' is not defined".to_owned()),
        }),
        "__exit__ sees the exception raised in the body"
    );
}

/// A context manager without `__enter__` fails before the body runs.
#[test]
fn with_statement_requires_enter() {
    let mut b = CodeBuilder::new("<module>");
    class(&mut b, "Plain", &[], Vec::new());
    let handler = b.new_label();
    b.emit_name(Opcode::LoadName, "Plain")
        .emit_arg(Opcode::CallFunction, 0)
        .emit_jump(Opcode::SetupWith, handler)
        .emit(Opcode::PopTop)
        .emit(Opcode::PopBlock)
        .load_const(ConstSpec::None)
        .emit(Opcode::ReturnValue);
    b.bind(handler).emit(Opcode::Reraise);

    let exc = run_err(b);
    assert_eq!(exc.summary(), "AttributeError: __enter__");
}
