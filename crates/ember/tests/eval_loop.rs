//! Tests for the core eval loop: constants, names, operators, jumps, loops, unpacking,
//! container builders and f-string formatting.
//!
//! Every test assembles its code object with `CodeBuilder`, the way a compiler front end
//! would, and runs it through a fresh `Runtime`.

use ember::{CodeBuilder, CodeSpec, ConstSpec, DictPairs, ExcType, NoLimitTracker, NoPrint, Object, Opcode, Runtime};
use pretty_assertions::assert_eq;

fn run(code: &CodeSpec) -> Result<Object, ember::Exception> {
    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    runtime.run(code, &mut NoPrint)
}

fn run_ok(b: CodeBuilder) -> Object {
    let code = b.build().unwrap();
    match run(&code) {
        Ok(value) => value,
        Err(exc) => panic!("code raised:\n{exc}"),
    }
}

fn run_err(b: CodeBuilder) -> ember::Exception {
    let code = b.build().unwrap();
    match run(&code) {
        Ok(value) => panic!("expected an exception, got {value:?}"),
        Err(exc) => exc,
    }
}

fn int_tuple(values: &[i64]) -> ConstSpec {
    ConstSpec::Tuple(values.iter().map(|v| ConstSpec::Int(*v)).collect())
}

// =============================================================================
// 1. Constants, Names and Arithmetic
// =============================================================================

/// `return 2 + 3` at module level evaluates to 5.
#[test]
fn return_two_plus_three() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(2))
        .load_const(ConstSpec::Int(3))
        .emit(Opcode::BinaryAdd)
        .emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Int(5));
}

/// Evaluating `return 2 + 3`, at module level and inside a called function, leaves no
/// objects behind: frames, stacks and the code objects are all released.
#[test]
fn return_two_plus_three_releases_everything() {
    let mut inner = CodeBuilder::new("f");
    inner
        .flags(ember::CodeFlags::OPTIMIZED | ember::CodeFlags::NEWLOCALS)
        .load_const(ConstSpec::Int(2))
        .load_const(ConstSpec::Int(3))
        .emit(Opcode::BinaryAdd)
        .emit(Opcode::ReturnValue);
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Code(Box::new(inner.build().unwrap())))
        .load_const(ConstSpec::Str("f".to_owned()))
        .emit_arg(Opcode::MakeFunction, 0)
        .emit_arg(Opcode::CallFunction, 0)
        .load_const(ConstSpec::Int(2))
        .load_const(ConstSpec::Int(3))
        .emit(Opcode::BinaryAdd)
        .emit(Opcode::BinaryAdd)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    let before = runtime.heap_stats();
    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Int(10));
    let after = runtime.heap_stats();
    assert_eq!(after.live_objects, before.live_objects, "{after:?}");
    assert_eq!(after.objects_by_type, before.objects_by_type);
}

/// Names stored at module level are globals and survive the run.
#[test]
fn module_names_persist_as_globals() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(10))
        .emit_name(Opcode::StoreName, "x")
        .emit_name(Opcode::LoadName, "x")
        .load_const(ConstSpec::Int(4))
        .emit(Opcode::BinaryMultiply)
        .emit_name(Opcode::StoreName, "y")
        .emit_name(Opcode::LoadName, "y")
        .load_const(ConstSpec::Int(2))
        .emit(Opcode::BinarySubtract)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Int(38));
    assert_eq!(runtime.get_global("y"), Some(Object::Int(40)), "y should be bound after the run");
    assert_eq!(
        runtime.get_global("__name__"),
        Some(Object::String("__main__".to_owned())),
        "module code runs as __main__"
    );
}

/// Loading a name bound nowhere raises `NameError`.
#[test]
fn unbound_name_raises_name_error() {
    let mut b = CodeBuilder::new("<module>");
    b.line(1).emit_name(Opcode::LoadName, "missing").emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::NameError);
    assert_eq!(exc.message(), Some("name 'missing' is not defined"));
    assert_eq!(exc.traceback().len(), 1, "the module frame is recorded in the traceback");
    assert_eq!(exc.traceback()[0].line, 1);
}

/// Builtins are found after globals, and a global shadows a builtin.
#[test]
fn globals_shadow_builtins() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "len")
        .load_const(ConstSpec::Str("abcd".to_owned()))
        .emit_arg(Opcode::CallFunction, 1)
        .emit_name(Opcode::StoreName, "n")
        .load_const(ConstSpec::Int(99))
        .emit_name(Opcode::StoreName, "len")
        .emit_name(Opcode::LoadName, "len")
        .emit_name(Opcode::LoadName, "n")
        .emit_arg(Opcode::BuildTuple, 2)
        .emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Tuple(vec![Object::Int(99), Object::Int(4)]));
}

/// Integer arithmetic overflows into big integers instead of wrapping.
#[test]
fn int_overflow_promotes_to_bigint() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(i64::MAX))
        .load_const(ConstSpec::Int(1))
        .emit(Opcode::BinaryAdd)
        .emit(Opcode::ReturnValue);
    let expected = num_bigint::BigInt::from(i64::MAX) + 1;
    assert_eq!(run_ok(b), Object::BigInt(expected));
}

/// True division always produces a float; floor division by zero raises.
#[test]
fn division_semantics() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(7))
        .load_const(ConstSpec::Int(2))
        .emit(Opcode::BinaryTrueDivide)
        .load_const(ConstSpec::Int(-7))
        .load_const(ConstSpec::Int(2))
        .emit(Opcode::BinaryFloorDivide)
        .load_const(ConstSpec::Int(-7))
        .load_const(ConstSpec::Int(2))
        .emit(Opcode::BinaryModulo)
        .emit_arg(Opcode::BuildTuple, 3)
        .emit(Opcode::ReturnValue);
    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![Object::Float(3.5), Object::Int(-4), Object::Int(1)])
    );

    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(0))
        .emit(Opcode::BinaryFloorDivide)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::ZeroDivisionError);
    assert_eq!(exc.message(), Some("integer division or modulo by zero"));
}

/// Unsupported operand types name both types in the message.
#[test]
fn binary_type_error_names_both_operands() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Str("a".to_owned()))
        .emit(Opcode::BinaryAdd)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert_eq!(exc.message(), Some("unsupported operand type(s) for +: 'int' and 'str'"));
}

// =============================================================================
// 2. Comparisons and Jumps
// =============================================================================

/// `while i < 5: total += i; i += 1` sums to 10.
#[test]
fn while_loop_with_absolute_jumps() {
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    let done = b.new_label();
    b.load_const(ConstSpec::Int(0))
        .emit_name(Opcode::StoreName, "i")
        .load_const(ConstSpec::Int(0))
        .emit_name(Opcode::StoreName, "total");
    b.bind(top)
        .emit_name(Opcode::LoadName, "i")
        .load_const(ConstSpec::Int(5))
        .emit_arg(Opcode::CompareOp, 0)
        .emit_jump(Opcode::PopJumpIfFalse, done)
        .emit_name(Opcode::LoadName, "total")
        .emit_name(Opcode::LoadName, "i")
        .emit(Opcode::InplaceAdd)
        .emit_name(Opcode::StoreName, "total")
        .emit_name(Opcode::LoadName, "i")
        .load_const(ConstSpec::Int(1))
        .emit(Opcode::InplaceAdd)
        .emit_name(Opcode::StoreName, "i")
        .emit_jump(Opcode::JumpAbsolute, top);
    b.bind(done).emit_name(Opcode::LoadName, "total").emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Int(10));
}

/// `a or b` keeps the first truthy operand on the stack.
#[test]
fn short_circuit_jumps_keep_the_deciding_value() {
    let mut b = CodeBuilder::new("<module>");
    let end = b.new_label();
    b.load_const(ConstSpec::Int(0))
        .emit_jump(Opcode::JumpIfTrueOrPop, end)
        .load_const(ConstSpec::Str(String::new()))
        .emit_jump(Opcode::JumpIfTrueOrPop, end)
        .load_const(ConstSpec::Str("fallback".to_owned()));
    b.bind(end).emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::String("fallback".to_owned()));
}

/// Identity, containment and their negations.
#[test]
fn is_and_contains_ops() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::None)
        .load_const(ConstSpec::None)
        .emit_arg(Opcode::IsOp, 0)
        .load_const(ConstSpec::Int(3))
        .load_const(int_tuple(&[1, 2, 3]))
        .emit_arg(Opcode::ContainsOp, 0)
        .load_const(ConstSpec::Str("z".to_owned()))
        .load_const(ConstSpec::Str("abc".to_owned()))
        .emit_arg(Opcode::ContainsOp, 1)
        .load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::None)
        .emit_arg(Opcode::IsOp, 1)
        .emit_arg(Opcode::BuildTuple, 4)
        .emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Tuple(vec![Object::Bool(true); 4]));
}

/// Ordering between unrelated types is a `TypeError`.
#[test]
fn ordering_mismatched_types_raises() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Str("1".to_owned()))
        .emit_arg(Opcode::CompareOp, 0)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert_eq!(exc.message(), Some("'<' not supported between instances of 'int' and 'str'"));
}

// =============================================================================
// 3. Iteration and Loop Blocks
// =============================================================================

/// `for x in range(5): total += x`.
#[test]
fn for_loop_over_range() {
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    let done = b.new_label();
    b.load_const(ConstSpec::Int(0))
        .emit_name(Opcode::StoreName, "total")
        .emit_name(Opcode::LoadName, "range")
        .load_const(ConstSpec::Int(5))
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::GetIter);
    b.bind(top)
        .emit_jump(Opcode::ForIter, done)
        .emit_name(Opcode::StoreName, "x")
        .emit_name(Opcode::LoadName, "total")
        .emit_name(Opcode::LoadName, "x")
        .emit(Opcode::InplaceAdd)
        .emit_name(Opcode::StoreName, "total")
        .emit_jump(Opcode::JumpAbsolute, top);
    b.bind(done).emit_name(Opcode::LoadName, "total").emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Int(10));
}

/// `BREAK_LOOP` discards the iterator left on the stack and jumps past the loop.
#[test]
fn break_loop_unwinds_to_the_loop_block() {
    let mut b = CodeBuilder::new("<module>");
    let after = b.new_label();
    let top = b.new_label();
    let done = b.new_label();
    b.emit_jump(Opcode::SetupLoop, after)
        .emit_name(Opcode::LoadName, "range")
        .load_const(ConstSpec::Int(100))
        .emit_arg(Opcode::CallFunction, 1)
        .emit(Opcode::GetIter);
    b.bind(top)
        .emit_jump(Opcode::ForIter, done)
        .emit_name(Opcode::StoreName, "i")
        .emit_name(Opcode::LoadName, "i")
        .load_const(ConstSpec::Int(3))
        .emit_arg(Opcode::CompareOp, 2)
        .emit_jump(Opcode::PopJumpIfFalse, top)
        .emit(Opcode::BreakLoop);
    b.bind(done).emit(Opcode::PopBlock);
    b.bind(after).emit_name(Opcode::LoadName, "i").emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Int(3));
    let stats = runtime.heap_stats();
    for kind in ["Range", "Iter"] {
        assert_eq!(
            stats.objects_by_type.get(kind).copied().unwrap_or(0),
            0,
            "the abandoned range iterator must be released: {stats:?}"
        );
    }
}

/// Iterating something that is not iterable names its type.
#[test]
fn get_iter_on_int_raises() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(3)).emit(Opcode::GetIter).emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert_eq!(exc.message(), Some("'int' object is not iterable"));
}

// =============================================================================
// 4. Unpacking
// =============================================================================

/// `a, b = (1, 2)` stores the items in source order.
#[test]
fn unpack_sequence_stores_in_order() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(int_tuple(&[1, 2]))
        .emit_arg(Opcode::UnpackSequence, 2)
        .emit_name(Opcode::StoreName, "a")
        .emit_name(Opcode::StoreName, "b")
        .emit_name(Opcode::LoadName, "a")
        .emit_name(Opcode::LoadName, "b")
        .emit(Opcode::BinarySubtract)
        .emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Int(-1));
}

/// Too many and too few values produce CPython's messages.
#[test]
fn unpack_sequence_count_mismatch_messages() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(int_tuple(&[1, 2, 3]))
        .emit_arg(Opcode::UnpackSequence, 2)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.message(), Some("too many values to unpack (expected 2)"));

    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(2))
        .emit_arg(Opcode::BuildList, 2)
        .emit_arg(Opcode::UnpackSequence, 3)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.message(), Some("not enough values to unpack (expected 3, got 2)"));

    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(1))
        .emit_arg(Opcode::UnpackSequence, 2)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert_eq!(exc.message(), Some("cannot unpack non-iterable int object"));
}

/// `a, *rest, z = (1, 2, 3, 4)`: the starred target collects a list.
#[test]
fn unpack_ex_collects_the_middle() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(int_tuple(&[1, 2, 3, 4]))
        .emit_arg(Opcode::UnpackEx, 1 | (1 << 8))
        .emit_name(Opcode::StoreName, "a")
        .emit_name(Opcode::StoreName, "rest")
        .emit_name(Opcode::StoreName, "z")
        .emit_name(Opcode::LoadName, "a")
        .emit_name(Opcode::LoadName, "rest")
        .emit_name(Opcode::LoadName, "z")
        .emit_arg(Opcode::BuildTuple, 3)
        .emit(Opcode::ReturnValue);
    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![
            Object::Int(1),
            Object::List(vec![Object::Int(2), Object::Int(3)]),
            Object::Int(4),
        ])
    );

    let mut b = CodeBuilder::new("<module>");
    b.load_const(int_tuple(&[1]))
        .emit_arg(Opcode::UnpackEx, 1 | (1 << 8))
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.message(), Some("not enough values to unpack (expected at least 2, got 1)"));
}

// =============================================================================
// 5. Containers
// =============================================================================

/// `{'a': 1, 'b': 2}['b']` through `BUILD_CONST_KEY_MAP` and `BINARY_SUBSCR`.
#[test]
fn const_key_map_and_subscript() {
    let keys = ConstSpec::Tuple(vec![ConstSpec::Str("a".to_owned()), ConstSpec::Str("b".to_owned())]);
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(2))
        .load_const(keys)
        .emit_arg(Opcode::BuildConstKeyMap, 2)
        .emit(Opcode::DupTop)
        .emit_name(Opcode::StoreName, "d")
        .load_const(ConstSpec::Str("b".to_owned()))
        .emit(Opcode::BinarySubscr)
        .emit(Opcode::ReturnValue);
    let code = b.build().unwrap();

    let mut runtime = Runtime::new(NoLimitTracker).unwrap();
    assert_eq!(runtime.run(&code, &mut NoPrint).unwrap(), Object::Int(2));
    assert_eq!(
        runtime.get_global("d"),
        Some(Object::Dict(DictPairs::from(vec![
            (Object::String("a".to_owned()), Object::Int(1)),
            (Object::String("b".to_owned()), Object::Int(2)),
        ])))
    );
}

/// A missing key raises `KeyError` whose message is the key's repr.
#[test]
fn missing_key_raises_key_error() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_arg(Opcode::BuildMap, 0)
        .load_const(ConstSpec::Str("z".to_owned()))
        .emit(Opcode::BinarySubscr)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::KeyError);
    assert_eq!(exc.message(), Some("'z'"));
}

/// `(1, 2, 3, 4)[1:3]` through `BUILD_SLICE`.
#[test]
fn slicing_a_list() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(int_tuple(&[1, 2, 3, 4]))
        .load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(3))
        .emit_arg(Opcode::BuildSlice, 2)
        .emit(Opcode::BinarySubscr)
        .emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Tuple(vec![Object::Int(2), Object::Int(3)]));
}

/// `[*a, *b]` builds through `LIST_EXTEND`, `(*a,)` converts with `LIST_TO_TUPLE`.
#[test]
fn list_extend_and_list_to_tuple() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_arg(Opcode::BuildList, 0)
        .load_const(int_tuple(&[1, 2]))
        .emit_arg(Opcode::ListExtend, 1)
        .load_const(ConstSpec::Str("ab".to_owned()))
        .emit_arg(Opcode::ListExtend, 1)
        .emit(Opcode::ListToTuple)
        .emit(Opcode::ReturnValue);
    assert_eq!(
        run_ok(b),
        Object::Tuple(vec![
            Object::Int(1),
            Object::Int(2),
            Object::String("a".to_owned()),
            Object::String("b".to_owned()),
        ])
    );
}

/// List assignment and deletion by index.
#[test]
fn store_and_delete_subscript() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(1))
        .load_const(ConstSpec::Int(2))
        .load_const(ConstSpec::Int(3))
        .emit_arg(Opcode::BuildList, 3)
        .emit_name(Opcode::StoreName, "xs")
        .load_const(ConstSpec::Int(20))
        .emit_name(Opcode::LoadName, "xs")
        .load_const(ConstSpec::Int(1))
        .emit(Opcode::StoreSubscr)
        .emit_name(Opcode::LoadName, "xs")
        .load_const(ConstSpec::Int(0))
        .emit(Opcode::DeleteSubscr)
        .emit_name(Opcode::LoadName, "xs")
        .emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::List(vec![Object::Int(20), Object::Int(3)]));
}

// =============================================================================
// 6. String Formatting
// =============================================================================

/// `f"{'ab'!r:>6}|{3.14159:.2f}|{255:04x}"`: conversion, spec and join.
#[test]
fn format_value_and_build_string() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Str("ab".to_owned()))
        .load_const(ConstSpec::Str(">6".to_owned()))
        .emit_arg(Opcode::FormatValue, 2 | 4)
        .load_const(ConstSpec::Str("|".to_owned()))
        .load_const(ConstSpec::Float(3.14159))
        .load_const(ConstSpec::Str(".2f".to_owned()))
        .emit_arg(Opcode::FormatValue, 4)
        .load_const(ConstSpec::Str("|".to_owned()))
        .load_const(ConstSpec::Int(255))
        .load_const(ConstSpec::Str("04x".to_owned()))
        .emit_arg(Opcode::FormatValue, 4)
        .emit_arg(Opcode::BuildString, 5)
        .emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::String("  'ab'|3.14|00ff".to_owned()));
}

/// A presentation type that does not apply to the value is a `ValueError`.
#[test]
fn format_value_unknown_code() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Str("abc".to_owned()))
        .load_const(ConstSpec::Str("d".to_owned()))
        .emit_arg(Opcode::FormatValue, 4)
        .emit(Opcode::ReturnValue);
    let exc = run_err(b);
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.message(), Some("Unknown format code 'd' for object of type 'str'"));
}

/// A format spec that is not a str is a `TypeError`.
#[test]
fn format_value_spec_must_be_str() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(ConstSpec::Int(7))
        .load_const(ConstSpec::Int(4))
        .emit_arg(Opcode::FormatValue, 4)
        .emit(Opcode::ReturnValue);
    assert_eq!(run_err(b).summary(), "TypeError: format spec must be a str, not int");
}

// =============================================================================
// 7. Wide Arguments and Malformed Code
// =============================================================================

/// Arguments above 255 go through `EXTENDED_ARG` and reach the instruction intact.
#[test]
fn extended_arg_reaches_the_instruction() {
    let mut b = CodeBuilder::new("<module>");
    for i in 0..300 {
        b.constant(ConstSpec::Int(i * 10));
    }
    b.emit_arg(Opcode::LoadConst, 299).emit(Opcode::ReturnValue);
    assert_eq!(run_ok(b), Object::Int(2990));
}

/// Code that indexes past its tables is rejected when loaded, before anything runs.
#[test]
fn malformed_code_is_rejected_at_load() {
    let code = CodeSpec {
        instructions: vec![(Opcode::LoadConst, 3), (Opcode::ReturnValue, 0)],
        ..CodeSpec::default()
    };
    let exc = run(&code).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::SystemError);
}
