//=====================================================
// RigVM Interpreter
//=====================================================
// Goal: Exercise control flow end to end through assembled programs
// Objective: Slices, lazy arguments, entries, branches, memoized runs
//            and soft errors
//=====================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rigvm_core::{
    assemble, DispatchRegistry, FunctionDescriptor, Invocation, RigVm, RigVmResult, SoftError, TypeIndex,
    TypeRegistry, Value, VmOptions,
};

fn select(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let pick = if invocation.bool(0)? { 1 } else { 2 };
    let first = invocation.int32(pick)?;
    let second = invocation.int32(pick)?;
    assert_eq!(first, second);
    invocation.set(3, Value::Int32(first))
}

fn first_trait(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let value = invocation.trait_value(0)?.clone();
    invocation.set(0, value)
}

fn dispatch() -> Arc<DispatchRegistry> {
    let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).expect("builtins");
    dispatch
        .register_function(
            FunctionDescriptor::new("Select", select)
                .input("Condition", TypeIndex::BOOL)
                .input("IfTrue", TypeIndex::INT32)
                .input("IfFalse", TypeIndex::INT32)
                .output("Result", TypeIndex::INT32),
        )
        .expect("register Select");
    dispatch
        .register_function(FunctionDescriptor::new("FirstTrait", first_trait).output("Value", TypeIndex::WILDCARD))
        .expect("register FirstTrait");
    dispatch
}

fn load(source: &str, dispatch: &DispatchRegistry, options: VmOptions) -> RigVm {
    let program = assemble(source, dispatch).expect("assemble");
    RigVm::new(Arc::new(program), dispatch, options).expect("load")
}

#[test]
fn sliced_register_collects_one_value_per_slice() {
    let source = "
.literals
    count int32 4
.end
.work
    index int32
    square int32
    squares int32 sliced
    done bool
.end
.entry main
top:
    begin_block @count $index
    dispatch Multiply $index $index $square
    copy $square $squares
    end_block
    inc $index
    equals $index @count $done
    jump_if $done false top
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, None);
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(
        vm.work_slices("squares").expect("squares"),
        &[Value::Int32(0), Value::Int32(1), Value::Int32(4), Value::Int32(9)]
    );
}

const LAZY: &str = "
.externals
    flag bool true
.end
.literals
    ten int32 10
    twenty int32 20
.end
.work
    yes int32
    no int32
    result int32
    true_runs int32
    false_runs int32
.end
.entry main
    .lazy 1 when_true when_false
    .lazy 2 when_false after
    execute Select %flag $yes $no $result
    exit
when_true:
    copy @ten $yes
    inc $true_runs
when_false:
    copy @twenty $no
    inc $false_runs
after:
.end
";

#[test]
fn lazy_arguments_run_once_and_only_when_read() {
    let dispatch = dispatch();
    let mut vm = load(LAZY, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, Some(1));
    assert_eq!(vm.work("result"), Some(&Value::Int32(10)));
    assert_eq!(vm.work("true_runs"), Some(&Value::Int32(1)));
    assert_eq!(vm.work("false_runs"), Some(&Value::Int32(0)));

    vm.set_external("flag", Value::Bool(false)).expect("set flag");
    vm.execute("main").expect("run");
    assert_eq!(vm.work("result"), Some(&Value::Int32(20)));
    assert_eq!(vm.work("true_runs"), Some(&Value::Int32(1)));
    assert_eq!(vm.work("false_runs"), Some(&Value::Int32(1)));
}

#[test]
fn invoked_entries_get_their_own_traits() {
    let source = "
.literals
    seven int32 7
    nine int32 9
.end
.work
    from_main int32
    from_helper int32
    after_invoke int32
    calls int32
.end
.entry main
    traits @seven
    execute FirstTrait $from_main
    invoke helper
    execute FirstTrait $after_invoke
    exit
.end
.entry helper
    inc $calls
    traits @nine
    execute FirstTrait $from_helper
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, Some(4));
    assert_eq!(vm.work("from_main"), Some(&Value::Int32(7)));
    assert_eq!(vm.work("from_helper"), Some(&Value::Int32(9)));
    assert_eq!(vm.work("after_invoke"), Some(&Value::Int32(7)));
    assert_eq!(vm.work("calls"), Some(&Value::Int32(1)));

    let outcome = vm.execute("helper").expect("run helper");
    assert_eq!(outcome.exit_instruction, None);
    assert_eq!(vm.work("calls"), Some(&Value::Int32(2)));
}

const BRANCHES: &str = r#"
.externals
    which name "right"
.end
.work
    left_hits int32
    right_hits int32
    after int32
.end
.entry main
    .branch left on_left on_right
    .branch right on_right done
    jump_to_branch %which
on_left:
    inc $left_hits
on_right:
    inc $right_hits
done:
    inc $after
.end
"#;

#[test]
fn jump_to_branch_runs_the_matching_label_then_resumes() {
    let dispatch = dispatch();
    let mut vm = load(BRANCHES, &dispatch, VmOptions::default());
    vm.execute("main").expect("run");
    assert_eq!(vm.work("left_hits"), Some(&Value::Int32(0)));
    assert_eq!(vm.work("right_hits"), Some(&Value::Int32(1)));
    assert_eq!(vm.work("after"), Some(&Value::Int32(1)));

    vm.set_external("which", Value::Name("left".into())).expect("set label");
    vm.execute("main").expect("run");
    assert_eq!(vm.work("left_hits"), Some(&Value::Int32(1)));
    assert_eq!(vm.work("right_hits"), Some(&Value::Int32(1)));
    assert_eq!(vm.work("after"), Some(&Value::Int32(2)));
}

#[test]
fn unknown_branch_labels_are_soft_errors() {
    let dispatch = dispatch();
    let mut vm = load(BRANCHES, &dispatch, VmOptions::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    vm.set_diagnostic_hook(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    vm.set_external("which", Value::Name("up".into())).expect("set label");

    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].instruction, 0);
    assert_eq!(outcome.diagnostics[0].error, SoftError::UnknownBranch("up".into()));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(vm.work("after"), Some(&Value::Int32(1)));
}

#[test]
fn guarded_runs_execute_once() {
    let source = "
.work
    guard bool
    runs int32
.end
.entry main
    run body done $guard
    run body done $guard
    run body done
    exit
body:
    inc $runs
done:
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, Some(3));
    assert_eq!(vm.work("runs"), Some(&Value::Int32(2)));
    assert_eq!(vm.work("guard"), Some(&Value::Bool(true)));

    vm.reset_memory();
    assert_eq!(vm.work("runs"), Some(&Value::Int32(0)));
    assert_eq!(vm.work("guard"), Some(&Value::Bool(false)));
}

#[test]
fn soft_errors_substitute_values_and_continue() {
    let source = "
.literals
    seven int32 7
    zero int32 0
    count int32 4
    far int32 9
.end
.work
    quotient int32 5
    reached bool
.end
.entry main
    dispatch Divide @seven @zero $quotient
    begin_block @count @far
    end_block
    true $reached
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    let errors: Vec<_> = outcome.diagnostics.iter().map(|diagnostic| diagnostic.error.clone()).collect();
    assert_eq!(
        errors,
        vec![
            SoftError::DivisionByZero,
            SoftError::SliceOutOfRange { index: 9, count: 4 }
        ]
    );
    assert_eq!(vm.work("quotient"), Some(&Value::Int32(0)));
    assert_eq!(vm.work("reached"), Some(&Value::Bool(true)));
}

#[test]
fn recursion_stops_at_the_depth_limit() {
    let source = "
.work
    calls int32
.end
.entry spin
    inc $calls
    invoke spin
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default().with_max_entry_depth(8));
    let outcome = vm.execute("spin").expect("run");
    assert_eq!(vm.work("calls"), Some(&Value::Int32(9)));
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].error, SoftError::DepthExceeded { depth: 8 });
}

#[test]
fn exit_inside_a_branch_ends_the_entry() {
    let source = r#"
.literals
    label name "stop"
.end
.work
    after int32
.end
.entry main
    .branch stop halt done
    jump_to_branch @label
halt:
    exit
done:
    inc $after
.end
"#;
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, Some(1));
    assert_eq!(vm.work("after"), Some(&Value::Int32(0)));
}

#[test]
fn forks_run_independently_on_threads() {
    let dispatch = dispatch();
    let vm = load(BRANCHES, &dispatch, VmOptions::default());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let mut fork = vm.fork().expect("fork");
            std::thread::spawn(move || {
                for _ in 0..10 {
                    fork.execute("main").expect("run");
                }
                fork.work("right_hits").cloned()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("join"), Some(Value::Int32(10)));
    }
}

#[test]
fn jump_to_branch_without_branches_ignores_later_tables() {
    let source = r#"
.literals
    label name "go"
.end
.work
    hits int32
.end
.entry main
    jump_to_branch @label
    exit
    .branch go body done
    jump_to_branch @label
body:
    inc $hits
done:
    exit
.end
"#;
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, Some(1));
    assert_eq!(vm.work("hits"), Some(&Value::Int32(0)));
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].instruction, 0);
    assert_eq!(outcome.diagnostics[0].error, SoftError::UnknownBranch("go".into()));
}

#[test]
fn exit_inside_an_invoked_entry_returns_to_the_caller() {
    let source = "
.work
    before int32
    inside int32
    after int32
.end
.entry main
    inc $before
    invoke helper
    inc $after
.end
.entry helper
    inc $inside
    exit
    inc $inside
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, None);
    assert_eq!(vm.work("before"), Some(&Value::Int32(1)));
    assert_eq!(vm.work("inside"), Some(&Value::Int32(1)));
    assert_eq!(vm.work("after"), Some(&Value::Int32(1)));

    let outcome = vm.execute("helper").expect("run helper");
    assert_eq!(outcome.exit_instruction, Some(4));
}

#[test]
fn exit_inside_a_lazy_argument_ends_only_that_argument() {
    let source = "
.literals
    ten int32 10
.end
.work
    yes int32
    no int32
    result int32
    after int32
    cond bool true
.end
.entry main
    .lazy 1 fill done
    execute Select $cond $yes $no $result
    inc $after
    exit
fill:
    copy @ten $yes
    exit
done:
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.exit_instruction, Some(2));
    assert_eq!(vm.work("result"), Some(&Value::Int32(10)));
    assert_eq!(vm.work("after"), Some(&Value::Int32(1)));
}

#[test]
fn block_indices_past_the_slice_cap_fall_back_to_slice_zero() {
    let source = "
.literals
    huge int32 2147483647
    near int32 2147483646
    four int32 4
    three int32 3
.end
.work
    hits int32 sliced
.end
.entry wide
    begin_block @huge @near
    inc $hits
    end_block
.end
.entry narrow
    begin_block @four @three
    inc $hits
    end_block
.end
";
    let dispatch = dispatch();
    let mut vm = load(source, &dispatch, VmOptions::default());
    let outcome = vm.execute("wide").expect("run");
    assert_eq!(
        outcome.diagnostics[0].error,
        SoftError::SliceOutOfRange {
            index: 2_147_483_646,
            count: 65_536
        }
    );
    assert_eq!(vm.work_slices("hits").expect("hits"), &[Value::Int32(1)]);

    let mut vm = load(source, &dispatch, VmOptions::default().with_max_slices(2));
    let outcome = vm.execute("narrow").expect("run");
    assert_eq!(outcome.diagnostics[0].error, SoftError::SliceOutOfRange { index: 3, count: 2 });
    assert_eq!(vm.work_slices("hits").expect("hits"), &[Value::Int32(1)]);
}
