use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use rigvm_core::{assemble, DispatchRegistry, RigVm, TypeRegistry, VmOptions};

const LOOP: &str = "
.literals
    limit int32 1000
    one int32 1
.end
.work
    index int32
    total int32
    done bool
    squares int32 sliced
.end
.entry count
top:
    dispatch Add $total @one $total
    inc $index
    equals $index @limit $done
    jump_if $done false top
.end
.entry slices
square:
    begin_block @limit $index
    dispatch Multiply $index $index $total
    copy $total $squares
    end_block
    inc $index
    equals $index @limit $done
    jump_if $done false square
.end
";

fn bench_interpreter(c: &mut Criterion) {
    let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).expect("builtins");
    let program = Arc::new(assemble(LOOP, &dispatch).expect("assemble"));
    let mut vm = RigVm::new(program, &dispatch, VmOptions::default()).expect("load");

    c.bench_function("counting_loop", |b| {
        b.iter(|| {
            vm.reset_memory();
            vm.execute("count").expect("run")
        })
    });
    c.bench_function("sliced_block", |b| {
        b.iter(|| {
            vm.reset_memory();
            vm.execute("slices").expect("run")
        })
    });
}

fn bench_assemble(c: &mut Criterion) {
    let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).expect("builtins");
    c.bench_function("assemble", |b| b.iter(|| assemble(LOOP, &dispatch).expect("assemble")));
}

criterion_group!(benches, bench_interpreter, bench_assemble);
criterion_main!(benches);
