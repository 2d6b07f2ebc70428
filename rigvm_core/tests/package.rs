//=====================================================
// RigVM Packages
//=====================================================
// Goal: Programs written to disk and loaded into a different process image
// Objective: Dispatch names re-resolve against a fresh registry and the
//            reloaded program behaves like the original
//=====================================================

use std::sync::Arc;

use rigvm_core::{assemble, DispatchRegistry, Program, RigVm, RigVmError, TypeDescriptor, TypeRegistry, Value, VmOptions};
use tempfile::tempdir;

const SOURCE: &str = "
.literals
    limit int32 5
    start int32 1
.end
.work
    index int32
    total int64
    step int64
    done bool
    mode Mode
.end
.entry main
    dispatch IntToEnum Result=Mode @start $mode
top:
    dispatch Widen $index $step
    dispatch Add $total $step $total
    inc $index
    equals $index @limit $done
    jump_if $done false top
.end
";

fn registry() -> Arc<DispatchRegistry> {
    let types = Arc::new(TypeRegistry::new());
    types.find_or_add_type(&TypeDescriptor::enumeration("Mode", ["Idle", "Busy"]));
    DispatchRegistry::with_builtins(types).expect("builtins")
}

#[test]
fn saved_packages_run_against_a_fresh_registry() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sum.rvpk");

    let authoring = registry();
    let program = assemble(SOURCE, &authoring).expect("assemble");
    assert!(program
        .functions
        .iter()
        .any(|name| name == "Widen::Result:int64,Value:int32"));
    program.save_to_path(&path).expect("save");

    let loaded = Program::load_from_path(&path).expect("load");
    assert_eq!(loaded, program);

    let runtime = registry();
    assert!(runtime.find_function("IntToEnum::Result:Mode,Value:int32").is_none());
    let mut vm = RigVm::new(Arc::new(loaded), &runtime, VmOptions::default().with_profile(true)).expect("bind");
    let outcome = vm.execute("main").expect("run");
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(vm.work("total"), Some(&Value::Int64(10)));
    assert_eq!(vm.work("mode"), Some(&Value::Enum(1)));
    assert_eq!(runtime.factory_instance_count("IntToEnum"), 1);

    let profile = vm.profile().expect("profile");
    assert_eq!(profile.instructions(), outcome.instructions_executed);
    assert_eq!(profile.opcodes.get("jump_if"), Some(&5));
}

#[test]
fn packages_need_their_types_registered() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sum.rvpk");
    assemble(SOURCE, &registry())
        .expect("assemble")
        .save_to_path(&path)
        .expect("save");

    let bare = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).expect("builtins");
    let loaded = Program::load_from_path(&path).expect("load");
    assert_eq!(
        RigVm::new(Arc::new(loaded), &bare, VmOptions::default()).err(),
        Some(RigVmError::UnknownType("Mode".into()))
    );
}

#[test]
fn missing_and_corrupt_files_are_package_errors() {
    let dir = tempdir().expect("tempdir");
    assert!(matches!(
        Program::load_from_path(dir.path().join("absent.rvpk")),
        Err(RigVmError::Package(_))
    ));

    let path = dir.path().join("corrupt.rvpk");
    std::fs::write(&path, b"RVPK\x01\x00\xff\xff\xff\xff").expect("write");
    assert!(matches!(Program::load_from_path(&path), Err(RigVmError::Package(_))));
}
