//=====================================================
// RigVM Registries
//=====================================================
// Goal: Shared type and dispatch registries under concurrent use
// Objective: Stable indices across threads, change events and
//            permutation sets that follow type removal
//=====================================================

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use rigvm_core::registry::RegistryEvent;
use rigvm_core::{
    assemble, DispatchRegistry, RigVm, RigVmError, TypeDescriptor, TypeIndex, TypeRegistry, Value, VmOptions,
};

#[test]
fn concurrent_registration_agrees_on_indices() {
    let types = Arc::new(TypeRegistry::new());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let types = Arc::clone(&types);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..16)
                    .map(|n| {
                        let name = format!("Mode{}", (n + worker) % 16);
                        let index = types.find_or_add_type(&TypeDescriptor::enumeration(name.clone(), ["A", "B"]));
                        (name, index)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = std::collections::HashMap::new();
    for handle in handles {
        for (name, index) in handle.join().expect("worker") {
            assert!(index.is_valid());
            let first = *seen.entry(name.clone()).or_insert(index);
            assert_eq!(first, index, "{name} registered twice");
        }
    }
    assert_eq!(seen.len(), 16);
    for (name, index) in seen {
        assert_eq!(types.get_type_index_by_name(&name), index);
        assert!(types.is_array_type(types.get_array_type_of(index)));
    }
    assert_eq!(types.lock_count(), 0);
}

#[test]
fn readers_see_consistent_types_while_writers_add() {
    let types = Arc::new(TypeRegistry::new());
    let writer = {
        let types = Arc::clone(&types);
        thread::spawn(move || {
            for n in 0..64 {
                types.find_or_add_type(&TypeDescriptor::enumeration(format!("Layer{n}"), ["Base", "Top"]));
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let types = Arc::clone(&types);
            thread::spawn(move || {
                for _ in 0..200 {
                    assert_eq!(types.get_type_index_by_name("int32"), TypeIndex::INT32);
                    assert_eq!(types.type_name(TypeIndex::FLOAT_ARRAY), "array<float>");
                    assert!(types.can_match_types(TypeIndex::INT32, TypeIndex::INT64, true));
                    for raw in 0..types.index_bound() as u32 {
                        let index = TypeIndex::from_raw(raw);
                        if types.get_type(index).is_none() {
                            continue;
                        }
                        let array = types.get_array_type_of(index);
                        if array.is_valid() {
                            assert_eq!(types.get_base_type_of(array), index, "array of {index}");
                        }
                    }
                }
            })
        })
        .collect();
    writer.join().expect("writer");
    for reader in readers {
        reader.join().expect("reader");
    }
    assert!(types.get_type_index_by_name("Layer63").is_valid());
}

#[test]
fn removal_publishes_an_event_with_the_array_forms() {
    let types = TypeRegistry::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let id = types.subscribe(Arc::new(move |event: &RegistryEvent| {
        sink.lock().expect("events").push(event.clone());
    }));

    let gait = types.find_or_add_type(&TypeDescriptor::enumeration("Gait", ["Walk", "Run"]).with_path("/plugin"));
    let gaits = types.get_array_type_of(gait);
    assert!(types.remove_type("/plugin"));
    assert!(!types.remove_type("/plugin"));
    assert!(types.get_type(gait).is_none());
    assert!(types.get_type(gaits).is_none());
    assert!(!types.get_type_index_by_name("Gait").is_valid());

    let events = events.lock().expect("events");
    let removed = events.iter().find_map(|event| match event {
        RegistryEvent::TypesRemoved { path, indices } => Some((path.clone(), indices.clone())),
        _ => None,
    });
    let (path, indices) = removed.expect("removal event");
    assert_eq!(path, "/plugin");
    assert!(indices.contains(&gait) && indices.contains(&gaits));
    drop(events);
    assert!(types.unsubscribe(id));
}

#[test]
fn factory_permutations_follow_registered_enums() {
    let types = Arc::new(TypeRegistry::new());
    let dispatch = DispatchRegistry::with_builtins(Arc::clone(&types)).expect("builtins");
    let before = dispatch.permutations("IntToEnum").len();

    let gait = types.find_or_add_type(&TypeDescriptor::enumeration("Gait", ["Walk", "Run"]).with_path("/plugin"));
    types.find_or_add_type(&TypeDescriptor::enumeration("Side", ["Left", "Right"]));
    assert_eq!(dispatch.permutations("IntToEnum").len(), before + 2);

    let source = "
.literals
    one int32 1
.end
.work
    gait Gait
.end
.entry main
    dispatch IntToEnum Result=Gait @one $gait
.end
";
    let program = Arc::new(assemble(source, &dispatch).expect("assemble"));
    assert_eq!(program.functions, vec!["IntToEnum::Result:Gait,Value:int32".to_string()]);
    let mut vm = RigVm::new(Arc::clone(&program), &dispatch, VmOptions::default()).expect("load");
    vm.execute("main").expect("run");
    assert_eq!(vm.work("gait"), Some(&Value::Enum(1)));
    assert_eq!(dispatch.factory_instance_count("IntToEnum"), 1);

    assert!(types.remove_type("/plugin"));
    assert!(gait.is_valid());
    assert_eq!(dispatch.permutations("IntToEnum").len(), before + 1);
    let record = dispatch
        .find_function("IntToEnum::Result:Gait,Value:int32")
        .expect("published record");
    assert!(!dispatch.is_function_valid(&record));
    assert!(matches!(
        RigVm::new(program, &dispatch, VmOptions::default()),
        Err(RigVmError::UnknownType(_))
    ));
}

#[test]
fn out_of_range_enum_ordinals_are_soft_errors() {
    let types = Arc::new(TypeRegistry::new());
    let dispatch = DispatchRegistry::with_builtins(Arc::clone(&types)).expect("builtins");
    types.find_or_add_type(&TypeDescriptor::enumeration("Side", ["Left", "Right"]));
    let source = "
.literals
    five int32 5
.end
.work
    side Side Right
.end
.entry main
    dispatch IntToEnum Result=Side @five $side
.end
";
    let program = assemble(source, &dispatch).expect("assemble");
    let mut vm = RigVm::new(Arc::new(program), &dispatch, VmOptions::default()).expect("load");
    let outcome = vm.execute("main").expect("run");
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(vm.work("side"), Some(&Value::Enum(0)));
}
