//=====================================================
// RigVM Bytecode
//=====================================================
// Goal: Container encoding over generated instruction streams
// Objective: Save/load fidelity, packing and hash sensitivity
//=====================================================

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rigvm_core::{BranchInfo, ByteCode, CopyKind, JumpMode, Opcode, Operand, PredicateBranch};

fn random_operand(rng: &mut StdRng) -> Operand {
    let operand = match rng.gen_range(0..3) {
        0 => Operand::literal(rng.gen_range(0..16)),
        1 => Operand::work(rng.gen_range(0..16)),
        _ => Operand::external(rng.gen_range(0..16)),
    };
    if rng.gen_bool(0.2) {
        operand.with_offset(rng.gen_range(0..8))
    } else {
        operand
    }
}

fn random_program(seed: u64, length: usize) -> ByteCode {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut code = ByteCode::new();
    code.add_entry("main").expect("entry");
    for index in 0..length {
        if index == length / 2 {
            code.add_entry("second").expect("entry");
        }
        let span = |rng: &mut StdRng| {
            let first = rng.gen_range(0..length as u32);
            (first, rng.gen_range(first..=length as u32))
        };
        match rng.gen_range(0..13) {
            0 => {
                let opcode = [Opcode::Zero, Opcode::BoolFalse, Opcode::BoolTrue, Opcode::Increment, Opcode::Decrement]
                    [rng.gen_range(0..5)];
                code.add_unary_op(opcode, random_operand(&mut rng)).expect("unary");
            }
            1 => {
                let kind = CopyKind::ALL[rng.gen_range(0..CopyKind::ALL.len())];
                code.add_copy_op_with_kind(kind, random_operand(&mut rng), random_operand(&mut rng));
            }
            2 => {
                code.add_equals_op(random_operand(&mut rng), random_operand(&mut rng), random_operand(&mut rng));
            }
            3 => {
                code.add_not_equals_op(random_operand(&mut rng), random_operand(&mut rng), random_operand(&mut rng));
            }
            4 => {
                code.add_jump_op(JumpMode::Absolute, rng.gen_range(0..length as u32));
            }
            5 => {
                let arg = random_operand(&mut rng);
                code.add_jump_if_op(JumpMode::Forward, arg, rng.gen_range(0..4), rng.gen());
            }
            6 => {
                let operands: Vec<_> = (0..rng.gen_range(0..5)).map(|_| random_operand(&mut rng)).collect();
                let predicates = if !operands.is_empty() && rng.gen_bool(0.5) {
                    let (first, last) = span(&mut rng);
                    vec![PredicateBranch::new(0, operands[0], first, last)]
                } else {
                    Vec::new()
                };
                code.add_execute_op(rng.gen_range(0..8), &operands, &predicates)
                    .expect("execute");
            }
            7 => {
                code.add_exit_op();
            }
            8 => {
                code.add_begin_block_op(random_operand(&mut rng), random_operand(&mut rng));
                code.add_end_block_op();
            }
            9 => {
                code.add_invoke_entry_op(if rng.gen() { "main" } else { "second" });
            }
            10 => {
                let (first, last) = span(&mut rng);
                let branches = [BranchInfo::new("a", first, last), BranchInfo::new("b", last, last)];
                code.add_jump_to_branch_op(random_operand(&mut rng), &branches)
                    .expect("jump_to_branch");
            }
            11 => {
                let (first, last) = span(&mut rng);
                let guard = if rng.gen() { Operand::NONE } else { random_operand(&mut rng) };
                code.add_run_instructions_op(guard, first, last);
            }
            _ => {
                let traits: Vec<_> = (0..rng.gen_range(0..4)).map(|_| random_operand(&mut rng)).collect();
                code.add_setup_traits_op(&traits).expect("setup_traits");
            }
        }
    }
    code
}

#[test]
fn generated_programs_survive_save_and_load() {
    for seed in 0..24 {
        let code = random_program(seed, 40);
        let bytes = code.save();
        let loaded = ByteCode::load(&bytes).expect("load");
        assert_eq!(loaded, code, "seed {seed}");
        assert_eq!(loaded.save(), bytes, "seed {seed}");
        assert_eq!(loaded.byte_code_hash(), code.byte_code_hash(), "seed {seed}");
    }
}

#[test]
fn packing_keeps_operations_and_hash() {
    for seed in 100..116 {
        let aligned = random_program(seed, 32);
        let mut packed = aligned.clone();
        packed.pack_byte_code().expect("pack");
        assert!(!packed.is_aligned());
        assert!(packed.num_bytes() <= aligned.num_bytes());
        assert_eq!(packed.ops().expect("ops"), aligned.ops().expect("ops"), "seed {seed}");
        assert_eq!(packed.byte_code_hash(), aligned.byte_code_hash(), "seed {seed}");

        let reloaded = ByteCode::load(&packed.save()).expect("load packed");
        assert_eq!(reloaded, packed);
        let mut realigned = reloaded;
        realigned.align_byte_code().expect("align");
        assert_eq!(realigned, aligned, "seed {seed}");
    }
}

#[test]
fn hash_tracks_every_operand() {
    let mut base = ByteCode::new();
    base.add_copy_op(Operand::literal(0), Operand::work(1));
    base.add_equals_op(Operand::work(1), Operand::literal(2), Operand::work(3));
    let hash = base.byte_code_hash();

    let mut other = ByteCode::new();
    other.add_copy_op(Operand::literal(0), Operand::work(1));
    other.add_equals_op(Operand::work(1), Operand::literal(2), Operand::work(4));
    assert_ne!(other.byte_code_hash(), hash);

    let mut offset = ByteCode::new();
    offset.add_copy_op(Operand::literal(0), Operand::work(1).with_offset(0));
    offset.add_equals_op(Operand::work(1), Operand::literal(2), Operand::work(3));
    assert_ne!(offset.byte_code_hash(), hash);

    let mut same = ByteCode::new();
    same.add_copy_op(Operand::literal(0), Operand::work(1));
    same.add_equals_op(Operand::work(1), Operand::literal(2), Operand::work(3));
    assert_eq!(same.byte_code_hash(), hash);
}

#[test]
fn hash_covers_branch_labels_and_entries() {
    let build = |label: &str, entry: &str| {
        let mut code = ByteCode::new();
        code.add_entry(entry).expect("entry");
        code.add_jump_to_branch_op(Operand::work(0), &[BranchInfo::new(label, 1, 2)])
            .expect("jump_to_branch");
        code.add_exit_op();
        code
    };
    let hash = build("left", "main").byte_code_hash();
    assert_eq!(build("left", "main").byte_code_hash(), hash);
    assert_ne!(build("right", "main").byte_code_hash(), hash);
    assert_ne!(build("left", "other").byte_code_hash(), hash);
}

#[test]
fn truncated_buffers_are_rejected() {
    let bytes = random_program(7, 20).save();
    for cut in [0, 3, bytes.len() / 2, bytes.len() - 1] {
        assert!(ByteCode::load(&bytes[..cut]).is_err(), "cut at {cut}");
    }
}
