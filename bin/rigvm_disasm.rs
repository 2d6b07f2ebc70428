use std::{env, path::Path};

use anyhow::{anyhow, Result};
use rigvm_core::{ByteCode, Op, Program};

/// Raw listing of a package: byte offsets, padding and decoded operations.
/// `rigvm disasm` prints reassemblable text instead.
fn main() -> Result<()> {
    let input = env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("no input file provided"))?;
    let program = Program::load_from_path(Path::new(&input))?;
    let code = &program.byte_code;

    println!(
        "{} instructions, {} bytes, {}, hash {:08x}",
        code.num_instructions(),
        code.num_bytes(),
        if code.is_aligned() { "aligned" } else { "packed" },
        code.byte_code_hash()
    );
    for (index, name) in program.functions.iter().enumerate() {
        println!("function {index}: {name}");
    }
    for entry in code.entries() {
        println!("entry {} @ {}", entry.name, entry.instruction_index);
    }
    println!();

    let instructions = code.instruction_list()?;
    let ops = code.ops()?;
    for (index, (instruction, op)) in instructions.iter().zip(&ops).enumerate() {
        println!(
            "  {:04} {:06}{}: {}",
            index,
            instruction.byte_code_index,
            padding(instruction.operand_alignment),
            format_op(code, &program, op)
        );
    }
    Ok(())
}

fn padding(alignment: u8) -> String {
    if alignment == 0 {
        "   ".to_string()
    } else {
        format!(" +{alignment}")
    }
}

fn format_op(code: &ByteCode, program: &Program, op: &Op) -> String {
    let name = op.opcode().name();
    match op {
        Op::Unary(unary) => format!("{name} {}", unary.arg),
        Op::Copy(copy) => format!("{name} {} -> {} ({})", copy.source, copy.target, copy.kind.name()),
        Op::Comparison(compare) => format!("{name} {} {} -> {}", compare.a, compare.b, compare.result),
        Op::Jump(jump) => format!("{name} {}", jump.target),
        Op::JumpIf(jump) => format!("{name} {} == {} -> {}", jump.arg, jump.condition, jump.target),
        Op::Execute(execute) => {
            let function = program
                .functions
                .get(execute.function_index as usize)
                .map(|name| name.as_str())
                .unwrap_or("<unknown>");
            let operands: Vec<_> = execute.operands.iter().map(|operand| operand.to_string()).collect();
            let lazy = code.predicate_branches_for(execute).len();
            if lazy == 0 {
                format!("{name} {function} ({})", operands.join(", "))
            } else {
                format!("{name} {function} ({}) lazy {lazy}", operands.join(", "))
            }
        }
        Op::Exit | Op::EndBlock => name.to_string(),
        Op::BeginBlock(block) => format!("{name} {} {}", block.count, block.index),
        Op::InvokeEntry(invoke) => format!("{name} {}", code.name(invoke.entry_name).unwrap_or("<unknown>")),
        Op::JumpToBranch(jump) => {
            let branches: Vec<_> = code
                .branch_infos_for(jump)
                .iter()
                .map(|branch| format!("{}=[{},{})", branch.label, branch.first, branch.last))
                .collect();
            format!("{name} {} {}", jump.arg, branches.join(" "))
        }
        Op::RunInstructions(run) => format!("{name} [{},{}) guard {}", run.start, run.end, run.guard),
        Op::SetupTraits(traits) => {
            let operands: Vec<_> = traits.traits.iter().map(|operand| operand.to_string()).collect();
            format!("{name} {}", operands.join(", "))
        }
    }
}
