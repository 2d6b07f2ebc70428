use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::{CopyKind, Op, Operand};
use crate::memory::{MemoryLayout, MemoryType};
use crate::vm::Program;

use super::literal::{format_value, quote};
use super::AsmError;

/// Renders a program as assembly that [`assemble`](super::assemble) reads
/// back into an equal program. Every instruction referenced by a jump or a
/// range gets an `L<index>` label. Register defaults with no literal form
/// (structs, objects) are left out.
pub fn disassemble(program: &Program) -> Result<String, AsmError> {
    let code = &program.byte_code;
    let ops = code.ops()?;
    let count = ops.len();

    let mut output = String::new();
    for (title, layout) in [
        (".literals", &program.literals),
        (".work", &program.work),
        (".externals", &program.externals),
    ] {
        if layout.is_empty() {
            continue;
        }
        writeln!(&mut output, "{title}")?;
        for register in layout.registers() {
            write!(&mut output, "    {} {}", register.name, register.type_name)?;
            if register.sliced {
                output.push_str(" sliced");
            }
            if let Some(value) = register.default.as_ref().and_then(format_value) {
                write!(&mut output, " {value}")?;
            }
            output.push('\n');
        }
        writeln!(&mut output, ".end")?;
        output.push('\n');
    }

    let mut labels = BTreeSet::new();
    for (index, op) in ops.iter().enumerate() {
        match op {
            Op::Jump(jump) => labels.extend(jump.opcode.jump_mode().and_then(|mode| mode.resolve(index, jump.target))),
            Op::JumpIf(jump) => labels.extend(jump.opcode.jump_mode().and_then(|mode| mode.resolve(index, jump.target))),
            Op::Execute(execute) => {
                for predicate in code.predicate_branches_for(execute) {
                    labels.extend([predicate.first as usize, predicate.last as usize]);
                }
            }
            Op::JumpToBranch(jump) => {
                for branch in code.branch_infos_for(jump) {
                    labels.extend([branch.first as usize, branch.last as usize]);
                }
            }
            Op::RunInstructions(run) => labels.extend([run.start as usize, run.end as usize]),
            _ => {}
        }
    }
    labels.retain(|index| *index <= count);
    let target = |index: usize| {
        if labels.contains(&index) {
            format!("L{index}")
        } else {
            index.to_string()
        }
    };

    let mut entries: Vec<_> = code.entries().iter().collect();
    entries.sort_by_key(|entry| entry.instruction_index);
    let mut entries = entries.into_iter().peekable();
    let mut open = false;

    for index in 0..=count {
        while let Some(entry) = entries.next_if(|entry| entry.instruction_index as usize == index) {
            if open {
                writeln!(&mut output, ".end")?;
                output.push('\n');
            }
            writeln!(&mut output, ".entry {}", display_name(&entry.name))?;
            open = true;
        }
        if index == count {
            if labels.contains(&index) && open {
                writeln!(&mut output, "L{index}:")?;
            }
            break;
        }
        if !open {
            writeln!(&mut output, ".code")?;
            open = true;
        }
        if labels.contains(&index) {
            writeln!(&mut output, "L{index}:")?;
        }

        let op = &ops[index];
        let mnemonic = op.opcode().name();
        match op {
            Op::Unary(unary) => writeln!(&mut output, "    {mnemonic} {}", operand(program, unary.arg))?,
            Op::Copy(copy) => {
                write!(
                    &mut output,
                    "    {mnemonic} {} {}",
                    operand(program, copy.source),
                    operand(program, copy.target)
                )?;
                if copy.kind != CopyKind::Default {
                    write!(&mut output, " {}", copy.kind.name())?;
                }
                output.push('\n');
            }
            Op::Comparison(compare) => writeln!(
                &mut output,
                "    {mnemonic} {} {} {}",
                operand(program, compare.a),
                operand(program, compare.b),
                operand(program, compare.result)
            )?,
            Op::Jump(jump) => {
                let resolved = jump.opcode.jump_mode().and_then(|mode| mode.resolve(index, jump.target));
                let text = resolved.map(&target).unwrap_or_else(|| jump.target.to_string());
                writeln!(&mut output, "    {mnemonic} {text}")?;
            }
            Op::JumpIf(jump) => {
                let resolved = jump.opcode.jump_mode().and_then(|mode| mode.resolve(index, jump.target));
                let text = resolved.map(&target).unwrap_or_else(|| jump.target.to_string());
                writeln!(
                    &mut output,
                    "    {mnemonic} {} {} {text}",
                    operand(program, jump.arg),
                    jump.condition
                )?;
            }
            Op::Execute(execute) => {
                for predicate in code.predicate_branches_for(execute) {
                    writeln!(
                        &mut output,
                        "    .lazy {} {} {}",
                        predicate.argument_index,
                        target(predicate.first as usize),
                        target(predicate.last as usize)
                    )?;
                }
                let function = program
                    .functions
                    .get(execute.function_index as usize)
                    .map(|name| display_name(name))
                    .unwrap_or_else(|| format!("?{}", execute.function_index));
                write!(&mut output, "    {mnemonic} {function}")?;
                for argument in &execute.operands {
                    write!(&mut output, " {}", operand(program, *argument))?;
                }
                output.push('\n');
            }
            Op::Exit | Op::EndBlock => writeln!(&mut output, "    {mnemonic}")?,
            Op::BeginBlock(block) => writeln!(
                &mut output,
                "    {mnemonic} {} {}",
                operand(program, block.count),
                operand(program, block.index)
            )?,
            Op::InvokeEntry(invoke) => {
                let name = code.name(invoke.entry_name).unwrap_or("?");
                writeln!(&mut output, "    {mnemonic} {}", display_name(name))?;
            }
            Op::JumpToBranch(jump) => {
                for branch in code.branch_infos_for(jump) {
                    writeln!(
                        &mut output,
                        "    .branch {} {} {}",
                        display_name(&branch.label),
                        target(branch.first as usize),
                        target(branch.last as usize)
                    )?;
                }
                writeln!(&mut output, "    {mnemonic} {}", operand(program, jump.arg))?;
            }
            Op::RunInstructions(run) => {
                write!(
                    &mut output,
                    "    {mnemonic} {} {}",
                    target(run.start as usize),
                    target(run.end as usize)
                )?;
                if !run.guard.is_none() {
                    write!(&mut output, " {}", operand(program, run.guard))?;
                }
                output.push('\n');
            }
            Op::SetupTraits(traits) => {
                output.push_str("    ");
                output.push_str(mnemonic);
                for argument in &traits.traits {
                    write!(&mut output, " {}", operand(program, *argument))?;
                }
                output.push('\n');
            }
        }
    }
    if open {
        writeln!(&mut output, ".end")?;
    }
    Ok(output)
}

/// `$name[element]`, falling back to the register index when the layout has
/// no usable name.
fn operand(program: &Program, operand: Operand) -> String {
    let Some(memory_type) = operand.memory_type() else {
        return operand.to_string();
    };
    let layout: &MemoryLayout = match memory_type {
        MemoryType::Literal => &program.literals,
        MemoryType::Work => &program.work,
        MemoryType::External => &program.externals,
    };
    let register = match layout.get(operand.register_index() as usize) {
        Some(register) if is_bare_name(&register.name) => register.name.clone(),
        _ => return operand.to_string(),
    };
    match operand.register_offset() {
        Some(offset) => format!("{}{register}[{offset}]", memory_type.sigil()),
        None => format!("{}{register}", memory_type.sigil()),
    }
}

fn is_bare_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|ch: char| ch.is_ascii_digit())
        && !name.contains(|ch: char| ch.is_whitespace() || matches!(ch, '[' | ']' | '"' | '#'))
}

fn display_name(name: &str) -> String {
    if name.is_empty() || name.contains(|ch: char| ch.is_whitespace() || matches!(ch, '"' | '#')) {
        quote(name)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::asm::assemble;
    use crate::dispatch::DispatchRegistry;
    use crate::registry::TypeRegistry;

    const PROGRAM: &str = r#"
.literals
    count int32 3
    labels array<name> ["left", "right side"]
.end
.work
    squares int32 sliced
    index int32
    which name "right side"
    picked int32
    ran bool
.end
.externals
    scale double 1.5
.end

.entry main
    begin_block @count $index
    copy $index $squares
    end_block
    .branch left on_left after
    .branch "right side" on_right after
    jump_to_branch $which
on_left:
    inc $picked
on_right:
    dec $picked
after:
    run on_left on_right $ran
    invoke helper
    exit
.end

.entry "helper"
    .lazy 0 on_left on_right
    execute Log $picked
    traits %scale
.end
"#;

    #[test]
    fn disassembly_reassembles_to_the_same_program() {
        let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).unwrap();
        let program = assemble(PROGRAM, &dispatch).unwrap();
        let text = disassemble(&program).unwrap();
        assert!(text.contains("    .branch \"right side\" L5 L6\n"));
        assert!(text.contains("L4:\n    inc $picked\n"));
        assert!(text.contains("    .lazy 0 L4 L5\n    execute Log $picked\n"));
        assert!(text.contains(".end\n\n.entry helper\n"));

        let again = assemble(&text, &dispatch).unwrap();
        assert_eq!(again, program);
        assert_eq!(again.byte_code.byte_code_hash(), program.byte_code.byte_code_hash());
    }

    #[test]
    fn code_before_the_first_entry_gets_an_anonymous_block() {
        let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).unwrap();
        let program = assemble(".code\n    exit\n.end\n.entry tail\n    exit\n.end\n", &dispatch).unwrap();
        let text = disassemble(&program).unwrap();
        assert!(text.starts_with(".code\n    exit\n.end\n"));
        assert_eq!(assemble(&text, &dispatch).unwrap(), program);
    }
}
