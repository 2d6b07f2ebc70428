//! Subcommand bodies. Each writes its report to the given writer so the
//! binary and the tests share one code path.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rigvm_core::asm::format_value;
use rigvm_core::dispatch::describe_type_map;
use rigvm_core::vm::ProfileSummary;
use rigvm_core::{
    builtin_metadata, disassemble, Diagnostic, DispatchRegistry, ExecutionOutcome, RigVm, Value, VmOptions,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::host::{apply_externals, load_program};

pub struct RunRequest<'a> {
    pub input: &'a Path,
    pub entry: &'a str,
    pub externals: &'a [String],
    pub options: VmOptions,
    pub repeat: usize,
    pub json: bool,
}

#[derive(Serialize)]
struct RunReport<'a> {
    outcome: &'a ExecutionOutcome,
    work: BTreeMap<String, serde_json::Value>,
    externals: BTreeMap<String, serde_json::Value>,
    memory_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<ProfileSummary>,
}

/// Assembles `input` and writes a package to `output`.
pub fn assemble_file(
    input: &Path,
    output: &Path,
    packed: bool,
    dispatch: &DispatchRegistry,
    out: &mut impl Write,
) -> Result<()> {
    let mut program = load_program(input, dispatch)?;
    if packed {
        program.byte_code.pack_byte_code()?;
    }
    program
        .save_to_path(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(input = %input.display(), output = %output.display(), "assembled");
    writeln!(
        out,
        "{}: {} instructions, {} bytes, {} functions, hash {:08x}",
        output.display(),
        program.byte_code.num_instructions(),
        program.byte_code.num_bytes(),
        program.functions.len(),
        program.byte_code.byte_code_hash()
    )?;
    Ok(())
}

pub fn run_file(request: RunRequest<'_>, dispatch: &DispatchRegistry, out: &mut impl Write) -> Result<ExecutionOutcome> {
    let program = load_program(request.input, dispatch)?;
    let mut vm = RigVm::new(Arc::new(program), dispatch, request.options)
        .with_context(|| format!("failed to load {}", request.input.display()))?;
    vm.set_diagnostic_hook(Arc::new(|diagnostic: &Diagnostic| {
        warn!(instruction = diagnostic.instruction, slice = diagnostic.slice, "{}", diagnostic.error);
    }));
    apply_externals(&mut vm, dispatch, request.externals)?;

    let mut outcome = None;
    for _ in 0..request.repeat.max(1) {
        outcome = Some(vm.execute(request.entry)?);
    }
    let outcome = outcome.ok_or_else(|| anyhow!("entry '{}' never ran", request.entry))?;

    if request.json {
        let report = RunReport {
            outcome: &outcome,
            work: registers(&vm, Registers::Work),
            externals: registers(&vm, Registers::External),
            memory_hash: format!("{:08x}", vm.memory_hash()),
            profile: vm.profile().map(|profile| profile.summary()),
        };
        let json = serde_json::to_string_pretty(&report).map_err(|err| anyhow!("failed to serialise run report: {err}"))?;
        writeln!(out, "{json}")?;
        return Ok(outcome);
    }

    match outcome.exit_instruction {
        Some(at) => writeln!(
            out,
            "{}: {} instructions, exit at {at}",
            request.entry, outcome.instructions_executed
        )?,
        None => writeln!(out, "{}: {} instructions", request.entry, outcome.instructions_executed)?,
    }
    for diagnostic in &outcome.diagnostics {
        writeln!(
            out,
            "  warning @{} slice {}: {}",
            diagnostic.instruction, diagnostic.slice, diagnostic.error
        )?;
    }
    if outcome.dropped_diagnostics > 0 {
        writeln!(out, "  ({} more warnings dropped)", outcome.dropped_diagnostics)?;
    }
    for register in vm.program().work.registers() {
        let text = if register.sliced {
            let slices = vm.work_slices(&register.name).unwrap_or(&[]);
            let parts: Vec<_> = slices.iter().map(display_value).collect();
            format!("[{}]", parts.join(", "))
        } else {
            vm.work(&register.name).map(display_value).unwrap_or_default()
        };
        writeln!(out, "  ${} = {text}", register.name)?;
    }
    if let Some(profile) = vm.profile() {
        let summary = profile.summary();
        writeln!(out, "profile: {} instructions", summary.instructions)?;
        for (opcode, count) in &summary.opcodes {
            writeln!(out, "  {opcode:<18}{count}")?;
        }
    }
    Ok(outcome)
}

pub fn disassemble_file(input: &Path, dispatch: &DispatchRegistry, out: &mut impl Write) -> Result<()> {
    let program = load_program(input, dispatch)?;
    let text = disassemble(&program).with_context(|| format!("failed to disassemble {}", input.display()))?;
    out.write_all(text.as_bytes())?;
    Ok(())
}

pub fn hash_file(input: &Path, dispatch: &DispatchRegistry, out: &mut impl Write) -> Result<()> {
    let program = load_program(input, dispatch)?;
    writeln!(out, "{:08x}  {}", program.byte_code.byte_code_hash(), input.display())?;
    Ok(())
}

/// Lists templates with their live permutations, then plain functions.
pub fn list_functions(dispatch: &DispatchRegistry, filter: Option<&str>, json: bool, out: &mut impl Write) -> Result<()> {
    let metadata = builtin_metadata();
    let types = dispatch.types();
    let mut templates = dispatch.templates();
    templates.retain(|template| filter.map_or(true, |name| template.name() == name));
    templates.sort_by(|a, b| a.name().cmp(b.name()));

    let mut plain: Vec<_> = dispatch
        .functions()
        .into_iter()
        .filter(|record| record.template().is_none() && record.factory().is_none())
        .filter(|record| filter.map_or(true, |name| record.name() == name))
        .collect();
    plain.sort_by(|a, b| a.name().cmp(b.name()));

    if json {
        let templates: Vec<_> = templates
            .iter()
            .map(|template| {
                json!({
                    "name": template.name(),
                    "factory": template.is_factory(),
                    "arguments": template
                        .arguments()
                        .iter()
                        .map(|argument| json!({ "name": argument.name, "direction": argument.direction.name() }))
                        .collect::<Vec<_>>(),
                    "permutations": template
                        .permutations()
                        .iter()
                        .map(|permutation| describe_type_map(&permutation.types, types))
                        .collect::<Vec<_>>(),
                    "metadata": metadata.lookup(template.name()),
                })
            })
            .collect();
        let functions: Vec<_> = plain
            .iter()
            .map(|record| {
                json!({
                    "name": record.name(),
                    "arguments": record
                        .arguments()
                        .iter()
                        .map(|argument| json!({
                            "name": argument.name,
                            "type": types.type_name(argument.type_index),
                            "direction": argument.direction.name(),
                        }))
                        .collect::<Vec<_>>(),
                    "metadata": metadata.lookup(record.name()),
                })
            })
            .collect();
        let json = serde_json::to_string_pretty(&json!({ "templates": templates, "functions": functions }))
            .map_err(|err| anyhow!("failed to serialise function list: {err}"))?;
        writeln!(out, "{json}")?;
        return Ok(());
    }

    for template in &templates {
        let arguments: Vec<_> = template.arguments().iter().map(|argument| argument.name.as_str()).collect();
        let category = metadata
            .lookup(template.name())
            .map(|entry| entry.category.as_str())
            .unwrap_or("-");
        writeln!(
            out,
            "{} ({}) [{category}] {} permutations",
            template.name(),
            arguments.join(", "),
            template.permutations().len()
        )?;
        for permutation in template.permutations() {
            writeln!(out, "  {}", describe_type_map(&permutation.types, types))?;
        }
    }
    for record in &plain {
        let arguments: Vec<_> = record
            .arguments()
            .iter()
            .map(|argument| format!("{}: {}", argument.name, types.type_name(argument.type_index)))
            .collect();
        writeln!(out, "{}({})", record.name(), arguments.join(", "))?;
    }
    Ok(())
}

/// Writes a commented default config to `path`.
pub fn write_default_config(path: &Path, out: &mut impl Write) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = crate::config::Config::default().to_toml()?;
    fs::write(path, text).with_context(|| format!("writing configuration to {}", path.display()))?;
    writeln!(out, "wrote {}", path.display())?;
    Ok(())
}

#[derive(Clone, Copy)]
enum Registers {
    Work,
    External,
}

fn registers(vm: &RigVm, which: Registers) -> BTreeMap<String, serde_json::Value> {
    let layout = match which {
        Registers::Work => &vm.program().work,
        Registers::External => &vm.program().externals,
    };
    layout
        .registers()
        .iter()
        .map(|register| {
            let value = match which {
                Registers::Work if register.sliced => vm.work_slices(&register.name).map(|slices| json!(slices)),
                Registers::Work => vm.work(&register.name).map(|value| json!(value)),
                Registers::External => vm.external(&register.name).map(|value| json!(value)),
            };
            (register.name.clone(), value.unwrap_or(serde_json::Value::Null))
        })
        .collect()
}

fn display_value(value: &Value) -> String {
    format_value(value).unwrap_or_else(|| format!("{value:?}"))
}
