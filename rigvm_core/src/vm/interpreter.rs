use std::sync::Arc;

use tracing::debug;

use crate::bytecode::{
    BeginBlockOp, ComparisonOp, CopyKind, CopyOp, ExecuteOp, InvokeEntryOp, JumpToBranchOp, Op, Opcode, Operand,
    RunInstructionsOp, UnaryOp,
};
use crate::error::{RigVmError, RigVmResult};
use crate::memory::{coerce_value, MemoryHandle, MemorySet, Value};
use crate::registry::TypeRegistry;

use super::context::{ExecuteContext, SoftError};
use super::invocation::Invocation;
use super::loader::LoadedProgram;
use super::{ExecutionProfile, VmOptions};

/// Mutable state of one VM instance.
pub(crate) struct Machine {
    pub(crate) types: Arc<TypeRegistry>,
    pub(crate) memory: MemorySet,
    pub(crate) context: ExecuteContext,
    pub(crate) profile: Option<ExecutionProfile>,
    pub(crate) options: VmOptions,
    pub(crate) executed: u64,
}

/// How a range of instructions finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Fell off the end of the range.
    Completed,
    /// Reached an Exit at the given instruction.
    Exit(usize),
}

enum Step {
    Next(usize),
    /// Carries the instruction of the Exit that ended the scope.
    Exit(usize),
}

impl Machine {
    pub(crate) fn handle(&self, instruction: usize, operand: Operand) -> RigVmResult<MemoryHandle> {
        self.memory
            .resolve(operand, self.context.slice_index())
            .ok_or_else(|| RigVmError::structural(instruction, format!("operand {operand} does not resolve")))
    }

    pub(crate) fn read(&self, instruction: usize, operand: Operand) -> RigVmResult<&Value> {
        let handle = self.handle(instruction, operand)?;
        self.memory
            .read(&handle)
            .ok_or_else(|| RigVmError::structural(instruction, format!("operand {operand} is not readable")))
    }

    /// Stores `value` through `handle`, widening numerics to the register type.
    pub(crate) fn write(&mut self, instruction: usize, handle: &MemoryHandle, value: Value) -> RigVmResult<()> {
        let kind = value.kind_name();
        let value = coerce_value(&self.types, handle.type_index(), value).ok_or_else(|| {
            RigVmError::structural(
                instruction,
                format!("cannot store {kind} into {}", self.types.type_name(handle.type_index())),
            )
        })?;
        let slot = self.memory.write(handle).ok_or_else(|| {
            RigVmError::structural(
                instruction,
                format!("{} register {} is not writable", handle.memory_type().name(), handle.register_index()),
            )
        })?;
        *slot = value;
        Ok(())
    }
}

/// Runs `[start, end)` until an Exit, or until control leaves the range.
/// Slice scopes opened inside the range are closed when it ends.
pub(crate) fn run_range(
    loaded: &LoadedProgram,
    machine: &mut Machine,
    start: usize,
    end: usize,
) -> RigVmResult<Flow> {
    let slice_depth = machine.context.slice_depth();
    let mut ip = start;
    let flow = loop {
        if ip < start || ip >= end {
            break Flow::Completed;
        }
        match step(loaded, machine, ip)? {
            Step::Next(next) => ip = next,
            Step::Exit(at) => break Flow::Exit(at),
        }
    };
    machine.context.truncate_slices(slice_depth);
    Ok(flow)
}

/// Runs a nested scope. `None` when the nesting limit stopped it.
pub(crate) fn run_nested(
    loaded: &LoadedProgram,
    machine: &mut Machine,
    instruction: usize,
    start: usize,
    end: usize,
) -> RigVmResult<Option<Flow>> {
    let depth = machine.context.depth();
    if depth >= machine.options.max_entry_depth {
        machine.context.report(instruction, SoftError::DepthExceeded { depth });
        return Ok(None);
    }
    machine.context.enter();
    let flow = run_range(loaded, machine, start, end);
    machine.context.leave();
    flow.map(Some)
}

fn step(loaded: &LoadedProgram, machine: &mut Machine, ip: usize) -> RigVmResult<Step> {
    let op = loaded
        .op(ip)
        .ok_or_else(|| RigVmError::structural(ip, "instruction pointer out of range"))?;
    machine.executed += 1;
    if let Some(profile) = machine.profile.as_mut() {
        profile.record_opcode(op.opcode());
    }
    if machine.options.trace {
        debug!(ip, slice = machine.context.slice_index(), op = op.opcode().name(), "step");
    }

    let next = ip + 1;
    match op {
        Op::Unary(op) => unary(machine, ip, op).map(|_| Step::Next(next)),
        Op::Copy(op) => copy(machine, ip, op).map(|_| Step::Next(next)),
        Op::Comparison(op) => compare(machine, ip, op).map(|_| Step::Next(next)),
        Op::Jump(op) => jump_target(ip, op.opcode, op.target).map(Step::Next),
        Op::JumpIf(op) => {
            let value = machine.read(ip, op.arg)?.as_bool();
            let value = value.ok_or_else(|| RigVmError::structural(ip, format!("{} is not a bool", op.arg)))?;
            if value == op.condition {
                jump_target(ip, op.opcode, op.target).map(Step::Next)
            } else {
                Ok(Step::Next(next))
            }
        }
        Op::Execute(op) => execute(loaded, machine, ip, op).map(|_| Step::Next(next)),
        Op::Exit => Ok(Step::Exit(ip)),
        Op::BeginBlock(op) => begin_block(machine, ip, op).map(|_| Step::Next(next)),
        Op::EndBlock => match machine.context.pop_slice() {
            Some(_) => Ok(Step::Next(next)),
            None => Err(RigVmError::structural(ip, "end_block without begin_block")),
        },
        Op::InvokeEntry(op) => invoke_entry(loaded, machine, ip, op).map(|_| Step::Next(next)),
        Op::JumpToBranch(op) => jump_to_branch(loaded, machine, ip, op),
        Op::RunInstructions(op) => run_instructions(loaded, machine, ip, op),
        Op::SetupTraits(op) => {
            machine.context.set_traits(op.traits.clone());
            Ok(Step::Next(next))
        }
    }
}

fn jump_target(ip: usize, opcode: Opcode, stored: u32) -> RigVmResult<usize> {
    opcode
        .jump_mode()
        .and_then(|mode| mode.resolve(ip, stored))
        .ok_or_else(|| RigVmError::structural(ip, format!("jump target {stored} out of range")))
}

fn unary(machine: &mut Machine, ip: usize, op: &UnaryOp) -> RigVmResult<()> {
    let handle = machine.handle(ip, op.arg)?;
    let value = match op.opcode {
        Opcode::Zero => machine
            .types
            .default_value(handle.type_index())
            .ok_or_else(|| RigVmError::structural(ip, format!("{} has no zero value", op.arg)))?,
        Opcode::BoolFalse => Value::Bool(false),
        Opcode::BoolTrue => Value::Bool(true),
        Opcode::Increment | Opcode::Decrement => {
            let up = op.opcode == Opcode::Increment;
            match machine.memory.read(&handle) {
                Some(Value::Int32(v)) => Value::Int32(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
                Some(Value::Int64(v)) => Value::Int64(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
                Some(Value::UInt8(v)) => Value::UInt8(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
                _ => return Err(RigVmError::structural(ip, format!("{} is not an integer", op.arg))),
            }
        }
        other => return Err(RigVmError::structural(ip, format!("{} is not a unary op", other.name()))),
    };
    machine.write(ip, &handle, value)
}

fn copy(machine: &mut Machine, ip: usize, op: &CopyOp) -> RigVmResult<()> {
    let source_handle = machine.handle(ip, op.source)?;
    let source = machine.read(ip, op.source)?;
    let mismatch = || RigVmError::structural(ip, format!("{} does not hold the value {} expects", op.source, op.kind.name()));
    let value = match op.kind {
        CopyKind::Default => machine.types.copy_value(source_handle.type_index(), source),
        CopyKind::FloatToDouble => Value::Double(f64::from(source.as_f32().ok_or_else(mismatch)?)),
        CopyKind::DoubleToFloat => Value::Float(source.as_f64().ok_or_else(mismatch)? as f32),
        CopyKind::Int32ToInt64 => Value::Int64(i64::from(source.as_i32().ok_or_else(mismatch)?)),
        CopyKind::Int32ToDouble => Value::Double(f64::from(source.as_i32().ok_or_else(mismatch)?)),
    };
    let target = machine.handle(ip, op.target)?;
    machine.write(ip, &target, value)
}

fn numeric_equal(a: &Value, b: &Value) -> Option<bool> {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => Some(a == b),
        _ => Some(a.as_f64()? == b.as_f64()?),
    }
}

fn compare(machine: &mut Machine, ip: usize, op: &ComparisonOp) -> RigVmResult<()> {
    let a_type = machine.handle(ip, op.a)?.type_index();
    let b_type = machine.handle(ip, op.b)?.type_index();
    let a = machine.read(ip, op.a)?;
    let b = machine.read(ip, op.b)?;
    let equal = if a_type == b_type {
        machine.types.values_equal(a_type, a, b)
    } else {
        numeric_equal(a, b).unwrap_or(a == b)
    };
    let result = machine.handle(ip, op.result)?;
    let value = if op.opcode == Opcode::NotEquals { !equal } else { equal };
    machine.write(ip, &result, Value::Bool(value))
}

fn execute(loaded: &LoadedProgram, machine: &mut Machine, ip: usize, op: &ExecuteOp) -> RigVmResult<()> {
    let prepared = loaded
        .execute(ip)
        .ok_or_else(|| RigVmError::structural(ip, "execute was not prepared at load"))?;
    if let Some(profile) = machine.profile.as_mut() {
        profile.record_function(prepared.function.name());
    }
    let predicates = loaded.program().byte_code.predicate_branches_for(op);
    let function = prepared.function.function();
    let mut invocation = Invocation::new(loaded, machine, ip, prepared, &op.operands, predicates);
    function(&mut invocation)
}

fn begin_block(machine: &mut Machine, ip: usize, op: &BeginBlockOp) -> RigVmResult<()> {
    let count = machine.read(ip, op.count)?.as_i64();
    let index = machine.read(ip, op.index)?.as_i64();
    let (Some(count), Some(index)) = (count, index) else {
        return Err(RigVmError::structural(ip, "begin_block needs int32 count and index"));
    };
    let limit = machine.options.max_slices;
    let slice = match usize::try_from(index) {
        Ok(slice) if index < count && slice < limit => slice,
        _ => {
            let count = count.min(i64::try_from(limit).unwrap_or(i64::MAX));
            machine.context.report(ip, SoftError::SliceOutOfRange { index, count });
            0
        }
    };
    machine.context.push_slice(slice);
    Ok(())
}

fn invoke_entry(loaded: &LoadedProgram, machine: &mut Machine, ip: usize, op: &InvokeEntryOp) -> RigVmResult<()> {
    let code = &loaded.program().byte_code;
    let name = code
        .name(op.entry_name)
        .ok_or_else(|| RigVmError::structural(ip, "entry name out of range"))?;
    let (start, end) = code
        .find_entry_index(name)
        .and_then(|index| code.entry_range(index))
        .ok_or_else(|| RigVmError::UnknownEntry(name.to_string()))?;
    debug!(ip, entry = name, "invoke entry");
    let traits = machine.context.take_traits();
    let flow = run_nested(loaded, machine, ip, start, end);
    machine.context.set_traits(traits);
    flow.map(|_| ())
}

fn jump_to_branch(loaded: &LoadedProgram, machine: &mut Machine, ip: usize, op: &JumpToBranchOp) -> RigVmResult<Step> {
    let label = machine.read(ip, op.arg)?.as_str().map(str::to_string);
    let label = label.ok_or_else(|| RigVmError::structural(ip, format!("{} is not a name", op.arg)))?;
    let branches = loaded.program().byte_code.branch_infos_for(op);
    let resume = branches
        .iter()
        .map(|branch| branch.last as usize)
        .max()
        .unwrap_or(ip + 1)
        .max(ip + 1);
    match branches.iter().find(|branch| branch.label == label) {
        Some(branch) => {
            let flow = run_nested(loaded, machine, ip, branch.first as usize, branch.last as usize)?;
            if let Some(Flow::Exit(at)) = flow {
                return Ok(Step::Exit(at));
            }
        }
        None => machine.context.report(ip, SoftError::UnknownBranch(label)),
    }
    Ok(Step::Next(resume))
}

fn run_instructions(
    loaded: &LoadedProgram,
    machine: &mut Machine,
    ip: usize,
    op: &RunInstructionsOp,
) -> RigVmResult<Step> {
    if !op.guard.is_none() {
        let guard = machine.handle(ip, op.guard)?;
        if machine.memory.read(&guard).and_then(Value::as_bool) == Some(true) {
            return Ok(Step::Next(ip + 1));
        }
        machine.write(ip, &guard, Value::Bool(true))?;
    }
    match run_nested(loaded, machine, ip, op.start as usize, op.end as usize)? {
        Some(Flow::Exit(at)) => Ok(Step::Exit(at)),
        _ => Ok(Step::Next(ip + 1)),
    }
}
