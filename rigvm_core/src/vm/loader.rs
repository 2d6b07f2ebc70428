use std::sync::Arc;

use tracing::debug;

use crate::bytecode::{CopyKind, Op, Opcode, Operand};
use crate::dispatch::{ArgumentDirection, DispatchRegistry, FunctionRecord};
use crate::error::{RigVmError, RigVmResult};
use crate::memory::{MemorySet, MemoryType};
use crate::registry::{TypeIndex, TypeRegistry};

use super::Program;

/// Execute instruction resolved at load time.
#[derive(Debug, Clone)]
pub(crate) struct PreparedExecute {
    pub(crate) function: Arc<FunctionRecord>,
    /// Name bound to each positional operand.
    pub(crate) argument_names: Vec<String>,
}

/// A program decoded, validated and bound to concrete functions. Shared
/// between VM instances; never mutated after loading.
#[derive(Debug)]
pub struct LoadedProgram {
    program: Arc<Program>,
    ops: Vec<Op>,
    executes: Vec<Option<PreparedExecute>>,
    functions: Vec<Arc<FunctionRecord>>,
}

impl LoadedProgram {
    /// Decodes every instruction and rejects structurally invalid programs:
    /// unresolvable operands, type mismatches, unknown functions, jumps
    /// outside the program and malformed ranges.
    pub fn load(program: Arc<Program>, dispatch: &DispatchRegistry, memory: &MemorySet) -> RigVmResult<Self> {
        program.byte_code.validate()?;
        let ops = program.byte_code.ops()?;
        let functions = program
            .functions
            .iter()
            .map(|name| dispatch.find_or_resolve_function(name))
            .collect::<RigVmResult<Vec<_>>>()?;

        let validator = Validator {
            program: &program,
            registry: dispatch.types(),
            memory,
            count: ops.len(),
        };
        let mut executes = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            validator.check(index, op)?;
            let prepared = match op {
                Op::Execute(execute) => {
                    let function = functions.get(execute.function_index as usize).ok_or_else(|| {
                        RigVmError::structural(index, format!("function index {} out of range", execute.function_index))
                    })?;
                    validator.check_call(index, function, dispatch, &execute.operands)?;
                    for predicate in program.byte_code.predicate_branches_for(execute) {
                        let argument = predicate.argument_index as usize;
                        if execute.operands.get(argument) != Some(&predicate.operand) {
                            return Err(RigVmError::structural(
                                index,
                                format!("lazy branch targets argument {argument} with a different operand"),
                            ));
                        }
                        validator.check_range(index, predicate.first, predicate.last)?;
                    }
                    let total = execute.operands.len();
                    let argument_names = (0..total)
                        .map(|operand| {
                            dispatch
                                .get_argument_name_for_operand_index(function, operand, total)
                                .unwrap_or_else(|| format!("Arg{operand}"))
                        })
                        .collect();
                    Some(PreparedExecute {
                        function: Arc::clone(function),
                        argument_names,
                    })
                }
                _ => None,
            };
            executes.push(prepared);
        }
        debug!(
            instructions = ops.len(),
            functions = functions.len(),
            hash = program.byte_code.byte_code_hash(),
            "loaded program"
        );
        Ok(Self {
            program,
            ops,
            executes,
            functions,
        })
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn op(&self, index: usize) -> Option<&Op> {
        self.ops.get(index)
    }

    pub fn functions(&self) -> &[Arc<FunctionRecord>] {
        &self.functions
    }

    pub(crate) fn execute(&self, index: usize) -> Option<&PreparedExecute> {
        self.executes.get(index).and_then(Option::as_ref)
    }
}

struct Validator<'a> {
    program: &'a Program,
    registry: &'a TypeRegistry,
    memory: &'a MemorySet,
    count: usize,
}

impl Validator<'_> {
    fn readable(&self, index: usize, operand: Operand) -> RigVmResult<TypeIndex> {
        self.memory
            .resolve(operand, 0)
            .map(|handle| handle.type_index())
            .ok_or_else(|| RigVmError::structural(index, format!("operand {operand} does not resolve")))
    }

    fn writable(&self, index: usize, operand: Operand) -> RigVmResult<TypeIndex> {
        if operand.memory_type() == Some(MemoryType::Literal) {
            return Err(RigVmError::structural(index, format!("literal operand {operand} is read-only")));
        }
        self.readable(index, operand)
    }

    fn expect(&self, index: usize, operand: Operand, actual: TypeIndex, expected: TypeIndex) -> RigVmResult<()> {
        if actual == expected {
            return Ok(());
        }
        Err(RigVmError::structural(
            index,
            format!(
                "operand {operand} is {} but {} is required",
                self.registry.type_name(actual),
                self.registry.type_name(expected)
            ),
        ))
    }

    fn check_range(&self, index: usize, first: u32, last: u32) -> RigVmResult<()> {
        if first > last || last as usize > self.count {
            return Err(RigVmError::structural(
                index,
                format!("range {first}..{last} outside program of {} instructions", self.count),
            ));
        }
        Ok(())
    }

    fn check_jump(&self, index: usize, opcode: Opcode, stored: u32) -> RigVmResult<()> {
        let target = opcode.jump_mode().and_then(|mode| mode.resolve(index, stored));
        match target {
            Some(target) if target <= self.count => Ok(()),
            _ => Err(RigVmError::structural(index, format!("jump target {stored} out of range"))),
        }
    }

    fn check(&self, index: usize, op: &Op) -> RigVmResult<()> {
        match op {
            Op::Unary(op) => {
                let type_index = self.writable(index, op.arg)?;
                match op.opcode {
                    Opcode::Zero if self.registry.default_value(type_index).is_none() => Err(
                        RigVmError::structural(index, format!("{} has no zero value", self.registry.type_name(type_index))),
                    ),
                    Opcode::BoolFalse | Opcode::BoolTrue => self.expect(index, op.arg, type_index, TypeIndex::BOOL),
                    Opcode::Increment | Opcode::Decrement => {
                        let integer = self
                            .registry
                            .get_type(type_index)
                            .map(|record| record.kind().is_integer() && !record.is_array())
                            .unwrap_or(false);
                        if integer {
                            Ok(())
                        } else {
                            Err(RigVmError::structural(index, format!("{} is not an integer", op.arg)))
                        }
                    }
                    _ => Ok(()),
                }
            }
            Op::Copy(op) => {
                let source = self.readable(index, op.source)?;
                let target = self.writable(index, op.target)?;
                let (from, to) = match op.kind {
                    CopyKind::Default => {
                        if self.registry.can_match_types(source, target, false) {
                            return Ok(());
                        }
                        return Err(RigVmError::structural(
                            index,
                            format!(
                                "cannot copy {} into {}",
                                self.registry.type_name(source),
                                self.registry.type_name(target)
                            ),
                        ));
                    }
                    CopyKind::FloatToDouble => (TypeIndex::FLOAT, TypeIndex::DOUBLE),
                    CopyKind::DoubleToFloat => (TypeIndex::DOUBLE, TypeIndex::FLOAT),
                    CopyKind::Int32ToInt64 => (TypeIndex::INT32, TypeIndex::INT64),
                    CopyKind::Int32ToDouble => (TypeIndex::INT32, TypeIndex::DOUBLE),
                };
                self.expect(index, op.source, source, from)?;
                self.expect(index, op.target, target, to)
            }
            Op::Comparison(op) => {
                let a = self.readable(index, op.a)?;
                let b = self.readable(index, op.b)?;
                if !self.registry.can_match_types(a, b, true) && !self.registry.can_match_types(b, a, true) {
                    return Err(RigVmError::structural(
                        index,
                        format!(
                            "cannot compare {} with {}",
                            self.registry.type_name(a),
                            self.registry.type_name(b)
                        ),
                    ));
                }
                let result = self.writable(index, op.result)?;
                self.expect(index, op.result, result, TypeIndex::BOOL)
            }
            Op::Jump(op) => self.check_jump(index, op.opcode, op.target),
            Op::JumpIf(op) => {
                self.check_jump(index, op.opcode, op.target)?;
                let condition = self.readable(index, op.arg)?;
                self.expect(index, op.arg, condition, TypeIndex::BOOL)
            }
            Op::Execute(_) | Op::Exit | Op::EndBlock => Ok(()),
            Op::BeginBlock(op) => {
                let count = self.readable(index, op.count)?;
                self.expect(index, op.count, count, TypeIndex::INT32)?;
                let slice = self.readable(index, op.index)?;
                self.expect(index, op.index, slice, TypeIndex::INT32)
            }
            Op::InvokeEntry(op) => {
                let name = self
                    .program
                    .byte_code
                    .name(op.entry_name)
                    .ok_or_else(|| RigVmError::structural(index, "entry name out of range"))?;
                match self.program.byte_code.find_entry_index(name) {
                    Some(_) => Ok(()),
                    None => Err(RigVmError::UnknownEntry(name.to_string())),
                }
            }
            Op::JumpToBranch(op) => {
                let label = self.readable(index, op.arg)?;
                if label != TypeIndex::NAME && label != TypeIndex::STRING {
                    return Err(RigVmError::structural(index, format!("branch label {} is not a name", op.arg)));
                }
                for branch in self.program.byte_code.branch_infos_for(op) {
                    self.check_range(index, branch.first, branch.last)?;
                }
                Ok(())
            }
            Op::RunInstructions(op) => {
                self.check_range(index, op.start, op.end)?;
                if op.guard.is_none() {
                    return Ok(());
                }
                let guard = self.writable(index, op.guard)?;
                self.expect(index, op.guard, guard, TypeIndex::BOOL)
            }
            Op::SetupTraits(op) => {
                for operand in &op.traits {
                    self.readable(index, *operand)?;
                }
                Ok(())
            }
        }
    }

    fn check_call(
        &self,
        index: usize,
        function: &FunctionRecord,
        dispatch: &DispatchRegistry,
        operands: &[Operand],
    ) -> RigVmResult<()> {
        if !dispatch.is_function_valid(function) {
            return Err(RigVmError::structural(
                index,
                format!("function '{}' refers to a removed type", function.name()),
            ));
        }
        let arguments = function.arguments();
        if operands.len() != arguments.len() {
            return Err(RigVmError::structural(
                index,
                format!(
                    "function '{}' takes {} arguments, {} given",
                    function.name(),
                    arguments.len(),
                    operands.len()
                ),
            ));
        }
        for (operand, argument) in operands.iter().zip(arguments) {
            let actual = match argument.direction {
                ArgumentDirection::Input => self.readable(index, *operand)?,
                _ => self.writable(index, *operand)?,
            };
            if self.registry.is_wildcard_type(argument.type_index) {
                continue;
            }
            let compatible = match argument.direction {
                ArgumentDirection::Input => self.registry.can_match_types(actual, argument.type_index, false),
                ArgumentDirection::Output => self.registry.can_match_types(argument.type_index, actual, false),
                ArgumentDirection::InputOutput => actual == argument.type_index,
            };
            if !compatible {
                return Err(RigVmError::structural(
                    index,
                    format!(
                        "argument '{}' of '{}' expects {}, operand {operand} is {}",
                        argument.name,
                        function.name(),
                        self.registry.type_name(argument.type_index),
                        self.registry.type_name(actual)
                    ),
                ));
            }
        }
        Ok(())
    }
}
