use crate::bytecode::{Operand, PredicateBranch};
use crate::dispatch::FunctionRecord;
use crate::error::{RigVmError, RigVmResult};
use crate::memory::{MemoryHandle, Value};
use crate::registry::{TypeIndex, TypeRegistry};

use super::context::SoftError;
use super::interpreter::{run_nested, Machine};
use super::loader::{LoadedProgram, PreparedExecute};

/// What a native function sees of one Execute instruction: its operands by
/// position or name, the register memory behind them, and the execution
/// context. Arguments fed by a lazy branch are computed the first time they
/// are read and at most once per invocation.
pub struct Invocation<'a> {
    loaded: &'a LoadedProgram,
    machine: &'a mut Machine,
    instruction: usize,
    prepared: &'a PreparedExecute,
    operands: &'a [Operand],
    predicates: &'a [PredicateBranch],
    evaluated: Vec<bool>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        loaded: &'a LoadedProgram,
        machine: &'a mut Machine,
        instruction: usize,
        prepared: &'a PreparedExecute,
        operands: &'a [Operand],
        predicates: &'a [PredicateBranch],
    ) -> Self {
        Self {
            loaded,
            machine,
            instruction,
            prepared,
            operands,
            predicates,
            evaluated: vec![false; operands.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    /// Index of the Execute instruction being run.
    pub fn instruction_index(&self) -> usize {
        self.instruction
    }

    pub fn function(&self) -> &FunctionRecord {
        &self.prepared.function
    }

    pub fn argument_name(&self, index: usize) -> Option<&str> {
        self.prepared.argument_names.get(index).map(String::as_str)
    }

    pub fn argument_index(&self, name: &str) -> Option<usize> {
        self.prepared.argument_names.iter().position(|argument| argument == name)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.machine.types
    }

    pub fn slice_index(&self) -> usize {
        self.machine.context.slice_index()
    }

    /// Type of the register behind operand `index`.
    pub fn type_of(&self, index: usize) -> TypeIndex {
        self.operands
            .get(index)
            .and_then(|operand| self.machine.memory.resolve(*operand, self.machine.context.slice_index()))
            .map(|handle| handle.type_index())
            .unwrap_or(TypeIndex::INVALID)
    }

    pub fn handle(&self, index: usize) -> RigVmResult<MemoryHandle> {
        let operand = self.operand(index)?;
        self.machine.handle(self.instruction, operand)
    }

    fn operand(&self, index: usize) -> RigVmResult<Operand> {
        self.operands.get(index).copied().ok_or_else(|| {
            RigVmError::structural(
                self.instruction,
                format!("'{}' has no argument {index}", self.prepared.function.name()),
            )
        })
    }

    fn evaluate(&mut self, index: usize) -> RigVmResult<()> {
        if self.evaluated.get(index).copied().unwrap_or(true) {
            return Ok(());
        }
        self.evaluated[index] = true;
        let range = self
            .predicates
            .iter()
            .find(|branch| branch.argument_index as usize == index)
            .map(|branch| (branch.first as usize, branch.last as usize));
        if let Some((first, last)) = range {
            run_nested(self.loaded, self.machine, self.instruction, first, last)?;
        }
        Ok(())
    }

    pub fn value(&mut self, index: usize) -> RigVmResult<&Value> {
        self.evaluate(index)?;
        let handle = self.handle(index)?;
        let instruction = self.instruction;
        self.machine
            .memory
            .read(&handle)
            .ok_or_else(|| RigVmError::structural(instruction, format!("argument {index} is not readable")))
    }

    pub fn value_named(&mut self, name: &str) -> RigVmResult<&Value> {
        let index = self.argument_index(name).ok_or_else(|| {
            RigVmError::structural(self.instruction, format!("no argument named '{name}'"))
        })?;
        self.value(index)
    }

    pub fn value_mut(&mut self, index: usize) -> RigVmResult<&mut Value> {
        self.evaluate(index)?;
        let handle = self.handle(index)?;
        let instruction = self.instruction;
        self.machine
            .memory
            .write(&handle)
            .ok_or_else(|| RigVmError::structural(instruction, format!("argument {index} is not writable")))
    }

    /// Stores `value` into argument `index`, widening numerics to the
    /// register's type.
    pub fn set(&mut self, index: usize, value: Value) -> RigVmResult<()> {
        let handle = self.handle(index)?;
        self.machine.write(self.instruction, &handle, value)
    }

    fn mismatch(&self, index: usize, expected: &str) -> RigVmError {
        RigVmError::structural(
            self.instruction,
            format!(
                "argument {index} of '{}' is not {expected}",
                self.prepared.function.name()
            ),
        )
    }

    pub fn bool(&mut self, index: usize) -> RigVmResult<bool> {
        let value = self.value(index)?.as_bool();
        value.ok_or_else(|| self.mismatch(index, "a bool"))
    }

    pub fn int32(&mut self, index: usize) -> RigVmResult<i32> {
        let value = self.value(index)?.as_i32();
        value.ok_or_else(|| self.mismatch(index, "an int32"))
    }

    pub fn int64(&mut self, index: usize) -> RigVmResult<i64> {
        let value = self.value(index)?.as_i64();
        value.ok_or_else(|| self.mismatch(index, "an integer"))
    }

    pub fn float(&mut self, index: usize) -> RigVmResult<f32> {
        let value = self.value(index)?.as_f32();
        value.ok_or_else(|| self.mismatch(index, "a float"))
    }

    pub fn double(&mut self, index: usize) -> RigVmResult<f64> {
        let value = self.value(index)?.as_f64();
        value.ok_or_else(|| self.mismatch(index, "numeric"))
    }

    pub fn array(&mut self, index: usize) -> RigVmResult<&[Value]> {
        self.evaluate(index)?;
        let handle = self.handle(index)?;
        let instruction = self.instruction;
        self.machine
            .memory
            .read(&handle)
            .and_then(Value::as_array)
            .ok_or_else(|| RigVmError::structural(instruction, format!("argument {index} is not an array")))
    }

    pub fn array_mut(&mut self, index: usize) -> RigVmResult<&mut Vec<Value>> {
        self.evaluate(index)?;
        let handle = self.handle(index)?;
        let instruction = self.instruction;
        self.machine
            .memory
            .write(&handle)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| RigVmError::structural(instruction, format!("argument {index} is not a writable array")))
    }

    /// Zero value of argument `index`'s register type.
    pub fn default_for(&self, index: usize) -> RigVmResult<Value> {
        self.machine
            .types
            .default_value(self.type_of(index))
            .ok_or_else(|| self.mismatch(index, "a type with a default"))
    }

    /// Records a soft error against this instruction.
    pub fn report(&mut self, error: SoftError) {
        self.machine.context.report(self.instruction, error);
    }

    /// Operands installed by the last SetupTraits of the running entry.
    pub fn trait_count(&self) -> usize {
        self.machine.context.traits().len()
    }

    pub fn trait_value(&self, index: usize) -> RigVmResult<&Value> {
        let operand = self
            .machine
            .context
            .traits()
            .get(index)
            .copied()
            .ok_or_else(|| RigVmError::structural(self.instruction, format!("no trait {index}")))?;
        self.machine.read(self.instruction, operand)
    }
}
