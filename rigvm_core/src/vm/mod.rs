//! The interpreter: program packages, load-time validation, the execution
//! loop and the invocation surface natives see.
//!
//! A [`RigVm`] owns its register memory and shares an immutable
//! [`LoadedProgram`] with any instance forked from it. Execution is a single
//! synchronous instruction pointer; InvokeEntry, RunInstructions, branches and
//! lazy arguments run nested ranges on the same thread.

mod context;
mod interpreter;
mod invocation;
mod loader;
mod options;
mod profiling;
mod program;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::dispatch::DispatchRegistry;
use crate::error::{RigVmError, RigVmResult};
use crate::memory::{coerce_value, MemorySet, MemoryType, Value};
use crate::registry::TypeRegistry;

pub use context::{Diagnostic, DiagnosticHook, ExecuteContext, SoftError};
pub use invocation::Invocation;
pub use loader::LoadedProgram;
pub use options::VmOptions;
pub use profiling::{ExecutionProfile, HotFunctionTable, ProfileSummary};
pub use program::{Program, PACKAGE_MAGIC, PACKAGE_VERSION};

use interpreter::{Flow, Machine};

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub entry: Option<String>,
    /// Instruction of the Exit that ended the run; `None` when it fell off
    /// the end.
    pub exit_instruction: Option<usize>,
    pub instructions_executed: u64,
    pub diagnostics: Vec<Diagnostic>,
    /// Diagnostics beyond [`VmOptions::max_diagnostics`].
    pub dropped_diagnostics: usize,
}

pub struct RigVm {
    loaded: Arc<LoadedProgram>,
    machine: Machine,
}

impl RigVm {
    /// Builds memory from the program's layouts, then validates and binds
    /// the program against `dispatch`.
    pub fn new(program: Arc<Program>, dispatch: &DispatchRegistry, options: VmOptions) -> RigVmResult<Self> {
        let types = Arc::clone(dispatch.types());
        let memory = MemorySet::from_layouts(&program.literals, &program.work, &program.externals, &types)?;
        let loaded = Arc::new(LoadedProgram::load(program, dispatch, &memory)?);
        Ok(Self::with_memory(loaded, types, memory, options))
    }

    fn with_memory(loaded: Arc<LoadedProgram>, types: Arc<TypeRegistry>, memory: MemorySet, options: VmOptions) -> Self {
        Self {
            loaded,
            machine: Machine {
                types,
                memory,
                context: ExecuteContext::new(options.max_diagnostics),
                profile: None,
                options,
                executed: 0,
            },
        }
    }

    /// A second instance sharing this program, with fresh memory.
    pub fn fork(&self) -> RigVmResult<Self> {
        let program = self.loaded.program();
        let memory = MemorySet::from_layouts(&program.literals, &program.work, &program.externals, &self.machine.types)?;
        Ok(Self::with_memory(
            Arc::clone(&self.loaded),
            Arc::clone(&self.machine.types),
            memory,
            self.machine.options.clone(),
        ))
    }

    pub fn program(&self) -> &Arc<Program> {
        self.loaded.program()
    }

    pub fn loaded(&self) -> &Arc<LoadedProgram> {
        &self.loaded
    }

    pub fn options(&self) -> &VmOptions {
        &self.machine.options
    }

    pub fn set_diagnostic_hook(&mut self, hook: DiagnosticHook) {
        self.machine.context.set_hook(Some(hook));
    }

    /// Runs the named entry until Exit or the end of its range.
    pub fn execute(&mut self, entry: &str) -> RigVmResult<ExecutionOutcome> {
        let code = &self.loaded.program().byte_code;
        let (start, end) = code
            .find_entry_index(entry)
            .and_then(|index| code.entry_range(index))
            .ok_or_else(|| RigVmError::UnknownEntry(entry.to_string()))?;
        self.run(Some(entry.to_string()), start, end)
    }

    /// Runs from `instruction` to the end of the program, ignoring entries.
    pub fn execute_from(&mut self, instruction: usize) -> RigVmResult<ExecutionOutcome> {
        let end = self.loaded.len();
        if instruction > end {
            return Err(RigVmError::structural(instruction, "start past the last instruction"));
        }
        self.run(None, instruction, end)
    }

    fn run(&mut self, entry: Option<String>, start: usize, end: usize) -> RigVmResult<ExecutionOutcome> {
        debug!(entry = entry.as_deref().unwrap_or("-"), start, end, "execute");
        self.machine.context.begin_run();
        self.machine.executed = 0;
        self.machine.profile = self.machine.options.profile.then(|| {
            let mut profile = ExecutionProfile::new();
            profile.begin();
            profile
        });

        let loaded = Arc::clone(&self.loaded);
        let flow = interpreter::run_range(&loaded, &mut self.machine, start, end);
        if let Some(profile) = self.machine.profile.as_mut() {
            profile.end();
        }
        let flow = flow?;
        let (diagnostics, dropped_diagnostics) = self.machine.context.take_diagnostics();
        Ok(ExecutionOutcome {
            entry,
            exit_instruction: match flow {
                Flow::Exit(instruction) => Some(instruction),
                Flow::Completed => None,
            },
            instructions_executed: self.machine.executed,
            diagnostics,
            dropped_diagnostics,
        })
    }

    pub fn profile(&self) -> Option<&ExecutionProfile> {
        self.machine.profile.as_ref()
    }

    pub fn memory(&self) -> &MemorySet {
        &self.machine.memory
    }

    /// Restores work and external registers to their defaults.
    pub fn reset_memory(&mut self) {
        self.machine.memory.reset();
    }

    fn register_value(&self, memory_type: MemoryType, name: &str) -> Option<&Value> {
        let storage = self.machine.memory.storage(memory_type);
        storage.get(storage.find(name)?, 0)
    }

    pub fn literal(&self, name: &str) -> Option<&Value> {
        self.register_value(MemoryType::Literal, name)
    }

    pub fn work(&self, name: &str) -> Option<&Value> {
        self.register_value(MemoryType::Work, name)
    }

    pub fn external(&self, name: &str) -> Option<&Value> {
        self.register_value(MemoryType::External, name)
    }

    /// Every slice of a work register.
    pub fn work_slices(&self, name: &str) -> Option<&[Value]> {
        let storage = self.machine.memory.storage(MemoryType::Work);
        storage.register(storage.find(name)?).map(|register| register.slices())
    }

    /// Host-side write into an external register.
    pub fn set_external(&mut self, name: &str, value: Value) -> RigVmResult<()> {
        let types = &self.machine.types;
        let storage = self.machine.memory.storage_mut(MemoryType::External);
        let index = storage
            .find(name)
            .ok_or_else(|| RigVmError::UnknownRegister(name.to_string()))?;
        let register = storage
            .register_mut(index)
            .ok_or_else(|| RigVmError::UnknownRegister(name.to_string()))?;
        let kind = value.kind_name();
        let value = coerce_value(types, register.type_index(), value).ok_or_else(|| {
            RigVmError::Package(format!(
                "external '{name}' is {}, got {kind}",
                types.type_name(register.type_index())
            ))
        })?;
        *register.value_mut(0) = value;
        Ok(())
    }

    /// Fingerprint of work and external memory.
    pub fn memory_hash(&self) -> u32 {
        let types = &self.machine.types;
        let work = self.machine.memory.storage(MemoryType::Work).content_hash(types);
        let external = self.machine.memory.storage(MemoryType::External).content_hash(types);
        work.rotate_left(16) ^ external
    }
}
