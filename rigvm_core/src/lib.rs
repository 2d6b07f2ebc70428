//! RigVM core: the type registry, the function/template/dispatch layer, the
//! bytecode container and the interpreter that runs it.
//!
//! Everything that needs shared registry state receives it explicitly as an
//! `Arc<TypeRegistry>` / `Arc<DispatchRegistry>`; there is no ambient global.

mod arena;
pub mod asm;
pub mod bytecode;
pub mod dispatch;
mod error;
pub mod memory;
pub mod registry;
pub mod vm;

pub use asm::{assemble, disassemble, AsmError};
pub use bytecode::{
    BranchInfo, ByteCode, ByteCodeError, CopyKind, Instruction, JumpMode, Op, Opcode, Operand, PredicateBranch,
};
pub use dispatch::{
    builtin_metadata, ArgumentDirection, DispatchFactory, DispatchRegistry, FunctionDescriptor, FunctionId,
    FunctionRecord, MetadataTable, NativeFunction, TypeMap,
};
pub use error::{RigVmError, RigVmResult};
pub use memory::{MemoryHandle, MemoryLayout, MemoryType, RegisterDesc, Value};
pub use registry::{HostType, TypeCategory, TypeDescriptor, TypeIndex, TypeRecord, TypeRegistry};
pub use vm::{
    Diagnostic, DiagnosticHook, ExecutionOutcome, Invocation, LoadedProgram, Program, RigVm, SoftError, VmOptions,
};
