//! Instruction container.
//!
//! Each instruction is encoded as `[opcode][zero padding][body]`, where the
//! padding brings the body to the opcode's declared alignment (aligned
//! containers only) and the body layout is fixed by the opcode. Execute and
//! SetupTraits carry their operand count in the fixed part of the body;
//! Execute and JumpToBranch carry the first row and row count of the table
//! entries they own.

mod codec;
mod container;
mod op;
mod opcode;
mod operand;
mod tables;

use thiserror::Error;

pub use container::{ByteCode, Instruction, Instructions, MAGIC, VERSION};
pub use op::{
    BeginBlockOp, ComparisonOp, CopyOp, ExecuteOp, InvokeEntryOp, JumpIfOp, JumpOp, JumpToBranchOp, Op,
    RunInstructionsOp, SetupTraitsOp, UnaryOp,
};
pub use opcode::{CopyKind, JumpMode, Opcode};
pub use operand::Operand;
pub use tables::{BranchInfo, ByteCodeEntry, PredicateBranch};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ByteCodeError {
    #[error("invalid bytecode magic")]
    InvalidMagic,
    #[error("unsupported bytecode version {0}")]
    UnsupportedVersion(u16),
    #[error("unexpected end of bytecode")]
    UnexpectedEof,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("unknown copy kind {0}")]
    UnknownCopyKind(u8),
    #[error("invalid utf-8 sequence")]
    InvalidUtf8,
    #[error("non-zero padding at byte {0}")]
    NonZeroPadding(usize),
    #[error("expected {expected} instructions but decoded {found}")]
    InstructionCountMismatch { expected: u32, found: u32 },
    #[error("{0} trailing bytes after the bytecode")]
    TrailingBytes(usize),
    #[error("no instruction starts at byte {0}")]
    InvalidOffset(usize),
    #[error("instruction at byte {0} is not a jump")]
    NotAJump(usize),
    #[error("instruction at byte {0} is not a run-instructions op")]
    NotARunInstructions(usize),
    #[error("predicate branch {0} does not exist")]
    UnknownPredicateBranch(usize),
    #[error("branch info {0} does not exist")]
    UnknownBranchInfo(usize),
    #[error("{table} overflow: {count} rows do not fit the encoded index")]
    TableOverflow { table: &'static str, count: usize },
    #[error("entry '{0}' already exists")]
    DuplicateEntry(String),
    #[error("{0}")]
    Message(String),
}
