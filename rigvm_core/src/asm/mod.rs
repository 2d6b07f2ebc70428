//! Textual assembly for programs.
//!
//! ```text
//! .literals
//!     limit int32 4
//! .end
//! .work
//!     index int32
//!     done bool
//! .end
//!
//! .entry main
//! top:
//!     inc $index
//!     equals $index @limit $done
//!     jump_if $done false top
//!     exit
//! .end
//! ```
//!
//! Register sections declare `name type [sliced] [default]`. Operands are a
//! memory sigil (`@` literal, `$` work, `%` external) followed by a register
//! name or index and an optional `[element]`; `_` is the empty operand.
//! Jump targets, branch ranges and run ranges take labels or absolute
//! instruction indices. `#` starts a comment outside string literals.

mod assembler;
mod disassembler;
mod literal;

use thiserror::Error;

use crate::bytecode::ByteCodeError;
use crate::error::RigVmError;

pub use assembler::assemble;
pub use disassembler::disassemble;
pub use literal::{format_value, parse_value};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AsmError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: unknown mnemonic '{mnemonic}'")]
    UnknownMnemonic { line: usize, mnemonic: String },
    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },
    #[error("line {line}: label '{label}' is already defined")]
    DuplicateLabel { line: usize, label: String },
    #[error("line {line}: unknown register '{name}'")]
    UnknownRegister { line: usize, name: String },
    #[error("line {line}: {source}")]
    Resolve { line: usize, source: RigVmError },
    #[error(transparent)]
    ByteCode(#[from] ByteCodeError),
    #[error(transparent)]
    Format(#[from] std::fmt::Error),
}

impl AsmError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        AsmError::Syntax {
            line,
            message: message.into(),
        }
    }
}
