use std::io::Cursor;

use super::codec::{read_string, read_u16, read_u32, write_string};
use super::{ByteCodeError, Operand};

/// Named sub-program start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteCodeEntry {
    pub name: String,
    pub instruction_index: u32,
}

/// One labelled target of a JumpToBranch instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub label: String,
    /// The JumpToBranch instruction this branch belongs to.
    pub instruction_index: u32,
    pub argument_index: u16,
    pub first: u32,
    pub last: u32,
}

impl BranchInfo {
    pub fn new(label: impl Into<String>, first: u32, last: u32) -> Self {
        Self {
            label: label.into(),
            instruction_index: 0,
            argument_index: 0,
            first,
            last,
        }
    }

    pub(crate) fn encode(&self, bytes: &mut Vec<u8>) {
        write_string(bytes, &self.label);
        bytes.extend_from_slice(&self.instruction_index.to_le_bytes());
        bytes.extend_from_slice(&self.argument_index.to_le_bytes());
        bytes.extend_from_slice(&self.first.to_le_bytes());
        bytes.extend_from_slice(&self.last.to_le_bytes());
    }

    pub(crate) fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self, ByteCodeError> {
        Ok(Self {
            label: read_string(cursor)?,
            instruction_index: read_u32(cursor)?,
            argument_index: read_u16(cursor)?,
            first: read_u32(cursor)?,
            last: read_u32(cursor)?,
        })
    }
}

/// Instructions computing one lazily evaluated Execute argument. They run
/// only when the native reads the argument, and write into `operand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateBranch {
    pub argument_index: u16,
    pub operand: Operand,
    pub first: u32,
    pub last: u32,
}

impl PredicateBranch {
    pub fn new(argument_index: u16, operand: Operand, first: u32, last: u32) -> Self {
        Self {
            argument_index,
            operand,
            first,
            last,
        }
    }

    pub(crate) fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.argument_index.to_le_bytes());
        self.operand.encode(bytes);
        bytes.extend_from_slice(&self.first.to_le_bytes());
        bytes.extend_from_slice(&self.last.to_le_bytes());
    }

    pub(crate) fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self, ByteCodeError> {
        Ok(Self {
            argument_index: read_u16(cursor)?,
            operand: Operand::decode(cursor)?,
            first: read_u32(cursor)?,
            last: read_u32(cursor)?,
        })
    }
}
