use std::fmt;
use std::io::Cursor;

use crate::memory::MemoryType;

use super::codec::{read_u16, read_u8};
use super::ByteCodeError;

/// Address of one register (or one element of an array register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    memory_type: u8,
    register_index: u16,
    register_offset: u16,
}

impl Operand {
    /// Encoded size in bytes.
    pub const SIZE: usize = 5;

    /// Placeholder for optional operands such as the RunInstructions guard.
    pub const NONE: Operand = Operand {
        memory_type: u8::MAX,
        register_index: 0,
        register_offset: u16::MAX,
    };

    const NO_OFFSET: u16 = u16::MAX;

    pub fn new(memory_type: MemoryType, register_index: u16) -> Self {
        Self {
            memory_type: memory_type as u8,
            register_index,
            register_offset: Self::NO_OFFSET,
        }
    }

    pub fn literal(register_index: u16) -> Self {
        Self::new(MemoryType::Literal, register_index)
    }

    pub fn work(register_index: u16) -> Self {
        Self::new(MemoryType::Work, register_index)
    }

    pub fn external(register_index: u16) -> Self {
        Self::new(MemoryType::External, register_index)
    }

    /// Addresses element `offset` of an array register.
    pub fn with_offset(mut self, offset: u16) -> Self {
        debug_assert!(offset != Self::NO_OFFSET);
        self.register_offset = offset;
        self
    }

    /// Builds an operand from its raw encoded fields, unchecked.
    pub fn from_raw(memory_type: u8, register_index: u16, register_offset: u16) -> Self {
        Self {
            memory_type,
            register_index,
            register_offset,
        }
    }

    pub fn memory_type(&self) -> Option<MemoryType> {
        MemoryType::from_u8(self.memory_type)
    }

    pub fn raw_memory_type(&self) -> u8 {
        self.memory_type
    }

    pub fn register_index(&self) -> u16 {
        self.register_index
    }

    pub fn register_offset(&self) -> Option<u16> {
        (self.register_offset != Self::NO_OFFSET).then_some(self.register_offset)
    }

    pub fn is_none(&self) -> bool {
        *self == Operand::NONE
    }

    pub(crate) fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.memory_type);
        bytes.extend_from_slice(&self.register_index.to_le_bytes());
        bytes.extend_from_slice(&self.register_offset.to_le_bytes());
    }

    pub(crate) fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self, ByteCodeError> {
        Ok(Self {
            memory_type: read_u8(cursor)?,
            register_index: read_u16(cursor)?,
            register_offset: read_u16(cursor)?,
        })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("_");
        }
        match self.memory_type() {
            Some(memory_type) => write!(f, "{}{}", memory_type.sigil(), self.register_index)?,
            None => write!(f, "?{}:{}", self.memory_type, self.register_index)?,
        }
        if let Some(offset) = self.register_offset() {
            write!(f, "[{offset}]")?;
        }
        Ok(())
    }
}
