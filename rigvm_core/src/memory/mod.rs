//! Register memory: values, layouts, storages and the handles natives use to
//! reach operand storage.

mod layout;
mod storage;
mod value;

use serde::{Deserialize, Serialize};

use crate::bytecode::Operand;
use crate::error::RigVmResult;
use crate::registry::{TypeIndex, TypeRegistry};

pub use layout::{MemoryLayout, RegisterDesc};
pub use storage::{coerce_value, value_fits, MemoryStorage, Register};
pub use value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MemoryType {
    Literal = 0,
    Work = 1,
    External = 2,
}

impl MemoryType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(MemoryType::Literal),
            1 => Some(MemoryType::Work),
            2 => Some(MemoryType::External),
            _ => None,
        }
    }

    /// Prefix used by the assembly syntax.
    pub fn sigil(self) -> char {
        match self {
            MemoryType::Literal => '@',
            MemoryType::Work => '$',
            MemoryType::External => '%',
        }
    }

    pub fn from_sigil(sigil: char) -> Option<Self> {
        match sigil {
            '@' => Some(MemoryType::Literal),
            '$' => Some(MemoryType::Work),
            '%' => Some(MemoryType::External),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MemoryType::Literal => "literal",
            MemoryType::Work => "work",
            MemoryType::External => "external",
        }
    }
}

/// Type-erased reference to the storage of one operand, created per
/// execution step and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHandle {
    memory_type: MemoryType,
    register_index: u16,
    element: Option<u16>,
    slice: usize,
    type_index: TypeIndex,
}

impl MemoryHandle {
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn register_index(&self) -> u16 {
        self.register_index
    }

    pub fn element(&self) -> Option<u16> {
        self.element
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn type_index(&self) -> TypeIndex {
        self.type_index
    }
}

/// The three storages a program addresses.
#[derive(Debug, Clone)]
pub struct MemorySet {
    literal: MemoryStorage,
    work: MemoryStorage,
    external: MemoryStorage,
}

impl MemorySet {
    pub fn from_layouts(
        literal: &MemoryLayout,
        work: &MemoryLayout,
        external: &MemoryLayout,
        registry: &TypeRegistry,
    ) -> RigVmResult<Self> {
        Ok(Self {
            literal: MemoryStorage::from_layout(MemoryType::Literal, literal, registry)?,
            work: MemoryStorage::from_layout(MemoryType::Work, work, registry)?,
            external: MemoryStorage::from_layout(MemoryType::External, external, registry)?,
        })
    }

    pub fn storage(&self, memory_type: MemoryType) -> &MemoryStorage {
        match memory_type {
            MemoryType::Literal => &self.literal,
            MemoryType::Work => &self.work,
            MemoryType::External => &self.external,
        }
    }

    pub fn storage_mut(&mut self, memory_type: MemoryType) -> &mut MemoryStorage {
        match memory_type {
            MemoryType::Literal => &mut self.literal,
            MemoryType::Work => &mut self.work,
            MemoryType::External => &mut self.external,
        }
    }

    /// Handle for `operand` within the given slice, or `None` if the operand
    /// names storage that does not exist.
    pub fn resolve(&self, operand: Operand, slice: usize) -> Option<MemoryHandle> {
        let memory_type = operand.memory_type()?;
        let register = self
            .storage(memory_type)
            .register(operand.register_index() as usize)?;
        let element = operand.register_offset();
        let type_index = match element {
            Some(_) if !register.element_type_index().is_valid() => return None,
            Some(_) => register.element_type_index(),
            None => register.type_index(),
        };
        Some(MemoryHandle {
            memory_type,
            register_index: operand.register_index(),
            element,
            slice: if register.is_sliced() { slice } else { 0 },
            type_index,
        })
    }

    pub fn read(&self, handle: &MemoryHandle) -> Option<&Value> {
        let value = self
            .storage(handle.memory_type)
            .get(handle.register_index as usize, handle.slice)?;
        match handle.element {
            Some(element) => value.as_array()?.get(element as usize),
            None => Some(value),
        }
    }

    /// Mutable access. Literal memory is read-only at run time.
    pub fn write(&mut self, handle: &MemoryHandle) -> Option<&mut Value> {
        if handle.memory_type == MemoryType::Literal {
            return None;
        }
        let value = self
            .storage_mut(handle.memory_type)
            .get_mut(handle.register_index as usize, handle.slice)?;
        match handle.element {
            Some(element) => value.as_array_mut()?.get_mut(element as usize),
            None => Some(value),
        }
    }

    pub fn reset(&mut self) {
        self.work.reset();
        self.external.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> MemorySet {
        let registry = TypeRegistry::new();
        let mut literal = MemoryLayout::new();
        literal.add("one", "int32", Some(Value::Int32(1)));
        let mut work = MemoryLayout::new();
        work.add("values", "array<int32>", Some(Value::Array(vec![Value::Int32(3), Value::Int32(4)])));
        work.add_sliced("per_slice", "float");
        MemorySet::from_layouts(&literal, &work, &MemoryLayout::new(), &registry).unwrap()
    }

    #[test]
    fn element_operands_resolve_to_element_type() {
        let memory = memory();
        let handle = memory.resolve(Operand::work(0).with_offset(1), 0).unwrap();
        assert_eq!(handle.type_index(), TypeIndex::INT32);
        assert_eq!(memory.read(&handle), Some(&Value::Int32(4)));
        assert!(memory.resolve(Operand::literal(0).with_offset(0), 0).is_none());
        assert!(memory.resolve(Operand::external(0), 0).is_none());
    }

    #[test]
    fn literal_memory_is_read_only() {
        let mut memory = memory();
        let handle = memory.resolve(Operand::literal(0), 0).unwrap();
        assert!(memory.write(&handle).is_none());
    }

    #[test]
    fn slices_only_apply_to_sliced_registers() {
        let mut memory = memory();
        let plain = memory.resolve(Operand::work(0), 5).unwrap();
        assert_eq!(plain.slice(), 0);
        let sliced = memory.resolve(Operand::work(1), 5).unwrap();
        *memory.write(&sliced).unwrap() = Value::Float(2.5);
        assert_eq!(memory.read(&sliced), Some(&Value::Float(2.5)));
    }
}
