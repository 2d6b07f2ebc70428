use sha2::{Digest, Sha256};

use crate::error::{RigVmError, RigVmResult};
use crate::registry::{TypeIndex, TypeKind, TypeRegistry};

use super::{MemoryLayout, MemoryType, Value};

/// Runtime state of one register. Sliced registers keep one value per slice
/// and grow on first write to a slice.
#[derive(Debug, Clone)]
pub struct Register {
    name: String,
    type_index: TypeIndex,
    element_type_index: TypeIndex,
    sliced: bool,
    default: Value,
    slices: Vec<Value>,
}

impl Register {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_index(&self) -> TypeIndex {
        self.type_index
    }

    /// Element type for array registers, [`TypeIndex::INVALID`] otherwise.
    pub fn element_type_index(&self) -> TypeIndex {
        self.element_type_index
    }

    pub fn is_sliced(&self) -> bool {
        self.sliced
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn slices(&self) -> &[Value] {
        &self.slices
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn value(&self, slice: usize) -> &Value {
        let slice = if self.sliced { slice } else { 0 };
        self.slices.get(slice).unwrap_or(&self.default)
    }

    pub fn value_mut(&mut self, slice: usize) -> &mut Value {
        let slice = if self.sliced { slice } else { 0 };
        if self.slices.len() <= slice {
            self.slices.resize(slice + 1, self.default.clone());
        }
        &mut self.slices[slice]
    }

    fn reset(&mut self) {
        self.slices.clear();
        self.slices.push(self.default.clone());
    }
}

/// Registers of one memory kind.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    memory_type: MemoryType,
    registers: Vec<Register>,
}

impl MemoryStorage {
    pub fn new(memory_type: MemoryType) -> Self {
        Self {
            memory_type,
            registers: Vec::new(),
        }
    }

    /// Resolves every register type and initialises it with its default.
    pub fn from_layout(
        memory_type: MemoryType,
        layout: &MemoryLayout,
        registry: &TypeRegistry,
    ) -> RigVmResult<Self> {
        let mut registers = Vec::with_capacity(layout.len());
        for desc in layout.registers() {
            let type_index = registry.get_type_index_by_name(&desc.type_name);
            if !type_index.is_valid() {
                return Err(RigVmError::UnknownType(desc.type_name.clone()));
            }
            let default = match &desc.default {
                Some(value) => {
                    if !value_fits(registry, type_index, value) {
                        return Err(RigVmError::Package(format!(
                            "default of register '{}' is not a {}",
                            desc.name, desc.type_name
                        )));
                    }
                    value.clone()
                }
                None => registry
                    .default_value(type_index)
                    .ok_or_else(|| RigVmError::UnknownType(desc.type_name.clone()))?,
            };
            let element_type_index = if registry.is_array_type(type_index) {
                registry.get_base_type_of(type_index)
            } else {
                TypeIndex::INVALID
            };
            registers.push(Register {
                name: desc.name.clone(),
                type_index,
                element_type_index,
                sliced: desc.sliced,
                slices: vec![default.clone()],
                default,
            });
        }
        Ok(Self {
            memory_type,
            registers,
        })
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub fn register(&self, index: usize) -> Option<&Register> {
        self.registers.get(index)
    }

    pub fn register_mut(&mut self, index: usize) -> Option<&mut Register> {
        self.registers.get_mut(index)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.registers.iter().position(|register| register.name == name)
    }

    pub fn get(&self, register: usize, slice: usize) -> Option<&Value> {
        self.registers.get(register).map(|r| r.value(slice))
    }

    pub fn get_mut(&mut self, register: usize, slice: usize) -> Option<&mut Value> {
        self.registers.get_mut(register).map(|r| r.value_mut(slice))
    }

    pub fn reset(&mut self) {
        for register in &mut self.registers {
            register.reset();
        }
    }

    pub fn estimated_bytes(&self, registry: &TypeRegistry) -> usize {
        self.registers
            .iter()
            .map(|register| registry.size_of(register.type_index) * register.slices.len())
            .sum()
    }

    /// Fingerprint of every slot, hashed through the type's capability.
    pub fn content_hash(&self, registry: &TypeRegistry) -> u32 {
        let mut hasher = Sha256::new();
        for register in &self.registers {
            hasher.update(register.name.as_bytes());
            for value in &register.slices {
                hasher.update(registry.hash_value(register.type_index, value).to_le_bytes());
            }
        }
        let digest = hasher.finalize();
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

/// Whether `value` is a valid inhabitant of the registered type.
pub fn value_fits(registry: &TypeRegistry, type_index: TypeIndex, value: &Value) -> bool {
    let Some(record) = registry.get_type(type_index) else {
        return false;
    };
    match (record.kind(), value) {
        (TypeKind::Wildcard, _) => true,
        (TypeKind::Execute, Value::Execute)
        | (TypeKind::Bool, Value::Bool(_))
        | (TypeKind::Int32, Value::Int32(_))
        | (TypeKind::Int64, Value::Int64(_))
        | (TypeKind::UInt8, Value::UInt8(_))
        | (TypeKind::Float, Value::Float(_))
        | (TypeKind::Double, Value::Double(_))
        | (TypeKind::Name, Value::Name(_))
        | (TypeKind::String, Value::String(_))
        | (TypeKind::Struct, Value::Struct(_))
        | (TypeKind::Object, Value::Object(_)) => true,
        (TypeKind::Enum { variants }, Value::Enum(ordinal)) => (*ordinal as usize) < variants.len(),
        (TypeKind::Array(_), Value::Array(values)) => {
            let element = record.base_type_index();
            values.iter().all(|value| value_fits(registry, element, value))
        }
        _ => false,
    }
}

/// Converts `value` into the registered type, widening numerics losslessly.
/// `None` when no such conversion exists.
pub fn coerce_value(registry: &TypeRegistry, type_index: TypeIndex, value: Value) -> Option<Value> {
    if value_fits(registry, type_index, &value) {
        return Some(value);
    }
    let record = registry.get_type(type_index)?;
    match (record.kind(), &value) {
        (TypeKind::Int32, Value::UInt8(v)) => Some(Value::Int32(i32::from(*v))),
        (TypeKind::Int64, Value::UInt8(_) | Value::Int32(_)) => value.as_i64().map(Value::Int64),
        (TypeKind::Double, Value::Float(_) | Value::UInt8(_) | Value::Int32(_)) => value.as_f64().map(Value::Double),
        (TypeKind::Float, Value::UInt8(v)) => Some(Value::Float(f32::from(*v))),
        (TypeKind::Array(_), Value::Array(values)) => {
            let element = record.base_type_index();
            values
                .iter()
                .cloned()
                .map(|value| coerce_value(registry, element, value))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MemoryLayout {
        let mut layout = MemoryLayout::new();
        layout.add("count", "int32", Some(Value::Int32(4)));
        layout.add_sliced("squares", "int32");
        layout.add("weights", "array<float>", Some(Value::Array(vec![Value::Float(0.5)])));
        layout
    }

    #[test]
    fn sliced_registers_grow_lazily() {
        let registry = TypeRegistry::new();
        let mut storage = MemoryStorage::from_layout(MemoryType::Work, &layout(), &registry).unwrap();
        assert_eq!(storage.get(0, 3), Some(&Value::Int32(4)));
        assert_eq!(storage.get(1, 3), Some(&Value::Int32(0)));
        *storage.get_mut(1, 3).unwrap() = Value::Int32(9);
        assert_eq!(storage.register(1).unwrap().slice_count(), 4);
        assert_eq!(storage.get(1, 3), Some(&Value::Int32(9)));
        storage.reset();
        assert_eq!(storage.register(1).unwrap().slice_count(), 1);
    }

    #[test]
    fn array_registers_know_their_element() {
        let registry = TypeRegistry::new();
        let storage = MemoryStorage::from_layout(MemoryType::Literal, &layout(), &registry).unwrap();
        assert_eq!(storage.register(2).unwrap().element_type_index(), TypeIndex::FLOAT);
        assert_eq!(storage.find("weights"), Some(2));
    }

    #[test]
    fn mismatched_default_is_rejected() {
        let registry = TypeRegistry::new();
        let mut layout = MemoryLayout::new();
        layout.add("flag", "bool", Some(Value::Int32(1)));
        assert!(MemoryStorage::from_layout(MemoryType::Work, &layout, &registry).is_err());
        let mut layout = MemoryLayout::new();
        layout.add("thing", "Missing", None);
        assert_eq!(
            MemoryStorage::from_layout(MemoryType::Work, &layout, &registry).unwrap_err(),
            RigVmError::UnknownType("Missing".into())
        );
    }

    #[test]
    fn content_hash_tracks_values() {
        let registry = TypeRegistry::new();
        let mut storage = MemoryStorage::from_layout(MemoryType::Work, &layout(), &registry).unwrap();
        let before = storage.content_hash(&registry);
        *storage.get_mut(0, 0).unwrap() = Value::Int32(5);
        assert_ne!(before, storage.content_hash(&registry));
    }

    #[test]
    fn coercion_only_widens() {
        let registry = TypeRegistry::new();
        assert_eq!(
            coerce_value(&registry, TypeIndex::INT64, Value::Int32(-3)),
            Some(Value::Int64(-3))
        );
        assert_eq!(
            coerce_value(&registry, TypeIndex::DOUBLE, Value::Float(0.5)),
            Some(Value::Double(0.5))
        );
        assert_eq!(coerce_value(&registry, TypeIndex::INT32, Value::Int64(1)), None);
        assert_eq!(coerce_value(&registry, TypeIndex::FLOAT, Value::Double(1.0)), None);
    }
}
