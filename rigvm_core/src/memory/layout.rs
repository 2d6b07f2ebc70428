use serde::{Deserialize, Serialize};

use super::Value;

/// Declaration of one register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDesc {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub sliced: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Serializable register list of one memory kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryLayout {
    registers: Vec<RegisterDesc>,
}

impl MemoryLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a register and returns its index.
    pub fn add(&mut self, name: impl Into<String>, type_name: impl Into<String>, default: Option<Value>) -> u16 {
        self.push(RegisterDesc {
            name: name.into(),
            type_name: type_name.into(),
            sliced: false,
            default,
        })
    }

    pub fn add_sliced(&mut self, name: impl Into<String>, type_name: impl Into<String>) -> u16 {
        self.push(RegisterDesc {
            name: name.into(),
            type_name: type_name.into(),
            sliced: true,
            default: None,
        })
    }

    pub fn push(&mut self, register: RegisterDesc) -> u16 {
        self.registers.push(register);
        (self.registers.len() - 1) as u16
    }

    pub fn registers(&self) -> &[RegisterDesc] {
        &self.registers
    }

    pub fn get(&self, index: usize) -> Option<&RegisterDesc> {
        self.registers.get(index)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.registers.iter().position(|register| register.name == name)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}
