use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RigVmResult;
use crate::registry::TypeIndex;
use crate::vm::Invocation;

/// Native entry point. Arguments are reached through the invocation.
pub type NativeFunction = fn(&mut Invocation<'_>) -> RigVmResult<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u32);

impl FunctionId {
    pub(crate) fn new(index: usize) -> Self {
        FunctionId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentDirection {
    Input,
    Output,
    InputOutput,
}

impl ArgumentDirection {
    pub fn is_input(self) -> bool {
        matches!(self, ArgumentDirection::Input | ArgumentDirection::InputOutput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, ArgumentDirection::Output | ArgumentDirection::InputOutput)
    }

    pub fn name(self) -> &'static str {
        match self {
            ArgumentDirection::Input => "in",
            ArgumentDirection::Output => "out",
            ArgumentDirection::InputOutput => "io",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionArgument {
    pub name: String,
    pub type_index: TypeIndex,
    pub direction: ArgumentDirection,
}

/// A concrete native implementation. Records are published once and live as
/// long as the dispatch registry.
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    pub(crate) id: FunctionId,
    pub(crate) name: String,
    pub(crate) struct_name: Option<String>,
    pub(crate) template: Option<String>,
    pub(crate) factory: Option<String>,
    pub(crate) arguments: Vec<FunctionArgument>,
    pub(crate) function: NativeFunction,
}

impl FunctionRecord {
    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn struct_name(&self) -> Option<&str> {
        self.struct_name.as_deref()
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Name of the dispatch factory that produced this record, if any.
    pub fn factory(&self) -> Option<&str> {
        self.factory.as_deref()
    }

    pub fn arguments(&self) -> &[FunctionArgument] {
        &self.arguments
    }

    pub fn argument_index(&self, name: &str) -> Option<usize> {
        self.arguments.iter().position(|argument| argument.name == name)
    }

    pub fn function(&self) -> NativeFunction {
        self.function
    }
}

/// Registration request for a plain native function.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub(crate) name: String,
    pub(crate) struct_name: Option<String>,
    pub(crate) template: Option<String>,
    pub(crate) arguments: Vec<FunctionArgument>,
    pub(crate) function: NativeFunction,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, function: NativeFunction) -> Self {
        Self {
            name: name.into(),
            struct_name: None,
            template: None,
            arguments: Vec::new(),
            function,
        }
    }

    /// Makes the function one permutation of `template`.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_struct(mut self, struct_name: impl Into<String>) -> Self {
        self.struct_name = Some(struct_name.into());
        self
    }

    pub fn argument(mut self, name: impl Into<String>, type_index: TypeIndex, direction: ArgumentDirection) -> Self {
        self.arguments.push(FunctionArgument {
            name: name.into(),
            type_index,
            direction,
        });
        self
    }

    pub fn input(self, name: impl Into<String>, type_index: TypeIndex) -> Self {
        self.argument(name, type_index, ArgumentDirection::Input)
    }

    pub fn output(self, name: impl Into<String>, type_index: TypeIndex) -> Self {
        self.argument(name, type_index, ArgumentDirection::Output)
    }

    pub fn input_output(self, name: impl Into<String>, type_index: TypeIndex) -> Self {
        self.argument(name, type_index, ArgumentDirection::InputOutput)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
