use thiserror::Error;

use crate::bytecode::ByteCodeError;

/// Result alias used throughout the core.
pub type RigVmResult<T> = Result<T, RigVmError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RigVmError {
    #[error("type '{0}' cannot be registered")]
    TypeRegistration(String),
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("function '{0}' is already registered")]
    DuplicateFunction(String),
    #[error("function '{0}' is not registered")]
    UnknownFunction(String),
    #[error("template '{0}' is already registered")]
    DuplicateTemplate(String),
    #[error("template '{0}' is not registered")]
    UnknownTemplate(String),
    #[error("template '{template}' has no argument named '{argument}'")]
    UnknownArgument { template: String, argument: String },
    #[error("template '{template}' does not match the arguments of function '{function}'")]
    TemplateMismatch { template: String, function: String },
    #[error("'{template}' does not support permutation {permutation}")]
    UnsupportedPermutation {
        template: String,
        permutation: String,
    },
    #[error("entry '{0}' does not exist")]
    UnknownEntry(String),
    #[error("register '{0}' does not exist")]
    UnknownRegister(String),
    #[error("instruction {instruction}: {message}")]
    Structural { instruction: usize, message: String },
    #[error(transparent)]
    ByteCode(#[from] ByteCodeError),
    #[error("package error: {0}")]
    Package(String),
}

impl RigVmError {
    pub fn structural(instruction: usize, message: impl Into<String>) -> Self {
        RigVmError::Structural {
            instruction,
            message: message.into(),
        }
    }
}
