use std::convert::TryFrom;

use super::ByteCodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    Execute = 0,
    Copy = 1,
    Zero = 2,
    BoolFalse = 3,
    BoolTrue = 4,
    Increment = 5,
    Decrement = 6,
    Equals = 7,
    NotEquals = 8,
    JumpAbsolute = 9,
    JumpForward = 10,
    JumpBackward = 11,
    JumpAbsoluteIf = 12,
    JumpForwardIf = 13,
    JumpBackwardIf = 14,
    Exit = 15,
    BeginBlock = 16,
    EndBlock = 17,
    InvokeEntry = 18,
    JumpToBranch = 19,
    RunInstructions = 20,
    SetupTraits = 21,
}

impl Opcode {
    pub const ALL: [Opcode; 22] = [
        Opcode::Execute,
        Opcode::Copy,
        Opcode::Zero,
        Opcode::BoolFalse,
        Opcode::BoolTrue,
        Opcode::Increment,
        Opcode::Decrement,
        Opcode::Equals,
        Opcode::NotEquals,
        Opcode::JumpAbsolute,
        Opcode::JumpForward,
        Opcode::JumpBackward,
        Opcode::JumpAbsoluteIf,
        Opcode::JumpForwardIf,
        Opcode::JumpBackwardIf,
        Opcode::Exit,
        Opcode::BeginBlock,
        Opcode::EndBlock,
        Opcode::InvokeEntry,
        Opcode::JumpToBranch,
        Opcode::RunInstructions,
        Opcode::SetupTraits,
    ];

    /// Assembly mnemonic.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Execute => "execute",
            Opcode::Copy => "copy",
            Opcode::Zero => "zero",
            Opcode::BoolFalse => "false",
            Opcode::BoolTrue => "true",
            Opcode::Increment => "inc",
            Opcode::Decrement => "dec",
            Opcode::Equals => "equals",
            Opcode::NotEquals => "not_equals",
            Opcode::JumpAbsolute => "jump",
            Opcode::JumpForward => "jump_forward",
            Opcode::JumpBackward => "jump_backward",
            Opcode::JumpAbsoluteIf => "jump_if",
            Opcode::JumpForwardIf => "jump_forward_if",
            Opcode::JumpBackwardIf => "jump_backward_if",
            Opcode::Exit => "exit",
            Opcode::BeginBlock => "begin_block",
            Opcode::EndBlock => "end_block",
            Opcode::InvokeEntry => "invoke",
            Opcode::JumpToBranch => "jump_to_branch",
            Opcode::RunInstructions => "run",
            Opcode::SetupTraits => "traits",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Opcode::ALL.iter().copied().find(|opcode| opcode.name() == name)
    }

    /// Alignment of the body, counted from the start of the buffer.
    pub fn alignment(self) -> usize {
        match self {
            Opcode::Exit | Opcode::EndBlock => 1,
            Opcode::Zero
            | Opcode::BoolFalse
            | Opcode::BoolTrue
            | Opcode::Increment
            | Opcode::Decrement
            | Opcode::Copy
            | Opcode::Equals
            | Opcode::NotEquals
            | Opcode::BeginBlock
            | Opcode::SetupTraits => 2,
            Opcode::JumpAbsolute
            | Opcode::JumpForward
            | Opcode::JumpBackward
            | Opcode::JumpAbsoluteIf
            | Opcode::JumpForwardIf
            | Opcode::JumpBackwardIf
            | Opcode::Execute
            | Opcode::InvokeEntry
            | Opcode::JumpToBranch
            | Opcode::RunInstructions => 4,
        }
    }

    /// Size of the fixed part of the body. Execute and SetupTraits append
    /// `count * Operand::SIZE` bytes of operands.
    pub fn header_size(self) -> usize {
        match self {
            Opcode::Zero
            | Opcode::BoolFalse
            | Opcode::BoolTrue
            | Opcode::Increment
            | Opcode::Decrement => 5,
            Opcode::Copy => 11,
            Opcode::Equals | Opcode::NotEquals => 15,
            Opcode::JumpAbsolute | Opcode::JumpForward | Opcode::JumpBackward => 4,
            Opcode::JumpAbsoluteIf | Opcode::JumpForwardIf | Opcode::JumpBackwardIf => 10,
            Opcode::Execute => 10,
            Opcode::Exit | Opcode::EndBlock => 0,
            Opcode::BeginBlock => 10,
            Opcode::InvokeEntry => 4,
            Opcode::JumpToBranch => 11,
            Opcode::RunInstructions => 13,
            Opcode::SetupTraits => 2,
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Opcode::Zero
                | Opcode::BoolFalse
                | Opcode::BoolTrue
                | Opcode::Increment
                | Opcode::Decrement
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::JumpAbsolute | Opcode::JumpForward | Opcode::JumpBackward
        )
    }

    pub fn is_conditional_jump(self) -> bool {
        matches!(
            self,
            Opcode::JumpAbsoluteIf | Opcode::JumpForwardIf | Opcode::JumpBackwardIf
        )
    }

    pub fn jump_mode(self) -> Option<JumpMode> {
        match self {
            Opcode::JumpAbsolute | Opcode::JumpAbsoluteIf => Some(JumpMode::Absolute),
            Opcode::JumpForward | Opcode::JumpForwardIf => Some(JumpMode::Forward),
            Opcode::JumpBackward | Opcode::JumpBackwardIf => Some(JumpMode::Backward),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ByteCodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .get(value as usize)
            .copied()
            .ok_or(ByteCodeError::UnknownOpcode(value))
    }
}

/// How a jump's stored target is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpMode {
    /// Target is an instruction index.
    Absolute,
    /// Target is added to the current index.
    Forward,
    /// Target is subtracted from the current index.
    Backward,
}

impl JumpMode {
    pub fn opcode(self, conditional: bool) -> Opcode {
        match (self, conditional) {
            (JumpMode::Absolute, false) => Opcode::JumpAbsolute,
            (JumpMode::Forward, false) => Opcode::JumpForward,
            (JumpMode::Backward, false) => Opcode::JumpBackward,
            (JumpMode::Absolute, true) => Opcode::JumpAbsoluteIf,
            (JumpMode::Forward, true) => Opcode::JumpForwardIf,
            (JumpMode::Backward, true) => Opcode::JumpBackwardIf,
        }
    }

    /// Resolves a stored target relative to `current`. `None` on underflow.
    pub fn resolve(self, current: usize, stored: u32) -> Option<usize> {
        match self {
            JumpMode::Absolute => Some(stored as usize),
            JumpMode::Forward => current.checked_add(stored as usize),
            JumpMode::Backward => current.checked_sub(stored as usize),
        }
    }

    /// Inverse of [`JumpMode::resolve`].
    pub fn encode(self, current: usize, target: usize) -> Option<u32> {
        let stored = match self {
            JumpMode::Absolute => target,
            JumpMode::Forward => target.checked_sub(current)?,
            JumpMode::Backward => current.checked_sub(target)?,
        };
        u32::try_from(stored).ok()
    }
}

/// Conversion applied by a Copy instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CopyKind {
    #[default]
    Default = 0,
    FloatToDouble = 1,
    DoubleToFloat = 2,
    Int32ToInt64 = 3,
    Int32ToDouble = 4,
}

impl CopyKind {
    pub const ALL: [CopyKind; 5] = [
        CopyKind::Default,
        CopyKind::FloatToDouble,
        CopyKind::DoubleToFloat,
        CopyKind::Int32ToInt64,
        CopyKind::Int32ToDouble,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CopyKind::Default => "default",
            CopyKind::FloatToDouble => "float_to_double",
            CopyKind::DoubleToFloat => "double_to_float",
            CopyKind::Int32ToInt64 => "int32_to_int64",
            CopyKind::Int32ToDouble => "int32_to_double",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        CopyKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

impl TryFrom<u8> for CopyKind {
    type Error = ByteCodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        CopyKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(ByteCodeError::UnknownCopyKind(value))
    }
}
