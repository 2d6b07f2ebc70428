use std::convert::TryFrom;
use std::io::Cursor;

use super::codec::{read_u16, read_u32, read_u8};
use super::{ByteCodeError, CopyKind, Opcode, Operand};

/// Zero, BoolFalse, BoolTrue, Increment, Decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryOp {
    pub opcode: Opcode,
    pub arg: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOp {
    pub kind: CopyKind,
    pub source: Operand,
    pub target: Operand,
}

/// Equals, NotEquals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonOp {
    pub opcode: Opcode,
    pub a: Operand,
    pub b: Operand,
    pub result: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpOp {
    pub opcode: Opcode,
    /// Absolute index or relative distance, depending on the opcode.
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpIfOp {
    pub opcode: Opcode,
    pub target: u32,
    /// The jump is taken when the argument equals this value.
    pub condition: bool,
    pub arg: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOp {
    pub function_index: u16,
    pub first_predicate: u32,
    pub predicate_count: u16,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginBlockOp {
    pub count: Operand,
    pub index: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeEntryOp {
    /// Index into the container's name table.
    pub entry_name: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpToBranchOp {
    pub first_branch_info: u32,
    pub branch_count: u16,
    pub arg: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstructionsOp {
    pub start: u32,
    pub end: u32,
    /// Bool register memoizing the run; [`Operand::NONE`] runs every time.
    pub guard: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupTraitsOp {
    pub traits: Vec<Operand>,
}

/// One decoded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Unary(UnaryOp),
    Copy(CopyOp),
    Comparison(ComparisonOp),
    Jump(JumpOp),
    JumpIf(JumpIfOp),
    Execute(ExecuteOp),
    Exit,
    BeginBlock(BeginBlockOp),
    EndBlock,
    InvokeEntry(InvokeEntryOp),
    JumpToBranch(JumpToBranchOp),
    RunInstructions(RunInstructionsOp),
    SetupTraits(SetupTraitsOp),
}

impl Op {
    pub fn opcode(&self) -> Opcode {
        match self {
            Op::Unary(op) => op.opcode,
            Op::Copy(_) => Opcode::Copy,
            Op::Comparison(op) => op.opcode,
            Op::Jump(op) => op.opcode,
            Op::JumpIf(op) => op.opcode,
            Op::Execute(_) => Opcode::Execute,
            Op::Exit => Opcode::Exit,
            Op::BeginBlock(_) => Opcode::BeginBlock,
            Op::EndBlock => Opcode::EndBlock,
            Op::InvokeEntry(_) => Opcode::InvokeEntry,
            Op::JumpToBranch(_) => Opcode::JumpToBranch,
            Op::RunInstructions(_) => Opcode::RunInstructions,
            Op::SetupTraits(_) => Opcode::SetupTraits,
        }
    }

    /// Every operand the op carries, in encoding order.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Op::Unary(op) => vec![op.arg],
            Op::Copy(op) => vec![op.source, op.target],
            Op::Comparison(op) => vec![op.a, op.b, op.result],
            Op::JumpIf(op) => vec![op.arg],
            Op::Execute(op) => op.operands.clone(),
            Op::BeginBlock(op) => vec![op.count, op.index],
            Op::JumpToBranch(op) => vec![op.arg],
            Op::RunInstructions(op) => vec![op.guard],
            Op::SetupTraits(op) => op.traits.clone(),
            Op::Jump(_) | Op::Exit | Op::EndBlock | Op::InvokeEntry(_) => Vec::new(),
        }
    }

    pub(crate) fn body_size(&self) -> usize {
        let extra = match self {
            Op::Execute(op) => op.operands.len() * Operand::SIZE,
            Op::SetupTraits(op) => op.traits.len() * Operand::SIZE,
            _ => 0,
        };
        self.opcode().header_size() + extra
    }

    pub(crate) fn encode_body(&self, bytes: &mut Vec<u8>) {
        match self {
            Op::Unary(op) => op.arg.encode(bytes),
            Op::Copy(op) => {
                bytes.push(op.kind as u8);
                op.source.encode(bytes);
                op.target.encode(bytes);
            }
            Op::Comparison(op) => {
                op.a.encode(bytes);
                op.b.encode(bytes);
                op.result.encode(bytes);
            }
            Op::Jump(op) => bytes.extend_from_slice(&op.target.to_le_bytes()),
            Op::JumpIf(op) => {
                bytes.extend_from_slice(&op.target.to_le_bytes());
                bytes.push(u8::from(op.condition));
                op.arg.encode(bytes);
            }
            // Counts are range-checked by the container before an op is encoded.
            Op::Execute(op) => {
                bytes.extend_from_slice(&op.function_index.to_le_bytes());
                bytes.extend_from_slice(&(op.operands.len() as u16).to_le_bytes());
                bytes.extend_from_slice(&op.first_predicate.to_le_bytes());
                bytes.extend_from_slice(&op.predicate_count.to_le_bytes());
                for operand in &op.operands {
                    operand.encode(bytes);
                }
            }
            Op::Exit | Op::EndBlock => {}
            Op::BeginBlock(op) => {
                op.count.encode(bytes);
                op.index.encode(bytes);
            }
            Op::InvokeEntry(op) => bytes.extend_from_slice(&op.entry_name.to_le_bytes()),
            Op::JumpToBranch(op) => {
                bytes.extend_from_slice(&op.first_branch_info.to_le_bytes());
                bytes.extend_from_slice(&op.branch_count.to_le_bytes());
                op.arg.encode(bytes);
            }
            Op::RunInstructions(op) => {
                bytes.extend_from_slice(&op.start.to_le_bytes());
                bytes.extend_from_slice(&op.end.to_le_bytes());
                op.guard.encode(bytes);
            }
            Op::SetupTraits(op) => {
                bytes.extend_from_slice(&(op.traits.len() as u16).to_le_bytes());
                for operand in &op.traits {
                    operand.encode(bytes);
                }
            }
        }
    }

    pub(crate) fn decode_body(opcode: Opcode, cursor: &mut Cursor<&[u8]>) -> Result<Op, ByteCodeError> {
        let op = match opcode {
            Opcode::Zero
            | Opcode::BoolFalse
            | Opcode::BoolTrue
            | Opcode::Increment
            | Opcode::Decrement => Op::Unary(UnaryOp {
                opcode,
                arg: Operand::decode(cursor)?,
            }),
            Opcode::Copy => Op::Copy(CopyOp {
                kind: CopyKind::try_from(read_u8(cursor)?)?,
                source: Operand::decode(cursor)?,
                target: Operand::decode(cursor)?,
            }),
            Opcode::Equals | Opcode::NotEquals => Op::Comparison(ComparisonOp {
                opcode,
                a: Operand::decode(cursor)?,
                b: Operand::decode(cursor)?,
                result: Operand::decode(cursor)?,
            }),
            Opcode::JumpAbsolute | Opcode::JumpForward | Opcode::JumpBackward => Op::Jump(JumpOp {
                opcode,
                target: read_u32(cursor)?,
            }),
            Opcode::JumpAbsoluteIf | Opcode::JumpForwardIf | Opcode::JumpBackwardIf => {
                let target = read_u32(cursor)?;
                let condition = match read_u8(cursor)? {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(ByteCodeError::Message(format!(
                            "invalid jump condition byte {other}"
                        )))
                    }
                };
                Op::JumpIf(JumpIfOp {
                    opcode,
                    target,
                    condition,
                    arg: Operand::decode(cursor)?,
                })
            }
            Opcode::Execute => {
                let function_index = read_u16(cursor)?;
                let count = read_u16(cursor)? as usize;
                let first_predicate = read_u32(cursor)?;
                let predicate_count = read_u16(cursor)?;
                let mut operands = Vec::with_capacity(count);
                for _ in 0..count {
                    operands.push(Operand::decode(cursor)?);
                }
                Op::Execute(ExecuteOp {
                    function_index,
                    first_predicate,
                    predicate_count,
                    operands,
                })
            }
            Opcode::Exit => Op::Exit,
            Opcode::BeginBlock => Op::BeginBlock(BeginBlockOp {
                count: Operand::decode(cursor)?,
                index: Operand::decode(cursor)?,
            }),
            Opcode::EndBlock => Op::EndBlock,
            Opcode::InvokeEntry => Op::InvokeEntry(InvokeEntryOp {
                entry_name: read_u32(cursor)?,
            }),
            Opcode::JumpToBranch => Op::JumpToBranch(JumpToBranchOp {
                first_branch_info: read_u32(cursor)?,
                branch_count: read_u16(cursor)?,
                arg: Operand::decode(cursor)?,
            }),
            Opcode::RunInstructions => Op::RunInstructions(RunInstructionsOp {
                start: read_u32(cursor)?,
                end: read_u32(cursor)?,
                guard: Operand::decode(cursor)?,
            }),
            Opcode::SetupTraits => {
                let count = read_u16(cursor)? as usize;
                let mut traits = Vec::with_capacity(count);
                for _ in 0..count {
                    traits.push(Operand::decode(cursor)?);
                }
                Op::SetupTraits(SetupTraitsOp { traits })
            }
        };
        Ok(op)
    }
}
