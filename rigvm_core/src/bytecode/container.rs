use std::io::Cursor;

use sha2::{Digest, Sha256};

use super::codec::{padding_for, read_bytes, read_string, read_u16, read_u32, read_u8, read_vec, write_string};
use super::op::{
    BeginBlockOp, ComparisonOp, CopyOp, ExecuteOp, InvokeEntryOp, JumpIfOp, JumpOp, JumpToBranchOp,
    RunInstructionsOp, SetupTraitsOp, UnaryOp,
};
use super::{BranchInfo, ByteCodeEntry, ByteCodeError, CopyKind, JumpMode, Op, Opcode, Operand, PredicateBranch};

pub const MAGIC: &[u8; 4] = b"RVBC";
pub const VERSION: u16 = 1;

const FLAG_ALIGNED: u8 = 1;

/// Position of one encoded operation inside a [`ByteCode`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op_code: Opcode,
    pub byte_code_index: usize,
    /// Zero bytes between the opcode and the body.
    pub operand_alignment: u8,
}

impl Instruction {
    fn body_start(&self) -> usize {
        self.byte_code_index + 1 + self.operand_alignment as usize
    }
}

/// Append-only program container: encoded operations plus the entry,
/// branch-info and predicate-branch tables that refer into them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteCode {
    buffer: Vec<u8>,
    aligned: bool,
    num_instructions: u32,
    names: Vec<String>,
    entries: Vec<ByteCodeEntry>,
    branch_infos: Vec<BranchInfo>,
    predicate_branches: Vec<PredicateBranch>,
}

impl Default for ByteCode {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteCode {
    /// Empty container encoding with alignment padding.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            aligned: true,
            num_instructions: 0,
            names: Vec::new(),
            entries: Vec::new(),
            branch_infos: Vec::new(),
            predicate_branches: Vec::new(),
        }
    }

    /// Empty container without padding.
    pub fn packed() -> Self {
        Self {
            aligned: false,
            ..Self::new()
        }
    }

    fn push_op(&mut self, op: &Op) -> usize {
        let offset = self.buffer.len();
        let opcode = op.opcode();
        self.buffer.push(opcode as u8);
        if self.aligned {
            let padding = padding_for(self.buffer.len(), opcode.alignment());
            self.buffer.resize(self.buffer.len() + padding, 0);
        }
        op.encode_body(&mut self.buffer);
        self.num_instructions += 1;
        offset
    }

    /// Appends Zero, BoolFalse, BoolTrue, Increment or Decrement.
    pub fn add_unary_op(&mut self, opcode: Opcode, arg: Operand) -> Result<usize, ByteCodeError> {
        if !opcode.is_unary() {
            return Err(ByteCodeError::Message(format!(
                "'{}' is not a unary op",
                opcode.name()
            )));
        }
        Ok(self.push_op(&Op::Unary(UnaryOp { opcode, arg })))
    }

    pub fn add_copy_op(&mut self, source: Operand, target: Operand) -> usize {
        self.add_copy_op_with_kind(CopyKind::Default, source, target)
    }

    pub fn add_copy_op_with_kind(&mut self, kind: CopyKind, source: Operand, target: Operand) -> usize {
        self.push_op(&Op::Copy(CopyOp {
            kind,
            source,
            target,
        }))
    }

    pub fn add_equals_op(&mut self, a: Operand, b: Operand, result: Operand) -> usize {
        self.push_op(&Op::Comparison(ComparisonOp {
            opcode: Opcode::Equals,
            a,
            b,
            result,
        }))
    }

    pub fn add_not_equals_op(&mut self, a: Operand, b: Operand, result: Operand) -> usize {
        self.push_op(&Op::Comparison(ComparisonOp {
            opcode: Opcode::NotEquals,
            a,
            b,
            result,
        }))
    }

    pub fn add_jump_op(&mut self, mode: JumpMode, target: u32) -> usize {
        self.push_op(&Op::Jump(JumpOp {
            opcode: mode.opcode(false),
            target,
        }))
    }

    pub fn add_jump_if_op(&mut self, mode: JumpMode, arg: Operand, target: u32, condition: bool) -> usize {
        self.push_op(&Op::JumpIf(JumpIfOp {
            opcode: mode.opcode(true),
            target,
            condition,
            arg,
        }))
    }

    /// Appends an Execute op. `predicates` are stored in the
    /// predicate-branch table and attached to this instruction.
    pub fn add_execute_op(
        &mut self,
        function_index: u16,
        operands: &[Operand],
        predicates: &[PredicateBranch],
    ) -> Result<usize, ByteCodeError> {
        fits::<u16>("operand list", operands.len())?;
        let predicate_count = fits::<u16>("predicate branch list", predicates.len())?;
        let first_predicate = fits::<u32>("predicate branch table", self.predicate_branches.len())?;
        fits::<u32>("predicate branch table", self.predicate_branches.len() + predicates.len())?;
        for predicate in predicates {
            self.add_predicate_branch(predicate.clone());
        }
        Ok(self.push_op(&Op::Execute(ExecuteOp {
            function_index,
            first_predicate,
            predicate_count,
            operands: operands.to_vec(),
        })))
    }

    pub fn add_exit_op(&mut self) -> usize {
        self.push_op(&Op::Exit)
    }

    pub fn add_begin_block_op(&mut self, count: Operand, index: Operand) -> usize {
        self.push_op(&Op::BeginBlock(BeginBlockOp { count, index }))
    }

    pub fn add_end_block_op(&mut self) -> usize {
        self.push_op(&Op::EndBlock)
    }

    pub fn add_invoke_entry_op(&mut self, entry_name: &str) -> usize {
        let entry_name = self.intern_name(entry_name);
        self.push_op(&Op::InvokeEntry(InvokeEntryOp { entry_name }))
    }

    /// Appends a JumpToBranch op; every branch is recorded in the
    /// branch-info table against this instruction.
    pub fn add_jump_to_branch_op(&mut self, arg: Operand, branches: &[BranchInfo]) -> Result<usize, ByteCodeError> {
        let branch_count = fits::<u16>("branch list", branches.len())?;
        let first_branch_info = fits::<u32>("branch info table", self.branch_infos.len())?;
        fits::<u32>("branch info table", self.branch_infos.len() + branches.len())?;
        let instruction_index = self.num_instructions;
        for branch in branches {
            self.add_branch_info(BranchInfo {
                instruction_index,
                ..branch.clone()
            });
        }
        Ok(self.push_op(&Op::JumpToBranch(JumpToBranchOp {
            first_branch_info,
            branch_count,
            arg,
        })))
    }

    pub fn add_run_instructions_op(&mut self, guard: Operand, start: u32, end: u32) -> usize {
        self.push_op(&Op::RunInstructions(RunInstructionsOp { start, end, guard }))
    }

    pub fn add_setup_traits_op(&mut self, traits: &[Operand]) -> Result<usize, ByteCodeError> {
        fits::<u16>("trait list", traits.len())?;
        Ok(self.push_op(&Op::SetupTraits(SetupTraitsOp {
            traits: traits.to_vec(),
        })))
    }

    /// Marks the next appended instruction as the start of entry `name`.
    pub fn add_entry(&mut self, name: &str) -> Result<usize, ByteCodeError> {
        if self.find_entry_index(name).is_some() {
            return Err(ByteCodeError::DuplicateEntry(name.to_string()));
        }
        self.entries.push(ByteCodeEntry {
            name: name.to_string(),
            instruction_index: self.num_instructions,
        });
        Ok(self.entries.len() - 1)
    }

    pub fn add_branch_info(&mut self, info: BranchInfo) -> usize {
        self.branch_infos.push(info);
        self.branch_infos.len() - 1
    }

    pub fn add_predicate_branch(&mut self, branch: PredicateBranch) -> usize {
        self.predicate_branches.push(branch);
        self.predicate_branches.len() - 1
    }

    fn intern_name(&mut self, name: &str) -> u32 {
        match self.names.iter().position(|existing| existing == name) {
            Some(index) => index as u32,
            None => {
                self.names.push(name.to_string());
                (self.names.len() - 1) as u32
            }
        }
    }

    /// Decodes the instruction header at `offset` and returns it together
    /// with the offset of the following instruction.
    pub fn instruction_at(&self, offset: usize) -> Result<(Instruction, usize), ByteCodeError> {
        let byte = *self
            .buffer
            .get(offset)
            .ok_or(ByteCodeError::InvalidOffset(offset))?;
        let op_code = Opcode::try_from(byte)?;
        let body = offset + 1;
        let padding = if self.aligned {
            padding_for(body, op_code.alignment())
        } else {
            0
        };
        let start = body + padding;
        if start > self.buffer.len() {
            return Err(ByteCodeError::UnexpectedEof);
        }
        if let Some(position) = self.buffer[body..start].iter().position(|byte| *byte != 0) {
            return Err(ByteCodeError::NonZeroPadding(body + position));
        }
        let count_at = match op_code {
            Opcode::Execute => Some(start + 2),
            Opcode::SetupTraits => Some(start),
            _ => None,
        };
        let count = match count_at {
            Some(at) => match self.buffer.get(at..at + 2) {
                Some(raw) => u16::from_le_bytes([raw[0], raw[1]]) as usize,
                None => return Err(ByteCodeError::UnexpectedEof),
            },
            None => 0,
        };
        let end = start + op_code.header_size() + count * Operand::SIZE;
        if end > self.buffer.len() {
            return Err(ByteCodeError::UnexpectedEof);
        }
        Ok((
            Instruction {
                op_code,
                byte_code_index: offset,
                operand_alignment: padding as u8,
            },
            end,
        ))
    }

    /// Lazy, restartable walk over the instruction headers.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            code: self,
            offset: 0,
        }
    }

    pub fn instruction_list(&self) -> Result<Vec<Instruction>, ByteCodeError> {
        let mut instructions = Vec::with_capacity(self.num_instructions as usize);
        let mut offset = 0;
        while offset < self.buffer.len() {
            let (instruction, next) = self.instruction_at(offset)?;
            instructions.push(instruction);
            offset = next;
        }
        Ok(instructions)
    }

    pub fn get_op(&self, instruction: &Instruction) -> Result<Op, ByteCodeError> {
        let start = instruction.body_start();
        let body = self.buffer.get(start..).ok_or(ByteCodeError::UnexpectedEof)?;
        let mut cursor = Cursor::new(body);
        Op::decode_body(instruction.op_code, &mut cursor)
    }

    pub fn get_op_at(&self, offset: usize) -> Result<Op, ByteCodeError> {
        let (instruction, _) = self.instruction_at(offset)?;
        self.get_op(&instruction)
    }

    pub fn get_operands_for(&self, instruction: &Instruction) -> Result<Vec<Operand>, ByteCodeError> {
        Ok(self.get_op(instruction)?.operands())
    }

    /// Every operation, in order.
    pub fn ops(&self) -> Result<Vec<Op>, ByteCodeError> {
        self.instruction_list()?
            .iter()
            .map(|instruction| self.get_op(instruction))
            .collect()
    }

    /// Rewrites the stored target of the jump at byte `offset`.
    pub fn set_jump_target(&mut self, offset: usize, target: u32) -> Result<(), ByteCodeError> {
        let (instruction, _) = self.instruction_at(offset)?;
        if !instruction.op_code.is_jump() && !instruction.op_code.is_conditional_jump() {
            return Err(ByteCodeError::NotAJump(offset));
        }
        let start = instruction.body_start();
        self.buffer[start..start + 4].copy_from_slice(&target.to_le_bytes());
        Ok(())
    }

    pub fn set_run_instructions_range(&mut self, offset: usize, start: u32, end: u32) -> Result<(), ByteCodeError> {
        let (instruction, _) = self.instruction_at(offset)?;
        if instruction.op_code != Opcode::RunInstructions {
            return Err(ByteCodeError::NotARunInstructions(offset));
        }
        let at = instruction.body_start();
        self.buffer[at..at + 4].copy_from_slice(&start.to_le_bytes());
        self.buffer[at + 4..at + 8].copy_from_slice(&end.to_le_bytes());
        Ok(())
    }

    pub fn set_predicate_branch_range(&mut self, index: usize, first: u32, last: u32) -> Result<(), ByteCodeError> {
        let branch = self
            .predicate_branches
            .get_mut(index)
            .ok_or(ByteCodeError::UnknownPredicateBranch(index))?;
        branch.first = first;
        branch.last = last;
        Ok(())
    }

    pub fn set_branch_info_range(&mut self, index: usize, first: u32, last: u32) -> Result<(), ByteCodeError> {
        let info = self
            .branch_infos
            .get_mut(index)
            .ok_or(ByteCodeError::UnknownBranchInfo(index))?;
        info.first = first;
        info.last = last;
        Ok(())
    }

    pub fn num_instructions(&self) -> usize {
        self.num_instructions as usize
    }

    pub fn num_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_instructions == 0
    }

    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn entries(&self) -> &[ByteCodeEntry] {
        &self.entries
    }

    pub fn find_entry_index(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    /// Instruction range `[start, end)` of the entry at `index`; an entry
    /// runs up to the start of the next one.
    pub fn entry_range(&self, index: usize) -> Option<(usize, usize)> {
        let entry = self.entries.get(index)?;
        let start = entry.instruction_index as usize;
        let end = self
            .entries
            .iter()
            .map(|other| other.instruction_index as usize)
            .filter(|other| *other > start)
            .min()
            .unwrap_or(self.num_instructions as usize);
        Some((start, end))
    }

    pub fn branch_infos(&self) -> &[BranchInfo] {
        &self.branch_infos
    }

    /// Branches owned by one JumpToBranch op. An op without branches owns
    /// no rows even when later ops have some.
    pub fn branch_infos_for(&self, op: &JumpToBranchOp) -> &[BranchInfo] {
        let start = op.first_branch_info as usize;
        let end = start + op.branch_count as usize;
        self.branch_infos.get(start..end).unwrap_or(&[])
    }

    pub fn predicate_branches(&self) -> &[PredicateBranch] {
        &self.predicate_branches
    }

    pub fn predicate_branches_for(&self, op: &ExecuteOp) -> &[PredicateBranch] {
        let start = op.first_predicate as usize;
        let end = start + op.predicate_count as usize;
        self.predicate_branches.get(start..end).unwrap_or(&[])
    }

    /// Empties the container, keeping its alignment mode.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.num_instructions = 0;
        self.names.clear();
        self.entries.clear();
        self.branch_infos.clear();
        self.predicate_branches.clear();
    }

    pub fn align_byte_code(&mut self) -> Result<(), ByteCodeError> {
        self.reencode(true)
    }

    pub fn pack_byte_code(&mut self) -> Result<(), ByteCodeError> {
        self.reencode(false)
    }

    fn reencode(&mut self, aligned: bool) -> Result<(), ByteCodeError> {
        if self.aligned == aligned {
            return Ok(());
        }
        let ops = self.ops()?;
        self.buffer.clear();
        self.num_instructions = 0;
        self.aligned = aligned;
        for op in &ops {
            self.push_op(op);
        }
        Ok(())
    }

    /// Structural hash over the decoded operations and the table rows they
    /// reference. Padding and table positions do not contribute.
    pub fn byte_code_hash(&self) -> u32 {
        let mut hasher = Sha256::new();
        hasher.update(self.num_instructions.to_le_bytes());
        for instruction in self.instructions() {
            let Ok(op) = self.get_op(&instruction) else {
                break;
            };
            let mut bytes = vec![instruction.op_code as u8];
            match &op {
                Op::Execute(execute) => {
                    bytes.extend_from_slice(&execute.function_index.to_le_bytes());
                    bytes.extend_from_slice(&(execute.operands.len() as u16).to_le_bytes());
                    for operand in &execute.operands {
                        operand.encode(&mut bytes);
                    }
                    for predicate in self.predicate_branches_for(execute) {
                        predicate.encode(&mut bytes);
                    }
                }
                Op::InvokeEntry(invoke) => {
                    write_string(&mut bytes, self.name(invoke.entry_name).unwrap_or_default());
                }
                Op::JumpToBranch(jump) => {
                    jump.arg.encode(&mut bytes);
                    for info in self.branch_infos_for(jump) {
                        write_string(&mut bytes, &info.label);
                        bytes.extend_from_slice(&info.argument_index.to_le_bytes());
                        bytes.extend_from_slice(&info.first.to_le_bytes());
                        bytes.extend_from_slice(&info.last.to_le_bytes());
                    }
                }
                other => other.encode_body(&mut bytes),
            }
            hasher.update((bytes.len() as u32).to_le_bytes());
            hasher.update(&bytes);
        }
        for entry in &self.entries {
            hasher.update(entry.name.as_bytes());
            hasher.update(entry.instruction_index.to_le_bytes());
        }
        let digest = hasher.finalize();
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    pub fn save(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.buffer.len() + 64);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.push(if self.aligned { FLAG_ALIGNED } else { 0 });
        bytes.extend_from_slice(&self.num_instructions.to_le_bytes());
        bytes.extend_from_slice(&(self.buffer.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.buffer);

        bytes.extend_from_slice(&(self.names.len() as u32).to_le_bytes());
        for name in &self.names {
            write_string(&mut bytes, name);
        }
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            write_string(&mut bytes, &entry.name);
            bytes.extend_from_slice(&entry.instruction_index.to_le_bytes());
        }
        bytes.extend_from_slice(&(self.branch_infos.len() as u32).to_le_bytes());
        for info in &self.branch_infos {
            info.encode(&mut bytes);
        }
        bytes.extend_from_slice(&(self.predicate_branches.len() as u32).to_le_bytes());
        for branch in &self.predicate_branches {
            branch.encode(&mut bytes);
        }
        bytes
    }

    /// Decodes and validates a saved container.
    pub fn load(bytes: &[u8]) -> Result<Self, ByteCodeError> {
        let mut cursor = Cursor::new(bytes);
        let magic = read_bytes(&mut cursor, MAGIC.len())?;
        if magic.as_slice() != MAGIC {
            return Err(ByteCodeError::InvalidMagic);
        }
        let version = read_u16(&mut cursor)?;
        if version != VERSION {
            return Err(ByteCodeError::UnsupportedVersion(version));
        }
        let flags = read_u8(&mut cursor)?;
        let num_instructions = read_u32(&mut cursor)?;
        let buffer_len = read_u32(&mut cursor)? as usize;
        let buffer = read_bytes(&mut cursor, buffer_len)?;
        let names = read_vec(&mut cursor, read_string)?;
        let entries = read_vec(&mut cursor, |cursor| {
            Ok(ByteCodeEntry {
                name: read_string(cursor)?,
                instruction_index: read_u32(cursor)?,
            })
        })?;
        let branch_infos = read_vec(&mut cursor, BranchInfo::decode)?;
        let predicate_branches = read_vec(&mut cursor, PredicateBranch::decode)?;
        let trailing = bytes.len() - cursor.position() as usize;
        if trailing != 0 {
            return Err(ByteCodeError::TrailingBytes(trailing));
        }

        let code = Self {
            buffer,
            aligned: flags & FLAG_ALIGNED != 0,
            num_instructions,
            names,
            entries,
            branch_infos,
            predicate_branches,
        };
        code.validate()?;
        Ok(code)
    }

    /// Decodes every instruction and checks every table reference.
    pub fn validate(&self) -> Result<(), ByteCodeError> {
        let instructions = self.instruction_list()?;
        if instructions.len() != self.num_instructions as usize {
            return Err(ByteCodeError::InstructionCountMismatch {
                expected: self.num_instructions,
                found: instructions.len() as u32,
            });
        }
        for instruction in &instructions {
            match self.get_op(instruction)? {
                Op::InvokeEntry(op) if self.name(op.entry_name).is_none() => {
                    return Err(ByteCodeError::Message(format!(
                        "instruction at byte {} names unknown entry {}",
                        instruction.byte_code_index, op.entry_name
                    )));
                }
                Op::Execute(op)
                    if op.first_predicate as usize + op.predicate_count as usize
                        > self.predicate_branches.len() =>
                {
                    return Err(ByteCodeError::UnknownPredicateBranch(op.first_predicate as usize));
                }
                Op::JumpToBranch(op)
                    if op.first_branch_info as usize + op.branch_count as usize > self.branch_infos.len() =>
                {
                    return Err(ByteCodeError::UnknownBranchInfo(op.first_branch_info as usize));
                }
                _ => {}
            }
        }
        if let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.instruction_index > self.num_instructions)
        {
            return Err(ByteCodeError::Message(format!(
                "entry '{}' starts past the last instruction",
                entry.name
            )));
        }
        Ok(())
    }
}

/// Converts a table length or position into the width its encoded field
/// holds.
fn fits<T: TryFrom<usize>>(table: &'static str, count: usize) -> Result<T, ByteCodeError> {
    T::try_from(count).map_err(|_| ByteCodeError::TableOverflow { table, count })
}

/// Iterator returned by [`ByteCode::instructions`]. Stops at the first
/// undecodable header.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    code: &'a ByteCode,
    offset: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        if self.offset >= self.code.buffer.len() {
            return None;
        }
        match self.code.instruction_at(self.offset) {
            Ok((instruction, next)) => {
                self.offset = next;
                Some(instruction)
            }
            Err(_) => {
                self.offset = self.code.buffer.len();
                None
            }
        }
    }
}
