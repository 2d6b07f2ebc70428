use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bytecode::{ByteCode, ByteCodeError};
use crate::error::{RigVmError, RigVmResult};
use crate::memory::MemoryLayout;

pub const PACKAGE_MAGIC: &[u8; 4] = b"RVPK";
pub const PACKAGE_VERSION: u16 = 1;

/// A runnable package: bytecode, the three memory layouts and the table of
/// function names Execute instructions index into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub byte_code: ByteCode,
    pub literals: MemoryLayout,
    pub work: MemoryLayout,
    pub externals: MemoryLayout,
    pub functions: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct PackageHeader {
    literals: MemoryLayout,
    work: MemoryLayout,
    externals: MemoryLayout,
    functions: Vec<String>,
}

impl Program {
    pub fn new(byte_code: ByteCode) -> Self {
        Self {
            byte_code,
            ..Self::default()
        }
    }

    /// Interns a function name and returns the index Execute ops use.
    /// Fails once the table outgrows the 16-bit index.
    pub fn add_function(&mut self, name: &str) -> Result<u16, ByteCodeError> {
        if let Some(index) = self.function_index(name) {
            return Ok(index);
        }
        let count = self.functions.len();
        let index = u16::try_from(count).map_err(|_| ByteCodeError::TableOverflow {
            table: "function table",
            count: count + 1,
        })?;
        self.functions.push(name.to_string());
        Ok(index)
    }

    pub fn function_index(&self, name: &str) -> Option<u16> {
        self.functions
            .iter()
            .position(|existing| existing == name)
            .and_then(|index| u16::try_from(index).ok())
    }

    pub fn save(&self) -> RigVmResult<Vec<u8>> {
        let header = bincode::serialize(&PackageHeader {
            literals: self.literals.clone(),
            work: self.work.clone(),
            externals: self.externals.clone(),
            functions: self.functions.clone(),
        })
        .map_err(|err| RigVmError::Package(format!("header encode failed: {err}")))?;
        let code = self.byte_code.save();

        let mut bytes = Vec::with_capacity(header.len() + code.len() + 14);
        bytes.extend_from_slice(PACKAGE_MAGIC);
        bytes.extend_from_slice(&PACKAGE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&(code.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&code);
        Ok(bytes)
    }

    pub fn load(bytes: &[u8]) -> RigVmResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        read_exact(&mut cursor, &mut magic)?;
        if &magic != PACKAGE_MAGIC {
            return Err(RigVmError::Package("invalid package magic".into()));
        }
        let mut version = [0u8; 2];
        read_exact(&mut cursor, &mut version)?;
        let version = u16::from_le_bytes(version);
        if version != PACKAGE_VERSION {
            return Err(RigVmError::Package(format!("unsupported package version {version}")));
        }

        let header = read_block(&mut cursor)?;
        let header: PackageHeader = bincode::deserialize(&header)
            .map_err(|err| RigVmError::Package(format!("header decode failed: {err}")))?;
        let code = read_block(&mut cursor)?;
        let trailing = bytes.len() - cursor.position() as usize;
        if trailing != 0 {
            return Err(RigVmError::Package(format!("{trailing} trailing bytes")));
        }
        Ok(Self {
            byte_code: ByteCode::load(&code)?,
            literals: header.literals,
            work: header.work,
            externals: header.externals,
            functions: header.functions,
        })
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> RigVmResult<()> {
        let path = path.as_ref();
        fs::write(path, self.save()?).map_err(|err| RigVmError::Package(format!("{}: {err}", path.display())))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> RigVmResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| RigVmError::Package(format!("{}: {err}", path.display())))?;
        Self::load(&bytes)
    }
}

fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> RigVmResult<()> {
    cursor
        .read_exact(buf)
        .map_err(|_| RigVmError::Package("unexpected end of package".into()))
}

fn read_block(cursor: &mut Cursor<&[u8]>) -> RigVmResult<Vec<u8>> {
    let mut len = [0u8; 4];
    read_exact(cursor, &mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(RigVmError::Package("unexpected end of package".into()));
    }
    let mut block = vec![0u8; len];
    read_exact(cursor, &mut block)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Operand;
    use crate::memory::Value;

    fn program() -> Program {
        let mut code = ByteCode::new();
        code.add_entry("main").unwrap();
        code.add_copy_op(Operand::literal(0), Operand::work(0));
        code.add_exit_op();
        let mut program = Program::new(code);
        program.literals.add("seed", "int32", Some(Value::Int32(7)));
        program.work.add("value", "int32", None);
        program.add_function("AddInt32").unwrap();
        program
    }

    #[test]
    fn functions_are_interned() {
        let mut program = program();
        assert_eq!(program.add_function("AddInt32"), Ok(0));
        assert_eq!(program.add_function("Log"), Ok(1));
        assert_eq!(program.function_index("Log"), Some(1));
    }

    #[test]
    fn function_table_stops_at_the_index_width() {
        let mut program = Program::default();
        program.functions = (0..=u16::MAX).map(|n| format!("F{n}")).collect();
        assert_eq!(program.add_function("F65535"), Ok(u16::MAX));
        assert_eq!(
            program.add_function("Overflow"),
            Err(ByteCodeError::TableOverflow {
                table: "function table",
                count: 65_537
            })
        );
        assert_eq!(program.functions.len(), 65_536);
    }

    #[test]
    fn package_roundtrip() {
        let program = program();
        let bytes = program.save().unwrap();
        assert_eq!(Program::load(&bytes).unwrap(), program);
    }

    #[test]
    fn truncated_package_is_rejected() {
        let bytes = program().save().unwrap();
        assert!(matches!(
            Program::load(&bytes[..bytes.len() - 1]),
            Err(RigVmError::Package(_))
        ));
        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(Program::load(&bad).is_err());
    }
}
