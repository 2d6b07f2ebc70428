use std::io::{Cursor, Read};

use super::ByteCodeError;

fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> Result<[u8; N], ByteCodeError> {
    let mut buf = [0u8; N];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ByteCodeError::UnexpectedEof)?;
    Ok(buf)
}

pub(crate) fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, ByteCodeError> {
    Ok(read_array::<1>(cursor)?[0])
}

pub(crate) fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, ByteCodeError> {
    Ok(u16::from_le_bytes(read_array(cursor)?))
}

pub(crate) fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, ByteCodeError> {
    Ok(u32::from_le_bytes(read_array(cursor)?))
}

pub(crate) fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, ByteCodeError> {
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if remaining < len {
        return Err(ByteCodeError::UnexpectedEof);
    }
    let mut data = vec![0u8; len];
    cursor
        .read_exact(&mut data)
        .map_err(|_| ByteCodeError::UnexpectedEof)?;
    Ok(data)
}

pub(crate) fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, ByteCodeError> {
    let len = read_u32(cursor)? as usize;
    let data = read_bytes(cursor, len)?;
    String::from_utf8(data).map_err(|_| ByteCodeError::InvalidUtf8)
}

pub(crate) fn read_vec<T, F>(cursor: &mut Cursor<&[u8]>, mut f: F) -> Result<Vec<T>, ByteCodeError>
where
    F: FnMut(&mut Cursor<&[u8]>) -> Result<T, ByteCodeError>,
{
    let len = read_u32(cursor)? as usize;
    let mut values = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        values.push(f(cursor)?);
    }
    Ok(values)
}

pub(crate) fn write_string(bytes: &mut Vec<u8>, value: &str) {
    bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
}

/// Number of zero bytes needed after `position` to reach `alignment`.
pub(crate) fn padding_for(position: usize, alignment: usize) -> usize {
    (alignment - position % alignment) % alignment
}
