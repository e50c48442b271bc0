//! Variable-length primitives shared by requests, responses and events.
//!
//! Writers append to any [`BufMut`]. Reading goes through [`Reader`], a
//! cursor over buffered bytes that reports [`ReadError::Incomplete`] instead
//! of consuming a partial value, so a caller can retry once more bytes arrive.

use bytes::{BufMut, Bytes};

use crate::error::{HotRodError, Result};

const MAX_VINT_BYTES: usize = 5;
const MAX_VLONG_BYTES: usize = 10;

/// Writes an unsigned variable-length int.
pub fn write_vint<B: BufMut>(buf: &mut B, value: u32) {
    let mut v = value;
    while v & !0x7F != 0 {
        buf.put_u8(((v & 0x7F) | 0x80) as u8);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Writes an unsigned variable-length long.
pub fn write_vlong<B: BufMut>(buf: &mut B, value: u64) {
    let mut v = value;
    while v & !0x7F != 0 {
        buf.put_u8(((v & 0x7F) | 0x80) as u8);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Writes a zig-zag encoded signed variable-length int.
pub fn write_signed_vint<B: BufMut>(buf: &mut B, value: i32) {
    write_vint(buf, ((value << 1) ^ (value >> 31)) as u32);
}

/// Writes a vint length followed by the bytes.
pub fn write_array<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    write_vint(buf, bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Writes a signed length (`-1` for absent) followed by the bytes.
pub fn write_optional_array<B: BufMut>(buf: &mut B, bytes: Option<&[u8]>) {
    match bytes {
        Some(bytes) => {
            write_signed_vint(buf, bytes.len() as i32);
            buf.put_slice(bytes);
        }
        None => write_signed_vint(buf, -1),
    }
}

/// Writes a UTF-8 string as an array.
pub fn write_string<B: BufMut>(buf: &mut B, value: &str) {
    write_array(buf, value.as_bytes());
}

/// Writes an optional UTF-8 string as an optional array.
pub fn write_optional_string<B: BufMut>(buf: &mut B, value: Option<&str>) {
    write_optional_array(buf, value.map(str::as_bytes));
}

/// Number of bytes [`write_vint`] emits for `value`.
pub fn vint_size(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Number of bytes [`write_vlong`] emits for `value`.
pub fn vlong_size(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Number of bytes [`write_array`] emits for a payload of `len` bytes.
pub fn array_size(len: usize) -> usize {
    vint_size(len as u32) + len
}

/// Outcome of a failed read.
#[derive(Debug)]
pub enum ReadError {
    /// More bytes are needed; nothing was consumed.
    Incomplete,
    /// The bytes cannot be decoded.
    Invalid(HotRodError),
}

impl From<HotRodError> for ReadError {
    fn from(err: HotRodError) -> Self {
        Self::Invalid(err)
    }
}

/// Result of a read step.
pub type ReadResult<T> = std::result::Result<T, ReadError>;

/// Runs `f` over `src` and returns the value with the number of bytes it used.
///
/// `Ok(None)` means `src` does not hold a complete value yet.
pub fn try_read<T>(
    src: &[u8],
    f: impl FnOnce(&mut Reader<'_>) -> ReadResult<T>,
) -> Result<Option<(T, usize)>> {
    let mut reader = Reader::new(src);
    match f(&mut reader) {
        Ok(value) => Ok(Some((value, reader.position()))),
        Err(ReadError::Incomplete) => Ok(None),
        Err(ReadError::Invalid(err)) => Err(err),
    }
}

/// Cursor over buffered bytes.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ReadError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> ReadResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian `i64`.
    pub fn read_i64(&mut self) -> ReadResult<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }

    /// Reads an unsigned variable-length `u32`.
    pub fn read_vint(&mut self) -> ReadResult<u32> {
        let mut result: u32 = 0;
        for i in 0..MAX_VINT_BYTES {
            let b = self.read_u8()?;
            result |= u32::from(b & 0x7F) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(HotRodError::Decode("vint longer than 5 bytes".to_string()).into())
    }

    /// Reads an unsigned variable-length `u64`.
    pub fn read_vlong(&mut self) -> ReadResult<u64> {
        let mut result: u64 = 0;
        for i in 0..MAX_VLONG_BYTES {
            let b = self.read_u8()?;
            result |= u64::from(b & 0x7F) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(HotRodError::Decode("vlong longer than 10 bytes".to_string()).into())
    }

    /// Reads a zig-zag encoded `i32`.
    pub fn read_signed_vint(&mut self) -> ReadResult<i32> {
        let raw = self.read_vint()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> ReadResult<Bytes> {
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    /// Reads a vint length followed by that many bytes.
    pub fn read_array(&mut self) -> ReadResult<Bytes> {
        let len = self.read_vint()? as usize;
        self.read_bytes(len)
    }

    /// Reads an array whose negative length means absent.
    pub fn read_optional_array(&mut self) -> ReadResult<Option<Bytes>> {
        let len = self.read_signed_vint()?;
        if len < 0 {
            return Ok(None);
        }
        self.read_bytes(len as usize).map(Some)
    }

    /// Reads a UTF-8 string array.
    pub fn read_string(&mut self) -> ReadResult<String> {
        let bytes = self.read_array()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HotRodError::Decode(format!("invalid UTF-8 string: {e}")).into())
    }

    /// Optional variant of [`Reader::read_string`].
    pub fn read_optional_string(&mut self) -> ReadResult<Option<String>> {
        match self.read_optional_array()? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| HotRodError::Decode(format!("invalid UTF-8 string: {e}")).into()),
            None => Ok(None),
        }
    }
}
