//! LEB128 varints and zig-zag mapping used by the grid-delta byte stream.

use cloudlink_core::error::{CloudError, Result};

pub fn put_u64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn put_i64(buf: &mut Vec<u8>, value: i64) {
    put_u64(buf, zigzag(value));
}

#[inline]
pub fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub fn unzigzag(n: u64) -> i64 {
    (n >> 1) as i64 ^ -((n & 1) as i64)
}

/// Cursor over a byte slice that reports truncation as a stream error of the
/// owning codec.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    codec: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], codec: &'static str) -> Self {
        Self { buf, pos: 0, codec }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn f64(&mut self) -> Result<f64> {
        let raw = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(f64::from_le_bytes(buf))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.buf.len());
        let Some(end) = end else {
            return Err(self.truncated());
        };
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 {
                return Err(CloudError::stream(self.codec, "varint overflows 64 bits"));
            }
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(CloudError::stream(self.codec, "varint overflows 64 bits"));
            }
        }
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.u64().map(unzigzag)
    }

    /// A count that must be backed by at least `min_bytes_each` remaining
    /// bytes per item, so corrupt counts cannot trigger huge allocations.
    pub fn count(&mut self, min_bytes_each: usize) -> Result<usize> {
        let n = self.u64()?;
        let remaining = (self.buf.len() - self.pos) as u64;
        if n.saturating_mul(min_bytes_each as u64) > remaining {
            return Err(CloudError::stream(
                self.codec,
                format!("count {n} exceeds the {remaining} bytes left"),
            ));
        }
        Ok(n as usize)
    }

    fn truncated(&self) -> CloudError {
        CloudError::stream(self.codec, format!("unexpected end of frame at byte {}", self.pos))
    }
}
