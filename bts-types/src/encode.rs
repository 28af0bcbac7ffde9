//! Bitcoin consensus encoding.
//!
//! Integers are little-endian. Collection lengths use the CompactSize
//! variable-length encoding:
//!
//! | value range            | bytes                 |
//! |------------------------|-----------------------|
//! | `< 0xfd`               | 1                     |
//! | `<= 0xffff`            | `0xfd` + 2 LE bytes   |
//! | `<= 0xffff_ffff`       | `0xfe` + 4 LE bytes   |
//! | otherwise              | `0xff` + 8 LE bytes   |
//!
//! Decoding rejects non-minimal CompactSize encodings.

use crate::error::{Error, Result};

const U16_SIGNIFIER: u8 = 0xfd;
const U32_SIGNIFIER: u8 = 0xfe;
const U64_SIGNIFIER: u8 = 0xff;

/// Upper bound on any single length-prefixed byte vector (32 MB)
pub const MAX_VEC_SIZE: u64 = 32 * 1024 * 1024;

/// Types with a canonical byte encoding.
pub trait Encodable {
    fn consensus_encode(&self, buf: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.consensus_encode(&mut buf);
        buf
    }
}

/// Types that can be read back from their canonical byte encoding.
pub trait Decodable: Sized {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self>;

    /// Decode from a complete buffer, rejecting trailing bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let value = Self::consensus_decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Bounds-checked cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read a CompactSize, rejecting non-minimal encodings
    pub fn read_compact_size(&mut self) -> Result<u64> {
        let first = self.read_u8()?;
        let (value, min) = match first {
            U16_SIGNIFIER => (self.read_u16()? as u64, U16_SIGNIFIER as u64),
            U32_SIGNIFIER => (self.read_u32()? as u64, 0x1_0000),
            U64_SIGNIFIER => (self.read_u64()?, 0x1_0000_0000),
            small => return Ok(small as u64),
        };
        if value < min {
            return Err(Error::NonCanonicalVarInt);
        }
        Ok(value)
    }

    /// Read a CompactSize used as an element count, bounded by `max`
    pub fn read_count(&mut self, max: u64) -> Result<usize> {
        let count = self.read_compact_size()?;
        if count > max {
            return Err(Error::OversizedVector {
                requested: count,
                max,
            });
        }
        Ok(count as usize)
    }

    /// Read a CompactSize-prefixed byte vector
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_count(MAX_VEC_SIZE)?;
        Ok(self.read_slice(len)?.to_vec())
    }

    /// Fail if any input is left unread
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }
}

pub fn write_compact_size(value: u64, buf: &mut Vec<u8>) {
    if value < U16_SIGNIFIER as u64 {
        buf.push(value as u8);
    } else if value <= 0xffff {
        buf.push(U16_SIGNIFIER);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        buf.push(U32_SIGNIFIER);
        buf.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        buf.push(U64_SIGNIFIER);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn write_var_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    write_compact_size(bytes.len() as u64, buf);
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_compact_size(value, &mut buf);
        buf
    }

    #[test]
    fn test_compact_size_boundaries() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(0xfc), vec![0xfc]);
        assert_eq!(encode(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(encode(0xffff), vec![0xfd, 0xff, 0xff]);
        assert_eq!(encode(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(encode(0x1_0000_0000).len(), 9);

        for value in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let bytes = encode(value);
            let mut reader = Reader::new(&bytes);
            assert_eq!(reader.read_compact_size().unwrap(), value);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn test_non_minimal_compact_size_rejected() {
        let mut reader = Reader::new(&[0xfd, 0x10, 0x00]);
        assert!(matches!(
            reader.read_compact_size(),
            Err(Error::NonCanonicalVarInt)
        ));

        let mut reader = Reader::new(&[0xfe, 0xff, 0xff, 0x00, 0x00]);
        assert!(matches!(
            reader.read_compact_size(),
            Err(Error::NonCanonicalVarInt)
        ));
    }

    #[test]
    fn test_truncated_read_reports_eof() {
        let mut reader = Reader::new(&[0x01, 0x02]);
        let err = reader.read_u32().unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof { offset: 0, needed: 2 }));
    }

    #[test]
    fn test_var_bytes_length_beyond_input() {
        let mut reader = Reader::new(&[0x05, 0xaa, 0xbb]);
        assert!(reader.read_var_bytes().is_err());
    }

    #[test]
    fn test_finish_detects_trailing_bytes() {
        let mut reader = Reader::new(&[0x01, 0x02, 0x03]);
        reader.read_u8().unwrap();
        assert!(matches!(reader.finish(), Err(Error::TrailingBytes(2))));
    }
}
