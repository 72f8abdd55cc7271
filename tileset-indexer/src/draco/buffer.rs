//! Little-endian cursor over a Draco bitstream.

use super::{DracoError, DracoResult};
use byteorder::{ByteOrder, LE};

/// Packs a bitstream version as `major << 8 | minor`.
pub(crate) const fn bitstream_version(major: u8, minor: u8) -> u16 {
    (major as u16) << 8 | minor as u16
}

/// Longest LEB128 encodings Draco accepts for 32 and 64 bit varints.
const MAX_VARINT32_BYTES: usize = 5;
const MAX_VARINT64_BYTES: usize = 10;

pub(crate) struct DecoderBuffer<'a> {
    data: &'a [u8],
    pos: usize,
    version: u16,
}

impl<'a> DecoderBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            version: bitstream_version(2, 2),
        }
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn set_version(&mut self, version: u16) {
        self.version = version;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> DracoResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DracoError::Truncated { offset: self.pos })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> DracoResult<()> {
        self.take(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> DracoResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> DracoResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> DracoResult<u16> {
        Ok(LE::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> DracoResult<u32> {
        Ok(LE::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> DracoResult<i32> {
        Ok(LE::read_i32(self.take(4)?))
    }

    pub fn read_f32(&mut self) -> DracoResult<f32> {
        Ok(LE::read_f32(self.take(4)?))
    }

    pub fn read_varint_u32(&mut self) -> DracoResult<u32> {
        let start = self.pos;
        let value = self.read_leb128(MAX_VARINT32_BYTES)?;
        u32::try_from(value).map_err(|_| {
            DracoError::Invalid(format!("varint at byte {} exceeds 32 bits", start))
        })
    }

    pub fn read_varint_u64(&mut self) -> DracoResult<u64> {
        self.read_leb128(MAX_VARINT64_BYTES)
    }

    fn read_leb128(&mut self, max_bytes: usize) -> DracoResult<u64> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let bits = u64::from(byte & 0x7f);
            let shift = 7 * i as u32;
            if shift > 0 && bits >> (64 - shift) != 0 {
                return Err(DracoError::Invalid(format!(
                    "varint at byte {} overflows 64 bits",
                    start
                )));
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DracoError::Invalid(format!("varint at byte {} is too long", start)))
    }

    /// Bit reader over the unread bytes. The buffer does not advance until
    /// [`skip`](Self::skip) is called with [`BitReader::bytes_consumed`].
    pub fn bit_reader(&self) -> BitReader<'a> {
        BitReader {
            data: &self.data[self.pos..],
            base: self.pos,
            bit: 0,
        }
    }
}

/// Least-significant-bit-first reader.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    base: usize,
    bit: usize,
}

impl BitReader<'_> {
    pub fn read_bits(&mut self, count: u32) -> DracoResult<u32> {
        debug_assert!(count <= 32);
        let mut value = 0u32;
        for i in 0..count {
            let byte = self.data.get(self.bit / 8).ok_or(DracoError::Truncated {
                offset: self.base + self.bit / 8,
            })?;
            value |= u32::from((byte >> (self.bit % 8)) & 1) << i;
            self.bit += 1;
        }
        Ok(value)
    }

    pub fn bytes_consumed(&self) -> usize {
        self.bit.div_ceil(8)
    }
}
