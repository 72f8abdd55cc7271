//! Entropy-coded symbol streams.
//!
//! Symbols are rANS coded against a probability table stored in front of
//! the data. In the raw layout every symbol is a value. In the tagged
//! layout the symbols are bit lengths, and each entry's values follow as
//! plain bits after the rANS data.

use super::buffer::DecoderBuffer;
use super::{DracoError, DracoResult};
use byteorder::{ByteOrder, LE};

const SCHEME_TAGGED: u8 = 0;
const SCHEME_RAW: u8 = 1;

/// Bytes are fed into the coder state one at a time.
const IO_BASE: u32 = 256;

/// Tag tables use the precision of a 5-bit alphabet.
const TAG_PRECISION_BITS: u32 = 12;

/// Decodes `num_values` symbols.
///
/// `num_components` groups the values into entries; only the tagged
/// layout uses it.
pub(crate) fn decode_symbols(
    buffer: &mut DecoderBuffer<'_>,
    num_values: usize,
    num_components: usize,
) -> DracoResult<Vec<u32>> {
    if num_values == 0 {
        return Ok(Vec::new());
    }
    match buffer.read_u8()? {
        SCHEME_TAGGED => decode_tagged(buffer, num_values, num_components),
        SCHEME_RAW => decode_raw(buffer, num_values),
        scheme => Err(DracoError::Invalid(format!("unknown symbol coding {}", scheme))),
    }
}

fn decode_raw(buffer: &mut DecoderBuffer<'_>, num_values: usize) -> DracoResult<Vec<u32>> {
    let max_bit_length = u32::from(buffer.read_u8()?);
    if !(1..=18).contains(&max_bit_length) {
        return Err(DracoError::Invalid(format!(
            "symbol bit length {} out of range",
            max_bit_length
        )));
    }
    let precision_bits = (3 * max_bit_length / 2).clamp(12, 20);

    let mut decoder = RansDecoder::new(buffer, precision_bits)?;
    decoder.start(buffer)?;
    Ok((0..num_values).map(|_| decoder.read()).collect())
}

fn decode_tagged(
    buffer: &mut DecoderBuffer<'_>,
    num_values: usize,
    num_components: usize,
) -> DracoResult<Vec<u32>> {
    if num_components == 0 || num_values % num_components != 0 {
        return Err(DracoError::Invalid(format!(
            "{} tagged values do not split into {} components",
            num_values, num_components
        )));
    }
    let mut tags = RansDecoder::new(buffer, TAG_PRECISION_BITS)?;
    tags.start(buffer)?;

    let mut bits = buffer.bit_reader();
    let mut values = Vec::with_capacity(num_values);
    for _ in 0..num_values / num_components {
        let bit_length = tags.read();
        if bit_length > 32 {
            return Err(DracoError::Invalid(format!("tag of {} bits", bit_length)));
        }
        for _ in 0..num_components {
            values.push(bits.read_bits(bit_length)?);
        }
    }
    buffer.skip(bits.bytes_consumed())?;
    Ok(values)
}

/// rANS decoder with a fixed probability table.
struct RansDecoder<'a> {
    precision: u32,
    /// Lower bound of the normalized state
    base: u32,
    /// `(probability, cumulative probability)` per symbol
    symbols: Vec<(u32, u32)>,
    /// Symbol for every slot of the precision range
    lookup: Vec<u32>,
    data: &'a [u8],
    offset: usize,
    state: u32,
}

impl<'a> RansDecoder<'a> {
    /// Reads the probability table.
    fn new(buffer: &mut DecoderBuffer<'a>, precision_bits: u32) -> DracoResult<Self> {
        let precision = 1u32 << precision_bits;
        let num_symbols = buffer.read_varint_u32()? as usize;
        if num_symbols == 0 {
            return Err(DracoError::Invalid("empty symbol table".into()));
        }
        if num_symbols / 64 > buffer.remaining() {
            return Err(DracoError::Invalid(format!(
                "symbol table of {} entries is larger than the stream",
                num_symbols
            )));
        }

        let probabilities = read_probabilities(buffer, num_symbols)?;
        let mut symbols = Vec::with_capacity(num_symbols);
        let mut lookup = vec![0u32; precision as usize];
        let mut cumulative = 0u32;
        for (symbol, &probability) in probabilities.iter().enumerate() {
            let start = cumulative;
            cumulative = cumulative
                .checked_add(probability)
                .filter(|&c| c <= precision)
                .ok_or_else(|| DracoError::Invalid("symbol probabilities exceed precision".into()))?;
            lookup[start as usize..cumulative as usize].fill(symbol as u32);
            symbols.push((probability, start));
        }
        if cumulative != precision {
            return Err(DracoError::Invalid(format!(
                "symbol probabilities sum to {} instead of {}",
                cumulative, precision
            )));
        }

        Ok(Self {
            precision,
            base: precision * 4,
            symbols,
            lookup,
            data: &[],
            offset: 0,
            state: 0,
        })
    }

    /// Takes the coded bytes out of `buffer` and loads the final state
    /// stored at their end.
    fn start(&mut self, buffer: &mut DecoderBuffer<'a>) -> DracoResult<()> {
        let len = buffer.read_varint_u64()?;
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= buffer.remaining())
            .ok_or_else(|| DracoError::Invalid(format!("rANS data of {} bytes overruns the stream", len)))?;
        let data = buffer.take(len)?;

        let Some(&last) = data.last() else {
            return Err(DracoError::Invalid("empty rANS data".into()));
        };
        let (state_len, mask) = match last >> 6 {
            0 => (1, 0x3f),
            1 => (2, 0x3fff),
            2 => (3, 0x3f_ffff),
            _ => (4, 0x3fff_ffff),
        };
        let Some(offset) = data.len().checked_sub(state_len) else {
            return Err(DracoError::Invalid("rANS state is truncated".into()));
        };

        let state = (LE::read_uint(&data[offset..], state_len) as u32 & mask) + self.base;
        if state >= self.base * IO_BASE {
            return Err(DracoError::Invalid("rANS state out of range".into()));
        }
        self.data = data;
        self.offset = offset;
        self.state = state;
        Ok(())
    }

    fn read(&mut self) -> u32 {
        while self.state < self.base && self.offset > 0 {
            self.offset -= 1;
            self.state = self.state * IO_BASE + u32::from(self.data[self.offset]);
        }
        let quotient = self.state / self.precision;
        let remainder = self.state % self.precision;
        let symbol = self.lookup[remainder as usize];
        let (probability, cumulative) = self.symbols[symbol as usize];
        self.state = quotient * probability + remainder - cumulative;
        symbol
    }
}

/// Probability table: one or more bytes per symbol, with runs of zero
/// probabilities collapsed into a single byte.
fn read_probabilities(buffer: &mut DecoderBuffer<'_>, num_symbols: usize) -> DracoResult<Vec<u32>> {
    let mut probabilities = vec![0u32; num_symbols];
    let mut i = 0;
    while i < num_symbols {
        let first = buffer.read_u8()?;
        let token = first & 3;
        if token == 3 {
            let run = usize::from(first >> 2) + 1;
            if i + run > num_symbols {
                return Err(DracoError::Invalid(
                    "zero-probability run past the symbol table".into(),
                ));
            }
            i += run;
        } else {
            let mut probability = u32::from(first >> 2);
            for extra in 0..u32::from(token) {
                probability |= u32::from(buffer.read_u8()?) << (8 * (extra + 1) - 2);
            }
            probabilities[i] = probability;
            i += 1;
        }
    }
    Ok(probabilities)
}
