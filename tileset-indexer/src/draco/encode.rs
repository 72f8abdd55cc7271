//! Writer for sequential Draco streams, used to build test fixtures.

/// Little-endian stream builder.
#[derive(Debug, Default)]
pub(crate) struct StreamWriter {
    bytes: Vec<u8>,
}

impl StreamWriter {
    pub fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn i8(&mut self, v: i8) {
        self.bytes.push(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.bytes.extend_from_slice(v);
    }

    pub fn varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.bytes.push((v as u8 & 0x7f) | 0x80);
            v >>= 7;
        }
        self.bytes.push(v as u8);
    }

    /// Bitstream 2.2 header. `kind` 0 is a point cloud, 1 a mesh.
    pub fn header(&mut self, kind: u8, method: u8, flags: u16) {
        self.bytes(b"DRACO");
        self.bytes(&[2, 2, kind, method]);
        self.u16(flags);
    }

    /// Entry list of a metadata block.
    pub fn metadata_entries(&mut self, entries: &[(&str, &str)]) {
        self.varint(entries.len() as u64);
        for (name, value) in entries {
            self.u8(name.len() as u8);
            self.bytes(name.as_bytes());
            self.varint(value.len() as u64);
            self.bytes(value.as_bytes());
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Symbols in the raw layout, scheme byte included.
pub(crate) fn raw_symbols(values: &[u32]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let max = values.iter().copied().max().unwrap_or(0);
    let bit_length = (32 - max.leading_zeros()).max(1);
    assert!(bit_length <= 18, "symbols too wide for the raw layout");
    let precision_bits = (3 * bit_length / 2).clamp(12, 20);
    let table = probability_table(values, max as usize + 1, 1 << precision_bits);

    let mut w = StreamWriter::default();
    w.u8(1);
    w.u8(bit_length as u8);
    write_table(&mut w, &table);
    let data = rans_encode(values, &table, precision_bits);
    w.varint(data.len() as u64);
    w.bytes(&data);
    w.into_bytes()
}

/// Symbols in the tagged layout: coded bit lengths, then the values.
pub(crate) fn tagged_symbols(values: &[u32], components: usize) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let tags: Vec<u32> = values
        .chunks(components)
        .map(|entry| {
            entry
                .iter()
                .map(|v| 32 - v.leading_zeros())
                .max()
                .unwrap_or(0)
                .max(1)
        })
        .collect();
    let max_tag = tags.iter().copied().max().unwrap_or(0);
    let table = probability_table(&tags, max_tag as usize + 1, 1 << 12);

    let mut w = StreamWriter::default();
    w.u8(0);
    write_table(&mut w, &table);
    let data = rans_encode(&tags, &table, 12);
    w.varint(data.len() as u64);
    w.bytes(&data);

    let mut bits = BitWriter::default();
    for (entry, &len) in values.chunks(components).zip(&tags) {
        for &v in entry {
            bits.write(v, len);
        }
    }
    w.bytes(&bits.bytes);
    w.into_bytes()
}

/// A sequential mesh the way glTF exporters write one: compressed
/// connectivity, quantized `POSITION` as unique id 0 and a `u16` batch id
/// attribute as unique id 1, both with wrapped difference prediction.
pub(crate) fn encode_quantized_mesh(
    positions: &[[f32; 3]],
    batch_ids: &[u32],
    faces: &[[u32; 3]],
    bits: u8,
) -> Vec<u8> {
    let mut w = StreamWriter::default();
    w.header(1, 0, 0);
    w.varint(faces.len() as u64);
    w.varint(positions.len() as u64);

    w.u8(0);
    let mut last = 0i64;
    let deltas: Vec<u32> = faces
        .iter()
        .flatten()
        .map(|&index| {
            let delta = i64::from(index) - last;
            last = i64::from(index);
            if delta < 0 {
                ((-delta as u32) << 1) | 1
            } else {
                (delta as u32) << 1
            }
        })
        .collect();
    w.bytes(&raw_symbols(&deltas));

    w.u8(1);
    w.varint(2);
    w.bytes(&[0, 9, 3, 0]);
    w.varint(0);
    w.bytes(&[4, 4, 1, 0]);
    w.varint(1);
    w.bytes(&[2, 1]);

    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in positions {
        for c in 0..3 {
            min[c] = min[c].min(p[c]);
            max[c] = max[c].max(p[c]);
        }
    }
    let range = (0..3).map(|c| max[c] - min[c]).fold(0.0f32, f32::max);
    let max_quantized = ((1u32 << bits) - 1) as f32;
    let quantized: Vec<i32> = positions
        .iter()
        .flat_map(|p| (0..3).map(move |c| ((p[c] - min[c]) / range * max_quantized + 0.5).floor() as i32))
        .collect();
    write_wrapped(&mut w, &quantized, 3, raw_symbols);

    let ids: Vec<i32> = batch_ids.iter().map(|&id| id as i32).collect();
    write_wrapped(&mut w, &ids, 1, |symbols| tagged_symbols(symbols, 1));

    for m in min {
        w.f32(m);
    }
    w.f32(range);
    w.u8(bits);
    w.into_bytes()
}

/// Difference prediction with the wrap transform, then entropy coding.
fn write_wrapped(
    w: &mut StreamWriter,
    values: &[i32],
    components: usize,
    code: impl Fn(&[u32]) -> Vec<u8>,
) {
    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);
    let max_dif = 1 + max - min;
    let min_correction = -(max_dif / 2);
    let max_correction = if max_dif % 2 == 0 { max_dif / 2 - 1 } else { max_dif / 2 };

    let mut predicted = vec![0i32; components];
    let mut symbols = Vec::with_capacity(values.len());
    for entry in values.chunks(components) {
        for (&value, &prediction) in entry.iter().zip(&predicted) {
            let mut correction = value - prediction.clamp(min, max);
            if correction < min_correction {
                correction += max_dif;
            } else if correction > max_correction {
                correction -= max_dif;
            }
            symbols.push(zigzag(correction));
        }
        predicted.copy_from_slice(entry);
    }

    // Difference prediction, wrap transform, compressed
    w.i8(0);
    w.i8(1);
    w.u8(1);
    w.bytes(&code(&symbols));
    w.i32(min);
    w.i32(max);
}

fn zigzag(v: i32) -> u32 {
    if v >= 0 {
        (v as u32) << 1
    } else {
        ((-(v + 1)) as u32) << 1 | 1
    }
}

/// Spreads `precision` evenly over the symbols present in `values`.
fn probability_table(values: &[u32], num_symbols: usize, precision: u32) -> Vec<u32> {
    let mut present = vec![false; num_symbols];
    for &v in values {
        present[v as usize] = true;
    }
    let count = present.iter().filter(|&&p| p).count() as u32;
    let share = precision / count;
    let mut extra = precision % count;
    present
        .iter()
        .map(|&p| {
            if !p {
                return 0;
            }
            let bonus = u32::from(extra > 0);
            extra -= bonus;
            share + bonus
        })
        .collect()
}

fn write_table(w: &mut StreamWriter, table: &[u32]) {
    w.varint(table.len() as u64);
    let mut i = 0;
    while i < table.len() {
        let p = table[i];
        if p == 0 {
            let run = table[i..].iter().take(64).take_while(|&&p| p == 0).count();
            w.u8((((run - 1) << 2) | 3) as u8);
            i += run;
            continue;
        }
        if p < 1 << 6 {
            w.u8((p << 2) as u8);
        } else if p < 1 << 14 {
            w.u8((((p & 0x3f) << 2) | 1) as u8);
            w.u8((p >> 6) as u8);
        } else {
            assert!(p < 1 << 22);
            w.u8((((p & 0x3f) << 2) | 2) as u8);
            w.u8((p >> 6) as u8);
            w.u8((p >> 14) as u8);
        }
        i += 1;
    }
}

/// rANS coding in reverse so the decoder reads symbols front to back. The
/// final state is stored at the end with a 2-bit size tag.
fn rans_encode(values: &[u32], table: &[u32], precision_bits: u32) -> Vec<u8> {
    let precision = 1u32 << precision_bits;
    let base = 4 * precision;
    let mut cumulative = Vec::with_capacity(table.len());
    let mut sum = 0;
    for &p in table {
        cumulative.push(sum);
        sum += p;
    }

    let mut state = base;
    let mut out = Vec::new();
    for &v in values.iter().rev() {
        let p = table[v as usize];
        while state >= base / precision * 256 * p {
            out.push(state as u8);
            state >>= 8;
        }
        state = (state / p) * precision + state % p + cumulative[v as usize];
    }

    let s = state - base;
    if s < 1 << 6 {
        out.push(s as u8);
    } else if s < 1 << 14 {
        out.extend_from_slice(&((1u32 << 14) + s).to_le_bytes()[..2]);
    } else if s < 1 << 22 {
        out.extend_from_slice(&((2u32 << 22) + s).to_le_bytes()[..3]);
    } else {
        out.extend_from_slice(&((3u32 << 30) + s).to_le_bytes());
    }
    out
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    fn write(&mut self, value: u32, len: u32) {
        for i in 0..len {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            if let Some(last) = self.bytes.last_mut() {
                *last |= bit << (self.bits % 8);
            }
            self.bits += 1;
        }
    }
}
