//! Sequential attribute decoding.
//!
//! Attributes are grouped into decoders. Each decoder stores all of its
//! attribute descriptors up front, then the per-point values of every
//! attribute, then the data needed to map those values back to their
//! original form (quantization ranges and the like).

use super::buffer::{bitstream_version, DecoderBuffer};
use super::symbols::decode_symbols;
use super::{AttributeType, DataType, DracoAttribute, DracoError, DracoResult, MAX_VALUES};
use byteorder::{ByteOrder, LE};

const PREDICTION_NONE: i8 = -2;
/// Prediction methods up to this value are valid. Mesh predictors need
/// edgebreaker connectivity, so every method decodes as a difference.
const PREDICTION_MAX: i8 = 6;

const TRANSFORM_NONE: i8 = -1;
const TRANSFORM_WRAP: i8 = 1;
const TRANSFORM_OCTAHEDRON: i8 = 2;
const TRANSFORM_OCTAHEDRON_CANONICALIZED: i8 = 3;

/// How an attribute's values are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    /// Raw values in their own data type
    Generic,
    /// Entropy-coded integers
    Integer,
    /// Floats quantized to integers
    Quantization,
    /// Unit vectors in octahedral coordinates
    Normals,
}

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    attribute_type: AttributeType,
    data_type: DataType,
    num_components: usize,
    normalized: bool,
    unique_id: u32,
}

/// Attributes of one decoder, as declared in the stream.
pub(crate) struct AttributeGroup {
    attributes: Vec<(Descriptor, Codec)>,
}

/// Values after the portable pass.
enum Portable {
    Values(Vec<f64>),
    Integers(Vec<i32>),
    Octahedral,
}

/// Prediction applied to integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prediction {
    Wrap,
    Octahedron,
}

impl AttributeGroup {
    /// Reads the descriptors and codec ids of one decoder.
    pub fn read(buffer: &mut DecoderBuffer<'_>) -> DracoResult<Self> {
        let num_attributes = buffer.read_varint_u32()? as usize;
        if num_attributes == 0 {
            return Err(DracoError::Invalid("attribute decoder without attributes".into()));
        }
        if num_attributes > 5 * buffer.remaining() {
            return Err(DracoError::Invalid(format!(
                "{} attributes declared in {} bytes",
                num_attributes,
                buffer.remaining()
            )));
        }

        let mut descriptors = Vec::with_capacity(num_attributes);
        for _ in 0..num_attributes {
            let attribute_type = AttributeType::from_u8(buffer.read_u8()?)?;
            let data_type = DataType::from_u8(buffer.read_u8()?)?;
            let num_components = usize::from(buffer.read_u8()?);
            let normalized = buffer.read_u8()? > 0;
            if num_components == 0 {
                return Err(DracoError::Invalid("attribute with zero components".into()));
            }
            let unique_id = buffer.read_varint_u32()?;
            descriptors.push(Descriptor {
                attribute_type,
                data_type,
                num_components,
                normalized,
                unique_id,
            });
        }

        let mut attributes = Vec::with_capacity(num_attributes);
        for descriptor in descriptors {
            let codec = match buffer.read_u8()? {
                0 => Codec::Generic,
                1 => Codec::Integer,
                2 => Codec::Quantization,
                3 => Codec::Normals,
                other => {
                    return Err(DracoError::Invalid(format!(
                        "unknown attribute decoder {}",
                        other
                    )))
                }
            };
            check_codec(&descriptor, codec)?;
            attributes.push((descriptor, codec));
        }
        Ok(Self { attributes })
    }

    /// Decodes the values of every attribute for `num_points` points.
    pub fn decode(
        &self,
        buffer: &mut DecoderBuffer<'_>,
        num_points: usize,
    ) -> DracoResult<Vec<DracoAttribute>> {
        let mut portable = Vec::with_capacity(self.attributes.len());
        for (descriptor, codec) in &self.attributes {
            portable.push(decode_portable(buffer, num_points, descriptor, *codec)?);
        }

        let mut out = Vec::with_capacity(self.attributes.len());
        for ((descriptor, codec), values) in self.attributes.iter().zip(portable) {
            let values = match (codec, values) {
                (Codec::Generic, Portable::Values(values)) => Some(values),
                (Codec::Integer, Portable::Integers(values)) => Some(
                    values
                        .into_iter()
                        .map(|v| descriptor.data_type.from_portable(v))
                        .collect(),
                ),
                (Codec::Quantization, Portable::Integers(values)) => {
                    Some(dequantize(buffer, descriptor.num_components, &values)?)
                }
                (Codec::Normals, _) => {
                    // Octahedral quantization bits; the vectors are not rebuilt
                    buffer.skip(1)?;
                    None
                }
                _ => return Err(DracoError::Invalid("attribute decoder mismatch".into())),
            };
            out.push(DracoAttribute {
                unique_id: descriptor.unique_id,
                attribute_type: descriptor.attribute_type,
                data_type: descriptor.data_type,
                num_components: descriptor.num_components,
                normalized: descriptor.normalized,
                values,
            });
        }
        Ok(out)
    }
}

fn check_codec(descriptor: &Descriptor, codec: Codec) -> DracoResult<()> {
    let ok = match codec {
        Codec::Generic => true,
        Codec::Integer => !descriptor.data_type.is_float(),
        Codec::Quantization => descriptor.data_type == DataType::Float32,
        Codec::Normals => descriptor.data_type == DataType::Float32 && descriptor.num_components == 3,
    };
    if ok {
        Ok(())
    } else {
        Err(DracoError::Invalid(format!(
            "{:?} decoder cannot store {} x {:?}",
            codec, descriptor.num_components, descriptor.data_type
        )))
    }
}

fn decode_portable(
    buffer: &mut DecoderBuffer<'_>,
    num_points: usize,
    descriptor: &Descriptor,
    codec: Codec,
) -> DracoResult<Portable> {
    let components = match codec {
        Codec::Normals => 2,
        _ => descriptor.num_components,
    };
    let num_values = num_points
        .checked_mul(components)
        .filter(|&n| n <= MAX_VALUES)
        .ok_or_else(|| {
            DracoError::Invalid(format!(
                "{} points of {} components exceed the value limit",
                num_points, components
            ))
        })?;

    if codec == Codec::Generic {
        let size = descriptor.data_type.size();
        let bytes = buffer.take(num_values * size)?;
        let values = bytes
            .chunks_exact(size)
            .map(|b| descriptor.data_type.read(b))
            .collect();
        return Ok(Portable::Values(values));
    }

    let prediction = read_prediction(buffer, codec)?;
    let mut values = read_integers(buffer, num_values, components)?;
    if prediction != Some(Prediction::Octahedron) {
        for value in &mut values {
            *value = unzigzag(*value as u32);
        }
    }

    match prediction {
        Some(Prediction::Wrap) => {
            let min = buffer.read_i32()?;
            let max = buffer.read_i32()?;
            undo_wrapped_differences(&mut values, components, min, max)?;
        }
        Some(Prediction::Octahedron) => {
            // Maximum quantized value, plus the center value before 2.2
            buffer.skip(4)?;
            if buffer.version() < bitstream_version(2, 2) {
                buffer.skip(4)?;
            }
        }
        None => {}
    }

    Ok(if codec == Codec::Normals {
        Portable::Octahedral
    } else {
        Portable::Integers(values)
    })
}

/// Reads the prediction header. Only transforms the codec can invert
/// produce a prediction; others leave the values as coded.
fn read_prediction(buffer: &mut DecoderBuffer<'_>, codec: Codec) -> DracoResult<Option<Prediction>> {
    let method = buffer.read_i8()?;
    if method == PREDICTION_NONE {
        return Ok(None);
    }
    if !(PREDICTION_NONE..=PREDICTION_MAX).contains(&method) {
        return Err(DracoError::Invalid(format!("unknown prediction method {}", method)));
    }
    let transform = buffer.read_i8()?;
    if !(TRANSFORM_NONE..=TRANSFORM_OCTAHEDRON_CANONICALIZED).contains(&transform) {
        return Err(DracoError::Invalid(format!("unknown prediction transform {}", transform)));
    }

    Ok(match (codec, transform) {
        (Codec::Normals, TRANSFORM_OCTAHEDRON | TRANSFORM_OCTAHEDRON_CANONICALIZED) => {
            Some(Prediction::Octahedron)
        }
        (Codec::Integer | Codec::Quantization, TRANSFORM_WRAP) => Some(Prediction::Wrap),
        _ => None,
    })
}

/// Values as stored: entropy coded, or fixed width little-endian.
fn read_integers(
    buffer: &mut DecoderBuffer<'_>,
    num_values: usize,
    components: usize,
) -> DracoResult<Vec<i32>> {
    if buffer.read_u8()? > 0 {
        let symbols = decode_symbols(buffer, num_values, components)?;
        return Ok(symbols.into_iter().map(|s| s as i32).collect());
    }

    let width = usize::from(buffer.read_u8()?);
    if !(1..=4).contains(&width) {
        return Err(DracoError::Invalid(format!("integer width of {} bytes", width)));
    }
    let bytes = buffer.take(num_values * width)?;
    Ok(bytes
        .chunks_exact(width)
        .map(|b| LE::read_uint(b, width) as u32 as i32)
        .collect())
}

/// Symbols carry the sign in their lowest bit.
fn unzigzag(symbol: u32) -> i32 {
    if symbol & 1 == 0 {
        (symbol >> 1) as i32
    } else {
        -((symbol >> 1) as i32) - 1
    }
}

/// Each entry is stored as its difference to the previous one, wrapped
/// into `[min, max]`. The first entry is predicted from zero.
fn undo_wrapped_differences(
    values: &mut [i32],
    components: usize,
    min: i32,
    max: i32,
) -> DracoResult<()> {
    let span = i64::from(max) - i64::from(min);
    if span < 0 || span >= i64::from(i32::MAX) {
        return Err(DracoError::Invalid(format!("wrap range [{}, {}]", min, max)));
    }
    let max_dif = 1 + span as i32;

    let mut predicted = vec![0i32; components];
    for entry in values.chunks_exact_mut(components) {
        for (value, &prediction) in entry.iter_mut().zip(&predicted) {
            let mut original = prediction.clamp(min, max).wrapping_add(*value);
            if original > max {
                original = original.wrapping_sub(max_dif);
            } else if original < min {
                original = original.wrapping_add(max_dif);
            }
            *value = original;
        }
        predicted.copy_from_slice(entry);
    }
    Ok(())
}

/// Reads the quantization range and maps quantized values back to floats.
fn dequantize(
    buffer: &mut DecoderBuffer<'_>,
    components: usize,
    values: &[i32],
) -> DracoResult<Vec<f64>> {
    let mut min = Vec::with_capacity(components);
    for _ in 0..components {
        min.push(buffer.read_f32()?);
    }
    let range = buffer.read_f32()?;
    let bits = buffer.read_u8()?;
    if !(1..=30).contains(&bits) {
        return Err(DracoError::Invalid(format!("{} quantization bits", bits)));
    }
    let delta = range / ((1u32 << bits) - 1) as f32;

    Ok(values
        .chunks_exact(components)
        .flat_map(|entry| {
            entry
                .iter()
                .zip(&min)
                .map(|(&q, &m)| f64::from(q as f32 * delta + m))
        })
        .collect())
}
