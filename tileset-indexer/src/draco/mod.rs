//! Decoder for Draco geometry bitstreams.
//!
//! `KHR_draco_mesh_compression` primitives embed a Draco bitstream in a
//! bufferView. This module decodes streams written with the sequential
//! method, for meshes and point clouds: connectivity, plus every attribute
//! stored as raw values, entropy-coded integers or quantized floats.
//! Octahedral normals are read past but not rebuilt.
//!
//! Edgebreaker connectivity and kd-tree point clouds are reported as
//! [`DracoError::Unsupported`].

mod attributes;
mod buffer;
#[cfg(test)]
pub(crate) mod encode;
mod header;
mod symbols;

use attributes::AttributeGroup;
use buffer::{bitstream_version, DecoderBuffer};
use byteorder::{ByteOrder, LE};
use header::{GeometryKind, Header};
use symbols::decode_symbols;
use thiserror::Error;

/// Most points a single stream may declare.
pub const MAX_POINTS: usize = 1 << 24;

/// Most values a single attribute may hold.
pub(crate) const MAX_VALUES: usize = 1 << 26;

pub type DracoResult<T> = std::result::Result<T, DracoError>;

/// Errors that can occur while decoding a Draco stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DracoError {
    #[error("Draco stream truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("invalid Draco stream: {0}")]
    Invalid(String),

    /// Valid stream using an encoding this decoder does not implement
    #[error("unsupported Draco encoding: {0}")]
    Unsupported(String),
}

/// Semantic of a Draco attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Position,
    Normal,
    Color,
    TexCoord,
    Generic,
}

impl AttributeType {
    fn from_u8(value: u8) -> DracoResult<Self> {
        Ok(match value {
            0 => AttributeType::Position,
            1 => AttributeType::Normal,
            2 => AttributeType::Color,
            3 => AttributeType::TexCoord,
            4 => AttributeType::Generic,
            other => {
                return Err(DracoError::Invalid(format!("unknown attribute type {}", other)))
            }
        })
    }
}

/// Component type of a Draco attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Bool,
}

impl DataType {
    fn from_u8(value: u8) -> DracoResult<Self> {
        Ok(match value {
            1 => DataType::Int8,
            2 => DataType::UInt8,
            3 => DataType::Int16,
            4 => DataType::UInt16,
            5 => DataType::Int32,
            6 => DataType::UInt32,
            7 => DataType::Int64,
            8 => DataType::UInt64,
            9 => DataType::Float32,
            10 => DataType::Float64,
            11 => DataType::Bool,
            other => return Err(DracoError::Invalid(format!("unknown data type {}", other))),
        })
    }

    /// Size of one component in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 | DataType::Bool => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Reads one little-endian component; `bytes` holds exactly `size()`.
    fn read(self, bytes: &[u8]) -> f64 {
        match self {
            DataType::Int8 => f64::from(bytes[0] as i8),
            DataType::UInt8 => f64::from(bytes[0]),
            DataType::Bool => f64::from(u8::from(bytes[0] != 0)),
            DataType::Int16 => f64::from(LE::read_i16(bytes)),
            DataType::UInt16 => f64::from(LE::read_u16(bytes)),
            DataType::Int32 => f64::from(LE::read_i32(bytes)),
            DataType::UInt32 => f64::from(LE::read_u32(bytes)),
            DataType::Int64 => LE::read_i64(bytes) as f64,
            DataType::UInt64 => LE::read_u64(bytes) as f64,
            DataType::Float32 => f64::from(LE::read_f32(bytes)),
            DataType::Float64 => LE::read_f64(bytes),
        }
    }

    /// Converts a decoded integer to this type, truncating like a C cast.
    fn from_portable(self, value: i32) -> f64 {
        match self {
            DataType::Int8 => f64::from(value as i8),
            DataType::UInt8 => f64::from(value as u8),
            DataType::Int16 => f64::from(value as i16),
            DataType::UInt16 => f64::from(value as u16),
            DataType::UInt32 => f64::from(value as u32),
            DataType::UInt64 => value as u64 as f64,
            DataType::Bool => f64::from(u8::from(value != 0)),
            DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64 => {
                f64::from(value)
            }
        }
    }
}

/// A decoded attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct DracoAttribute {
    /// Id referenced by the glTF extension's attribute map
    pub unique_id: u32,
    pub attribute_type: AttributeType,
    pub data_type: DataType,
    pub num_components: usize,
    pub normalized: bool,
    /// `num_components` values per point, or `None` for octahedral normals
    pub values: Option<Vec<f64>>,
}

impl DracoAttribute {
    /// Values of one point.
    pub fn value(&self, point: usize) -> Option<&[f64]> {
        let start = point.checked_mul(self.num_components)?;
        let end = start.checked_add(self.num_components)?;
        self.values.as_ref()?.get(start..end)
    }
}

/// Contents of a decoded stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DracoGeometry {
    pub num_points: usize,
    /// Triangles as point indices; empty for point clouds
    pub faces: Vec<[u32; 3]>,
    pub attributes: Vec<DracoAttribute>,
}

impl DracoGeometry {
    pub fn attribute(&self, unique_id: u32) -> Option<&DracoAttribute> {
        self.attributes.iter().find(|a| a.unique_id == unique_id)
    }
}

/// Decodes a complete Draco stream.
pub fn decode(data: &[u8]) -> DracoResult<DracoGeometry> {
    let mut buffer = DecoderBuffer::new(data);
    let header = Header::read(&mut buffer)?;
    buffer.set_version(header.version);
    if header.has_metadata() {
        header::skip_metadata(&mut buffer)?;
    }

    let (num_points, faces) = match header.kind {
        GeometryKind::Mesh => read_connectivity(&mut buffer)?,
        GeometryKind::PointCloud => (read_point_count(&mut buffer)?, Vec::new()),
    };

    let num_groups = buffer.read_u8()?;
    let mut groups = Vec::with_capacity(usize::from(num_groups));
    for _ in 0..num_groups {
        groups.push(AttributeGroup::read(&mut buffer)?);
    }
    let mut attributes = Vec::new();
    for group in &groups {
        attributes.extend(group.decode(&mut buffer, num_points)?);
    }

    Ok(DracoGeometry {
        num_points,
        faces,
        attributes,
    })
}

fn read_point_count(buffer: &mut DecoderBuffer<'_>) -> DracoResult<usize> {
    let num_points = buffer.read_i32()?;
    usize::try_from(num_points)
        .ok()
        .filter(|&n| n <= MAX_POINTS)
        .ok_or_else(|| DracoError::Invalid(format!("point cloud of {} points", num_points)))
}

/// Sequential mesh connectivity: face and point counts, then the indices
/// either entropy coded as signed deltas or stored at a width fitting the
/// point count.
fn read_connectivity(buffer: &mut DecoderBuffer<'_>) -> DracoResult<(usize, Vec<[u32; 3]>)> {
    let (num_faces, num_points) = if buffer.version() < bitstream_version(2, 2) {
        (buffer.read_u32()?, buffer.read_u32()?)
    } else {
        (buffer.read_varint_u32()?, buffer.read_varint_u32()?)
    };
    let num_faces = num_faces as usize;
    let num_points = num_points as usize;
    if num_points > MAX_POINTS {
        return Err(DracoError::Invalid(format!("mesh of {} points", num_points)));
    }
    if num_faces > buffer.remaining() / 3 || num_faces * 3 > MAX_VALUES {
        return Err(DracoError::Invalid(format!(
            "{} faces cannot fit in {} bytes",
            num_faces,
            buffer.remaining()
        )));
    }

    let indices = match buffer.read_u8()? {
        0 => {
            let symbols = decode_symbols(buffer, num_faces * 3, 1)?;
            let mut last = 0i64;
            let mut indices = Vec::with_capacity(symbols.len());
            for symbol in symbols {
                let magnitude = i64::from(symbol >> 1);
                last += if symbol & 1 == 1 { -magnitude } else { magnitude };
                indices.push(last);
            }
            indices
        }
        _ => {
            let mut indices = Vec::with_capacity(num_faces * 3);
            for _ in 0..num_faces * 3 {
                let index = if num_points < 1 << 8 {
                    u32::from(buffer.read_u8()?)
                } else if num_points < 1 << 16 {
                    u32::from(buffer.read_u16()?)
                } else if num_points < 1 << 21 && buffer.version() >= bitstream_version(2, 2) {
                    buffer.read_varint_u32()?
                } else {
                    buffer.read_u32()?
                };
                indices.push(i64::from(index));
            }
            indices
        }
    };

    let mut faces = Vec::with_capacity(num_faces);
    for corners in indices.chunks_exact(3) {
        let mut face = [0u32; 3];
        for (slot, &index) in face.iter_mut().zip(corners) {
            *slot = u32::try_from(index)
                .ok()
                .filter(|&i| (i as usize) < num_points)
                .ok_or_else(|| {
                    DracoError::Invalid(format!(
                        "face index {} outside {} points",
                        index, num_points
                    ))
                })?;
        }
        faces.push(face);
    }
    Ok((num_points, faces))
}
