//! Scalar component types shared by glTF accessors and batch tables.

use byteorder::{ByteOrder, LittleEndian as LE};

/// Element type of a binary array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Float,
    Double,
}

impl ComponentType {
    /// From a glTF `componentType` code.
    pub fn from_gl(code: u32) -> Option<Self> {
        match code {
            5120 => Some(Self::Byte),
            5121 => Some(Self::UnsignedByte),
            5122 => Some(Self::Short),
            5123 => Some(Self::UnsignedShort),
            5124 => Some(Self::Int),
            5125 => Some(Self::UnsignedInt),
            5126 => Some(Self::Float),
            5130 => Some(Self::Double),
            _ => None,
        }
    }

    /// From a batch/feature table `componentType` name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BYTE" => Some(Self::Byte),
            "UNSIGNED_BYTE" => Some(Self::UnsignedByte),
            "SHORT" => Some(Self::Short),
            "UNSIGNED_SHORT" => Some(Self::UnsignedShort),
            "INT" => Some(Self::Int),
            "UNSIGNED_INT" => Some(Self::UnsignedInt),
            "FLOAT" => Some(Self::Float),
            "DOUBLE" => Some(Self::Double),
            _ => None,
        }
    }

    /// Size of one component in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Byte | Self::UnsignedByte => 1,
            Self::Short | Self::UnsignedShort => 2,
            Self::Int | Self::UnsignedInt | Self::Float => 4,
            Self::Double => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float | Self::Double)
    }

    /// Reads one little-endian component from the start of `buf`.
    ///
    /// `buf` must hold at least [`size`](Self::size) bytes.
    pub fn read(self, buf: &[u8]) -> f64 {
        match self {
            Self::Byte => buf[0] as i8 as f64,
            Self::UnsignedByte => buf[0] as f64,
            Self::Short => LE::read_i16(buf) as f64,
            Self::UnsignedShort => LE::read_u16(buf) as f64,
            Self::Int => LE::read_i32(buf) as f64,
            Self::UnsignedInt => LE::read_u32(buf) as f64,
            Self::Float => LE::read_f32(buf) as f64,
            Self::Double => LE::read_f64(buf),
        }
    }

    /// Maps a normalized integer to `[0, 1]` or `[-1, 1]`.
    pub fn normalize(self, value: f64) -> f64 {
        match self {
            Self::Byte => (value / 127.0).max(-1.0),
            Self::UnsignedByte => value / 255.0,
            Self::Short => (value / 32767.0).max(-1.0),
            Self::UnsignedShort => value / 65535.0,
            Self::Int => (value / i32::MAX as f64).max(-1.0),
            Self::UnsignedInt => value / u32::MAX as f64,
            Self::Float | Self::Double => value,
        }
    }
}

/// Number of components for an element type name (`SCALAR`, `VEC3`, ...).
pub fn component_count(element_type: &str) -> Option<usize> {
    match element_type {
        "SCALAR" => Some(1),
        "VEC2" => Some(2),
        "VEC3" => Some(3),
        "VEC4" | "MAT2" => Some(4),
        "MAT3" => Some(9),
        "MAT4" => Some(16),
        _ => None,
    }
}
