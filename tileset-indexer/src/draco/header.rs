//! Stream header and metadata.

use super::buffer::{bitstream_version, DecoderBuffer};
use super::{DracoError, DracoResult};

const MAGIC: &[u8; 5] = b"DRACO";
const METADATA_FLAG: u16 = 0x8000;

/// Sequential is the only method this decoder implements.
const METHOD_SEQUENTIAL: u8 = 0;

/// Newest minor versions of bitstream 2 per geometry kind.
const MESH_MINOR_MAX: u8 = 2;
const POINT_CLOUD_MINOR_MAX: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GeometryKind {
    PointCloud,
    Mesh,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub version: u16,
    pub kind: GeometryKind,
    pub flags: u16,
}

impl Header {
    pub fn read(buffer: &mut DecoderBuffer<'_>) -> DracoResult<Self> {
        if buffer.take(MAGIC.len())? != MAGIC {
            return Err(DracoError::Invalid("missing DRACO magic".into()));
        }
        let major = buffer.read_u8()?;
        let minor = buffer.read_u8()?;
        let kind = match buffer.read_u8()? {
            0 => GeometryKind::PointCloud,
            1 => GeometryKind::Mesh,
            other => return Err(DracoError::Invalid(format!("unknown geometry type {}", other))),
        };
        let method = buffer.read_u8()?;
        let flags = buffer.read_u16()?;

        let minor_max = match kind {
            GeometryKind::Mesh => MESH_MINOR_MAX,
            GeometryKind::PointCloud => POINT_CLOUD_MINOR_MAX,
        };
        if major != 2 || minor > minor_max {
            return Err(DracoError::Unsupported(format!("bitstream version {}.{}", major, minor)));
        }
        if method != METHOD_SEQUENTIAL {
            let name = match kind {
                GeometryKind::Mesh => "edgebreaker mesh connectivity",
                GeometryKind::PointCloud => "kd-tree point cloud",
            };
            return Err(DracoError::Unsupported(name.into()));
        }

        Ok(Self {
            version: bitstream_version(major, minor),
            kind,
            flags,
        })
    }

    pub fn has_metadata(&self) -> bool {
        self.flags & METADATA_FLAG != 0
    }
}

/// Reads past attribute and geometry metadata.
///
/// Each metadata block is a list of named entries followed by named child
/// blocks. Blocks are only skipped, so they are counted rather than
/// walked recursively.
pub(crate) fn skip_metadata(buffer: &mut DecoderBuffer<'_>) -> DracoResult<()> {
    let attribute_blocks = buffer.read_varint_u32()?;
    for _ in 0..attribute_blocks {
        // Attribute unique id
        buffer.read_varint_u32()?;
        skip_block(buffer)?;
    }
    skip_block(buffer)
}

fn skip_block(buffer: &mut DecoderBuffer<'_>) -> DracoResult<()> {
    let mut pending = 1usize;
    let mut root = true;
    while pending > 0 {
        pending -= 1;
        if !root {
            skip_name(buffer)?;
        }
        root = false;

        let entries = buffer.read_varint_u32()?;
        for _ in 0..entries {
            skip_name(buffer)?;
            let size = buffer.read_varint_u32()? as usize;
            if size == 0 {
                return Err(DracoError::Invalid("empty metadata value".into()));
            }
            buffer.skip(size)?;
        }

        let children = buffer.read_varint_u32()? as usize;
        if children > buffer.remaining() {
            return Err(DracoError::Invalid(format!(
                "{} metadata children in {} bytes",
                children,
                buffer.remaining()
            )));
        }
        pending += children;
    }
    Ok(())
}

fn skip_name(buffer: &mut DecoderBuffer<'_>) -> DracoResult<()> {
    let len = usize::from(buffer.read_u8()?);
    buffer.skip(len)
}
