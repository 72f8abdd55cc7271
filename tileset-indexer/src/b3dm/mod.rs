//! Batched 3D Model (b3dm) payloads.
//!
//! A b3dm file is a 28-byte header followed by a feature table, a batch
//! table and an embedded GLB:
//!
//! ```text
//! magic "b3dm" | version | byteLength
//! featureTableJSONByteLength | featureTableBinaryByteLength
//! batchTableJSONByteLength   | batchTableBinaryByteLength
//! feature table JSON | feature table binary
//! batch table JSON   | batch table binary
//! GLB
//! ```

mod batch_table;
mod component;
mod draco;
mod feature_table;
mod model;

pub use batch_table::BatchTable;
pub use component::{component_count, ComponentType};
pub use draco::{DecodedMesh, DracoDecoder, DracoPrimitive, NativeDraco};
pub use feature_table::FeatureTable;
pub use model::{encode_glb, Model, PrimitiveVertices};

use crate::error::{IndexerError, Result};
use crate::geodesy::Cartesian3;
use byteorder::{ByteOrder, LittleEndian as LE};

pub const B3DM_MAGIC: &[u8; 4] = b"b3dm";

/// Size of the current b3dm header.
pub const B3DM_HEADER_LEN: usize = 28;

/// Table lengths at or above this value are really the start of the GLB
/// (`"glTF"` read as u32 is larger), which identifies the pre-1.0 headers.
const LEGACY_HEADER_THRESHOLD: u32 = 570_425_344;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct B3dmHeader {
    pub version: u32,
    pub byte_length: usize,
    pub feature_table_json_len: usize,
    pub feature_table_binary_len: usize,
    pub batch_table_json_len: usize,
    pub batch_table_binary_len: usize,
}

/// A parsed b3dm tile.
#[derive(Debug, Clone)]
pub struct B3dm {
    pub header: B3dmHeader,
    pub feature_table: FeatureTable,
    pub batch_table: BatchTable,
    pub model: Model,
}

/// Whether `bytes` start with the b3dm magic.
pub fn is_b3dm(bytes: &[u8]) -> bool {
    bytes.starts_with(B3DM_MAGIC)
}

impl B3dm {
    /// Parses every section of a b3dm payload; `context` names it in errors.
    pub fn parse<'a>(bytes: &'a [u8], context: &str) -> Result<Self> {
        if !is_b3dm(bytes) {
            return Err(IndexerError::format(context, "not a b3dm payload"));
        }
        if bytes.len() < B3DM_HEADER_LEN {
            return Err(IndexerError::format(context, "truncated b3dm header"));
        }

        let word = |i: usize| LE::read_u32(&bytes[4 + i * 4..8 + i * 4]);
        let (batch_json_raw, batch_binary_raw) = (word(4), word(5));
        if batch_json_raw >= LEGACY_HEADER_THRESHOLD || batch_binary_raw >= LEGACY_HEADER_THRESHOLD
        {
            return Err(IndexerError::format(
                context,
                "legacy b3dm header is not supported",
            ));
        }

        let header = B3dmHeader {
            version: word(0),
            byte_length: word(1) as usize,
            feature_table_json_len: word(2) as usize,
            feature_table_binary_len: word(3) as usize,
            batch_table_json_len: batch_json_raw as usize,
            batch_table_binary_len: batch_binary_raw as usize,
        };
        if header.version != 1 {
            return Err(IndexerError::format(
                context,
                format!("unsupported b3dm version {}", header.version),
            ));
        }
        if header.byte_length > bytes.len() {
            return Err(IndexerError::format(
                context,
                format!(
                    "b3dm declares {} bytes but only {} are present",
                    header.byte_length,
                    bytes.len()
                ),
            ));
        }
        let body = &bytes[..header.byte_length];

        let mut offset = B3DM_HEADER_LEN;
        let mut section = |len: usize, name: &str| -> Result<&'a [u8]> {
            let data = offset
                .checked_add(len)
                .and_then(|end| body.get(offset..end))
                .ok_or_else(|| IndexerError::format(context, format!("truncated {}", name)))?;
            offset += len;
            Ok(data)
        };

        let ft_json = section(header.feature_table_json_len, "feature table JSON")?;
        let ft_binary = section(header.feature_table_binary_len, "feature table binary")?;
        let bt_json = section(header.batch_table_json_len, "batch table JSON")?;
        let bt_binary = section(header.batch_table_binary_len, "batch table binary")?;
        let glb = &body[offset..];

        let feature_table = FeatureTable::parse(ft_json, ft_binary, context)?;
        let batch_table =
            BatchTable::parse(bt_json, bt_binary, feature_table.batch_length, context)?;
        let model = Model::parse(glb, context)?;

        Ok(Self {
            header,
            feature_table,
            batch_table,
            model,
        })
    }

    /// Center vertex positions are relative to.
    ///
    /// The feature table's `RTC_CENTER` wins over the glTF `CESIUM_RTC`
    /// extension.
    pub fn rtc_center(&self) -> Option<Cartesian3> {
        self.feature_table
            .rtc_center
            .or_else(|| self.model.rtc_center())
    }

    /// Vertices of every primitive in the embedded glTF.
    pub fn primitive_vertices(
        &self,
        decoder: &dyn DracoDecoder,
        context: &str,
    ) -> Result<Vec<PrimitiveVertices>> {
        self.model.primitive_vertices(decoder, context)
    }
}

/// Assembles a b3dm from table JSON and a GLB, without binary table bodies.
///
/// Table JSON is padded with spaces to keep the GLB 8-byte aligned.
pub fn encode_b3dm(feature_table_json: &str, batch_table_json: &str, glb: &[u8]) -> Vec<u8> {
    let pad = |json: &str| {
        let mut bytes = json.as_bytes().to_vec();
        bytes.resize(json.len().next_multiple_of(8), b' ');
        bytes
    };
    let ft = pad(feature_table_json);
    let bt = pad(batch_table_json);
    let total = B3DM_HEADER_LEN + ft.len() + bt.len() + glb.len();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(B3DM_MAGIC);
    for word in [1, total, ft.len(), 0, bt.len(), 0] {
        out.extend_from_slice(&(word as u32).to_le_bytes());
    }
    out.extend_from_slice(&ft);
    out.extend_from_slice(&bt);
    out.extend_from_slice(glb);
    out
}
