//! Decoder seam for `KHR_draco_mesh_compression` primitives.
//!
//! [`NativeDraco`] decodes sequential Draco streams with [`crate::draco`].
//! Callers with a decoder for other encodings (edgebreaker) plug it in
//! through [`DracoDecoder`].

use crate::draco::{self, DracoAttribute};
use crate::error::{IndexerError, Result};
use crate::geodesy::Cartesian3;

/// A compressed primitive as found in the glTF.
#[derive(Debug, Clone, Copy)]
pub struct DracoPrimitive<'a> {
    /// Bytes of the bufferView referenced by the extension
    pub data: &'a [u8],
    /// Draco attribute id of `POSITION`
    pub position_attribute: u32,
    /// Draco attribute id of the batch id attribute, if any
    pub batch_id_attribute: Option<u32>,
}

/// Vertices recovered from a Draco primitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedMesh {
    /// Dequantized positions in glTF mesh space
    pub positions: Vec<Cartesian3>,
    /// One batch id per position; empty if the primitive has none
    pub batch_ids: Vec<u32>,
}

/// Decodes Draco-compressed glTF primitives.
///
/// Called from a blocking worker thread, so implementations may be
/// CPU-heavy and synchronous.
pub trait DracoDecoder: Send + Sync + 'static {
    fn decode(&self, primitive: &DracoPrimitive<'_>, context: &str) -> Result<DecodedMesh>;
}

/// Built-in decoder for sequential Draco streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDraco;

impl DracoDecoder for NativeDraco {
    fn decode(&self, primitive: &DracoPrimitive<'_>, context: &str) -> Result<DecodedMesh> {
        let geometry =
            draco::decode(primitive.data).map_err(|e| IndexerError::format(context, e.to_string()))?;

        let positions = attribute_values(&geometry, primitive.position_attribute, 3, context)?
            .chunks_exact(3)
            .map(|p| Cartesian3::new(p[0], p[1], p[2]))
            .collect();

        let batch_ids = match primitive.batch_id_attribute {
            Some(id) => attribute_values(&geometry, id, 1, context)?
                .iter()
                .map(|&v| batch_id(v, context))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(DecodedMesh {
            positions,
            batch_ids,
        })
    }
}

fn attribute_values<'g>(
    geometry: &'g draco::DracoGeometry,
    unique_id: u32,
    components: usize,
    context: &str,
) -> Result<&'g [f64]> {
    let attribute: &DracoAttribute = geometry.attribute(unique_id).ok_or_else(|| {
        IndexerError::format(context, format!("Draco stream has no attribute {}", unique_id))
    })?;
    if attribute.num_components != components {
        return Err(IndexerError::format(
            context,
            format!(
                "Draco attribute {} has {} components, expected {}",
                unique_id, attribute.num_components, components
            ),
        ));
    }
    attribute.values.as_deref().ok_or_else(|| {
        IndexerError::format(
            context,
            format!("Draco attribute {} holds octahedral normals", unique_id),
        )
    })
}

/// Batch ids may come out of float quantization slightly off integers.
fn batch_id(value: f64, context: &str) -> Result<u32> {
    let rounded = value.round();
    if rounded >= 0.0 && rounded <= f64::from(u32::MAX) {
        Ok(rounded as u32)
    } else {
        Err(IndexerError::format(
            context,
            format!("Draco batch id {} is not a valid index", value),
        ))
    }
}
