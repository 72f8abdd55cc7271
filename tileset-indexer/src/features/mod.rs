//! Feature extraction from b3dm tiles.
//!
//! Each batch of a b3dm tile is one feature. Its position is derived from
//! its vertices: every vertex is placed in the world, converted to
//! longitude/latitude/height, and the batch's bounding rectangle is
//! reduced to its center. Height is the vertical extent of the batch, not
//! its elevation.

mod reader;

pub use reader::FeatureReader;

use crate::b3dm::{B3dm, DracoDecoder};
use crate::error::Result;
use crate::geodesy::{
    affine_transform, cartographic_from_cartesian3, translation_matrix, y_up_to_z_up,
    Cartesian3, Cartographic, Matrix4, RectangleAccumulator,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A feature found in the tileset.
#[derive(Debug, Clone, PartialEq)]
pub struct TilesetFeature {
    /// Center of the feature's footprint; `height` is its vertical extent
    pub position: Cartographic,
    /// Batch table properties, stringified
    pub properties: BTreeMap<String, String>,
}

/// Extracts every identifiable feature of a b3dm payload.
///
/// # Arguments
///
/// * `bytes` - The b3dm payload
/// * `tile_transform` - Cumulative tile transform from the tileset
/// * `id_property` - Batch table property holding the feature id
/// * `decoder` - Decoder for Draco-compressed primitives
/// * `context` - Tile URI, used in errors and logs
///
/// Batches without vertices, or whose id is missing or not a string, are
/// skipped.
pub fn extract_features(
    bytes: &[u8],
    tile_transform: &Matrix4,
    id_property: &str,
    decoder: &dyn DracoDecoder,
    context: &str,
) -> Result<Vec<(String, TilesetFeature)>> {
    let b3dm = B3dm::parse(bytes, context)?;
    let batch_length = b3dm.feature_table.batch_length;

    let world = *tile_transform
        * translation_matrix(b3dm.rtc_center().unwrap_or(Cartesian3::ZERO))
        * y_up_to_z_up();

    // Keyed by batch id; BATCH_LENGTH comes from the tile and is untrusted
    let mut batches: BTreeMap<usize, RectangleAccumulator> = BTreeMap::new();
    let mut out_of_range = 0usize;

    for primitive in b3dm.primitive_vertices(decoder, context)? {
        let matrix = world * primitive.node_transform;
        for (i, position) in primitive.positions.iter().enumerate() {
            let batch_id = primitive.batch_ids.get(i).copied().unwrap_or(0) as usize;
            if batch_id >= batch_length {
                out_of_range += 1;
                continue;
            }
            let cartographic = cartographic_from_cartesian3(affine_transform(&matrix, *position))?;
            batches
                .entry(batch_id)
                .or_insert_with(RectangleAccumulator::new)
                .add(&cartographic);
        }
    }

    if out_of_range > 0 {
        warn!(
            uri = context,
            vertices = out_of_range,
            batch_length,
            "Vertices reference batch ids beyond BATCH_LENGTH"
        );
    }

    let mut features = Vec::with_capacity(batches.len());
    for (&batch_id, acc) in &batches {
        let Some(rectangle) = acc.rectangle() else {
            continue;
        };
        let Some(id) = b3dm.batch_table.string_value(id_property, batch_id) else {
            warn!(
                uri = context,
                batch_id,
                id_property,
                "Batch has no string id, skipping"
            );
            continue;
        };

        let center = rectangle.center();
        features.push((
            id.to_string(),
            TilesetFeature {
                position: Cartographic::new(center.longitude, center.latitude, acc.height_range()),
                properties: b3dm.batch_table.properties(batch_id),
            },
        ));
    }

    let empty = batch_length.saturating_sub(batches.len());
    if empty > 0 {
        debug!(uri = context, batches = empty, "Batches without vertices");
    }
    debug!(uri = context, batch_length, features = features.len(), "Extracted features");
    Ok(features)
}
