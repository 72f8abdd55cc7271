//! Index build orchestration.
//!
//! [`TilesetIndexer`] ties the pieces together:
//!
//! ```text
//! TileSource ──► TileTraverser ──► FeatureReader ──► features by id
//!                                                        │ sort by id
//!                                                        ▼
//!                               rows + IndexBuilders ──► Writer ──► OutputStore
//! ```

use crate::b3dm::{DracoDecoder, NativeDraco};
use crate::config::{IndexerConfig, ROOT_TILESET};
use crate::error::{IndexerError, Result};
use crate::features::{FeatureReader, TilesetFeature};
use crate::index::{builder_for, IndexBuilder, IndexRoot};
use crate::storage::{join_upload, spawn_upload, OutputStore, TileSource, Uploader, ZipStreamOutput};
use crate::tileset::{TileTraverser, TraversalStats};
use crate::writer::Writer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Column holding the longitude in degrees.
pub const LONGITUDE_COLUMN: &str = "Longitude";

/// Column holding the latitude in degrees.
pub const LATITUDE_COLUMN: &str = "Latitude";

/// Column holding the feature's vertical extent in meters.
pub const HEIGHT_COLUMN: &str = "Height";

/// One row of the result table, column → value.
pub type Row = BTreeMap<String, String>;

/// Everything a build produced, ready to be written.
#[derive(Debug, Default)]
pub struct IndexResult {
    /// Rows ordered by feature id; the row id is the position
    pub data: Vec<Row>,
    /// Filled builders by attribute name
    pub indexes: BTreeMap<String, Box<dyn IndexBuilder>>,
    /// Name of the id column
    pub id_property: String,
    pub stats: TraversalStats,
    /// Feature ids reported by more than one tile
    pub duplicate_ids: usize,
}

/// Builds a search index over one tileset.
pub struct TilesetIndexer<S: TileSource> {
    source: Arc<S>,
    config: IndexerConfig,
    decoder: Arc<dyn DracoDecoder>,
}

impl<S: TileSource> TilesetIndexer<S> {
    /// Creates an indexer reading the dataset from `source`.
    ///
    /// Draco-compressed primitives are decoded with [`NativeDraco`]; use
    /// [`with_draco_decoder`](Self::with_draco_decoder) to replace it.
    pub fn new(source: Arc<S>, config: IndexerConfig) -> Self {
        Self {
            source,
            config,
            decoder: Arc::new(NativeDraco),
        }
    }

    /// Set the decoder for Draco-compressed primitives.
    pub fn with_draco_decoder(mut self, decoder: Arc<dyn DracoDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Walks the dataset from `tileset.json` and builds rows and indexes.
    ///
    /// # Errors
    ///
    /// Fails if any tile still fails after its retries
    /// (`IndexerError::Traversal`), or with `IndexerError::Cancelled`.
    #[instrument(skip_all, fields(id_property = %self.config.id_property))]
    pub async fn build(&self, token: &CancellationToken) -> Result<IndexResult> {
        let mut indexes = BTreeMap::new();
        for (attribute, index) in &self.config.indexes {
            indexes.insert(attribute.clone(), builder_for(index.kind)?);
        }

        let reader = Arc::new(FeatureReader::new(
            Arc::clone(&self.source),
            &self.config.id_property,
            Arc::clone(&self.decoder),
        ));
        let traverser = TileTraverser::new(Arc::clone(&self.source), self.config.traversal.clone());
        let stats = traverser
            .for_each_tile(ROOT_TILESET, Arc::clone(&reader), token)
            .await?;

        let mut features: Vec<(String, TilesetFeature)> =
            reader.take_features().into_iter().collect();
        features.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut data = Vec::with_capacity(features.len());
        for (row_id, (id, feature)) in features.iter().enumerate() {
            for (attribute, builder) in indexes.iter_mut() {
                if let Some(value) = feature.properties.get(attribute) {
                    builder.add_index_value(row_id, value);
                }
            }
            data.push(feature_row(&self.config.id_property, id, feature));
        }

        info!(
            features = data.len(),
            tiles = stats.contents,
            duplicates = reader.duplicates(),
            skipped_tiles = reader.skipped_tiles(),
            "Build complete"
        );

        Ok(IndexResult {
            data,
            indexes,
            id_property: self.config.id_property.clone(),
            stats,
            duplicate_ids: reader.duplicates(),
        })
    }

    /// Builds the index and writes every artifact to `output`.
    ///
    /// Nothing is written if the build fails.
    pub async fn build_and_write<O: OutputStore>(
        &self,
        token: &CancellationToken,
        output: &O,
    ) -> Result<IndexRoot> {
        let result = self.build(token).await?;
        if token.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        Writer::new(output).write(&result).await
    }

    /// Builds the index, packs the artifacts into a zip archive and uploads
    /// it as `archive_name` under `project_id`.
    ///
    /// The upload starts before the build; each artifact is compressed and
    /// sent while the next one is still being written. If the build fails
    /// the archive is left incomplete and the uploader's body ends with an
    /// error.
    ///
    /// Returns the asset id assigned by the uploader.
    #[instrument(skip(self, token, uploader))]
    pub async fn build_and_upload<U: Uploader>(
        &self,
        token: &CancellationToken,
        uploader: Arc<U>,
        project_id: &str,
        archive_name: &str,
    ) -> Result<String> {
        let (pipe, upload) = spawn_upload(&uploader, project_id, archive_name);
        let archive = ZipStreamOutput::spawn(pipe);

        let packed = match self.build_and_write(token, &archive).await {
            Ok(_) if token.is_cancelled() => {
                archive.abort().await;
                Err(IndexerError::Cancelled)
            }
            Ok(_) => archive.finish().await,
            Err(e) => {
                archive.abort().await;
                Err(e)
            }
        };
        let uploaded = join_upload(archive_name, upload).await;

        match (packed, uploaded) {
            (Ok(bytes), Ok(asset_id)) => {
                info!(asset_id = %asset_id, bytes, "Index archive uploaded");
                Ok(asset_id)
            }
            // A failing uploader closes the pipe, which the packer sees as
            // an I/O error; report the cause
            (Err(IndexerError::Io { .. }), Err(e)) | (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }
}

/// Row for a feature: id, degrees to 5 places, height to 3 places.
fn feature_row(id_property: &str, id: &str, feature: &TilesetFeature) -> Row {
    let mut row = Row::new();
    row.insert(id_property.to_string(), id.to_string());
    row.insert(
        LONGITUDE_COLUMN.to_string(),
        format!("{:.5}", feature.position.longitude_degrees()),
    );
    row.insert(
        LATITUDE_COLUMN.to_string(),
        format!("{:.5}", feature.position.latitude_degrees()),
    );
    row.insert(
        HEIGHT_COLUMN.to_string(),
        format!("{:.3}", feature.position.height),
    );
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::Cartographic;

    #[test]
    fn test_feature_row_formatting() {
        let feature = TilesetFeature {
            position: Cartographic::from_degrees(139.767_123_4, 35.681_234_5, 21.456_78),
            properties: BTreeMap::new(),
        };
        let row = feature_row("gml_id", "bldg_1", &feature);

        assert_eq!(row["gml_id"], "bldg_1");
        assert_eq!(row["Longitude"], "139.76712");
        assert_eq!(row["Latitude"], "35.68123");
        assert_eq!(row["Height"], "21.457");
        assert_eq!(row.len(), 4);
    }
}
