//! Tile visitor collecting features into one map.

use super::{extract_features, TilesetFeature};
use crate::b3dm::{is_b3dm, DracoDecoder};
use crate::error::{IndexerError, Result};
use crate::storage::TileSource;
use crate::tileset::{TileVisitor, VisitedTile};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Reads every visited tile and records its features by id.
///
/// Decoding runs on the blocking thread pool. The feature map is shared by
/// all concurrent visits; when two tiles report the same id, the one
/// inserted last wins.
pub struct FeatureReader<S: TileSource> {
    source: Arc<S>,
    id_property: Arc<str>,
    decoder: Arc<dyn DracoDecoder>,
    features: Mutex<HashMap<String, TilesetFeature>>,
    duplicates: AtomicUsize,
    skipped_tiles: AtomicUsize,
}

impl<S: TileSource> FeatureReader<S> {
    pub fn new(source: Arc<S>, id_property: &str, decoder: Arc<dyn DracoDecoder>) -> Self {
        Self {
            source,
            id_property: Arc::from(id_property),
            decoder,
            features: Mutex::new(HashMap::new()),
            duplicates: AtomicUsize::new(0),
            skipped_tiles: AtomicUsize::new(0),
        }
    }

    /// Number of ids reported more than once so far.
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Number of contents that were not b3dm.
    pub fn skipped_tiles(&self) -> usize {
        self.skipped_tiles.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.features.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the collected features, leaving the map empty.
    pub fn take_features(&self) -> HashMap<String, TilesetFeature> {
        std::mem::take(&mut *self.features.lock())
    }

    fn insert(&self, uri: &str, features: Vec<(String, TilesetFeature)>) {
        let mut map = self.features.lock();
        for (id, feature) in features {
            if map.insert(id.clone(), feature).is_some() {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                warn!(id = %id, uri, "Duplicate feature id, keeping the latest");
            }
        }
    }
}

impl<S: TileSource> TileVisitor for FeatureReader<S> {
    async fn visit(&self, tile: &VisitedTile) -> Result<()> {
        let bytes = self.source.read_all(&tile.uri).await?;
        trace!(uri = %tile.uri, bytes = bytes.len(), depth = tile.depth, "Tile read");

        if !is_b3dm(&bytes) {
            self.skipped_tiles.fetch_add(1, Ordering::Relaxed);
            debug!(uri = %tile.uri, "Content is not b3dm, skipping");
            return Ok(());
        }

        let decoder = Arc::clone(&self.decoder);
        let id_property = Arc::clone(&self.id_property);
        let transform = tile.transform;
        let uri = tile.uri.clone();

        let features = tokio::task::spawn_blocking(move || {
            extract_features(&bytes, &transform, &id_property, decoder.as_ref(), &uri)
        })
        .await
        .map_err(|e| IndexerError::Internal(format!("decode task failed: {}", e)))??;

        self.insert(&tile.uri, features);
        Ok(())
    }
}
